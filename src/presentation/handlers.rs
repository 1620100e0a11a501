use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use minijinja::context;

use crate::error::ErrorReport;
use crate::template::TemplateEnvironment;

use super::context::RequestContext;
use super::views;

pub const NOT_FOUND_TEMPLATE: &str = "404.html";
pub const SERVER_ERROR_TEMPLATE: &str = "500.html";

/// Render `404.html` with `request_path`; plain text if that template fails.
pub fn page_not_found(env: &TemplateEnvironment, mut context: RequestContext, path: &str) -> Response {
    context.insert("request_path", path);
    let rendered = context.render_string(env, NOT_FOUND_TEMPLATE);
    let mut response = error_page(env, StatusCode::NOT_FOUND, rendered, "Not Found");
    ErrorReport::from_message(
        "presentation::handlers::page_not_found",
        StatusCode::NOT_FOUND,
        format!("no route for `{path}`"),
    )
    .attach(&mut response);
    response
}

/// Render `500.html` with an empty context; plain text if that template fails.
pub fn server_error(env: &TemplateEnvironment) -> Response {
    let rendered = views::render_to_string(env, SERVER_ERROR_TEMPLATE, context! {});
    error_page(
        env,
        StatusCode::INTERNAL_SERVER_ERROR,
        rendered,
        "Internal Server Error",
    )
}

fn error_page<E: std::error::Error>(
    env: &TemplateEnvironment,
    status: StatusCode,
    rendered: Result<String, E>,
    fallback: &'static str,
) -> Response {
    match rendered {
        Ok(body) => views::response_with_type(status, body, env.default_content_type())
            .unwrap_or_else(|err| {
                let mut response = plain(status, fallback);
                err.report().clone().attach(&mut response);
                response
            }),
        Err(err) => {
            tracing::warn!(
                target = "jinja_bridge::presentation::handlers",
                status = status.as_u16(),
                error = %err,
                "error template failed; using plain text",
            );
            plain(status, fallback)
        }
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
