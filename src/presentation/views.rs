use std::sync::Arc;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::HttpError;
use crate::template::{TemplateEnvironment, TemplateError};

use super::context::RequestContext;

pub fn render_to_string<S: Serialize>(
    env: &TemplateEnvironment,
    name: &str,
    context: S,
) -> Result<String, TemplateError> {
    env.render(name, context)
}

/// Render `name` into a 200 response. Without an explicit content type the
/// environment default is used; `text/*` types get a UTF-8 charset.
pub fn render_to_response<S: Serialize>(
    env: &TemplateEnvironment,
    name: &str,
    context: S,
    content_type: Option<&str>,
) -> Result<Response, HttpError> {
    let body = render_to_string(env, name, context)?;
    let content_type = content_type.unwrap_or_else(|| env.default_content_type());
    response_with_type(StatusCode::OK, body, content_type)
}

pub(crate) fn response_with_type(
    status: StatusCode,
    body: String,
    content_type: &str,
) -> Result<Response, HttpError> {
    let value = header_value(content_type).ok_or_else(|| {
        HttpError::new(
            "presentation::views::render_to_response",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            format!("invalid content type `{content_type}`"),
        )
    })?;

    let mut response = (status, body).into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, value);
    Ok(response)
}

fn header_value(content_type: &str) -> Option<HeaderValue> {
    let needs_charset =
        content_type.starts_with("text/") && !content_type.to_ascii_lowercase().contains("charset");
    if needs_charset {
        HeaderValue::from_str(&format!("{content_type}; charset=utf-8")).ok()
    } else {
        HeaderValue::from_str(content_type).ok()
    }
}

/// Rendering helpers bound to one environment.
#[derive(Debug, Clone)]
pub struct Shortcuts {
    env: Arc<TemplateEnvironment>,
}

impl Shortcuts {
    pub fn new(env: Arc<TemplateEnvironment>) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &TemplateEnvironment {
        &self.env
    }

    pub fn render_to_string<S: Serialize>(
        &self,
        name: &str,
        context: S,
    ) -> Result<String, TemplateError> {
        render_to_string(&self.env, name, context)
    }

    pub fn render_to_response<S: Serialize>(
        &self,
        name: &str,
        context: S,
        content_type: Option<&str>,
    ) -> Result<Response, HttpError> {
        render_to_response(&self.env, name, context, content_type)
    }

    pub fn render_context(
        &self,
        name: &str,
        context: &RequestContext,
        content_type: Option<&str>,
    ) -> Result<Response, HttpError> {
        context.render_response(&self.env, name, content_type)
    }
}

#[cfg(test)]
mod tests {
    use minijinja::context;

    use super::*;

    fn env() -> TemplateEnvironment {
        let mut env = TemplateEnvironment::builder().build().expect("environment");
        env.add_template("hello.html", "Hello {{ name }}!")
            .expect("template");
        env
    }

    #[test]
    fn text_types_get_a_charset() {
        let response = render_to_response(&env(), "hello.html", context! { name => "Ada" }, None)
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );

        let json = render_to_response(
            &env(),
            "hello.html",
            context! { name => "Ada" },
            Some("application/json"),
        )
        .expect("response");
        assert_eq!(json.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn missing_template_is_a_server_error() {
        let err = render_to_response(&env(), "nope.html", context! {}, None)
            .expect_err("missing template");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.report().messages[0].contains("nope.html"));
    }

    #[test]
    fn shortcuts_use_the_bound_environment() {
        let shortcuts = Shortcuts::new(Arc::new(env()));
        let body = shortcuts
            .render_to_string("hello.html", context! { name => "Grace" })
            .expect("render");
        assert_eq!(body, "Hello Grace!");
    }
}
