use std::sync::Arc;

use axum::{
    Router,
    extract::{
        RawPathParams, State,
        rejection::RawPathParamsRejection,
    },
    http::Uri,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::debug;

use crate::config::RouteSettings;
use crate::presentation::{DirectTemplate, RequestContext, page_not_found, server_error};

use super::AppState;
use super::middleware::{attach_request_context, log_responses, set_request_context};

/// One `GET` route per configured template, with the 404 page as fallback.
pub fn build_router(state: AppState, routes: &[RouteSettings]) -> Router {
    let mut router = Router::new();

    for route in routes {
        let mut view = DirectTemplate::new(route.template.clone());
        if let Some(content_type) = route.content_type.as_ref() {
            view = view.with_content_type(content_type.clone());
        }
        let view = Arc::new(view);
        debug!(
            target = "jinja_bridge::http::router",
            path = %route.path,
            template = %route.template,
            name = route.name.as_deref().unwrap_or(""),
            "route registered",
        );

        router = router.route(
            &route.path,
            get(
                move |State(state): State<AppState>,
                      context: RequestContext,
                      params: Result<RawPathParams, RawPathParamsRejection>| {
                    let view = Arc::clone(&view);
                    async move { serve_template(&state, &view, context, params) }
                },
            ),
        );
    }

    router
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.processors.clone(),
            attach_request_context,
        ))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

fn serve_template(
    state: &AppState,
    view: &DirectTemplate,
    context: RequestContext,
    params: Result<RawPathParams, RawPathParamsRejection>,
) -> Response {
    let params: Vec<(String, String)> = match params {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        Err(RawPathParamsRejection::MissingPathParams(_)) => Vec::new(),
        Err(rejection) => return rejection.into_response(),
    };

    match view.render(&state.templates, context, &params) {
        Ok(response) => response,
        Err(err) => {
            let mut response = server_error(&state.templates);
            err.report().clone().attach(&mut response);
            response
        }
    }
}

async fn not_found(State(state): State<AppState>, context: RequestContext, uri: Uri) -> Response {
    page_not_found(&state.templates, context, uri.path())
}
