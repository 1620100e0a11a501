mod middleware;
mod site;

pub use middleware::{RequestId, attach_request_context, log_responses, set_request_context};
pub use site::build_router;

use std::sync::Arc;

use axum::extract::FromRef;

use crate::presentation::ContextProcessors;
use crate::template::TemplateEnvironment;

#[derive(Clone, Debug)]
pub struct AppState {
    pub templates: Arc<TemplateEnvironment>,
    pub processors: ContextProcessors,
}

impl AppState {
    /// State with the standard request and CSRF processors.
    pub fn new(templates: Arc<TemplateEnvironment>) -> Self {
        Self {
            templates,
            processors: ContextProcessors::standard(),
        }
    }

    pub fn with_processors(mut self, processors: ContextProcessors) -> Self {
        self.processors = processors;
        self
    }
}

impl FromRef<AppState> for Arc<TemplateEnvironment> {
    fn from_ref(state: &AppState) -> Self {
        state.templates.clone()
    }
}

impl FromRef<AppState> for ContextProcessors {
    fn from_ref(state: &AppState) -> Self {
        state.processors.clone()
    }
}
