//! A view that renders one template per route.

use std::collections::BTreeMap;

use axum::response::Response;
use minijinja::Value;

use crate::error::HttpError;
use crate::template::TemplateEnvironment;

use super::context::{ContextLayer, RequestContext};

/// Renders `template` with the request context, `extra_context` and the
/// matched path parameters under `params`.
#[derive(Debug, Clone)]
pub struct DirectTemplate {
    template: String,
    extra_context: ContextLayer,
    content_type: Option<String>,
}

impl DirectTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            extra_context: ContextLayer::new(),
            content_type: None,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_context.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Explicit type, else the type guessed from the template name.
    pub fn content_type(&self) -> Option<String> {
        self.content_type.clone().or_else(|| {
            mime_guess::from_path(&self.template)
                .first()
                .map(|mime| mime.essence_str().to_string())
        })
    }

    pub fn context(&self, mut context: RequestContext, params: &[(String, String)]) -> RequestContext {
        context.push(self.extra_context.clone());
        let params: BTreeMap<&str, &str> = params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        context.insert("params", Value::from_serialize(&params));
        context
    }

    pub fn render(
        &self,
        env: &TemplateEnvironment,
        context: RequestContext,
        params: &[(String, String)],
    ) -> Result<Response, HttpError> {
        let content_type = self.content_type();
        self.context(context, params)
            .render_response(env, &self.template, content_type.as_deref())
    }
}
