//! Layered render contexts populated by context processors.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::{HeaderMap, header, request::Parts};
use axum::response::Response;
use minijinja::Value;
use serde::Serialize;

use crate::error::HttpError;
use crate::template::bundles::{CsrfToken, is_token_safe};
use crate::template::{TemplateEnvironment, TemplateError};

use super::views;

pub type ContextLayer = BTreeMap<String, Value>;

/// A stack of variable layers; lookups and [`flatten`](Self::flatten) prefer
/// the most recently pushed layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    layers: Vec<ContextLayer>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            layers: vec![ContextLayer::new()],
        }
    }

    pub fn from_layer(layer: ContextLayer) -> Self {
        Self {
            layers: vec![layer],
        }
    }

    pub fn push(&mut self, layer: ContextLayer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Remove the top layer. The bottom layer is never removed.
    pub fn pop(&mut self) -> Option<ContextLayer> {
        if self.layers.len() > 1 {
            self.layers.pop()
        } else {
            None
        }
    }

    /// Set `key` in the top layer.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        if let Some(top) = self.layers.last_mut() {
            top.insert(key.into(), value.into());
        }
        self
    }

    /// Set `key` from any serializable value.
    pub fn insert_serialize<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> &mut Self {
        self.insert(key, Value::from_serialize(value))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// All layers merged into one map; later layers shadow earlier ones.
    pub fn flatten(&self) -> ContextLayer {
        let mut merged = ContextLayer::new();
        for layer in &self.layers {
            merged.extend(layer.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        merged
    }

    pub fn render_string(
        &self,
        env: &TemplateEnvironment,
        name: &str,
    ) -> Result<String, TemplateError> {
        views::render_to_string(env, name, self.flatten())
    }

    pub fn render_response(
        &self,
        env: &TemplateEnvironment,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<Response, HttpError> {
        views::render_to_response(env, name, self.flatten(), content_type)
    }
}

/// Contributes variables to every [`RequestContext`] built for a request.
pub trait ContextProcessor: Send + Sync {
    fn process(&self, request: &Parts) -> ContextLayer;
}

#[derive(Debug, Serialize)]
struct RequestInfo<'a> {
    path: &'a str,
    method: &'a str,
    query: &'a str,
}

/// Exposes `request.path`, `request.method` and `request.query`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestProcessor;

impl ContextProcessor for RequestProcessor {
    fn process(&self, request: &Parts) -> ContextLayer {
        let info = RequestInfo {
            path: request.uri.path(),
            method: request.method.as_str(),
            query: request.uri.query().unwrap_or(""),
        };
        ContextLayer::from([("request".to_string(), Value::from_serialize(&info))])
    }
}

/// Exposes `csrf_token` from the `csrftoken` cookie or the `x-csrftoken` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfTokenProcessor;

pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "x-csrftoken";

impl CsrfTokenProcessor {
    fn token(headers: &HeaderMap) -> Option<String> {
        let from_cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == CSRF_COOKIE)
            .map(|(_, value)| value.trim().to_string());

        from_cookie
            .or_else(|| {
                headers
                    .get(CSRF_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.trim().to_string())
            })
            .filter(|token| !token.is_empty() && is_token_safe(token))
    }
}

impl ContextProcessor for CsrfTokenProcessor {
    fn process(&self, request: &Parts) -> ContextLayer {
        let token = Self::token(&request.headers).map_or_else(CsrfToken::not_provided, CsrfToken::new);
        ContextLayer::from([("csrf_token".to_string(), token.into_value())])
    }
}

/// Ordered processors shared by the extractor and middleware.
#[derive(Clone, Default)]
pub struct ContextProcessors(Arc<Vec<Arc<dyn ContextProcessor>>>);

impl ContextProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request and CSRF processors.
    pub fn standard() -> Self {
        Self::new().with(RequestProcessor).with(CsrfTokenProcessor)
    }

    pub fn with(self, processor: impl ContextProcessor + 'static) -> Self {
        let mut processors: Vec<_> = self.0.iter().cloned().collect();
        processors.push(Arc::new(processor));
        Self(Arc::new(processors))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A context whose layers are, bottom to top, `base` then each processor's output.
    pub fn build(&self, request: &Parts, base: ContextLayer) -> RequestContext {
        let mut context = RequestContext::from_layer(base);
        for processor in self.0.iter() {
            context.push(processor.process(request));
        }
        context.push(ContextLayer::new());
        context
    }
}

impl std::fmt::Debug for ContextProcessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContextProcessors").field(&self.0.len()).finish()
    }
}

/// Uses the context attached by the request-context middleware when present,
/// otherwise builds one from the state's processors.
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
    ContextProcessors: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<RequestContext>() {
            return Ok(context.clone());
        }
        Ok(ContextProcessors::from_ref(state).build(parts, ContextLayer::new()))
    }
}
