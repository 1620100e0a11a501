//! MiniJinja integration for axum services: a `{% cache %}` fragment tag,
//! deterministic cache keys, reusable template bundles and request-aware views.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
pub mod presentation;
pub mod template;
