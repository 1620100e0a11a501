use thiserror::Error;

use crate::cache::KeyFormatError;

use super::bundle::BundleError;
use super::syntax::SyntaxError;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template syntax error in `{name}`: {source}")]
    Syntax {
        name: String,
        #[source]
        source: SyntaxError,
    },
    #[error(transparent)]
    Engine(#[from] minijinja::Error),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error("invalid fragment key format: {0}")]
    KeyFormat(#[from] KeyFormatError),
}

impl TemplateError {
    pub fn syntax(name: impl Into<String>, source: SyntaxError) -> Self {
        Self::Syntax {
            name: name.into(),
            source,
        }
    }

    /// Whether the failure is a lookup of a template that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Engine(err) if err.kind() == minijinja::ErrorKind::TemplateNotFound)
    }
}
