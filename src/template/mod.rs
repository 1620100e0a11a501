//! MiniJinja integration: environment, loader, bundles and the `{% cache %}` tag.

mod bundle;
pub mod bundles;
mod environment;
mod error;
mod loader;
mod syntax;

pub use bundle::{App, AppRegistry, Bundle, BundleError, BundleId, BundleSpec, Registry};
pub use environment::{DEFAULT_CONTENT_TYPE, TemplateEnvironment, TemplateEnvironmentBuilder};
pub use error::TemplateError;
pub use loader::TemplateLoader;
pub use syntax::{CACHE_FUNCTION, SyntaxError, rewrite_cache_tags};
