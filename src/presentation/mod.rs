pub mod context;
pub mod generic;
pub mod handlers;
pub mod views;

pub use context::{
    ContextLayer, ContextProcessor, ContextProcessors, CsrfTokenProcessor, RequestContext,
    RequestProcessor,
};
pub use generic::DirectTemplate;
pub use handlers::{page_not_found, server_error};
pub use views::{Shortcuts, render_to_response, render_to_string};
