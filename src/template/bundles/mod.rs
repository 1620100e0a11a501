//! Bundles shipped with the crate, installed as the `jinja_bridge` app.
//!
//! | Bundle     | Provides                                      |
//! |------------|-----------------------------------------------|
//! | `site`     | `url(name, *args)`, `setting(name, default)`  |
//! | `csrf`     | `csrf_token()`                                |
//! | `humanize` | `intcomma`, `intword`, `ordinal`, `apnumber`  |
//! | `cache`    | `cache.get(key)`, `cache.set(key, value, ttl)` |

mod cache;
mod csrf;
mod humanize;
mod site;

use std::collections::BTreeMap;

pub use cache::CacheHandle;
pub use csrf::{CSRF_NOT_PROVIDED, CsrfToken};
pub(crate) use csrf::is_token_safe;
pub use humanize::{apnumber, intcomma, intword, ordinal};
pub use site::UrlMap;

use crate::cache::SharedBackend;

use super::bundle::App;

pub const BUILTIN_APP: &str = "jinja_bridge";

/// Site data the `site` bundle exposes to templates.
#[derive(Debug, Clone, Default)]
pub struct SiteContext {
    pub settings: BTreeMap<String, serde_json::Value>,
    pub urls: UrlMap,
}

pub fn builtin_app(site: &SiteContext, backend: Option<SharedBackend>) -> App {
    App::new(BUILTIN_APP)
        .with_module("site", site::bundle(&site.settings, &site.urls))
        .with_module("csrf", csrf::bundle())
        .with_module("humanize", humanize::bundle())
        .with_module("cache", cache::bundle(backend))
}
