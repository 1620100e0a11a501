//! Reusable collections of template filters, globals and tests.
//!
//! A [`Bundle`] is contributed by an [`App`] and merged into a
//! [`TemplateEnvironment`](super::TemplateEnvironment) by name through the
//! [`AppRegistry`]. Lookup of `bundle_name` inside an app checks the app's
//! top-level bundles first and then the bundle modules it exposes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use minijinja::Value;
use minijinja::functions::Function;
use minijinja::value::{FunctionArgs, FunctionResult};
use thiserror::Error;

/// Anything that filters, globals and tests can be registered on.
pub trait Registry {
    fn register_filter(&mut self, name: &str, filter: Value) -> &mut Self;
    fn register_global(&mut self, name: &str, value: Value) -> &mut Self;
    fn register_test(&mut self, name: &str, test: Value) -> &mut Self;
}

#[derive(Debug, Clone, Default)]
pub struct Bundle {
    filters: BTreeMap<String, Value>,
    globals: BTreeMap<String, Value>,
    tests: BTreeMap<String, Value>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filters(&self) -> &BTreeMap<String, Value> {
        &self.filters
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    pub fn tests(&self) -> &BTreeMap<String, Value> {
        &self.tests
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.globals.is_empty() && self.tests.is_empty()
    }

    /// Register a native function as a filter.
    pub fn filter<F, Rv, Args>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Function<Rv, Args>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.register_filter(name, Value::from_function(f))
    }

    /// Register a native function as a global callable.
    pub fn function<F, Rv, Args>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Function<Rv, Args>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.register_global(name, Value::from_function(f))
    }

    /// Register a native function as a test. Its result is read for truthiness.
    pub fn test<F, Rv, Args>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Function<Rv, Args>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.register_test(name, Value::from_function(f))
    }

    /// Copy every entry of this bundle into `target`. Existing entries with the
    /// same name are replaced.
    pub fn merge_into<R: Registry>(&self, target: &mut R) {
        for (name, filter) in &self.filters {
            target.register_filter(name, filter.clone());
        }
        for (name, value) in &self.globals {
            target.register_global(name, value.clone());
        }
        for (name, test) in &self.tests {
            target.register_test(name, test.clone());
        }
    }
}

impl Registry for Bundle {
    fn register_filter(&mut self, name: &str, filter: Value) -> &mut Self {
        self.filters.insert(name.to_string(), filter);
        self
    }

    fn register_global(&mut self, name: &str, value: Value) -> &mut Self {
        self.globals.insert(name.to_string(), value);
        self
    }

    fn register_test(&mut self, name: &str, test: Value) -> &mut Self {
        self.tests.insert(name.to_string(), test);
        self
    }
}

/// Identity of a loaded bundle: the app's full name plus the bundle name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId {
    pub app: String,
    pub bundle: String,
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.bundle)
    }
}

/// A configured `app_label.bundle_name` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    pub app_label: String,
    pub bundle_name: String,
}

impl FromStr for BundleSpec {
    type Err = BundleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().rsplit_once('.') {
            Some((app, bundle)) if !app.is_empty() && !bundle.is_empty() => Ok(Self {
                app_label: app.to_string(),
                bundle_name: bundle.to_string(),
            }),
            _ => Err(BundleError::InvalidSpecifier(value.to_string())),
        }
    }
}

impl fmt::Display for BundleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.bundle_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    #[error("app with label `{0}` not found")]
    AppNotFound(String),
    #[error("app `{0}` provides no bundles")]
    NoBundles(String),
    #[error("could not find bundle `{bundle}` in app `{app}`")]
    BundleNotFound { app: String, bundle: String },
    #[error("invalid bundle specifier `{0}`, expected `app.bundle`")]
    InvalidSpecifier(String),
}

#[derive(Debug, Clone, Default)]
struct AppBundles {
    top_level: BTreeMap<String, Arc<Bundle>>,
    modules: BTreeMap<String, Arc<Bundle>>,
}

/// An installed component that may contribute bundles.
#[derive(Debug, Clone)]
pub struct App {
    name: String,
    bundles: Option<AppBundles>,
}

impl App {
    /// `name` is the dotted full name; its last segment also works as a label.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundles: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Expose `bundle` directly on the app's bundle namespace.
    pub fn with_bundle(mut self, name: impl Into<String>, bundle: Bundle) -> Self {
        self.bundles
            .get_or_insert_with(AppBundles::default)
            .top_level
            .insert(name.into(), Arc::new(bundle));
        self
    }

    /// Expose `bundle` as the `bundle` of a named bundle module.
    pub fn with_module(mut self, name: impl Into<String>, bundle: Bundle) -> Self {
        self.bundles
            .get_or_insert_with(AppBundles::default)
            .modules
            .insert(name.into(), Arc::new(bundle));
        self
    }

    fn matches(&self, label: &str) -> bool {
        self.name == label || self.label() == label
    }

    fn bundle(&self, bundle_name: &str) -> Result<Arc<Bundle>, BundleError> {
        let bundles = self
            .bundles
            .as_ref()
            .ok_or_else(|| BundleError::NoBundles(self.name.clone()))?;

        bundles
            .top_level
            .get(bundle_name)
            .or_else(|| bundles.modules.get(bundle_name))
            .cloned()
            .ok_or_else(|| BundleError::BundleNotFound {
                app: self.name.clone(),
                bundle: bundle_name.to_string(),
            })
    }
}

/// Ordered list of installed apps.
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    apps: Vec<App>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, app: App) -> &mut Self {
        self.apps.push(app);
        self
    }

    pub fn apps(&self) -> impl Iterator<Item = &App> {
        self.apps.iter()
    }

    /// First installed app whose full name or last name segment equals `label`.
    pub fn find(&self, label: &str) -> Option<&App> {
        self.apps.iter().find(|app| app.matches(label))
    }

    pub fn get_bundle(
        &self,
        app_label: &str,
        bundle_name: &str,
    ) -> Result<(BundleId, Arc<Bundle>), BundleError> {
        let app = self
            .find(app_label)
            .ok_or_else(|| BundleError::AppNotFound(app_label.to_string()))?;
        let bundle = app.bundle(bundle_name)?;
        let id = BundleId {
            app: app.name.clone(),
            bundle: bundle_name.to_string(),
        };
        Ok((id, bundle))
    }
}

impl Extend<App> for AppRegistry {
    fn extend<T: IntoIterator<Item = App>>(&mut self, iter: T) {
        self.apps.extend(iter);
    }
}
