//! The template environment shared by views.
//!
//! Built once at startup (see [`TemplateEnvironment::bootstrap`]) and then
//! shared read-only behind an `Arc`. Every template source passes through the
//! `{% cache %}` rewrite before minijinja compiles it.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use minijinja::value::{Kwargs, Rest, ValueKind};
use minijinja::{Environment, Error, ErrorKind, State, Template, Value};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{
    BytecodeCache, CacheConfig, CacheParameters, FragmentCache, KeyFormat, SharedBackend,
};
use crate::config::Settings;

use super::bundle::{App, AppRegistry, Bundle, BundleId, BundleSpec, Registry};
use super::bundles::{SiteContext, UrlMap, builtin_app};
use super::error::TemplateError;
use super::loader::TemplateLoader;
use super::syntax::{CACHE_FUNCTION, rewrite_cache_tags};

pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Name reported for templates rendered from a source string.
const INLINE_NAME: &str = "<string>";

#[derive(Clone)]
pub struct TemplateEnvironment {
    env: Environment<'static>,
    apps: Arc<AppRegistry>,
    filters: BTreeMap<String, Value>,
    globals: BTreeMap<String, Value>,
    tests: BTreeMap<String, Value>,
    loaded_bundles: HashSet<BundleId>,
    fragment_cache: FragmentCache,
    default_content_type: String,
}

impl std::fmt::Debug for TemplateEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEnvironment")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .field("tests", &self.tests.keys().collect::<Vec<_>>())
            .field("loaded_bundles", &self.loaded_bundles)
            .field("fragment_cache", &self.fragment_cache.is_enabled())
            .finish()
    }
}

impl TemplateEnvironment {
    pub fn builder() -> TemplateEnvironmentBuilder {
        TemplateEnvironmentBuilder::default()
    }

    /// Environment for the configured directories, cache and bundles.
    pub fn bootstrap(settings: &Settings) -> Result<Self, TemplateError> {
        Self::bootstrap_with_apps(settings, [])
    }

    /// Like [`bootstrap`](Self::bootstrap), with extra installed apps whose
    /// bundles the configuration may name.
    pub fn bootstrap_with_apps(
        settings: &Settings,
        apps: impl IntoIterator<Item = App>,
    ) -> Result<Self, TemplateError> {
        let mut urls = UrlMap::new();
        for route in &settings.site.routes {
            if let Some(name) = route.name.as_deref() {
                urls.insert(name, route.path.clone());
            }
        }

        let mut builder = Self::builder()
            .directories(settings.templates.directories.iter().cloned())
            .cache_config(&CacheConfig::from(&settings.cache))
            .default_content_type(settings.templates.default_content_type.clone())
            .site(SiteContext {
                settings: settings.site.settings.clone(),
                urls,
            });
        for app in apps {
            builder = builder.app(app);
        }
        for spec in &settings.templates.bundles {
            builder = builder.bundle(spec.clone());
        }
        builder.build()
    }

    /// Underlying minijinja environment.
    pub fn env(&self) -> &Environment<'static> {
        &self.env
    }

    pub fn apps(&self) -> &AppRegistry {
        &self.apps
    }

    pub fn fragment_cache(&self) -> &FragmentCache {
        &self.fragment_cache
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

    pub fn loaded_bundles(&self) -> &HashSet<BundleId> {
        &self.loaded_bundles
    }

    pub fn default_content_type(&self) -> &str {
        &self.default_content_type
    }

    pub fn get_template(&self, name: &str) -> Result<Template<'_, '_>, TemplateError> {
        Ok(self.env.get_template(name)?)
    }

    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String, TemplateError> {
        let started = Instant::now();
        let rendered = self.get_template(name)?.render(context)?;
        record_render(name, started);
        Ok(rendered)
    }

    /// Render an unnamed template; its timing is labelled `<string>`.
    pub fn render_str<S: Serialize>(&self, source: &str, context: S) -> Result<String, TemplateError> {
        let started = Instant::now();
        let source =
            rewrite_cache_tags(source).map_err(|err| TemplateError::syntax(INLINE_NAME, err))?;
        let rendered = self.env.render_str(&source, context)?;
        record_render(INLINE_NAME, started);
        Ok(rendered)
    }

    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let name = name.into();
        let source = source.into();
        let compiled = rewrite_cache_tags(&source)
            .map_err(|err| TemplateError::syntax(name.clone(), err))?
            .into_owned();
        self.env.add_template_owned(name, compiled)?;
        Ok(())
    }

    /// Merge bundle `bundle_name` of app `app_label` into this environment.
    ///
    /// A bundle already merged is skipped unless `reload` is set.
    pub fn load(
        &mut self,
        app_label: &str,
        bundle_name: &str,
        reload: bool,
    ) -> Result<Arc<Bundle>, TemplateError> {
        let (id, bundle) = self.apps.get_bundle(app_label, bundle_name)?;
        if reload || !self.loaded_bundles.contains(&id) {
            bundle.merge_into(self);
            info!(bundle = %id, reload, "bundle loaded");
            self.loaded_bundles.insert(id);
        } else {
            debug!(bundle = %id, "bundle already loaded");
        }
        Ok(bundle)
    }

    pub fn load_spec(&mut self, spec: &BundleSpec) -> Result<Arc<Bundle>, TemplateError> {
        self.load(&spec.app_label, &spec.bundle_name, false)
    }
}

fn filter_forwarder<F>(f: F) -> F
where
    F: for<'a, 'b, 'c> Fn(&'a State<'b, 'c>, Rest<Value>) -> Result<Value, Error>
        + Send
        + Sync
        + 'static,
{
    f
}

fn test_forwarder<F>(f: F) -> F
where
    F: for<'a, 'b, 'c> Fn(&'a State<'b, 'c>, Rest<Value>) -> Result<bool, Error>
        + Send
        + Sync
        + 'static,
{
    f
}

impl Registry for TemplateEnvironment {
    fn register_filter(&mut self, name: &str, filter: Value) -> &mut Self {
        let callable = filter.clone();
        self.env.add_filter(
            name.to_string(),
            filter_forwarder(move |state, args| callable.call(state, &args.0)),
        );
        self.filters.insert(name.to_string(), filter);
        self
    }

    fn register_global(&mut self, name: &str, value: Value) -> &mut Self {
        self.env.add_global(name.to_string(), value.clone());
        self.globals.insert(name.to_string(), value);
        self
    }

    fn register_test(&mut self, name: &str, test: Value) -> &mut Self {
        let callable = test.clone();
        self.env.add_test(
            name.to_string(),
            test_forwarder(move |state, args| Ok(callable.call(state, &args.0)?.is_true())),
        );
        self.tests.insert(name.to_string(), test);
        self
    }
}

fn record_render(template: &str, started: Instant) {
    histogram!("jinja_bridge_template_render_ms", "template" => template.to_string())
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

/// Seconds from a `{% cache %}` timeout expression. `none` defers to the backend default.
pub(crate) fn parse_timeout(value: &Value) -> Result<Option<Duration>, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(None);
    }
    if value.kind() == ValueKind::Number
        && let Ok(seconds) = f64::try_from(value.clone())
        && let Ok(timeout) = Duration::try_from_secs_f64(seconds)
    {
        return Ok(Some(timeout));
    }
    Err(Error::new(
        ErrorKind::InvalidOperation,
        format!("cache timeout must be a non-negative number of seconds, got `{value}`"),
    ))
}

fn fragment_function(
    cache: FragmentCache,
) -> impl for<'a, 'b, 'c> Fn(&'a State<'b, 'c>, Value, Value, Kwargs) -> Result<Value, Error>
+ Send
+ Sync
+ 'static {
    move |state, key, timeout, kwargs| {
        let caller: Value = kwargs.get("caller")?;
        kwargs.assert_all_used()?;
        let ttl = parse_timeout(&timeout)?;
        let render_body = || caller.call(state, &[]).map(|body| body.to_string());

        let fragment = if cache.is_enabled() {
            let parameters = CacheParameters::try_from(&key).map_err(|err| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    "cache tag parameters cannot be serialized",
                )
                .with_source(err)
            })?;
            cache.execute(&parameters, ttl, render_body)?
        } else {
            render_body()?
        };
        Ok(Value::from_safe_string(fragment))
    }
}

/// Step-by-step construction of a [`TemplateEnvironment`].
#[derive(Default)]
pub struct TemplateEnvironmentBuilder {
    directories: Vec<PathBuf>,
    backend: Option<SharedBackend>,
    key_format: KeyFormat,
    bytecode_prefix: Option<String>,
    default_content_type: Option<String>,
    site: SiteContext,
    apps: Vec<App>,
    bundles: Vec<BundleSpec>,
}

impl TemplateEnvironmentBuilder {
    pub fn directories<I, P>(mut self, directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.directories.extend(directories.into_iter().map(Into::into));
        self
    }

    /// Backend, key format and bytecode cache from a `[cache]` table.
    pub fn cache_config(mut self, config: &CacheConfig) -> Self {
        self.backend = config.build_backend();
        self.key_format = config.fragment_key_format.clone();
        self.bytecode_prefix = config
            .bytecode_cache
            .then(|| config.bytecode_prefix.clone());
        self
    }

    pub fn backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn key_format(mut self, key_format: KeyFormat) -> Self {
        self.key_format = key_format;
        self
    }

    /// Cache rewritten template sources under `prefix` on the backend.
    pub fn bytecode_cache(mut self, prefix: impl Into<String>) -> Self {
        self.bytecode_prefix = Some(prefix.into());
        self
    }

    pub fn default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = Some(content_type.into());
        self
    }

    pub fn site(mut self, site: SiteContext) -> Self {
        self.site = site;
        self
    }

    pub fn app(mut self, app: App) -> Self {
        self.apps.push(app);
        self
    }

    /// Bundle to merge once the environment is built.
    pub fn bundle(mut self, spec: BundleSpec) -> Self {
        self.bundles.push(spec);
        self
    }

    pub fn build(self) -> Result<TemplateEnvironment, TemplateError> {
        let fragment_cache = FragmentCache::new(self.backend.clone(), self.key_format);

        let mut env = Environment::new();
        env.add_function(CACHE_FUNCTION, fragment_function(fragment_cache.clone()));

        if !self.directories.is_empty() {
            let bytecode = match (&self.backend, self.bytecode_prefix) {
                (Some(backend), Some(prefix)) => {
                    Some(Arc::new(BytecodeCache::new(Arc::clone(backend), prefix)))
                }
                _ => None,
            };
            env.set_loader(TemplateLoader::new(self.directories).into_callback(bytecode));
        }

        let mut apps = AppRegistry::new();
        apps.install(builtin_app(&self.site, self.backend));
        apps.extend(self.apps);

        let mut environment = TemplateEnvironment {
            env,
            apps: Arc::new(apps),
            filters: BTreeMap::new(),
            globals: BTreeMap::new(),
            tests: BTreeMap::new(),
            loaded_bundles: HashSet::new(),
            fragment_cache,
            default_content_type: self
                .default_content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        };

        for spec in &self.bundles {
            environment.load_spec(spec)?;
        }
        Ok(environment)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use minijinja::context;

    use super::*;
    use crate::cache::{BackendKind, MemoryCache};

    fn memory() -> SharedBackend {
        Arc::new(MemoryCache::new(NonZeroUsize::new(32).expect("limit"), None))
    }

    #[test]
    fn timeouts_accept_none_and_non_negative_numbers() {
        assert_eq!(parse_timeout(&Value::from(())).expect("none"), None);
        assert_eq!(parse_timeout(&Value::UNDEFINED).expect("undefined"), None);
        assert_eq!(
            parse_timeout(&Value::from(3600)).expect("int"),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            parse_timeout(&Value::from(1.5)).expect("float"),
            Some(Duration::from_millis(1500))
        );
        assert!(parse_timeout(&Value::from(-1)).is_err());
        assert!(parse_timeout(&Value::from("60")).is_err());
    }

    #[test]
    fn cached_fragment_is_served_on_second_render() {
        let mut env = TemplateEnvironment::builder()
            .backend(memory())
            .build()
            .expect("environment");
        env.add_template("page.html", "{% cache name %}<b>{{ name }}{{ suffix }}</b>{% endcache %}")
            .expect("template");

        let first = env
            .render("page.html", context! { name => "a", suffix => "1" })
            .expect("first");
        let second = env
            .render("page.html", context! { name => "a", suffix => "2" })
            .expect("second");
        assert_eq!(first, "<b>a1</b>");
        assert_eq!(second, "<b>a1</b>");
    }

    #[test]
    fn fragments_render_fresh_without_backend() {
        let env = TemplateEnvironment::builder().build().expect("environment");
        let source = "{% cache 'k', 60 %}{{ n }}{% endcache %}";
        assert_eq!(env.render_str(source, context! { n => 1 }).expect("render"), "1");
        assert_eq!(env.render_str(source, context! { n => 2 }).expect("render"), "2");
    }

    #[test]
    fn syntax_errors_name_the_template() {
        let mut env = TemplateEnvironment::builder().build().expect("environment");
        let err = env
            .add_template("broken.html", "{% cache 'k' %}")
            .expect_err("missing endcache");
        assert!(matches!(err, TemplateError::Syntax { ref name, .. } if name == "broken.html"));
    }

    #[test]
    fn cache_config_selects_backend_key_format_and_bytecode() {
        let config = CacheConfig {
            fragment_key_format: "site:%(hash)s".parse().expect("key format"),
            ..Default::default()
        };
        let builder = TemplateEnvironment::builder().cache_config(&config);
        assert_eq!(builder.bytecode_prefix.as_deref(), Some("jinja2/bytecode/"));

        let env = builder.build().expect("environment");
        assert!(env.fragment_cache().is_enabled());
        assert_eq!(env.fragment_cache().key_format().render("h"), "site:h");

        let without_bytecode = CacheConfig {
            bytecode_cache: false,
            ..Default::default()
        };
        let builder = TemplateEnvironment::builder().cache_config(&without_bytecode);
        assert!(builder.backend.is_some());
        assert!(builder.bytecode_prefix.is_none());
    }

    #[test]
    fn cache_config_without_backend_disables_fragments() {
        let config = CacheConfig {
            backend: BackendKind::None,
            ..Default::default()
        };
        let env = TemplateEnvironment::builder()
            .cache_config(&config)
            .build()
            .expect("environment");
        assert!(!env.fragment_cache().is_enabled());
    }

    #[test]
    fn configured_bundles_are_loaded_at_build() {
        let env = TemplateEnvironment::builder()
            .bundle("jinja_bridge.humanize".parse().expect("spec"))
            .bundle("jinja_bridge.csrf".parse().expect("spec"))
            .build()
            .expect("environment");

        assert!(env.filters().contains_key("intcomma"));
        assert!(env.globals().contains_key("csrf_token"));
        assert_eq!(env.loaded_bundles().len(), 2);
        assert_eq!(
            env.render_str("{{ 1234567 | intcomma }}", ()).expect("render"),
            "1,234,567"
        );
    }

    #[test]
    fn unknown_bundles_fail_the_build() {
        let err = TemplateEnvironment::builder()
            .bundle("jinja_bridge.missing".parse().expect("spec"))
            .build()
            .expect_err("missing bundle");
        assert!(matches!(err, TemplateError::Bundle(_)));
    }

    #[test]
    fn registered_tests_are_usable() {
        let mut env = TemplateEnvironment::builder().build().expect("environment");
        env.register_test("even", Value::from_function(|n: i64| n % 2 == 0));
        assert_eq!(
            env.render_str("{{ 4 is even }}/{{ 3 is even }}", ()).expect("render"),
            "true/false"
        );
    }

    #[test]
    fn clones_are_independent() {
        let mut original = TemplateEnvironment::builder().build().expect("environment");
        original.register_global("site", Value::from("original"));
        let mut copy = original.clone();
        copy.register_global("site", Value::from("copy"));

        assert_eq!(original.render_str("{{ site }}", ()).expect("render"), "original");
        assert_eq!(copy.render_str("{{ site }}", ()).expect("render"), "copy");
    }
}
