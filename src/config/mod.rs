//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::{BTreeMap, HashSet},
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use mime_guess::mime::Mime;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{BackendKind, DEFAULT_BYTECODE_PREFIX, DEFAULT_KEY_FORMAT, KeyFormat};
use crate::template::{BundleSpec, DEFAULT_CONTENT_TYPE};

pub use cli::{
    CacheKeyArgs, CliArgs, Command, RenderArgs, ServeArgs, ServeOverrides, TemplateOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "jinja-bridge";
const ENV_PREFIX: &str = "JINJA_BRIDGE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_TEMPLATE_DIR: &str = "templates";
const DEFAULT_CACHE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub templates: TemplateSettings,
    pub cache: CacheSettings,
    pub site: SiteSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub directories: Vec<PathBuf>,
    pub default_content_type: String,
    pub bundles: Vec<BundleSpec>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: BackendKind,
    pub fragment_key_format: KeyFormat,
    /// `None` when configured as 0: entries stay until evicted.
    pub default_timeout: Option<Duration>,
    pub memory_entry_limit: NonZeroUsize,
    pub bytecode_cache: bool,
    pub bytecode_prefix: String,
}

#[derive(Debug, Clone, Default)]
pub struct SiteSettings {
    /// Free-form values exposed through the `setting()` template global.
    pub settings: BTreeMap<String, serde_json::Value>,
    pub routes: Vec<RouteSettings>,
}

/// A path served by rendering one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSettings {
    pub name: Option<String>,
    pub path: String,
    pub template: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_template_overrides(&args.templates),
        Some(Command::CacheKey(args)) => {
            if let Some(format) = args.key_format.as_ref() {
                raw.cache.fragment_key_format = Some(format.clone());
            }
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Settings from a TOML document alone, without files, environment or CLI.
pub fn load_from_toml(source: &str) -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(source, FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    templates: RawTemplateSettings,
    cache: RawCacheSettings,
    site: RawSiteSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_template_overrides(&overrides.templates);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_template_overrides(&mut self, overrides: &TemplateOverrides) {
        if !overrides.template_dirs.is_empty() {
            self.templates.directories = Some(overrides.template_dirs.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(format) = overrides.fragment_key_format.as_ref() {
            self.cache.fragment_key_format = Some(format.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            templates,
            cache,
            site,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let templates = build_template_settings(templates)?;
        let cache = build_cache_settings(cache)?;
        let site = build_site_settings(site)?;

        Ok(Self {
            server,
            logging,
            templates,
            cache,
            site,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_template_settings(templates: RawTemplateSettings) -> Result<TemplateSettings, LoadError> {
    let directories = templates
        .directories
        .unwrap_or_else(|| vec![PathBuf::from(DEFAULT_TEMPLATE_DIR)]);
    if directories.iter().any(|dir| dir.as_os_str().is_empty()) {
        return Err(LoadError::invalid(
            "templates.directories",
            "directory paths must not be empty",
        ));
    }

    let default_content_type = templates
        .default_content_type
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    Mime::from_str(&default_content_type).map_err(|err| {
        LoadError::invalid(
            "templates.default_content_type",
            format!("`{default_content_type}` is not a media type: {err}"),
        )
    })?;

    let bundles = templates
        .bundles
        .unwrap_or_default()
        .iter()
        .map(|spec| {
            spec.parse::<BundleSpec>()
                .map_err(|err| LoadError::invalid("templates.bundles", err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TemplateSettings {
        directories,
        default_content_type,
        bundles,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None => BackendKind::Memory,
        Some(value) if value.eq_ignore_ascii_case("memory") => BackendKind::Memory,
        Some(value) if value.eq_ignore_ascii_case("none") => BackendKind::None,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`, expected `memory` or `none`"),
            ));
        }
    };

    let fragment_key_format = cache
        .fragment_key_format
        .as_deref()
        .unwrap_or(DEFAULT_KEY_FORMAT)
        .parse::<KeyFormat>()
        .map_err(|err| LoadError::invalid("cache.fragment_key_format", err.to_string()))?;

    let default_timeout = match cache
        .default_timeout_seconds
        .unwrap_or(DEFAULT_CACHE_TIMEOUT_SECS)
    {
        0 => None,
        seconds => Some(Duration::from_secs(seconds)),
    };

    let memory_entry_limit =
        NonZeroUsize::new(cache.memory_entry_limit.unwrap_or(DEFAULT_MEMORY_ENTRY_LIMIT))
            .unwrap_or(NonZeroUsize::MIN);

    let bytecode_prefix = cache
        .bytecode_prefix
        .unwrap_or_else(|| DEFAULT_BYTECODE_PREFIX.to_string());
    if bytecode_prefix.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(LoadError::invalid(
            "cache.bytecode_prefix",
            "must not contain whitespace or control characters",
        ));
    }

    Ok(CacheSettings {
        backend,
        fragment_key_format,
        default_timeout,
        memory_entry_limit,
        bytecode_cache: cache.bytecode_cache.unwrap_or(true),
        bytecode_prefix,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let mut names = HashSet::new();
    let mut paths = HashSet::new();
    let mut routes = Vec::new();

    for route in site.routes.unwrap_or_default() {
        let path = route.path.unwrap_or_default();
        if !path.starts_with('/') {
            return Err(LoadError::invalid(
                "site.routes.path",
                format!("route path `{path}` must start with `/`"),
            ));
        }
        if !paths.insert(path.clone()) {
            return Err(LoadError::invalid(
                "site.routes.path",
                format!("route path `{path}` is declared more than once"),
            ));
        }
        let template = route.template.unwrap_or_default();
        if template.trim().is_empty() {
            return Err(LoadError::invalid(
                "site.routes.template",
                format!("route `{path}` needs a template"),
            ));
        }
        if let Some(name) = route.name.as_ref()
            && !names.insert(name.clone())
        {
            return Err(LoadError::invalid(
                "site.routes.name",
                format!("route name `{name}` is used more than once"),
            ));
        }
        routes.push(RouteSettings {
            name: route.name,
            path,
            template,
            content_type: route.content_type,
        });
    }

    Ok(SiteSettings {
        settings: site.settings.unwrap_or_default(),
        routes,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    directories: Option<Vec<PathBuf>>,
    default_content_type: Option<String>,
    bundles: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    fragment_key_format: Option<String>,
    default_timeout_seconds: Option<u64>,
    memory_entry_limit: Option<usize>,
    bytecode_cache: Option<bool>,
    bytecode_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    settings: Option<BTreeMap<String, serde_json::Value>>,
    routes: Option<Vec<RawRouteSettings>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRouteSettings {
    name: Option<String>,
    path: Option<String>,
    template: Option<String>,
    content_type: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests;
