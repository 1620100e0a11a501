use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the jinja-bridge binary.
#[derive(Debug, Parser)]
#[command(
    name = "jinja-bridge",
    version,
    about = "Serve MiniJinja templates with fragment caching"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "JINJA_BRIDGE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP server for the configured routes.
    Serve(Box<ServeArgs>),
    /// Render one template to standard output.
    Render(RenderArgs),
    /// Print the fragment cache key for a JSON parameter value.
    #[command(name = "cache-key")]
    CacheKey(CacheKeyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct TemplateOverrides {
    /// Replace the template search path (repeat for several directories).
    #[arg(long = "template-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub template_dirs: Vec<PathBuf>,

    /// Override the cache backend (memory|none).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the fragment cache key format.
    #[arg(long = "fragment-key-format", value_name = "FORMAT")]
    pub fragment_key_format: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub templates: TemplateOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub templates: TemplateOverrides,

    /// Template name, resolved against the template directories.
    #[arg(value_name = "TEMPLATE")]
    pub template: String,

    /// Render context as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub context: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CacheKeyArgs {
    /// Cache parameters as JSON (arrays become sequences).
    #[arg(value_name = "JSON")]
    pub parameters: String,

    /// Key format with a single `%(hash)s` slot.
    #[arg(long = "key-format", value_name = "FORMAT")]
    pub key_format: Option<String>,
}
