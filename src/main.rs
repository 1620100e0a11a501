use std::{io::Write, process, sync::Arc, time::Duration};

use jinja_bridge::{
    cache::{CacheParameters, KeyFormat, derive_cache_key},
    config,
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
    template::TemplateEnvironment,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args),
        config::Command::CacheKey(args) => run_cache_key(settings, args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let templates = Arc::new(TemplateEnvironment::bootstrap(&settings)?);
    info!(
        target = "jinja_bridge::serve",
        directories = ?settings.templates.directories,
        bundles = templates.loaded_bundles().len(),
        routes = settings.site.routes.len(),
        "template environment ready",
    );

    let router = http::build_router(AppState::new(templates), &settings.site.routes);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "jinja_bridge::serve",
        addr = %settings.server.addr,
        "listening",
    );

    let grace = settings.server.graceful_shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(grace))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

/// Resolves on ctrl-c. A second timer forces exit if draining exceeds `grace`.
async fn shutdown_signal(grace: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "jinja_bridge::serve", error = %err, "ctrl-c handler failed");
        return;
    }
    info!(
        target = "jinja_bridge::serve",
        grace_seconds = grace.as_secs(),
        "shutdown requested; draining connections",
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(target = "jinja_bridge::serve", "graceful shutdown timed out");
        process::exit(1);
    });
}

fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let context = match args.context.as_deref() {
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|err| AppError::validation(format!("invalid --context JSON: {err}")))?;
            if !value.is_object() {
                return Err(AppError::validation("--context must be a JSON object"));
            }
            value
        }
        None => serde_json::Value::Object(serde_json::Map::new()),
    };

    let templates = TemplateEnvironment::bootstrap(&settings)?;
    let rendered = templates.render(&args.template, context)?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|err| AppError::from(InfraError::from(err)))
}

fn run_cache_key(settings: config::Settings, args: config::CacheKeyArgs) -> Result<(), AppError> {
    let value: serde_json::Value = serde_json::from_str(&args.parameters)
        .map_err(|err| AppError::validation(format!("invalid parameters JSON: {err}")))?;
    let parameters = CacheParameters::try_from(&value)
        .map_err(|err| AppError::validation(err.to_string()))?;

    let format: KeyFormat = settings.cache.fragment_key_format;
    println!("{}", derive_cache_key(&parameters, &format));
    Ok(())
}
