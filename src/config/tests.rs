use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:8000");
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.templates.directories, vec![PathBuf::from("templates")]);
    assert_eq!(settings.templates.default_content_type, "text/html");
    assert!(settings.templates.bundles.is_empty());
    assert_eq!(settings.cache.backend, BackendKind::Memory);
    assert_eq!(settings.cache.fragment_key_format.to_string(), DEFAULT_KEY_FORMAT);
    assert_eq!(settings.cache.default_timeout, Some(Duration::from_secs(300)));
    assert_eq!(settings.cache.memory_entry_limit.get(), 1024);
    assert!(settings.cache.bytecode_cache);
    assert_eq!(settings.cache.bytecode_prefix, "jinja2/bytecode/");
    assert!(settings.site.routes.is_empty());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.backend = Some("memory".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        templates: TemplateOverrides {
            template_dirs: vec![PathBuf::from("site/templates")],
            cache_backend: Some("none".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.backend, BackendKind::None);
    assert_eq!(
        settings.templates.directories,
        vec![PathBuf::from("site/templates")]
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn toml_document_populates_every_section() {
    let settings = load_from_toml(
        r#"
        [server]
        port = 9000

        [templates]
        directories = ["a", "b"]
        bundles = ["jinja_bridge.humanize", "project.blog.widgets"]

        [cache]
        backend = "none"
        fragment_key_format = "site:%(hash)s:v2"
        default_timeout_seconds = 0
        memory_entry_limit = 0

        [site.settings]
        site_name = "Example"
        featured = [1, 2]

        [[site.routes]]
        name = "home"
        path = "/"
        template = "index.html"

        [[site.routes]]
        path = "/feed.xml"
        template = "feed.xml"
        content_type = "application/rss+xml"
        "#,
    )
    .expect("valid settings");

    assert_eq!(settings.server.addr.port(), 9000);
    assert_eq!(settings.templates.directories.len(), 2);
    assert_eq!(settings.templates.bundles[1].app_label, "project.blog");
    assert_eq!(settings.templates.bundles[1].bundle_name, "widgets");
    assert_eq!(settings.cache.backend, BackendKind::None);
    assert_eq!(settings.cache.fragment_key_format.render("h"), "site:h:v2");
    assert_eq!(settings.cache.default_timeout, None);
    assert_eq!(settings.cache.memory_entry_limit.get(), 1);
    assert_eq!(settings.site.settings["site_name"], serde_json::json!("Example"));
    assert_eq!(settings.site.routes.len(), 2);
    assert_eq!(settings.site.routes[0].name.as_deref(), Some("home"));
    assert_eq!(
        settings.site.routes[1].content_type.as_deref(),
        Some("application/rss+xml")
    );
}

#[test]
fn invalid_values_name_their_key() {
    let cases = [
        ("[server]\nport = 0", "server.port"),
        ("[server]\ngraceful_shutdown_seconds = 0", "server.graceful_shutdown_seconds"),
        ("[logging]\nlevel = \"loud\"", "logging.level"),
        ("[templates]\ndefault_content_type = \"html\"", "templates.default_content_type"),
        ("[templates]\nbundles = [\"humanize\"]", "templates.bundles"),
        ("[cache]\nbackend = \"redis\"", "cache.backend"),
        ("[cache]\nfragment_key_format = \"no slot\"", "cache.fragment_key_format"),
        (
            "[[site.routes]]\npath = \"about\"\ntemplate = \"about.html\"",
            "site.routes.path",
        ),
        ("[[site.routes]]\npath = \"/about\"", "site.routes.template"),
        (
            "[[site.routes]]\npath = \"/a\"\ntemplate = \"a.html\"\n\
             [[site.routes]]\npath = \"/a\"\ntemplate = \"b.html\"",
            "site.routes.path",
        ),
        (
            "[[site.routes]]\nname = \"a\"\npath = \"/a\"\ntemplate = \"a.html\"\n\
             [[site.routes]]\nname = \"a\"\npath = \"/b\"\ntemplate = \"b.html\"",
            "site.routes.name",
        ),
    ];

    for (source, expected_key) in cases {
        match load_from_toml(source) {
            Err(LoadError::Invalid { key, .. }) => assert_eq!(key, expected_key, "{source}"),
            other => panic!("expected invalid `{expected_key}`, got {other:?}"),
        }
    }
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["jinja-bridge"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "jinja-bridge",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--server-port",
        "8080",
        "--template-dir",
        "one",
        "--template-dir",
        "two",
        "--log-json",
        "true",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.server_port, Some(8080));
            assert_eq!(serve.overrides.templates.template_dirs.len(), 2);
            assert_eq!(serve.overrides.log_json, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "jinja-bridge",
        "render",
        "index.html",
        "--context",
        r#"{"title": "Hi"}"#,
        "--cache-backend",
        "none",
    ]);

    match args.command.expect("render command") {
        Command::Render(render) => {
            assert_eq!(render.template, "index.html");
            assert_eq!(render.context.as_deref(), Some(r#"{"title": "Hi"}"#));
            assert_eq!(render.templates.cache_backend.as_deref(), Some("none"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_cache_key_arguments() {
    let args = CliArgs::parse_from([
        "jinja-bridge",
        "cache-key",
        r#"["article", 42]"#,
        "--key-format",
        "k_%(hash)s",
    ]);

    match args.command.expect("cache-key command") {
        Command::CacheKey(key) => {
            assert_eq!(key.parameters, r#"["article", 42]"#);
            assert_eq!(key.key_format.as_deref(), Some("k_%(hash)s"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn huge_default_timeout_keeps_entries() {
    use crate::cache::{CacheBackend, CacheConfig};

    let settings = load_from_toml("[cache]\ndefault_timeout_seconds = 9223372036854775807")
        .expect("valid settings");
    assert_eq!(
        settings.cache.default_timeout,
        Some(Duration::from_secs(i64::MAX as u64))
    );

    let backend = CacheConfig::from(&settings.cache)
        .build_backend()
        .expect("memory backend");
    backend.set("k", b"v", None).expect("set");
    assert_eq!(backend.get("k").expect("get"), Some(b"v".to_vec()));
}
