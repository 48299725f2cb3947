use std::io::Write;

use clap::Parser;
use tempfile::NamedTempFile;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.store.request_timeout_ms = Some(1_000);

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        store_request_timeout_ms: Some(250),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.store.request_timeout, Duration::from_millis(250));
}

#[test]
fn defaults_describe_a_memory_backed_cache() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.store.backend, StoreBackend::Memory);
    assert!(settings.store.seed_sample_posts);
    assert_eq!(settings.cache.post_limit, DEFAULT_CACHE_POST_LIMIT);
    assert!(settings.cache.enabled);
    assert_eq!(settings.realtime.max_attempts.get(), DEFAULT_REALTIME_MAX_ATTEMPTS);
    assert_eq!(settings.posts.default_author, DEFAULT_AUTHOR);
    assert!(settings.admin.token_sha256.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn postgres_backend_requires_database_url() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some(StoreBackend::Postgres);

    let err = Settings::from_raw(raw.clone()).expect_err("url required");
    assert!(matches!(err, LoadError::Invalid { key: "database.url", .. }));

    raw.database.url = Some("  postgres://localhost/postwire ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.database.url.as_deref(),
        Some("postgres://localhost/postwire")
    );
}

#[test]
fn rejects_zero_limits() {
    let mut raw = RawSettings::default();
    raw.cache.post_limit = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "cache.post_limit", .. })
    ));

    let mut raw = RawSettings::default();
    raw.realtime.max_attempts = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "realtime.max_attempts", .. })
    ));

    let mut raw = RawSettings::default();
    raw.database.max_connections = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "database.max_connections", .. })
    ));
}

#[test]
fn subscribe_timeout_defaults_and_rejects_zero() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(settings.realtime.subscribe_timeout, Duration::from_secs(10));

    let mut raw = RawSettings::default();
    raw.realtime.subscribe_timeout_ms = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "realtime.subscribe_timeout_ms", .. })
    ));
}

#[test]
fn rejects_out_of_range_jitter_and_inverted_backoff() {
    let mut raw = RawSettings::default();
    raw.realtime.backoff_jitter = Some(1.5);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "realtime.backoff_jitter", .. })
    ));

    let mut raw = RawSettings::default();
    raw.cache.refetch_backoff_base_ms = Some(1_000);
    raw.cache.refetch_backoff_cap_ms = Some(10);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "cache.refetch_backoff_cap_ms", .. })
    ));
}

#[test]
fn admin_digest_must_be_hex_sha256() {
    let mut raw = RawSettings::default();
    raw.admin.token_sha256 = Some("not-a-digest".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.admin.token_sha256 = Some("AB".repeat(32));
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.admin.token_sha256, Some("ab".repeat(32)));
}

#[test]
fn blank_default_author_falls_back() {
    let mut raw = RawSettings::default();
    raw.posts.default_author = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.posts.default_author, DEFAULT_AUTHOR);
}

#[test]
#[serial_test::serial]
fn config_file_layer_is_applied() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("temp file");
    writeln!(
        file,
        "[cache]\npost_limit = 42\n\n[posts]\ndefault_author = \"Editorial\"\n"
    )
    .expect("write config");

    let path = file.path().to_string_lossy().to_string();
    let cli = CliArgs::try_parse_from(["postwire", "--config-file", path.as_str(), "list"])
        .expect("parse args");
    let settings = load(&cli).expect("load settings");

    assert_eq!(settings.cache.post_limit, 42);
    assert_eq!(settings.posts.default_author, "Editorial");
}

#[test]
fn parse_global_overrides_after_subcommand() {
    let cli = CliArgs::try_parse_from([
        "postwire",
        "list",
        "--published",
        "--store-backend",
        "memory",
        "--log-json",
        "true",
        "--cache-post-limit",
        "10",
    ])
    .expect("parse args");

    assert_eq!(cli.overrides.store_backend, Some(BackendArg::Memory));
    assert_eq!(cli.overrides.log_json, Some(true));
    assert_eq!(cli.overrides.cache_post_limit, Some(10));
    match cli.command {
        Command::List(args) => assert!(args.published),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_create_arguments() {
    let cli = CliArgs::try_parse_from([
        "postwire",
        "create",
        "--title",
        "Hello",
        "--excerpt",
        "Intro",
        "--content",
        "Body",
        "--category",
        "Tech",
        "--tags",
        "rust, async ,",
        "--status",
        "published",
        "--featured",
    ])
    .expect("parse args");

    let Command::Create(args) = cli.command else {
        panic!("expected create command");
    };
    let content = args.content.clone().expect("content");
    let draft = args.into_draft(content);

    assert_eq!(draft.title, "Hello");
    assert_eq!(draft.tags, vec!["rust".to_string(), "async".to_string()]);
    assert!(draft.featured);
    assert_eq!(draft.status, crate::domain::types::PostStatus::Published);
}

#[test]
fn create_requires_some_content() {
    let result = CliArgs::try_parse_from([
        "postwire",
        "create",
        "--title",
        "Hello",
        "--excerpt",
        "Intro",
        "--category",
        "Tech",
    ]);
    assert!(result.is_err());
}

#[test]
fn parse_update_arguments_into_patch() {
    let id = uuid::Uuid::new_v4();
    let id_text = id.to_string();
    let cli = CliArgs::try_parse_from([
        "postwire",
        "update",
        id_text.as_str(),
        "--featured",
        "false",
        "--image-url",
        "",
    ])
    .expect("parse args");

    let Command::Update(args) = cli.command else {
        panic!("expected update command");
    };
    assert_eq!(args.id, id);
    let patch = args.into_patch(None);

    assert_eq!(patch.featured, Some(false));
    assert_eq!(patch.image_url, Some(Some(String::new())));
    assert!(patch.title.is_none());
    assert!(patch.tags.is_none());
}

#[test]
fn parse_token_digest_command() {
    let cli =
        CliArgs::try_parse_from(["postwire", "token-digest", "secret"]).expect("parse args");

    match cli.command {
        Command::TokenDigest(args) => assert_eq!(args.token, "secret"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
#[serial_test::serial]
fn environment_layer_overrides_files() {
    // SAFETY: serialized with every other test touching the environment.
    unsafe {
        std::env::set_var("POSTWIRE__CACHE__POST_LIMIT", "7");
        std::env::set_var("POSTWIRE__STORE__BACKEND", "memory");
    }

    let cli = CliArgs::try_parse_from(["postwire", "list"]).expect("parse args");
    let loaded = load(&cli);

    unsafe {
        std::env::remove_var("POSTWIRE__CACHE__POST_LIMIT");
        std::env::remove_var("POSTWIRE__STORE__BACKEND");
    }

    let settings = loaded.expect("load settings");
    assert_eq!(settings.cache.post_limit, 7);
    assert_eq!(settings.store.backend, StoreBackend::Memory);
}
