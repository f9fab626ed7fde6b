use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 12] = [
    "QUARRY_CONFIG",
    "QUARRY_PROJECT",
    "QUARRY_STORAGE_BACKEND",
    "QUARRY_STORAGE_PATH",
    "QUARRY_EMBEDDING_PROVIDER",
    "QUARRY_EMBEDDING_MODEL",
    "QUARRY_EMBEDDING_TIMEOUT",
    "QUARRY_CHUNKING_WINDOW_LINES",
    "QUARRY_RETRIEVAL_TOP_K",
    "QUARRY_RETRIEVAL_CONTEXT_BUDGET",
    "QUARRY_RETRIEVAL_DEDUP",
    "QUARRY_RETRIEVAL_FALLBACK_WEIGHT",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert!(config.project.is_none());
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    assert_eq!(config.storage.path, PathBuf::from(".quarry/index.db"));
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.embedding.base_url, "http://localhost:11434");
    assert_eq!(config.embedding.model, "nomic-embed-text");
    assert_eq!(config.embedding.batch_size, 32);
    assert_eq!(config.chunking.max_lines, 120);
    assert_eq!(config.chunking.window_lines, 60);
    assert_eq!(config.loader.max_file_size, 52_428_800);
    assert!(config.loader.respect_gitignore);
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.retrieval.over_fetch_factor, 3);
    assert_eq!(config.retrieval.context_budget, 3000);
    assert!(config.retrieval.score_threshold.is_none());
    assert_eq!(config.retrieval.dedup, quarry_index::DedupPolicy::Overlap);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn missing_file_loads_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.retrieval.top_k, 5);
}

#[test]
#[serial]
fn parse_valid_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
project = "demo"

[storage]
backend = "memory"

[embedding]
provider = "hash"
dimension = 128

[chunking]
window_lines = 40

[loader]
extensions = [".py", "RS"]

[retrieval]
top_k = 8
score_threshold = 0.2
dedup = "exact"
"#
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.project.as_deref(), Some("demo"));
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.embedding.provider, EmbeddingProvider::Hash);
    assert_eq!(config.embedding.dimension, 128);
    assert_eq!(config.embedding.model, "nomic-embed-text");
    assert_eq!(config.chunking.window_lines, 40);
    assert_eq!(config.chunking.max_lines, 120);
    assert_eq!(config.loader_config().extensions, vec!["py", "rs"]);
    assert_eq!(config.retrieval.top_k, 8);
    assert_eq!(config.retrieval_config().score_threshold, Some(0.2));
    assert_eq!(config.retrieval_config().dedup, quarry_index::DedupPolicy::Exact);
}

#[test]
#[serial]
fn malformed_toml_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[retrieval\ntop_k = 1").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("QUARRY_PROJECT", "from-env");
        std::env::set_var("QUARRY_EMBEDDING_PROVIDER", "HASH");
        std::env::set_var("QUARRY_EMBEDDING_TIMEOUT", "5");
        std::env::set_var("QUARRY_RETRIEVAL_TOP_K", "12");
        std::env::set_var("QUARRY_RETRIEVAL_DEDUP", "exact");
        std::env::set_var("QUARRY_STORAGE_PATH", "/tmp/q.db");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.project.as_deref(), Some("from-env"));
    assert_eq!(config.embedding.provider, EmbeddingProvider::Hash);
    assert_eq!(config.store_config().embed_timeout, Duration::from_secs(5));
    assert_eq!(config.retrieval.top_k, 12);
    assert_eq!(config.retrieval.dedup, quarry_index::DedupPolicy::Exact);
    assert_eq!(config.storage.path, PathBuf::from("/tmp/q.db"));
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("QUARRY_RETRIEVAL_TOP_K", "many");
        std::env::set_var("QUARRY_STORAGE_BACKEND", "postgres");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
}

#[test]
#[serial]
fn config_path_resolution() {
    clear_env();
    assert_eq!(Config::resolve_path(None), PathBuf::from(DEFAULT_CONFIG_PATH));

    unsafe { std::env::set_var("QUARRY_CONFIG", "/etc/quarry.toml") };
    assert_eq!(Config::resolve_path(None), PathBuf::from("/etc/quarry.toml"));
    assert_eq!(
        Config::resolve_path(Some(Path::new("cli.toml"))),
        PathBuf::from("cli.toml")
    );
    clear_env();
}

#[test]
fn validate_rejects_unusable_settings() {
    let mut config = Config::default();
    config.chunking.window_lines = 200;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.embedding.batch_size = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retrieval.over_fetch_factor = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retrieval.context_budget = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retrieval.fallback_weight = 0.0;
    assert!(config.validate().is_err());
    config.retrieval.fallback_weight = 1.5;
    assert!(config.validate().is_err());
    config.retrieval.fallback_weight = 0.5;
    assert!(config.validate().is_ok());

    let mut config = Config::default();
    config.embedding.timeout_secs = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retrieval.search_timeout_secs = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.project = Some("has space".into());
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn project_name_from_directory() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("my app");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("main.py"), "").unwrap();

    let config = Config::default();
    assert_eq!(config.project_name(&root), "my-app");
    assert_eq!(config.project_name(&root.join("main.py")), "my-app");

    let named = Config {
        project: Some("fixed".into()),
        ..Config::default()
    };
    assert_eq!(named.project_name(&root), "fixed");
}
