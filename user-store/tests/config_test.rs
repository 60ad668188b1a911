//! Config loading and file-backed stores

use std::io::Write;

use tempfile::{NamedTempFile, TempDir};
use user_store::config::StoreConfig;
use user_store::{Config, OpContext, UsageDirection, User, UserStore, USER_ROLE};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_from_file() {
    let file = write_config(
        r#"
[store]
database_url = "sqlite://accounts.db"
max_connections = 2

[quota]
space_limit = 4096

[logging]
format = "json"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.store.database_url, "sqlite://accounts.db");
    assert_eq!(config.store.max_connections, 2);
    assert_eq!(config.quota.to_quota().space_limit, 4096);
    assert_eq!(config.logging.format, "json");
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_missing_file() {
    assert!(Config::from_file("/nonexistent/user-store.toml").is_err());
}

#[test]
fn test_load_env_overrides_file() {
    let file = write_config(
        r#"
[store]
database_url = "sqlite://accounts.db"
operation_timeout_secs = 1
"#,
    );

    std::env::set_var("USER_STORE__STORE__OPERATION_TIMEOUT_SECS", "7");
    let config = Config::load(Some(file.path()));
    std::env::remove_var("USER_STORE__STORE__OPERATION_TIMEOUT_SECS");

    let config = config.unwrap();
    assert_eq!(config.store.database_url, "sqlite://accounts.db");
    assert_eq!(config.store.operation_timeout_secs, 7);
    assert_eq!(
        config.store.operation_timeout(),
        Some(std::time::Duration::from_secs(7))
    );
}

#[test]
fn test_to_toml_reloads() {
    let mut config = Config::default();
    config.quota.space_limit = 123;

    let file = write_config(&config.to_toml().unwrap());
    let reloaded = Config::from_file(file.path()).unwrap();
    assert_eq!(reloaded.quota.space_limit, 123);
    assert_eq!(reloaded.store.database_url, config.store.database_url);
}

#[test]
fn test_validate_rejects_bad_values() {
    let mut config = Config::default();
    config.store.database_url = "postgres://localhost/users".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.store.max_connections = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.quota.space_limit = -1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.logging.format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn test_file_store_survives_reconnect() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        database_url: format!("sqlite://{}", dir.path().join("users.db").display()),
        ..StoreConfig::default()
    };
    let ctx = OpContext::background();

    {
        let store = UserStore::connect(&config).await.unwrap();
        store
            .add_user(&ctx, &User::new(2, "alice", "hash", USER_ROLE))
            .await
            .unwrap();
        store
            .adjust_used(&ctx, 2, UsageDirection::Increase, 512)
            .await
            .unwrap();
        store.pool().close().await;
    }

    let store = UserStore::connect(&config).await.unwrap();
    let user = store.get_user_by_name(&ctx, "alice").await.unwrap();
    assert_eq!(user.id, 2);
    assert_eq!(user.used_space, 512);
}
