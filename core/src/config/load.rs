use std::path::{Path, PathBuf};

use super::types::{AppConfig, HttpStoreConfig, StoreProvider};

const LOCAL_CONFIG_FILE: &str = "labkeeper.toml";

/// Get the default labkeeper data directory: ~/.labkeeper
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".labkeeper"))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
    Ok(cfg)
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.labkeeper/config.toml (highest)
    let data_dir = get_data_dir()?;
    let home_config = data_dir.join("config.toml");

    // Priority 2: ./labkeeper.toml (current directory)
    let local_config = Path::new(LOCAL_CONFIG_FILE);

    let mut cfg = if home_config.exists() {
        load_from_path(&home_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    if cfg.logging.file
        && cfg
            .logging
            .directory
            .as_ref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true)
    {
        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)?;
        cfg.logging.directory = Some(logs_dir.to_string_lossy().to_string());
    }

    // Environment variable overrides (Priority 0: highest)
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    expand_paths(&mut cfg);

    Ok(cfg)
}

/// Apply `LABKEEPER_*` overrides. `lookup` is `std::env::var` outside tests.
pub fn apply_env_overrides(cfg: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("LABKEEPER_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = get("LABKEEPER_STORE_URL") {
        if let StoreProvider::Http(ref mut http) = cfg.store.provider {
            http.base_url = v;
        } else {
            cfg.store.provider = StoreProvider::Http(HttpStoreConfig {
                base_url: v,
                ..HttpStoreConfig::default()
            });
        }
    }
    if let Some(v) = get("LABKEEPER_STORE_API_KEY") {
        if let StoreProvider::Http(ref mut http) = cfg.store.provider {
            http.api_key = v;
        }
    }
    if let Some(n) = get("LABKEEPER_STORE_RETRIES").and_then(|v| v.parse().ok()) {
        cfg.store.retries = n;
    }
    if let Some(n) = get("LABKEEPER_MAX_WORKERS").and_then(|v| v.parse().ok()) {
        cfg.task_manager.max_workers = n;
    }
    if let Some(v) = get("LABKEEPER_SSH_USERNAME") {
        cfg.remote.default_username = v;
    }
    if let Some(v) = get("LABKEEPER_SSH_PASSWORD") {
        cfg.remote.default_password = v;
    }
    if let Some(v) = get("LABKEEPER_HTTP_HOST") {
        cfg.http_server.host = v;
    }
    if let Some(n) = get("LABKEEPER_HTTP_PORT").and_then(|v| v.parse().ok()) {
        cfg.http_server.port = n;
    }
}

fn expand_paths(cfg: &mut AppConfig) {
    if let StoreProvider::Local(ref mut local) = cfg.store.provider {
        if let Some(path) = local.snapshot_path.as_mut() {
            *path = shellexpand::tilde(path.as_str()).to_string();
        }
    }
    if let Some(dir) = cfg.logging.directory.as_mut() {
        *dir = shellexpand::tilde(dir.as_str()).to_string();
    }
}
