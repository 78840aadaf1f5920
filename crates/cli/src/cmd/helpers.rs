use anyhow::{Context, Result};
use std::path::PathBuf;

use vigil_engine::config::{load_from_file, EngineConfig};

pub fn default_config_path() -> PathBuf {
    if let Some(dir) = dirs::config_dir() {
        return dir.join("vigil").join("engine.yml");
    }
    PathBuf::from("/etc/vigil/engine.yml")
}

pub fn load_config(config_path: Option<&str>) -> Result<EngineConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    load_from_file(&path).with_context(|| format!("loading config from {}", path.display()))
}

/// Explicit --server wins; otherwise the status API address comes from the
/// engine config's api_port.
pub fn resolve_base_url(server_flag: Option<&str>, config_path: Option<&str>) -> Result<String> {
    if let Some(s) = server_flag {
        return Ok(s.trim_end_matches('/').to_string());
    }
    let cfg = load_config(config_path)?;
    Ok(format!("http://127.0.0.1:{}", cfg.api_port))
}

pub async fn get_json(base: &str, path: &str) -> Result<serde_json::Value> {
    let url = format!("{base}{path}");
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("requesting {url}"))?;
    anyhow::ensure!(
        resp.status().is_success(),
        "{url} returned {}",
        resp.status()
    );
    resp.json().await.with_context(|| format!("decoding {url}"))
}
