//! The `responses.json` pattern store.

use std::path::Path;

use tracing::info;

use crate::error::RuleSourceError;
use crate::rules::ResponsesConfig;

/// Read the responses file, creating it with empty sections if absent.
pub async fn load_or_create(path: &Path) -> Result<ResponsesConfig, RuleSourceError> {
    let file_err = |e: std::io::Error| RuleSourceError::File {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if !tokio::fs::try_exists(path).await.map_err(file_err)? {
        let defaults = ResponsesConfig::default();
        save(path, &defaults).await?;
        info!(path = %path.display(), "Created empty responses file");
        return Ok(defaults);
    }

    let raw = tokio::fs::read_to_string(path).await.map_err(file_err)?;
    let config: ResponsesConfig =
        serde_json::from_str(&raw).map_err(|e| RuleSourceError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    info!(
        path = %path.display(),
        global = config.global_responses.len(),
        posts = config.post_responses.len(),
        "Responses file loaded"
    );
    Ok(config)
}

/// Write the responses file as pretty-printed UTF-8 JSON.
pub async fn save(path: &Path, config: &ResponsesConfig) -> Result<(), RuleSourceError> {
    let file_err = |e: std::io::Error| RuleSourceError::File {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(file_err)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| RuleSourceError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(path, json).await.map_err(file_err)
}
