//! Configuration file loading: YAML/JSON → [`Value`] tree. The "deliberately
//! excluded external collaborator" from the core engine's perspective, but
//! implemented here as a real module so the CLI and `@import` have
//! something concrete to call, grounded on `mext/libs/config_loader.py`.

use std::path::Path;

use crate::error::MextError;
use crate::value::Value;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[".json", ".yaml", ".yml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Json,
    Yaml,
}

pub fn file_type_for_extension(path: &Path) -> Option<FileType> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Some(FileType::Json),
        Some("yaml") | Some("yml") => Some(FileType::Yaml),
        _ => None,
    }
}

pub fn is_supported_extension(path: &Path) -> bool {
    file_type_for_extension(path).is_some()
}

/// Loads and parses a config file, auto-detecting JSON vs. YAML by
/// extension.
pub fn load_config(path: &Path) -> Result<Value, MextError> {
    let file_type = file_type_for_extension(path).ok_or_else(|| MextError::UnsupportedConfigExtension {
        path: path.display().to_string(),
        extension: path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string(),
    })?;

    let contents = std::fs::read_to_string(path).map_err(|source| MextError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match file_type {
        FileType::Json => {
            let parsed: serde_json::Value = serde_json::from_str(&contents).map_err(|e| MextError::ConfigParse {
                path: path.display().to_string(),
                source: Box::new(e),
            })?;
            Ok(Value::from(parsed))
        }
        FileType::Yaml => {
            let parsed: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(|e| MextError::ConfigParse {
                path: path.display().to_string(),
                source: Box::new(e),
            })?;
            Ok(Value::from(parsed))
        }
    }
}
