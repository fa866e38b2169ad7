use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Folder,
    Json,
    AudioCd,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    /// Music directory, script output file or disc description, depending
    /// on the kind.
    pub path: String,
    pub enabled: bool,
    /// Preferred rip format for audio discs.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding_format: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: SourceKind::default(),
            path: String::new(),
            enabled: true,
            encoding_format: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub version: u32,
    pub sources: Vec<SourceConfig>,
    pub default_limit: i64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sources: vec![SourceConfig {
                id: "music".to_string(),
                path: "music".to_string(),
                ..SourceConfig::default()
            }],
            default_limit: -1,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("COLLECTION_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from("collections.yaml"),
    }
}

/// Reads the config at `path`, writing the defaults there first when the
/// file does not exist. The flag reports whether it was created.
pub fn load_or_create_config(path: &Path) -> Result<(CollectionConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: CollectionConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        for (index, source) in config.sources.iter_mut().enumerate() {
            if source.id.trim().is_empty() {
                source.id = format!("source-{}", index + 1);
            }
        }
        return Ok((config, false));
    }

    let config = CollectionConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &CollectionConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
