//! Configuration loading and persistence.
//!
//! Sources are merged in order: explicit path, `./config.yaml`,
//! `$HOME/.goviking/config.yaml`, `/etc/goviking/config.yaml`, built-in
//! defaults. Environment variables named `GOVIKING_<SECTION>_<KEY>` override
//! file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VikingResult;

pub const ENV_PREFIX: &str = "GOVIKING_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory root backing the viking:// namespace.
    pub root_path: String,
    /// Path for the JSON-file store; empty keeps the store in memory only.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: "./data/viking".into(),
            db_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            api_key: String::new(),
            base_url: "https://api.openai.com".into(),
            model: "gpt-4".into(),
            embedding_model: "text-embedding-3-small".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub score_threshold: f64,
    pub max_results: usize,
    pub max_convergence_rounds: u32,
    pub score_propagation_alpha: f64,
    pub global_search_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.0,
            max_results: 10,
            max_convergence_rounds: 3,
            score_propagation_alpha: 0.5,
            global_search_top_k: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub max_tokens: usize,
    pub compression_ratio: f64,
    pub min_l0_retention: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            max_tokens: 128_000,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub compression_threshold: usize,
    pub keep_recent: usize,
    pub max_tokens: usize,
    pub min_importance: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            compression_threshold: 50,
            keep_recent: 5,
            max_tokens: 4000,
            min_importance: 0.3,
        }
    }
}

/// Root configuration object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VikingConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalSettings,
    pub window: WindowSettings,
    pub session: SessionSettings,
}

impl VikingConfig {
    /// Load configuration, merging the first file found in the search order
    /// with environment overrides.
    pub fn load(explicit: Option<&Path>) -> VikingResult<Self> {
        let mut cfg = match Self::find_config_file(explicit) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)?;
                serde_yaml::from_str(&text)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides(std::env::vars());
        Ok(cfg)
    }

    pub fn load_default() -> VikingResult<Self> {
        Self::load(None)
    }

    /// Save as YAML.
    pub fn save(&self, path: &Path) -> VikingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> VikingResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Default location for a user-level config file.
    pub fn default_path() -> PathBuf {
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(".goviking").join("config.yaml")
    }

    fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let mut candidates = vec![PathBuf::from("./config.yaml")];
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".goviking").join("config.yaml"));
        }
        candidates.push(PathBuf::from("/etc/goviking/config.yaml"));
        candidates.into_iter().find(|p| p.is_file())
    }

    /// Apply `GOVIKING_<SECTION>_<KEY>` overrides from an environment
    /// iterator. Unknown sections or keys are ignored.
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value = match serde_yaml::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };

        for (name, raw) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            let section = section.to_lowercase();
            let key = key.to_lowercase();

            if let Some(map) = value
                .get_mut(section.as_str())
                .and_then(|s| s.as_mapping_mut())
            {
                let field = serde_yaml::Value::String(key);
                if map.contains_key(&field) {
                    map.insert(field, parse_env_value(&raw));
                }
            }
        }

        if let Ok(cfg) = serde_yaml::from_value(value) {
            *self = cfg;
        }
    }
}

/// Coerce an environment string into the YAML scalar it most looks like.
fn parse_env_value(raw: &str) -> serde_yaml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return serde_yaml::Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return serde_yaml::Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return serde_yaml::Value::Number(serde_yaml::Number::from(f));
    }
    serde_yaml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = VikingConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.window.max_tokens, 128_000);
        assert_eq!(cfg.session.compression_threshold, 50);
        assert_eq!(cfg.retrieval.max_convergence_rounds, 3);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut cfg = VikingConfig::default();
        cfg.llm.model = "gpt-4o".into();
        cfg.window.max_tokens = 64_000;
        cfg.session.keep_recent = 7;
        cfg.save(&path).unwrap();

        let loaded = VikingConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "llm:\n  model: claude-sonnet\n").unwrap();

        let cfg = VikingConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.llm.model, "claude-sonnet");
        assert_eq!(cfg.server.port, 8080); // untouched default
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = VikingConfig::default();
        cfg.apply_env_overrides(vec![
            ("GOVIKING_SERVER_PORT".to_string(), "9999".to_string()),
            ("GOVIKING_LLM_MODEL".to_string(), "gpt-4o-mini".to_string()),
            ("UNRELATED_VAR".to_string(), "x".to_string()),
        ]);
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn env_override_unknown_key_ignored() {
        let mut cfg = VikingConfig::default();
        let before = cfg.clone();
        cfg.apply_env_overrides(vec![(
            "GOVIKING_SERVER_NOSUCH".to_string(),
            "1".to_string(),
        )]);
        assert_eq!(cfg, before);
    }

    #[test]
    fn env_value_coercion() {
        assert_eq!(parse_env_value("true"), serde_yaml::Value::Bool(true));
        assert_eq!(
            parse_env_value("42"),
            serde_yaml::Value::Number(42i64.into())
        );
        assert!(matches!(parse_env_value("0.5"), serde_yaml::Value::Number(_)));
        assert_eq!(
            parse_env_value("hello"),
            serde_yaml::Value::String("hello".into())
        );
    }

    #[test]
    fn yaml_output_contains_sections() {
        let yaml = VikingConfig::default().to_yaml().unwrap();
        for section in ["server", "storage", "llm", "retrieval", "window", "session"] {
            assert!(yaml.contains(section), "missing section {section}");
        }
    }
}
