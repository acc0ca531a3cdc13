//! Persisted configuration and layered value resolution
//!
//! The configuration is a JSON document read once and passed to the
//! components that need it. Every lookup falls back to a built-in default, so
//! a missing or malformed file never prevents startup.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "Qwen3-VL-config.json";
pub const DEFAULT_PROVIDER: &str = "dashscope";
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen3-vl-235b-a22b-instruct";
pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

/// A named remote endpoint: display name, base URL and credential.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
}

impl ProviderProfile {
    /// Read a `api.providers.<id>` entry field by field.
    ///
    /// A missing, `null` or non-string field is left empty so one bad value
    /// never discards the rest of the entry. Returns `None` only when the
    /// entry is not an object.
    fn from_entry(entry: &Value) -> Option<Self> {
        let entry = entry.as_object()?;
        let field = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Some(Self {
            name: field("name"),
            base_url: field("base_url"),
            api_key: field("api_key"),
        })
    }

    fn builtin_dashscope() -> Self {
        Self {
            name: "DashScope".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
        }
    }
}

/// One entry of `models.available`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelInfo {
    /// Display name when set, otherwise the API model name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub enable_debug: bool,
    pub log_api_calls: bool,
    pub log_payloads: bool,
}

impl LoggingSettings {
    /// `EnvFilter` directive for this crate derived from the configured level.
    pub fn filter_directive(&self) -> String {
        let level = if self.enable_debug {
            "debug".to_string()
        } else {
            self.level.to_ascii_lowercase()
        };
        let level = match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => level,
            "warning" => "warn".to_string(),
            "critical" => "error".to_string(),
            _ => "info".to_string(),
        };
        format!("qwen3vl_nodes={}", level)
    }
}

/// Where the active configuration tree came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults { reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    path: Option<PathBuf>,
    tree: Value,
    source: ConfigSource,
}

impl Config {
    /// Read the configuration file at `path`.
    ///
    /// Never fails: a missing, unreadable or malformed file yields the
    /// built-in default tree. The outcome is recorded in [`Config::source`]
    /// because this usually runs before logging is initialised; call
    /// [`Config::log_source`] once a subscriber is installed.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tree, source) = read_tree(&path);
        Self {
            path: Some(path),
            tree,
            source,
        }
    }

    pub fn from_value(tree: Value) -> Self {
        Self {
            path: None,
            tree,
            source: ConfigSource::Defaults {
                reason: "constructed in memory".to_string(),
            },
        }
    }

    pub fn defaults() -> Self {
        Self::from_value(default_tree())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    pub fn log_source(&self) {
        match &self.source {
            ConfigSource::File(path) => info!("Config loaded from: {}", path.display()),
            ConfigSource::Defaults { reason } => {
                warn!("{}; using default configuration", reason)
            }
        }
    }

    /// Re-read the file this configuration was loaded from.
    ///
    /// In-memory configurations have no backing file and are left untouched.
    pub fn reload(&mut self) {
        if let Some(path) = &self.path {
            let (tree, source) = read_tree(path);
            self.tree = tree;
            self.source = source;
            self.log_source();
        }
    }

    /// Dot-path lookup, e.g. `get("api.providers.dashscope.base_url")`.
    ///
    /// Returns `None` when any segment is missing, an intermediate value is
    /// not an object, or the final value is `null`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.tree, |value, segment| value.as_object()?.get(segment))
            .filter(|value| !value.is_null())
    }

    /// Typed lookup with a fallback used for missing keys and type mismatches.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    pub fn provider(&self) -> String {
        self.get_or("api.provider", DEFAULT_PROVIDER.to_string())
    }

    pub fn available_providers(&self) -> Vec<String> {
        let providers: Vec<String> = self
            .get("api.providers")
            .and_then(Value::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();

        if providers.is_empty() {
            vec![DEFAULT_PROVIDER.to_string()]
        } else {
            providers
        }
    }

    /// Profile for `provider` (or the configured default provider).
    ///
    /// Unknown providers fall back to the `dashscope` entry, then to the
    /// built-in DashScope profile. A missing base URL is filled with the
    /// DashScope endpoint and a missing name with the provider id.
    pub fn provider_profile(&self, provider: Option<&str>) -> ProviderProfile {
        let id = provider
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.provider());

        let lookup = |id: &str| -> Option<ProviderProfile> {
            let entry = self.get("api.providers")?.as_object()?.get(id)?;
            ProviderProfile::from_entry(entry)
        };

        let (resolved_id, mut profile) = match lookup(&id) {
            Some(profile) => (id, profile),
            None => match lookup(DEFAULT_PROVIDER) {
                Some(profile) => {
                    warn!("Unknown provider '{}', falling back to {}", id, DEFAULT_PROVIDER);
                    (DEFAULT_PROVIDER.to_string(), profile)
                }
                None => (
                    DEFAULT_PROVIDER.to_string(),
                    ProviderProfile::builtin_dashscope(),
                ),
            },
        };

        if profile.name.trim().is_empty() {
            profile.name = resolved_id;
        }
        if profile.base_url.trim().is_empty() {
            profile.base_url = DEFAULT_BASE_URL.to_string();
        }
        profile
    }

    pub fn default_model(&self) -> String {
        self.get_or("models.default", DEFAULT_MODEL.to_string())
    }

    pub fn available_models(&self) -> Vec<ModelInfo> {
        self.get("models.available")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|model| serde_json::from_value(model.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn model_info(&self, name: &str) -> Option<ModelInfo> {
        self.available_models()
            .into_iter()
            .find(|model| model.name == name)
    }

    /// Resolve the API model name for a call-time selection.
    ///
    /// Bracketed tags such as `[Comfly-T8]` are stripped, display names are
    /// mapped back to model names, and a blank selection falls back to
    /// `models.default`.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        let cleaned = requested.map(strip_bracket_tags).unwrap_or_default();
        if cleaned.is_empty() {
            return self.default_model();
        }

        self.available_models()
            .into_iter()
            .find(|model| model.display_name.as_deref() == Some(cleaned.as_str()))
            .map(|model| model.name)
            .unwrap_or(cleaned)
    }

    pub fn generation(&self) -> GenerationDefaults {
        GenerationDefaults {
            temperature: self.get_or("generation.default_temperature", 0.7),
            top_p: self.get_or("generation.default_top_p", 0.8),
            max_tokens: self.get_or("generation.default_max_tokens", 1024),
        }
    }

    pub fn image_max_dimension(&self) -> u32 {
        self.get_or(
            "media.image.max_dimension",
            crate::media::image::DEFAULT_MAX_DIMENSION,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.get_or("api.max_retries", 3)
    }

    pub fn proxy(&self) -> Option<String> {
        self.get("api.proxy")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|proxy| !proxy.is_empty())
            .map(str::to_string)
    }

    pub fn logging(&self) -> LoggingSettings {
        LoggingSettings {
            level: self.get_or("logging.level", "INFO".to_string()),
            enable_debug: self.get_or("logging.enable_debug", false),
            log_api_calls: self.get_or("logging.log_api_calls", true),
            log_payloads: self.get_or("logging.log_payloads", false),
        }
    }

    pub fn streaming_enabled(&self) -> bool {
        self.get_or("features.enable_streaming", true)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Resolve the API key from the process environment as the last source.
pub fn resolve_api_key(explicit: Option<&str>, profile: &ProviderProfile) -> Result<String> {
    resolve_api_key_with(explicit, profile, |name| std::env::var(name).ok())
}

/// Resolve the API key: call-time value, then the provider entry, then the
/// `DASHSCOPE_API_KEY` variable as reported by `env`. Blank values count as
/// absent.
pub fn resolve_api_key_with<F>(
    explicit: Option<&str>,
    profile: &ProviderProfile,
    env: F,
) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |value: &str| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };

    explicit
        .and_then(non_blank)
        .or_else(|| non_blank(&profile.api_key))
        .or_else(|| env(API_KEY_ENV).as_deref().and_then(non_blank))
        .ok_or_else(|| Error::MissingCredential {
            provider: profile.name.clone(),
        })
}

/// Remove `[...]` tags from a model selection and trim the remainder.
pub fn strip_bracket_tags(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(start) = rest.find('[') {
        match rest[start..].find(']') {
            Some(end) => {
                cleaned.push_str(&rest[..start]);
                rest = &rest[start + end + 1..];
            }
            None => break,
        }
    }
    cleaned.push_str(rest);
    cleaned.trim().to_string()
}

fn read_tree(path: &Path) -> (Value, ConfigSource) {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return defaults_because(format!("Config file not found: {}", path.display()))
        }
        Err(e) => {
            return defaults_because(format!(
                "Error loading config {}: {}",
                path.display(),
                e
            ))
        }
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(tree) if tree.is_object() => (tree, ConfigSource::File(path.to_path_buf())),
        Ok(_) => defaults_because(format!(
            "Config file {} is not a JSON object",
            path.display()
        )),
        Err(e) => defaults_because(format!(
            "Invalid JSON in config file {}: {}",
            path.display(),
            e
        )),
    }
}

fn defaults_because(reason: String) -> (Value, ConfigSource) {
    (default_tree(), ConfigSource::Defaults { reason })
}

fn default_tree() -> Value {
    json!({
        "api": {
            "provider": DEFAULT_PROVIDER,
            "providers": {
                "dashscope": {
                    "name": "DashScope",
                    "base_url": DEFAULT_BASE_URL,
                    "api_key": ""
                }
            },
            "max_retries": 3,
            "proxy": null
        },
        "models": {
            "default": DEFAULT_MODEL,
            "available": [
                {
                    "name": "qwen3-vl-235b-a22b-instruct",
                    "display_name": "Qwen3-VL 235B (Instruct)",
                    "max_tokens": 8192
                },
                {
                    "name": "qwen3-vl-235b-a22b-thinking",
                    "display_name": "Qwen3-VL 235B (Thinking)",
                    "max_tokens": 8192
                },
                {
                    "name": "qwen-vl-max",
                    "display_name": "Qwen-VL Max",
                    "max_tokens": 4096
                },
                {
                    "name": "qwen-vl-plus",
                    "display_name": "Qwen-VL Plus",
                    "max_tokens": 4096
                }
            ]
        },
        "generation": {
            "default_temperature": 0.7,
            "default_top_p": 0.8,
            "default_max_tokens": 1024
        },
        "media": {
            "image": {
                "max_dimension": crate::media::image::DEFAULT_MAX_DIMENSION
            }
        },
        "logging": {
            "level": "INFO",
            "enable_debug": false,
            "log_api_calls": true,
            "log_payloads": false
        },
        "features": {
            "enable_streaming": true
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn profile_with_key(api_key: &str) -> ProviderProfile {
        ProviderProfile {
            name: "Test".to_string(),
            base_url: "https://example.test/v1".to_string(),
            api_key: api_key.to_string(),
        }
    }

    #[test]
    fn test_defaults_match_builtin_values() {
        let config = Config::defaults();

        assert_eq!(config.provider(), "dashscope");
        assert_eq!(config.default_model(), DEFAULT_MODEL);
        assert_eq!(config.available_providers(), vec!["dashscope".to_string()]);
        assert_eq!(config.available_models().len(), 4);
        assert_eq!(config.image_max_dimension(), 2048);
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.proxy(), None);
        assert!(config.streaming_enabled());

        let generation = config.generation();
        assert_eq!(generation.max_tokens, 1024);
        assert_eq!(generation.temperature, 0.7);
        assert_eq!(generation.top_p, 0.8);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.json"));

        assert!(matches!(config.source(), ConfigSource::Defaults { .. }));
        assert_eq!(config.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_load_malformed_json_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"api\": { \"provider\": ").unwrap();

        let config = Config::load(&path);

        match config.source() {
            ConfigSource::Defaults { reason } => assert!(reason.contains("Invalid JSON")),
            other => panic!("expected defaults, got {:?}", other),
        }
        assert_eq!(config.provider(), "dashscope");
    }

    #[test]
    fn test_load_reads_file_and_falls_back_per_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"api": {"provider": "t8"}, "generation": {"default_max_tokens": 2048}}"#,
        )
        .unwrap();

        let config = Config::load(&path);

        assert_eq!(config.source(), &ConfigSource::File(path.clone()));
        assert_eq!(config.provider(), "t8");
        assert_eq!(config.generation().max_tokens, 2048);
        // Keys absent from the file use the built-in defaults, not the default tree.
        assert_eq!(config.generation().top_p, 0.8);
        assert_eq!(config.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"models": {"default": "qwen-vl-plus"}}"#).unwrap();

        let mut config = Config::load(&path);
        assert_eq!(config.default_model(), "qwen-vl-plus");

        fs::write(&path, r#"{"models": {"default": "qwen-vl-max"}}"#).unwrap();
        config.reload();
        assert_eq!(config.default_model(), "qwen-vl-max");
    }

    #[test]
    fn test_get_handles_non_object_intermediate_and_wrong_type() {
        let config = Config::from_value(json!({
            "api": "not-an-object",
            "generation": {"default_max_tokens": "lots", "default_top_p": null}
        }));

        assert!(config.get("api.provider").is_none());
        assert_eq!(config.provider(), "dashscope");
        assert_eq!(config.generation().max_tokens, 1024);
        assert!(config.get("generation.default_top_p").is_none());
        assert_eq!(config.generation().top_p, 0.8);
    }

    #[test]
    fn test_provider_profile_lookup_and_fallback() {
        let config = Config::from_value(json!({
            "api": {
                "provider": "t8",
                "providers": {
                    "dashscope": {"name": "DashScope", "base_url": "https://ds.test/v1", "api_key": "ds-key"},
                    "t8": {"base_url": "https://t8.test/v1", "api_key": "t8-key"}
                }
            }
        }));

        let default = config.provider_profile(None);
        assert_eq!(default.name, "t8");
        assert_eq!(default.base_url, "https://t8.test/v1");

        let unknown = config.provider_profile(Some("nope"));
        assert_eq!(unknown.api_key, "ds-key");

        assert_eq!(
            config.available_providers(),
            vec!["dashscope".to_string(), "t8".to_string()]
        );
    }

    #[test]
    fn test_provider_profile_null_field_falls_back_per_field() {
        let config = Config::from_value(json!({
            "api": {
                "providers": {
                    "dashscope": {"name": "DS", "base_url": "https://ds.test/v1", "api_key": "ds-key"},
                    "t8": {"name": null, "base_url": "https://t8.test/v1", "api_key": null}
                }
            }
        }));

        let profile = config.provider_profile(Some("t8"));
        assert_eq!(profile.name, "t8");
        assert_eq!(profile.base_url, "https://t8.test/v1");
        assert_eq!(profile.api_key, "");

        let config = Config::from_value(json!({
            "api": {"providers": {"t8": {"base_url": null, "api_key": 42}}}
        }));
        let profile = config.provider_profile(Some("t8"));
        assert_eq!(profile.name, "t8");
        assert_eq!(profile.base_url, DEFAULT_BASE_URL);
        assert_eq!(profile.api_key, "");
    }

    #[test]
    fn test_provider_profile_without_any_entries_uses_builtin() {
        let config = Config::from_value(json!({}));
        let profile = config.provider_profile(Some("whatever"));

        assert_eq!(profile.base_url, DEFAULT_BASE_URL);
        assert!(profile.api_key.is_empty());
    }

    #[test]
    fn test_api_key_precedence() {
        let env = |name: &str| (name == API_KEY_ENV).then(|| "env-key".to_string());

        let key = resolve_api_key_with(Some("call-key"), &profile_with_key("file-key"), env);
        assert_eq!(key.unwrap(), "call-key");

        let key = resolve_api_key_with(None, &profile_with_key("file-key"), env);
        assert_eq!(key.unwrap(), "file-key");

        let key = resolve_api_key_with(Some("  "), &profile_with_key(""), env);
        assert_eq!(key.unwrap(), "env-key");
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let err = resolve_api_key_with(None, &profile_with_key(""), |_| None).unwrap_err();
        assert!(matches!(err, Error::MissingCredential { ref provider } if provider == "Test"));
    }

    #[test]
    fn test_resolve_model_strips_tags_and_maps_display_names() {
        let config = Config::defaults();

        assert_eq!(
            config.resolve_model(Some("qwen-vl-max [Comfly-T8]")),
            "qwen-vl-max"
        );
        assert_eq!(
            config.resolve_model(Some("Qwen3-VL 235B (Thinking)")),
            "qwen3-vl-235b-a22b-thinking"
        );
        assert_eq!(config.resolve_model(Some("[only-a-tag]")), DEFAULT_MODEL);
        assert_eq!(config.resolve_model(None), DEFAULT_MODEL);
        assert_eq!(config.resolve_model(Some("custom-model")), "custom-model");
    }

    #[test]
    fn test_strip_bracket_tags_keeps_unterminated_bracket() {
        assert_eq!(strip_bracket_tags("[a] model [b]"), "model");
        assert_eq!(strip_bracket_tags("model [open"), "model [open");
    }

    #[test]
    fn test_logging_filter_directive() {
        let mut logging = Config::defaults().logging();
        assert_eq!(logging.filter_directive(), "qwen3vl_nodes=info");

        logging.level = "WARNING".to_string();
        assert_eq!(logging.filter_directive(), "qwen3vl_nodes=warn");

        logging.enable_debug = true;
        assert_eq!(logging.filter_directive(), "qwen3vl_nodes=debug");
    }
}
