//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$XROAD_SWA_CONFIG` (environment variable)
//! 2. `~/.config/xroad-swa/config.toml` (Linux/macOS)
//!    `%APPDATA%\xroad-swa\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::attachment::HashFunction;
use crate::multipart::decoder::DecoderOptions;
use crate::schema::wsdl::TypeOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Multipart decoding limits.
    pub multipart: MultipartConfig,
    /// Outgoing attachment defaults.
    pub attachments: AttachmentsConfig,
    /// Generated XML Schema settings.
    pub wsdl: WsdlConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Multipart decoding limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultipartConfig {
    /// Largest accepted body in bytes (default: 52428800 = 50 MB).
    pub max_body_size: usize,
    /// Maximum number of parts per multipart level.
    pub max_parts: usize,
    /// Convert textual parts to UTF-8.
    pub normalize_charset: bool,
}

/// Outgoing attachment defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentsConfig {
    /// Digest algorithm for `Content-Digest`: "sha256" or "sha512".
    pub default_hash: String,
    /// Per-file size limit for `encode` (0 = unlimited).
    pub max_filesize: usize,
}

/// Generated XML Schema settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsdlConfig {
    /// `targetNamespace` of generated types.
    pub target_namespace: String,
    /// Prefix bound to the target namespace.
    pub type_prefix: String,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for MultipartConfig {
    fn default() -> Self {
        let options = DecoderOptions::default();
        Self {
            max_body_size: options.max_body_size,
            max_parts: options.max_parts,
            normalize_charset: options.normalize_charset,
        }
    }
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            default_hash: "sha256".to_string(),
            max_filesize: 0,
        }
    }
}

impl Default for WsdlConfig {
    fn default() -> Self {
        let options = TypeOptions::default();
        Self {
            target_namespace: options.target_namespace,
            type_prefix: options.type_prefix,
        }
    }
}

impl Config {
    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            max_body_size: self.multipart.max_body_size,
            max_parts: self.multipart.max_parts,
            normalize_charset: self.multipart.normalize_charset,
        }
    }

    pub fn type_options(&self) -> TypeOptions {
        TypeOptions {
            target_namespace: self.wsdl.target_namespace.clone(),
            type_prefix: self.wsdl.type_prefix.clone(),
        }
    }

    /// Digest algorithm for outgoing files; unknown names fall back to SHA-256.
    pub fn hash_function(&self) -> HashFunction {
        match self.attachments.default_hash.to_ascii_lowercase().as_str() {
            "sha512" | "sha-512" => HashFunction::Sha512,
            "sha256" | "sha-256" => HashFunction::Sha256,
            other => {
                tracing::warn!(hash = other, "Unknown digest algorithm, using sha256");
                HashFunction::Sha256
            }
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("XROAD_SWA_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("xroad-swa").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xroad-swa")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("xroad-swa.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.multipart.max_parts, 128);
        assert!(cfg.multipart.normalize_charset);
        assert_eq!(cfg.wsdl.type_prefix, "tns");
        assert_eq!(cfg.decoder_options(), DecoderOptions::default());
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.multipart.max_body_size, cfg.multipart.max_body_size);
        assert_eq!(parsed.wsdl.target_namespace, cfg.wsdl.target_namespace);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[multipart]
max_parts = 4

[attachments]
default_hash = "sha512"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.decoder_options().max_parts, 4);
        assert_eq!(cfg.multipart.max_body_size, 50 * 1024 * 1024);
        assert_eq!(cfg.hash_function(), HashFunction::Sha512);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_unknown_hash_falls_back() {
        let mut cfg = Config::default();
        cfg.attachments.default_hash = "md5".into();
        assert_eq!(cfg.hash_function(), HashFunction::Sha256);
    }
}
