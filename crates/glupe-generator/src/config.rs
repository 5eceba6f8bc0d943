//! Generator presets and the `config.json` file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use glupe_core::LoopPolicy;
use glupe_verifier::{LangProfile, ToolchainOverride, VerifierConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";
pub const API_KEY_ENV: &str = "GLUPE_API_KEY";

const DEFAULT_LOCAL_MODEL: &str = "qwen2.5-coder:3b";
const DEFAULT_CLOUD_MODEL: &str = "gemini-pro";
const OLLAMA_URL: &str = "http://localhost:11434/api/generate";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Loop bounds
    pub policy: LoopPolicy,
    /// Error history entries kept for the next prompt
    pub history_entries_max: usize,
    /// Verifier timeouts and overrides
    pub verifier: VerifierConfig,
    /// HTTP timeout for one oracle call
    pub oracle_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            policy: LoopPolicy::default(),
            history_entries_max: 3,
            verifier: VerifierConfig::default(),
            oracle_timeout: Duration::from_secs(120),
        }
    }
}

impl GeneratorConfig {
    /// Quick config for fast iteration.
    pub fn quick() -> Self {
        Self {
            policy: LoopPolicy {
                passes_max: 5,
                oracle_attempts_max: 5,
                passes_before_fatal_min: 2,
                backoff_base: Duration::from_secs(2),
            },
            history_entries_max: 2,
            verifier: VerifierConfig::quick(),
            oracle_timeout: Duration::from_secs(60),
        }
    }

    /// Thorough config for large blueprints.
    pub fn thorough() -> Self {
        Self {
            policy: LoopPolicy {
                passes_max: 25,
                oracle_attempts_max: 20,
                passes_before_fatal_min: 5,
                backoff_base: Duration::from_secs(5),
            },
            history_entries_max: 5,
            verifier: VerifierConfig::thorough(),
            oracle_timeout: Duration::from_secs(300),
        }
    }
}

/// Wire protocol of an oracle endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Google,
    Openai,
    Ollama,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Google => f.write_str("google"),
            Protocol::Openai => f.write_str("openai"),
            Protocol::Ollama => f.write_str("ollama"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Protocol::Google),
            "openai" => Ok(Protocol::Openai),
            "ollama" => Ok(Protocol::Ollama),
            other => Err(ConfigError::InvalidValue {
                key: "protocol".to_string(),
                message: format!("'{}' is not one of google, openai, ollama", other),
            }),
        }
    }
}

/// Local or cloud provider profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderMode {
    #[default]
    Local,
    Cloud,
}

/// One provider section of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlupeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<ProviderProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<ProviderProfile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub toolchains: BTreeMap<String, ToolchainOverride>,
}

/// A fully resolved oracle endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub model_id: String,
    pub api_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown config key '{0}' (expected api-key, model-cloud, model-local, url-cloud, url-local, cloud-protocol, max-retries)")]
    UnknownKey(String),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl GlupeConfig {
    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply a `glupe config set KEY VALUE` edit.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let fresh = ProviderProfile::default;
        match key {
            "api-key" => self.cloud.get_or_insert_with(fresh).api_key = Some(value.to_string()),
            "model-cloud" => self.cloud.get_or_insert_with(fresh).model_id = Some(value.to_string()),
            "model-local" => self.local.get_or_insert_with(fresh).model_id = Some(value.to_string()),
            "url-cloud" => self.cloud.get_or_insert_with(fresh).api_url = Some(value.to_string()),
            "url-local" => self.local.get_or_insert_with(fresh).api_url = Some(value.to_string()),
            "cloud-protocol" => {
                let protocol: Protocol = value.parse()?;
                if protocol == Protocol::Ollama {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: "cloud protocol must be google or openai".to_string(),
                    });
                }
                self.cloud.get_or_insert_with(fresh).protocol = Some(protocol);
            }
            "max-retries" => {
                let retries: u32 = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{}' is not a number", value),
                })?;
                if retries == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: "must be greater than zero".to_string(),
                    });
                }
                self.max_retries = Some(retries);
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Human-readable listing with the API key masked.
    pub fn show(&self) -> String {
        let mut out = String::from("--- GLUPE CONFIGURATION ---\n");
        match self.max_retries {
            Some(n) => out.push_str(&format!("  Max Retries: {}\n", n)),
            None => out.push_str("  Max Retries: 15 (Default)\n"),
        }
        for (label, profile) in [("CLOUD", &self.cloud), ("LOCAL", &self.local)] {
            let Some(profile) = profile else { continue };
            out.push_str(&format!("[{}]\n", label));
            if let Some(p) = profile.protocol {
                out.push_str(&format!("  Protocol : {}\n", p));
            }
            if let Some(m) = &profile.model_id {
                out.push_str(&format!("  Model    : {}\n", m));
            }
            if let Some(u) = &profile.api_url {
                out.push_str(&format!("  URL      : {}\n", u));
            }
            if let Some(k) = &profile.api_key {
                out.push_str(&format!("  API Key  : {}\n", mask_key(k)));
            }
        }
        for (lang, over) in &self.toolchains {
            if let Some(cmd) = &over.build_cmd {
                out.push_str(&format!("  Toolchain {}: {}\n", lang, cmd));
            }
        }
        out
    }

    /// Resolve the endpoint for `mode`. `env_key` overrides any configured key.
    pub fn endpoint(&self, mode: ProviderMode, env_key: Option<String>) -> Endpoint {
        let (profile, default_protocol, default_model) = match mode {
            ProviderMode::Local => (self.local.clone(), Protocol::Ollama, DEFAULT_LOCAL_MODEL),
            ProviderMode::Cloud => (self.cloud.clone(), Protocol::Google, DEFAULT_CLOUD_MODEL),
        };
        let profile = profile.unwrap_or_default();
        let protocol = profile.protocol.unwrap_or(default_protocol);
        let model_id = profile
            .model_id
            .unwrap_or_else(|| default_model.to_string());
        let api_url = profile
            .api_url
            .unwrap_or_else(|| default_url(protocol, &model_id));
        let api_key = env_key
            .filter(|k| !k.is_empty())
            .or(profile.api_key)
            .filter(|k| !k.is_empty());

        Endpoint {
            protocol,
            model_id,
            api_url,
            api_key,
        }
    }

    /// Oracle attempt bound from `max_retries`, if set.
    pub fn oracle_attempts_max(&self) -> Option<u32> {
        self.max_retries
    }

    /// Apply toolchain overrides to `profile`.
    pub fn apply_toolchain(&self, profile: LangProfile) -> LangProfile {
        match self.toolchains.get(&profile.id) {
            Some(over) => profile.with_override(over),
            None => profile,
        }
    }
}

fn default_url(protocol: Protocol, model_id: &str) -> String {
    match protocol {
        Protocol::Google => format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            model_id
        ),
        Protocol::Openai => OPENAI_URL.to_string(),
        Protocol::Ollama => OLLAMA_URL.to_string(),
    }
}

/// `abc...xyz` for long keys, `***` for short ones.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 6 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}...{}", head, tail)
    } else if chars.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}
