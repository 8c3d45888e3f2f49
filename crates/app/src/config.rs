use crate::channel::DEFAULT_ENDPOINT;
use atlasvoice_core::config::{DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE};
use atlasvoice_core::SessionConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

const FALLBACK_API_KEY_ENV: &str = "API_KEY";

/// Application configuration for persisting user preferences.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AppConfig {
    #[serde(default = "default_device")]
    pub last_input: String,
    #[serde(default = "default_device")]
    pub last_output: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Empty lets the service pick a voice.
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_meter_enabled")]
    pub meter_enabled: bool,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_meter_enabled() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            last_input: default_device(),
            last_output: default_device(),
            endpoint: default_endpoint(),
            model: default_model(),
            voice: default_voice(),
            system_instruction: default_system_instruction(),
            api_key_env: default_api_key_env(),
            meter_enabled: default_meter_enabled(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from disk, or returns default if not found.
    pub fn load() -> Self {
        if let Some(path) = config_path() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(cfg) = serde_json::from_str(&content) {
                    return cfg;
                }
            }
        }
        Self::default()
    }

    /// Saves configuration to disk in JSON format.
    pub fn save(&self) {
        if let Some(path) = config_path() {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(json) = serde_json::to_string_pretty(self) {
                let _ = fs::write(path, json);
            }
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let voice = self.voice.trim();
        SessionConfig {
            model: self.model.clone(),
            voice_name: (!voice.is_empty()).then(|| voice.to_string()),
            system_instruction: self.system_instruction.clone(),
            ..SessionConfig::default()
        }
    }

    /// Reads the API key from the configured variable, then `API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_from(|name| env::var(name).ok())
    }

    fn api_key_from(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        [self.api_key_env.as_str(), FALLBACK_API_KEY_ENV]
            .into_iter()
            .filter_map(|name| lookup(name))
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
    }
}

pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "atlasvoice", "atlasvoice")
        .map(|dirs| dirs.config_dir().join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.last_input, "default");
        assert_eq!(config.last_output, "default");
        assert_eq!(config.voice, "Fenrir");
        assert_eq!(config.api_key_env, "GEMINI_API_KEY");
        assert!(config.meter_enabled);
        assert!(config.endpoint.starts_with("wss://"));
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        // Minimal JSON - should fill in defaults
        let json = r#"{"last_input":"Mic","meter_enabled":false}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.last_input, "Mic");
        assert_eq!(config.last_output, "default");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        assert!(!config.meter_enabled);
    }

    #[test]
    fn test_config_roundtrip() {
        let original = AppConfig {
            last_input: "USB Mic".to_string(),
            last_output: "Headphones".to_string(),
            voice: "Puck".to_string(),
            api_key_env: "MY_KEY".to_string(),
            ..AppConfig::default()
        };

        let json = serde_json::to_string(&original).unwrap();
        assert!(json.contains("\"last_output\":\"Headphones\""));
        let restored: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(original.last_input, restored.last_input);
        assert_eq!(original.voice, restored.voice);
        assert_eq!(original.api_key_env, restored.api_key_env);
    }

    #[test]
    fn test_session_config_passes_instruction_through() {
        let config = AppConfig {
            system_instruction: "  Stay quiet.\n".to_string(),
            voice: "   ".to_string(),
            ..AppConfig::default()
        };
        let session = config.session_config();
        assert_eq!(session.system_instruction, "  Stay quiet.\n");
        assert_eq!(session.voice_name, None);
        assert_eq!(session.capture_block_size, 4096);
    }

    #[test]
    fn test_api_key_falls_back() {
        let config = AppConfig::default();
        let key = config.api_key_from(|name| match name {
            "GEMINI_API_KEY" => Some("  ".to_string()),
            "API_KEY" => Some("fallback".to_string()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("fallback"));

        let key = config.api_key_from(|name| (name == "GEMINI_API_KEY").then(|| "primary".to_string()));
        assert_eq!(key.as_deref(), Some("primary"));

        assert_eq!(config.api_key_from(|_| None), None);
    }
}
