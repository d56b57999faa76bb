use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_host() -> String {
    "http://127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig {
                host: default_host(),
            },
            window: WindowConfig {
                width: 1100,
                height: 700,
            },
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Error parsing config.toml: {}. Using defaults.", e),
                },
                Err(e) => log::warn!("Error reading config.toml: {}. Using defaults.", e),
            }
        } else {
            // Create config directory if it doesn't exist
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
        }

        Config::default()
    }

    pub fn get_config_path() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/doc-bar/config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_host() {
        let config = Config::default();
        assert_eq!(config.backend.host, "http://127.0.0.1:8000");
    }

    #[test]
    fn test_partial_config_falls_back_to_default_host() {
        let config: Config =
            toml::from_str("[backend]\n\n[window]\nwidth = 800\nheight = 600\n").unwrap();
        assert_eq!(config.backend.host, "http://127.0.0.1:8000");
        assert_eq!(config.window.width, 800);
    }
}
