use fragmentor_identity::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use fragmentor_identity::prompt::DEFAULT_ALTERNATIVES;
use fragmentor_identity::GeminiConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file, then `FRAGMENTOR_*`
/// environment variables (highest precedence).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing the four ONNX model files.
    pub model_dir: PathBuf,
    /// Detection poll period in milliseconds.
    pub poll_interval_ms: u64,
    /// Time between countdown steps in milliseconds.
    pub countdown_step_ms: u64,
    /// TTF/OTF font for HUD text. Text is skipped when unset.
    pub font_path: Option<PathBuf>,
    /// Default destination for `SaveOverlay` when called with an empty path.
    pub overlay_path: PathBuf,
    pub gemini: GeminiSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeminiSection {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub alternatives: usize,
}

impl Default for GeminiSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            alternatives: DEFAULT_ALTERNATIVES,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = xdg_dir("XDG_DATA_HOME", ".local/share").join("fragmentor");
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: fragmentor_hw::camera::DEFAULT_WIDTH,
            camera_height: fragmentor_hw::camera::DEFAULT_HEIGHT,
            model_dir: data_dir.join("models"),
            poll_interval_ms: 100,
            countdown_step_ms: 1000,
            font_path: None,
            overlay_path: runtime_dir.join("fragmentor-overlay.png"),
            gemini: GeminiSection::default(),
        }
    }
}

impl Config {
    /// Load from the process environment and the default config file location.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file = env("FRAGMENTOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| xdg_dir("XDG_CONFIG_HOME", ".config").join("fragmentor/config.toml"));
        Self::from_sources(Some(&file), env)
    }

    /// Layer `file` (skipped if it does not exist) and then `env` over defaults.
    pub fn from_sources(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file.filter(|p| p.exists()) {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                let parsed: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
                tracing::info!(path = %path.display(), "loaded config file");
                parsed
            }
            None => Config::default(),
        };

        if let Some(v) = env("FRAGMENTOR_CAMERA_DEVICE") {
            config.camera_device = v;
        }
        set_parsed(&env, "FRAGMENTOR_CAMERA_WIDTH", &mut config.camera_width);
        set_parsed(&env, "FRAGMENTOR_CAMERA_HEIGHT", &mut config.camera_height);
        if let Some(v) = env("FRAGMENTOR_MODEL_DIR") {
            config.model_dir = PathBuf::from(v);
        }
        set_parsed(&env, "FRAGMENTOR_POLL_INTERVAL_MS", &mut config.poll_interval_ms);
        set_parsed(&env, "FRAGMENTOR_COUNTDOWN_STEP_MS", &mut config.countdown_step_ms);
        if let Some(v) = env("FRAGMENTOR_FONT_PATH") {
            config.font_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("FRAGMENTOR_OVERLAY_PATH") {
            config.overlay_path = PathBuf::from(v);
        }

        if let Some(key) = env("GEMINI_API_KEY").or_else(|| env("API_KEY")) {
            config.gemini.api_key = key;
        }
        if let Some(v) = env("FRAGMENTOR_GEMINI_MODEL") {
            config.gemini.model = v;
        }
        if let Some(v) = env("FRAGMENTOR_GEMINI_BASE_URL") {
            config.gemini.base_url = v;
        }
        set_parsed(&env, "FRAGMENTOR_GEMINI_TEMPERATURE", &mut config.gemini.temperature);
        set_parsed(&env, "FRAGMENTOR_GEMINI_ALTERNATIVES", &mut config.gemini.alternatives);

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn countdown_step(&self) -> Duration {
        Duration::from_millis(self.countdown_step_ms.max(1))
    }

    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.gemini.api_key.clone(),
            model: self.gemini.model.clone(),
            base_url: self.gemini.base_url.clone(),
            temperature: self.gemini.temperature,
            alternatives: self.gemini.alternatives,
        }
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

/// Overwrite `target` when `key` is set and parses; a bad value is logged and ignored.
fn set_parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = env(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Config::from_sources(None, env_of(&[])).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!((config.camera_width, config.camera_height), (1280, 720));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.countdown_step(), Duration::from_secs(1));
        assert_eq!(config.gemini.model, "gemini-2.5-flash");
        assert_eq!(config.gemini.alternatives, 20);
        assert!((config.gemini.temperature - 1.3).abs() < 1e-6);
        assert!(config.model_dir.ends_with("fragmentor/models"));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = Config::from_sources(Some(Path::new("/nonexistent/fragmentor.toml")), env_of(&[])).unwrap();
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn test_file_then_env_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
camera_device = "/dev/video4"
poll_interval_ms = 250
font_path = "/usr/share/fonts/mono.ttf"

[gemini]
model = "gemini-2.5-pro"
alternatives = 8
"#
        )
        .unwrap();

        let config = Config::from_sources(
            Some(file.path()),
            env_of(&[
                ("FRAGMENTOR_POLL_INTERVAL_MS", "50"),
                ("API_KEY", "from-api-key"),
            ]),
        )
        .unwrap();

        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.font_path, Some(PathBuf::from("/usr/share/fonts/mono.ttf")));
        assert_eq!(config.gemini.model, "gemini-2.5-pro");
        assert_eq!(config.gemini.alternatives, 8);
        assert_eq!(config.gemini.api_key, "from-api-key");
        // Untouched keys keep their defaults.
        assert_eq!(config.camera_width, 1280);
    }

    #[test]
    fn test_gemini_key_preferred_over_api_key() {
        let config = Config::from_sources(
            None,
            env_of(&[("GEMINI_API_KEY", "gemini"), ("API_KEY", "generic")]),
        )
        .unwrap();
        assert_eq!(config.gemini_config().api_key, "gemini");
    }

    #[test]
    fn test_bad_env_value_ignored() {
        let config =
            Config::from_sources(None, env_of(&[("FRAGMENTOR_CAMERA_WIDTH", "wide")])).unwrap();
        assert_eq!(config.camera_width, 1280);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = \"fast\"").unwrap();
        assert!(matches!(
            Config::from_sources(Some(file.path()), env_of(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "camera = \"/dev/video1\"").unwrap();
        assert!(Config::from_sources(Some(file.path()), env_of(&[])).is_err());
    }
}
