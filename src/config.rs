use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::input::ChordSpec;
use crate::timer::DEFAULT_MAX_DURATION;

const DEFAULT_CONFIG: &str = r#"[hotkey]
modifiers = ["Command"]
key = "Space"

[capture]
output_path = "~/.ptt-capture/latest.wav"
max_duration_secs = 30
# Input device name to prefer, e.g. "BlackHole" for system audio
# device = "BlackHole"

[telemetry]
enabled = true
log_path = "~/.ptt-capture/ptt-capture.log"
"#;

/// Application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Push-to-talk chord
    pub hotkey: HotkeyConfig,
    /// Capture destination and safety cutoff
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Logging
    pub telemetry: TelemetryConfig,
}

/// Push-to-talk chord names
#[derive(Debug, Deserialize, Clone)]
pub struct HotkeyConfig {
    /// Modifier names, e.g. `["Command"]`
    pub modifiers: Vec<String>,
    /// Primary key name, e.g. `"Space"`
    pub key: String,
}

/// Capture settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    /// Artifact path, overwritten by every capture (`~` expanded)
    pub output_path: String,
    /// Safety cutoff in seconds
    pub max_duration_secs: u64,
    /// Preferred input device, matched by name; the default device otherwise
    pub device: Option<String>,
}

/// Logging settings
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Log to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file location (`~` expanded)
    pub log_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_path: "~/.ptt-capture/latest.wav".to_owned(),
            max_duration_secs: DEFAULT_MAX_DURATION.as_secs(),
            device: None,
        }
    }
}

impl HotkeyConfig {
    /// Parse the configured chord
    ///
    /// # Errors
    /// Returns error for unknown modifier or key names
    pub fn chord(&self) -> Result<ChordSpec> {
        ChordSpec::parse(&self.modifiers, &self.key).context("invalid [hotkey] section")
    }
}

impl CaptureConfig {
    /// Safety cutoff
    #[must_use]
    pub const fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Expanded artifact path
    ///
    /// # Errors
    /// Returns error if `~` is used and HOME is not set
    pub fn output_path(&self) -> Result<PathBuf> {
        Config::expand_path(&self.output_path)
    }
}

impl Config {
    /// Load config from ~/.ptt-capture.toml, writing the default on first run
    ///
    /// # Errors
    /// Returns error if the file cannot be read, written or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML contents
    ///
    /// # Errors
    /// Returns error on malformed TOML or out-of-range values
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse config TOML")?;

        if config.capture.max_duration_secs == 0 {
            bail!("capture.max_duration_secs must be greater than 0");
        }
        if config
            .capture
            .device
            .as_deref()
            .is_some_and(|device| device.trim().is_empty())
        {
            bail!("capture.device must not be empty");
        }
        config.hotkey.chord()?;

        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".ptt-capture.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if `~` is used and HOME is not set
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use global_hotkey::hotkey::{Code, Modifiers};

    #[test]
    fn test_default_config_parses() {
        let config = Config::parse(DEFAULT_CONFIG).unwrap();
        let chord = config.hotkey.chord().unwrap();
        assert_eq!(chord.modifiers(), Modifiers::SUPER);
        assert_eq!(chord.key(), Code::Space);
        assert_eq!(config.capture.max_duration(), Duration::from_secs(30));
        assert_eq!(config.capture.device, None);
        assert!(config.telemetry.enabled);
    }

    #[test]
    fn test_capture_device_name() {
        let config = Config::parse(
            r#"[hotkey]
modifiers = ["Command"]
key = "Space"

[capture]
device = "BlackHole 2ch"

[telemetry]
enabled = false
log_path = "/tmp/ptt.log"
"#,
        )
        .unwrap();
        assert_eq!(config.capture.device.as_deref(), Some("BlackHole 2ch"));
        assert_eq!(config.capture.max_duration(), DEFAULT_MAX_DURATION);
    }

    #[test]
    fn test_empty_capture_device_rejected() {
        let result = Config::parse(
            r#"[hotkey]
modifiers = ["Command"]
key = "Space"

[capture]
device = "  "

[telemetry]
enabled = false
log_path = "/tmp/ptt.log"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_capture_section_is_optional() {
        let config = Config::parse(
            r#"[hotkey]
modifiers = ["Control", "Option"]
key = "Z"

[telemetry]
enabled = false
log_path = "/tmp/ptt.log"
"#,
        )
        .unwrap();
        assert_eq!(config.capture.max_duration(), DEFAULT_MAX_DURATION);
        assert_eq!(config.capture.output_path, "~/.ptt-capture/latest.wav");
    }

    #[test]
    fn test_partial_capture_section_uses_defaults() {
        let config = Config::parse(
            r#"[hotkey]
modifiers = ["Shift"]
key = "F9"

[capture]
max_duration_secs = 10

[telemetry]
enabled = false
log_path = "/tmp/ptt.log"
"#,
        )
        .unwrap();
        assert_eq!(config.capture.max_duration(), Duration::from_secs(10));
        assert_eq!(config.capture.output_path, "~/.ptt-capture/latest.wav");
    }

    #[test]
    fn test_zero_max_duration_rejected() {
        let result = Config::parse(
            r#"[hotkey]
modifiers = ["Command"]
key = "Space"

[capture]
max_duration_secs = 0

[telemetry]
enabled = false
log_path = "/tmp/ptt.log"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_chord_rejected() {
        let result = Config::parse(
            r#"[hotkey]
modifiers = []
key = "Space"

[telemetry]
enabled = false
log_path = "/tmp/ptt.log"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, DEFAULT_CONFIG).unwrap();
        assert!(Config::load_from(&path).is_ok());
        assert!(Config::load_from(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_expand_path_without_tilde() {
        assert_eq!(
            Config::expand_path("/var/tmp/latest.wav").unwrap(),
            PathBuf::from("/var/tmp/latest.wav")
        );
        assert_eq!(
            Config::expand_path("relative/latest.wav").unwrap(),
            PathBuf::from("relative/latest.wav")
        );
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let home = std::env::var("HOME").expect("HOME not set");
        assert_eq!(
            Config::expand_path("~/.ptt-capture/latest.wav").unwrap(),
            PathBuf::from(home).join(".ptt-capture/latest.wav")
        );
    }
}
