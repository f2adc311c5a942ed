//! Configuration file parser for ~/.config/vane/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! It carries the user-visible strings (the all-entries label and the
//! import/export status messages), which is how a headless core stays
//! localizable without a string-resource system.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Label of the synthetic aggregate shown first in the drawer.
    pub all_entries_label: String,

    /// User-visible status strings. `{}` is substituted with the detail
    /// (file name) where one exists.
    pub messages: Messages,
}

/// Status messages posted on the notification channel by import/export.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub import_failed: String,
    pub exported_to: String,
    pub export_failed: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            all_entries_label: "All entries".to_string(),
            messages: Messages::default(),
        }
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            import_failed: "Unable to find feeds in this file".to_string(),
            exported_to: "Feeds exported to {}".to_string(),
            export_failed: "Unable to export the feed list".to_string(),
        }
    }
}

impl Messages {
    /// Substitute the `{}` placeholder, if the template has one.
    pub fn format(template: &str, detail: &str) -> String {
        template.replacen("{}", detail, 1)
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Detect likely typos before the typed parse swallows unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["all_entries_label", "messages"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.all_entries_label, "All entries");
        assert!(config.messages.exported_to.contains("{}"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/vane_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.all_entries_label, "All entries");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("vane_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "all_entries_label = \"Tout\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.all_entries_label, "Tout");
        assert_eq!(
            config.messages.export_failed,
            Messages::default().export_failed
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("vane_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
all_entries_label = "Alles"

[messages]
import_failed = "Keine Feeds gefunden"
exported_to = "Exportiert nach {}"
export_failed = "Export fehlgeschlagen"
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.all_entries_label, "Alles");
        assert_eq!(
            Messages::format(&config.messages.exported_to, "feeds.opml"),
            "Exportiert nach feeds.opml"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("vane_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("vane_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.all_entries_label, "All entries");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("vane_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::TooLarge(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_format_without_placeholder() {
        assert_eq!(Messages::format("no placeholder", "x"), "no placeholder");
    }
}
