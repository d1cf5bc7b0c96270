//! Configuration loading with multi-layer merge

use super::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level step-runner configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Runner defaults
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options recognised by `Runner::new`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Upper bound on waiting for a batch of async steps, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Set the batch timeout, rounding up to whole milliseconds
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }
}

/// Logging options
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable debug output
    #[serde(default)]
    pub debug: bool,

    /// Only log errors
    #[serde(default)]
    pub quiet: bool,

    /// Also append logs to this file
    pub file: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/step-runner/config.toml
    /// 3. .step-runner/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut layers = Vec::new();
        if let Some(user_config_path) = Self::user_config_path() {
            layers.push(user_config_path);
        }
        layers.push(Self::project_config_path(project_dir));

        Self::load_layers(&layers)
    }

    /// Merge the given files in order, skipping missing ones
    ///
    /// Layers merge key by key: any value a later file sets wins, including
    /// one equal to the built-in default.
    pub fn load_layers(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Table::new();

        for path in paths.iter().filter(|p| p.exists()) {
            let layer = Self::load_layer(path).with_context(|| format!("loading {}", path.display()))?;
            merge_tables(&mut merged, layer);
        }

        let settings: Self = toml::Value::Table(merged).try_into()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read one layer as a raw table, checking it against the schema first
    fn load_layer(path: &Path) -> Result<toml::Table> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        let table: toml::Table = toml::from_str(&contents)?;
        Ok(table)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents)?;
        Ok(settings)
    }

    /// Get the user config path (~/.config/step-runner/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("step-runner/config.toml"))
    }

    fn project_config_path(project_dir: Option<&Path>) -> PathBuf {
        project_dir
            .map(|p| p.join(".step-runner/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".step-runner/config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.logging.debug && self.logging.quiet {
            return Err(ConfigError::ConflictingVerbosity);
        }
        Ok(())
    }
}

/// Overlay `layer` onto `base`; nested tables merge, everything else is
/// replaced
fn merge_tables(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.runner.timeout_ms, 5000);
        assert_eq!(settings.runner.timeout(), Duration::from_secs(5));
        assert!(!settings.logging.debug);
        assert!(settings.logging.file.is_none());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
            [runner]
            timeout_ms = 250

            [logging]
            debug = true
            file = "/tmp/step-runner.log"
        "#
        )
        .unwrap();

        let settings = Settings::load_file(&config_path).unwrap();
        assert_eq!(settings.runner.timeout(), Duration::from_millis(250));
        assert!(settings.logging.debug);
        assert_eq!(
            settings.logging.file,
            Some(PathBuf::from("/tmp/step-runner.log"))
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Settings::from_toml_str("[runner]\nretries = 3\n").unwrap_err();
        assert!(err.to_string().contains("retries"));
    }

    #[test]
    fn test_load_file_error_has_context() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[runner\n").unwrap();

        let err = Settings::load_file(&config_path).unwrap_err();
        assert!(format!("{:#}", err).contains("parsing"));
    }

    #[test]
    fn test_project_layer_loaded() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join(".step-runner");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("config.toml"), "[runner]\ntimeout_ms = 42\n").unwrap();

        let settings = Settings::load(Some(dir.path())).unwrap();
        assert_eq!(settings.runner.timeout_ms, 42);
    }

    fn write_layer(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_layers_merge_key_by_key() {
        let dir = TempDir::new().unwrap();
        let user = write_layer(
            &dir,
            "user.toml",
            "[runner]\ntimeout_ms = 1000\n\n[logging]\nfile = \"base.log\"\n",
        );
        let project = write_layer(&dir, "project.toml", "[logging]\nquiet = true\n");

        let settings = Settings::load_layers(&[user, project]).unwrap();

        assert_eq!(settings.runner.timeout_ms, 1000);
        assert!(settings.logging.quiet);
        // Unset values keep the earlier layer
        assert_eq!(settings.logging.file, Some(PathBuf::from("base.log")));
    }

    #[test]
    fn test_later_layer_can_restore_default() {
        let dir = TempDir::new().unwrap();
        let user = write_layer(&dir, "user.toml", "[runner]\ntimeout_ms = 1000\n[logging]\ndebug = true\n");
        let project = write_layer(
            &dir,
            "project.toml",
            "[runner]\ntimeout_ms = 5000\n[logging]\ndebug = false\n",
        );

        let settings = Settings::load_layers(&[user, project]).unwrap();

        assert_eq!(settings.runner.timeout_ms, 5000);
        assert!(!settings.logging.debug);
    }

    #[test]
    fn test_missing_layers_skipped() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_layers(&[dir.path().join("absent.toml")]).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_bad_layer_rejected() {
        let dir = TempDir::new().unwrap();
        let layer = write_layer(&dir, "bad.toml", "[runner]\nretries = 3\n");

        let err = Settings::load_layers(&[layer]).unwrap_err();
        assert!(format!("{:#}", err).contains("retries"));
    }

    #[test]
    fn test_merged_layers_validated() {
        let dir = TempDir::new().unwrap();
        let user = write_layer(&dir, "user.toml", "[logging]\ndebug = true\n");
        let project = write_layer(&dir, "project.toml", "[logging]\nquiet = true\n");

        let err = Settings::load_layers(&[user, project]).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_validate() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.runner.timeout_ms = 0;
        assert_eq!(settings.validate(), Err(ConfigError::ZeroTimeout));

        settings.runner.timeout_ms = 10;
        settings.logging.debug = true;
        settings.logging.quiet = true;
        assert_eq!(settings.validate(), Err(ConfigError::ConflictingVerbosity));
    }

    #[test]
    fn test_with_timeout() {
        let config = RunnerConfig::default().with_timeout(Duration::from_millis(1500));
        assert_eq!(config.timeout_ms, 1500);
    }

    #[test]
    fn test_with_timeout_rounds_up_and_saturates() {
        let tiny = RunnerConfig::default().with_timeout(Duration::from_micros(1));
        assert_eq!(tiny.timeout_ms, 1);

        let partial = RunnerConfig::default().with_timeout(Duration::from_micros(1500));
        assert_eq!(partial.timeout_ms, 2);

        let zero = RunnerConfig::default().with_timeout(Duration::ZERO);
        assert_eq!(zero.timeout_ms, 0);

        let huge = RunnerConfig::default().with_timeout(Duration::MAX);
        assert_eq!(huge.timeout_ms, u64::MAX);
    }
}
