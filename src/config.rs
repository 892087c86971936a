use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::params::RawParameters;

/// Config file names looked up when no path is given, in order
const CONFIG_CANDIDATES: [&str; 2] = ["config.toml", "config.txt"];

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Launch values; command line flags override these field by field
    #[serde(default)]
    pub launch: RawParameters,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between hashrate samples
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    /// Hashrate at or below this counts as unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: f64,
    /// Consecutive unhealthy samples that trigger a restart
    #[serde(default = "default_unhealthy_streak")]
    pub unhealthy_streak: u32,
    /// Seconds between repeated diagnostics once terminated
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_health_check_interval() -> u64 {
    20
}

fn default_unhealthy_threshold() -> f64 {
    0.01
}

fn default_unhealthy_streak() -> u32 {
    3
}

fn default_report_interval() -> u64 {
    2
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            unhealthy_threshold: default_unhealthy_threshold(),
            unhealthy_streak: default_unhealthy_streak(),
            report_interval_secs: default_report_interval(),
        }
    }
}

impl SupervisorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Miner executable
    #[serde(default = "default_worker_command")]
    pub command: String,
    /// Arguments placed before the launch flags
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds to wait after SIGTERM before killing the miner
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_worker_command() -> String {
    "miner".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rotated log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or from the first config file found
    /// in the working directory or next to the executable.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("supervisor.health_check_interval_secs", 20)?
            .set_default("supervisor.unhealthy_threshold", 0.01)?
            .set_default("supervisor.unhealthy_streak", 3)?
            .set_default("supervisor.report_interval_secs", 2)?;

        let builder = match path {
            Some(path) => builder.add_source(file_source(path).required(true)),
            None => match find_config_file() {
                Some(path) => builder.add_source(file_source(&path).required(false)),
                None => builder,
            },
        };

        builder
            // Override with environment variables (MINERD_LAUNCH__ADDRESS, etc.)
            .add_source(
                Environment::with_prefix("MINERD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.supervisor.health_check_interval_secs == 0 {
            errors.push("supervisor.health_check_interval_secs must be positive".to_string());
        }
        if self.supervisor.report_interval_secs == 0 {
            errors.push("supervisor.report_interval_secs must be positive".to_string());
        }
        if self.supervisor.unhealthy_streak == 0 {
            errors.push("supervisor.unhealthy_streak must be at least 1".to_string());
        }
        let threshold = self.supervisor.unhealthy_threshold;
        if threshold.is_nan() || threshold < 0.0 {
            errors.push("supervisor.unhealthy_threshold must be non-negative".to_string());
        }
        if self.worker.command.trim().is_empty() {
            errors.push("worker.command must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// File source whose format follows the extension; `.txt` is read as JSON
fn file_source(path: &Path) -> File<config::FileSourceFile, FileFormat> {
    let file = File::from(path.to_path_buf());
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("txt") => file.format(FileFormat::Json),
        _ => file,
    }
}

/// First existing candidate in the working directory, then beside the executable
fn find_config_file() -> Option<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    let dirs = std::iter::once(PathBuf::from(".")).chain(exe_dir);
    dirs.flat_map(|dir| CONFIG_CANDIDATES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_toml_config() {
        let (_dir, path) = write_config(
            "minerd.toml",
            r#"
[launch]
address = "NQ00 AAAA AAAA AAAA AAAA AAAA AAAA AAAA AAAA"
thread = 4
percent = 90

[supervisor]
health_check_interval_secs = 10

[worker]
command = "/opt/miner/bin/miner"
args = ["--quiet"]
"#,
        );

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(
            config.launch.address.as_deref(),
            Some("NQ00 AAAA AAAA AAAA AAAA AAAA AAAA AAAA AAAA")
        );
        assert_eq!(config.launch.thread.as_deref(), Some("4"));
        assert_eq!(config.launch.percent.as_deref(), Some("90"));
        assert_eq!(config.launch.name, None);
        assert_eq!(config.supervisor.health_check_interval_secs, 10);
        assert_eq!(config.supervisor.unhealthy_streak, 3);
        assert_eq!(config.worker.command, "/opt/miner/bin/miner");
        assert_eq!(config.worker.args, vec!["--quiet".to_string()]);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_txt_config_is_json() {
        let (_dir, path) = write_config(
            "config.txt",
            r#"{"launch": {"name": "*", "thread": "0", "server": "pool.example:8444"}}"#,
        );

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.launch.name.as_deref(), Some("*"));
        assert_eq!(config.launch.thread.as_deref(), Some("0"));
        assert_eq!(config.launch.server.as_deref(), Some("pool.example:8444"));
        assert_eq!(config.supervisor.report_interval_secs, 2);
    }

    #[test]
    fn test_non_numeric_percent_is_left_for_validation() {
        let (_dir, path) = write_config(
            "minerd.toml",
            "[launch]\naddress = \"NQ00 AAAA AAAA AAAA AAAA AAAA AAAA AAAA AAAA\"\npercent = \"lots\"\n",
        );

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.launch.percent.as_deref(), Some("lots"));
        assert_eq!(
            crate::params::validate(&config.launch, &crate::host::SystemHost),
            Err(crate::params::ValidationError::PercentOutOfRange)
        );

        let (_dir, path) = write_config("minerd.toml", "[launch]\npercent = 87.5\n");
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.launch.percent.as_deref(), Some("87.5"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let (_dir, path) = write_config(
            "bad.toml",
            "[supervisor]\nhealth_check_interval_secs = 0\nunhealthy_streak = 0\n",
        );
        let config = AppConfig::load(Some(&path)).unwrap();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
