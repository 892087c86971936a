use clap::Parser;
use std::path::PathBuf;

use crate::params::RawParameters;

#[derive(Parser, Debug, Default)]
#[command(name = "minerd")]
#[command(version)]
#[command(about = "Keeps a pool mining worker running", long_about = None)]
pub struct Cli {
    /// Payout address (44 characters)
    #[arg(long)]
    pub address: Option<String>,

    /// Worker display name; `*` derives one from the host
    #[arg(long)]
    pub name: Option<String>,

    /// Worker thread count; 0 uses all but one CPU thread
    #[arg(long)]
    pub thread: Option<String>,

    /// Throttle percentage (50-100)
    #[arg(long)]
    pub percent: Option<String>,

    /// Coordination server endpoint
    #[arg(long)]
    pub server: Option<String>,

    /// Config file path
    #[arg(short, long, env = "MINERD_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Launch overrides given on the command line
    pub fn launch_overrides(&self) -> RawParameters {
        RawParameters {
            server: self.server.clone(),
            address: self.address.clone(),
            name: self.name.clone(),
            thread: self.thread.clone(),
            // Unparseable values are rejected by validation, not by the parser
            percent: self.percent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SystemHost;
    use crate::params::{validate, ValidationError};

    #[test]
    fn test_parse_equals_style_flags() {
        let cli = Cli::try_parse_from([
            "minerd",
            "--address=NQ07 0000 0000 0000 0000 0000 0000 0000 0000",
            "--name=*",
            "--thread=0",
            "--percent=85",
            "--server=pool.example:8444",
        ])
        .unwrap();

        let raw = cli.launch_overrides();
        assert_eq!(
            raw.address.as_deref(),
            Some("NQ07 0000 0000 0000 0000 0000 0000 0000 0000")
        );
        assert_eq!(raw.name.as_deref(), Some("*"));
        assert_eq!(raw.thread.as_deref(), Some("0"));
        assert_eq!(raw.percent.as_deref(), Some("85"));
        assert_eq!(raw.server.as_deref(), Some("pool.example:8444"));
    }

    #[test]
    fn test_absent_flags_do_not_override() {
        let cli = Cli::try_parse_from(["minerd"]).unwrap();
        assert_eq!(cli.launch_overrides(), RawParameters::default());
    }

    #[test]
    fn test_bad_percent_left_for_validation() {
        let cli = Cli::try_parse_from(["minerd", "--percent=lots"]).unwrap();
        let overrides = cli.launch_overrides();
        assert_eq!(overrides.percent.as_deref(), Some("lots"));

        let file = RawParameters {
            address: Some("A".repeat(44)),
            ..Default::default()
        };
        assert_eq!(
            validate(&file.merge(overrides), &SystemHost),
            Err(ValidationError::PercentOutOfRange)
        );
    }

    #[test]
    fn test_subcommands_are_rejected() {
        assert!(Cli::try_parse_from(["minerd", "run"]).is_err());
    }
}
