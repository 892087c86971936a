//! Launch parameter validation
//!
//! Turns the merged, unvalidated launch values into a [`LaunchParameters`]
//! the worker can be built from. Missing thread counts and display names are
//! derived from the host and logged as warnings; everything else that is out
//! of bounds is rejected with a single [`ValidationError`].

use serde::Deserialize;
use std::num::IntErrorKind;
use thiserror::Error;
use tracing::warn;

use crate::host::{fingerprint, HostEnvironment};

/// Hard upper bound on worker threads
pub const MAX_THREADS: u32 = 128;

/// Required payout address length in characters
pub const ADDRESS_LEN: usize = 44;

/// Maximum display name length in characters
pub const MAX_NAME_LEN: usize = 200;

/// Allowed throttle range, inclusive
pub const PERCENT_RANGE: std::ops::RangeInclusive<f64> = 50.0..=100.0;

/// Throttle used when none is configured
pub const DEFAULT_PERCENT: f64 = 100.0;

/// Display name placeholder meaning "derive from host"
pub const NAME_WILDCARD: &str = "*";

/// Reasons a set of launch values is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Usage: minerd --address=<address> [--name=<name>] [--thread=<thread>] [--server=<server>] [--percent=<percent>]")]
    MissingAddress,

    #[error("Error: thread too large")]
    ThreadCountTooLarge,

    #[error("Error: thread too small")]
    ThreadCountTooSmall,

    #[error("Error: address format error")]
    AddressFormatInvalid,

    #[error("Error: name too long")]
    NameTooLong,

    #[error("Error: percent need between 50 to 100")]
    PercentOutOfRange,
}

/// Launch values as supplied by the operator, before validation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawParameters {
    /// Coordination server endpoint (worker default when unset)
    #[serde(default)]
    pub server: Option<String>,
    /// Payout address
    #[serde(default)]
    pub address: Option<String>,
    /// Display name; `*` or unset derives one from the host
    #[serde(default)]
    pub name: Option<String>,
    /// Thread count as written; zero or non-numeric derives one from the host
    #[serde(default)]
    pub thread: Option<String>,
    /// Throttle percentage as written; unset or empty means full speed
    #[serde(default)]
    pub percent: Option<String>,
}

impl RawParameters {
    /// Overlay `overrides` on top of `self`, field by field
    pub fn merge(self, overrides: RawParameters) -> RawParameters {
        RawParameters {
            server: overrides.server.or(self.server),
            address: overrides.address.or(self.address),
            name: overrides.name.or(self.name),
            thread: overrides.thread.or(self.thread),
            percent: overrides.percent.or(self.percent),
        }
    }
}

/// A fully validated set of launch parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParameters {
    server: Option<String>,
    address: String,
    name: String,
    thread: u32,
    percent: f64,
}

impl LaunchParameters {
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread(&self) -> u32 {
        self.thread
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }
}

/// Validate raw launch values against the host
///
/// Rules are applied in a fixed order and the first failure is returned:
/// missing address, thread derivation and clamping, thread bounds, address
/// length, name length, then throttle range.
///
/// # Arguments
/// * `raw` - merged config file and command line values
/// * `host` - host facts used for derived defaults
pub fn validate<H: HostEnvironment + ?Sized>(
    raw: &RawParameters,
    host: &H,
) -> Result<LaunchParameters, ValidationError> {
    let address = match raw.address.as_deref() {
        Some(address) if !address.is_empty() => address.to_string(),
        _ => return Err(ValidationError::MissingAddress),
    };

    let max_thread = host.available_parallelism().max(1) as i64;
    let mut thread = match parse_thread(raw.thread.as_deref()) {
        Some(thread) => thread,
        None => {
            let derived = (max_thread - 1).max(1);
            warn!("auto set thread to {}", derived);
            derived
        }
    };

    if thread > max_thread {
        warn!(
            "thread {} larger than CPU threads {}, force thread to {}",
            thread, max_thread, max_thread
        );
        thread = max_thread;
    }

    if thread > i64::from(MAX_THREADS) {
        return Err(ValidationError::ThreadCountTooLarge);
    }
    if thread < 1 {
        return Err(ValidationError::ThreadCountTooSmall);
    }

    if address.chars().count() != ADDRESS_LEN {
        return Err(ValidationError::AddressFormatInvalid);
    }

    let name = match raw.name.as_deref() {
        Some(name) if !name.is_empty() && name != NAME_WILDCARD => name.to_string(),
        _ => {
            let derived = fingerprint(host);
            warn!("auto set name to {}", derived);
            derived
        }
    };
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong);
    }

    let percent = parse_percent(raw.percent.as_deref())?;

    Ok(LaunchParameters {
        server: raw.server.clone().filter(|s| !s.is_empty()),
        address,
        name,
        // Bounded to 1..=MAX_THREADS above
        thread: thread as u32,
        percent,
    })
}

/// Parse a thread count; `None` means "derive one" (absent, zero or not an integer)
fn parse_thread(raw: Option<&str>) -> Option<i64> {
    match raw?.trim().parse::<i64>() {
        Ok(0) => None,
        Ok(thread) => Some(thread),
        // Out-of-range integers are still integers; the bound checks reject them
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Some(i64::MAX),
        Err(e) if *e.kind() == IntErrorKind::NegOverflow => Some(i64::MIN),
        Err(_) => None,
    }
}

/// Parse the throttle; anything that is not a number in range is rejected
fn parse_percent(raw: Option<&str>) -> Result<f64, ValidationError> {
    let percent = match raw.map(str::trim) {
        None | Some("") => DEFAULT_PERCENT,
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| ValidationError::PercentOutOfRange)?,
    };
    if !PERCENT_RANGE.contains(&percent) {
        return Err(ValidationError::PercentOutOfRange);
    }
    Ok(percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockHostEnvironment;
    use std::net::{IpAddr, Ipv4Addr};

    fn host(parallelism: usize) -> MockHostEnvironment {
        let mut host = MockHostEnvironment::new();
        host.expect_available_parallelism()
            .return_const(parallelism);
        host.expect_local_address()
            .returning(|| IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        host.expect_platform().returning(|| "linux".to_string());
        host.expect_arch().returning(|| "x86_64".to_string());
        host.expect_release().returning(|| "6.8.0".to_string());
        host
    }

    fn raw() -> RawParameters {
        RawParameters {
            server: None,
            address: Some("A".repeat(ADDRESS_LEN)),
            name: Some("rig-01".to_string()),
            thread: Some("4".to_string()),
            percent: Some("80".to_string()),
        }
    }

    #[test]
    fn test_valid_parameters_pass_through() {
        let params = validate(&raw(), &host(8)).unwrap();
        assert_eq!(params.address(), "A".repeat(ADDRESS_LEN));
        assert_eq!(params.name(), "rig-01");
        assert_eq!(params.thread(), 4);
        assert_eq!(params.percent(), 80.0);
        assert_eq!(params.server(), None);
    }

    #[test]
    fn test_missing_address_is_rejected_first() {
        let mut input = raw();
        input.address = None;
        input.thread = Some("500".to_string());
        assert_eq!(validate(&input, &host(8)), Err(ValidationError::MissingAddress));

        input.address = Some(String::new());
        assert_eq!(validate(&input, &host(8)), Err(ValidationError::MissingAddress));
    }

    #[test]
    fn test_thread_derived_from_parallelism() {
        for thread in [None, Some("0"), Some("abc"), Some("2.5")] {
            let mut input = raw();
            input.thread = thread.map(str::to_string);
            assert_eq!(validate(&input, &host(8)).unwrap().thread(), 7);
            assert_eq!(validate(&input, &host(1)).unwrap().thread(), 1);
        }
    }

    #[test]
    fn test_thread_clamped_to_parallelism() {
        let mut input = raw();
        input.thread = Some("64".to_string());
        assert_eq!(validate(&input, &host(16)).unwrap().thread(), 16);
    }

    #[test]
    fn test_thread_too_large_regardless_of_other_fields() {
        let mut input = raw();
        input.thread = Some("200".to_string());
        input.address = Some("short".to_string());
        input.percent = Some("10.0".to_string());
        assert_eq!(
            validate(&input, &host(256)),
            Err(ValidationError::ThreadCountTooLarge)
        );
    }

    #[test]
    fn test_negative_thread_too_small() {
        let mut input = raw();
        input.thread = Some("-3".to_string());
        assert_eq!(
            validate(&input, &host(8)),
            Err(ValidationError::ThreadCountTooSmall)
        );
    }

    #[test]
    fn test_address_length_must_be_exact() {
        for len in [0usize, 1, 43, 45, 88] {
            let mut input = raw();
            input.address = Some("N".repeat(len));
            let expected = if len == 0 {
                ValidationError::MissingAddress
            } else {
                ValidationError::AddressFormatInvalid
            };
            assert_eq!(validate(&input, &host(8)), Err(expected), "len {len}");
        }
    }

    #[test]
    fn test_name_too_long() {
        let mut input = raw();
        input.name = Some("x".repeat(MAX_NAME_LEN));
        assert!(validate(&input, &host(8)).is_ok());

        input.name = Some("x".repeat(MAX_NAME_LEN + 1));
        assert_eq!(validate(&input, &host(8)), Err(ValidationError::NameTooLong));
    }

    #[test]
    fn test_name_derived_from_host() {
        for name in [None, Some("*")] {
            let mut input = raw();
            input.name = name.map(str::to_string);
            let params = validate(&input, &host(8)).unwrap();
            assert_eq!(params.name(), "10.0.0.7 linux x86_64 6.8.0");
        }
    }

    #[test]
    fn test_percent_bounds() {
        for (percent, ok) in [
            ("50", true),
            ("100", true),
            (" 75.5 ", true),
            ("49.99", false),
            ("100.01", false),
            ("0", false),
            ("NaN", false),
            ("lots", false),
            ("85%", false),
        ] {
            let mut input = raw();
            input.percent = Some(percent.to_string());
            let result = validate(&input, &host(8));
            if ok {
                assert!(result.is_ok(), "percent {percent}");
            } else {
                assert_eq!(result, Err(ValidationError::PercentOutOfRange), "percent {percent}");
            }
        }
    }

    #[test]
    fn test_percent_defaults_to_full() {
        let mut input = raw();
        input.percent = None;
        assert_eq!(validate(&input, &host(8)).unwrap().percent(), DEFAULT_PERCENT);

        input.percent = Some(String::new());
        assert_eq!(validate(&input, &host(8)).unwrap().percent(), DEFAULT_PERCENT);
    }

    #[test]
    fn test_overflowing_thread_is_clamped_not_derived() {
        let mut input = raw();
        input.thread = Some("99999999999999999999".to_string());
        assert_eq!(validate(&input, &host(8)).unwrap().thread(), 8);
        assert_eq!(
            validate(&input, &host(256)),
            Err(ValidationError::ThreadCountTooLarge)
        );

        input.thread = Some("-99999999999999999999".to_string());
        assert_eq!(
            validate(&input, &host(8)),
            Err(ValidationError::ThreadCountTooSmall)
        );
    }

    #[test]
    fn test_merge_prefers_overrides_field_by_field() {
        let file = RawParameters {
            server: Some("wss://pool.example:8443".to_string()),
            address: Some("file-address".to_string()),
            name: Some("file-name".to_string()),
            thread: Some("2".to_string()),
            percent: Some("60".to_string()),
        };
        let cli = RawParameters {
            address: Some("cli-address".to_string()),
            thread: Some("6".to_string()),
            ..Default::default()
        };

        let merged = file.merge(cli);
        assert_eq!(merged.server.as_deref(), Some("wss://pool.example:8443"));
        assert_eq!(merged.address.as_deref(), Some("cli-address"));
        assert_eq!(merged.name.as_deref(), Some("file-name"));
        assert_eq!(merged.thread.as_deref(), Some("6"));
        assert_eq!(merged.percent.as_deref(), Some("60"));
    }
}
