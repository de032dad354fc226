//! # Configuration
//!
//! Purpose: Plain settings structures for the pool and the TCP dialer, plus
//! loaders that read them from environment variables.
//!
//! ## Design Principles
//! 1. **Plain Data**: Settings are `Clone + Default` structs, deserializable
//!    with serde; the library never reads files itself.
//! 2. **Prefix Fallback**: `{PREFIX}_REDIS_*` wins over the shared `REDIS_*`
//!    variable, which wins over the built-in default.
//! 3. **Lenient Parsing**: Unparsable values fall back to the default instead
//!    of failing startup.
//!
//! ## Environment Variables
//!
//! | Setting | Variables (first non-empty wins) | Default |
//! |---|---|---|
//! | `max_active` | `{P}_REDIS_ACTIVE_POOL_SIZE`, `REDIS_ACTIVE_POOL_SIZE` | 0 |
//! | `max_idle` | `{P}_REDIS_IDLE_POOL_SIZE`, `REDIS_IDLE_POOL_SIZE`, `REDIS_POOL_SIZE` | 8 |
//! | `idle_timeout` | `{P}_REDIS_POOL_TIMEOUT`, `REDIS_POOL_IDLE_TIMEOUT`, `REDIS_POOL_TIMEOUT` | 0 |
//! | `check_frequency` | `{P}_REDIS_POOL_CHECK_TIMEOUT`, `REDIS_POOL_CHECK_TIMEOUT` | 0 |
//! | `address` | `{P}_REDIS_ADDRESS`, else `{P}_REDIS_SERVICE_HOST`:`{P}_REDIS_SERVICE_PORT` | `localhost:6379` |
//! | `timeout` and friends | `{P}_REDIS_<NAME>`, `REDIS_<NAME>` | 0 |
//! | `database` | `{P}_REDIS_DATABASE` | 0 |
//! | `password` | `{P}_REDIS_PASSWORD` | none |
//! | `sentinel_addresses` | `{P}_REDIS_SENTINEL_ADDRESSES` (comma separated) | none |
//! | `master_name` | `{P}_REDIS_SENTINEL_MASTER_NAME`, `REDIS_SENTINEL_MASTER_NAME` | `mymaster` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default number of idle connections kept by the pool.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default Sentinel master name.
pub const DEFAULT_MASTER_NAME: &str = "mymaster";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: &str = "6379";

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Idle connections kept for reuse. `0` keeps none.
    pub max_idle: usize,
    /// Open connections allowed at once (idle + in use). `0` means unbounded.
    pub max_active: usize,
    /// Idle connections older than this are closed instead of reused. `0` disables.
    #[serde(with = "humanized")]
    pub idle_timeout: Duration,
    /// Block in `acquire` when `max_active` is reached instead of failing.
    pub wait_on_exhaustion: bool,
    /// Minimum idle time before a borrowed connection is checked with PING. `0` disables.
    #[serde(with = "humanized")]
    pub check_frequency: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_idle: DEFAULT_POOL_SIZE,
            max_active: 0,
            idle_timeout: Duration::ZERO,
            wait_on_exhaustion: true,
            check_frequency: Duration::ZERO,
        }
    }
}

impl PoolSettings {
    /// Reads pool settings from the process environment.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Reads pool settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { prefix, lookup };
        let defaults = PoolSettings::default();
        PoolSettings {
            max_idle: env
                .parsed(
                    &["IDLE_POOL_SIZE"],
                    &["REDIS_IDLE_POOL_SIZE", "REDIS_POOL_SIZE"],
                    |value| value.parse().ok(),
                )
                .unwrap_or(defaults.max_idle),
            max_active: env
                .parsed(&["ACTIVE_POOL_SIZE"], &["REDIS_ACTIVE_POOL_SIZE"], |value| {
                    value.parse().ok()
                })
                .unwrap_or(defaults.max_active),
            idle_timeout: env
                .parsed(
                    &["POOL_TIMEOUT"],
                    &["REDIS_POOL_IDLE_TIMEOUT", "REDIS_POOL_TIMEOUT"],
                    parse_duration,
                )
                .unwrap_or(defaults.idle_timeout),
            wait_on_exhaustion: defaults.wait_on_exhaustion,
            check_frequency: env
                .parsed(&["POOL_CHECK_TIMEOUT"], &["REDIS_POOL_CHECK_TIMEOUT"], parse_duration)
                .unwrap_or(defaults.check_frequency),
        }
    }
}

/// Settings for dialing TCP connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server address, e.g. "127.0.0.1:6379". Ignored when Sentinel addresses are set.
    pub address: String,
    /// Common timeout used when a specific one is zero.
    #[serde(with = "humanized")]
    pub timeout: Duration,
    #[serde(with = "humanized")]
    pub connect_timeout: Duration,
    #[serde(with = "humanized")]
    pub read_timeout: Duration,
    #[serde(with = "humanized")]
    pub write_timeout: Duration,
    /// Logical database selected after connecting.
    pub database: u32,
    /// Password sent with AUTH after connecting.
    pub password: Option<String>,
    /// Sentinel nodes used to discover the master address.
    pub sentinel_addresses: Vec<String>,
    /// Master name monitored by Sentinel.
    pub master_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            address: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            timeout: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            database: 0,
            password: None,
            sentinel_addresses: Vec::new(),
            master_name: DEFAULT_MASTER_NAME.to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Reads connection settings from the process environment.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Reads connection settings through `lookup`.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { prefix, lookup };
        let timeout = |name: &str, shared: &str| {
            env.parsed(&[name], &[shared], parse_duration)
                .unwrap_or(Duration::ZERO)
        };

        let address = env.first(&["ADDRESS"], &[]).unwrap_or_else(|| {
            let host = env.first(&["SERVICE_HOST"], &[]).unwrap_or_else(|| DEFAULT_HOST.to_string());
            let port = env.first(&["SERVICE_PORT"], &[]).unwrap_or_else(|| DEFAULT_PORT.to_string());
            join_host_port(&host, &port)
        });

        ConnectionConfig {
            address,
            timeout: timeout("TIMEOUT", "REDIS_TIMEOUT"),
            connect_timeout: timeout("CONNECT_TIMEOUT", "REDIS_CONNECT_TIMEOUT"),
            read_timeout: timeout("READ_TIMEOUT", "REDIS_READ_TIMEOUT"),
            write_timeout: timeout("WRITE_TIMEOUT", "REDIS_WRITE_TIMEOUT"),
            database: env
                .parsed(&["DATABASE"], &[], |value| value.parse().ok())
                .unwrap_or(0),
            password: env.first(&["PASSWORD"], &[]),
            sentinel_addresses: env
                .first(&["SENTINEL_ADDRESSES"], &[])
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|addr| !addr.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            master_name: env
                .first(&["SENTINEL_MASTER_NAME"], &["REDIS_SENTINEL_MASTER_NAME"])
                .unwrap_or_else(|| DEFAULT_MASTER_NAME.to_string()),
        }
    }

    /// Connect timeout, or `None` to block until the OS gives up.
    pub fn effective_connect_timeout(&self) -> Option<Duration> {
        non_zero(fallback(self.connect_timeout, self.timeout))
    }

    /// Read timeout, or `None` for blocking reads.
    pub fn effective_read_timeout(&self) -> Option<Duration> {
        non_zero(fallback(self.read_timeout, self.timeout))
    }

    /// Write timeout, or `None` for blocking writes.
    pub fn effective_write_timeout(&self) -> Option<Duration> {
        non_zero(fallback(self.write_timeout, self.timeout))
    }

    /// Returns true when the master address comes from Sentinel.
    pub fn uses_sentinel(&self) -> bool {
        !self.sentinel_addresses.is_empty()
    }
}

struct Env<'a, F> {
    prefix: &'a str,
    lookup: F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Tries `{prefix}_REDIS_{name}` for each prefixed name, then each shared name.
    fn first(&self, prefixed: &[&str], shared: &[&str]) -> Option<String> {
        let prefixed = prefixed
            .iter()
            .filter(|_| !self.prefix.is_empty())
            .map(|name| format!("{}_REDIS_{}", self.prefix, name));
        let shared = shared.iter().map(|name| name.to_string());

        prefixed
            .chain(shared)
            .filter_map(|name| (self.lookup)(&name))
            .find(|value| !value.is_empty())
    }

    /// Like `first`, but parses the value. A value that does not parse is
    /// reported and treated as unset.
    fn parsed<T, P>(&self, prefixed: &[&str], shared: &[&str], parse: P) -> Option<T>
    where
        P: Fn(&str) -> Option<T>,
    {
        let value = self.first(prefixed, shared)?;
        let parsed = parse(&value);
        if parsed.is_none() {
            let setting = prefixed.first().or(shared.first()).copied().unwrap_or_default();
            warn!(prefix = self.prefix, setting, value = %value, "ignoring unparsable setting");
        }
        parsed
    }
}

fn fallback(specific: Duration, common: Duration) -> Duration {
    if specific.is_zero() {
        common
    } else {
        specific
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Joins host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Parses duration strings such as `"250ms"`, `"1s"` or `"5m"`.
///
/// Supported units: `ns`, `us`, `ms`, `s`, `m`, `h`. A bare `"0"` is zero.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let mut rest = s.trim();
    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    // Sequence of decimal numbers with units, e.g. "1h30m" or "1.5s".
    let mut nanos: u128 = 0;
    while !rest.is_empty() {
        let (whole, tail) = split_digits(rest);
        let (fraction, tail) = match tail.strip_prefix('.') {
            Some(tail) => split_digits(tail),
            None => ("", tail),
        };
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return None,
        };

        if !whole.is_empty() {
            let whole: u128 = whole.parse().ok()?;
            nanos = nanos.checked_add(whole.checked_mul(scale)?)?;
        }
        if !fraction.is_empty() {
            // digits past 18 cannot move the result below one nanosecond
            let fraction = &fraction[..fraction.len().min(18)];
            let numerator: u128 = fraction.parse().ok()?;
            nanos = nanos.checked_add(numerator * scale / 10u128.pow(fraction.len() as u32))?;
        }
        rest = tail;
    }

    let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
    Some(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

/// Formats a duration with the largest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }

    const UNITS: [(&str, u128); 6] = [
        ("h", 3_600_000_000_000),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];
    UNITS
        .iter()
        .find(|(_, size)| nanos % size == 0)
        .map(|(unit, size)| format!("{}{}", nanos / size, unit))
        .unwrap_or_else(|| format!("{nanos}ns"))
}

/// Serde adapter storing durations as strings like `"10ms"`.
mod humanized {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).ok_or_else(|| D::Error::custom(format!("invalid duration: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("10ms"), Some(Duration::from_millis(10)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("15us"), Some(Duration::from_micros(15)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("ms"), None);
        assert_eq!(parse_duration("3d"), None);
    }

    #[test]
    fn parses_compound_and_fractional_durations() {
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("1h0m0.25s"), Some(Duration::from_millis(3_600_250)));
        assert_eq!(parse_duration(".5ms"), Some(Duration::from_micros(500)));
        assert_eq!(parse_duration("2m10"), None);
        assert_eq!(parse_duration("1.s5"), None);
        assert_eq!(parse_duration("-1s"), None);
    }

    #[test]
    fn compound_durations_load_from_env() {
        let settings = PoolSettings::from_lookup("", lookup(&[("REDIS_POOL_TIMEOUT", "1m30s")]));
        assert_eq!(settings.idle_timeout, Duration::from_secs(90));
    }

    #[test]
    fn formats_durations_with_exact_unit() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(10)), "10ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    }

    #[test]
    fn pool_defaults_without_env() {
        let settings = PoolSettings::from_lookup("TEST", lookup(&[]));
        assert_eq!(settings, PoolSettings::default());
        assert_eq!(settings.max_idle, DEFAULT_POOL_SIZE);
        assert_eq!(settings.max_active, 0);
        assert!(settings.wait_on_exhaustion);
    }

    #[test]
    fn pool_shared_variables_apply() {
        let settings = PoolSettings::from_lookup(
            "TEST",
            lookup(&[
                ("REDIS_POOL_SIZE", "3"),
                ("REDIS_ACTIVE_POOL_SIZE", "10"),
                ("REDIS_POOL_TIMEOUT", "1s"),
                ("REDIS_POOL_CHECK_TIMEOUT", "1s"),
            ]),
        );
        assert_eq!(settings.max_idle, 3);
        assert_eq!(settings.max_active, 10);
        assert_eq!(settings.idle_timeout, Duration::from_secs(1));
        assert_eq!(settings.check_frequency, Duration::from_secs(1));
    }

    #[test]
    fn prefixed_variables_win() {
        let settings = PoolSettings::from_lookup(
            "TEST",
            lookup(&[
                ("REDIS_IDLE_POOL_SIZE", "10"),
                ("TEST_REDIS_IDLE_POOL_SIZE", "20"),
                ("REDIS_ACTIVE_POOL_SIZE", "10"),
                ("TEST_REDIS_ACTIVE_POOL_SIZE", "20"),
                ("REDIS_POOL_TIMEOUT", "1s"),
                ("TEST_REDIS_POOL_TIMEOUT", "2s"),
                ("REDIS_POOL_CHECK_TIMEOUT", "1s"),
                ("TEST_REDIS_POOL_CHECK_TIMEOUT", "2s"),
            ]),
        );
        assert_eq!(settings.max_idle, 20);
        assert_eq!(settings.max_active, 20);
        assert_eq!(settings.idle_timeout, Duration::from_secs(2));
        assert_eq!(settings.check_frequency, Duration::from_secs(2));
    }

    #[test]
    fn empty_and_invalid_values_fall_back() {
        let settings = PoolSettings::from_lookup(
            "TEST",
            lookup(&[
                ("TEST_REDIS_IDLE_POOL_SIZE", ""),
                ("REDIS_IDLE_POOL_SIZE", "4"),
                ("REDIS_ACTIVE_POOL_SIZE", "many"),
                ("REDIS_POOL_TIMEOUT", "soon"),
            ]),
        );
        assert_eq!(settings.max_idle, 4);
        assert_eq!(settings.max_active, 0);
        assert_eq!(settings.idle_timeout, Duration::ZERO);
    }

    #[test]
    fn connection_address_from_host_and_port() {
        let config = ConnectionConfig::from_lookup("APP", lookup(&[]));
        assert_eq!(config.address, "localhost:6379");

        let config = ConnectionConfig::from_lookup(
            "APP",
            lookup(&[("APP_REDIS_SERVICE_HOST", "10.0.0.1"), ("APP_REDIS_SERVICE_PORT", "6380")]),
        );
        assert_eq!(config.address, "10.0.0.1:6380");

        let config = ConnectionConfig::from_lookup(
            "APP",
            lookup(&[("APP_REDIS_ADDRESS", "cache:7000"), ("APP_REDIS_SERVICE_HOST", "ignored")]),
        );
        assert_eq!(config.address, "cache:7000");
    }

    #[test]
    fn specific_timeouts_fall_back_to_common() {
        let config = ConnectionConfig::from_lookup(
            "APP",
            lookup(&[("REDIS_TIMEOUT", "2s"), ("APP_REDIS_READ_TIMEOUT", "500ms")]),
        );
        assert_eq!(config.effective_connect_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.effective_read_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.effective_write_timeout(), Some(Duration::from_secs(2)));

        let config = ConnectionConfig::default();
        assert_eq!(config.effective_read_timeout(), None);
    }

    #[test]
    fn sentinel_and_auth_settings() {
        let config = ConnectionConfig::from_lookup(
            "APP",
            lookup(&[
                ("APP_REDIS_SENTINEL_ADDRESSES", "10.0.0.1:26379, 10.0.0.2:26379"),
                ("REDIS_SENTINEL_MASTER_NAME", "cache"),
                ("APP_REDIS_PASSWORD", "secret"),
                ("APP_REDIS_DATABASE", "3"),
            ]),
        );
        assert!(config.uses_sentinel());
        assert_eq!(config.sentinel_addresses, vec!["10.0.0.1:26379", "10.0.0.2:26379"]);
        assert_eq!(config.master_name, "cache");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.database, 3);
    }

    #[test]
    fn joins_ipv6_hosts() {
        assert_eq!(join_host_port("::1", "6379"), "[::1]:6379");
    }

    #[test]
    fn settings_deserialize_from_json() {
        let settings: PoolSettings = serde_json::from_str(
            r#"{"max_idle": 2, "max_active": 4, "check_frequency": "10ms", "wait_on_exhaustion": false}"#,
        )
        .unwrap();
        assert_eq!(settings.max_idle, 2);
        assert_eq!(settings.max_active, 4);
        assert_eq!(settings.check_frequency, Duration::from_millis(10));
        assert_eq!(settings.idle_timeout, Duration::ZERO);
        assert!(!settings.wait_on_exhaustion);

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["check_frequency"], "10ms");
        assert_eq!(json["idle_timeout"], "0s");
    }

    #[test]
    fn invalid_duration_is_rejected_by_serde() {
        let result: Result<PoolSettings, _> = serde_json::from_str(r#"{"idle_timeout": "later"}"#);
        assert!(result.is_err());
    }
}
