//! Connection and engine configuration

use crate::error::{Error, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Distinguished name of the mailbox owner, sent with `Connect` and
    /// used as the ESSDN of the logon.
    pub user_dn: String,
    pub username: String,
    pub password: String,
}

impl ConnectionConfig {
    /// Load connection configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `ROP_USER_DN`
    /// - `ROP_USERNAME`
    /// - `ROP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `ROP_HOST` (default: `127.0.0.1`)
    /// - `ROP_PORT` (default: `6001`)
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a required variable is missing or the
    /// port does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ConnectionConfig::from_env`].
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required =
            |name: &str| var(name).ok_or_else(|| Error::Config(format!("{name} not set")));
        Ok(Self {
            host: var("ROP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&var, "ROP_PORT", 6001)?,
            user_dn: required("ROP_USER_DN")?,
            username: required("ROP_USERNAME")?,
            password: required("ROP_PASSWORD")?,
        })
    }
}

/// Tunables for the dispatcher, notification engine and retry policy.
///
/// The push interval and async-wait cap are defaults observed on real
/// servers, not protocol minimums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub retry_count: u32,
    /// Pause before each notification drain attempt.
    pub sleep_time: Duration,
    /// Pause between retries of a transient failure.
    pub wait_time: Duration,
    /// Longest the server may hold an `AsyncWait` open.
    pub async_wait_max: Duration,
    pub timing_deviation: Duration,
    pub push_interval: Duration,
    /// How long a push listener waits for one datagram.
    pub push_timeout: Duration,
    pub max_response_size: u32,
    pub drain_response_size: u32,
    pub max_drain_rounds: u32,
    pub obfuscate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_count: 10,
            sleep_time: Duration::from_millis(1000),
            wait_time: Duration::from_millis(1000),
            async_wait_max: Duration::from_secs(300),
            timing_deviation: Duration::from_millis(3000),
            push_interval: Duration::from_secs(60),
            push_timeout: Duration::from_millis(5000),
            max_response_size: 0x0001_0008,
            drain_response_size: 0xC350,
            max_drain_rounds: 64,
            obfuscate: false,
        }
    }
}

impl EngineConfig {
    /// Names accepted by [`EngineConfig::get`], in display order.
    pub const NAMES: [&'static str; 11] = [
        "RetryCount",
        "SleepTime",
        "WaitTime",
        "AsyncWaitMax",
        "TimingDeviation",
        "PushInterval",
        "PushNotificationTimeout",
        "MaxResponseSize",
        "DrainResponseSize",
        "MaxDrainRounds",
        "Obfuscate",
    ];

    /// Load engine tunables from environment variables
    ///
    /// Reads from `.env` file if present. Every variable is optional:
    /// - `ROP_RETRY_COUNT` (default: `10`)
    /// - `ROP_SLEEP_TIME_MS` (default: `1000`)
    /// - `ROP_WAIT_TIME_MS` (default: `1000`)
    /// - `ROP_ASYNC_WAIT_MAX_SECS` (default: `300`)
    /// - `ROP_TIMING_DEVIATION_MS` (default: `3000`)
    /// - `ROP_PUSH_INTERVAL_SECS` (default: `60`)
    /// - `ROP_PUSH_TIMEOUT_MS` (default: `5000`)
    /// - `ROP_MAX_RESPONSE_SIZE` (default: `0x10008`)
    /// - `ROP_DRAIN_RESPONSE_SIZE` (default: `0xC350`)
    /// - `ROP_MAX_DRAIN_ROUNDS` (default: `64`)
    /// - `ROP_OBFUSCATE` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a value does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_env`].
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| -> Result<Duration> {
            let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
            parse_var(&var, name, default).map(Duration::from_millis)
        };
        let secs = |name: &str, default: Duration| -> Result<Duration> {
            parse_var(&var, name, default.as_secs()).map(Duration::from_secs)
        };
        let size = |name: &str, default: u32| -> Result<u32> {
            var(name).map_or(Ok(default), |raw| {
                parse_size(&raw).map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
            })
        };

        Ok(Self {
            retry_count: parse_var(&var, "ROP_RETRY_COUNT", defaults.retry_count)?,
            sleep_time: millis("ROP_SLEEP_TIME_MS", defaults.sleep_time)?,
            wait_time: millis("ROP_WAIT_TIME_MS", defaults.wait_time)?,
            async_wait_max: secs("ROP_ASYNC_WAIT_MAX_SECS", defaults.async_wait_max)?,
            timing_deviation: millis("ROP_TIMING_DEVIATION_MS", defaults.timing_deviation)?,
            push_interval: secs("ROP_PUSH_INTERVAL_SECS", defaults.push_interval)?,
            push_timeout: millis("ROP_PUSH_TIMEOUT_MS", defaults.push_timeout)?,
            max_response_size: size("ROP_MAX_RESPONSE_SIZE", defaults.max_response_size)?,
            drain_response_size: size("ROP_DRAIN_RESPONSE_SIZE", defaults.drain_response_size)?,
            max_drain_rounds: parse_var(&var, "ROP_MAX_DRAIN_ROUNDS", defaults.max_drain_rounds)?,
            obfuscate: parse_var(&var, "ROP_OBFUSCATE", defaults.obfuscate)?,
        })
    }

    /// Look up a tunable by name. Durations are reported in the unit of
    /// their environment variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        Some(match name {
            "RetryCount" => self.retry_count.to_string(),
            "SleepTime" => self.sleep_time.as_millis().to_string(),
            "WaitTime" => self.wait_time.as_millis().to_string(),
            "AsyncWaitMax" => self.async_wait_max.as_secs().to_string(),
            "TimingDeviation" => self.timing_deviation.as_millis().to_string(),
            "PushInterval" => self.push_interval.as_secs().to_string(),
            "PushNotificationTimeout" => self.push_timeout.as_millis().to_string(),
            "MaxResponseSize" => self.max_response_size.to_string(),
            "DrainResponseSize" => self.drain_response_size.to_string(),
            "MaxDrainRounds" => self.max_drain_rounds.to_string(),
            "Obfuscate" => self.obfuscate.to_string(),
            _ => return None,
        })
    }

    /// Upper bound on a single `AsyncWait` as seen by the client.
    #[must_use]
    pub fn async_wait_guard(&self) -> Duration {
        self.async_wait_max.saturating_add(self.timing_deviation)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    var(name).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
    })
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_size(raw: &str) -> std::result::Result<u32, std::num::ParseIntError> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    }
}
