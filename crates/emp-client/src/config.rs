//! Client configuration and its environment overrides.

use std::time::Duration;

use emp_frame::FrameConfig;
use tracing::warn;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub const ENV_SERVER_ADDR: &str = "SWI_EMP_SERVER_ADDR";
pub const ENV_SERVER_PORT: &str = "SWI_EMP_SERVER_PORT";
pub const ENV_CMD_TIMEOUT: &str = "SWI_EMP_CMD_TIMEOUT";
pub const ENV_RETRY_IPC_BROKEN: &str = "SWI_EMP_RETRY_IPC_BROKEN";
pub const ENV_TIMEOUT_IPC_BROKEN: &str = "SWI_EMP_TIMEOUT_IPC_BROKEN";
pub const ENV_RETRY_RESET: &str = "SWI_EMP_RETRY_RESET";

/// Every environment variable the client reads, in documentation order.
pub const ENV_VARS: [&str; 6] = [
    ENV_SERVER_ADDR,
    ENV_SERVER_PORT,
    ENV_CMD_TIMEOUT,
    ENV_RETRY_IPC_BROKEN,
    ENV_TIMEOUT_IPC_BROKEN,
    ENV_RETRY_RESET,
];

/// How the Reader Task re-establishes a lost connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connection attempts per outage before the link is declared dead.
    pub attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
    /// `None`: every outage starts with a full budget of `attempts`.
    /// `Some(d)`: the budget is shared across outages and only refilled once
    /// the link has stayed up for `d`.
    pub budget_reset_after: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
            budget_reset_after: None,
        }
    }
}

/// Settings for one Agent connection.
#[derive(Debug, Clone)]
pub struct EmpConfig {
    pub host: String,
    pub port: u16,
    /// Default deadline of `send_and_wait`. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    pub frame: FrameConfig,
}

impl Default for EmpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            reconnect: ReconnectPolicy::default(),
            frame: FrameConfig::default(),
        }
    }
}

impl EmpConfig {
    /// Defaults overridden by the `SWI_EMP_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Values that do not parse are logged and ignored. Durations are whole
    /// seconds; a command timeout of `0` waits indefinitely.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup(ENV_SERVER_ADDR) {
            let host = host.trim();
            if host.is_empty() {
                warn!(var = ENV_SERVER_ADDR, "empty value ignored");
            } else {
                config.host = host.to_string();
            }
        }
        if let Some(port) = parsed::<u16>(&lookup, ENV_SERVER_PORT) {
            config.port = port;
        }
        if let Some(secs) = parsed::<u64>(&lookup, ENV_CMD_TIMEOUT) {
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(attempts) = parsed::<u32>(&lookup, ENV_RETRY_IPC_BROKEN) {
            config.reconnect.attempts = attempts;
        }
        if let Some(secs) = parsed::<u64>(&lookup, ENV_TIMEOUT_IPC_BROKEN) {
            config.reconnect.delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64>(&lookup, ENV_RETRY_RESET) {
            config.reconnect.budget_reset_after = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config
    }

    /// `host:port` as used for connecting and in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(var)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(var, value = %raw, error = %err, "invalid value ignored, keeping default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = EmpConfig::from_lookup(|_| None);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9999);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.reconnect.attempts, 10);
        assert_eq!(config.reconnect.delay, Duration::from_secs(3));
        assert_eq!(config.reconnect.budget_reset_after, None);
        assert_eq!(config.address(), "127.0.0.1:9999");
    }

    #[test]
    fn overrides_from_environment() {
        let config = EmpConfig::from_lookup(lookup_from(&[
            (ENV_SERVER_ADDR, "10.0.0.2"),
            (ENV_SERVER_PORT, "4242"),
            (ENV_CMD_TIMEOUT, "5"),
            (ENV_RETRY_IPC_BROKEN, "2"),
            (ENV_TIMEOUT_IPC_BROKEN, "0"),
            (ENV_RETRY_RESET, "30"),
        ]));
        assert_eq!(config.address(), "10.0.0.2:4242");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.reconnect.attempts, 2);
        assert_eq!(config.reconnect.delay, Duration::ZERO);
        assert_eq!(config.reconnect.budget_reset_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_command_timeout_waits_forever() {
        let config = EmpConfig::from_lookup(lookup_from(&[(ENV_CMD_TIMEOUT, "0")]));
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = EmpConfig::from_lookup(lookup_from(&[
            (ENV_SERVER_ADDR, "  "),
            (ENV_SERVER_PORT, "99999"),
            (ENV_CMD_TIMEOUT, "soon"),
            (ENV_RETRY_IPC_BROKEN, "-1"),
        ]));
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(config.reconnect.attempts, DEFAULT_RECONNECT_ATTEMPTS);
    }
}
