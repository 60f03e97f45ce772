//! Configuration from environment variables
//!
//! Every variable has a safe default and invalid values fall back silently;
//! a misconfigured environment must never keep the agent from starting.

use std::time::Duration;

/// Default listen port
pub const DEFAULT_PORT: u16 = 32145;
/// Default listen host; loopback is the whole point
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default lab-reader idle timeout
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Lab-reader settings
    pub proxmark: ProxmarkConfig,
}

/// Lab-reader (Proxmark3) settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxmarkConfig {
    /// Discovery enabled (`NFC_AGENT_PROXMARK3=1`)
    pub enabled: bool,
    /// Custom pm3 binary path (`NFC_AGENT_PM3_PATH`)
    pub path: Option<String>,
    /// Specific serial port (`NFC_AGENT_PM3_PORT`)
    pub port: Option<String>,
    /// Persistent subprocess mode (`NFC_AGENT_PM3_PERSISTENT`, default on)
    pub persistent: bool,
    /// Idle timeout before the subprocess is torn down
    /// (`NFC_AGENT_PM3_IDLE_TIMEOUT`; `-1` or `never` disables)
    pub idle_timeout: Option<Duration>,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn load() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through a lookup function; the testable core of
    /// [`Config::load`].
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("NFC_AGENT_PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|&p| p > 0)
            .unwrap_or(DEFAULT_PORT);

        let host = lookup("NFC_AGENT_HOST")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let proxmark = ProxmarkConfig {
            enabled: lookup("NFC_AGENT_PROXMARK3").as_deref() == Some("1"),
            path: lookup("NFC_AGENT_PM3_PATH").filter(|s| !s.is_empty()),
            port: lookup("NFC_AGENT_PM3_PORT").filter(|s| !s.is_empty()),
            persistent: lookup("NFC_AGENT_PM3_PERSISTENT").as_deref() != Some("0"),
            idle_timeout: parse_idle_timeout(lookup("NFC_AGENT_PM3_IDLE_TIMEOUT").as_deref()),
        };

        Self {
            host,
            port,
            proxmark,
        }
    }

    /// The formatted bind address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `None` disables the timeout entirely; anything unparseable falls back to
/// the default.
fn parse_idle_timeout(value: Option<&str>) -> Option<Duration> {
    match value {
        None | Some("") => Some(DEFAULT_IDLE_TIMEOUT),
        Some("-1") | Some("never") => None,
        Some(s) => Some(humantime::parse_duration(s).unwrap_or(DEFAULT_IDLE_TIMEOUT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with_vars(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = with_vars(&[]);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 32145);
        assert_eq!(cfg.address(), "127.0.0.1:32145");
        assert!(!cfg.proxmark.enabled);
        assert!(cfg.proxmark.persistent);
        assert_eq!(cfg.proxmark.idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn overrides() {
        let cfg = with_vars(&[
            ("NFC_AGENT_PORT", "18080"),
            ("NFC_AGENT_HOST", "0.0.0.0"),
            ("NFC_AGENT_PROXMARK3", "1"),
            ("NFC_AGENT_PM3_PATH", "/opt/proxmark3/pm3"),
            ("NFC_AGENT_PM3_PORT", "/dev/ttyACM0"),
            ("NFC_AGENT_PM3_PERSISTENT", "0"),
            ("NFC_AGENT_PM3_IDLE_TIMEOUT", "90s"),
        ]);
        assert_eq!(cfg.port, 18080);
        assert_eq!(cfg.host, "0.0.0.0");
        assert!(cfg.proxmark.enabled);
        assert_eq!(cfg.proxmark.path.as_deref(), Some("/opt/proxmark3/pm3"));
        assert_eq!(cfg.proxmark.port.as_deref(), Some("/dev/ttyACM0"));
        assert!(!cfg.proxmark.persistent);
        assert_eq!(cfg.proxmark.idle_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn invalid_values_fall_back_silently() {
        let cfg = with_vars(&[
            ("NFC_AGENT_PORT", "not-a-port"),
            ("NFC_AGENT_PM3_IDLE_TIMEOUT", "soon"),
        ]);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(
            cfg.proxmark.idle_timeout,
            Some(Duration::from_secs(60))
        );

        let cfg = with_vars(&[("NFC_AGENT_PORT", "0")]);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn idle_timeout_never() {
        assert_eq!(
            with_vars(&[("NFC_AGENT_PM3_IDLE_TIMEOUT", "-1")])
                .proxmark
                .idle_timeout,
            None
        );
        assert_eq!(
            with_vars(&[("NFC_AGENT_PM3_IDLE_TIMEOUT", "never")])
                .proxmark
                .idle_timeout,
            None
        );
    }

    #[test]
    fn proxmark_enable_requires_exact_value() {
        assert!(!with_vars(&[("NFC_AGENT_PROXMARK3", "true")]).proxmark.enabled);
        assert!(!with_vars(&[("NFC_AGENT_PROXMARK3", "0")]).proxmark.enabled);
        assert!(with_vars(&[("NFC_AGENT_PROXMARK3", "1")]).proxmark.enabled);
    }
}
