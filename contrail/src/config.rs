use std::time::Duration;

/// Default upstream when `--target` is not given.
pub const DEFAULT_TARGET_URL: &str = "https://api.openai.com";

/// Tunables the CLI does not expose as flags. Everything here has a sane
/// default and an environment override.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Time allowed for the TCP/TLS connection to the upstream
    pub connect_timeout: Duration,
    /// Idle time allowed between upstream bytes before the call is abandoned
    pub read_timeout: Duration,
}

impl ProxyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            connect_timeout: Duration::from_secs(env_parse(
                "CONTRAIL_CONNECT_TIMEOUT_SECS",
                30,
            )?),
            read_timeout: Duration::from_secs(env_parse("CONTRAIL_READ_TIMEOUT_SECS", 300)?),
        })
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_env_free_load() {
        let config = ProxyConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(300));
    }
}
