use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::debug;

use crate::config::SamplerConfig;

pub const AMQP_HOST: &str = "AMQP_HOST";
pub const AMQP_PORT: &str = "AMQP_PORT";
pub const AMQP_VHOST: &str = "AMQP_VHOST";
pub const AMQP_USERNAME: &str = "AMQP_USERNAME";
pub const AMQP_PASSWORD: &str = "AMQP_PASSWORD";
pub const AMQP_USE_SSL: &str = "AMQP_USE_SSL";
pub const AMQP_CONNECTION_TIMEOUT: &str = "AMQP_CONNECTION_TIMEOUT";

/// Loads `.env` if present, then applies `AMQP_*` variables over `config`.
pub fn apply_env(config: &mut SamplerConfig) -> Result<()> {
    dotenv().ok();
    apply_overrides(config, |key| env::var(key).ok())
}

/// Applies overrides from `lookup`, which maps a variable name to its value.
pub fn apply_overrides(
    config: &mut SamplerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(host) = lookup(AMQP_HOST) {
        config.host = host;
    }
    if let Some(port) = parsed(&lookup, AMQP_PORT)? {
        config.port = port;
    }
    if let Some(vhost) = lookup(AMQP_VHOST) {
        config.virtual_host = vhost;
    }
    if let Some(username) = lookup(AMQP_USERNAME) {
        config.username = username;
    }
    if let Some(password) = lookup(AMQP_PASSWORD) {
        config.password = password;
    }
    if let Some(use_ssl) = parsed(&lookup, AMQP_USE_SSL)? {
        config.use_ssl = use_ssl;
    }
    if let Some(timeout) = parsed(&lookup, AMQP_CONNECTION_TIMEOUT)? {
        config.connection_timeout = timeout;
    }
    Ok(())
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => {
            debug!(variable = key, "Applying environment override");
            raw.trim()
                .parse()
                .map(Some)
                .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
        }
        None => Ok(None),
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
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn overrides_connection_fields() {
        let mut config = SamplerConfig::default();
        apply_overrides(
            &mut config,
            lookup(&[
                (AMQP_HOST, "rabbit-a,rabbit-b"),
                (AMQP_PORT, "5673"),
                (AMQP_VHOST, "/perf"),
                (AMQP_USE_SSL, "true"),
                (AMQP_CONNECTION_TIMEOUT, "2500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.host, "rabbit-a,rabbit-b");
        assert_eq!(config.port, 5673);
        assert_eq!(config.virtual_host, "/perf");
        assert!(config.use_ssl);
        assert_eq!(config.connection_timeout, 2500);
        assert_eq!(config.username, "guest");
    }

    #[test]
    fn no_variables_leaves_config_untouched() {
        let mut config = SamplerConfig::default();
        apply_overrides(&mut config, lookup(&[])).unwrap();
        assert_eq!(config, SamplerConfig::default());
    }

    #[test]
    fn bad_number_names_the_variable() {
        let mut config = SamplerConfig::default();
        let err = apply_overrides(&mut config, lookup(&[(AMQP_PORT, "amqp")])).unwrap_err();
        assert!(err.to_string().contains(AMQP_PORT));
    }
}
