//! Process configuration read from the environment at startup

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SYSTEM_PROMPT: &str =
    "Hello, I'm Shelli; I (actually) run The Splunk T-Shirt Company. AMA";

#[derive(Debug, Error)]
#[error("invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub openai_api_key: Option<String>,
    /// Base URL of an `OpenAI`-compatible API, without the `/chat/completions` suffix
    pub openai_base_url: String,
    pub default_model: String,
    /// Models offered in the page's selector
    pub models: Vec<String>,
    pub temperature: f64,
    pub top_p: f64,
    pub system_prompt: String,
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub pending_span_ttl: Duration,
    pub session_idle_ttl: Duration,
    pub sweep_interval: Duration,
    /// Capacity of the relay channel between provider and client
    pub stream_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-3.5-turbo".to_string(),
            models: vec![
                "gpt-3.5-turbo".to_string(),
                "gpt-4o-mini".to_string(),
                "gpt-4o".to_string(),
            ],
            temperature: 2.0,
            top_p: 1.0,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            service_name: "splunk-shelli".to_string(),
            otlp_endpoint: None,
            pending_span_ttl: Duration::from_secs(900),
            session_idle_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            stream_buffer: 32,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup. Unset or blank
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let models = get("SHELLI_MODELS").map_or(defaults.models, |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect()
        });

        Ok(Self {
            port: parse_or("SHELLI_PORT", get("SHELLI_PORT"), defaults.port)?,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            default_model: get("SHELLI_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            models,
            temperature: parse_or(
                "SHELLI_TEMPERATURE",
                get("SHELLI_TEMPERATURE"),
                defaults.temperature,
            )?,
            top_p: parse_or("SHELLI_TOP_P", get("SHELLI_TOP_P"), defaults.top_p)?,
            system_prompt: get("SHELLI_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            service_name: get("SHELLI_SERVICE_NAME").unwrap_or(defaults.service_name),
            otlp_endpoint: get("SHELLI_OTLP_ENDPOINT")
                .map(|url| url.trim_end_matches('/').to_string()),
            pending_span_ttl: secs_or(
                "SHELLI_PENDING_SPAN_TTL_SECS",
                get("SHELLI_PENDING_SPAN_TTL_SECS"),
                defaults.pending_span_ttl,
            )?,
            session_idle_ttl: secs_or(
                "SHELLI_SESSION_IDLE_TTL_SECS",
                get("SHELLI_SESSION_IDLE_TTL_SECS"),
                defaults.session_idle_ttl,
            )?,
            sweep_interval: secs_or(
                "SHELLI_SWEEP_INTERVAL_SECS",
                get("SHELLI_SWEEP_INTERVAL_SECS"),
                defaults.sweep_interval,
            )?,
            stream_buffer: parse_or(
                "SHELLI_STREAM_BUFFER",
                get("SHELLI_STREAM_BUFFER"),
                defaults.stream_buffer,
            )?
            .max(1),
        })
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn secs_or(
    var: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(var, raw, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.default_model, "gpt-3.5-turbo");
        assert_eq!(config.service_name, "splunk-shelli");
        assert!(config.openai_api_key.is_none());
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.pending_span_ttl, Duration::from_secs(900));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SHELLI_PORT", "9100"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1/"),
            ("SHELLI_MODELS", "a, b ,,c"),
            ("SHELLI_TEMPERATURE", "0.5"),
            ("SHELLI_OTLP_ENDPOINT", "http://collector:4318/"),
            ("SHELLI_STREAM_BUFFER", "0"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.openai_base_url, "http://localhost:11434/v1");
        assert_eq!(config.models, vec!["a", "b", "c"]);
        assert!((config.temperature - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4318"));
        assert_eq!(config.stream_buffer, 1);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap();
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn test_invalid_number_is_error() {
        let err = Config::from_lookup(lookup(&[("SHELLI_PORT", "eighty")])).unwrap_err();
        assert_eq!(err.var, "SHELLI_PORT");
        assert_eq!(err.value, "eighty");
    }
}
