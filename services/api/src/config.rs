use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub api_base: String,
    pub chat_model: String,
    pub log_level: Level,
    /// Bound on each external utterance-generation call. On expiry the
    /// policy engine falls back to a canned utterance.
    pub generation_timeout: Duration,
    /// Hard cap on total session lifetime; exceeding it forces a
    /// wrap-up so no call runs forever.
    pub max_call_duration: Duration,
    /// Counterparty replies with at most this many words count as terse.
    pub terse_word_limit: usize,
    /// Transcription confidence below this counts as unreliable audio.
    pub min_confidence: f32,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address: SocketAddr = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1/".to_string());

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let generation_timeout =
            Duration::from_millis(parse_var::<u64>("GENERATION_TIMEOUT_MS", "2500")?);
        let max_call_duration = Duration::from_secs(parse_var::<u64>("MAX_CALL_SECS", "600")?);
        let terse_word_limit = parse_var::<usize>("TERSE_WORD_LIMIT", "2")?;
        let min_confidence = parse_var::<f32>("MIN_CONFIDENCE", "0.7")?;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::InvalidValue(
                "MIN_CONFIDENCE".to_string(),
                format!("{} is not in [0, 1]", min_confidence),
            ));
        }

        Ok(Self {
            bind_address,
            openai_api_key,
            api_base,
            chat_model,
            log_level,
            generation_timeout,
            max_call_duration,
            terse_word_limit,
            min_confidence,
        })
    }
}
