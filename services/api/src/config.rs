use std::net::SocketAddr;

use canvas_core::provider::GenerationOptions;
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
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub chat_model: String,
    pub vision_model: String,
    pub log_level: Level,
    pub generation: GenerationOptions,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to (e.g., "0.0.0.0:3000").
    /// *   `OPENAI_API_KEY`: Your secret key for the OpenAI API. Required.
    /// *   `CHAT_MODEL`: (Optional) The chat-completion model. Defaults to "gpt-4o".
    /// *   `VISION_MODEL`: (Optional) The vision-analysis model. Defaults to "gpt-4o".
    /// *   `TTS_VOICE`: (Optional) The speech-synthesis voice. Defaults to "nova".
    /// *   `TTS_SPEED`: (Optional) Playback speed multiplier. Defaults to 1.0.
    /// *   `IMAGE_SIZE`: (Optional) Generated background resolution. Defaults to "1024x1024".
    /// *   `MAX_RESPONSE_TOKENS`: (Optional) Reply length cap. Defaults to 500.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load(|key| std::env::var(key).ok())
    }

    /// Loads configuration through the given variable lookup, so tests can
    /// inject values without mutating the process environment.
    fn load(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_address_str =
            var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = var("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let chat_model = var("CHAT_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
        let vision_model = var("VISION_MODEL").unwrap_or_else(|| "gpt-4o".to_string());

        let mut generation = GenerationOptions::default();
        if let Some(voice) = var("TTS_VOICE") {
            generation.voice_id = voice;
        }
        if let Some(speed) = var("TTS_SPEED") {
            generation.speech_rate = speed
                .parse::<f32>()
                .map_err(|e| ConfigError::InvalidValue("TTS_SPEED".to_string(), e.to_string()))?;
        }
        if let Some(size) = var("IMAGE_SIZE") {
            generation.image_size = size;
        }
        if let Some(tokens) = var("MAX_RESPONSE_TOKENS") {
            generation.max_response_tokens = tokens.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("MAX_RESPONSE_TOKENS".to_string(), e.to_string())
            })?;
        }

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            chat_model,
            vision_model,
            log_level,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let result = Config::load(vars(&[]));
        assert!(
            matches!(result, Err(ConfigError::MissingVar(name)) if name == "OPENAI_API_KEY")
        );
    }

    #[test]
    fn defaults_apply_for_optional_variables() {
        let config = Config::load(vars(&[("OPENAI_API_KEY", "sk-test")])).unwrap();

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.vision_model, "gpt-4o");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.generation.voice_id, "nova");
        assert_eq!(config.generation.speech_rate, 1.0);
        assert_eq!(config.generation.image_size, "1024x1024");
        assert_eq!(config.generation.max_response_tokens, 500);
    }

    #[test]
    fn explicit_values_override_the_defaults() {
        let config = Config::load(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("CHAT_MODEL", "gpt-4o-mini"),
            ("TTS_VOICE", "shimmer"),
            ("TTS_SPEED", "1.2"),
            ("IMAGE_SIZE", "512x512"),
            ("MAX_RESPONSE_TOKENS", "200"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.generation.voice_id, "shimmer");
        assert_eq!(config.generation.speech_rate, 1.2);
        assert_eq!(config.generation.image_size, "512x512");
        assert_eq!(config.generation.max_response_tokens, 200);
    }

    #[test]
    fn unparsable_tts_speed_is_rejected() {
        let result = Config::load(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("TTS_SPEED", "fast"),
        ]));
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(name, _)) if name == "TTS_SPEED")
        );
    }

    #[test]
    fn unparsable_bind_address_is_rejected() {
        let result = Config::load(vars(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("BIND_ADDRESS", "not-an-address"),
        ]));
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(name, _)) if name == "BIND_ADDRESS")
        );
    }
}
