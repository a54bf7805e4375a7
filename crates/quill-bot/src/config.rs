use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,

    // Secrets (from ENV only)
    #[serde(default)]
    pub openai_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub db_path: String,
    pub image_dir: String,
    /// How often the idle-thread sweep runs
    pub cleanup_interval_secs: u64,
    /// Threads idle longer than this are removed by the sweep
    pub thread_max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_response_tokens: u32,
    pub image_size: String,
    pub image_quality: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl From<LlmConfig> for quill_types::ThreadConfig {
    fn from(config: LlmConfig) -> Self {
        let mut thread = quill_types::ThreadConfig::default()
            .with_model(config.model)
            .with_temperature(config.temperature)
            .with_max_response_tokens(config.max_response_tokens);
        thread.image_size = config.image_size;
        thread.image_quality = config.image_quality;
        thread
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                db_path: "quill.db".to_string(),
                image_dir: "images".to_string(),
                cleanup_interval_secs: 3600,
                thread_max_age_secs: 86_400,
            },
            llm: LlmConfig {
                model: "gpt-4o".to_string(),
                temperature: 0.7,
                max_response_tokens: 4096,
                image_size: "1024x1024".to_string(),
                image_quality: "standard".to_string(),
                base_url: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            openai_api_key: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Environment variables (QUILL_BOT_*, QUILL_LLM_*, QUILL_LOG_*)
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let defaults = Config::default();
        let builder = ConfigLoader::builder()
            .set_default("bot.db_path", defaults.bot.db_path)?
            .set_default("bot.image_dir", defaults.bot.image_dir)?
            .set_default("bot.cleanup_interval_secs", defaults.bot.cleanup_interval_secs)?
            .set_default("bot.thread_max_age_secs", defaults.bot.thread_max_age_secs)?
            .set_default("llm.model", defaults.llm.model)?
            .set_default("llm.temperature", defaults.llm.temperature as f64)?
            .set_default("llm.max_response_tokens", defaults.llm.max_response_tokens as i64)?
            .set_default("llm.image_size", defaults.llm.image_size)?
            .set_default("llm.image_quality", defaults.llm.image_quality)?
            .set_default("logging.level", defaults.logging.level)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::default()
                    .prefix("QUILL")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let mut cfg: Config = config.try_deserialize()?;

        // Secrets come from ENV, never from TOML
        cfg.openai_api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ConfigError::Message("OPENAI_API_KEY environment variable is required".to_string())
        })?;

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder().add_source(File::from(path.as_ref()));
        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_structure() {
        let toml = r#"
            [bot]
            db_path = "test.db"
            image_dir = "imgs"
            cleanup_interval_secs = 600
            thread_max_age_secs = 7200

            [llm]
            model = "gpt-4o-mini"
            temperature = 0.5
            max_response_tokens = 2048
            image_size = "512x512"
            image_quality = "standard"

            [logging]
            level = "debug"
        "#;

        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.bot.db_path, "test.db");
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.openai_api_key.is_empty());
    }

    #[test]
    fn test_llm_config_into_thread_config() {
        let llm = LlmConfig {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_response_tokens: 1024,
            image_size: "512x512".to_string(),
            image_quality: "hd".to_string(),
            base_url: None,
        };

        let thread: quill_types::ThreadConfig = llm.into();
        assert_eq!(thread.model, "gpt-4o-mini");
        assert_eq!(thread.temperature, 0.2);
        assert_eq!(thread.max_response_tokens, 1024);
    }
}
