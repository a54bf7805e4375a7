use serde::{Deserialize, Serialize};

/// Resolved per-thread configuration.
///
/// Values are immutable once resolved; per-thread overrides are applied with
/// [`ThreadConfig::merged`], which produces a new value and leaves the global
/// defaults untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadConfig {
    pub model: String,
    pub temperature: f32,
    pub max_response_tokens: u32,
    pub image_size: String,
    pub image_quality: String,
    /// Optional system prompt override; `None` falls back to the platform
    /// default prompt.
    pub system_prompt: Option<String>,
    /// How many non-preserved messages one trim pass may touch.
    pub trim_batch_size: usize,
    /// Fraction of the model token budget that triggers the post-response
    /// background trim (0.0..=1.0).
    pub cleanup_threshold: f32,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_response_tokens: 4096,
            image_size: "1024x1024".to_string(),
            image_quality: "standard".to_string(),
            system_prompt: None,
            trim_batch_size: 5,
            cleanup_threshold: 0.75,
        }
    }
}

impl ThreadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_response_tokens(mut self, tokens: u32) -> Self {
        self.max_response_tokens = tokens;
        self
    }

    pub fn with_trim_batch_size(mut self, size: usize) -> Self {
        self.trim_batch_size = size;
        self
    }

    /// Apply sparse overrides, producing a new config.
    pub fn merged(&self, overrides: &ConfigOverrides) -> ThreadConfig {
        let mut config = self.clone();
        if let Some(model) = &overrides.model {
            config.model = model.clone();
        }
        if let Some(temperature) = overrides.temperature {
            config.temperature = temperature;
        }
        if let Some(tokens) = overrides.max_response_tokens {
            config.max_response_tokens = tokens;
        }
        if let Some(size) = &overrides.image_size {
            config.image_size = size.clone();
        }
        if let Some(quality) = &overrides.image_quality {
            config.image_quality = quality.clone();
        }
        if let Some(prompt) = &overrides.system_prompt {
            config.system_prompt = Some(prompt.clone());
        }
        config
    }
}

/// Sparse per-thread overrides, stored by the config collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Set an override by option name, as received from chat commands.
    /// Unknown options are rejected so typos never silently vanish.
    pub fn set(&mut self, option: &str, value: &str) -> Result<(), String> {
        match option {
            "model" => self.model = Some(value.to_string()),
            "temperature" => {
                let parsed: f32 = value
                    .parse()
                    .map_err(|_| format!("invalid temperature: {}", value))?;
                self.temperature = Some(parsed);
            }
            "max_response_tokens" => {
                let parsed: u32 = value
                    .parse()
                    .map_err(|_| format!("invalid max_response_tokens: {}", value))?;
                self.max_response_tokens = Some(parsed);
            }
            "image_size" => self.image_size = Some(value.to_string()),
            "image_quality" => self.image_quality = Some(value.to_string()),
            "system_prompt" => self.system_prompt = Some(value.to_string()),
            other => return Err(format!("unknown config option: {}", other)),
        }
        Ok(())
    }
}
