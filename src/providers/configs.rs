use anyhow::{anyhow, Result};

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
}

// Define specific config structs for each provider
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl OpenAiProviderConfig {
    /// Build a config from `OPENAI_API_KEY` (required), `OPENAI_HOST` and
    /// `OPENAI_MODEL` (optional). A missing key is the "driver unavailable"
    /// case: surface it before any remote call is attempted.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable is not set"))?;
        Ok(Self {
            host: std::env::var("OPENAI_HOST").unwrap_or_else(|_| OPENAI_HOST.to_string()),
            api_key,
            model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| OPENAI_DEFAULT_MODEL.to_string()),
            temperature: None,
            max_tokens: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl AnthropicProviderConfig {
    /// Build a config from `ANTHROPIC_API_KEY` (required), `ANTHROPIC_HOST`
    /// and `ANTHROPIC_MODEL` (optional).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable is not set"))?;
        Ok(Self {
            host: std::env::var("ANTHROPIC_HOST").unwrap_or_else(|_| ANTHROPIC_HOST.to_string()),
            api_key,
            model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| ANTHROPIC_DEFAULT_MODEL.to_string()),
            temperature: None,
            max_tokens: None,
        })
    }
}
