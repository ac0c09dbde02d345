use crate::error::{Error, Result};
use crate::models::question::ResponseFormat;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    Ollama,
    OpenAi,
}

impl ModelBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelBackend::Ollama => "ollama",
            ModelBackend::OpenAi => "openai",
        }
    }
}

impl std::str::FromStr for ModelBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(ModelBackend::Ollama),
            "openai" | "hosted" => Ok(ModelBackend::OpenAi),
            other => Err(format!("unknown model backend '{}'", other)),
        }
    }
}

/// Sampling parameters forwarded to the backend as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub model_backend: ModelBackend,
    pub ollama_url: String,
    pub ollama_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub response_format: ResponseFormat,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub build_timeout: Duration,
    pub sampling: SamplingConfig,
    pub question_bank_dir: PathBuf,
    pub max_questions_per_section: usize,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let model_backend: ModelBackend = vars.get_env_parse("MODEL_BACKEND", ModelBackend::Ollama)?;
        let openai_api_key = vars.optional("OPENAI_API_KEY");
        if model_backend == ModelBackend::OpenAi && openai_api_key.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY is required when MODEL_BACKEND=openai".to_string(),
            ));
        }

        let max_attempts: u32 = vars.get_env_parse("MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(Error::Config("MAX_ATTEMPTS must be at least 1".to_string()));
        }

        Ok(Self {
            server_address: vars.get_env("SERVER_ADDRESS", "127.0.0.1:8080"),
            model_backend,
            ollama_url: vars.get_env("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: vars.get_env("OLLAMA_MODEL", "phi3:mini"),
            openai_api_key,
            openai_base_url: vars.get_env("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: vars.get_env("OPENAI_MODEL", "gpt-4o-mini"),
            response_format: vars.get_env_parse("RESPONSE_FORMAT", ResponseFormat::FreeText)?,
            max_attempts,
            attempt_timeout: Duration::from_secs(vars.get_env_parse("ATTEMPT_TIMEOUT_SECS", 45)?),
            build_timeout: Duration::from_secs(vars.get_env_parse("BUILD_TIMEOUT_SECS", 300)?),
            sampling: SamplingConfig {
                temperature: vars.get_env_parse("TEMPERATURE", 0.7)?,
                top_p: vars.get_env_parse("TOP_P", 0.8)?,
                max_output_tokens: vars.get_env_parse("MAX_OUTPUT_TOKENS", 2048)?,
            },
            question_bank_dir: PathBuf::from(
                vars.get_env("QUESTION_BANK_DIR", "data/exams/precreated"),
            ),
            max_questions_per_section: vars.get_env_parse("MAX_QUESTIONS_PER_SECTION", 50)?,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<'a, F: Fn(&str) -> Option<String>> Vars<'a, F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_env(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn get_env_parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
            None => Ok(default),
        }
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}
