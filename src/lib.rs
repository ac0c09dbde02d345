pub mod config;
pub mod dto;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::config::{Config, ModelBackend};
use crate::error::{Error, Result};
use crate::services::{
    fallback_store::{FallbackStore, JsonQuestionBank},
    generation_service::{GenerationService, GenerationSettings},
    job_service::QuizJobService,
    model_client::{ModelClient, OllamaClient, OpenAiClient},
};

#[derive(Clone)]
pub struct AppState {
    pub generation: GenerationService,
    pub jobs: QuizJobService,
    pub backend: ModelBackend,
    pub max_questions_per_section: usize,
    pub build_timeout: Duration,
    pub attempt_timeout: Duration,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        let client: Arc<dyn ModelClient> = match config.model_backend {
            ModelBackend::Ollama => Arc::new(OllamaClient::new(
                http_client,
                config.ollama_url.clone(),
                config.ollama_model.clone(),
                config.sampling.clone(),
                config.attempt_timeout,
            )),
            ModelBackend::OpenAi => {
                let api_key = config.openai_api_key.clone().ok_or_else(|| {
                    Error::Config("OPENAI_API_KEY is required for the openai backend".to_string())
                })?;
                Arc::new(OpenAiClient::new(
                    http_client,
                    config.openai_base_url.clone(),
                    api_key,
                    config.openai_model.clone(),
                    config.sampling.clone(),
                    config.attempt_timeout,
                ))
            }
        };
        let bank: Arc<dyn FallbackStore> =
            Arc::new(JsonQuestionBank::new(config.question_bank_dir.clone()));

        Ok(Self::from_parts(client, bank, config))
    }

    /// Wires the services around an already constructed backend and bank.
    pub fn from_parts(
        client: Arc<dyn ModelClient>,
        bank: Arc<dyn FallbackStore>,
        config: &Config,
    ) -> Self {
        let generation =
            GenerationService::new(client, bank, GenerationSettings::from_config(config));
        let jobs = QuizJobService::new(generation.clone(), config.build_timeout);

        Self {
            generation,
            jobs,
            backend: config.model_backend,
            max_questions_per_section: config.max_questions_per_section,
            build_timeout: config.build_timeout,
            attempt_timeout: config.attempt_timeout,
        }
    }
}
