pub mod fallback_store;
pub mod generation_service;
pub mod job_service;
pub mod model_client;
pub mod prompt_builder;
pub mod question_validator;
pub mod response_parser;
