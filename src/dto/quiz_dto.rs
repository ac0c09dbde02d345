use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::generation::QuizSection;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerateQuestionsPayload {
    #[validate(length(min = 1, message = "Subject cannot be empty"))]
    pub subject: String,
    #[validate(length(min = 1, message = "Level cannot be empty"))]
    pub level: String,
    #[validate(range(min = 1, message = "Count must be at least 1"))]
    pub count: usize,
    #[serde(default)]
    pub require_model: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuizSectionPayload {
    #[validate(length(min = 1, message = "Subject cannot be empty"))]
    pub subject: String,
    #[validate(length(min = 1, message = "Level cannot be empty"))]
    pub level: String,
    #[validate(range(min = 1, message = "Count must be at least 1"))]
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BuildQuizPayload {
    #[validate(length(min = 1, message = "At least one section is required"))]
    #[validate(nested)]
    pub sections: Vec<QuizSectionPayload>,
    #[serde(default)]
    pub require_model: bool,
}

impl QuizSectionPayload {
    /// Trims the labels and enforces the per-section question cap.
    pub fn into_section(self, max_questions: usize) -> Result<QuizSection> {
        let subject = self.subject.trim().to_string();
        let level = self.level.trim().to_string();
        if subject.is_empty() || level.is_empty() {
            return Err(Error::BadRequest(
                "Subject and level cannot be blank".to_string(),
            ));
        }
        if self.count > max_questions {
            return Err(Error::BadRequest(format!(
                "At most {} questions per section ({} requested for {})",
                max_questions, self.count, subject
            )));
        }
        Ok(QuizSection {
            subject,
            level,
            count: self.count,
        })
    }
}

impl GenerateQuestionsPayload {
    pub fn into_section(self, max_questions: usize) -> Result<QuizSection> {
        QuizSectionPayload {
            subject: self.subject,
            level: self.level,
            count: self.count,
        }
        .into_section(max_questions)
    }
}

impl BuildQuizPayload {
    pub fn into_sections(self, max_questions: usize) -> Result<Vec<QuizSection>> {
        self.sections
            .into_iter()
            .map(|s| s.into_section(max_questions))
            .collect()
    }
}
