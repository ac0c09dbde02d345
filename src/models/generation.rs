use serde::{Deserialize, Serialize};

use crate::models::question::{QuestionRecord, SubjectLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Idle,
    CheckingAvailability,
    Requesting,
    Parsing,
    Accumulating,
    Fallback,
    Done,
}

/// Snapshot published on a request's progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub phase: GenerationPhase,
    pub subject: Option<String>,
    pub level: Option<String>,
    pub collected: usize,
    pub target: usize,
    pub attempt: u32,
    pub sections_done: usize,
    pub sections_total: usize,
}

impl Default for GenerationProgress {
    fn default() -> Self {
        Self {
            phase: GenerationPhase::Idle,
            subject: None,
            level: None,
            collected: 0,
            target: 0,
            attempt: 0,
            sections_done: 0,
            sections_total: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub requested: usize,
    pub from_model: usize,
    pub from_fallback: usize,
    pub model_attempts: u32,
    pub model_available: bool,
    pub shortfall: usize,
    pub empty_sections: Vec<SubjectLevel>,
    pub skipped_sections: Vec<SubjectLevel>,
}

impl GenerationReport {
    pub fn total(&self) -> usize {
        self.from_model + self.from_fallback
    }

    pub fn merge(&mut self, other: GenerationReport) {
        self.requested += other.requested;
        self.from_model += other.from_model;
        self.from_fallback += other.from_fallback;
        self.model_attempts += other.model_attempts;
        self.model_available |= other.model_available;
        self.shortfall += other.shortfall;
        self.empty_sections.extend(other.empty_sections);
        self.skipped_sections.extend(other.skipped_sections);
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} of {} questions ready: {} from model, {} from question bank",
            self.total(),
            self.requested,
            self.from_model,
            self.from_fallback
        );
        if !self.empty_sections.is_empty() {
            let names: Vec<String> = self.empty_sections.iter().map(|s| s.to_string()).collect();
            line.push_str(&format!("; no questions found for {}", names.join(", ")));
        }
        if !self.skipped_sections.is_empty() {
            let names: Vec<String> = self.skipped_sections.iter().map(|s| s.to_string()).collect();
            line.push_str(&format!("; not started before deadline: {}", names.join(", ")));
        }
        line
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub questions: Vec<QuestionRecord>,
    pub report: GenerationReport,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizSection {
    pub subject: String,
    pub level: String,
    pub count: usize,
}
