use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tokio::fs;

use crate::models::question::{ParsedQuestion, Provenance, QuestionRecord, SubjectLevel};
use crate::services::question_validator::QuestionValidator;

/// Read path over precreated questions keyed by subject and level.
#[async_trait]
pub trait FallbackStore: Send + Sync {
    /// Up to `count` questions sampled without replacement. Never fails; a
    /// missing or empty collection yields an empty vector.
    async fn load(&self, subject: &str, level: &str, count: usize) -> Vec<QuestionRecord>;
}

#[derive(Debug, Deserialize)]
struct BankEntry {
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(alias = "correct_answer")]
    answer: String,
}

/// Question bank stored as `<root>/<level_dir>/<subject_file>.json`.
#[derive(Debug, Clone)]
pub struct JsonQuestionBank {
    root: PathBuf,
    validator: QuestionValidator,
}

impl JsonQuestionBank {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            validator: QuestionValidator::new(),
        }
    }

    pub fn path_for(&self, subject: &str, level: &str) -> PathBuf {
        self.root
            .join(level_dir(level))
            .join(format!("{}.json", subject_file(subject)))
    }

    async fn read_entries(&self, path: &Path) -> Option<Vec<BankEntry>> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Question bank file not found");
                return None;
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read question bank");
                return None;
            }
        };

        match serde_json::from_str::<Vec<BankEntry>>(&raw) {
            Ok(entries) => Some(entries),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Question bank is not a JSON array of questions");
                None
            }
        }
    }
}

#[async_trait]
impl FallbackStore for JsonQuestionBank {
    async fn load(&self, subject: &str, level: &str, count: usize) -> Vec<QuestionRecord> {
        if count == 0 {
            return Vec::new();
        }

        let path = self.path_for(subject, level);
        let Some(entries) = self.read_entries(&path).await else {
            return Vec::new();
        };

        let target = SubjectLevel::new(subject, level);
        let total = entries.len();
        let usable: Vec<QuestionRecord> = entries
            .into_iter()
            .filter_map(|entry| {
                let candidate = ParsedQuestion {
                    question: entry.question,
                    options: entry.options,
                    answer: entry.answer,
                };
                match self.validator.normalize(candidate, &target, Provenance::Bank) {
                    Ok(record) => Some(record),
                    Err(reason) => {
                        tracing::warn!(path = %path.display(), ?reason, "Skipping malformed bank entry");
                        None
                    }
                }
            })
            .collect();

        if usable.is_empty() {
            tracing::warn!(path = %path.display(), total, "No usable questions in bank");
            return Vec::new();
        }

        let selected: Vec<QuestionRecord> = {
            let mut rng = rand::thread_rng();
            usable
                .choose_multiple(&mut rng, count.min(usable.len()))
                .cloned()
                .collect()
        };

        tracing::info!(
            subject,
            level,
            requested = count,
            loaded = selected.len(),
            "Loaded questions from bank"
        );
        selected
    }
}

pub fn level_dir(level: &str) -> String {
    match level.trim() {
        "Elementary" => "elementary".to_string(),
        "Middle School" => "middle_school".to_string(),
        "High School" => "high_school".to_string(),
        other => other.to_lowercase().replace(' ', "_"),
    }
}

pub fn subject_file(subject: &str) -> String {
    match subject.trim() {
        "Mathematics" => "math".to_string(),
        "Physics" => "physics".to_string(),
        "Chemistry" => "chemistry".to_string(),
        "Biology" => "biology".to_string(),
        "Computer Science" => "computerscience".to_string(),
        other => other.to_lowercase().replace(' ', ""),
    }
}
