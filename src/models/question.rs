use serde::{Deserialize, Serialize};

pub const OPTION_COUNT: usize = 4;
pub const OPTION_LETTERS: [char; OPTION_COUNT] = ['A', 'B', 'C', 'D'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Model,
    Bank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    FreeText,
    Json,
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "free_text" | "freetext" => Ok(ResponseFormat::FreeText),
            "json" => Ok(ResponseFormat::Json),
            other => Err(format!("unknown response format '{}'", other)),
        }
    }
}

/// A finished multiple-choice question. `correct_answer` is always one of
/// `options`, never a letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    #[serde(default)]
    pub id: String,
    pub question: String,
    pub options: [String; OPTION_COUNT],
    #[serde(alias = "answer")]
    pub correct_answer: String,
    pub category: String,
    pub level: String,
    pub source: Provenance,
}

impl QuestionRecord {
    pub fn answer_letter(&self) -> Option<char> {
        self.options
            .iter()
            .position(|o| o == &self.correct_answer)
            .map(|idx| OPTION_LETTERS[idx])
    }

    pub fn retag(&mut self, category: &str, level: &str, source: Provenance) {
        self.category = category.to_string();
        self.level = level.to_string();
        self.source = source;
    }
}

/// Parser output before validation. In the free-text path `answer` is
/// already the resolved option text; in the JSON path it is whatever the
/// model wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingQuestion,
    WrongOptionCount(usize),
    MissingAnswer,
    DanglingAnswer(char),
    NotAnObject,
    InvalidJson,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingQuestion => write!(f, "no question stem"),
            SkipReason::WrongOptionCount(n) => write!(f, "expected 4 options, found {}", n),
            SkipReason::MissingAnswer => write!(f, "no answer marker"),
            SkipReason::DanglingAnswer(letter) => {
                write!(f, "answer {} does not name an option", letter)
            }
            SkipReason::NotAnObject => write!(f, "entry is not a question object"),
            SkipReason::InvalidJson => write!(f, "invalid JSON"),
        }
    }
}

/// Result of parsing one section of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(ParsedQuestion),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectLevel {
    pub subject: String,
    pub level: String,
}

impl SubjectLevel {
    pub fn new(subject: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            level: level.into(),
        }
    }
}

impl std::fmt::Display for SubjectLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.subject, self.level)
    }
}
