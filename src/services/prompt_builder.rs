use crate::error::{Error, Result};
use crate::models::question::ResponseFormat;

const SYSTEM_PROMPT: &str = "You are an experienced teacher who writes clear, unambiguous \
multiple-choice quiz questions. Every question has exactly four options and exactly one \
correct answer. Follow the requested output format exactly and add no commentary.";

/// A prompt ready to be sent to a model backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub format: ResponseFormat,
    pub system: String,
    pub prompt: String,
    pub count: usize,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    format: ResponseFormat,
    max_output_tokens: u32,
}

impl PromptBuilder {
    pub fn new(format: ResponseFormat, max_output_tokens: u32) -> Self {
        Self {
            format,
            max_output_tokens,
        }
    }

    pub fn build(&self, subject: &str, level: &str, count: usize) -> Result<GenerationRequest> {
        if count == 0 {
            return Err(Error::BadRequest(
                "question count must be positive".to_string(),
            ));
        }

        let prompt = match self.format {
            ResponseFormat::FreeText => free_text_prompt(subject, level, count),
            ResponseFormat::Json => json_prompt(subject, level, count),
        };

        Ok(GenerationRequest {
            format: self.format,
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            count,
            max_tokens: self.token_budget(count),
        })
    }

    // Roughly 120 tokens per question plus headroom for the model's preamble.
    fn token_budget(&self, count: usize) -> u32 {
        let wanted = 300u32.saturating_add((count as u32).saturating_mul(120));
        wanted.min(self.max_output_tokens.max(1))
    }
}

fn free_text_prompt(subject: &str, level: &str, count: usize) -> String {
    format!(
        r#"Generate exactly {count} multiple choice questions about "{subject}" appropriate for "{level}" level.

Format each question EXACTLY like this example:
Question: What is 2 + 2?
A) 3
B) 4
C) 5
D) 6
Answer: B

Question: What is 3 + 3?
A) 5
B) 6
C) 7
D) 8
Answer: B

Rules:
- Generate exactly {count} questions
- Each question must have exactly 4 options labeled A), B), C), D)
- Provide the correct answer as A, B, C, or D
- Questions should be appropriate for {level} level
- Focus only on {subject} topics
- Use the exact format shown above
- Each question should be separated by a blank line

Generate {count} questions now:"#
    )
}

fn json_prompt(subject: &str, level: &str, count: usize) -> String {
    format!(
        r#"Generate exactly {count} {subject} multiple choice questions for {level} level students.

Return only a JSON array in this format:
[{{"question":"What is 2+2?","options":["3","4","5","6"],"answer":"4"}}]

Requirements:
- Exactly {count} questions
- Each question must have 4 distinct options
- "answer" must be the exact text of the correct option
- Subject: {subject}
- Level: {level}
- Return only the JSON array, no other text"#
    )
}
