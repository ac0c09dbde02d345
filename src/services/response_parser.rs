use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::models::question::{
    ParseOutcome, ParsedQuestion, ResponseFormat, SkipReason, OPTION_COUNT, OPTION_LETTERS,
};
use crate::utils::text::strip_code_fence;

/// Turns raw model output into question candidates. Never fails: sections
/// that cannot be read are reported as `Skipped` and left out of `parse`.
pub trait ResponseParser: Send + Sync {
    fn format(&self) -> ResponseFormat;

    fn parse_sections(&self, raw: &str) -> Vec<ParseOutcome>;

    fn parse(&self, raw: &str, expected_count: usize) -> Vec<ParsedQuestion> {
        let mut parsed = Vec::new();
        for outcome in self.parse_sections(raw) {
            match outcome {
                ParseOutcome::Parsed(q) => parsed.push(q),
                ParseOutcome::Skipped(reason) => {
                    tracing::debug!(format = ?self.format(), %reason, "Skipped section of model response");
                }
            }
        }
        parsed.truncate(expected_count);
        parsed
    }
}

pub fn parser_for(format: ResponseFormat) -> Box<dyn ResponseParser> {
    match format {
        ResponseFormat::FreeText => Box::new(FreeTextParser),
        ResponseFormat::Json => Box::new(JsonArrayParser),
    }
}

fn blank_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t\r]*\n").expect("valid blank line pattern"))
}

// Accepts list numbering in front of the marker, as in `1. Question:`.
fn question_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*(?:\d+[.)][ \t]*)?(?:\*\*)?question(?:[ \t]*\d+)?[ \t]*[:.](?:\*\*)?")
            .expect("valid question marker pattern")
    })
}

// Option markers are recognised up to H so that a fifth or sixth option is
// seen as extra rather than folded into D's text.
fn block_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:([A-H])[).][ \t]*|(?:\*\*)?(?i:answer)[ \t]*:(?:\*\*)?)")
            .expect("valid block marker pattern")
    })
}

fn answer_letter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)answer[ \t]*:(?:\*\*)?[ \t]*\(?([A-H])\b").expect("valid answer pattern")
    })
}

fn question_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\{\s*"question"\s*:\s*"(?:[^"\\]|\\.)*"\s*,\s*"options"\s*:\s*\[[^\]]*\]\s*,\s*"answer"\s*:\s*(?:"(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?)\s*\}"#,
        )
        .expect("valid question object pattern")
    })
}

/// Reads `Question: / A) / B) / C) / D) / Answer: X` blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeTextParser;

impl FreeTextParser {
    fn sections(raw: &str) -> Vec<&str> {
        let mut sections = Vec::new();
        for chunk in blank_line_re().split(raw) {
            let mut starts: Vec<usize> = question_marker_re()
                .find_iter(chunk)
                .map(|m| m.start())
                .collect();
            if starts.first() != Some(&0) {
                starts.insert(0, 0);
            }
            for (i, &start) in starts.iter().enumerate() {
                let end = starts.get(i + 1).copied().unwrap_or(chunk.len());
                sections.push(&chunk[start..end]);
            }
        }
        sections
    }

    fn parse_section(section: &str) -> ParseOutcome {
        let Some(marker) = question_marker_re().find(section) else {
            return ParseOutcome::Skipped(SkipReason::MissingQuestion);
        };
        let body = &section[marker.end()..];

        let mut markers: Vec<(usize, usize, Option<char>)> = Vec::new();
        for caps in block_marker_re().captures_iter(body) {
            let whole = caps.get(0).map(|m| (m.start(), m.end()));
            let letter = caps.get(1).and_then(|m| m.as_str().chars().next());
            if let Some((start, end)) = whole {
                markers.push((start, end, letter));
            }
        }

        let Some(first_option) = markers.iter().find(|(_, _, letter)| letter.is_some()) else {
            return ParseOutcome::Skipped(SkipReason::WrongOptionCount(0));
        };
        let question = body[..first_option.0].trim();
        if question.is_empty() {
            return ParseOutcome::Skipped(SkipReason::MissingQuestion);
        }

        let mut options: Vec<(char, String)> = Vec::new();
        for (i, (_, end, letter)) in markers.iter().enumerate() {
            let Some(letter) = letter else { continue };
            let stop = markers.get(i + 1).map(|m| m.0).unwrap_or(body.len());
            options.push((*letter, body[*end..stop].trim().to_string()));
        }

        // A repeated or out-of-order letter counts as a malformed option list.
        let in_order = options
            .iter()
            .map(|(l, _)| *l)
            .eq(OPTION_LETTERS.iter().copied());
        if options.len() != OPTION_COUNT || !in_order {
            return ParseOutcome::Skipped(SkipReason::WrongOptionCount(options.len()));
        }

        let Some(caps) = answer_letter_re().captures(body) else {
            return ParseOutcome::Skipped(SkipReason::MissingAnswer);
        };
        let letter = caps
            .get(1)
            .and_then(|m| m.as_str().chars().next())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or('?');
        let Some((_, answer)) = options.iter().find(|(l, _)| *l == letter) else {
            return ParseOutcome::Skipped(SkipReason::DanglingAnswer(letter));
        };

        ParseOutcome::Parsed(ParsedQuestion {
            question: question.to_string(),
            answer: answer.clone(),
            options: options.into_iter().map(|(_, text)| text).collect(),
        })
    }
}

impl ResponseParser for FreeTextParser {
    fn format(&self) -> ResponseFormat {
        ResponseFormat::FreeText
    }

    fn parse_sections(&self, raw: &str) -> Vec<ParseOutcome> {
        let text = strip_code_fence(raw);
        if text.is_empty() {
            return Vec::new();
        }
        Self::sections(text)
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter(|s| question_marker_re().is_match(s))
            .map(Self::parse_section)
            .collect()
    }
}

/// Reads a JSON array of `{question, options, answer}` objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArrayParser;

impl JsonArrayParser {
    fn scalar_text(value: &JsonValue) -> Option<String> {
        match value {
            JsonValue::String(s) => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn coerce(value: &JsonValue) -> ParseOutcome {
        let Some(obj) = value.as_object() else {
            return ParseOutcome::Skipped(SkipReason::NotAnObject);
        };

        let Some(question) = obj.get("question").and_then(Self::scalar_text) else {
            return ParseOutcome::Skipped(SkipReason::MissingQuestion);
        };

        let options: Vec<String> = match obj.get("options").and_then(|o| o.as_array()) {
            Some(arr) => arr.iter().filter_map(Self::scalar_text).collect(),
            None => return ParseOutcome::Skipped(SkipReason::WrongOptionCount(0)),
        };
        if options.len() != OPTION_COUNT {
            return ParseOutcome::Skipped(SkipReason::WrongOptionCount(options.len()));
        }

        let Some(answer) = obj
            .get("answer")
            .or_else(|| obj.get("correct_answer"))
            .and_then(Self::scalar_text)
        else {
            return ParseOutcome::Skipped(SkipReason::MissingAnswer);
        };

        ParseOutcome::Parsed(ParsedQuestion {
            question,
            options,
            answer,
        })
    }

    fn scan_objects(text: &str) -> Vec<ParseOutcome> {
        question_object_re()
            .find_iter(text)
            .map(|m| match serde_json::from_str::<JsonValue>(m.as_str()) {
                Ok(value) => Self::coerce(&value),
                Err(_) => ParseOutcome::Skipped(SkipReason::InvalidJson),
            })
            .collect()
    }
}

impl ResponseParser for JsonArrayParser {
    fn format(&self) -> ResponseFormat {
        ResponseFormat::Json
    }

    fn parse_sections(&self, raw: &str) -> Vec<ParseOutcome> {
        let text = strip_code_fence(raw);
        if text.is_empty() {
            return Vec::new();
        }

        if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
            if start < end {
                if let Ok(items) = serde_json::from_str::<Vec<JsonValue>>(&text[start..=end]) {
                    return items.iter().map(Self::coerce).collect();
                }
            }
        }

        tracing::debug!("Response is not a JSON array, scanning for question objects");
        Self::scan_objects(text)
    }
}
