use std::collections::HashSet;

use crate::models::question::{
    ParsedQuestion, Provenance, QuestionRecord, SubjectLevel, OPTION_COUNT, OPTION_LETTERS,
};
use crate::utils::text::question_key;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BlankQuestion,
    WrongOptionCount(usize),
    BlankOption,
    RepeatedOption,
    UnresolvedAnswer(String),
}

/// Structural checks plus case-insensitive deduplication for one
/// generation call.
#[derive(Debug, Clone, Default)]
pub struct QuestionValidator;

impl QuestionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Keeps the candidates that are complete and not already present in
    /// `accumulated` (or earlier in `candidates`), tagged for `target`.
    pub fn validate(
        &self,
        candidates: Vec<ParsedQuestion>,
        accumulated: &[QuestionRecord],
        target: &SubjectLevel,
        source: Provenance,
    ) -> Vec<QuestionRecord> {
        let mut seen: HashSet<String> = accumulated
            .iter()
            .map(|q| question_key(&q.question))
            .collect();

        let mut accepted = Vec::new();
        for candidate in candidates {
            match self.normalize(candidate, target, source) {
                Ok(record) => {
                    if seen.insert(question_key(&record.question)) {
                        accepted.push(record);
                    } else {
                        tracing::debug!(question = %record.question, "Rejected duplicate question");
                    }
                }
                Err(reason) => {
                    tracing::debug!(?reason, "Rejected incomplete question");
                }
            }
        }
        accepted
    }

    /// Checks one candidate and resolves its answer to literal option text.
    pub fn normalize(
        &self,
        candidate: ParsedQuestion,
        target: &SubjectLevel,
        source: Provenance,
    ) -> Result<QuestionRecord, Rejection> {
        let question = candidate.question.trim().to_string();
        if question.is_empty() {
            return Err(Rejection::BlankQuestion);
        }

        let options: Vec<String> = candidate
            .options
            .iter()
            .map(|o| o.trim().to_string())
            .collect();
        let options: [String; OPTION_COUNT] = options
            .try_into()
            .map_err(|v: Vec<String>| Rejection::WrongOptionCount(v.len()))?;
        if options.iter().any(|o| o.is_empty()) {
            return Err(Rejection::BlankOption);
        }
        let distinct: HashSet<&str> = options.iter().map(String::as_str).collect();
        if distinct.len() != OPTION_COUNT {
            return Err(Rejection::RepeatedOption);
        }

        let correct_answer = resolve_answer(candidate.answer.trim(), &options)
            .ok_or_else(|| Rejection::UnresolvedAnswer(candidate.answer.clone()))?;

        Ok(QuestionRecord {
            id: String::new(),
            question,
            options,
            correct_answer,
            category: target.subject.clone(),
            level: target.level.clone(),
            source,
        })
    }
}

/// Literal option text wins; otherwise a bare letter such as `B`, `B)`,
/// `(B)` or `B.` picks the option at that position.
fn resolve_answer(answer: &str, options: &[String; OPTION_COUNT]) -> Option<String> {
    if answer.is_empty() {
        return None;
    }
    if let Some(exact) = options.iter().find(|o| o.as_str() == answer) {
        return Some(exact.clone());
    }

    let letter = answer
        .trim_start_matches('(')
        .trim_end_matches(|c: char| c == ')' || c == '.');
    let mut chars = letter.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => OPTION_LETTERS
            .iter()
            .position(|l| *l == c.to_ascii_uppercase())
            .map(|idx| options[idx].clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SubjectLevel {
        SubjectLevel::new("Mathematics", "Elementary")
    }

    fn candidate(question: &str, options: &[&str], answer: &str) -> ParsedQuestion {
        ParsedQuestion {
            question: question.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            answer: answer.to_string(),
        }
    }

    #[test]
    fn rejects_case_insensitive_duplicate_of_accumulated() {
        let validator = QuestionValidator::new();
        let first = validator.validate(
            vec![candidate("What is 2+2?", &["3", "4", "5", "6"], "4")],
            &[],
            &target(),
            Provenance::Model,
        );
        assert_eq!(first.len(), 1);

        let second = validator.validate(
            vec![candidate("WHAT IS 2+2?", &["1", "2", "3", "4"], "4")],
            &first,
            &target(),
            Provenance::Model,
        );
        assert!(second.is_empty());
    }

    #[test]
    fn rejects_duplicates_within_one_batch() {
        let validator = QuestionValidator::new();
        let accepted = validator.validate(
            vec![
                candidate("Q?", &["a", "b", "c", "d"], "a"),
                candidate("q?", &["a", "b", "c", "d"], "b"),
            ],
            &[],
            &target(),
            Provenance::Model,
        );
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].correct_answer, "a");
    }

    #[test]
    fn literal_answer_must_match_an_option() {
        let validator = QuestionValidator::new();
        let err = validator
            .normalize(
                candidate("Q?", &["apple", "pear", "plum", "fig"], "banana"),
                &target(),
                Provenance::Model,
            )
            .unwrap_err();
        assert_eq!(err, Rejection::UnresolvedAnswer("banana".into()));

        // case matters for literal matches
        assert!(validator
            .normalize(
                candidate("Q?", &["apple", "pear", "plum", "fig"], "Apple"),
                &target(),
                Provenance::Model,
            )
            .is_err());
    }

    #[test]
    fn letter_reference_resolves_by_position() {
        let validator = QuestionValidator::new();
        for answer in ["C", "c", "C)", "(C)", "C."] {
            let record = validator
                .normalize(
                    candidate("Q?", &["apple", "pear", "plum", "fig"], answer),
                    &target(),
                    Provenance::Model,
                )
                .unwrap();
            assert_eq!(record.correct_answer, "plum");
        }
    }

    #[test]
    fn literal_match_wins_over_letter() {
        let validator = QuestionValidator::new();
        let record = validator
            .normalize(
                candidate("Which letter?", &["B", "A", "D", "C"], "A"),
                &target(),
                Provenance::Model,
            )
            .unwrap();
        assert_eq!(record.correct_answer, "A");
        assert_eq!(record.answer_letter(), Some('B'));
    }

    #[test]
    fn structural_rejections() {
        let validator = QuestionValidator::new();
        let t = target();
        let check = |c: ParsedQuestion| validator.normalize(c, &t, Provenance::Model).unwrap_err();

        assert_eq!(check(candidate("  ", &["a", "b", "c", "d"], "a")), Rejection::BlankQuestion);
        assert_eq!(
            check(candidate("Q", &["a", "b", "c"], "a")),
            Rejection::WrongOptionCount(3)
        );
        assert_eq!(check(candidate("Q", &["a", " ", "c", "d"], "a")), Rejection::BlankOption);
        assert_eq!(check(candidate("Q", &["a", "a", "c", "d"], "a")), Rejection::RepeatedOption);
    }

    #[test]
    fn tags_come_from_the_request() {
        let validator = QuestionValidator::new();
        let target = SubjectLevel::new("Physics", "High School");
        let records = validator.validate(
            vec![candidate("Unit of force?", &["Newton", "Joule", "Watt", "Pascal"], "A")],
            &[],
            &target,
            Provenance::Bank,
        );
        assert_eq!(records[0].category, "Physics");
        assert_eq!(records[0].level, "High School");
        assert_eq!(records[0].source, Provenance::Bank);
        assert_eq!(records[0].correct_answer, "Newton");
    }
}
