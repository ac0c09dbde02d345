use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::generation::{
    GenerationOutput, GenerationPhase, GenerationProgress, GenerationReport, QuizSection,
};
use crate::models::question::{Provenance, QuestionRecord, ResponseFormat, SubjectLevel};
use crate::services::fallback_store::FallbackStore;
use crate::services::model_client::ModelClient;
use crate::services::prompt_builder::PromptBuilder;
use crate::services::question_validator::QuestionValidator;
use crate::services::response_parser::{parser_for, ResponseParser};
use crate::utils::text::{id_prefix, question_key};

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub response_format: ResponseFormat,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub max_output_tokens: u32,
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            response_format: config.response_format,
            max_attempts: config.max_attempts,
            attempt_timeout: config.attempt_timeout,
            max_output_tokens: config.sampling.max_output_tokens,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Fail with `ModelUnavailable` instead of serving from the bank when
    /// the availability check fails.
    pub require_model: bool,
    /// Checked before every attempt and every quiz section.
    pub deadline: Option<Instant>,
}

impl GenerateOptions {
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Write side of a per-request progress channel.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: Arc<watch::Sender<GenerationProgress>>,
}

impl ProgressHandle {
    pub fn new() -> (Self, watch::Receiver<GenerationProgress>) {
        let (tx, rx) = watch::channel(GenerationProgress::default());
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn update(&self, apply: impl FnOnce(&mut GenerationProgress)) {
        self.tx.send_modify(apply);
    }
}

fn publish(progress: Option<&ProgressHandle>, apply: impl FnOnce(&mut GenerationProgress)) {
    if let Some(handle) = progress {
        handle.update(apply);
    }
}

/// Drives prompt, model, parser and validator until the requested count is
/// reached or the attempt budget runs out, then tops up from the bank.
#[derive(Clone)]
pub struct GenerationService {
    client: Arc<dyn ModelClient>,
    parser: Arc<dyn ResponseParser>,
    prompts: PromptBuilder,
    validator: QuestionValidator,
    fallback: Arc<dyn FallbackStore>,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl GenerationService {
    pub fn new(
        client: Arc<dyn ModelClient>,
        fallback: Arc<dyn FallbackStore>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            client,
            parser: Arc::from(parser_for(settings.response_format)),
            prompts: PromptBuilder::new(settings.response_format, settings.max_output_tokens),
            validator: QuestionValidator::new(),
            fallback,
            max_attempts: settings.max_attempts,
            attempt_timeout: settings.attempt_timeout,
        }
    }

    pub async fn check_availability(&self) -> bool {
        self.client.check_availability().await
    }

    pub async fn generate(
        &self,
        subject: &str,
        level: &str,
        count: usize,
        options: &GenerateOptions,
        progress: Option<&ProgressHandle>,
    ) -> Result<GenerationOutput> {
        if count == 0 {
            return Err(Error::BadRequest(
                "question count must be positive".to_string(),
            ));
        }

        let target = SubjectLevel::new(subject, level);
        let mut logs = Vec::new();
        let mut report = GenerationReport {
            requested: count,
            ..Default::default()
        };

        publish(progress, |p| {
            p.phase = GenerationPhase::CheckingAvailability;
            p.subject = Some(subject.to_string());
            p.level = Some(level.to_string());
            p.collected = 0;
            p.target = count;
            p.attempt = 0;
        });

        report.model_available = self.client.check_availability().await;
        if !report.model_available {
            if options.require_model {
                return Err(Error::ModelUnavailable(
                    "model backend is unavailable".to_string(),
                ));
            }
            tracing::warn!(%target, "Model backend unavailable, serving from question bank");
            logs.push(format!(
                "Model backend unavailable; using question bank for {}",
                target
            ));
        }

        let mut accumulated: Vec<QuestionRecord> = Vec::with_capacity(count);
        if report.model_available {
            while accumulated.len() < count && report.model_attempts < self.max_attempts {
                if options.deadline_passed() {
                    tracing::warn!(%target, attempts = report.model_attempts, "Deadline passed, stopping model attempts");
                    logs.push(format!(
                        "Deadline passed after {} attempt(s) for {}",
                        report.model_attempts, target
                    ));
                    break;
                }

                report.model_attempts += 1;
                let attempt = report.model_attempts;
                let missing = count - accumulated.len();
                publish(progress, |p| {
                    p.phase = GenerationPhase::Requesting;
                    p.attempt = attempt;
                });

                let accepted = self
                    .run_attempt(&target, missing, &accumulated, attempt, &mut logs, progress)
                    .await?;
                accumulated.extend(accepted);
                accumulated.truncate(count);

                let collected = accumulated.len();
                publish(progress, |p| p.collected = collected);
            }
        }
        report.from_model = accumulated.len();

        if accumulated.len() < count {
            let before = accumulated.len();
            publish(progress, |p| p.phase = GenerationPhase::Fallback);
            self.fill_from_bank(&target, count, &mut accumulated).await;
            report.from_fallback = accumulated.len() - before;
            logs.push(format!(
                "Loaded {} question(s) from the question bank for {}",
                report.from_fallback, target
            ));
        }

        report.shortfall = count - accumulated.len();
        if accumulated.is_empty() {
            report.empty_sections.push(target.clone());
        }
        assign_ids(&mut accumulated);

        let summary = report.summary();
        tracing::info!(
            %target,
            requested = count,
            from_model = report.from_model,
            from_fallback = report.from_fallback,
            attempts = report.model_attempts,
            "Generation finished"
        );
        logs.push(summary);

        let collected = accumulated.len();
        publish(progress, |p| {
            p.phase = GenerationPhase::Done;
            p.collected = collected;
        });

        Ok(GenerationOutput {
            questions: accumulated,
            report,
            logs,
        })
    }

    /// Runs the sections in order and concatenates their batches. Sections
    /// that have not started when the deadline passes are reported as skipped.
    /// A question already used by an earlier section is dropped and counted
    /// in the shortfall.
    pub async fn build_quiz(
        &self,
        sections: &[QuizSection],
        options: &GenerateOptions,
        progress: Option<&ProgressHandle>,
    ) -> Result<GenerationOutput> {
        let mut questions = Vec::new();
        let mut report = GenerationReport::default();
        let mut logs = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let total = sections.len();
        publish(progress, |p| {
            p.sections_total = total;
            p.sections_done = 0;
        });

        for (idx, section) in sections.iter().enumerate() {
            if options.deadline_passed() {
                for skipped in &sections[idx..] {
                    report.requested += skipped.count;
                    report.shortfall += skipped.count;
                    report
                        .skipped_sections
                        .push(SubjectLevel::new(&skipped.subject, &skipped.level));
                }
                tracing::warn!(skipped = total - idx, "Quiz build deadline passed");
                logs.push(format!(
                    "Deadline passed; {} section(s) not started",
                    total - idx
                ));
                break;
            }

            tracing::info!(
                subject = %section.subject,
                level = %section.level,
                count = section.count,
                section = idx + 1,
                total,
                "Building quiz section"
            );
            let mut output = self
                .generate(&section.subject, &section.level, section.count, options, progress)
                .await?;
            let repeated = drop_repeats(&mut output, &mut seen);
            if repeated > 0 {
                tracing::info!(
                    subject = %section.subject,
                    level = %section.level,
                    repeated,
                    "Dropped questions already used in this quiz"
                );
                logs.push(format!(
                    "Dropped {} question(s) repeated from an earlier section",
                    repeated
                ));
            }
            questions.extend(output.questions);
            report.merge(output.report);
            logs.extend(output.logs);

            publish(progress, |p| p.sections_done = idx + 1);
        }

        assign_ids(&mut questions);
        logs.push(report.summary());

        let collected = questions.len();
        publish(progress, |p| {
            p.phase = GenerationPhase::Done;
            p.collected = collected;
        });

        Ok(GenerationOutput {
            questions,
            report,
            logs,
        })
    }

    async fn run_attempt(
        &self,
        target: &SubjectLevel,
        missing: usize,
        accumulated: &[QuestionRecord],
        attempt: u32,
        logs: &mut Vec<String>,
        progress: Option<&ProgressHandle>,
    ) -> Result<Vec<QuestionRecord>> {
        let request = self.prompts.build(&target.subject, &target.level, missing)?;

        let raw = match tokio::time::timeout(self.attempt_timeout, self.client.generate(&request))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(%target, attempt, error = %e, "Model attempt failed");
                logs.push(format!("Attempt {}/{} failed: {}", attempt, self.max_attempts, e));
                return Ok(Vec::new());
            }
            Err(_) => {
                tracing::warn!(%target, attempt, timeout = ?self.attempt_timeout, "Model attempt timed out");
                logs.push(format!(
                    "Attempt {}/{} timed out after {:?}",
                    attempt, self.max_attempts, self.attempt_timeout
                ));
                return Ok(Vec::new());
            }
        };

        publish(progress, |p| p.phase = GenerationPhase::Parsing);
        let parsed = self.parser.parse(&raw, missing);
        let parsed_count = parsed.len();

        publish(progress, |p| p.phase = GenerationPhase::Accumulating);
        let accepted = self
            .validator
            .validate(parsed, accumulated, target, Provenance::Model);

        tracing::info!(
            %target,
            attempt,
            requested = missing,
            parsed = parsed_count,
            accepted = accepted.len(),
            "Model attempt finished"
        );
        logs.push(format!(
            "Attempt {}/{}: requested {}, parsed {}, accepted {}",
            attempt,
            self.max_attempts,
            missing,
            parsed_count,
            accepted.len()
        ));
        Ok(accepted)
    }

    async fn fill_from_bank(
        &self,
        target: &SubjectLevel,
        count: usize,
        accumulated: &mut Vec<QuestionRecord>,
    ) {
        let shortfall = count - accumulated.len();
        // Ask for enough extra to absorb collisions with model questions.
        let pool = self
            .fallback
            .load(&target.subject, &target.level, shortfall + accumulated.len())
            .await;

        let mut seen: HashSet<String> = accumulated
            .iter()
            .map(|q| question_key(&q.question))
            .collect();
        for mut question in pool {
            if accumulated.len() >= count {
                break;
            }
            if seen.insert(question_key(&question.question)) {
                question.retag(&target.subject, &target.level, Provenance::Bank);
                accumulated.push(question);
            }
        }

        if accumulated.len() < count {
            tracing::warn!(
                %target,
                missing = count - accumulated.len(),
                "Question bank could not cover the shortfall"
            );
        }
    }
}

fn drop_repeats(output: &mut GenerationOutput, seen: &mut HashSet<String>) -> usize {
    let report = &mut output.report;
    let before = output.questions.len();
    output.questions.retain(|q| {
        if seen.insert(question_key(&q.question)) {
            return true;
        }
        match q.source {
            Provenance::Model => report.from_model = report.from_model.saturating_sub(1),
            Provenance::Bank => report.from_fallback = report.from_fallback.saturating_sub(1),
        }
        false
    });
    let dropped = before - output.questions.len();
    report.shortfall += dropped;
    dropped
}

/// Numbers questions `<PREFIX>-001`, `<PREFIX>-002`, ... by position.
fn assign_ids(questions: &mut [QuestionRecord]) {
    for (idx, question) in questions.iter_mut().enumerate() {
        question.id = format!("{}-{:03}", id_prefix(&question.category), idx + 1);
    }
}
