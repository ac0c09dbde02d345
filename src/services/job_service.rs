use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::generation::{GenerationProgress, QuizSection};
use crate::models::job::{JobStatus, QuizJobView};
use crate::services::generation_service::{GenerateOptions, GenerationService, ProgressHandle};

const DEFAULT_RETENTION_MINUTES: i64 = 60;

struct JobEntry {
    view: QuizJobView,
    progress: watch::Receiver<GenerationProgress>,
}

/// In-memory registry of background quiz builds.
#[derive(Clone)]
pub struct QuizJobService {
    generation: GenerationService,
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    build_timeout: Duration,
    retention: chrono::Duration,
}

impl QuizJobService {
    pub fn new(generation: GenerationService, build_timeout: Duration) -> Self {
        Self {
            generation,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            build_timeout,
            retention: chrono::Duration::minutes(DEFAULT_RETENTION_MINUTES),
        }
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    pub async fn enqueue(&self, sections: Vec<QuizSection>, require_model: bool) -> Result<Uuid> {
        if sections.is_empty() {
            return Err(Error::BadRequest(
                "a quiz needs at least one section".to_string(),
            ));
        }

        self.prune().await;

        let id = Uuid::new_v4();
        let (handle, progress) = ProgressHandle::new();
        let entry = JobEntry {
            view: QuizJobView {
                id,
                status: JobStatus::Pending,
                sections: sections.clone(),
                progress: GenerationProgress::default(),
                result: None,
                error: None,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
            progress,
        };
        self.jobs.write().await.insert(id, entry);

        let worker = self.clone();
        tokio::spawn(async move {
            worker.run(id, sections, require_model, handle).await;
        });

        tracing::info!(job_id = %id, "Quiz build job queued");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<QuizJobView> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", id)))?;

        let mut view = entry.view.clone();
        view.progress = entry.progress.borrow().clone();
        Ok(view)
    }

    async fn run(&self, id: Uuid, sections: Vec<QuizSection>, require_model: bool, handle: ProgressHandle) {
        self.update(id, |view| {
            view.status = JobStatus::Running;
            view.started_at = Some(Utc::now());
        })
        .await;

        let options = GenerateOptions {
            require_model,
            deadline: Some(Instant::now() + self.build_timeout),
        };
        let outcome = self
            .generation
            .build_quiz(&sections, &options, Some(&handle))
            .await;

        match outcome {
            Ok(output) => {
                tracing::info!(job_id = %id, questions = output.questions.len(), "Quiz build job succeeded");
                self.update(id, |view| {
                    view.status = JobStatus::Succeeded;
                    view.result = Some(output);
                    view.finished_at = Some(Utc::now());
                })
                .await;
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Quiz build job failed");
                self.update(id, |view| {
                    view.status = JobStatus::Failed;
                    view.error = Some(e.to_string());
                    view.finished_at = Some(Utc::now());
                })
                .await;
            }
        }
    }

    async fn update(&self, id: Uuid, apply: impl FnOnce(&mut QuizJobView)) {
        if let Some(entry) = self.jobs.write().await.get_mut(&id) {
            apply(&mut entry.view);
        }
    }

    async fn prune(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.view.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned finished quiz jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{QuestionRecord, ResponseFormat};
    use crate::services::fallback_store::FallbackStore;
    use crate::services::generation_service::GenerationSettings;
    use crate::services::model_client::MockModelClient;
    use async_trait::async_trait;

    struct NoBank;

    #[async_trait]
    impl FallbackStore for NoBank {
        async fn load(&self, _subject: &str, _level: &str, _count: usize) -> Vec<QuestionRecord> {
            Vec::new()
        }
    }

    fn jobs(available: bool, retention: chrono::Duration) -> QuizJobService {
        let mut client = MockModelClient::new();
        client.expect_check_availability().returning(move || available);
        client.expect_generate().returning(|_| {
            Ok("Question: Capital of France?\nA) Paris\nB) Rome\nC) Berlin\nD) Madrid\nAnswer: A"
                .to_string())
        });
        let generation = GenerationService::new(
            Arc::new(client),
            Arc::new(NoBank),
            GenerationSettings {
                response_format: ResponseFormat::FreeText,
                max_attempts: 1,
                attempt_timeout: Duration::from_secs(5),
                max_output_tokens: 2048,
            },
        );
        QuizJobService::new(generation, Duration::from_secs(30)).with_retention(retention)
    }

    fn section() -> QuizSection {
        QuizSection {
            subject: "Geography".into(),
            level: "Elementary".into(),
            count: 1,
        }
    }

    async fn wait_finished(service: &QuizJobService, id: Uuid) -> QuizJobView {
        for _ in 0..200 {
            let view = service.get(id).await.unwrap();
            if view.status.is_finished() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn job_runs_to_success_with_result_and_progress() {
        let service = jobs(true, chrono::Duration::minutes(60));
        let id = service.enqueue(vec![section()], false).await.unwrap();

        let view = wait_finished(&service, id).await;
        assert_eq!(view.status, JobStatus::Succeeded);
        assert!(view.started_at.is_some());
        assert!(view.finished_at.is_some());
        let result = view.result.unwrap();
        assert_eq!(result.questions.len(), 1);
        assert_eq!(result.questions[0].correct_answer, "Paris");
        assert_eq!(view.progress.sections_done, 1);
    }

    #[tokio::test]
    async fn unavailable_model_fails_job_when_required() {
        let service = jobs(false, chrono::Duration::minutes(60));
        let id = service.enqueue(vec![section()], true).await.unwrap();

        let view = wait_finished(&service, id).await;
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.error.unwrap().contains("unavailable"));
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn unknown_and_empty_jobs_are_rejected() {
        let service = jobs(true, chrono::Duration::minutes(60));
        assert!(matches!(
            service.get(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            service.enqueue(Vec::new(), false).await,
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn finished_jobs_are_pruned_after_retention() {
        let service = jobs(true, chrono::Duration::zero());
        let first = service.enqueue(vec![section()], false).await.unwrap();
        wait_finished(&service, first).await;

        let second = service.enqueue(vec![section()], false).await.unwrap();
        assert!(matches!(service.get(first).await, Err(Error::NotFound(_))));
        assert!(service.get(second).await.is_ok());
    }
}
