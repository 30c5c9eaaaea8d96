use crate::{
    models::{ApiError, ExportReport, ExportRequest},
    pipeline::Exporter,
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Background export runs. One worker drains the queue, so queued batches
/// run one at a time. Only the most recent finished runs stay queryable.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    board: Arc<Mutex<JobBoard>>,
}

struct Job {
    id: Uuid,
    request: ExportRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        result: ExportReport,
    },
    Failed {
        error: String,
        stage: Option<String>,
    },
}

impl JobState {
    fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

/// Live jobs plus a bounded history of finished ones, evicted oldest first.
struct JobBoard {
    states: HashMap<Uuid, JobState>,
    finished: VecDeque<Uuid>,
    history: usize,
}

impl JobBoard {
    fn new(history: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            history,
        }
    }

    fn set(&mut self, id: Uuid, state: JobState) {
        let finished = state.is_finished();
        self.states.insert(id, state);
        if !finished {
            return;
        }
        self.finished.push_back(id);
        while self.finished.len() > self.history {
            if let Some(evicted) = self.finished.pop_front() {
                self.states.remove(&evicted);
                debug!(target = "export.jobs", job_id = %evicted, "job_evicted");
            }
        }
    }
}

impl JobQueue {
    pub fn spawn(exporter: Exporter) -> (Self, JoinHandle<()>) {
        Self::spawn_with(exporter, queue_capacity_from_env(), job_history_from_env())
    }

    fn spawn_with(exporter: Exporter, capacity: usize, history: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        let board = Arc::new(Mutex::new(JobBoard::new(history)));
        let board_bg = board.clone();

        let handle = tokio::spawn(async move {
            while let Some(Job { id, request }) = rx.recv().await {
                board_bg.lock().await.set(id, JobState::Running);
                info!(target = "export.jobs", job_id = %id, "job_started");

                // A panicking run must not take the worker down with it.
                let run = tokio::spawn({
                    let exporter = exporter.clone();
                    async move { exporter.run(request).await }
                })
                .await;
                let state = match run {
                    Ok(Ok(report)) => JobState::Completed { result: report },
                    Ok(Err(err)) => JobState::Failed {
                        error: err.detail().to_string(),
                        stage: Some(err.stage().to_string()),
                    },
                    Err(join_err) => {
                        error!(target = "export.jobs", job_id = %id, error = %join_err, "job_aborted");
                        JobState::Failed {
                            error: "export run panicked".into(),
                            stage: None,
                        }
                    }
                };
                info!(target = "export.jobs", job_id = %id, failed = matches!(state, JobState::Failed { .. }), "job_finished");
                board_bg.lock().await.set(id, state);
            }
        });

        (Self { tx, board }, handle)
    }

    pub async fn enqueue(&self, request: ExportRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        self.board.lock().await.set(id, JobState::Queued);
        if self.tx.send(Job { id, request }).await.is_err() {
            self.board.lock().await.states.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.board.lock().await;
        guard.states.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

/// Finished jobs kept for status lookups (`JOB_HISTORY`).
fn job_history_from_env() -> usize {
    std::env::var("JOB_HISTORY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::rows::GroupData;
    use crate::images::ImageSideLog;
    use crate::testing::{MemoryGroupLoader, fast_submitter, row};
    use crate::warehouse::{GroupLoader, LoaderError};
    use async_trait::async_trait;
    use std::time::Duration;

    fn exporter_with(loader: Arc<dyn GroupLoader>) -> Exporter {
        Exporter::new(
            loader,
            None,
            None,
            Arc::new(fast_submitter()),
            Arc::new(ImageSideLog::disabled()),
        )
    }

    fn exporter() -> Exporter {
        exporter_with(Arc::new(
            MemoryGroupLoader::new().with_group("G1", vec![row("A")]),
        ))
    }

    fn request(group: &str) -> ExportRequest {
        ExportRequest {
            group_ids: vec![group.into()],
            dry_run: true,
            ..Default::default()
        }
    }

    struct PanickingLoader;

    #[async_trait]
    impl GroupLoader for PanickingLoader {
        async fn load_group(&self, _group_id: &str) -> Result<Option<GroupData>, LoaderError> {
            panic!("warehouse row out of range");
        }

        async fn list_group_ids(&self) -> Result<Vec<String>, LoaderError> {
            Ok(Vec::new())
        }
    }

    async fn wait_for_finish(queue: &JobQueue, id: Uuid) -> JobState {
        for _ in 0..100 {
            if let Some(info) = queue.get(id).await
                && info.state.is_finished()
            {
                return info.state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn completed_job_carries_the_report() {
        let (queue, _worker) = JobQueue::spawn(exporter());
        let id = queue.enqueue(request("G1")).await.unwrap();
        match wait_for_finish(&queue, id).await {
            JobState::Completed { result } => {
                assert_eq!(result.groups.len(), 1);
                assert!(result.dry_run);
            }
            _ => panic!("expected completed job"),
        }
    }

    #[tokio::test]
    async fn rejected_request_marks_job_failed() {
        let (queue, _worker) = JobQueue::spawn(exporter());
        let id = queue.enqueue(ExportRequest::default()).await.unwrap();
        match wait_for_finish(&queue, id).await {
            JobState::Failed { stage, .. } => assert_eq!(stage.as_deref(), Some("request")),
            _ => panic!("expected failed job"),
        }
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn only_recent_finished_jobs_are_kept() {
        let (queue, _worker) = JobQueue::spawn_with(exporter(), 8, 2);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let id = queue.enqueue(request("G1")).await.unwrap();
            wait_for_finish(&queue, id).await;
            ids.push(id);
        }
        assert!(queue.get(ids[0]).await.is_none());
        assert!(queue.get(ids[1]).await.is_none());
        assert!(queue.get(ids[2]).await.is_some());
        assert!(queue.get(ids[3]).await.is_some());
        assert_eq!(queue.board.lock().await.states.len(), 2);
    }

    #[test]
    fn live_jobs_are_never_evicted() {
        let mut board = JobBoard::new(1);
        let queued = Uuid::new_v4();
        board.set(queued, JobState::Queued);
        for _ in 0..3 {
            let id = Uuid::new_v4();
            board.set(id, JobState::Running);
            board.set(
                id,
                JobState::Failed {
                    error: "boom".into(),
                    stage: None,
                },
            );
        }
        assert!(board.states.contains_key(&queued));
        assert_eq!(board.states.len(), 2);
        assert_eq!(board.finished.len(), 1);
    }

    #[tokio::test]
    async fn panicking_run_fails_the_job_and_keeps_the_worker() {
        let (queue, worker) = JobQueue::spawn(exporter_with(Arc::new(PanickingLoader)));
        let first = queue.enqueue(request("G1")).await.unwrap();
        match wait_for_finish(&queue, first).await {
            JobState::Failed { error, stage } => {
                assert_eq!(error, "export run panicked");
                assert!(stage.is_none());
            }
            _ => panic!("expected failed job"),
        }
        let second = queue.enqueue(request("G2")).await.unwrap();
        assert!(wait_for_finish(&queue, second).await.is_finished());
        assert!(!worker.is_finished());
    }
}
