use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::client::TaskApi;
use crate::task::TaskId;
use super::state::{Next, PollPolicy, SessionOutcome, SessionView, TaskLifecycle};

/// Drives a `TaskLifecycle` against the processing service.
///
/// Polls are strictly sequential: the next one is scheduled only after the
/// previous response has been applied. Cancelling the session drops any
/// in-flight request and publishes nothing further.
pub struct PollSession {
    api: Arc<dyn TaskApi>,
    policy: PollPolicy,
}

impl PollSession {
    pub fn new(api: Arc<dyn TaskApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    /// Start tracking `task_id` in the background.
    pub fn spawn(self, task_id: TaskId) -> SessionHandle {
        self.spawn_with_token(task_id, CancellationToken::new())
    }

    /// Like `spawn`, torn down when `token` is cancelled. Pass a child token to
    /// tie the session to a wider shutdown.
    pub fn spawn_with_token(self, task_id: TaskId, token: CancellationToken) -> SessionHandle {
        let lifecycle = TaskLifecycle::new(self.policy);
        let (tx, rx) = watch::channel(lifecycle.view());

        let span = info_span!("poll_session", task_id = %task_id, session = %Uuid::new_v4());
        let join = tokio::spawn(
            drive(self.api, lifecycle, task_id.clone(), token.clone(), tx).instrument(span),
        );

        SessionHandle {
            task_id,
            token,
            view: rx,
            join: Some(join),
        }
    }

    /// Track `task_id` on the current task until it ends or `token` is cancelled.
    pub async fn run(self, task_id: TaskId, token: CancellationToken) -> SessionOutcome {
        let lifecycle = TaskLifecycle::new(self.policy);
        let (tx, _rx) = watch::channel(lifecycle.view());
        let span = info_span!("poll_session", task_id = %task_id, session = %Uuid::new_v4());
        drive(self.api, lifecycle, task_id, token, tx).instrument(span).await
    }
}

async fn drive(
    api: Arc<dyn TaskApi>,
    mut lifecycle: TaskLifecycle,
    task_id: TaskId,
    token: CancellationToken,
    tx: watch::Sender<SessionView>,
) -> SessionOutcome {
    let mut next = lifecycle.start(task_id);
    tx.send_replace(lifecycle.view());

    loop {
        match next {
            Next::Stop => break,
            Next::PollNow => {}
            Next::PollAfter(delay) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return tear_down(&mut lifecycle),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let Some(task_id) = lifecycle.begin_poll() else {
            break;
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return tear_down(&mut lifecycle),
            result = api.get_status(&task_id) => result,
        };

        // A response that raced with cancellation is not applied.
        if token.is_cancelled() {
            return tear_down(&mut lifecycle);
        }

        match lifecycle.complete_poll(result) {
            Some(n) => next = n,
            None => break,
        }
        tx.send_replace(lifecycle.view());
    }

    let outcome = lifecycle.outcome();
    debug!("Poll session finished: {:?}", outcome_kind(&outcome));
    outcome
}

fn tear_down(lifecycle: &mut TaskLifecycle) -> SessionOutcome {
    lifecycle.tear_down();
    debug!("Poll session torn down");
    SessionOutcome::TornDown
}

fn outcome_kind(outcome: &SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::Completed(_) => "completed",
        SessionOutcome::Failed(_) => "failed",
        SessionOutcome::TornDown => "torn down",
    }
}

/// Owner of a running poll session. Dropping it tears the session down.
pub struct SessionHandle {
    task_id: TaskId,
    token: CancellationToken,
    view: watch::Receiver<SessionView>,
    join: Option<JoinHandle<SessionOutcome>>,
}

impl SessionHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Receiver that is notified after every applied poll.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn current(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Token that tears the session down when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn tear_down(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Wait for the session to end.
    pub async fn wait(mut self) -> SessionOutcome {
        let Some(join) = self.join.take() else {
            return SessionOutcome::TornDown;
        };

        match join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => SessionOutcome::TornDown,
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::client::VideoUpload;
    use crate::error::{OneVoiceError, Result};
    use crate::feedback::Feedback;
    use crate::retry::RetryPolicy;
    use crate::task::{Stage, TaskSnapshot, TaskStatus};
    use crate::tracker::state::{Failure, LifecycleState};

    /// Status endpoint that answers from a script, each answer after its own delay.
    #[derive(Default)]
    struct ScriptedApi {
        script: Mutex<VecDeque<(Duration, Result<TaskSnapshot>)>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedApi {
        fn new(script: Vec<(u64, Result<TaskSnapshot>)>) -> Arc<Self> {
            let script = script
                .into_iter()
                .map(|(ms, result)| (Duration::from_millis(ms), result))
                .collect();
            Arc::new(Self { script: Mutex::new(script), ..Self::default() })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskApi for ScriptedApi {
        async fn submit_file(&self, _upload: VideoUpload) -> Result<TaskId> {
            unimplemented!("not used by poll sessions")
        }

        async fn submit_url(&self, _url: &str) -> Result<TaskId> {
            unimplemented!("not used by poll sessions")
        }

        async fn get_status(&self, _task_id: &TaskId) -> Result<TaskSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let step = self.script.lock().unwrap().pop_front();
            let (delay, result) =
                step.unwrap_or_else(|| (Duration::ZERO, Err(OneVoiceError::Network("script exhausted".into()))));
            tokio::time::sleep(delay).await;
            result
        }

        async fn fetch_artifact(&self, _task_id: &TaskId) -> Result<Vec<u8>> {
            unimplemented!("not used by poll sessions")
        }

        async fn submit_feedback(&self, _task_id: &TaskId, _feedback: &Feedback) -> Result<()> {
            unimplemented!("not used by poll sessions")
        }

        fn download_url(&self, task_id: &TaskId) -> Result<String> {
            Ok(format!("http://test/api/process/download/{}", task_id))
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(2),
            max_network_retries: 3,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(100),
                multiplier: 2.0,
                max_delay: Duration::from_secs(1),
            },
        }
    }

    fn id() -> TaskId {
        TaskId::new("task-7").unwrap()
    }

    fn snapshot(status: TaskStatus, stage: Option<Stage>, progress: f64) -> TaskSnapshot {
        TaskSnapshot {
            status,
            stage,
            progress: Some(progress),
            ..TaskSnapshot::pending()
        }
    }

    fn completed() -> TaskSnapshot {
        snapshot(TaskStatus::Completed, Some(Stage::Tts), 100.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_processing_completed_scenario() {
        let api = ScriptedApi::new(vec![
            (10, Ok(TaskSnapshot::pending())),
            (10, Ok(snapshot(TaskStatus::Processing, Some(Stage::Stt), 50.0))),
            (10, Ok(completed())),
        ]);

        let handle = PollSession::new(api.clone(), policy()).spawn(id());
        let mut views = handle.subscribe();

        let mut seen = Vec::new();
        while views.changed().await.is_ok() {
            seen.push(views.borrow_and_update().display_percent());
            if views.borrow().state.is_terminal() {
                break;
            }
        }

        let outcome = handle.wait().await;
        assert!(matches!(outcome, SessionOutcome::Completed(ref s) if s.status == TaskStatus::Completed));
        assert!(seen.iter().any(|p| *p == 16 || *p == 17));
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(api.calls(), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_ends_session() {
        let failed = TaskSnapshot {
            error: Some("unsupported codec".to_string()),
            ..snapshot(TaskStatus::Failed, None, 0.0)
        };
        let api = ScriptedApi::new(vec![(0, Ok(TaskSnapshot::pending())), (0, Ok(failed))]);

        let outcome = PollSession::new(api.clone(), policy()).spawn(id()).wait().await;
        assert_eq!(outcome, SessionOutcome::Failed(Failure::Backend("unsupported codec".to_string())));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_responses_never_overlap() {
        let mut script: Vec<(u64, Result<TaskSnapshot>)> = (0..5)
            .map(|i| (7_000, Ok(snapshot(TaskStatus::Processing, Some(Stage::Translation), i as f64 * 20.0))))
            .collect();
        script.push((7_000, Ok(completed())));
        let api = ScriptedApi::new(script);

        let outcome = PollSession::new(api.clone(), policy()).spawn(id()).wait().await;

        assert!(matches!(outcome, SessionOutcome::Completed(_)));
        assert_eq!(api.calls(), 6);
        assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_discards_in_flight_response() {
        let api = ScriptedApi::new(vec![
            (0, Ok(snapshot(TaskStatus::Processing, Some(Stage::Stt), 20.0))),
            (10_000, Ok(completed())),
        ]);

        let handle = PollSession::new(api.clone(), policy()).spawn(id());
        let views = handle.subscribe();

        // First answer applied at t=0, second poll in flight from t=2s until t=12s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls(), 2);
        let before = views.borrow().clone();
        assert!(matches!(before.state, LifecycleState::Polling { .. }));

        handle.tear_down();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(*views.borrow(), before);
        assert_eq!(api.calls(), 2);
        assert_eq!(api.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(handle.wait().await, SessionOutcome::TornDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let api = ScriptedApi::new(
            (0..10)
                .map(|_| (0, Ok(snapshot(TaskStatus::Processing, Some(Stage::Tts), 5.0))))
                .collect(),
        );

        let handle = PollSession::new(api.clone(), policy()).spawn(id());
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        drop(handle);
        let calls = api.calls();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(api.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let api = ScriptedApi::new(vec![
            (0, Err(OneVoiceError::Network("connection reset".into()))),
            (0, Err(OneVoiceError::Network("connection reset".into()))),
            (0, Ok(completed())),
        ]);

        let outcome = PollSession::new(api.clone(), policy()).spawn(id()).wait().await;
        assert!(matches!(outcome, SessionOutcome::Completed(_)));
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let api = ScriptedApi::new(
            (0..10)
                .map(|_| (0, Err(OneVoiceError::Network("unreachable".into()))))
                .collect(),
        );

        let outcome = PollSession::new(api.clone(), policy()).spawn(id()).wait().await;
        assert!(matches!(outcome, SessionOutcome::Failed(Failure::Unreachable { attempts: 4, .. })));
        assert_eq!(api.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_inline_honours_cancellation() {
        let api = ScriptedApi::new(vec![(60_000, Ok(completed()))]);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let outcome = PollSession::new(api.clone(), policy()).run(id(), token).await;
        assert_eq!(outcome, SessionOutcome::TornDown);
        assert_eq!(api.calls(), 1);
    }
}
