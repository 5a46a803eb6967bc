//! Single background worker owning the operation queue
//!
//! Callers talk to the worker only through messages; the worker is the sole
//! user of the tool for this working copy, so git is never invoked
//! concurrently against it.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::error::{DispatchError, Result};

use super::queue::{Enqueued, OperationQueue};
use super::{
    OperationHandle, OperationHandler, OperationId, OperationKind, OperationOutcome,
    OperationRequest, OperationStatus,
};

/// Notifications broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Cached state of these paths changed
    StateChanged(Vec<String>),
    /// An operation changed lifecycle state
    Operation {
        id: OperationId,
        kind: OperationKind,
        status: OperationStatus,
    },
    AvailabilityChanged(bool),
}

enum Message {
    Submit {
        id: OperationId,
        request: OperationRequest,
        responder: oneshot::Sender<OperationOutcome>,
    },
    Cancel {
        id: OperationId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Submission side of the worker
#[derive(Debug)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<Message>,
    /// Submissions not yet started or cancelled
    pending: Arc<AtomicUsize>,
    capacity: usize,
    worker: JoinHandle<()>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit { id, request, .. } => write!(f, "Submit({id}, {})", request.kind()),
            Self::Cancel { id, .. } => write!(f, "Cancel({id})"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl Dispatcher {
    /// Spawn the worker task on the current tokio runtime
    pub fn spawn(handler: OperationHandler, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(handler, receiver, Arc::clone(&pending)));
        Self {
            sender,
            pending,
            capacity: capacity.max(1),
            worker,
        }
    }

    /// Queue a request; returns immediately
    pub fn submit(&self, request: OperationRequest) -> Result<OperationHandle> {
        if self.pending.fetch_add(1, Ordering::SeqCst) >= self.capacity {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::QueueFull(self.capacity).into());
        }

        let id = OperationId::new();
        let kind = request.kind();
        let (responder, receiver) = oneshot::channel();
        if self
            .sender
            .send(Message::Submit {
                id,
                request,
                responder,
            })
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::WorkerStopped.into());
        }

        debug!("Queued {} operation {}", kind, id);
        Ok(OperationHandle::new(id, kind, receiver))
    }

    /// Cancel a queued operation; running or finished operations are unaffected
    pub async fn cancel(&self, id: OperationId) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.sender.send(Message::Cancel { id, reply }).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Number of submitted operations that have not started yet
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop the worker after the running operation; queued ones are cancelled
    pub async fn shutdown(self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Err(e) = self.worker.await {
            debug!("worker ended abnormally: {}", e);
        }
    }
}

/// Worker-side bookkeeping shared by every message
struct Lifecycle {
    pending: Arc<AtomicUsize>,
    events: broadcast::Sender<ProviderEvent>,
}

impl Lifecycle {
    fn emit(&self, id: OperationId, kind: OperationKind, status: OperationStatus) {
        let _ = self.events.send(ProviderEvent::Operation { id, kind, status });
    }

    fn started(&self, waiters: usize) {
        self.pending.fetch_sub(waiters, Ordering::SeqCst);
    }

    fn cancelled(&self, id: OperationId, kind: OperationKind) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.emit(id, kind, OperationStatus::Cancelled);
    }
}

fn accept(queue: &mut OperationQueue, message: Message, lifecycle: &Lifecycle) -> ControlFlow<()> {
    match message {
        Message::Submit {
            id,
            request,
            responder,
        } => {
            let kind = request.kind();
            if let Enqueued::Joined(existing) = queue.push(id, request, responder) {
                debug!("operation {} coalesced into {}", id, existing);
            }
            lifecycle.emit(id, kind, OperationStatus::Queued);
        }
        Message::Cancel { id, reply } => {
            let cancelled = queue.cancel(id);
            if let Some(kind) = cancelled {
                lifecycle.cancelled(id, kind);
                debug!("cancelled queued operation {}", id);
            }
            let _ = reply.send(cancelled.is_some());
        }
        Message::Shutdown => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

#[instrument(skip_all)]
async fn run_worker(
    mut handler: OperationHandler,
    mut receiver: mpsc::UnboundedReceiver<Message>,
    pending: Arc<AtomicUsize>,
) {
    let lifecycle = Lifecycle {
        pending,
        events: handler.events(),
    };
    let mut queue = OperationQueue::new();
    let mut stopping = false;

    'worker: loop {
        while let Ok(message) = receiver.try_recv() {
            if accept(&mut queue, message, &lifecycle).is_break() {
                break 'worker;
            }
        }

        let Some(entry) = queue.pop_front() else {
            match receiver.recv().await {
                Some(message) => {
                    if accept(&mut queue, message, &lifecycle).is_break() {
                        break 'worker;
                    }
                    continue;
                }
                None => break,
            }
        };
        lifecycle.started(entry.waiters.len());

        // The handler reports for the first waiter; coalesced ones follow it
        let lead = entry.waiters.first().map_or(entry.id, |w| w.id);
        let kind = entry.request.kind();
        let followers: Vec<OperationId> = entry.waiters.iter().skip(1).map(|w| w.id).collect();
        for &id in &followers {
            lifecycle.emit(id, kind, OperationStatus::Running);
        }

        // Keep accepting submissions and cancellations while git runs
        let outcome = {
            let operation = handler.execute(lead, &entry.request);
            tokio::pin!(operation);
            loop {
                tokio::select! {
                    outcome = &mut operation => break outcome,
                    Some(message) = receiver.recv(), if !stopping => {
                        if accept(&mut queue, message, &lifecycle).is_break() {
                            stopping = true;
                        }
                    }
                }
            }
        };
        let status = if outcome.is_ok() {
            OperationStatus::Succeeded
        } else {
            OperationStatus::Failed
        };
        for &id in &followers {
            lifecycle.emit(id, kind, status);
        }
        entry.complete(&outcome);

        if stopping {
            break;
        }
    }

    let cancelled = queue.cancel_all();
    for &(id, kind) in &cancelled {
        lifecycle.cancelled(id, kind);
    }
    info!(cancelled = cancelled.len(), "operation worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;

    use crate::cache::{RefreshScope, StateCache, WorkingCopyStatus};
    use crate::config::Config;
    use crate::error::{Error, ErrorKind};
    use crate::git::testing::ScriptedRunner;
    use crate::git::{ContextState, RepositoryContext, SharedContext, command};
    use crate::parse::GitVersion;

    use super::super::OperationPayload;

    struct Harness {
        dispatcher: Dispatcher,
        runner: Arc<ScriptedRunner>,
        cache: Arc<StateCache>,
        events: broadcast::Receiver<ProviderEvent>,
    }

    fn context(lfs_locking: bool) -> RepositoryContext {
        RepositoryContext {
            root: std::env::temp_dir(),
            binary: "git".into(),
            git_version: GitVersion {
                major: 2,
                minor: 43,
                patch: 0,
                windows_build: None,
            },
            lfs_version: None,
            lfs_locking,
            lfs_user: Some("me".to_string()),
            branch: Some("main".to_string()),
            head: None,
            remote_url: None,
            user_name: Some("me".to_string()),
            user_email: None,
        }
    }

    fn harness_with(runner: ScriptedRunner, state: ContextState, config: Config) -> Harness {
        let runner = Arc::new(runner);
        let cache = Arc::new(StateCache::new());
        let (events_tx, events) = broadcast::channel(64);
        let handler = OperationHandler::new(
            runner.clone(),
            "git".into(),
            cache.clone(),
            SharedContext::new(state),
            config.clone(),
            events_tx,
        );
        Harness {
            dispatcher: Dispatcher::spawn(handler, config.queue_capacity),
            runner,
            cache,
            events,
        }
    }

    fn harness(runner: ScriptedRunner) -> Harness {
        let config = Config {
            classify_files: false,
            ..Config::default()
        };
        harness_with(runner, ContextState::Ready(context(false)), config)
    }

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_refresh_populates_cache() {
        let h = harness(ScriptedRunner::new().reply(&["status"], "M  src/a.cpp\nA  src/b.cpp\n?? src/c.tmp\n"));

        let report = h
            .dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::Full))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(report.changed, paths(&["src/a.cpp", "src/b.cpp", "src/c.tmp"]));
        assert_eq!(h.cache.get("src/a.cpp").unwrap().status, WorkingCopyStatus::Modified);
        assert_eq!(h.cache.get("src/b.cpp").unwrap().status, WorkingCopyStatus::Added);
        assert_eq!(h.cache.get("src/c.tmp").unwrap().status, WorkingCopyStatus::Untracked);
    }

    #[tokio::test]
    async fn test_commit_triggers_scoped_refresh() {
        let h = harness(
            ScriptedRunner::new()
                .reply(&["commit"], "[main 1a2b3c4] Fix lights\n")
                .reply(&["log", "-1"], "1a2b3c4d5e6f Fix lights\n")
                .reply(&["ls-files"], "100644 e69de29bb2d1d6434b8b29ae775ad8c2e48c5391 0\tsrc/a.cpp\n"),
        );

        let report = h
            .dispatcher
            .submit(OperationRequest::Commit {
                paths: paths(&["src/a.cpp"]),
                message: "Fix lights".to_string(),
            })
            .unwrap()
            .await
            .unwrap();

        let calls = h.runner.calls();
        let commit = calls.iter().find(|c| c.args[0] == "commit").unwrap();
        assert_eq!(commit.stdin.as_deref(), Some("Fix lights"));

        let status_calls: Vec<_> = calls.iter().filter(|c| c.args[0] == "status").collect();
        assert_eq!(status_calls.len(), 1);
        assert_eq!(status_calls[0].args, command::status(&paths(&["src/a.cpp"])));

        let state = h.cache.get("src/a.cpp").unwrap();
        assert_eq!(state.status, WorkingCopyStatus::Unmodified);
        assert_eq!(state.revision.as_deref(), Some("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"));
        assert!(matches!(report.payload, OperationPayload::Commit(_)));
    }

    #[tokio::test]
    async fn test_timeout_marks_stale_and_worker_continues() {
        let h = harness(
            ScriptedRunner::new()
                .timeout(&["add"])
                .reply(&["status"], "A  a.txt\n"),
        );
        h.dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::Full))
            .unwrap()
            .await
            .unwrap();
        assert!(!h.cache.get("a.txt").unwrap().stale);

        let failure = h
            .dispatcher
            .submit(OperationRequest::Add(paths(&["a.txt"])))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::TimedOut);
        assert!(h.cache.get("a.txt").unwrap().stale);

        let report = h
            .dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::Full))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.kind, OperationKind::Refresh);
        assert!(!h.cache.get("a.txt").unwrap().stale);
    }

    #[tokio::test]
    async fn test_output_too_large_leaves_cache() {
        let h = harness(
            ScriptedRunner::new()
                .too_large(&["status", "--porcelain", "--ignored", "--untracked-files=all", "--"])
                .reply(&["status"], "M  big.bin\n"),
        );
        h.dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::Full))
            .unwrap()
            .await
            .unwrap();

        let failure = h
            .dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::paths(["big.bin"])))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::OutputTooLarge);
        let state = h.cache.get("big.bin").unwrap();
        assert_eq!(state.status, WorkingCopyStatus::Modified);
        assert!(state.stale);
    }

    #[tokio::test]
    async fn test_completion_follows_submission_order() {
        let h = harness(
            ScriptedRunner::new()
                .delayed(&["add"], Duration::from_millis(50), "")
                .reply(&["status"], "A  a.txt\n"),
        );
        let mut events = h.events.resubscribe();

        let first = h.dispatcher.submit(OperationRequest::Add(paths(&["a.txt"]))).unwrap();
        let second = h.dispatcher.submit(OperationRequest::Push).unwrap();
        let (first_id, second_id) = (first.id(), second.id());
        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert!(a.is_ok() && b.is_ok());

        let mut finished = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ProviderEvent::Operation { id, status: OperationStatus::Succeeded, .. } = event {
                finished.push(id);
            }
        }
        assert_eq!(finished, vec![first_id, second_id]);

        let lines = h.runner.command_lines();
        let add = lines.iter().position(|l| l.starts_with("add")).unwrap();
        let push = lines.iter().position(|l| l.starts_with("push")).unwrap();
        assert!(add < push);
    }

    #[tokio::test]
    async fn test_identical_refreshes_share_one_run() {
        let h = harness(
            ScriptedRunner::new()
                .delayed(&["pull"], Duration::from_millis(50), "")
                .reply(&["status"], "M  a.txt\n"),
        );
        let sync = h.dispatcher.submit(OperationRequest::Sync).unwrap();
        let scope = RefreshScope::paths(["a.txt"]);
        let r1 = h.dispatcher.submit(OperationRequest::Refresh(scope.clone())).unwrap();
        let r2 = h.dispatcher.submit(OperationRequest::Refresh(scope)).unwrap();
        let (r1_id, r2_id) = (r1.id(), r2.id());

        let (s, a, b) = tokio::join!(sync.wait(), r1.wait(), r2.wait());
        assert!(s.is_ok());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, r1_id);
        assert_eq!(b.id, r2_id);

        let scoped_status = h
            .runner
            .command_lines()
            .into_iter()
            .filter(|l| l.ends_with("-- a.txt") && l.starts_with("status"))
            .count();
        assert_eq!(scoped_status, 1);
    }

    /// Lifecycle statuses broadcast so far for one operation
    fn lifecycle_of(events: &mut broadcast::Receiver<ProviderEvent>, op: OperationId) -> Vec<OperationStatus> {
        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ProviderEvent::Operation { id, status, .. } = event {
                if id == op {
                    statuses.push(status);
                }
            }
        }
        statuses
    }

    #[tokio::test]
    async fn test_cancel_queued_operation() {
        let h = harness(ScriptedRunner::new().delayed(&["pull"], Duration::from_millis(100), ""));
        let mut events = h.events.resubscribe();
        let running = h.dispatcher.submit(OperationRequest::Sync).unwrap();
        let queued = h.dispatcher.submit(OperationRequest::Push).unwrap();
        let queued_id = queued.id();

        assert!(h.dispatcher.cancel(queued_id).await);
        let failure = queued.await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::OperationCancelled);
        assert!(running.await.is_ok());
        assert!(!h.runner.command_lines().iter().any(|l| l.starts_with("push")));

        assert_eq!(
            lifecycle_of(&mut events, queued_id),
            vec![OperationStatus::Queued, OperationStatus::Cancelled]
        );
        assert!(!h.dispatcher.cancel(queued_id).await);
    }

    #[tokio::test]
    async fn test_lifecycle_events_for_run_operation() {
        let h = harness(ScriptedRunner::new());
        let mut events = h.events.resubscribe();
        let handle = h.dispatcher.submit(OperationRequest::Push).unwrap();
        let id = handle.id();
        handle.await.unwrap();

        assert_eq!(
            lifecycle_of(&mut events, id),
            vec![OperationStatus::Queued, OperationStatus::Running, OperationStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn test_queue_full() {
        let config = Config {
            classify_files: false,
            queue_capacity: 1,
            ..Config::default()
        };
        let h = harness_with(
            ScriptedRunner::new().delayed(&["pull"], Duration::from_millis(100), ""),
            ContextState::Ready(context(false)),
            config,
        );
        let _first = h.dispatcher.submit(OperationRequest::Sync).unwrap();
        let err = h.dispatcher.submit(OperationRequest::Push).unwrap_err();
        assert!(matches!(err, Error::Dispatch(DispatchError::QueueFull(1))));
    }

    #[tokio::test]
    async fn test_unavailable_fails_without_spawning() {
        let h = harness_with(
            ScriptedRunner::new(),
            ContextState::Unavailable {
                kind: ErrorKind::ToolNotFound,
                reason: "git not found".to_string(),
            },
            Config::default(),
        );
        let failure = h
            .dispatcher
            .submit(OperationRequest::Add(paths(&["a.txt"])))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ToolNotFound);
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_lock_requires_lfs_locking() {
        let h = harness(ScriptedRunner::new());
        let failure = h
            .dispatcher
            .submit(OperationRequest::Lock(paths(&["Hero.uasset"])))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::NotConfigured);
    }

    #[tokio::test]
    async fn test_lock_statuses_from_lock_list() {
        let config = Config {
            classify_files: false,
            ..Config::default()
        };
        let locks = r#"[{"id":"1","path":"Hero.uasset","owner":{"name":"me"}},{"id":"2","path":"Map.umap","owner":{"name":"bob"}},{"id":"3","path":"Edit.uasset","owner":{"name":"me"}}]"#;
        let h = harness_with(
            ScriptedRunner::new()
                .reply(&["status"], " M Edit.uasset\n")
                .reply(&["lfs", "locks"], locks),
            ContextState::Ready(context(true)),
            config,
        );
        h.dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::Full))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(h.cache.get("Hero.uasset").unwrap().status, WorkingCopyStatus::LockHeldBySelf);
        let map = h.cache.get("Map.umap").unwrap();
        assert_eq!(map.status, WorkingCopyStatus::LockHeldByOther);
        assert_eq!(map.lock_owner.as_deref(), Some("bob"));
        let edited = h.cache.get("Edit.uasset").unwrap();
        assert_eq!(edited.status, WorkingCopyStatus::Modified);
        assert_eq!(edited.lock_owner.as_deref(), Some("me"));
    }

    #[tokio::test]
    async fn test_rejected_push_carries_advice() {
        let h = harness(ScriptedRunner::new().fail(
            &["push"],
            1,
            " ! [rejected]        main -> main (non-fast-forward)\nerror: failed to push some refs",
        ));
        let failure = h
            .dispatcher
            .submit(OperationRequest::Push)
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::NonZeroExit);
        assert!(failure.message.contains("[rejected]"));
        assert!(failure.message.contains("Sync (pull --rebase)"));
    }

    #[tokio::test]
    async fn test_revert_restores_only_tracked_files() {
        let h = harness(ScriptedRunner::new().reply(
            &["ls-files"],
            "100644 e69de29bb2d1d6434b8b29ae775ad8c2e48c5391 0\told.txt\n",
        ));
        h.dispatcher
            .submit(OperationRequest::Revert(paths(&["new.txt", "old.txt"])))
            .unwrap()
            .await
            .unwrap();

        let lines = h.runner.command_lines();
        assert!(lines.contains(&"reset -q -- new.txt old.txt".to_string()));
        assert!(lines.contains(&"checkout -- old.txt".to_string()));
    }

    #[tokio::test]
    async fn test_outside_repository_downgraded() {
        let h = harness(ScriptedRunner::new().fail(
            &["status"],
            128,
            "fatal: /elsewhere/x.txt: '/elsewhere/x.txt' is outside repository at '/repo'",
        ));
        let report = h
            .dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::paths(["/elsewhere/x.txt"])))
            .unwrap()
            .await;
        assert!(report.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued() {
        let h = harness(ScriptedRunner::new().delayed(&["pull"], Duration::from_millis(100), ""));
        let mut events = h.events.resubscribe();
        let running = h.dispatcher.submit(OperationRequest::Sync).unwrap();
        let queued = h.dispatcher.submit(OperationRequest::Push).unwrap();
        let queued_id = queued.id();
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.dispatcher.shutdown().await;
        assert!(running.await.is_ok());
        assert_eq!(queued.await.unwrap_err().kind, ErrorKind::OperationCancelled);
        assert_eq!(
            lifecycle_of(&mut events, queued_id),
            vec![OperationStatus::Queued, OperationStatus::Cancelled]
        );
    }
}
