//! Provider entry point used by the host application

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{FileState, RefreshScope, StateCache};
use crate::config::Config;
use crate::dispatch::{
    Dispatcher, OperationHandle, OperationHandler, OperationId, OperationRequest, ProviderEvent,
};
use crate::error::Result;
use crate::git::{
    ContextState, GitExecutor, RepositoryContext, SharedContext, ToolRunner, detect_state,
    find_binary,
};

use super::host::{HostStatus, to_repo_relative};

/// Buffered notifications per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1024;

/// Cached state of one queried path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueriedState {
    /// Path as given by the caller
    pub requested: String,
    /// Repository-relative form; `None` when outside the working copy
    pub path: Option<String>,
    /// `None` when the cache has never seen the path
    pub state: Option<FileState>,
}

fn relative_path(root: Option<&Path>, path: &str) -> Option<String> {
    match root {
        Some(root) => to_repo_relative(root, path),
        None if Path::new(path).is_absolute() => None,
        None => to_repo_relative(Path::new(""), path),
    }
}

impl QueriedState {
    pub fn host_status(&self) -> HostStatus {
        HostStatus::from(self.state.as_ref())
    }
}

/// Git source-control provider
///
/// Owns the state cache and the operation worker for one working copy.
pub struct GitProvider {
    config: Config,
    cache: Arc<StateCache>,
    context: SharedContext,
    events: broadcast::Sender<ProviderEvent>,
    dispatcher: Dispatcher,
}

impl GitProvider {
    /// Locate git and the working copy, then start the worker
    ///
    /// Never fails: a missing tool or repository leaves the provider
    /// unavailable until a [`OperationRequest::Reconnect`] succeeds.
    #[instrument(skip_all)]
    pub async fn activate(config: Config) -> Self {
        match find_binary(&config) {
            Ok(binary) => {
                let runner: Arc<dyn ToolRunner> =
                    Arc::new(GitExecutor::new(binary.clone()).with_output_cap(config.output_cap_bytes));
                let state = detect_state(runner.as_ref(), binary.clone(), &config).await;
                Self::assemble(config, runner, binary, state, true)
            }
            Err(e) => {
                warn!("git unavailable: {}", e);
                let binary = PathBuf::from("git");
                let runner: Arc<dyn ToolRunner> = Arc::new(GitExecutor::new(binary.clone()));
                let state = ContextState::Unavailable {
                    kind: e.kind(),
                    reason: e.user_message(),
                };
                Self::assemble(config, runner, binary, state, true)
            }
        }
    }

    /// Start a provider on top of a custom runner
    pub async fn with_runner(config: Config, runner: Arc<dyn ToolRunner>, binary: PathBuf) -> Self {
        let state = detect_state(runner.as_ref(), binary.clone(), &config).await;
        Self::assemble(config, runner, binary, state, false)
    }

    fn assemble(
        config: Config,
        runner: Arc<dyn ToolRunner>,
        binary: PathBuf,
        state: ContextState,
        rediscover: bool,
    ) -> Self {
        match &state {
            ContextState::Ready(ctx) => info!("git provider ready at {:?}", ctx.root),
            ContextState::Unavailable { reason, .. } => warn!("git provider unavailable: {}", reason),
        }

        let cache = Arc::new(StateCache::new());
        let context = SharedContext::new(state);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let handler = OperationHandler::new(
            runner,
            binary,
            Arc::clone(&cache),
            context.clone(),
            config.clone(),
            events.clone(),
        )
        .with_rediscovery(rediscover);
        let dispatcher = Dispatcher::spawn(handler, config.queue_capacity);

        Self {
            config,
            cache,
            context,
            events,
            dispatcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    pub fn is_available(&self) -> bool {
        self.context.get().is_available()
    }

    /// Repository context, when available
    pub fn context(&self) -> Option<RepositoryContext> {
        self.context.get().context().cloned()
    }

    fn root(&self) -> Option<PathBuf> {
        match self.context.get() {
            ContextState::Ready(ctx) => Some(ctx.root),
            ContextState::Unavailable { .. } => self.config.repository_root.clone(),
        }
    }

    /// Cached state for the given host paths; never blocks on git
    ///
    /// While the provider is unavailable every state is served stale.
    pub fn query_state<S: AsRef<str>>(&self, paths: &[S]) -> Vec<QueriedState> {
        let root = self.root();
        let available = self.is_available();

        let translated: Vec<(String, Option<String>)> = paths
            .iter()
            .map(|requested| {
                let requested = requested.as_ref().to_string();
                let path = relative_path(root.as_deref(), &requested);
                (requested, path)
            })
            .collect();
        let relative: Vec<String> = translated.iter().filter_map(|(_, p)| p.clone()).collect();

        // One read lock for the whole query so a concurrent refresh is seen
        // entirely or not at all
        let snapshot = self.cache.get_batch(&relative);

        translated
            .into_iter()
            .map(|(requested, path)| {
                let state = path.as_ref().and_then(|p| snapshot.get(p)).cloned().map(|mut s| {
                    if !available {
                        s.stale = true;
                    }
                    s
                });
                QueriedState {
                    requested,
                    path,
                    state,
                }
            })
            .collect()
    }

    /// Queue an operation; host paths are made repository-relative first
    ///
    /// Paths outside the working copy are passed through so git reports them.
    pub fn submit(&self, request: OperationRequest) -> Result<OperationHandle> {
        let root = self.root();
        let request = request.map_paths(|p| relative_path(root.as_deref(), &p).unwrap_or(p));
        self.dispatcher.submit(request)
    }

    pub async fn cancel(&self, id: OperationId) -> bool {
        self.dispatcher.cancel(id).await
    }

    /// Operations submitted but not started yet
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// Invoke `callback` with the changed paths whenever cached state changes
    ///
    /// A lagging listener is handed every cached path. The task ends when the
    /// provider shuts down.
    pub fn on_state_changed<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&[String]) + Send + 'static,
    {
        let mut events = self.events.subscribe();
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ProviderEvent::StateChanged(paths)) => callback(&paths),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "state listener lagged");
                        let all: Vec<String> = cache.snapshot().into_iter().map(|s| s.path).collect();
                        callback(&all);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Repository, remote, user, branch and commit summary
    pub fn status_text(&self) -> String {
        match self.context.get() {
            ContextState::Ready(ctx) => ctx.summary(),
            ContextState::Unavailable { kind, reason } => {
                format!("Git is unavailable ({}): {}", kind, reason)
            }
        }
    }

    /// Queue a scoped refresh for the paths the cache has never seen
    ///
    /// Returns `None` when every path is already known.
    pub fn refresh_if_unknown<S: AsRef<str>>(&self, paths: &[S]) -> Result<Option<OperationHandle>> {
        let unknown: Vec<String> = self
            .query_state(paths)
            .into_iter()
            .filter(|q| q.state.is_none())
            .filter_map(|q| q.path)
            .collect();
        if unknown.is_empty() {
            return Ok(None);
        }
        self.dispatcher
            .submit(OperationRequest::Refresh(RefreshScope::paths(unknown)))
            .map(Some)
    }

    /// Drop cached state for paths the host removed outside of git
    ///
    /// Returns the repository-relative paths that were cached.
    pub fn forget<S: AsRef<str>>(&self, paths: &[S]) -> Vec<String> {
        let root = self.root();
        let relative: Vec<String> = paths
            .iter()
            .filter_map(|p| relative_path(root.as_deref(), p.as_ref()))
            .collect();
        let removed = self.cache.remove(&relative);
        if !removed.is_empty() {
            debug!(count = removed.len(), "forgot cached paths");
            let _ = self.events.send(ProviderEvent::StateChanged(removed.clone()));
        }
        removed
    }

    /// Stop the worker; queued operations are cancelled
    pub async fn shutdown(self) {
        info!("shutting down git provider");
        self.dispatcher.shutdown().await;
    }
}
