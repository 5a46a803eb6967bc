//! Per-kind operation execution
//!
//! The worker hands each dequeued request to [`OperationHandler::execute`],
//! which runs git through the [`ToolRunner`], parses the output and applies
//! the resulting refresh to the [`StateCache`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::cache::{FileState, RefreshScope, StateCache, WorkingCopyStatus};
use crate::config::Config;
use crate::error::{DispatchError, Error, Result, RunnerError};
use crate::git::{
    ContextState, GitExecutor, RepositoryContext, SharedContext, ToolInvocation, ToolOutput,
    ToolRunner, command, detect_state, find_binary,
};
use crate::parse::{
    LockRecord, is_outside_repository, parse_attributes, parse_branches, parse_locks, parse_log,
    parse_staged_files, parse_status,
};

use super::{
    OperationFailure, OperationId, OperationKind, OperationOutcome, OperationPayload,
    OperationReport, OperationRequest, OperationStatus, ProviderEvent,
};

/// Appended to a push rejected because the remote moved on
pub const PULL_ADVICE: &str =
    "The remote branch contains commits you do not have locally. Sync (pull --rebase) before pushing again.";

/// Number of revisions fetched for a history request
pub const HISTORY_LIMIT: usize = 100;

fn push_rejected(stderr: &str) -> bool {
    stderr.contains("[rejected]") || stderr.contains("non-fast-forward") || stderr.contains("fetch first")
}

fn collect_info(output: &ToolOutput, info: &mut Vec<String>) {
    info.extend(
        output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from),
    );
}

/// Executes operations on behalf of the single worker task
pub struct OperationHandler {
    runner: Arc<dyn ToolRunner>,
    binary: PathBuf,
    cache: Arc<StateCache>,
    context: SharedContext,
    config: Config,
    events: broadcast::Sender<ProviderEvent>,
    /// Look the binary up again on reconnect (production runner only)
    rediscover: bool,
}

impl OperationHandler {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        binary: PathBuf,
        cache: Arc<StateCache>,
        context: SharedContext,
        config: Config,
        events: broadcast::Sender<ProviderEvent>,
    ) -> Self {
        Self {
            runner,
            binary,
            cache,
            context,
            config,
            events,
            rediscover: false,
        }
    }

    /// Re-run binary discovery on reconnect and swap in a fresh executor
    pub fn with_rediscovery(mut self, rediscover: bool) -> Self {
        self.rediscover = rediscover;
        self
    }

    /// Sender for lifecycle events the worker reports itself
    pub(crate) fn events(&self) -> broadcast::Sender<ProviderEvent> {
        self.events.clone()
    }

    fn emit(&self, event: ProviderEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run one operation to completion; never panics on tool failures
    #[instrument(skip(self, request), fields(op = %id, kind = %request.kind()))]
    pub async fn execute(&mut self, id: OperationId, request: &OperationRequest) -> OperationOutcome {
        let kind = request.kind();
        self.emit(ProviderEvent::Operation {
            id,
            kind,
            status: OperationStatus::Running,
        });

        let result = if let OperationRequest::Reconnect = request {
            self.reconnect(id).await
        } else {
            match self.context.get() {
                ContextState::Ready(ctx) => self.dispatch(id, &ctx, request).await.map_err(OperationFailure::from),
                ContextState::Unavailable { kind, reason } => {
                    debug!("rejecting {} while unavailable", request.kind());
                    Err(OperationFailure::new(kind, reason))
                }
            }
        };

        let status = match &result {
            Ok(report) => {
                info!(changed = report.changed.len(), "{} succeeded", kind);
                OperationStatus::Succeeded
            }
            Err(failure) => {
                warn!("{} failed ({}): {}", kind, failure.kind, failure.message);
                let stale = if request.affects_everything() {
                    self.cache.mark_all_stale()
                } else {
                    self.cache.mark_stale(request.paths())
                };
                if !stale.is_empty() {
                    self.emit(ProviderEvent::StateChanged(stale));
                }
                OperationStatus::Failed
            }
        };
        self.emit(ProviderEvent::Operation { id, kind, status });
        result
    }

    async fn dispatch(
        &self,
        id: OperationId,
        ctx: &RepositoryContext,
        request: &OperationRequest,
    ) -> Result<OperationReport> {
        let mut report = OperationReport::new(id, request.kind());

        match request {
            OperationRequest::Refresh(scope) => {
                report.changed = self.refresh(ctx, scope).await?;
            }
            OperationRequest::Add(paths) => {
                self.run_batched(ctx, paths, command::add, &mut report.info).await?;
                self.refresh_after(ctx, &RefreshScope::paths(paths.iter().cloned()), &mut report).await;
            }
            OperationRequest::Delete(paths) => {
                self.run_batched(ctx, paths, command::remove, &mut report.info).await?;
                self.refresh_after(ctx, &RefreshScope::paths(paths.iter().cloned()), &mut report).await;
            }
            OperationRequest::Resolve(paths) => {
                self.run_batched(ctx, paths, command::resolve, &mut report.info).await?;
                self.refresh_after(ctx, &RefreshScope::paths(paths.iter().cloned()), &mut report).await;
            }
            OperationRequest::Revert(paths) => {
                self.revert(ctx, paths, &mut report).await?;
                self.refresh_after(ctx, &RefreshScope::paths(paths.iter().cloned()), &mut report).await;
            }
            OperationRequest::Commit { paths, message } => {
                self.commit(ctx, paths, message, &mut report).await?;
            }
            OperationRequest::Sync => {
                let output = self.run(ctx, command::pull_rebase(&self.config.remote)).await?;
                collect_info(&output, &mut report.info);
                self.update_head(ctx).await;
                self.refresh_after(ctx, &RefreshScope::Full, &mut report).await;
            }
            OperationRequest::Push => {
                self.push(ctx, &mut report).await?;
            }
            OperationRequest::Lock(paths) => {
                self.require_locking(ctx)?;
                for path in paths {
                    let output = self.run(ctx, command::lfs_lock(path)).await?;
                    collect_info(&output, &mut report.info);
                }
                self.refresh_after(ctx, &RefreshScope::paths(paths.iter().cloned()), &mut report).await;
            }
            OperationRequest::Unlock(paths) => {
                self.require_locking(ctx)?;
                for path in paths {
                    let output = self.run(ctx, command::lfs_unlock(path)).await?;
                    collect_info(&output, &mut report.info);
                }
                self.refresh_after(ctx, &RefreshScope::paths(paths.iter().cloned()), &mut report).await;
            }
            OperationRequest::SwitchBranch { branch, create } => {
                let output = self.run(ctx, command::switch_branch(branch, *create)?).await?;
                collect_info(&output, &mut report.info);
                self.update_head(ctx).await;
                self.refresh_after(ctx, &RefreshScope::Full, &mut report).await;
            }
            OperationRequest::ListBranches => {
                let output = self.run(ctx, command::list_branches()).await?;
                report.payload = OperationPayload::Branches(parse_branches(&output.stdout)?);
            }
            OperationRequest::History { path } => {
                let output = self.run(ctx, command::history(path, HISTORY_LIMIT)).await?;
                report.payload = OperationPayload::History(parse_log(&output.stdout)?);
            }
            OperationRequest::Reconnect => {
                return Err(DispatchError::Unavailable("reconnect must not reach dispatch".to_string()).into());
            }
        }

        Ok(report)
    }

    fn invocation(&self, ctx: &RepositoryContext, args: Vec<String>) -> ToolInvocation {
        ToolInvocation::new(&ctx.root, args).with_timeout(self.config.operation_timeout())
    }

    async fn run(&self, ctx: &RepositoryContext, args: Vec<String>) -> Result<ToolOutput> {
        self.runner.execute(&self.invocation(ctx, args)).await
    }

    async fn run_with_stdin(
        &self,
        ctx: &RepositoryContext,
        args: Vec<String>,
        stdin: String,
    ) -> Result<ToolOutput> {
        self.runner
            .execute(&self.invocation(ctx, args).with_stdin(stdin))
            .await
    }

    async fn run_batched(
        &self,
        ctx: &RepositoryContext,
        paths: &[String],
        build: fn(&[String]) -> Vec<String>,
        info: &mut Vec<String>,
    ) -> Result<()> {
        for batch in command::batches(paths, self.config.max_files_per_batch) {
            let output = self.run(ctx, build(batch)).await?;
            collect_info(&output, info);
        }
        Ok(())
    }

    fn require_locking(&self, ctx: &RepositoryContext) -> Result<()> {
        if ctx.lfs_locking {
            Ok(())
        } else {
            Err(DispatchError::LockingDisabled.into())
        }
    }

    /// Refresh `scope` and apply the result to the cache in one batch
    ///
    /// Returns the paths whose observable state changed.
    async fn refresh(&self, ctx: &RepositoryContext, scope: &RefreshScope) -> Result<Vec<String>> {
        let epoch = self.cache.epoch();
        let mut entries = Vec::new();
        let mut staged: HashMap<String, String> = HashMap::new();

        match scope {
            RefreshScope::Full => {
                let output = self.run(ctx, command::status(&[])).await?;
                entries = parse_status(&output.stdout)?;
            }
            RefreshScope::Paths(paths) => {
                for batch in command::batches(paths, self.config.max_files_per_batch) {
                    match self.run(ctx, command::status(batch)).await {
                        Ok(output) => entries.extend(parse_status(&output.stdout)?),
                        Err(Error::Runner(RunnerError::NonZeroExit { stderr, .. }))
                            if is_outside_repository(&stderr) =>
                        {
                            info!("{}", stderr.trim());
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                    let output = self.run(ctx, command::ls_files_stage(batch)).await?;
                    staged.extend(parse_staged_files(&output.stdout)?);
                }
            }
        }

        let locks = if ctx.lfs_locking {
            match self.run(ctx, command::lfs_locks()).await {
                Ok(output) => Some(parse_locks(&output.stdout)?),
                Err(e) => {
                    warn!("lock list unavailable, keeping cached locks: {}", e);
                    None
                }
            }
        } else {
            Some(Vec::new())
        };

        let mut records: BTreeMap<String, FileState> = BTreeMap::new();
        for entry in entries {
            let mut state = FileState::new(entry.path.clone(), entry.status);
            state.renamed_from = entry.renamed_from;
            state.revision = staged.get(&entry.path).cloned();
            records.insert(entry.path, state);
        }
        for (path, blob) in &staged {
            records
                .entry(path.clone())
                .or_insert_with(|| FileState::new(path.clone(), WorkingCopyStatus::Unmodified).with_revision(blob.clone()));
        }

        let lock_list: Vec<LockRecord> = match locks {
            Some(list) => list,
            None => self
                .cache
                .snapshot()
                .into_iter()
                .filter_map(|state| {
                    state.lock_owner.map(|owner| LockRecord {
                        path: state.path,
                        owner,
                        id: None,
                    })
                })
                .collect(),
        };
        for lock in lock_list.into_iter().filter(|l| scope.covers(&l.path)) {
            let mine = ctx.lfs_user.as_deref() == Some(lock.owner.as_str());
            let state = records
                .remove(&lock.path)
                .unwrap_or_else(|| FileState::new(lock.path.clone(), WorkingCopyStatus::Unmodified));
            records.insert(lock.path, state.with_lock(lock.owner, mine));
        }

        if self.config.classify_files && !records.is_empty() {
            let input: String = records.keys().map(|p| format!("{p}\0")).collect();
            let classes = self
                .run_with_stdin(ctx, command::check_attr(), input)
                .await
                .and_then(|output| parse_attributes(&output.stdout));
            match classes {
                Ok(classes) => {
                    for (path, class) in classes {
                        if let Some(state) = records.get_mut(&path) {
                            state.classification = class;
                        }
                    }
                }
                Err(e) => warn!("attribute classification skipped: {}", e),
            }
        }

        let delta = self
            .cache
            .apply_refresh(scope, records.into_values().collect(), epoch)?;
        if !delta.changed.is_empty() {
            self.emit(ProviderEvent::StateChanged(delta.changed.clone()));
        }
        Ok(delta.changed)
    }

    /// Refresh following a successful mutation
    ///
    /// The mutation already happened, so a failing refresh only leaves the
    /// paths stale and adds a warning to the report.
    async fn refresh_after(&self, ctx: &RepositoryContext, scope: &RefreshScope, report: &mut OperationReport) {
        match self.refresh(ctx, scope).await {
            Ok(changed) => report.changed = changed,
            Err(e) => {
                warn!("refresh after {} failed: {}", report.kind, e);
                report.info.push(format!("State refresh failed: {}", e.user_message()));
                let stale = match scope {
                    RefreshScope::Full => self.cache.mark_all_stale(),
                    RefreshScope::Paths(paths) => self.cache.mark_stale(paths),
                };
                if !stale.is_empty() {
                    self.emit(ProviderEvent::StateChanged(stale));
                }
            }
        }
    }

    async fn update_head(&self, ctx: &RepositoryContext) {
        let (branch, head) = RepositoryContext::current_head(self.runner.as_ref(), &ctx.root, &self.config).await;
        self.context.update(|c| {
            c.branch = branch;
            c.head = head;
        });
    }

    /// Unstage, restore tracked files and release our own locks
    async fn revert(&self, ctx: &RepositoryContext, paths: &[String], report: &mut OperationReport) -> Result<()> {
        self.run_batched(ctx, paths, command::reset, &mut report.info).await?;

        // Files that were only added are untracked now and stay on disk
        let mut tracked = Vec::new();
        for batch in command::batches(paths, self.config.max_files_per_batch) {
            let output = self.run(ctx, command::ls_files_stage(batch)).await?;
            tracked.extend(parse_staged_files(&output.stdout)?.into_keys());
        }
        tracked.sort();
        if !tracked.is_empty() {
            self.run_batched(ctx, &tracked, command::checkout_files, &mut report.info)
                .await?;
        }

        if ctx.lfs_locking {
            self.release_own_locks(ctx, paths, &mut report.info).await;
        }
        Ok(())
    }

    async fn commit(
        &self,
        ctx: &RepositoryContext,
        paths: &[String],
        message: &str,
        report: &mut OperationReport,
    ) -> Result<()> {
        // An empty path list commits whatever is staged
        let chunks: Vec<&[String]> = if paths.is_empty() {
            vec![paths]
        } else {
            command::batches(paths, self.config.max_files_per_batch).collect()
        };
        for (i, batch) in chunks.into_iter().enumerate() {
            let output = self
                .run_with_stdin(ctx, command::commit(batch, i > 0), message.to_string())
                .await?;
            collect_info(&output, &mut report.info);
        }

        let (branch, head) = RepositoryContext::current_head(self.runner.as_ref(), &ctx.root, &self.config).await;
        if let Some(head) = &head {
            report
                .info
                .push(format!("Committed {}: {}", head.short_id(), head.summary));
            report.payload = OperationPayload::Commit(head.clone());
        }
        self.context.update(|c| {
            c.branch = branch;
            c.head = head;
        });

        if ctx.lfs_locking {
            self.release_own_locks(ctx, paths, &mut report.info).await;
        }

        let scope = if paths.is_empty() {
            RefreshScope::Full
        } else {
            RefreshScope::paths(paths.iter().cloned())
        };
        self.refresh_after(ctx, &scope, report).await;

        if self.config.push_after_commit {
            self.push(ctx, report).await?;
        }
        Ok(())
    }

    async fn push(&self, ctx: &RepositoryContext, report: &mut OperationReport) -> Result<()> {
        match self.run(ctx, command::push(&self.config.remote)).await {
            Ok(output) => {
                collect_info(&output, &mut report.info);
                Ok(())
            }
            Err(Error::Runner(RunnerError::NonZeroExit {
                command,
                code,
                stderr,
            })) if push_rejected(&stderr) => Err(RunnerError::NonZeroExit {
                command,
                code,
                stderr: format!("{}\n{}", stderr.trim(), PULL_ADVICE),
            }
            .into()),
            Err(e) => Err(e),
        }
    }

    /// Unlock the paths we hold; failures are reported, not fatal
    async fn release_own_locks(&self, ctx: &RepositoryContext, paths: &[String], info: &mut Vec<String>) {
        let Some(me) = ctx.lfs_user.as_deref() else {
            return;
        };
        let held = self.cache.get_batch(paths);
        for path in paths {
            if held.get(path).and_then(|s| s.lock_owner.as_deref()) != Some(me) {
                continue;
            }
            match self.run(ctx, command::lfs_unlock(path)).await {
                Ok(output) => collect_info(&output, info),
                Err(e) => {
                    warn!("failed to unlock {}: {}", path, e);
                    info.push(format!("Could not unlock {}: {}", path, e.user_message()));
                }
            }
        }
    }

    /// Re-detect the tool and repository, start a new cache epoch, then refresh everything
    async fn reconnect(&mut self, id: OperationId) -> OperationOutcome {
        if self.rediscover {
            match find_binary(&self.config) {
                Ok(binary) => {
                    self.runner = Arc::new(GitExecutor::new(binary.clone()).with_output_cap(self.config.output_cap_bytes));
                    self.binary = binary;
                }
                Err(e) => {
                    let failure = OperationFailure::from(&e);
                    self.context.set(ContextState::Unavailable {
                        kind: failure.kind,
                        reason: failure.message.clone(),
                    });
                    self.cache.invalidate_all();
                    self.emit(ProviderEvent::AvailabilityChanged(false));
                    return Err(failure);
                }
            }
        }

        let state = detect_state(self.runner.as_ref(), self.binary.clone(), &self.config).await;
        self.context.set(state.clone());
        let epoch = self.cache.invalidate_all();
        info!(epoch, available = state.is_available(), "reconnected");
        self.emit(ProviderEvent::AvailabilityChanged(state.is_available()));

        match state {
            ContextState::Ready(ctx) => {
                let mut report = OperationReport::new(id, OperationKind::Reconnect);
                report.changed = self.refresh(&ctx, &RefreshScope::Full).await?;
                report.info.push(ctx.summary());
                Ok(report)
            }
            ContextState::Unavailable { kind, reason } => Err(OperationFailure::new(kind, reason)),
        }
    }
}
