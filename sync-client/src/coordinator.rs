//! Sync coordinator.
//!
//! One call to [`SyncCoordinator::run`] is one synchronization run: read the
//! checkpoint, drain the feeds, resolve, plan, apply everything inside a single
//! transaction, commit, and only then advance the checkpoint.

use crate::feed::{ChangeFeed, FeedOptions, DEFAULT_IDS_PER_QUERY};
use crate::source::{Source, SourceError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use sync_core::{
    bootstrap_actions, resolve, Action, ResolveError, RunAction, RunEvent, RunState, SyncMode,
    TextIdAllocator, WritePlanner,
};
use sync_store::{CheckpointStore, ReplicaStore, StorageError, DEFAULT_CHECKPOINT_KEY};
use sync_types::time::format_timestamp;
use thiserror::Error;

/// Why a run failed. The checkpoint is never advanced by a failed run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Reading the source failed.
    #[error("source error: {0}")]
    Source(SourceError),

    /// A response wanted to continue where that is not supported.
    #[error("unsupported continuation parameter {parameter}")]
    UnsupportedContinuation {
        /// The parameter the source sent.
        parameter: String,
    },

    /// The window could not be resolved.
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// A storage operation failed.
    #[error("{action} failed at {operation}: {source}")]
    Apply {
        /// The action being applied.
        action: String,
        /// The operation that failed.
        operation: &'static str,
        /// What the store reported.
        source: StorageError,
    },

    /// A storage step outside the action list failed.
    #[error("storage error during {step}: {source}")]
    Storage {
        /// The step (`begin`, `commit`, ...).
        step: &'static str,
        /// What the store reported.
        source: StorageError,
    },

    /// The run took longer than allowed.
    #[error("run timed out after {after:?}")]
    Timeout {
        /// The configured limit.
        after: Duration,
    },
}

impl From<SourceError> for RunError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::UnsupportedContinuation { parameter } => {
                RunError::UnsupportedContinuation { parameter }
            }
            other => RunError::Source(other),
        }
    }
}

/// Failure categories reported for a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unreachable source, bad status, API error, malformed response.
    Transport,
    /// A continuation token the reader cannot resume.
    UnsupportedContinuation,
    /// A merge that cannot be applied safely.
    MergeSafety,
    /// A storage constraint or database failure.
    Storage,
    /// The run timeout expired.
    Timeout,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::UnsupportedContinuation => write!(f, "unsupported-continuation"),
            ErrorCategory::MergeSafety => write!(f, "merge-safety"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Timeout => write!(f, "timeout"),
        }
    }
}

impl RunError {
    /// Category of this failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RunError::Source(_) => ErrorCategory::Transport,
            RunError::UnsupportedContinuation { .. } => ErrorCategory::UnsupportedContinuation,
            RunError::Resolve(ResolveError::MergeAfterMove { .. }) => ErrorCategory::MergeSafety,
            // A self-contradicting log entry is a malformed response.
            RunError::Resolve(ResolveError::ContradictoryTagChange { .. }) => {
                ErrorCategory::Transport
            }
            RunError::Apply { .. } | RunError::Storage { .. } => ErrorCategory::Storage,
            RunError::Timeout { .. } => ErrorCategory::Timeout,
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Fetch and store revision text.
    pub with_content: bool,
    /// Key of the checkpoint row.
    pub checkpoint_key: String,
    /// Titles or page IDs per lookup request.
    pub ids_per_query: usize,
    /// Abort the run after this long.
    pub run_timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            with_content: false,
            checkpoint_key: DEFAULT_CHECKPOINT_KEY.to_string(),
            ids_per_query: DEFAULT_IDS_PER_QUERY,
            run_timeout: None,
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// How the replica was populated.
    pub mode: SyncMode,
    /// Start of the window (incremental runs).
    pub since: Option<DateTime<Utc>>,
    /// Checkpoint written by this run.
    pub checkpoint: Option<DateTime<Utc>>,
    /// Canonical actions applied.
    pub actions: usize,
    /// Storage operations executed.
    pub operations: usize,
    /// Rows written across all operations.
    pub rows_written: u64,
    /// Text blobs allocated.
    pub texts_allocated: u64,
    /// Pages whose last event in the window was a deletion.
    pub pages_ended_deleted: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sync", self.mode)?;
        if let Some(since) = &self.since {
            write!(f, " since {}", format_timestamp(since))?;
        }
        write!(
            f,
            ": {} actions, {} operations, {} rows written, {} texts",
            self.actions, self.operations, self.rows_written, self.texts_allocated
        )?;
        if let Some(checkpoint) = &self.checkpoint {
            write!(f, "; checkpoint {}", format_timestamp(checkpoint))?;
        }
        Ok(())
    }
}

/// What a committed transaction did.
struct Applied {
    actions: usize,
    operations: usize,
    rows_written: u64,
    texts_allocated: u64,
    pages_ended_deleted: usize,
}

/// Runs synchronizations of one replica against one source.
pub struct SyncCoordinator<S, R> {
    source: S,
    replica: R,
    options: SyncOptions,
}

impl<S, R> SyncCoordinator<S, R>
where
    S: Source,
    R: ReplicaStore + CheckpointStore,
{
    /// Create a coordinator.
    pub fn new(source: S, replica: R, options: SyncOptions) -> Self {
        Self {
            source,
            replica,
            options,
        }
    }

    /// The replica this coordinator writes.
    pub fn replica(&self) -> &R {
        &self.replica
    }

    /// Run one synchronization now.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        self.run_at(Utc::now()).await
    }

    /// Run one synchronization; `now` becomes the checkpoint on success.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let result = match self.options.run_timeout {
            Some(after) => tokio::time::timeout(after, self.execute(now))
                .await
                .unwrap_or(Err(RunError::Timeout { after })),
            None => self.execute(now).await,
        };

        match &result {
            Ok(report) => tracing::info!("{}", report),
            Err(err) => tracing::error!(category = %err.category(), "sync failed: {}", err),
        }
        result
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let key = self.options.checkpoint_key.as_str();
        let checkpoint = self
            .replica
            .read_checkpoint(key)
            .await
            .map_err(|source| RunError::Storage {
                step: "read checkpoint",
                source,
            })?;

        let state = RunState::start(checkpoint, now);
        let mode = state.mode().unwrap_or(SyncMode::Bootstrap);
        let since = state.since();
        match since {
            Some(since) => {
                tracing::info!("starting {} sync since {}", mode, format_timestamp(&since))
            }
            None => tracing::info!("starting {} sync", mode),
        }

        let applied = match self.apply(since).await {
            Ok(applied) => applied,
            Err(err) => {
                let (state, _) = state.on_event(RunEvent::Aborted {
                    reason: err.to_string(),
                });
                tracing::debug!("run state: {:?}", state);
                return Err(err);
            }
        };

        let (state, actions) = state.on_event(RunEvent::Committed);
        let mut checkpoint = None;
        for action in actions {
            match action {
                RunAction::WriteCheckpoint(at) => {
                    self.replica
                        .write_checkpoint(key, at)
                        .await
                        .map_err(|source| RunError::Storage {
                            step: "write checkpoint",
                            source,
                        })?;
                    checkpoint = Some(at);
                }
            }
        }
        tracing::debug!("run state: {:?}", state);

        Ok(RunReport {
            mode,
            since,
            checkpoint,
            actions: applied.actions,
            operations: applied.operations,
            rows_written: applied.rows_written,
            texts_allocated: applied.texts_allocated,
            pages_ended_deleted: applied.pages_ended_deleted,
        })
    }

    /// Read, resolve and apply one window inside one transaction.
    async fn apply(&self, since: Option<DateTime<Utc>>) -> Result<Applied, RunError> {
        let feed = ChangeFeed::new(
            &self.source,
            FeedOptions {
                with_content: self.options.with_content,
                ids_per_query: self.options.ids_per_query,
            },
        );

        let (actions, pages_ended_deleted): (Vec<Action>, usize) = match since {
            None => (bootstrap_actions(feed.read_full().await?), 0),
            Some(since) => {
                let resolution = resolve(feed.read_since(since).await?)?;
                (resolution.actions, resolution.ended_deleted.len())
            }
        };
        tracing::debug!("{} canonical actions", actions.len());

        let storage = |step: &'static str| move |source: StorageError| RunError::Storage { step, source };

        let mut tx = self.replica.begin().await.map_err(storage("begin"))?;
        if since.is_none() {
            tx.clear_revisions()
                .await
                .map_err(storage("clear revisions"))?;
        }
        let max_text_id = tx.max_text_id().await.map_err(storage("seed text ids"))?;
        let mut texts = TextIdAllocator::seeded(max_text_id);

        let planner = WritePlanner::new(self.options.with_content);
        let mut operations = 0;
        let mut rows_written = 0;
        for action in &actions {
            for op in planner.plan(action, &mut texts) {
                rows_written += tx.execute(&op).await.map_err(|source| RunError::Apply {
                    action: action.to_string(),
                    operation: op.name(),
                    source,
                })?;
                operations += 1;
            }
        }

        tx.commit().await.map_err(storage("commit"))?;

        Ok(Applied {
            actions: actions.len(),
            operations,
            rows_written,
            texts_allocated: texts.allocated(),
            pages_ended_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockSource;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use sync_store::{RevisionLocation, SqliteReplica};
    use sync_types::{PageId, PageTitle, RevisionId, TextId};

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap()
    }

    fn rev(id: u64, parent: u64, timestamp: &str) -> Value {
        json!({"revid": id, "parentid": parent, "timestamp": timestamp, "user": "Alice",
               "userid": 7, "size": 5, "comment": "edit", "tags": []})
    }

    fn log(id: u64, kind: &str, action: &str, title: &str, logpage: u64, params: Value) -> Value {
        json!({"logid": id, "type": kind, "action": action, "ns": 0, "title": title,
               "logpage": logpage, "params": params, "timestamp": "2020-01-01T12:00:00Z"})
    }

    async fn setup(options: SyncOptions) -> (MockSource, SqliteReplica, SyncCoordinator<MockSource, SqliteReplica>) {
        let source = MockSource::new();
        let replica = SqliteReplica::in_memory().await.unwrap();
        let coordinator = SyncCoordinator::new(source.clone(), replica.clone(), options);
        (source, replica, coordinator)
    }

    /// Bootstrap page 1 ("Foo") with revisions 100 and 101.
    async fn bootstrap(source: &MockSource, coordinator: &SyncCoordinator<MockSource, SqliteReplica>) {
        source.respond(
            &[("list", "allrevisions")],
            json!({"query": {"allrevisions": [
                {"pageid": 1, "ns": 0, "title": "Foo", "revisions": [
                    rev(100, 0, "2019-12-01T00:00:00Z"), rev(101, 100, "2019-12-02T00:00:00Z")
                ]}
            ]}}),
        );
        let report = coordinator.run_at(t(10)).await.unwrap();
        assert_eq!(report.mode, SyncMode::Bootstrap);
    }

    #[tokio::test]
    async fn bootstrap_stores_revisions_with_content() {
        let (source, replica, coordinator) = setup(SyncOptions {
            with_content: true,
            ..SyncOptions::default()
        })
        .await;
        let mut first = rev(100, 0, "2019-12-01T00:00:00Z");
        first["content"] = json!("hello");
        let mut second = rev(101, 100, "2019-12-02T00:00:00Z");
        second["content"] = json!("hello world");
        source.respond(
            &[("list", "allrevisions")],
            json!({"query": {"allrevisions": [
                {"pageid": 1, "ns": 0, "title": "Foo", "revisions": [first, second]}
            ]}}),
        );

        let report = coordinator.run_at(t(10)).await.unwrap();

        assert_eq!(report.mode, SyncMode::Bootstrap);
        assert_eq!(report.actions, 2);
        assert_eq!(report.texts_allocated, 2);
        assert_eq!(report.checkpoint, Some(t(10)));

        let stats = replica.stats().await.unwrap();
        assert_eq!(stats.revisions, 2);
        assert_eq!(stats.texts, 2);

        let stored = replica
            .find_revision(RevisionId::new(101))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.location, RevisionLocation::Live);
        assert_eq!(stored.page_id, Some(PageId::new(1)));
        let text = replica.text(stored.text_id.unwrap()).await.unwrap();
        assert_eq!(text.as_deref(), Some("hello world"));

        assert_eq!(
            replica.read_checkpoint(DEFAULT_CHECKPOINT_KEY).await.unwrap(),
            Some(t(10))
        );
    }

    #[tokio::test]
    async fn bootstrap_replaces_previous_rows() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;

        // Forget the checkpoint so the next run bootstraps again.
        let other = SyncCoordinator::new(
            source.clone(),
            replica.clone(),
            SyncOptions {
                checkpoint_key: "fresh".into(),
                ..SyncOptions::default()
            },
        );
        source.respond(
            &[("list", "allrevisions")],
            json!({"query": {"allrevisions": [
                {"pageid": 2, "ns": 0, "title": "Bar", "revisions": [rev(300, 0, "2019-12-03T00:00:00Z")]}
            ]}}),
        );
        other.run_at(t(11)).await.unwrap();

        let stats = replica.stats().await.unwrap();
        assert_eq!(stats.revisions, 1);
        assert!(replica.find_revision(RevisionId::new(100)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incremental_delete_then_restore_keeps_live_rows() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;

        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [
                log(1, "delete", "delete", "Foo", 0, json!({})),
                log(2, "delete", "restore", "Foo", 1, json!({}))
            ]}}),
        );
        let report = coordinator.run_at(t(11)).await.unwrap();

        assert_eq!(report.mode, SyncMode::Incremental);
        assert_eq!(report.since, Some(t(10)));
        assert_eq!(report.pages_ended_deleted, 0);
        for id in [100, 101] {
            let stored = replica
                .find_revision(RevisionId::new(id))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.location, RevisionLocation::Live);
            assert_eq!(stored.page_id, Some(PageId::new(1)));
        }
        assert_eq!(
            replica.read_checkpoint(DEFAULT_CHECKPOINT_KEY).await.unwrap(),
            Some(t(11))
        );
    }

    #[tokio::test]
    async fn restore_moves_archived_revisions_and_tags() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        let mut archived = rev(200, 0, "2019-11-01T00:00:00Z");
        archived["tags"] = json!(["mobile edit"]);
        source.respond(
            &[("list", "alldeletedrevisions")],
            json!({"query": {"alldeletedrevisions": [
                {"ns": 0, "title": "Bar", "revisions": [archived]}
            ]}}),
        );
        coordinator.run_at(t(10)).await.unwrap();
        let stored = replica
            .find_revision(RevisionId::new(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.location, RevisionLocation::Archived);

        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [log(1, "delete", "restore", "Bar", 5, json!({}))]}}),
        );
        coordinator.run_at(t(11)).await.unwrap();

        let stored = replica
            .find_revision(RevisionId::new(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.location, RevisionLocation::Live);
        assert_eq!(stored.page_id, Some(PageId::new(5)));
        assert_eq!(
            replica.tags_of(RevisionId::new(200)).await.unwrap(),
            vec!["mobile edit".to_string()]
        );
        let stats = replica.stats().await.unwrap();
        assert_eq!(stats.archived_revisions, 0);
        assert_eq!(stats.archived_tag_links, 0);
        assert_eq!(stats.tag_links, 1);
        assert_eq!(stats.duplicated, 0);
    }

    #[tokio::test]
    async fn restore_under_a_new_page_id_moves_archived_revisions() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        source.respond(
            &[("list", "alldeletedrevisions")],
            json!({"query": {"alldeletedrevisions": [
                {"pageid": 8, "ns": 0, "title": "Bar", "revisions": [rev(200, 0, "2019-11-01T00:00:00Z")]}
            ]}}),
        );
        coordinator.run_at(t(10)).await.unwrap();
        let stored = replica
            .find_revision(RevisionId::new(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.location, RevisionLocation::Archived);
        assert_eq!(stored.page_id, None);

        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [
                log(1, "delete", "delete", "Bar", 8, json!({})),
                log(2, "delete", "restore", "Bar", 5, json!({}))
            ]}}),
        );
        coordinator.run_at(t(11)).await.unwrap();

        let stored = replica
            .find_revision(RevisionId::new(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.location, RevisionLocation::Live);
        assert_eq!(stored.page_id, Some(PageId::new(5)));
        assert_eq!(replica.stats().await.unwrap().archived_revisions, 0);
    }

    #[tokio::test]
    async fn merge_of_moved_page_aborts_without_writes() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;
        let before = replica.stats().await.unwrap();

        source.respond(
            &[("list", "allrevisions")],
            json!({"query": {"allrevisions": [
                {"pageid": 1, "ns": 0, "title": "Foo", "revisions": [rev(102, 101, "2020-01-01T11:00:00Z")]}
            ]}}),
        );
        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [
                log(1, "move", "move", "Foo", 1, json!({"target_ns": 0, "target_title": "Foo2"})),
                log(2, "merge", "merge", "Foo2", 1,
                    json!({"dest_ns": 0, "dest_title": "Target", "mergepoint": "2020-01-01T00:00:00Z"}))
            ]}}),
        );

        let err = coordinator.run_at(t(11)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::MergeSafety);
        assert!(matches!(
            err,
            RunError::Resolve(ResolveError::MergeAfterMove { page_id }) if page_id == PageId::new(1)
        ));

        assert_eq!(replica.stats().await.unwrap(), before);
        assert!(replica.find_revision(RevisionId::new(102)).await.unwrap().is_none());
        assert_eq!(
            replica.read_checkpoint(DEFAULT_CHECKPOINT_KEY).await.unwrap(),
            Some(t(10))
        );
    }

    #[tokio::test]
    async fn unsupported_continuation_fails_the_run() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;

        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [log(1, "delete", "delete", "Foo", 0, json!({}))]}}),
        );
        source.respond(
            &[("prop", "deletedrevisions")],
            json!({"continue": {"drvcontinue": "x", "continue": "||"}, "query": {"pages": []}}),
        );

        let err = coordinator.run_at(t(11)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::UnsupportedContinuation);
        assert!(matches!(
            err,
            RunError::UnsupportedContinuation { ref parameter } if parameter == "drvcontinue"
        ));
        assert_eq!(
            replica.read_checkpoint(DEFAULT_CHECKPOINT_KEY).await.unwrap(),
            Some(t(10))
        );
    }

    #[tokio::test]
    async fn transport_failure_leaves_no_checkpoint() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        source.fail_next("connection refused");

        let err = coordinator.run_at(t(10)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert_eq!(
            replica.read_checkpoint(DEFAULT_CHECKPOINT_KEY).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn failed_operation_rolls_back_the_whole_run() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;

        source.respond(
            &[("list", "allrevisions")],
            json!({"query": {"allrevisions": [
                {"pageid": 1, "ns": 0, "title": "Foo", "revisions": [rev(102, 101, "2020-01-01T11:00:00Z")]}
            ]}}),
        );
        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [
                log(1, "tag", "update", "Foo", 1, json!({"revid": 999, "tagsAdded": ["T1"], "tagsRemoved": []}))
            ]}}),
        );

        let err = coordinator.run_at(t(11)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Storage);
        match &err {
            RunError::Apply {
                action,
                operation,
                source,
            } => {
                assert!(action.starts_with("AddTag"));
                assert_eq!(*operation, "insert_tag_link_where_held");
                assert!(matches!(source, StorageError::UnknownRevision { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(replica.find_revision(RevisionId::new(102)).await.unwrap().is_none());
        assert_eq!(
            replica.read_checkpoint(DEFAULT_CHECKPOINT_KEY).await.unwrap(),
            Some(t(10))
        );
    }

    #[tokio::test]
    async fn tag_changes_apply_net_effect() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;

        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [
                log(1, "tag", "update", "Foo", 1, json!({"revid": 100, "tagsAdded": ["T1"], "tagsRemoved": []})),
                log(2, "tag", "update", "Foo", 1, json!({"revid": 100, "tagsAdded": [], "tagsRemoved": ["T1"]})),
                log(3, "tag", "update", "Foo", 1, json!({"revid": "100", "tagsAdded": ["T2"], "tagsRemoved": []}))
            ]}}),
        );
        let report = coordinator.run_at(t(11)).await.unwrap();

        assert_eq!(report.actions, 1);
        assert_eq!(
            replica.tags_of(RevisionId::new(100)).await.unwrap(),
            vec!["T2".to_string()]
        );
    }

    #[tokio::test]
    async fn rerunning_a_window_is_idempotent() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;

        let window = |source: &MockSource| {
            source.respond(
                &[("list", "allrevisions")],
                json!({"query": {"allrevisions": [
                    {"pageid": 1, "ns": 0, "title": "Foo", "revisions": [rev(102, 101, "2020-01-01T11:00:00Z")]}
                ]}}),
            );
            source.respond(
                &[("list", "logevents")],
                json!({"query": {"logevents": [
                    log(1, "tag", "update", "Foo", 1, json!({"revid": 100, "tagsAdded": ["T1"], "tagsRemoved": []})),
                    log(2, "delete", "revision", "Foo", 1,
                        json!({"type": "revision", "ids": [101], "old": {"bitmask": 0}, "new": {"bitmask": 1}}))
                ]}}),
            );
        };

        window(&source);
        coordinator.run_at(t(11)).await.unwrap();
        let once = replica.stats().await.unwrap();

        replica
            .write_checkpoint(DEFAULT_CHECKPOINT_KEY, t(10))
            .await
            .unwrap();
        window(&source);
        coordinator.run_at(t(11)).await.unwrap();

        assert_eq!(replica.stats().await.unwrap(), once);
        assert_eq!(once.revisions, 3);
        assert_eq!(
            replica.tags_of(RevisionId::new(100)).await.unwrap(),
            vec!["T1".to_string()]
        );
        let hidden = replica
            .find_revision(RevisionId::new(101))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hidden.deleted, 1);
    }

    #[tokio::test]
    async fn rerunning_a_window_with_content_keeps_text_references() {
        let (source, replica, coordinator) = setup(SyncOptions {
            with_content: true,
            ..SyncOptions::default()
        })
        .await;
        bootstrap(&source, &coordinator).await;

        let window = |source: &MockSource| {
            let mut added = rev(102, 101, "2020-01-01T11:00:00Z");
            added["content"] = json!("new text");
            let mut gone = rev(90, 0, "2020-01-01T10:30:00Z");
            gone["content"] = json!("deleted text");
            source.respond(
                &[("list", "allrevisions")],
                json!({"query": {"allrevisions": [
                    {"pageid": 1, "ns": 0, "title": "Foo", "revisions": [added]}
                ]}}),
            );
            source.respond(
                &[("list", "logevents")],
                json!({"query": {"logevents": [log(1, "delete", "delete", "Old", 3, json!({}))]}}),
            );
            source.respond(
                &[("prop", "deletedrevisions")],
                json!({"query": {"pages": [
                    {"ns": 0, "title": "Old", "missing": true, "deletedrevisions": [gone]}
                ]}}),
            );
        };

        window(&source);
        coordinator.run_at(t(11)).await.unwrap();
        let once = replica.stats().await.unwrap();
        let text_of = |id: u64| {
            let replica = replica.clone();
            async move {
                replica
                    .find_revision(RevisionId::new(id))
                    .await
                    .unwrap()
                    .unwrap()
                    .text_id
            }
        };
        let (added_text, gone_text) = (text_of(102).await, text_of(90).await);
        assert!(added_text.is_some());
        assert!(gone_text.is_some());

        replica
            .write_checkpoint(DEFAULT_CHECKPOINT_KEY, t(10))
            .await
            .unwrap();
        window(&source);
        coordinator.run_at(t(11)).await.unwrap();

        assert_eq!(replica.stats().await.unwrap(), once);
        assert_eq!(once.texts, 2);
        assert_eq!(text_of(102).await, added_text);
        assert_eq!(text_of(90).await, gone_text);
        let text = replica.text(added_text.unwrap()).await.unwrap();
        assert_eq!(text.as_deref(), Some("new text"));
    }

    #[tokio::test]
    async fn merge_reassigns_revisions_up_to_merge_point() {
        let (source, replica, coordinator) = setup(SyncOptions::default()).await;
        bootstrap(&source, &coordinator).await;
        replica
            .upsert_page(PageId::new(9), &PageTitle::new(Default::default(), "Target"))
            .await
            .unwrap();

        source.respond(
            &[("list", "logevents")],
            json!({"query": {"logevents": [
                log(1, "merge", "merge", "Foo", 1,
                    json!({"dest_ns": 0, "dest_title": "Target", "mergepoint": "2019-12-01T12:00:00Z"}))
            ]}}),
        );
        coordinator.run_at(t(11)).await.unwrap();

        let merged = replica
            .find_revision(RevisionId::new(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.page_id, Some(PageId::new(9)));
        let kept = replica
            .find_revision(RevisionId::new(101))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.page_id, Some(PageId::new(1)));
    }

    #[tokio::test]
    async fn text_ids_continue_from_stored_maximum() {
        let (source, replica, coordinator) = setup(SyncOptions {
            with_content: true,
            ..SyncOptions::default()
        })
        .await;
        let mut first = rev(100, 0, "2019-12-01T00:00:00Z");
        first["content"] = json!("a");
        source.respond(
            &[("list", "allrevisions")],
            json!({"query": {"allrevisions": [{"pageid": 1, "ns": 0, "title": "Foo", "revisions": [first]}]}}),
        );
        coordinator.run_at(t(10)).await.unwrap();

        let mut second = rev(101, 100, "2020-01-01T11:00:00Z");
        second["content"] = json!("b");
        source.respond(
            &[("list", "allrevisions")],
            json!({"query": {"allrevisions": [{"pageid": 1, "ns": 0, "title": "Foo", "revisions": [second]}]}}),
        );
        coordinator.run_at(t(11)).await.unwrap();

        let stored = replica
            .find_revision(RevisionId::new(101))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.text_id, Some(TextId::new(2)));
    }

    #[tokio::test]
    async fn timeout_fails_the_run() {
        let (source, replica, coordinator) = setup(SyncOptions {
            run_timeout: Some(Duration::from_millis(20)),
            ..SyncOptions::default()
        })
        .await;
        source.set_latency(Duration::from_millis(500));

        let err = coordinator.run_at(t(10)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(
            replica.read_checkpoint(DEFAULT_CHECKPOINT_KEY).await.unwrap(),
            None
        );
    }

    #[test]
    fn report_display() {
        let report = RunReport {
            mode: SyncMode::Incremental,
            since: Some(t(10)),
            checkpoint: Some(t(11)),
            actions: 3,
            operations: 5,
            rows_written: 4,
            texts_allocated: 0,
            pages_ended_deleted: 0,
        };
        assert_eq!(
            report.to_string(),
            "incremental sync since 2020-01-01T10:00:00Z: 3 actions, 5 operations, 4 rows written, 0 texts; checkpoint 2020-01-01T11:00:00Z"
        );
    }
}
