//! Pass queue, single worker, and the recurring timer.
//!
//! Every trigger goes through [`enqueue_pass`]; one worker drains the queue,
//! so passes against a guild never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use ranksync_core::GuildId;
use ranksync_sync::{pipeline, PassReport, SyncError};

use crate::context::AppContext;
use crate::error::DaemonError;

/// What asked for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Timer,
    Manual,
}

impl TriggerSource {
    pub fn label(self) -> &'static str {
        match self {
            TriggerSource::Timer => "automated",
            TriggerSource::Manual => "manual",
        }
    }
}

/// Why a queued pass did not produce a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassFailure {
    #[error("Guild not found!")]
    GuildNotFound,

    #[error("sync failed: {0}")]
    Failed(String),
}

pub type PassResult = Result<PassReport, PassFailure>;

pub struct PassJob {
    /// `None` when the trigger carried no guild context.
    pub guild_id: Option<GuildId>,
    pub source: TriggerSource,
    pub respond_to: oneshot::Sender<PassResult>,
}

/// Last finished pass, kept for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct LastPass {
    pub source: TriggerSource,
    pub finished_at_unix: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PassReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mutable runtime facts exposed by `status`. Not reused by passes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeState {
    pub ready: bool,
    pub bot_user: Option<String>,
    pub passes: u64,
    pub last_pass: Option<LastPass>,
}

pub type SharedState = Arc<RwLock<RuntimeState>>;

/// Submit a pass and wait for its outcome.
pub async fn enqueue_pass(
    jobs: &mpsc::Sender<PassJob>,
    guild_id: Option<GuildId>,
    source: TriggerSource,
) -> Result<PassResult, DaemonError> {
    let (tx, rx) = oneshot::channel();
    jobs.send(PassJob {
        guild_id,
        source,
        respond_to: tx,
    })
    .await
    .map_err(|_| DaemonError::ChannelClosed("pass queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("pass response"))
}

/// The only place a reconciliation pass runs.
pub async fn pass_worker_task(
    ctx: AppContext,
    state: SharedState,
    mut jobs: mpsc::Receiver<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = jobs.recv() => {
                let Some(job) = maybe_job else { break };
                let outcome = run_job(&ctx, job.guild_id, job.source).await;
                record_outcome(&state, job.source, &outcome).await;
                let _ = job.respond_to.send(outcome);
            }
        }
    }
    Ok(())
}

/// Runs one pass off the async threads. A panicking pass is reported as a
/// failure of that pass only.
async fn run_job(ctx: &AppContext, guild_id: Option<GuildId>, source: TriggerSource) -> PassResult {
    let Some(guild_id) = guild_id else {
        tracing::warn!(source = source.label(), "guild not found for {} sync", source.label());
        return Err(PassFailure::GuildNotFound);
    };

    let ctx = ctx.clone();
    let result = tokio::task::spawn_blocking(move || {
        pipeline::run(
            ctx.directory.as_ref(),
            ctx.membership.as_ref(),
            guild_id,
            &ctx.config.reconcile,
        )
    })
    .await;

    let result = match result {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(source = source.label(), guild_id = %guild_id, error = %err, "sync pass aborted");
            return Err(PassFailure::Failed(format!("pass aborted: {err}")));
        }
    };

    match result {
        Ok(report) => {
            tracing::info!(
                source = source.label(),
                guild_id = %guild_id,
                outcome = ?report.outcome,
                updated = report.updated,
                "{} sync complete, updated {} member(s)",
                source.label(),
                report.updated,
            );
            Ok(report)
        }
        Err(SyncError::GuildNotFound(id)) => {
            tracing::warn!(source = source.label(), guild_id = %id, "guild not found for {} sync", source.label());
            Err(PassFailure::GuildNotFound)
        }
        Err(err) => {
            tracing::error!(source = source.label(), guild_id = %guild_id, error = %err, "sync pass failed");
            Err(PassFailure::Failed(err.to_string()))
        }
    }
}

async fn record_outcome(state: &SharedState, source: TriggerSource, outcome: &PassResult) {
    let last = LastPass {
        source,
        finished_at_unix: unix_seconds_now(),
        report: outcome.as_ref().ok().cloned(),
        error: outcome.as_ref().err().map(ToString::to_string),
    };
    let mut guard = state.write().await;
    guard.passes += 1;
    guard.last_pass = Some(last);
}

/// Recurring trigger with an idempotent start.
#[derive(Debug)]
pub struct SyncTimer {
    period: Duration,
    running: Arc<AtomicBool>,
}

impl SyncTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the loop unless it is already running. Returns `None` when a
    /// loop is already active.
    ///
    /// The first tick fires immediately, then once per period. Each tick waits
    /// for its pass to finish, so a slow pass delays rather than stacks ticks.
    pub fn start(
        &self,
        guild_id: GuildId,
        jobs: mpsc::Sender<PassJob>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("sync timer already running");
            return None;
        }

        let period = self.period;
        let running = self.running.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(period_secs = period.as_secs(), "automated sync started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        match enqueue_pass(&jobs, Some(guild_id), TriggerSource::Timer).await {
                            Ok(_) => {}
                            Err(err) => {
                                tracing::error!(error = %err, "automated sync could not be queued");
                                break;
                            }
                        }
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
        }))
    }
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use ranksync_core::{Config, GuildSnapshot, RoleRef, UserId};
    use ranksync_sync::testing::{MemoryGuild, StaticMembership};
    use ranksync_sync::{CurrentUser, DirectoryError, GuildDirectory, PassOutcome};

    use super::*;

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "BOT_TOKEN" => Some("token".to_string()),
            "WOM_API_KEY" => Some("key".to_string()),
            "DISCORD_GUILD_ID" => Some("1".to_string()),
            "WOM_GROUP_ID" => Some("2".to_string()),
            "RANKSYNC_SOCKET" => Some("/tmp/ranksync-scheduler-test.sock".to_string()),
            _ => None,
        })
        .expect("config")
    }

    fn context(guild: Arc<dyn GuildDirectory>) -> AppContext {
        AppContext::new(
            config(),
            guild,
            Arc::new(StaticMembership::from_pairs(&[("alice", "Knight")])),
        )
    }

    /// Records how many snapshot reads overlap.
    struct OverlapProbe {
        inner: MemoryGuild,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl GuildDirectory for OverlapProbe {
        fn current_user(&self) -> Result<CurrentUser, DirectoryError> {
            self.inner.current_user()
        }

        fn guild(&self, guild: GuildId) -> Result<Option<GuildSnapshot>, DirectoryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(25));
            let snapshot = self.inner.guild(guild);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            snapshot
        }

        fn create_role(&self, guild: GuildId, name: &str) -> Result<RoleRef, DirectoryError> {
            self.inner.create_role(guild, name)
        }

        fn add_role(
            &self,
            guild: GuildId,
            member: UserId,
            role: &RoleRef,
        ) -> Result<(), DirectoryError> {
            self.inner.add_role(guild, member, role)
        }

        fn remove_roles(
            &self,
            guild: GuildId,
            member: UserId,
            roles: &[RoleRef],
        ) -> Result<(), DirectoryError> {
            self.inner.remove_roles(guild, member, roles)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_triggers_are_serialized() {
        let probe = Arc::new(OverlapProbe {
            inner: MemoryGuild::new(1).with_member(10, "alice", "alice", &["Squire"]),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let ctx = context(probe.clone());
        let state = SharedState::default();
        let (jobs_tx, jobs_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let worker = tokio::spawn(pass_worker_task(
            ctx,
            state.clone(),
            jobs_rx,
            shutdown_tx.subscribe(),
        ));

        let (a, b, c) = tokio::join!(
            enqueue_pass(&jobs_tx, Some(GuildId(1)), TriggerSource::Timer),
            enqueue_pass(&jobs_tx, Some(GuildId(1)), TriggerSource::Manual),
            enqueue_pass(&jobs_tx, Some(GuildId(1)), TriggerSource::Manual),
        );
        let updated: usize = [a, b, c]
            .into_iter()
            .map(|r| r.expect("queued").expect("pass").updated)
            .sum();

        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(updated, 1, "only the first pass has work to do");
        assert_eq!(probe.inner.role_names(), vec!["Squire".to_string(), "Knight".to_string()]);
        assert_eq!(state.read().await.passes, 3);

        let _ = shutdown_tx.send(());
        worker.await.expect("join").expect("worker");
    }

    /// Panics on its first snapshot read, then behaves normally.
    struct PanicsOnce {
        inner: MemoryGuild,
        tripped: AtomicBool,
    }

    impl GuildDirectory for PanicsOnce {
        fn current_user(&self) -> Result<CurrentUser, DirectoryError> {
            self.inner.current_user()
        }

        fn guild(&self, guild: GuildId) -> Result<Option<GuildSnapshot>, DirectoryError> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("snapshot decoder blew up");
            }
            self.inner.guild(guild)
        }

        fn create_role(&self, guild: GuildId, name: &str) -> Result<RoleRef, DirectoryError> {
            self.inner.create_role(guild, name)
        }

        fn add_role(
            &self,
            guild: GuildId,
            member: UserId,
            role: &RoleRef,
        ) -> Result<(), DirectoryError> {
            self.inner.add_role(guild, member, role)
        }

        fn remove_roles(
            &self,
            guild: GuildId,
            member: UserId,
            roles: &[RoleRef],
        ) -> Result<(), DirectoryError> {
            self.inner.remove_roles(guild, member, roles)
        }
    }

    #[tokio::test]
    async fn panicking_pass_fails_alone_and_worker_keeps_serving() {
        let directory = Arc::new(PanicsOnce {
            inner: MemoryGuild::new(1).with_member(10, "alice", "alice", &["Squire"]),
            tripped: AtomicBool::new(false),
        });
        let state = SharedState::default();
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        let worker = tokio::spawn(pass_worker_task(
            context(directory.clone()),
            state.clone(),
            jobs_rx,
            shutdown_tx.subscribe(),
        ));

        let first = enqueue_pass(&jobs_tx, Some(GuildId(1)), TriggerSource::Manual)
            .await
            .expect("queued");
        assert!(matches!(first, Err(PassFailure::Failed(_))), "got: {first:?}");

        let second = enqueue_pass(&jobs_tx, Some(GuildId(1)), TriggerSource::Timer)
            .await
            .expect("worker still running")
            .expect("report");
        assert_eq!(second.updated, 1);
        assert_eq!(state.read().await.passes, 2);

        let _ = shutdown_tx.send(());
        worker.await.expect("join").expect("worker");
    }

    #[tokio::test]
    async fn pass_without_guild_context_reports_guild_not_found() {
        let guild = Arc::new(MemoryGuild::new(1).with_member(10, "alice", "alice", &[]));
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(pass_worker_task(
            context(guild.clone()),
            SharedState::default(),
            jobs_rx,
            shutdown_tx.subscribe(),
        ));

        let missing = enqueue_pass(&jobs_tx, None, TriggerSource::Manual)
            .await
            .expect("queued");
        assert_eq!(missing, Err(PassFailure::GuildNotFound));

        let unknown = enqueue_pass(&jobs_tx, Some(GuildId(404)), TriggerSource::Timer)
            .await
            .expect("queued");
        assert_eq!(unknown, Err(PassFailure::GuildNotFound));
        assert!(guild.mutations().is_empty());
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn missing_permission_reaches_the_invoker() {
        let guild = Arc::new(
            MemoryGuild::new(1)
                .without_manage_roles()
                .with_member(10, "alice", "alice", &[]),
        );
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(pass_worker_task(
            context(guild.clone()),
            SharedState::default(),
            jobs_rx,
            shutdown_tx.subscribe(),
        ));

        let report = enqueue_pass(&jobs_tx, Some(GuildId(1)), TriggerSource::Manual)
            .await
            .expect("queued")
            .expect("report");
        assert_eq!(report.outcome, PassOutcome::MissingPermission);
        assert!(report.user_message().contains("Manage Roles"));
        let _ = shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_start_is_idempotent_and_ticks_on_period() {
        let timer = SyncTimer::new(Duration::from_secs(300));
        let (jobs_tx, mut jobs_rx) = mpsc::channel::<PassJob>(4);
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = timer
            .start(GuildId(1), jobs_tx.clone(), shutdown_tx.subscribe())
            .expect("first start");
        assert!(timer.is_running());
        assert!(
            timer
                .start(GuildId(1), jobs_tx.clone(), shutdown_tx.subscribe())
                .is_none(),
            "second start must be refused"
        );

        let first = jobs_rx.recv().await.expect("immediate tick");
        assert_eq!(first.source, TriggerSource::Timer);
        assert_eq!(first.guild_id, Some(GuildId(1)));
        let _ = first.respond_to.send(Err(PassFailure::GuildNotFound));

        let second = jobs_rx.recv().await.expect("tick after one period");
        let _ = second.respond_to.send(Err(PassFailure::GuildNotFound));

        let _ = shutdown_tx.send(());
        handle.await.expect("timer task");
        assert!(!timer.is_running(), "guard resets once the loop exits");
    }

    #[test]
    fn enqueue_on_a_closed_queue_fails() {
        let (jobs_tx, jobs_rx) = mpsc::channel::<PassJob>(1);
        drop(jobs_rx);
        let err = tokio_test::block_on(enqueue_pass(&jobs_tx, Some(GuildId(1)), TriggerSource::Manual))
            .unwrap_err();
        assert!(matches!(err, DaemonError::ChannelClosed("pass queue")), "got: {err}");
    }
}
