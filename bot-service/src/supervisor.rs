use crate::dispatcher::{AccountContext, Dispatcher, DispatcherStats};
use crate::health::{HealthRegistry, WorkerId, WorkerState};
use autoreply_core::{BotConfig, ErrorDisposition, ErrorExt, ItemKind, Platform, StreamOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What to do when a worker stops with an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RestartPolicy {
    #[default]
    Never,
    OnFailure {
        max_restarts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    },
}

impl RestartPolicy {
    /// `0` means never restart.
    pub fn from_max_restarts(max_restarts: u32) -> Self {
        if max_restarts == 0 {
            RestartPolicy::Never
        } else {
            RestartPolicy::OnFailure {
                max_restarts,
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(60),
            }
        }
    }

    /// Pause before restart number `attempt` (1-based), or `None` once the
    /// budget is spent.
    pub fn backoff_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            RestartPolicy::Never => None,
            RestartPolicy::OnFailure {
                max_restarts,
                initial_backoff,
                max_backoff,
            } => {
                if attempt > *max_restarts {
                    return None;
                }
                let exponent = attempt.saturating_sub(1).min(16);
                let base = initial_backoff
                    .saturating_mul(1u32 << exponent)
                    .min(*max_backoff);
                // Up to 25% jitter so restarted workers do not poll in lockstep.
                let jitter = base.mul_f64(fastrand::f64() * 0.25);
                Some(base + jitter)
            }
        }
    }
}

/// A configured bot together with the client it talks through.
pub struct Account<P: Platform> {
    pub config: BotConfig,
    pub platform: Arc<P>,
}

impl<P: Platform> Account<P> {
    pub fn new(config: BotConfig, platform: Arc<P>) -> Self {
        Self { config, platform }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub state: WorkerState,
    pub restarts: u32,
    pub stats: DispatcherStats,
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorReport {
    pub workers: Vec<WorkerSummary>,
}

impl SupervisorReport {
    pub fn failed(&self) -> impl Iterator<Item = &WorkerSummary> {
        self.workers
            .iter()
            .filter(|w| matches!(w.state, WorkerState::Failed { .. }))
    }

    pub fn totals(&self) -> DispatcherStats {
        let mut totals = DispatcherStats::default();
        for worker in &self.workers {
            totals.merge(&worker.stats);
        }
        totals
    }

    pub fn worker(&self, id: &WorkerId) -> Option<&WorkerSummary> {
        self.workers.iter().find(|w| &w.id == id)
    }
}

/// Starts a submission and a comment dispatcher for every subreddit of
/// every account and keeps track of how they fare.
pub struct Supervisor<P: Platform> {
    accounts: Vec<Account<P>>,
    policy: RestartPolicy,
    dry_run: bool,
    max_pause: Duration,
    health: HealthRegistry,
}

impl<P: Platform + 'static> Supervisor<P> {
    pub fn new(accounts: Vec<Account<P>>) -> Self {
        Self {
            accounts,
            policy: RestartPolicy::default(),
            dry_run: false,
            max_pause: StreamOptions::default().max_pause,
            health: HealthRegistry::new(),
        }
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    pub fn health(&self) -> HealthRegistry {
        self.health.clone()
    }

    /// Run every worker until `shutdown` flips to `true` or all of them
    /// have stopped on their own.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> SupervisorReport {
        let mut workers = JoinSet::new();

        for account in self.accounts {
            let context = AccountContext::new(account.config, account.platform)
                .with_dry_run(self.dry_run);
            info!(
                "Starting u/{} on {} subreddit(s){}",
                context.username(),
                context.config.subreddit_names.len(),
                if self.dry_run { " (dry run)" } else { "" }
            );

            for subreddit in context.config.subreddit_names.clone() {
                for kind in [ItemKind::Submission, ItemKind::Comment] {
                    let worker = Worker {
                        id: WorkerId::new(context.username(), &subreddit, kind),
                        context: context.clone(),
                        policy: self.policy.clone(),
                        health: self.health.clone(),
                        max_pause: self.max_pause,
                    };
                    worker.health.set(&worker.id, WorkerState::Starting);
                    workers.spawn(worker.run(shutdown.clone()));
                }
            }
        }

        let mut report = SupervisorReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(summary) => report.workers.push(summary),
                Err(e) => error!("Worker task ended abnormally: {}", e),
            }
        }

        // Workers that panicked never produced a summary.
        for (id, state) in self.health.snapshot() {
            if report.worker(&id).is_none() {
                let state = if state.is_terminal() {
                    state
                } else {
                    WorkerState::Failed {
                        reason: "worker task panicked".to_string(),
                    }
                };
                self.health.set(&id, state.clone());
                report.workers.push(WorkerSummary {
                    id,
                    state,
                    restarts: 0,
                    stats: DispatcherStats::default(),
                });
            }
        }

        let failed = report.failed().count();
        info!(
            "All {} workers finished, {} failed",
            report.workers.len(),
            failed
        );
        report
    }

    /// Current state of every worker.
    pub fn snapshot(&self) -> HashMap<WorkerId, WorkerState> {
        self.health.snapshot()
    }
}

struct Worker<P: Platform> {
    id: WorkerId,
    context: AccountContext<P>,
    policy: RestartPolicy,
    health: HealthRegistry,
    max_pause: Duration,
}

impl<P: Platform + 'static> Worker<P> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) -> WorkerSummary {
        let mut restarts = 0;
        let mut stats = DispatcherStats::default();

        let state = loop {
            let mut dispatcher =
                Dispatcher::new(self.context.clone(), &self.id.subreddit, self.id.kind)
                    .with_health(self.health.clone())
                    .with_max_pause(self.max_pause);

            let result = dispatcher.run(shutdown.clone()).await;
            stats.merge(dispatcher.stats());

            let error = match result {
                Ok(_) => break WorkerState::Stopped,
                Err(e) => e,
            };
            error.log_error();

            if error.disposition() == ErrorDisposition::FatalStartup {
                break WorkerState::Failed {
                    reason: error.user_friendly_message(),
                };
            }

            let attempt = restarts + 1;
            let Some(pause) = self.policy.backoff_for(attempt) else {
                break WorkerState::Failed {
                    reason: error.to_string(),
                };
            };

            warn!(
                "{} failed, restart {} in {:?}: {}",
                self.id, attempt, pause, error
            );
            restarts = attempt;
            self.health
                .set(&self.id, WorkerState::Restarting { attempt });

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown_requested(&mut shutdown) => break WorkerState::Stopped,
            }
        };

        match &state {
            WorkerState::Failed { reason } => error!("{} stopped for good: {}", self.id, reason),
            _ => info!("{} stopped", self.id),
        }
        self.health.set(&self.id, state.clone());

        WorkerSummary {
            id: self.id,
            state,
            restarts,
            stats,
        }
    }
}

/// Resolves once shutdown is raised or its sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_never_restarts() {
        let policy = RestartPolicy::default();
        assert_eq!(policy, RestartPolicy::Never);
        assert_eq!(policy.backoff_for(1), None);
        assert_eq!(RestartPolicy::from_max_restarts(0), RestartPolicy::Never);
    }

    #[test]
    fn test_on_failure_backoff_grows_until_budget_spent() {
        let policy = RestartPolicy::OnFailure {
            max_restarts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
        };

        let first = policy.backoff_for(1).unwrap();
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1250));

        let second = policy.backoff_for(2).unwrap();
        assert!(second >= Duration::from_secs(2) && second <= Duration::from_millis(2500));

        let third = policy.backoff_for(3).unwrap();
        assert!(third >= Duration::from_secs(3) && third <= Duration::from_millis(3750));

        assert_eq!(policy.backoff_for(4), None);
    }
}
