//! Periodic and on-demand SLA scans

use crate::config::SchedulerConfig;
use approval_engine::{ApprovalEngine, ApprovalResult, ScanStats};
use approval_types::CompanyId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Outcome of the most recent scan
#[derive(Debug, Clone, Serialize)]
pub struct LastScan {
    pub finished_at: DateTime<Utc>,
    pub company_id: Option<CompanyId>,
    pub stats: ScanStats,
}

/// Drives [`ApprovalEngine::run_scan`] on an interval
pub struct Scheduler {
    config: SchedulerConfig,
    engine: ApprovalEngine,
    /// One scan at a time; a manual trigger waits for a running tick
    scan_lock: Mutex<()>,
    last_scan: RwLock<Option<LastScan>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, engine: ApprovalEngine) -> Arc<Self> {
        Arc::new(Self {
            config,
            engine,
            scan_lock: Mutex::new(()),
            last_scan: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn last_scan(&self) -> Option<LastScan> {
        self.last_scan.read().await.clone()
    }

    /// Run one full scan now, optionally limited to one company
    pub async fn scan_now(&self, company_id: Option<CompanyId>) -> ApprovalResult<ScanStats> {
        let _guard = self.scan_lock.lock().await;
        let window = self.config.reminder_window();
        let stats = self.engine.run_scan(company_id, window).await?;

        if stats.changed() || stats.errors > 0 {
            tracing::info!(
                escalated = stats.escalated,
                exhausted = stats.exhausted,
                resolved = stats.resolved,
                reminded = stats.reminded,
                delegations_expired = stats.delegations_expired,
                failed = stats.failed,
                errors = stats.errors,
                "Scan finished"
            );
        }

        *self.last_scan.write().await = Some(LastScan {
            finished_at: self.engine.now(),
            company_id,
            stats,
        });
        Ok(stats)
    }

    /// Scan on every tick until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Scheduler disabled");
            return;
        }

        let mut ticker = interval(Duration::from_secs(self.config.scan_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.config.scan_interval_secs,
            reminder_window_hours = self.config.reminder_window_hours,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_now(None).await {
                        tracing::error!(error = %e, "Scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_engine::{Clock, ManualClock, StaticDirectory};
    use approval_store::InMemoryApprovalStore;
    use approval_types::{NewTemplate, RequestContext, TimeoutAction, UserId, WorkflowLevel};

    fn engine(clock: Arc<ManualClock>) -> ApprovalEngine {
        ApprovalEngine::new(
            Arc::new(InMemoryApprovalStore::new()),
            Arc::new(StaticDirectory::new()),
        )
        .with_clock(clock)
    }

    #[tokio::test]
    async fn test_scan_now_records_last_scan() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(clock.clone());
        let company = CompanyId::generate();
        let template = engine
            .register_template(
                NewTemplate::new(company, "leave", "leave_request")
                    .with_level(WorkflowLevel::user(1, UserId::generate(), 8))
                    .with_timeout_action(TimeoutAction::Approve),
                None,
            )
            .await
            .unwrap();
        engine
            .create_request(
                Some(template.id),
                "leave_request",
                "LV-1",
                RequestContext::new(company, UserId::generate()),
            )
            .await
            .unwrap();

        let scheduler = Scheduler::new(SchedulerConfig::default(), engine);
        assert!(scheduler.last_scan().await.is_none());

        clock.advance(chrono::Duration::hours(9));
        let stats = scheduler.scan_now(Some(company)).await.unwrap();
        assert_eq!(stats.resolved, 1);

        let last = scheduler.last_scan().await.unwrap();
        assert_eq!(last.finished_at, clock.now());
        assert_eq!(last.company_id, Some(company));
        assert_eq!(last.stats, stats);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = Scheduler::new(SchedulerConfig::default(), engine(clock));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.clone().run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_scheduler_returns_immediately() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = SchedulerConfig {
            enabled: false,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(config, engine(clock));
        let (_tx, rx) = watch::channel(false);

        scheduler.clone().run(rx).await;
        assert!(scheduler.last_scan().await.is_none());
    }
}
