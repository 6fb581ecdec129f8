//! Periodic background jobs: the unclaimed-employees report mail and the
//! reconciliation sweep over pending requests. Each job runs on its own
//! interval and skips a tick when the previous run is still in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use orgchart_core::report::{unclaimed_report_mail, MailSender};
use orgchart_core::workflow::WorkflowEngine;
use orgchart_directory::GraphClient;

use crate::bootstrap::Application;

/// Overlap guard shared between an interval loop and its spawned runs.
struct JobGuard {
    lock: Arc<Mutex<()>>,
    runs: AtomicU64,
}

impl JobGuard {
    fn new() -> Self {
        Self { lock: Arc::new(Mutex::new(())), runs: AtomicU64::new(0) }
    }

    /// Claims the job for one run, or `None` while a run is still active.
    fn begin(&self) -> Option<(tokio::sync::OwnedMutexGuard<()>, u64)> {
        let permit = self.lock.clone().try_lock_owned().ok()?;
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        Some((permit, run))
    }
}

pub fn spawn_all(app: &Application) {
    let jobs = &app.config.jobs;

    if jobs.reconcile_enabled {
        info!(
            event_name = "system.jobs.reconcile.scheduled",
            interval_minutes = jobs.reconcile_interval_minutes,
            "reconciliation job scheduled"
        );
        tokio::spawn(reconcile_loop(app.engine.clone(), jobs.reconcile_interval_minutes));
    }

    // managers_group_mail is validated to be present when mail is enabled
    if jobs.report_enabled && app.config.mail.enabled {
        if let Some(recipient) = app.config.mail.managers_group_mail.clone() {
            info!(
                event_name = "system.jobs.report.scheduled",
                interval_minutes = jobs.report_interval_minutes,
                recipient = %recipient,
                "unclaimed-employees report job scheduled"
            );
            tokio::spawn(report_loop(
                app.directory.clone(),
                recipient,
                jobs.report_interval_minutes,
            ));
        }
    }
}

async fn reconcile_loop(engine: Arc<WorkflowEngine>, interval_minutes: u64) {
    let guard = Arc::new(JobGuard::new());
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some((permit, run)) = guard.begin() else {
            warn!(
                event_name = "system.jobs.reconcile.skipped",
                "previous reconcile run still active, skipping tick"
            );
            continue;
        };

        let engine = engine.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match engine.reconcile_pending().await {
                Ok(auto_approved) => info!(
                    event_name = "system.jobs.reconcile.completed",
                    run,
                    auto_approved,
                    "reconcile run completed"
                ),
                Err(e) => error!(
                    event_name = "system.jobs.reconcile.failed",
                    run,
                    error = %e,
                    "reconcile run failed"
                ),
            }
        });
    }
}

async fn report_loop(directory: Arc<GraphClient>, recipient: String, interval_minutes: u64) {
    let guard = Arc::new(JobGuard::new());
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some((permit, run)) = guard.begin() else {
            warn!(
                event_name = "system.jobs.report.skipped",
                "previous report run still active, skipping tick"
            );
            continue;
        };

        let directory = directory.clone();
        let recipient = recipient.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match report_once(&directory, &recipient).await {
                Ok(unclaimed) => info!(
                    event_name = "system.jobs.report.completed",
                    run,
                    unclaimed,
                    "report run completed"
                ),
                Err(e) => error!(
                    event_name = "system.jobs.report.failed",
                    run,
                    error = %e,
                    "report run failed"
                ),
            }
        });
    }
}

/// One report run: fetch unclaimed employees and mail the CSV. Sends nothing
/// when everyone is claimed.
async fn report_once(directory: &GraphClient, recipient: &str) -> anyhow::Result<usize> {
    let unclaimed = directory.users_without_managers().await?;
    if unclaimed.is_empty() {
        return Ok(0);
    }

    let mail = unclaimed_report_mail(recipient, &unclaimed, Utc::now().date_naive())?;
    directory.send(mail).await?;
    Ok(unclaimed.len())
}
