//! Cron schedule triggers
//!
//! One tokio-cron-scheduler `JobScheduler`, created and started on the first
//! registration, holds a job per flow. The job UUID map lets a flow's job be
//! replaced or removed without restarting the scheduler.

use crate::error::{FlowError, Result};
use crate::triggers::FlowLauncher;
use crate::workflow::types::TriggerKind;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Snapshot entry for one schedule registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRegistration {
    pub flow_id: String,
    /// Expression as registered
    pub cron: String,
}

#[derive(Debug)]
struct ScheduledJob {
    cron: String,
    job_id: Uuid,
}

#[derive(Default)]
struct ScheduleState {
    scheduler: Option<JobScheduler>,
    jobs: HashMap<String, ScheduledJob>,
}

pub struct ScheduleTriggers {
    launcher: FlowLauncher,
    shutdown: CancellationToken,
    state: Mutex<ScheduleState>,
}

/// Accept standard 5-field cron by adding the seconds field the scheduler expects
pub fn normalize_cron_expression(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

impl ScheduleTriggers {
    pub fn new(launcher: FlowLauncher, shutdown: CancellationToken) -> Self {
        Self {
            launcher,
            shutdown,
            state: Mutex::new(ScheduleState::default()),
        }
    }

    /// Add or replace the flow's cron job
    pub async fn register(&self, flow_id: &str, cron: &str) -> Result<()> {
        let schedule = normalize_cron_expression(cron);
        if schedule.is_empty() {
            return Err(FlowError::invalid_trigger("schedule", "empty cron expression"));
        }

        let flow_id_owned = flow_id.to_string();
        let launcher = self.launcher.clone();
        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let flow_id = flow_id_owned.clone();
            let launcher = launcher.clone();

            Box::pin(async move {
                tracing::debug!("🔔 Cron trigger activated for flow {}", flow_id);
                launcher.activate(&flow_id, TriggerKind::Schedule).await;
            })
        })
        .map_err(|e| {
            FlowError::invalid_trigger("schedule", format!("bad cron expression '{}': {}", cron, e))
        })?;

        let mut state = self.state.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(FlowError::resource("cron scheduler", "trigger manager is shut down"));
        }

        if state.scheduler.is_none() {
            tracing::info!("⏰ Starting cron scheduler");
            let scheduler = JobScheduler::new()
                .await
                .map_err(|e| FlowError::resource("cron scheduler", e))?;
            scheduler
                .start()
                .await
                .map_err(|e| FlowError::resource("cron scheduler", e))?;
            state.scheduler = Some(scheduler);
        }
        let Some(scheduler) = state.scheduler.as_ref() else {
            return Err(FlowError::resource("cron scheduler", "scheduler unavailable"));
        };

        // the new job goes in before the old one leaves, so a failed add keeps the old schedule
        let job_id = scheduler
            .add(job)
            .await
            .map_err(|e| FlowError::resource("cron scheduler", e))?;

        let replaced = state.jobs.insert(
            flow_id.to_string(),
            ScheduledJob {
                cron: cron.trim().to_string(),
                job_id,
            },
        );
        if let Some(old) = replaced {
            self.remove_job(&state, flow_id, &old.job_id).await;
        }

        tracing::info!("⏰ Registered cron job for flow {} ({})", flow_id, schedule);
        Ok(())
    }

    /// Remove the flow's cron job; `NotFound` if it has none
    pub async fn unregister(&self, flow_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .remove(flow_id)
            .ok_or_else(|| FlowError::not_found("schedule trigger", flow_id))?;
        self.remove_job(&state, flow_id, &job.job_id).await;

        tracing::info!("🗑️ Unregistered cron job for flow {}", flow_id);
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<ScheduleRegistration> {
        let mut registrations: Vec<ScheduleRegistration> = self
            .state
            .lock()
            .await
            .jobs
            .iter()
            .map(|(flow_id, job)| ScheduleRegistration {
                flow_id: flow_id.clone(),
                cron: job.cron.clone(),
            })
            .collect();
        registrations.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        registrations
    }

    /// Drop every job and stop the scheduler if it was ever started
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.jobs.clear();
        if let Some(mut scheduler) = state.scheduler.take() {
            tracing::info!("⏹️ Stopping cron scheduler");
            if let Err(e) = scheduler.shutdown().await {
                tracing::warn!("⚠️ Cron scheduler did not shut down cleanly: {}", e);
            }
        }
    }

    async fn remove_job(&self, state: &ScheduleState, flow_id: &str, job_id: &Uuid) {
        if let Some(scheduler) = state.scheduler.as_ref() {
            if let Err(e) = scheduler.remove(job_id).await {
                tracing::warn!("⚠️ Failed to remove cron job of flow {} from scheduler: {}", flow_id, e);
            } else {
                tracing::debug!("🛑 Removed cron job from scheduler: {}", flow_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_field_cron_gets_seconds() {
        assert_eq!(normalize_cron_expression("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron_expression("  0  9 * * 1-5 "), "0 0 9 * * 1-5");
    }

    #[test]
    fn test_six_and_seven_field_cron_pass_through() {
        assert_eq!(normalize_cron_expression("*/10 * * * * *"), "*/10 * * * * *");
        assert_eq!(normalize_cron_expression("0 0 12 * * * 2030"), "0 0 12 * * * 2030");
        assert_eq!(normalize_cron_expression("   "), "");
    }
}
