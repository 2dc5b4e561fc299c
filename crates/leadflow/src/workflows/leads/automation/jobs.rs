use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::super::domain::{
    AgentId, DispatchState, Lead, LeadId, LeadStatus, Notification, NotificationKind,
    NotificationPriority, ScheduledCommunication, Stage,
};
use super::super::repository::{Clock, LeadStore, NotificationSink, StoreError};
use super::super::scoring::ScoringEngine;
use super::super::transition::{TransitionEngine, TransitionError};

/// Tuning knobs for the periodic jobs. Defaults match production
/// behavior; tests override individual fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTuning {
    /// Maximum due communications processed per dispatch run.
    pub dispatch_batch_limit: usize,
    /// Failed dispatches are retried up to this many times.
    pub dispatch_retry_ceiling: u32,
    /// Hours until a failed dispatch is retried.
    pub dispatch_retry_delay_hours: u32,
    /// Days without activity before a lead counts as stale.
    pub stale_threshold_days: u32,
    /// Only leads touched within this many days get rescored.
    pub score_refresh_window_days: u32,
}

impl Default for JobTuning {
    fn default() -> Self {
        Self {
            dispatch_batch_limit: 50,
            dispatch_retry_ceiling: 3,
            dispatch_retry_delay_hours: 1,
            stale_threshold_days: 14,
            score_refresh_window_days: 180,
        }
    }
}

/// Summary of one job run. Jobs never abort on a per-item failure;
/// every item lands in exactly one of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl JobReport {
    fn new(job: &'static str) -> Self {
        Self {
            job,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    fn record_failure(&mut self, detail: String) {
        self.failed += 1;
        self.errors.push(detail);
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: processed {}, succeeded {}, failed {}, skipped {}",
            self.job, self.processed, self.succeeded, self.failed, self.skipped
        )?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The periodic automation jobs: communication dispatch, stage
/// auto-progression, stale-lead flagging, score refresh. Each is a
/// plain synchronous method suitable for a blocking worker.
pub struct AutomationJobs<S> {
    store: Arc<S>,
    transitions: Arc<TransitionEngine<S>>,
    scoring: Arc<ScoringEngine<S>>,
    notifications: Arc<dyn NotificationSink>,
    tuning: JobTuning,
    clock: Arc<dyn Clock>,
}

impl<S: LeadStore> AutomationJobs<S> {
    pub fn new(
        store: Arc<S>,
        transitions: Arc<TransitionEngine<S>>,
        scoring: Arc<ScoringEngine<S>>,
        notifications: Arc<dyn NotificationSink>,
        tuning: JobTuning,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            transitions,
            scoring,
            notifications,
            tuning,
            clock,
        }
    }

    /// Sends every due scheduled communication. Ineligible entries
    /// (terminal lead, unsubscribed, paused nurture, missing template)
    /// are cancelled; delivery failures are retried later up to the
    /// retry ceiling, then marked failed.
    pub fn dispatch_due(&self) -> Result<JobReport, JobError> {
        let now = self.clock.now();
        let due = self
            .store
            .due_communications(now, self.tuning.dispatch_batch_limit)?;

        let mut report = JobReport::new("dispatch");
        for mut comm in due {
            report.processed += 1;

            let _guard = match self.store.lock_lead(comm.lead) {
                Ok(guard) => guard,
                Err(StoreError::Contended(lead)) => {
                    report.skipped += 1;
                    warn!(communication = %comm.id, lead = %lead, "lead locked, dispatch deferred");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let Some(lead) = self.store.lead(comm.lead)? else {
                self.cancel(&mut comm, "lead no longer exists")?;
                report.skipped += 1;
                continue;
            };

            if let Some(reason) = ineligibility(&lead, &comm) {
                self.cancel(&mut comm, reason)?;
                report.skipped += 1;
                continue;
            }

            // Checked by `ineligibility` above.
            let Some(template) = comm.template.clone() else {
                continue;
            };

            let outcome = self
                .transitions
                .executor()
                .send_communication(&lead, &template)?;

            if outcome.delivered {
                // The send already queued the next nurture cycle; the
                // cancel it issued is overwritten by this Sent update.
                comm.state = DispatchState::Sent;
                comm.sent_at = Some(now);
                comm.channel_used = outcome.channel;
                comm.error = None;
                self.store.update_communication(&comm)?;
                report.succeeded += 1;
            } else {
                let detail = outcome
                    .detail
                    .unwrap_or_else(|| "no reachable channel".to_string());
                comm.retry_count += 1;
                comm.error = Some(detail.clone());
                if comm.retry_count >= self.tuning.dispatch_retry_ceiling {
                    comm.state = DispatchState::Failed;
                    report.record_failure(format!(
                        "communication {} to lead {} failed permanently: {detail}",
                        comm.id, comm.lead
                    ));
                } else {
                    comm.scheduled_at =
                        now + Duration::hours(i64::from(self.tuning.dispatch_retry_delay_hours));
                    report.record_failure(format!(
                        "communication {} to lead {} failed (attempt {}): {detail}",
                        comm.id, comm.lead, comm.retry_count
                    ));
                }
                self.store.update_communication(&comm)?;
            }
        }

        info!(report = %report, "dispatch run completed");
        Ok(report)
    }

    /// Moves leads whose stage enables auto-progression and whose
    /// requirement gates pass to the next stage in order.
    pub fn auto_progress(&self) -> Result<JobReport, JobError> {
        let now = self.clock.now();
        let candidates = self.store.leads_where(&|lead: &Lead| {
            !lead.status.is_terminal() && lead.current_stage.is_some()
        })?;

        let mut report = JobReport::new("auto-progress");
        for lead in candidates {
            let Some(stage) = self.current_stage(&lead)? else {
                continue;
            };
            let Some(threshold) = stage.auto_progress_days else {
                continue;
            };

            report.processed += 1;

            let days = lead.days_in_stage(now).unwrap_or(0);
            if days < i64::from(threshold) {
                report.skipped += 1;
                continue;
            }
            if !self
                .transitions
                .executor()
                .requirements_met(&lead, &stage)?
            {
                report.skipped += 1;
                continue;
            }

            let Some(next) = self.next_stage(&stage)? else {
                report.skipped += 1;
                continue;
            };

            let note = format!("Auto-progressed after {days} days");
            match self.transitions.move_to_stage(lead.id, next.id, None, &note) {
                Ok(_) => report.succeeded += 1,
                Err(TransitionError::Conflict(id)) => {
                    report.skipped += 1;
                    warn!(lead = %id, "lead locked, auto-progress deferred");
                }
                Err(err) => {
                    report.record_failure(format!("lead {}: {err}", lead.id));
                }
            }
        }

        info!(report = %report, "auto-progress run completed");
        Ok(report)
    }

    /// Flags early-status leads without recent activity, one digest
    /// notification per owning agent per day.
    pub fn flag_stale_leads(&self) -> Result<JobReport, JobError> {
        let now = self.clock.now();
        let cutoff = now - Duration::days(i64::from(self.tuning.stale_threshold_days));
        let candidates = self.store.leads_where(&|lead: &Lead| {
            matches!(
                lead.status,
                LeadStatus::New | LeadStatus::Contacted | LeadStatus::Qualified
            ) && lead.assigned_to.is_some()
        })?;

        let mut report = JobReport::new("stale-leads");
        let mut per_agent: BTreeMap<AgentId, Vec<LeadId>> = BTreeMap::new();

        for lead in candidates {
            report.processed += 1;
            let last_touch = self
                .store
                .activities_for(lead.id)?
                .iter()
                .map(|activity| activity.created_at)
                .max()
                .unwrap_or(lead.created_at);
            if last_touch >= cutoff {
                report.skipped += 1;
                continue;
            }
            if let Some(agent) = lead.assigned_to {
                per_agent.entry(agent).or_default().push(lead.id);
            }
        }

        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        for (agent, leads) in per_agent {
            let already = self
                .store
                .notifications_since(agent, NotificationKind::StaleLeads, start_of_day)?;
            if already > 0 {
                report.skipped += leads.len();
                continue;
            }

            let notification = Notification {
                agent,
                kind: NotificationKind::StaleLeads,
                priority: NotificationPriority::Medium,
                title: format!("{} stale leads need attention", leads.len()),
                message: format!(
                    "{} of your leads have had no activity for {} days or more",
                    leads.len(),
                    self.tuning.stale_threshold_days
                ),
                lead: None,
                created_at: now,
            };
            self.store.record_notification(notification.clone())?;
            if let Err(err) = self.notifications.notify(&notification) {
                warn!(agent = %agent, error = %err, "stale-leads notification push failed");
            }
            report.succeeded += leads.len();
        }

        info!(report = %report, "stale-leads run completed");
        Ok(report)
    }

    /// Recomputes engagement scores for non-terminal leads touched
    /// within the refresh window.
    pub fn refresh_scores(&self) -> Result<JobReport, JobError> {
        let now = self.clock.now();
        let cutoff = now - Duration::days(i64::from(self.tuning.score_refresh_window_days));
        let candidates = self
            .store
            .leads_where(&|lead: &Lead| !lead.status.is_terminal() && lead.updated_at >= cutoff)?;

        let mut report = JobReport::new("refresh-scores");
        for lead in candidates {
            report.processed += 1;
            match self.scoring.update_score(lead.id) {
                Ok((_, true)) => report.succeeded += 1,
                Ok((_, false)) => report.skipped += 1,
                Err(err) => report.record_failure(format!("lead {}: {err}", lead.id)),
            }
        }

        info!(report = %report, "score refresh completed");
        Ok(report)
    }

    fn cancel(&self, comm: &mut ScheduledCommunication, reason: &str) -> Result<(), StoreError> {
        comm.state = DispatchState::Cancelled;
        comm.error = Some(reason.to_string());
        self.store.update_communication(comm)
    }

    fn current_stage(&self, lead: &Lead) -> Result<Option<Stage>, StoreError> {
        match lead.current_stage {
            Some(id) => self.store.stage(id),
            None => Ok(None),
        }
    }

    /// Next stage of the lead's pipeline by order, if any.
    fn next_stage(&self, stage: &Stage) -> Result<Option<Stage>, StoreError> {
        let stages = self.store.stages_for(stage.pipeline)?;
        Ok(stages.into_iter().find(|s| s.order > stage.order))
    }
}

/// Why a due communication must not be sent, if any.
fn ineligibility(lead: &Lead, comm: &ScheduledCommunication) -> Option<&'static str> {
    if lead.status.is_terminal() {
        Some("lead reached a terminal status")
    } else if lead.unsubscribed {
        Some("lead unsubscribed")
    } else if !lead.nurture_active {
        Some("nurture paused")
    } else if comm.template.is_none() {
        Some("no template attached")
    } else {
        None
    }
}
