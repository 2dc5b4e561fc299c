use super::common::*;
use crate::workflows::leads::automation::{JobScheduler, JobTuning};
use crate::workflows::leads::domain::{
    ActivityDraft, ActivityKind, AgentId, Channel, CommunicationDraft, DispatchState, LeadId,
    LeadStatus, NotificationKind, StageId, TemplateRef,
};
use crate::workflows::leads::repository::{AppendMode, Clock, LeadStore};

use chrono::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn queue_due(h: &Harness, lead: LeadId) {
    h.store
        .schedule_communication(CommunicationDraft {
            lead,
            template: Some(TemplateRef(WELCOME_TEMPLATE.to_string())),
            scheduled_at: epoch() - Duration::hours(1),
            cadence_days: 14,
        })
        .expect("scheduling succeeds");
}

#[test]
fn dispatch_sends_due_communications_and_queues_the_next_cycle() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead_in_stage(1, &contacted_stage()));
    queue_due(&h, LeadId(1));

    let report = h.jobs.dispatch_due().expect("job runs");
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    let comms = h.store.communications();
    let sent = comms
        .iter()
        .find(|c| c.state == DispatchState::Sent)
        .expect("sent entry");
    assert_eq!(sent.sent_at, Some(epoch()));
    assert_eq!(sent.channel_used, Some(Channel::WhatsApp));

    // The next nurture cycle is queued on the pipeline cadence.
    let next = comms
        .iter()
        .find(|c| c.state == DispatchState::Scheduled)
        .expect("next cycle queued");
    assert_eq!(next.scheduled_at, epoch() + Duration::days(14));

    assert!(h
        .store
        .activities_for(LeadId(1))
        .expect("activities")
        .iter()
        .any(|a| a.kind == ActivityKind::CommunicationSent));
}

#[test]
fn dispatch_cancels_ineligible_communications() {
    let h = harness();
    seed_pipeline(&h);

    let mut unsubscribed = lead_in_stage(1, &contacted_stage());
    unsubscribed.unsubscribed = true;
    h.store.insert_lead(unsubscribed);
    queue_due(&h, LeadId(1));

    let mut terminal = lead_in_stage(2, &contacted_stage());
    terminal.status = LeadStatus::Lost;
    h.store.insert_lead(terminal);
    queue_due(&h, LeadId(2));

    let mut paused = lead_in_stage(3, &contacted_stage());
    paused.nurture_active = false;
    h.store.insert_lead(paused);
    queue_due(&h, LeadId(3));

    let report = h.jobs.dispatch_due().expect("job runs");
    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 3);
    assert!(h
        .store
        .communications()
        .iter()
        .all(|c| c.state == DispatchState::Cancelled));
    assert!(h.messenger.sent().is_empty());
}

#[test]
fn dispatch_retries_then_fails_at_the_ceiling() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead_in_stage(1, &contacted_stage()));
    queue_due(&h, LeadId(1));
    h.messenger.fail_channel(Channel::WhatsApp);
    h.messenger.fail_channel(Channel::Email);
    h.messenger.fail_channel(Channel::Sms);

    // First two attempts reschedule an hour out.
    for attempt in 1..=2u32 {
        let report = h.jobs.dispatch_due().expect("job runs");
        assert_eq!(report.failed, 1);
        let comm = &h.store.communications()[0];
        assert_eq!(comm.state, DispatchState::Scheduled);
        assert_eq!(comm.retry_count, attempt);
        assert_eq!(comm.scheduled_at, h.clock.now() + Duration::hours(1));
        h.clock.advance(Duration::hours(2));
    }

    // Third failure is permanent.
    let report = h.jobs.dispatch_due().expect("job runs");
    assert_eq!(report.failed, 1);
    assert!(!report.errors.is_empty());
    let comm = &h.store.communications()[0];
    assert_eq!(comm.state, DispatchState::Failed);
    assert_eq!(comm.retry_count, 3);
}

#[test]
fn dispatch_defers_locked_leads() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead_in_stage(1, &contacted_stage()));
    queue_due(&h, LeadId(1));

    let _guard = h.store.lock_lead(LeadId(1)).expect("lock acquired");
    let report = h.jobs.dispatch_due().expect("job runs");
    assert_eq!(report.skipped, 1);
    assert_eq!(h.store.communications()[0].state, DispatchState::Scheduled);
}

#[test]
fn auto_progress_moves_eligible_leads_with_the_audit_note() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead_in_stage(1, &entry_stage()));

    // Entry stage auto-progresses after three days when the email
    // requirement is satisfied.
    h.clock.advance(Duration::days(4));
    let report = h.jobs.auto_progress().expect("job runs");
    assert_eq!(report.succeeded, 1);

    let stored = h.store.lead(LeadId(1)).expect("lookup").expect("present");
    assert_eq!(stored.current_stage, Some(StageId(2)));
    assert!(h
        .store
        .activities_for(LeadId(1))
        .expect("activities")
        .iter()
        .any(|a| a.kind == ActivityKind::StageChange
            && a.description.contains("Auto-progressed after 4 days")
            && a.automated));
}

#[test]
fn auto_progress_waits_for_the_threshold_and_the_gates() {
    let h = harness();
    seed_pipeline(&h);

    let fresh = lead_in_stage(1, &entry_stage());
    h.store.insert_lead(fresh);

    let mut gated = lead_in_stage(2, &entry_stage());
    gated.email = None;
    gated.stage_entered_at = Some(epoch() - Duration::days(10));
    h.store.insert_lead(gated);

    let report = h.jobs.auto_progress().expect("job runs");
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.skipped, 2);

    for id in [1, 2] {
        let stored = h.store.lead(LeadId(id)).expect("lookup").expect("present");
        assert_eq!(stored.current_stage, Some(StageId(1)));
    }
}

#[test]
fn auto_progress_ignores_stages_without_a_threshold() {
    let h = harness();
    seed_pipeline(&h);
    let mut l = lead_in_stage(1, &contacted_stage());
    l.stage_entered_at = Some(epoch() - Duration::days(90));
    h.store.insert_lead(l);

    let report = h.jobs.auto_progress().expect("job runs");
    assert_eq!(report.processed, 0);
}

#[test]
fn stale_leads_are_flagged_once_per_agent_per_day() {
    let h = harness();
    seed_pipeline(&h);
    for id in [1, 2] {
        let mut l = lead_in_stage(id, &contacted_stage());
        l.status = LeadStatus::Contacted;
        l.assigned_to = Some(AgentId(7));
        l.created_at = epoch() - Duration::days(30);
        h.store.insert_lead(l);
    }

    let report = h.jobs.flag_stale_leads().expect("job runs");
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 2);

    let notifications = h.store.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::StaleLeads);
    assert!(notifications[0].title.contains("2 stale leads"));

    // Second run the same day is suppressed.
    let report = h.jobs.flag_stale_leads().expect("job runs");
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(h.store.notifications().len(), 1);

    // The next day it fires again.
    h.clock.advance(Duration::days(1));
    let report = h.jobs.flag_stale_leads().expect("job runs");
    assert_eq!(report.succeeded, 2);
    assert_eq!(h.store.notifications().len(), 2);
}

#[test]
fn recently_touched_leads_are_not_stale() {
    let h = harness();
    seed_pipeline(&h);
    let mut l = lead_in_stage(1, &contacted_stage());
    l.status = LeadStatus::Contacted;
    l.assigned_to = Some(AgentId(7));
    l.created_at = epoch() - Duration::days(30);
    h.store.insert_lead(l);
    h.store
        .append_activity(
            ActivityDraft::manual(LeadId(1), ActivityKind::Call, "checked in".to_string(), None),
            epoch() - Duration::days(2),
            AppendMode::Normal,
        )
        .expect("append succeeds");

    let report = h.jobs.flag_stale_leads().expect("job runs");
    assert_eq!(report.skipped, 1);
    assert!(h.store.notifications().is_empty());
}

#[test]
fn unowned_and_late_status_leads_are_not_stale_candidates() {
    let h = harness();
    seed_pipeline(&h);

    let mut unowned = lead_in_stage(1, &contacted_stage());
    unowned.status = LeadStatus::Contacted;
    unowned.created_at = epoch() - Duration::days(30);
    h.store.insert_lead(unowned);

    let mut negotiating = lead_in_stage(2, &contacted_stage());
    negotiating.status = LeadStatus::Negotiation;
    negotiating.assigned_to = Some(AgentId(7));
    negotiating.created_at = epoch() - Duration::days(30);
    h.store.insert_lead(negotiating);

    let report = h.jobs.flag_stale_leads().expect("job runs");
    assert_eq!(report.processed, 0);
}

#[test]
fn refresh_scores_updates_active_leads_only() {
    let h = harness();
    seed_pipeline(&h);

    let mut active = lead_in_stage(1, &contacted_stage());
    active.status = LeadStatus::Contacted;
    h.store.insert_lead(active);

    let mut dormant = lead_in_stage(2, &contacted_stage());
    dormant.status = LeadStatus::Contacted;
    dormant.updated_at = epoch() - Duration::days(365);
    h.store.insert_lead(dormant);

    let mut terminal = lead_in_stage(3, &contacted_stage());
    terminal.status = LeadStatus::Enrolled;
    h.store.insert_lead(terminal);

    let report = h.jobs.refresh_scores().expect("job runs");
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);

    assert!(h
        .store
        .lead(LeadId(1))
        .expect("lookup")
        .expect("present")
        .engagement_score
        .is_some());
    assert!(h
        .store
        .lead(LeadId(2))
        .expect("lookup")
        .expect("present")
        .engagement_score
        .is_none());
}

#[test]
fn refresh_scores_skips_unchanged_scores() {
    let h = harness();
    seed_pipeline(&h);
    let mut l = lead_in_stage(1, &contacted_stage());
    l.status = LeadStatus::Contacted;
    h.store.insert_lead(l);

    let first = h.jobs.refresh_scores().expect("job runs");
    assert_eq!(first.succeeded, 1);
    let second = h.jobs.refresh_scores().expect("job runs");
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped, 1);
}

#[test]
fn tuning_overrides_change_job_behavior() {
    let h = harness_with_tuning(JobTuning {
        stale_threshold_days: 3,
        ..JobTuning::default()
    });
    seed_pipeline(&h);
    let mut l = lead_in_stage(1, &contacted_stage());
    l.status = LeadStatus::Contacted;
    l.assigned_to = Some(AgentId(7));
    l.created_at = epoch() - Duration::days(5);
    h.store.insert_lead(l);

    let report = h.jobs.flag_stale_leads().expect("job runs");
    assert_eq!(report.succeeded, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduler_runs_registered_jobs_until_shutdown() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    let mut scheduler = JobScheduler::new();
    scheduler.register(
        "counter",
        std::time::Duration::from_millis(10),
        move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(crate::workflows::leads::automation::jobs::JobReport {
                job: "counter",
                processed: 0,
                succeeded: 0,
                failed: 0,
                skipped: 0,
                errors: Vec::new(),
            })
        },
    );

    scheduler
        .run(async {
            tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        })
        .await;

    assert!(runs.load(Ordering::Relaxed) >= 2);
}
