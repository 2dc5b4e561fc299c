use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use clap::Args;
use leadflow::config::AutomationConfig;
use leadflow::error::AppError;
use leadflow::workflows::leads::memory::FixedClock;
use leadflow::workflows::leads::{
    AssignmentOutcome, Channel, Clock, DuplicateQuery, LeadId, LeadStore, SideEffect, StageId,
    StoreError,
};

use crate::infra::{self, sample_lead};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Skip the duplicate detection and merge portion of the demo.
    #[arg(long)]
    pub(crate) skip_merge: bool,
    /// Skip the periodic job runs at the end of the demo.
    #[arg(long)]
    pub(crate) skip_jobs: bool,
}

pub(crate) fn run_demo(args: DemoArgs, config: &AutomationConfig) -> Result<(), AppError> {
    // Frozen clock so the demo output is reproducible.
    let clock = Arc::new(FixedClock::at(
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
    ));
    let engines = infra::engines(config, clock.clone());
    infra::seed_campus(&engines)?;

    println!("Lead lifecycle automation demo");
    println!("==============================");

    // Intake: a new inquiry is routed to a pipeline and the entry
    // blueprint fires.
    let lead_id = LeadId(201);
    engines
        .store
        .insert_lead(sample_lead(201, "Naledi", "Mokoena", "0835550201", clock.now()));
    let outcome = engines.resolver.assign(lead_id, None, None)?;
    println!("\n[1] Intake and assignment");
    match &outcome {
        AssignmentOutcome::Assigned {
            pipeline,
            entry_stage,
            side_effects,
        } => {
            println!("  lead {lead_id} assigned to pipeline {pipeline}");
            if let Some(stage) = entry_stage {
                println!("  entry stage: {stage}");
            }
            render_side_effects(side_effects);
        }
        AssignmentOutcome::Unassigned => println!("  no pipeline matched; lead left unassigned"),
    }
    for (channel, address, payload) in engines.messenger.sent() {
        println!("  sent via {channel:?} to {address}: {}", payload.body);
    }

    // Stage transitions, including both milestone sub-flows. The
    // pre-approval letter is created but fails to deliver, showing how
    // partial failure surfaces without blocking the move.
    println!("\n[2] Stage transitions");
    clock.advance(Duration::days(3));
    engines.pre_approval.set_delivering(false);
    for (stage, note) in [
        (StageId(2), "spoke to the learner on the phone"),
        (StageId(3), ""),
        (StageId(4), ""),
    ] {
        let moved = engines.transitions.move_to_stage(lead_id, stage, None, note)?;
        println!("  moved to stage {} (status {:?})", moved.new_stage, moved.status);
        render_side_effects(&moved.side_effects);
    }
    engines.pre_approval.set_delivering(true);

    // Dispatch failure and retry: every channel is down for the first
    // attempt, then restored.
    println!("\n[3] Scheduled dispatch with a failing provider");
    for channel in [Channel::WhatsApp, Channel::Email, Channel::Sms] {
        engines.messenger.fail_channel(channel);
    }
    let report = engines.jobs.dispatch_due()?;
    println!("  first run:  {report}");
    for channel in [Channel::WhatsApp, Channel::Email, Channel::Sms] {
        engines.messenger.restore_channel(channel);
    }
    clock.advance(Duration::hours(2));
    let report = engines.jobs.dispatch_due()?;
    println!("  after retry delay: {report}");

    if !args.skip_merge {
        println!("\n[4] Duplicate detection and merge");
        let matches = engines.duplicates.find_duplicates(&DuplicateQuery {
            phone: Some("+27 83 555 0201".to_string()),
            email: Some("naledi@example.com".to_string()),
            first_name: Some("Naledi".to_string()),
            last_name: Some("Mokoena".to_string()),
            ..DuplicateQuery::default()
        })?;
        for candidate in &matches {
            let reasons: Vec<_> = candidate.reasons.iter().map(|r| r.label()).collect();
            println!(
                "  lead {} scores {} ({})",
                candidate.lead.id,
                candidate.score,
                reasons.join(", ")
            );
        }

        let mut dup = sample_lead(202, "Naledi", "Mokoena", "+27 83 555 0201", clock.now());
        dup.school_name = Some("Northcliff High".to_string());
        engines.store.insert_lead(dup);
        let report = engines.duplicates.merge(lead_id, &[LeadId(202)], None)?;
        println!(
            "  merged {} duplicate(s) into {}; {} activities and {} documents moved",
            report.merged.len(),
            report.primary,
            report.activities_moved,
            report.documents_moved
        );
        let primary = engines.store.lead(lead_id)?.ok_or(StoreError::NotFound)?;
        println!(
            "  backfilled school: {}",
            primary.school_name.as_deref().unwrap_or("-")
        );
    }

    println!("\n[5] Engagement scoring");
    let breakdown = engines.scoring.breakdown(lead_id)?;
    println!(
        "  profile {} + activity {} + quotes {} + documents {} = raw {}",
        breakdown.profile, breakdown.activity, breakdown.quotes, breakdown.documents, breakdown.raw
    );
    println!(
        "  status x{:.1} -> {}, penalties {} -> final {} ({:?})",
        breakdown.status_modifier,
        breakdown.modified,
        breakdown.negative,
        breakdown.final_score,
        breakdown.level
    );

    if !args.skip_jobs {
        println!("\n[6] Periodic jobs");
        for report in [
            engines.jobs.auto_progress()?,
            engines.jobs.flag_stale_leads()?,
            engines.jobs.refresh_scores()?,
        ] {
            println!("  {report}");
        }
    }

    println!("\nSummary");
    println!("  activities recorded: {}", engines.store.all_activities().len());
    println!("  notifications recorded: {}", engines.store.notifications().len());
    println!("  notifications pushed: {}", engines.notifications.pushed().len());
    println!("  tasks created: {}", engines.tasks.created().len());

    Ok(())
}

fn render_side_effects(effects: &[SideEffect]) {
    for effect in effects {
        let line = match effect {
            SideEffect::ActivityLogged => "activity logged".to_string(),
            SideEffect::CommunicationScheduled => "follow-up communication scheduled".to_string(),
            SideEffect::InitialCommunicationSent { channel } => {
                format!("initial communication sent via {channel:?}")
            }
            SideEffect::InitialCommunicationFailed { detail } => {
                format!("initial communication failed: {detail}")
            }
            SideEffect::TasksCreated { count } => format!("{count} task(s) created"),
            SideEffect::PreApprovalIssued { reference } => {
                format!("pre-approval letter {reference} issued")
            }
            SideEffect::PreApprovalFailed { detail } => format!("pre-approval failed: {detail}"),
            SideEffect::ApplicationCreated => "application record created".to_string(),
            SideEffect::ApplicationAlreadyPresent => "application record already present".to_string(),
            SideEffect::AgentNotified => "owning agent notified".to_string(),
        };
        println!("    - {line}");
    }
}
