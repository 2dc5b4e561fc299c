use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::workflows::leads::assignment::AssignmentResolver;
use crate::workflows::leads::automation::{AutomationJobs, JobTuning};
use crate::workflows::leads::blueprint::{
    AutoTask, BlueprintExecutor, RecommendedAction, RequirementCheck, StageBlueprint,
};
use crate::workflows::leads::domain::{
    CampusId, Lead, LeadCategory, LeadId, LeadStatus, MessagePayload, Pipeline, PipelineId,
    Segment, Stage, StageId, StageMilestone, TemplateRef,
};
use crate::workflows::leads::duplicates::{DuplicateConfig, DuplicateEngine};
use crate::workflows::leads::memory::{
    FixedClock, InMemoryLeadStore, RecordingMessenger, RecordingNotifications, RecordingTasks,
    StaticTemplates, StubOpportunities, StubPreApproval,
};
use crate::workflows::leads::scoring::{ScoreWeights, ScoringEngine};
use crate::workflows::leads::transition::TransitionEngine;

pub(super) const WELCOME_TEMPLATE: &str = "welcome_school_leaver";

pub(super) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).single().expect("valid epoch")
}

/// Everything wired together against the in-memory store, with a fixed
/// clock. Individual tests reach into the recording fakes to assert on
/// side effects.
pub(super) struct Harness {
    pub store: Arc<InMemoryLeadStore>,
    pub messenger: Arc<RecordingMessenger>,
    pub templates: Arc<StaticTemplates>,
    pub tasks: Arc<RecordingTasks>,
    pub notifications: Arc<RecordingNotifications>,
    pub pre_approval: Arc<StubPreApproval>,
    pub clock: Arc<FixedClock>,
    pub executor: BlueprintExecutor<InMemoryLeadStore>,
    pub transitions: Arc<TransitionEngine<InMemoryLeadStore>>,
    pub resolver: AssignmentResolver<InMemoryLeadStore>,
    pub scoring: Arc<ScoringEngine<InMemoryLeadStore>>,
    pub duplicates: DuplicateEngine<InMemoryLeadStore>,
    pub jobs: AutomationJobs<InMemoryLeadStore>,
}

pub(super) fn harness() -> Harness {
    harness_with_tuning(JobTuning::default())
}

pub(super) fn harness_with_tuning(tuning: JobTuning) -> Harness {
    let store = Arc::new(InMemoryLeadStore::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let templates = Arc::new(StaticTemplates::new());
    let tasks = Arc::new(RecordingTasks::new());
    let notifications = Arc::new(RecordingNotifications::new());
    let pre_approval = Arc::new(StubPreApproval::new());
    let opportunities = Arc::new(StubOpportunities::new());
    let clock = Arc::new(FixedClock::at(epoch()));

    templates.register(
        WELCOME_TEMPLATE,
        MessagePayload {
            subject: Some("Welcome, {first_name}".to_string()),
            body: "Hi {first_name}, thanks for your interest in {qualification_name}.".to_string(),
        },
    );

    let executor = BlueprintExecutor::new(
        Arc::clone(&store),
        messenger.clone(),
        templates.clone(),
        tasks.clone(),
        clock.clone(),
    );
    let transitions = Arc::new(TransitionEngine::new(
        Arc::clone(&store),
        executor.clone(),
        notifications.clone(),
        pre_approval.clone(),
        opportunities,
        clock.clone(),
    ));
    let resolver = AssignmentResolver::new(Arc::clone(&store), executor.clone());
    let scoring = Arc::new(ScoringEngine::new(
        Arc::clone(&store),
        ScoreWeights::default(),
        clock.clone(),
    ));
    let duplicates = DuplicateEngine::new(
        Arc::clone(&store),
        DuplicateConfig::default(),
        clock.clone(),
    );
    let jobs = AutomationJobs::new(
        Arc::clone(&store),
        Arc::clone(&transitions),
        Arc::clone(&scoring),
        notifications.clone(),
        tuning,
        clock.clone(),
    );

    Harness {
        store,
        messenger,
        templates,
        tasks,
        notifications,
        pre_approval,
        clock,
        executor,
        transitions,
        resolver,
        scoring,
        duplicates,
        jobs,
    }
}

pub(super) fn pipeline() -> Pipeline {
    Pipeline {
        id: PipelineId(1),
        campus: CampusId(1),
        name: "School Leaver Intake".to_string(),
        segment: Segment::SchoolLeaverReady,
        default_cadence_days: 14,
        is_default: true,
        is_active: true,
    }
}

fn stage(id: u64, code: &str, name: &str, order: u32) -> Stage {
    Stage {
        id: StageId(id),
        pipeline: PipelineId(1),
        code: code.to_string(),
        name: name.to_string(),
        order,
        expected_duration_days: 7,
        cadence_days: None,
        win_probability: 10 * order as u8,
        is_entry: false,
        is_won: false,
        is_lost: false,
        is_nurture: false,
        auto_progress_days: None,
        milestone: None,
    }
}

pub(super) fn entry_stage() -> Stage {
    let mut s = stage(1, "INQUIRY", "New Inquiry", 1);
    s.is_entry = true;
    s.expected_duration_days = 2;
    s.auto_progress_days = Some(3);
    s
}

pub(super) fn contacted_stage() -> Stage {
    stage(2, "CONTACTED", "Contacted", 2)
}

pub(super) fn pre_approval_stage() -> Stage {
    let mut s = stage(3, "PRE_APPROVED", "Pre-Approved", 3);
    s.milestone = Some(StageMilestone::PreApproval);
    s
}

pub(super) fn application_stage() -> Stage {
    let mut s = stage(4, "APPLICATION", "Application", 4);
    s.milestone = Some(StageMilestone::Application);
    s
}

pub(super) fn registered_stage() -> Stage {
    stage(5, "REGISTERED", "Registered", 5)
}

pub(super) fn won_stage() -> Stage {
    let mut s = stage(6, "ENROLLED", "Enrolled", 6);
    s.is_won = true;
    s.win_probability = 100;
    s
}

pub(super) fn nurture_stage() -> Stage {
    let mut s = stage(7, "NURTURE", "Long-Term Nurture", 7);
    s.is_nurture = true;
    s.cadence_days = Some(30);
    s
}

pub(super) fn entry_blueprint() -> StageBlueprint {
    StageBlueprint {
        stage: StageId(1),
        notify_agent_on_entry: true,
        auto_send_initial_communication: true,
        default_template: Some(TemplateRef(WELCOME_TEMPLATE.to_string())),
        auto_schedule_follow_up: true,
        recommended_actions: vec![
            RecommendedAction::Hint {
                action: "Call within 24 hours".to_string(),
                description: "Fresh inquiries convert best on a same-day call".to_string(),
            },
            RecommendedAction::Requirement(RequirementCheck::HasEmail),
        ],
        auto_tasks: vec![AutoTask {
            title: "Qualify the inquiry".to_string(),
            description: "Confirm qualification interest and intake window".to_string(),
            due_days: 2,
        }],
    }
}

/// Seeds the standard pipeline with all stages and the entry blueprint.
pub(super) fn seed_pipeline(harness: &Harness) {
    harness.store.insert_pipeline(pipeline());
    for s in [
        entry_stage(),
        contacted_stage(),
        pre_approval_stage(),
        application_stage(),
        registered_stage(),
        won_stage(),
        nurture_stage(),
    ] {
        harness.store.insert_stage(s);
    }
    harness.store.insert_blueprint(entry_blueprint());
}

pub(super) fn lead(id: u64) -> Lead {
    Lead {
        id: LeadId(id),
        campus: CampusId(1),
        first_name: "Thandi".to_string(),
        last_name: "Nkosi".to_string(),
        phone: Some("0821234567".to_string()),
        phone_secondary: None,
        whatsapp_number: Some("0821234567".to_string()),
        email: Some("thandi@example.com".to_string()),
        category: LeadCategory::SchoolLeaver,
        expected_matric_year: Some(2026),
        grade: None,
        parent_name: None,
        parent_phone: None,
        parent_email: None,
        school_name: None,
        qualification_interest: Some("IT Diploma".to_string()),
        notes: None,
        pipeline: None,
        current_stage: None,
        stage_entered_at: None,
        status: LeadStatus::New,
        assigned_to: None,
        engagement_score: None,
        unsubscribed: false,
        nurture_active: true,
        merged_into: None,
        merged_at: None,
        converted_at: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

/// A lead already sitting in the given stage of the seeded pipeline.
pub(super) fn lead_in_stage(id: u64, stage: &Stage) -> Lead {
    let mut l = lead(id);
    l.pipeline = Some(stage.pipeline);
    l.current_stage = Some(stage.id);
    l.stage_entered_at = Some(epoch());
    l
}
