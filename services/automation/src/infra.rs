use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use leadflow::config::AutomationConfig;
use leadflow::error::AppError;
use leadflow::workflows::leads::memory::{
    InMemoryLeadStore, RecordingMessenger, RecordingNotifications, RecordingTasks,
    StaticTemplates, StubOpportunities, StubPreApproval,
};
use leadflow::workflows::leads::{
    AgentId, AssignmentResolver, AutoTask, AutomationJobs, BlueprintExecutor, CampusId, Clock,
    CommunicationDraft, DuplicateEngine, Lead, LeadCategory, LeadId, LeadStatus, LeadStore,
    MessagePayload,
    Pipeline, PipelineId, RecommendedAction, RequirementCheck, ScoreWeights, ScoringEngine,
    Segment, Stage, StageBlueprint, StageId, StageMilestone, TemplateRef, TransitionEngine,
};

pub(crate) const WELCOME_TEMPLATE: &str = "welcome";

/// Everything the trigger surface needs, wired over the in-memory
/// infrastructure. Durable adapters replace the memory types here.
pub(crate) struct Engines {
    pub(crate) store: Arc<InMemoryLeadStore>,
    pub(crate) messenger: Arc<RecordingMessenger>,
    pub(crate) notifications: Arc<RecordingNotifications>,
    pub(crate) tasks: Arc<RecordingTasks>,
    pub(crate) pre_approval: Arc<StubPreApproval>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) resolver: AssignmentResolver<InMemoryLeadStore>,
    pub(crate) transitions: Arc<TransitionEngine<InMemoryLeadStore>>,
    pub(crate) scoring: Arc<ScoringEngine<InMemoryLeadStore>>,
    pub(crate) duplicates: DuplicateEngine<InMemoryLeadStore>,
    pub(crate) jobs: Arc<AutomationJobs<InMemoryLeadStore>>,
}

pub(crate) fn engines(config: &AutomationConfig, clock: Arc<dyn Clock>) -> Engines {
    let store = Arc::new(InMemoryLeadStore::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let templates = Arc::new(StaticTemplates::new());
    let tasks = Arc::new(RecordingTasks::new());
    let notifications = Arc::new(RecordingNotifications::new());
    let pre_approval = Arc::new(StubPreApproval::new());

    templates.register(
        WELCOME_TEMPLATE,
        MessagePayload {
            subject: Some("Welcome, {first_name}".to_string()),
            body: "Hi {first_name}, thanks for your interest in {qualification_name}. \
                   An advisor will be in touch shortly."
                .to_string(),
        },
    );

    let executor = BlueprintExecutor::new(
        Arc::clone(&store),
        messenger.clone(),
        templates,
        tasks.clone(),
        clock.clone(),
    );
    let transitions = Arc::new(TransitionEngine::new(
        Arc::clone(&store),
        executor.clone(),
        notifications.clone(),
        pre_approval.clone(),
        Arc::new(StubOpportunities::new()),
        clock.clone(),
    ));
    let resolver = AssignmentResolver::new(Arc::clone(&store), executor);
    let scoring = Arc::new(ScoringEngine::new(
        Arc::clone(&store),
        ScoreWeights::default(),
        clock.clone(),
    ));
    let duplicates = DuplicateEngine::new(
        Arc::clone(&store),
        config.duplicates.clone(),
        clock.clone(),
    );
    let jobs = Arc::new(AutomationJobs::new(
        Arc::clone(&store),
        Arc::clone(&transitions),
        Arc::clone(&scoring),
        notifications.clone(),
        config.jobs.clone(),
        clock.clone(),
    ));

    Engines {
        store,
        messenger,
        notifications,
        tasks,
        pre_approval,
        clock,
        resolver,
        transitions,
        scoring,
        duplicates,
        jobs,
    }
}

/// A campus with one pipeline and a handful of leads in states that
/// give every job something to chew on: a fresh inquiry, an overdue
/// follow-up, an auto-progress candidate, and a stale lead.
pub(crate) fn seed_campus(engines: &Engines) -> Result<(), AppError> {
    let now = engines.clock.now();
    let store = &engines.store;

    store.insert_pipeline(Pipeline {
        id: PipelineId(1),
        campus: CampusId(1),
        name: "School Leaver Intake".to_string(),
        segment: Segment::SchoolLeaverReady,
        default_cadence_days: 14,
        is_default: true,
        is_active: true,
    });

    for stage in campus_stages() {
        store.insert_stage(stage);
    }

    store.insert_blueprint(StageBlueprint {
        stage: StageId(1),
        notify_agent_on_entry: true,
        auto_send_initial_communication: true,
        default_template: Some(TemplateRef(WELCOME_TEMPLATE.to_string())),
        auto_schedule_follow_up: true,
        recommended_actions: vec![
            RecommendedAction::Hint {
                action: "Call within 24 hours".to_string(),
                description: "First contact within a day doubles conversion".to_string(),
            },
            RecommendedAction::Requirement(RequirementCheck::HasEmail),
        ],
        auto_tasks: vec![AutoTask {
            title: "Qualify the inquiry".to_string(),
            description: "Call to confirm interest and contact details".to_string(),
            due_days: 2,
        }],
    });

    // Overdue follow-up: the dispatch job picks this up immediately.
    let mut overdue = sample_lead(102, "Sipho", "Dlamini", "0825550102", now - Duration::days(20));
    overdue.status = LeadStatus::Contacted;
    overdue.pipeline = Some(PipelineId(1));
    overdue.current_stage = Some(StageId(2));
    overdue.stage_entered_at = Some(now - Duration::days(20));
    overdue.assigned_to = Some(AgentId(7));
    store.insert_lead(overdue);
    store.schedule_communication(CommunicationDraft {
        lead: LeadId(102),
        template: Some(TemplateRef(WELCOME_TEMPLATE.to_string())),
        scheduled_at: now - Duration::days(1),
        cadence_days: 14,
    })?;

    // Auto-progress candidate: past the inquiry stage's threshold with
    // the email requirement satisfied.
    let mut waiting = sample_lead(103, "Lindiwe", "Mahlangu", "0825550103", now - Duration::days(5));
    waiting.pipeline = Some(PipelineId(1));
    waiting.current_stage = Some(StageId(1));
    waiting.stage_entered_at = Some(now - Duration::days(5));
    store.insert_lead(waiting);

    // Fresh inquiry routed through the resolver so the entry blueprint
    // fires for it.
    store.insert_lead(sample_lead(101, "Thandi", "Nkosi", "0825550101", now));
    engines.resolver.assign(LeadId(101), None, None)?;

    Ok(())
}

fn campus_stages() -> Vec<Stage> {
    let base = |id: u64, code: &str, name: &str, order: u32, probability: u8| Stage {
        id: StageId(id),
        pipeline: PipelineId(1),
        code: code.to_string(),
        name: name.to_string(),
        order,
        expected_duration_days: 7,
        cadence_days: None,
        win_probability: probability,
        is_entry: false,
        is_won: false,
        is_lost: false,
        is_nurture: false,
        auto_progress_days: None,
        milestone: None,
    };

    let mut inquiry = base(1, "INQUIRY", "New Inquiry", 1, 10);
    inquiry.is_entry = true;
    inquiry.expected_duration_days = 2;
    inquiry.auto_progress_days = Some(3);

    let contacted = base(2, "CONTACTED", "Contacted", 2, 25);

    let mut pre_approved = base(3, "PRE_APPROVED", "Pre-Approved", 3, 50);
    pre_approved.milestone = Some(StageMilestone::PreApproval);

    let mut application = base(4, "APPLICATION", "Application", 4, 75);
    application.milestone = Some(StageMilestone::Application);

    let mut enrolled = base(5, "ENROLLED", "Enrolled", 5, 100);
    enrolled.is_won = true;

    let mut nurture = base(6, "NURTURE", "Nurture", 6, 5);
    nurture.is_nurture = true;
    nurture.cadence_days = Some(30);

    vec![inquiry, contacted, pre_approved, application, enrolled, nurture]
}

pub(crate) fn sample_lead(
    id: u64,
    first: &str,
    last: &str,
    phone: &str,
    created_at: DateTime<Utc>,
) -> Lead {
    Lead {
        id: LeadId(id),
        campus: CampusId(1),
        first_name: first.to_string(),
        last_name: last.to_string(),
        phone: Some(phone.to_string()),
        phone_secondary: None,
        whatsapp_number: Some(phone.to_string()),
        email: Some(format!("{}@example.com", first.to_ascii_lowercase())),
        category: LeadCategory::SchoolLeaver,
        expected_matric_year: Some(created_at.year()),
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
        created_at,
        updated_at: created_at,
    }
}
