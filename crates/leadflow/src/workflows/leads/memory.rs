//! In-memory implementations of the store and collaborator traits.
//! Used by the automation binary's demo wiring and by tests; durable
//! storage plugs in behind the same traits.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::blueprint::StageBlueprint;
use super::domain::{
    Activity, ActivityDraft, ActivityId, AgentId, CampusId, Channel, CommunicationDraft,
    CommunicationId, DispatchState, DocumentRecord, FollowUpTask, Lead, LeadId, MessagePayload,
    Notification, NotificationKind, Pipeline, PipelineId, QuoteRecord, ScheduledCommunication,
    Segment, Stage, StageId, TemplateRef,
};
use super::repository::{
    AppendMode, ApplicationHandle, Clock, DeliveryReceipt, DispatchError, LeadGuard, LeadStore,
    Messenger, NotificationSink, OpportunityRegistry, PreApprovalIssuer, PreApprovalReceipt,
    StoreError, TaskSink, TemplateRenderer, TemplateVars,
};

#[derive(Default)]
struct StoreState {
    pipelines: HashMap<PipelineId, Pipeline>,
    stages: HashMap<StageId, Stage>,
    blueprints: HashMap<StageId, StageBlueprint>,
    leads: HashMap<LeadId, Lead>,
    activities: Vec<Activity>,
    communications: HashMap<CommunicationId, ScheduledCommunication>,
    notifications: Vec<Notification>,
    quotes: HashMap<LeadId, Vec<QuoteRecord>>,
    documents: HashMap<LeadId, Vec<DocumentRecord>>,
    next_activity: u64,
    next_communication: u64,
}

/// HashMap-backed `LeadStore`. Per-lead locks are advisory flags so a
/// contended lock surfaces as `StoreError::Contended` instead of
/// blocking.
#[derive(Default)]
pub struct InMemoryLeadStore {
    state: Mutex<StoreState>,
    locks: Mutex<HashMap<LeadId, Arc<AtomicBool>>>,
}

struct InMemoryLeadGuard {
    flag: Arc<AtomicBool>,
}

impl LeadGuard for InMemoryLeadGuard {}

impl Drop for InMemoryLeadGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.pipelines.insert(pipeline.id, pipeline);
    }

    pub fn insert_stage(&self, stage: Stage) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.stages.insert(stage.id, stage);
    }

    pub fn insert_blueprint(&self, blueprint: StageBlueprint) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.blueprints.insert(blueprint.stage, blueprint);
    }

    pub fn insert_lead(&self, lead: Lead) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.leads.insert(lead.id, lead);
    }

    pub fn add_quote(&self, quote: QuoteRecord) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.quotes.entry(quote.lead).or_default().push(quote);
    }

    pub fn add_document(&self, document: DocumentRecord) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state
            .documents
            .entry(document.lead)
            .or_default()
            .push(document);
    }

    /// Snapshot of every scheduled communication, for assertions and
    /// demo output.
    pub fn communications(&self) -> Vec<ScheduledCommunication> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut all: Vec<_> = state.communications.values().cloned().collect();
        all.sort_by_key(|comm| comm.id);
        all
    }

    /// Snapshot of every recorded notification.
    pub fn notifications(&self) -> Vec<Notification> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.notifications.clone()
    }

    /// Snapshot of every activity, in append order.
    pub fn all_activities(&self) -> Vec<Activity> {
        let state = self.state.lock().expect("store mutex poisoned");
        state.activities.clone()
    }
}

impl LeadStore for InMemoryLeadStore {
    fn pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.pipelines.get(&id).cloned())
    }

    fn active_pipelines(
        &self,
        campus: CampusId,
        segment: Segment,
    ) -> Result<Vec<Pipeline>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut matching: Vec<_> = state
            .pipelines
            .values()
            .filter(|p| p.is_active && p.campus == campus && p.segment == segment)
            .cloned()
            .collect();
        matching.sort_by_key(|p| (std::cmp::Reverse(p.is_default), p.id));
        Ok(matching)
    }

    fn stage(&self, id: StageId) -> Result<Option<Stage>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.stages.get(&id).cloned())
    }

    fn stages_for(&self, pipeline: PipelineId) -> Result<Vec<Stage>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut stages: Vec<_> = state
            .stages
            .values()
            .filter(|s| s.pipeline == pipeline)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.order);
        Ok(stages)
    }

    fn blueprint_for(&self, stage: StageId) -> Result<Option<StageBlueprint>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.blueprints.get(&stage).cloned())
    }

    fn lead(&self, id: LeadId) -> Result<Option<Lead>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.leads.get(&id).cloned())
    }

    fn update_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if !state.leads.contains_key(&lead.id) {
            return Err(StoreError::NotFound);
        }
        state.leads.insert(lead.id, lead.clone());
        Ok(())
    }

    fn leads_where(&self, predicate: &dyn Fn(&Lead) -> bool) -> Result<Vec<Lead>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut matching: Vec<_> = state
            .leads
            .values()
            .filter(|lead| predicate(lead))
            .cloned()
            .collect();
        matching.sort_by_key(|lead| lead.id);
        Ok(matching)
    }

    fn lock_lead(&self, id: LeadId) -> Result<Box<dyn LeadGuard>, StoreError> {
        let flag = {
            let mut locks = self.locks.lock().expect("lock table mutex poisoned");
            Arc::clone(locks.entry(id).or_default())
        };
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| StoreError::Contended(id))?;
        Ok(Box::new(InMemoryLeadGuard { flag }))
    }

    fn append_activity(
        &self,
        draft: ActivityDraft,
        at: DateTime<Utc>,
        mode: AppendMode,
    ) -> Result<Activity, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if !state.leads.contains_key(&draft.lead) {
            return Err(StoreError::NotFound);
        }
        state.next_activity += 1;
        let activity = Activity {
            id: ActivityId(state.next_activity),
            lead: draft.lead,
            kind: draft.kind,
            description: draft.description,
            actor: draft.actor,
            automated: draft.automated,
            automation_source: draft.automation_source.map(str::to_string),
            from_stage: draft.from_stage,
            to_stage: draft.to_stage,
            created_at: at,
        };
        state.activities.push(activity.clone());
        if mode == AppendMode::Normal {
            if let Some(lead) = state.leads.get_mut(&draft.lead) {
                lead.updated_at = at;
            }
        }
        Ok(activity)
    }

    fn activities_for(&self, lead: LeadId) -> Result<Vec<Activity>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .activities
            .iter()
            .filter(|activity| activity.lead == lead)
            .cloned()
            .collect())
    }

    fn reparent_activities(
        &self,
        from: LeadId,
        to: LeadId,
        prefix: &str,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let mut moved = 0;
        for activity in state.activities.iter_mut() {
            if activity.lead == from {
                activity.lead = to;
                activity.description = format!("{prefix}{}", activity.description);
                moved += 1;
            }
        }
        Ok(moved)
    }

    fn schedule_communication(
        &self,
        draft: CommunicationDraft,
    ) -> Result<ScheduledCommunication, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if !state.leads.contains_key(&draft.lead) {
            return Err(StoreError::NotFound);
        }
        state.next_communication += 1;
        let comm = ScheduledCommunication {
            id: CommunicationId(state.next_communication),
            lead: draft.lead,
            template: draft.template,
            scheduled_at: draft.scheduled_at,
            cadence_days: draft.cadence_days,
            state: DispatchState::Scheduled,
            sent_at: None,
            channel_used: None,
            error: None,
            retry_count: 0,
        };
        state.communications.insert(comm.id, comm.clone());
        Ok(comm)
    }

    fn update_communication(&self, comm: &ScheduledCommunication) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if !state.communications.contains_key(&comm.id) {
            return Err(StoreError::NotFound);
        }
        state.communications.insert(comm.id, comm.clone());
        Ok(())
    }

    fn cancel_scheduled_for(&self, lead: LeadId, reason: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let mut cancelled = 0;
        for comm in state.communications.values_mut() {
            if comm.lead == lead && comm.state == DispatchState::Scheduled {
                comm.state = DispatchState::Cancelled;
                comm.error = Some(reason.to_string());
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    fn due_communications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledCommunication>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut due: Vec<_> = state
            .communications
            .values()
            .filter(|comm| comm.state == DispatchState::Scheduled && comm.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|comm| comm.scheduled_at);
        due.truncate(limit);
        Ok(due)
    }

    fn record_notification(&self, notification: Notification) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.notifications.push(notification);
        Ok(())
    }

    fn notifications_since(
        &self,
        agent: AgentId,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.agent == agent && n.kind == kind && n.created_at >= since)
            .count())
    }

    fn quotes_for(&self, lead: LeadId) -> Result<Vec<QuoteRecord>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.quotes.get(&lead).cloned().unwrap_or_default())
    }

    fn documents_for(&self, lead: LeadId) -> Result<Vec<DocumentRecord>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.documents.get(&lead).cloned().unwrap_or_default())
    }

    fn reparent_documents(&self, from: LeadId, to: LeadId) -> Result<usize, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let moved = state.documents.remove(&from).unwrap_or_default();
        let count = moved.len();
        let target = state.documents.entry(to).or_default();
        for mut document in moved {
            document.lead = to;
            target.push(document);
        }
        Ok(count)
    }
}

/// Messenger that records every send. Individual channels can be
/// forced to fail to exercise fallback and retry paths.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(Channel, String, MessagePayload)>>,
    failing: Mutex<HashSet<Channel>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_channel(&self, channel: Channel) {
        self.failing
            .lock()
            .expect("messenger mutex poisoned")
            .insert(channel);
    }

    pub fn restore_channel(&self, channel: Channel) {
        self.failing
            .lock()
            .expect("messenger mutex poisoned")
            .remove(&channel);
    }

    pub fn sent(&self) -> Vec<(Channel, String, MessagePayload)> {
        self.sent.lock().expect("messenger mutex poisoned").clone()
    }
}

impl Messenger for RecordingMessenger {
    fn send(
        &self,
        channel: Channel,
        address: &str,
        payload: &MessagePayload,
    ) -> Result<DeliveryReceipt, DispatchError> {
        if self
            .failing
            .lock()
            .expect("messenger mutex poisoned")
            .contains(&channel)
        {
            return Err(DispatchError::Delivery {
                channel,
                address: address.to_string(),
                detail: "provider rejected the message".to_string(),
            });
        }
        let mut sent = self.sent.lock().expect("messenger mutex poisoned");
        sent.push((channel, address.to_string(), payload.clone()));
        Ok(DeliveryReceipt {
            channel,
            message_id: Some(format!("msg-{}", sent.len())),
        })
    }
}

/// Template table with `{name}` placeholder substitution.
#[derive(Default)]
pub struct StaticTemplates {
    templates: Mutex<HashMap<String, MessagePayload>>,
}

impl StaticTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, payload: MessagePayload) {
        self.templates
            .lock()
            .expect("template mutex poisoned")
            .insert(name.to_string(), payload);
    }
}

impl TemplateRenderer for StaticTemplates {
    fn render(
        &self,
        template: &TemplateRef,
        vars: &TemplateVars,
    ) -> Result<MessagePayload, DispatchError> {
        let templates = self.templates.lock().expect("template mutex poisoned");
        let payload = templates
            .get(&template.0)
            .ok_or_else(|| DispatchError::UnknownTemplate(template.clone()))?;

        let substitute = |text: &str| {
            let mut rendered = text.to_string();
            for (key, value) in vars {
                rendered = rendered.replace(&format!("{{{key}}}"), value);
            }
            rendered
        };

        Ok(MessagePayload {
            subject: payload.subject.as_deref().map(substitute),
            body: substitute(&payload.body),
        })
    }
}

/// Notification sink that records every push.
#[derive(Default)]
pub struct RecordingNotifications {
    pushed: Mutex<Vec<Notification>>,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushed(&self) -> Vec<Notification> {
        self.pushed.lock().expect("notification mutex poisoned").clone()
    }
}

impl NotificationSink for RecordingNotifications {
    fn notify(&self, notification: &Notification) -> Result<(), DispatchError> {
        self.pushed
            .lock()
            .expect("notification mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

/// Task sink that records every created task.
#[derive(Default)]
pub struct RecordingTasks {
    created: Mutex<Vec<FollowUpTask>>,
}

impl RecordingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<FollowUpTask> {
        self.created.lock().expect("task mutex poisoned").clone()
    }
}

impl TaskSink for RecordingTasks {
    fn create_task(&self, task: FollowUpTask) -> Result<(), DispatchError> {
        self.created.lock().expect("task mutex poisoned").push(task);
        Ok(())
    }
}

/// Pre-approval issuer returning sequential letter references. Delivery
/// outcome is configurable.
pub struct StubPreApproval {
    deliver: AtomicBool,
    issued: Mutex<u64>,
}

impl Default for StubPreApproval {
    fn default() -> Self {
        Self {
            deliver: AtomicBool::new(true),
            issued: Mutex::new(0),
        }
    }
}

impl StubPreApproval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delivering(&self, deliver: bool) {
        self.deliver.store(deliver, Ordering::Relaxed);
    }
}

impl PreApprovalIssuer for StubPreApproval {
    fn issue_and_send(&self, lead: &Lead) -> Result<PreApprovalReceipt, DispatchError> {
        let mut issued = self.issued.lock().expect("pre-approval mutex poisoned");
        *issued += 1;
        let delivered = self.deliver.load(Ordering::Relaxed);
        Ok(PreApprovalReceipt {
            reference: format!("PA-{:05}", *issued),
            delivered,
            channel: delivered.then_some(Channel::Email),
            detail: (!delivered).then(|| format!("no reachable channel for lead {}", lead.id)),
        })
    }
}

/// Opportunity registry keyed by lead; `ensure_application` is
/// idempotent.
#[derive(Default)]
pub struct StubOpportunities {
    existing: Mutex<HashSet<LeadId>>,
}

impl StubOpportunities {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpportunityRegistry for StubOpportunities {
    fn ensure_application(&self, lead: &Lead) -> Result<ApplicationHandle, StoreError> {
        let mut existing = self.existing.lock().expect("opportunity mutex poisoned");
        let created = existing.insert(lead.id);
        Ok(ApplicationHandle {
            reference: format!("APP-{}", lead.id.0),
            created,
        })
    }
}

/// Settable clock for deterministic runs.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}
