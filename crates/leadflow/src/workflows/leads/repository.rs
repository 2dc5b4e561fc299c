use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::blueprint::StageBlueprint;
use super::domain::{
    Activity, ActivityDraft, AgentId, CampusId, Channel, CommunicationDraft, DocumentRecord,
    FollowUpTask, Lead, LeadId, MessagePayload, Notification, NotificationKind, Pipeline,
    PipelineId, QuoteRecord, ScheduledCommunication, Segment, Stage, StageId, TemplateRef,
};

/// Error enumeration for entity store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("lead {0} is locked by a concurrent operation")]
    Contended(LeadId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of an outbound collaborator (messaging, template rendering,
/// notification push, task creation). Never fatal to the operation
/// that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("template {0} could not be resolved")]
    UnknownTemplate(TemplateRef),
    #[error("{channel} delivery to {address} failed: {detail}")]
    Delivery {
        channel: Channel,
        address: String,
        detail: String,
    },
    #[error("transport unavailable: {0}")]
    Transport(String),
}

/// Controls derived bookkeeping when appending activities. Import
/// scripts pass `BulkLoad` instead of mutating process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMode {
    /// Normal append: the store also bumps the lead's `updated_at`.
    Normal,
    /// Bulk import: append only, no derived bookkeeping.
    BulkLoad,
}

/// RAII token for a per-lead exclusive section. Dropping it releases
/// the lock. Two concurrent transitions or merges on the same lead
/// must not interleave; operations on different leads are independent.
pub trait LeadGuard: Send {}

/// Typed repository over the pipeline entities. Durable storage and
/// querying live behind this seam; implementations decide how `find`
/// predicates and locks map onto their backend.
pub trait LeadStore: Send + Sync {
    fn pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>, StoreError>;
    /// Active pipelines for a campus and segment, default pipelines first.
    fn active_pipelines(
        &self,
        campus: CampusId,
        segment: Segment,
    ) -> Result<Vec<Pipeline>, StoreError>;
    fn stage(&self, id: StageId) -> Result<Option<Stage>, StoreError>;
    /// Stages of a pipeline ordered by `order`.
    fn stages_for(&self, pipeline: PipelineId) -> Result<Vec<Stage>, StoreError>;
    fn blueprint_for(&self, stage: StageId) -> Result<Option<StageBlueprint>, StoreError>;

    fn lead(&self, id: LeadId) -> Result<Option<Lead>, StoreError>;
    fn update_lead(&self, lead: &Lead) -> Result<(), StoreError>;
    fn leads_where(&self, predicate: &dyn Fn(&Lead) -> bool) -> Result<Vec<Lead>, StoreError>;
    /// Acquires the per-lead lock of the concurrency contract. Returns
    /// `StoreError::Contended` rather than blocking indefinitely.
    fn lock_lead(&self, id: LeadId) -> Result<Box<dyn LeadGuard>, StoreError>;

    fn append_activity(
        &self,
        draft: ActivityDraft,
        at: DateTime<Utc>,
        mode: AppendMode,
    ) -> Result<Activity, StoreError>;
    fn activities_for(&self, lead: LeadId) -> Result<Vec<Activity>, StoreError>;
    /// Moves all activities from one lead to another, prefixing each
    /// description with the given provenance marker.
    fn reparent_activities(
        &self,
        from: LeadId,
        to: LeadId,
        prefix: &str,
    ) -> Result<usize, StoreError>;

    fn schedule_communication(
        &self,
        draft: CommunicationDraft,
    ) -> Result<ScheduledCommunication, StoreError>;
    fn update_communication(&self, comm: &ScheduledCommunication) -> Result<(), StoreError>;
    /// Cancels every still-scheduled communication for a lead.
    fn cancel_scheduled_for(&self, lead: LeadId, reason: &str) -> Result<usize, StoreError>;
    fn due_communications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledCommunication>, StoreError>;

    fn record_notification(&self, notification: Notification) -> Result<(), StoreError>;
    /// Number of notifications of a kind recorded for an agent at or
    /// after `since`; used to suppress duplicate daily alerts.
    fn notifications_since(
        &self,
        agent: AgentId,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    fn quotes_for(&self, lead: LeadId) -> Result<Vec<QuoteRecord>, StoreError>;
    fn documents_for(&self, lead: LeadId) -> Result<Vec<DocumentRecord>, StoreError>;
    fn reparent_documents(&self, from: LeadId, to: LeadId) -> Result<usize, StoreError>;
}

/// Delivery outcome reported by the messaging collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub channel: Channel,
    pub message_id: Option<String>,
}

/// Third-party channel sender. Implementations carry their own
/// per-send timeout; callers treat failures as non-fatal.
pub trait Messenger: Send + Sync {
    fn send(
        &self,
        channel: Channel,
        address: &str,
        payload: &MessagePayload,
    ) -> Result<DeliveryReceipt, DispatchError>;
}

/// Variable map handed to the template collaborator.
pub type TemplateVars = std::collections::BTreeMap<&'static str, String>;

/// Resolves a template reference plus variables into a rendered payload.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template: &TemplateRef,
        vars: &TemplateVars,
    ) -> Result<MessagePayload, DispatchError>;
}

/// Best-effort push of a stored notification to the owning agent.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Creates follow-up tasks from blueprint auto-tasks.
pub trait TaskSink: Send + Sync {
    fn create_task(&self, task: FollowUpTask) -> Result<(), DispatchError>;
}

/// Outcome of the pre-approval sub-flow (letter generation + dispatch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreApprovalReceipt {
    pub reference: String,
    pub delivered: bool,
    pub channel: Option<Channel>,
    pub detail: Option<String>,
}

/// Pre-approval letter collaborator, invoked when a lead enters the
/// pipeline's pre-approval milestone stage.
pub trait PreApprovalIssuer: Send + Sync {
    fn issue_and_send(&self, lead: &Lead) -> Result<PreApprovalReceipt, DispatchError>;
}

/// Handle to the downstream opportunity/application record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationHandle {
    pub reference: String,
    pub created: bool,
}

/// Ensures the downstream application record exists; idempotent.
pub trait OpportunityRegistry: Send + Sync {
    fn ensure_application(&self, lead: &Lead) -> Result<ApplicationHandle, StoreError>;
}

/// Injectable time source for deterministic testing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
