//! Lead lifecycle automation: pipelines, stage transitions, blueprint
//! execution, engagement scoring, duplicate handling, and the periodic
//! jobs that keep the pipeline moving.

pub mod assignment;
pub mod automation;
pub mod blueprint;
pub mod domain;
pub mod duplicates;
pub mod memory;
pub mod repository;
pub mod scoring;
pub mod transition;

#[cfg(test)]
mod tests;

pub use assignment::{segment_for, AssignmentError, AssignmentOutcome, AssignmentResolver};
pub use automation::{AutomationJobs, JobError, JobReport, JobScheduler, JobTuning};
pub use blueprint::{
    AutoTask, BlueprintExecutor, RecommendedAction, RequirementCheck, SendOutcome, StageBlueprint,
};
pub use domain::{
    Activity, ActivityDraft, ActivityKind, AgentId, CampusId, Channel, CommunicationDraft,
    DispatchState, DocumentRecord, FollowUpTask, Lead, LeadCategory, LeadId, LeadStatus,
    MessagePayload, Notification, NotificationKind, NotificationPriority, Pipeline, PipelineId,
    QuoteRecord, ScheduledCommunication, Segment, SideEffect, Stage, StageId, StageMilestone,
    TemplateRef,
};
pub use duplicates::{
    normalize_phone, DuplicateConfig, DuplicateEngine, DuplicateGroup, DuplicateMatch,
    DuplicateQuery, GroupKind, MatchReason, MergeError, MergeReport,
};
pub use repository::{
    AppendMode, ApplicationHandle, Clock, DeliveryReceipt, DispatchError, LeadGuard, LeadStore,
    Messenger, NotificationSink, OpportunityRegistry, PreApprovalIssuer, PreApprovalReceipt,
    StoreError, SystemClock, TaskSink, TemplateRenderer, TemplateVars,
};
pub use scoring::{
    score_inputs, EngagementLevel, ScoreBreakdown, ScoreError, ScoreWeights, ScoringEngine,
    ScoringInputs,
};
pub use transition::{
    Recommendation, RecommendationKind, TransitionEngine, TransitionError, TransitionOutcome,
};
