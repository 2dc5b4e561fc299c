use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a lead record.
    LeadId
);
entity_id!(PipelineId);
entity_id!(StageId);
entity_id!(AgentId);
entity_id!(CampusId);
entity_id!(ActivityId);
entity_id!(CommunicationId);

/// Lead segment a pipeline is designed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    SchoolLeaverReady,
    SchoolLeaverFuture,
    Adult,
    Corporate,
    Referral,
}

impl Segment {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SchoolLeaverReady => "School Leaver - Ready Now",
            Self::SchoolLeaverFuture => "School Leaver - Future",
            Self::Adult => "Adult Learner",
            Self::Corporate => "Corporate/Employer Referral",
            Self::Referral => "General Referral",
        }
    }
}

/// Coarse category captured at intake, before a segment is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadCategory {
    SchoolLeaver,
    Adult,
    Corporate,
    Referral,
}

/// Ordered collection of stages for one lead segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub campus: CampusId,
    pub name: String,
    pub segment: Segment,
    /// Default days between automated communications, overridable per stage.
    pub default_cadence_days: u32,
    pub is_default: bool,
    pub is_active: bool,
}

/// Milestone roles that trigger sub-flows on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMilestone {
    PreApproval,
    Application,
}

/// One step in a pipeline. Role flags drive status mapping and special
/// handling; `order` defines the sequence used for auto-progression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub pipeline: PipelineId,
    pub code: String,
    pub name: String,
    pub order: u32,
    pub expected_duration_days: u32,
    /// Override of the pipeline's default communication cadence.
    pub cadence_days: Option<u32>,
    pub win_probability: u8,
    pub is_entry: bool,
    pub is_won: bool,
    pub is_lost: bool,
    pub is_nurture: bool,
    /// Days in stage after which the lead is auto-progressed, if its
    /// requirement gates pass. `None` disables auto-progression.
    pub auto_progress_days: Option<u32>,
    pub milestone: Option<StageMilestone>,
}

impl Stage {
    /// Communication cadence for this stage, falling back to the
    /// pipeline default.
    pub fn effective_cadence_days(&self, pipeline: &Pipeline) -> u32 {
        self.cadence_days.unwrap_or(pipeline.default_cadence_days)
    }
}

/// Coarse lifecycle status, derivable from stage role flags but
/// independently settable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Registered,
    Enrolled,
    Nurturing,
    Lost,
    Merged,
}

impl LeadStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Contacted => "Contacted",
            Self::Qualified => "Qualified",
            Self::Proposal => "Proposal Sent",
            Self::Negotiation => "In Negotiation",
            Self::Registered => "Registered",
            Self::Enrolled => "Enrolled",
            Self::Nurturing => "Nurturing",
            Self::Lost => "Lost",
            Self::Merged => "Merged",
        }
    }

    /// Terminal statuses are never touched by nurture or scoring jobs.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Enrolled | Self::Lost | Self::Merged)
    }
}

/// Outbound channel preference order is WhatsApp, email, then SMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    WhatsApp,
    Email,
    Sms,
}

impl Channel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::WhatsApp => "WhatsApp",
            Self::Email => "Email",
            Self::Sms => "SMS",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The contact record moving through a pipeline. Never hard-deleted:
/// `Lost` and `Merged` are terminal statuses, not deletions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub campus: CampusId,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub phone_secondary: Option<String>,
    pub whatsapp_number: Option<String>,
    pub email: Option<String>,
    pub category: LeadCategory,
    pub expected_matric_year: Option<i32>,
    pub grade: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub parent_email: Option<String>,
    pub school_name: Option<String>,
    pub qualification_interest: Option<String>,
    pub notes: Option<String>,
    pub pipeline: Option<PipelineId>,
    pub current_stage: Option<StageId>,
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub status: LeadStatus,
    pub assigned_to: Option<AgentId>,
    pub engagement_score: Option<u8>,
    pub unsubscribed: bool,
    pub nurture_active: bool,
    pub merged_into: Option<LeadId>,
    pub merged_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Reachable channels in order of preference.
    pub fn contact_channels(&self) -> Vec<(Channel, String)> {
        let mut channels = Vec::new();
        if let Some(number) = self.whatsapp_number.as_deref().filter(|n| !n.is_empty()) {
            channels.push((Channel::WhatsApp, number.to_string()));
        }
        if let Some(email) = self.email.as_deref().filter(|e| !e.is_empty()) {
            channels.push((Channel::Email, email.to_string()));
        }
        if let Some(phone) = self.phone.as_deref().filter(|p| !p.is_empty()) {
            channels.push((Channel::Sms, phone.to_string()));
        }
        channels
    }

    pub fn days_in_stage(&self, now: DateTime<Utc>) -> Option<i64> {
        self.stage_entered_at
            .map(|entered| (now - entered).num_days())
    }

    pub fn is_overdue_in_stage(&self, stage: &Stage, now: DateTime<Utc>) -> bool {
        self.days_in_stage(now)
            .is_some_and(|days| days > i64::from(stage.expected_duration_days))
    }
}

/// Append-only event kinds recorded against a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Call,
    Email,
    WhatsApp,
    Meeting,
    Note,
    StatusChange,
    StageChange,
    CommunicationSent,
    Assignment,
    QuoteSent,
    QuoteViewed,
    DocumentSubmitted,
}

impl ActivityKind {
    /// Kinds that count as a response for staleness purposes.
    pub const fn is_contact(self) -> bool {
        matches!(self, Self::Call | Self::Email | Self::WhatsApp | Self::Meeting)
    }
}

/// A not-yet-persisted activity. The store assigns the id and stamps
/// the creation time handed to it.
#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub lead: LeadId,
    pub kind: ActivityKind,
    pub description: String,
    pub actor: Option<AgentId>,
    pub automated: bool,
    pub automation_source: Option<&'static str>,
    pub from_stage: Option<String>,
    pub to_stage: Option<String>,
}

impl ActivityDraft {
    pub fn manual(lead: LeadId, kind: ActivityKind, description: String, actor: Option<AgentId>) -> Self {
        Self {
            lead,
            kind,
            description,
            actor,
            automated: false,
            automation_source: None,
            from_stage: None,
            to_stage: None,
        }
    }

    pub fn automated(
        lead: LeadId,
        kind: ActivityKind,
        description: String,
        source: &'static str,
    ) -> Self {
        Self {
            lead,
            kind,
            description,
            actor: None,
            automated: true,
            automation_source: Some(source),
            from_stage: None,
            to_stage: None,
        }
    }
}

/// Immutable audit record of an event on a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub lead: LeadId,
    pub kind: ActivityKind,
    pub description: String,
    pub actor: Option<AgentId>,
    pub automated: bool,
    pub automation_source: Option<String>,
    pub from_stage: Option<String>,
    pub to_stage: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StageChange,
    ActionRequired,
    FollowUp,
    StaleLeads,
    Engagement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    Medium,
    High,
}

/// Fire-and-forget alert to an owning agent. Stored for dedup queries
/// and pushed best-effort through the notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub agent: AgentId,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub lead: Option<LeadId>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a queued outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Scheduled,
    Sent,
    Failed,
    Cancelled,
}

/// Reference to a message template resolved by the template collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateRef(pub String);

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rendered message ready for a channel sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub subject: Option<String>,
    pub body: String,
}

/// Queued, time-triggered outbound message tied to a lead and template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCommunication {
    pub id: CommunicationId,
    pub lead: LeadId,
    pub template: Option<TemplateRef>,
    pub scheduled_at: DateTime<Utc>,
    pub cadence_days: u32,
    pub state: DispatchState,
    pub sent_at: Option<DateTime<Utc>>,
    pub channel_used: Option<Channel>,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Draft of a scheduled communication; the store assigns the id.
#[derive(Debug, Clone)]
pub struct CommunicationDraft {
    pub lead: LeadId,
    pub template: Option<TemplateRef>,
    pub scheduled_at: DateTime<Utc>,
    pub cadence_days: u32,
}

/// Quote snapshot read by the scoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub lead: LeadId,
    pub created_at: DateTime<Utc>,
    pub viewed_at: Option<DateTime<Utc>>,
}

/// Document snapshot read by the scoring and merge engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub lead: LeadId,
    pub name: String,
    pub accepted: bool,
}

/// Follow-up task created from a stage blueprint's auto-tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpTask {
    pub title: String,
    pub description: String,
    pub assigned_to: Option<AgentId>,
    pub due_at: DateTime<Utc>,
    pub lead: LeadId,
}

/// Side effect actually triggered by an engine operation, reported so
/// that partial failure is observable rather than hidden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ActivityLogged,
    CommunicationScheduled,
    InitialCommunicationSent { channel: Channel },
    InitialCommunicationFailed { detail: String },
    TasksCreated { count: usize },
    PreApprovalIssued { reference: String },
    PreApprovalFailed { detail: String },
    ApplicationCreated,
    ApplicationAlreadyPresent,
    AgentNotified,
}
