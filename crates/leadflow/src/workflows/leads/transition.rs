use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::blueprint::{BlueprintExecutor, RecommendedAction};
use super::domain::{
    ActivityDraft, ActivityKind, AgentId, Lead, LeadId, LeadStatus, Notification,
    NotificationKind, NotificationPriority, PipelineId, SideEffect, Stage, StageId,
    StageMilestone,
};
use super::repository::{
    AppendMode, Clock, LeadStore, NotificationSink, OpportunityRegistry, PreApprovalIssuer,
    StoreError,
};

/// Error raised by a transition. Validation errors are rejected before
/// any mutation; collaborator failures never surface here (they are
/// reported as side effects instead).
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("lead {0} not found")]
    UnknownLead(LeadId),
    #[error("stage {0} not found")]
    UnknownStage(StageId),
    #[error("stage {stage} belongs to pipeline {stage_pipeline}, lead {lead} is in {lead_pipeline}")]
    CrossPipelineTransition {
        lead: LeadId,
        stage: StageId,
        stage_pipeline: PipelineId,
        lead_pipeline: PipelineId,
    },
    #[error("lead {0} is locked by a concurrent operation; retry the move")]
    Conflict(LeadId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TransitionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Contended(lead) => Self::Conflict(lead),
            other => Self::Store(other),
        }
    }
}

/// Result of a successful transition: where the lead moved and which
/// side effects actually fired, so partial failure is observable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub lead: LeadId,
    pub old_stage: Option<StageId>,
    pub new_stage: StageId,
    pub status: LeadStatus,
    pub side_effects: Vec<SideEffect>,
}

/// Recommendation surfaced to an agent for a lead's current stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Overdue,
    BlueprintHint,
    RequirementGate,
}

/// State machine moving leads between pipeline stages. Each move is
/// atomic per lead (scoped lock), appends exactly one stage-change
/// activity, and triggers the target stage's blueprint.
pub struct TransitionEngine<S> {
    store: Arc<S>,
    executor: BlueprintExecutor<S>,
    notifications: Arc<dyn NotificationSink>,
    pre_approval: Arc<dyn PreApprovalIssuer>,
    opportunities: Arc<dyn OpportunityRegistry>,
    clock: Arc<dyn Clock>,
}

impl<S: LeadStore> TransitionEngine<S> {
    pub fn new(
        store: Arc<S>,
        executor: BlueprintExecutor<S>,
        notifications: Arc<dyn NotificationSink>,
        pre_approval: Arc<dyn PreApprovalIssuer>,
        opportunities: Arc<dyn OpportunityRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            executor,
            notifications,
            pre_approval,
            opportunities,
            clock,
        }
    }

    /// Moves a lead to a new stage within its pipeline.
    ///
    /// Rejected with `CrossPipelineTransition` when the target stage
    /// belongs to a different pipeline. A lead not yet attached to any
    /// pipeline adopts the target stage's pipeline.
    pub fn move_to_stage(
        &self,
        lead_id: LeadId,
        target: StageId,
        actor: Option<AgentId>,
        note: &str,
    ) -> Result<TransitionOutcome, TransitionError> {
        let _guard = self.store.lock_lead(lead_id)?;

        let mut lead = self
            .store
            .lead(lead_id)?
            .ok_or(TransitionError::UnknownLead(lead_id))?;
        let stage = self
            .store
            .stage(target)?
            .ok_or(TransitionError::UnknownStage(target))?;

        if let Some(pipeline) = lead.pipeline {
            if pipeline != stage.pipeline {
                return Err(TransitionError::CrossPipelineTransition {
                    lead: lead_id,
                    stage: target,
                    stage_pipeline: stage.pipeline,
                    lead_pipeline: pipeline,
                });
            }
        }

        let now = self.clock.now();
        let old_stage_id = lead.current_stage;
        let old_stage = match old_stage_id {
            Some(id) => self.store.stage(id)?,
            None => None,
        };

        lead.pipeline = Some(stage.pipeline);
        lead.current_stage = Some(stage.id);
        lead.stage_entered_at = Some(now);
        lead.status = derive_status(&stage, lead.status);
        if stage.is_won && lead.converted_at.is_none() {
            lead.converted_at = Some(now);
        }
        lead.updated_at = now;
        self.store.update_lead(&lead)?;

        let from_name = old_stage
            .as_ref()
            .map_or_else(|| "None".to_string(), |s| s.name.clone());
        let mut description = format!("Stage changed: {from_name} \u{2192} {}", stage.name);
        if !note.is_empty() {
            description.push_str(" - ");
            description.push_str(note);
        }
        self.store.append_activity(
            ActivityDraft {
                lead: lead.id,
                kind: ActivityKind::StageChange,
                description,
                actor,
                automated: actor.is_none(),
                automation_source: actor.is_none().then_some("pipeline"),
                from_stage: old_stage.as_ref().map(|s| s.code.clone()),
                to_stage: Some(stage.code.clone()),
            },
            now,
            AppendMode::Normal,
        )?;

        let mut side_effects = vec![SideEffect::ActivityLogged];
        side_effects.extend(self.executor.on_stage_entry(&lead, &stage)?);

        match stage.milestone {
            Some(StageMilestone::PreApproval) => {
                self.run_pre_approval(&lead, &mut side_effects)?;
            }
            Some(StageMilestone::Application) => {
                match self.opportunities.ensure_application(&lead) {
                    Ok(handle) if handle.created => {
                        self.store.append_activity(
                            ActivityDraft::automated(
                                lead.id,
                                ActivityKind::StatusChange,
                                format!("Application {} created", handle.reference),
                                "pipeline",
                            ),
                            now,
                            AppendMode::Normal,
                        )?;
                        side_effects.push(SideEffect::ApplicationCreated);
                    }
                    Ok(_) => side_effects.push(SideEffect::ApplicationAlreadyPresent),
                    Err(err) => {
                        warn!(lead = %lead.id, error = %err, "application record could not be ensured");
                    }
                }
            }
            None => {}
        }

        // Stages without a blueprint notify by default; a blueprint can
        // mute the entry notification.
        let notify_owner = self
            .store
            .blueprint_for(stage.id)?
            .map_or(true, |blueprint| blueprint.notify_agent_on_entry);
        if let (true, Some(agent)) = (notify_owner, lead.assigned_to) {
            let notification = Notification {
                agent,
                kind: NotificationKind::StageChange,
                priority: NotificationPriority::Normal,
                title: format!("Lead moved to {}", stage.name),
                message: format!("{} moved from {from_name} to {}", lead.full_name(), stage.name),
                lead: Some(lead.id),
                created_at: now,
            };
            self.store.record_notification(notification.clone())?;
            if let Err(err) = self.notifications.notify(&notification) {
                warn!(agent = %agent, error = %err, "notification push failed");
            }
            side_effects.push(SideEffect::AgentNotified);
        }

        info!(
            lead = %lead.id,
            from = %from_name,
            to = %stage.name,
            effects = side_effects.len(),
            "stage transition completed"
        );

        Ok(TransitionOutcome {
            lead: lead.id,
            old_stage: old_stage_id,
            new_stage: stage.id,
            status: lead.status,
            side_effects,
        })
    }

    fn run_pre_approval(
        &self,
        lead: &Lead,
        side_effects: &mut Vec<SideEffect>,
    ) -> Result<(), TransitionError> {
        if lead.qualification_interest.is_none() {
            side_effects.push(SideEffect::PreApprovalFailed {
                detail: "no qualification interest set".to_string(),
            });
            return Ok(());
        }

        match self.pre_approval.issue_and_send(lead) {
            Ok(receipt) => {
                self.store.append_activity(
                    ActivityDraft::automated(
                        lead.id,
                        ActivityKind::StatusChange,
                        format!("Pre-approval letter {} created", receipt.reference),
                        "pipeline",
                    ),
                    self.clock.now(),
                    AppendMode::Normal,
                )?;
                side_effects.push(SideEffect::PreApprovalIssued {
                    reference: receipt.reference,
                });
                if !receipt.delivered {
                    side_effects.push(SideEffect::PreApprovalFailed {
                        detail: receipt
                            .detail
                            .unwrap_or_else(|| "letter created but not delivered".to_string()),
                    });
                }
            }
            Err(err) => {
                warn!(lead = %lead.id, error = %err, "pre-approval sub-flow failed");
                side_effects.push(SideEffect::PreApprovalFailed {
                    detail: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Recommended actions for a lead in its current stage: an overdue
    /// warning first, then the blueprint's hints and requirement gates.
    pub fn stage_recommendations(&self, lead: &Lead) -> Result<Vec<Recommendation>, StoreError> {
        let Some(stage_id) = lead.current_stage else {
            return Ok(Vec::new());
        };
        let Some(stage) = self.store.stage(stage_id)? else {
            return Ok(Vec::new());
        };

        let mut recommendations = Vec::new();
        let now = self.clock.now();
        if lead.is_overdue_in_stage(&stage, now) {
            let days = lead.days_in_stage(now).unwrap_or(0);
            recommendations.push(Recommendation {
                kind: RecommendationKind::Overdue,
                action: "Follow up immediately".to_string(),
                description: format!(
                    "Lead has been in {} for {days} days (expected: {})",
                    stage.name, stage.expected_duration_days
                ),
            });
        }

        if let Some(blueprint) = self.store.blueprint_for(stage.id)? {
            for action in &blueprint.recommended_actions {
                recommendations.push(match action {
                    RecommendedAction::Hint {
                        action,
                        description,
                    } => Recommendation {
                        kind: RecommendationKind::BlueprintHint,
                        action: action.clone(),
                        description: description.clone(),
                    },
                    RecommendedAction::Requirement(check) => Recommendation {
                        kind: RecommendationKind::RequirementGate,
                        action: "Complete requirement".to_string(),
                        description: check.describe(),
                    },
                });
            }
        }

        Ok(recommendations)
    }

    pub fn executor(&self) -> &BlueprintExecutor<S> {
        &self.executor
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

/// Maps a stage's role flags to the coarse lifecycle status, falling
/// back to a heuristic on the stage code for unflagged stages.
fn derive_status(stage: &Stage, current: LeadStatus) -> LeadStatus {
    if stage.is_entry {
        return LeadStatus::New;
    }
    if stage.is_won {
        return LeadStatus::Enrolled;
    }
    if stage.is_lost {
        return LeadStatus::Lost;
    }
    if stage.is_nurture {
        return LeadStatus::Nurturing;
    }

    let code = stage.code.to_ascii_lowercase();
    if code.contains("contact") {
        LeadStatus::Contacted
    } else if code.contains("qualif") {
        LeadStatus::Qualified
    } else if code.contains("proposal") {
        LeadStatus::Proposal
    } else if code.contains("negotiat") {
        LeadStatus::Negotiation
    } else if code.contains("regist") {
        LeadStatus::Registered
    } else {
        current
    }
}
