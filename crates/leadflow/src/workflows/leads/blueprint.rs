use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{
    ActivityDraft, ActivityKind, Channel, CommunicationDraft, FollowUpTask, Lead,
    ScheduledCommunication, SideEffect, Stage, StageId, TemplateRef,
};
use super::repository::{
    AppendMode, Clock, LeadStore, Messenger, StoreError, TaskSink, TemplateRenderer, TemplateVars,
};

/// Typed requirement gate evaluated before auto-progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCheck {
    HasEmail,
    HasPhone,
    HasQualificationInterest,
    HasActivityOfKind(ActivityKind),
    ScoreAtLeast(u8),
}

impl RequirementCheck {
    pub fn describe(&self) -> String {
        match self {
            Self::HasEmail => "email address on file".to_string(),
            Self::HasPhone => "phone number on file".to_string(),
            Self::HasQualificationInterest => "qualification interest recorded".to_string(),
            Self::HasActivityOfKind(kind) => format!("at least one {kind:?} activity"),
            Self::ScoreAtLeast(min) => format!("engagement score of {min} or more"),
        }
    }

    pub fn satisfied<S: LeadStore + ?Sized>(
        &self,
        lead: &Lead,
        store: &S,
    ) -> Result<bool, StoreError> {
        Ok(match self {
            Self::HasEmail => lead.email.as_deref().is_some_and(|e| !e.is_empty()),
            Self::HasPhone => lead.phone.as_deref().is_some_and(|p| !p.is_empty()),
            Self::HasQualificationInterest => lead.qualification_interest.is_some(),
            Self::HasActivityOfKind(kind) => store
                .activities_for(lead.id)?
                .iter()
                .any(|activity| activity.kind == *kind),
            Self::ScoreAtLeast(min) => lead.engagement_score.is_some_and(|score| score >= *min),
        })
    }
}

/// Entry in a stage blueprint's recommendation list. Hints are surfaced
/// to the owning agent; requirements additionally gate auto-progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Hint { action: String, description: String },
    Requirement(RequirementCheck),
}

/// Task auto-created when a lead enters the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTask {
    pub title: String,
    pub description: String,
    pub due_days: u32,
}

/// Declarative automation attached to a stage. Non-blocking: serves as
/// guidance and triggers best-effort automations on entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBlueprint {
    pub stage: StageId,
    pub notify_agent_on_entry: bool,
    pub auto_send_initial_communication: bool,
    pub default_template: Option<TemplateRef>,
    pub auto_schedule_follow_up: bool,
    pub recommended_actions: Vec<RecommendedAction>,
    pub auto_tasks: Vec<AutoTask>,
}

impl StageBlueprint {
    pub fn requirements(&self) -> impl Iterator<Item = &RequirementCheck> {
        self.recommended_actions.iter().filter_map(|action| match action {
            RecommendedAction::Requirement(check) => Some(check),
            RecommendedAction::Hint { .. } => None,
        })
    }
}

/// Outcome of a single communication attempt across a lead's channels.
/// `cycle_queued` records whether a delivered send also scheduled the
/// next nurture cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub delivered: bool,
    pub channel: Option<Channel>,
    pub detail: Option<String>,
    pub cycle_queued: bool,
}

/// Executes the automation attached to a stage when a lead enters it.
/// The three effect categories (follow-up scheduling, initial send,
/// auto-tasks) are independent: failure in one never blocks the others.
pub struct BlueprintExecutor<S> {
    store: Arc<S>,
    messenger: Arc<dyn Messenger>,
    templates: Arc<dyn TemplateRenderer>,
    tasks: Arc<dyn TaskSink>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for BlueprintExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            messenger: Arc::clone(&self.messenger),
            templates: Arc::clone(&self.templates),
            tasks: Arc::clone(&self.tasks),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: LeadStore> BlueprintExecutor<S> {
    pub fn new(
        store: Arc<S>,
        messenger: Arc<dyn Messenger>,
        templates: Arc<dyn TemplateRenderer>,
        tasks: Arc<dyn TaskSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            messenger,
            templates,
            tasks,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Runs the stage's blueprint for a lead that has just entered it.
    /// No-op when the stage carries no blueprint.
    pub fn on_stage_entry(&self, lead: &Lead, stage: &Stage) -> Result<Vec<SideEffect>, StoreError> {
        let Some(blueprint) = self.store.blueprint_for(stage.id)? else {
            return Ok(Vec::new());
        };

        let mut effects = Vec::new();
        let mut cycle_queued = false;

        if blueprint.auto_send_initial_communication {
            if let Some(template) = &blueprint.default_template {
                match self.send_communication(lead, template) {
                    Ok(outcome) if outcome.delivered => {
                        effects.push(SideEffect::InitialCommunicationSent {
                            channel: outcome.channel.unwrap_or(Channel::Email),
                        });
                        if outcome.cycle_queued {
                            effects.push(SideEffect::CommunicationScheduled);
                            cycle_queued = true;
                        }
                    }
                    Ok(outcome) => {
                        effects.push(SideEffect::InitialCommunicationFailed {
                            detail: outcome
                                .detail
                                .unwrap_or_else(|| "no reachable channel".to_string()),
                        });
                    }
                    Err(err) => {
                        warn!(lead = %lead.id, error = %err, "initial communication failed");
                        effects.push(SideEffect::InitialCommunicationFailed {
                            detail: err.to_string(),
                        });
                    }
                }
            }
        }

        if blueprint.auto_schedule_follow_up && !cycle_queued {
            match self.schedule_follow_up(lead, stage) {
                Ok(Some(_)) => effects.push(SideEffect::CommunicationScheduled),
                Ok(None) => {}
                Err(err) => {
                    warn!(lead = %lead.id, stage = %stage.code, error = %err, "follow-up scheduling failed");
                }
            }
        }

        if !blueprint.auto_tasks.is_empty() {
            let created = self.create_auto_tasks(lead, &blueprint.auto_tasks);
            if created > 0 {
                effects.push(SideEffect::TasksCreated { count: created });
            }
        }

        Ok(effects)
    }

    /// Queues the next automated communication according to the stage
    /// cadence, cancelling any previously scheduled cycle first.
    /// Skips unsubscribed leads and paused nurture.
    pub fn schedule_follow_up(
        &self,
        lead: &Lead,
        stage: &Stage,
    ) -> Result<Option<ScheduledCommunication>, StoreError> {
        if !lead.nurture_active || lead.unsubscribed {
            return Ok(None);
        }

        let Some(pipeline) = self.store.pipeline(stage.pipeline)? else {
            return Err(StoreError::NotFound);
        };
        let cadence = stage.effective_cadence_days(&pipeline);

        let template = self
            .store
            .blueprint_for(stage.id)?
            .and_then(|blueprint| blueprint.default_template);

        self.store
            .cancel_scheduled_for(lead.id, "superseded by new cycle")?;

        let scheduled = self.store.schedule_communication(CommunicationDraft {
            lead: lead.id,
            template,
            scheduled_at: self.clock.now() + Duration::days(i64::from(cadence)),
            cadence_days: cadence,
        })?;

        Ok(Some(scheduled))
    }

    /// Dispatches a template through the lead's channels in order of
    /// preference, stopping at the first delivery. A delivered send
    /// appends a communication activity and queues the next nurture
    /// cycle for the lead's current stage.
    pub fn send_communication(
        &self,
        lead: &Lead,
        template: &TemplateRef,
    ) -> Result<SendOutcome, StoreError> {
        let vars = template_vars(lead);
        let payload = match self.templates.render(template, &vars) {
            Ok(payload) => payload,
            Err(err) => {
                return Ok(SendOutcome {
                    delivered: false,
                    channel: None,
                    detail: Some(err.to_string()),
                    cycle_queued: false,
                })
            }
        };

        let mut last_error = None;
        for (channel, address) in lead.contact_channels() {
            match self.messenger.send(channel, &address, &payload) {
                Ok(_receipt) => {
                    self.store.append_activity(
                        ActivityDraft::automated(
                            lead.id,
                            ActivityKind::CommunicationSent,
                            format!("Automated {} sent: {template}", channel.label()),
                            "nurture",
                        ),
                        self.clock.now(),
                        AppendMode::Normal,
                    )?;
                    let cycle_queued = self.queue_next_cycle(lead)?;
                    return Ok(SendOutcome {
                        delivered: true,
                        channel: Some(channel),
                        detail: None,
                        cycle_queued,
                    });
                }
                Err(err) => {
                    warn!(lead = %lead.id, channel = channel.label(), error = %err, "channel send failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        Ok(SendOutcome {
            delivered: false,
            channel: None,
            detail: last_error.or_else(|| Some("no reachable channel".to_string())),
            cycle_queued: false,
        })
    }

    fn queue_next_cycle(&self, lead: &Lead) -> Result<bool, StoreError> {
        let Some(stage_id) = lead.current_stage else {
            return Ok(false);
        };
        let Some(stage) = self.store.stage(stage_id)? else {
            return Ok(false);
        };
        Ok(self.schedule_follow_up(lead, &stage)?.is_some())
    }

    /// True when every requirement gate in the stage's blueprint passes.
    /// Stages without a blueprint have no gates.
    pub fn requirements_met(&self, lead: &Lead, stage: &Stage) -> Result<bool, StoreError> {
        let Some(blueprint) = self.store.blueprint_for(stage.id)? else {
            return Ok(true);
        };
        for check in blueprint.requirements() {
            if !check.satisfied(lead, self.store.as_ref())? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Pauses nurture for a lead and cancels pending cycles.
    pub fn pause_nurture(&self, lead: &mut Lead, reason: &str) -> Result<(), StoreError> {
        lead.nurture_active = false;
        lead.updated_at = self.clock.now();
        self.store.update_lead(lead)?;
        self.store.cancel_scheduled_for(lead.id, reason)?;
        Ok(())
    }

    /// Re-enables nurture and queues the next cycle for the current stage.
    pub fn resume_nurture(&self, lead: &mut Lead) -> Result<(), StoreError> {
        lead.nurture_active = true;
        lead.updated_at = self.clock.now();
        self.store.update_lead(lead)?;

        if let Some(stage_id) = lead.current_stage {
            if let Some(stage) = self.store.stage(stage_id)? {
                self.schedule_follow_up(lead, &stage)?;
            }
        }
        Ok(())
    }

    fn create_auto_tasks(&self, lead: &Lead, tasks: &[AutoTask]) -> usize {
        let now = self.clock.now();
        let mut created = 0;
        for task in tasks {
            let follow_up = FollowUpTask {
                title: if task.title.is_empty() {
                    format!("Follow up with {}", lead.full_name())
                } else {
                    task.title.clone()
                },
                description: task.description.clone(),
                assigned_to: lead.assigned_to,
                due_at: now + Duration::days(i64::from(task.due_days)),
                lead: lead.id,
            };
            match self.tasks.create_task(follow_up) {
                Ok(()) => created += 1,
                Err(err) => {
                    warn!(lead = %lead.id, title = %task.title, error = %err, "auto-task creation failed");
                }
            }
        }
        created
    }
}

/// Variable map for template rendering, mirroring the fields templates
/// may reference.
pub fn template_vars(lead: &Lead) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.insert("first_name", lead.first_name.clone());
    vars.insert("last_name", lead.last_name.clone());
    vars.insert("full_name", lead.full_name());
    if let Some(email) = &lead.email {
        vars.insert("email", email.clone());
    }
    if let Some(phone) = &lead.phone {
        vars.insert("phone", phone.clone());
    }
    if let Some(interest) = &lead.qualification_interest {
        vars.insert("qualification_name", interest.clone());
    }
    vars
}
