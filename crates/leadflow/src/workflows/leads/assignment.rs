use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::blueprint::BlueprintExecutor;
use super::domain::{
    ActivityDraft, ActivityKind, AgentId, Lead, LeadCategory, LeadId, PipelineId, Segment,
    SideEffect, Stage, StageId,
};
use super::repository::{AppendMode, LeadStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("lead {0} not found")]
    UnknownLead(LeadId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a newly created lead landed. `Unassigned` is not fatal: the
/// caller is informed and the lead stays without a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssignmentOutcome {
    Assigned {
        pipeline: PipelineId,
        entry_stage: Option<StageId>,
        side_effects: Vec<SideEffect>,
    },
    Unassigned,
}

/// Chooses the pipeline and entry stage for a newly created lead from
/// its segment-determining attributes.
pub struct AssignmentResolver<S> {
    store: Arc<S>,
    executor: BlueprintExecutor<S>,
}

impl<S: LeadStore> AssignmentResolver<S> {
    pub fn new(store: Arc<S>, executor: BlueprintExecutor<S>) -> Self {
        Self { store, executor }
    }

    /// Attaches a lead to a pipeline and its entry stage. A preferred
    /// pipeline short-circuits segment resolution when given.
    pub fn assign(
        &self,
        lead_id: LeadId,
        preferred: Option<PipelineId>,
        actor: Option<AgentId>,
    ) -> Result<AssignmentOutcome, AssignmentError> {
        let mut lead = self
            .store
            .lead(lead_id)?
            .ok_or(AssignmentError::UnknownLead(lead_id))?;
        let now = self.executor.clock().now();

        let pipeline = match preferred {
            Some(id) => self.store.pipeline(id)?,
            None => {
                let segment = segment_for(&lead, now);
                // Default pipeline for the segment within the lead's
                // campus, falling back to any active one.
                self.store
                    .active_pipelines(lead.campus, segment)?
                    .into_iter()
                    .max_by_key(|candidate| candidate.is_default)
            }
        };

        let Some(pipeline) = pipeline else {
            info!(lead = %lead.id, "no pipeline matched; lead left unassigned");
            return Ok(AssignmentOutcome::Unassigned);
        };

        let entry_stage = self.entry_stage(&pipeline.id)?;

        lead.pipeline = Some(pipeline.id);
        if let Some(stage) = &entry_stage {
            lead.current_stage = Some(stage.id);
            lead.stage_entered_at = Some(now);
        }
        lead.updated_at = now;
        self.store.update_lead(&lead)?;

        self.store.append_activity(
            ActivityDraft {
                lead: lead.id,
                kind: ActivityKind::StatusChange,
                description: format!("Assigned to pipeline: {}", pipeline.name),
                actor,
                automated: true,
                automation_source: Some("pipeline"),
                from_stage: None,
                to_stage: entry_stage.as_ref().map(|s| s.code.clone()),
            },
            now,
            AppendMode::Normal,
        )?;

        let mut side_effects = vec![SideEffect::ActivityLogged];
        if let Some(stage) = &entry_stage {
            side_effects.extend(self.executor.on_stage_entry(&lead, stage)?);
        }

        Ok(AssignmentOutcome::Assigned {
            pipeline: pipeline.id,
            entry_stage: entry_stage.map(|s| s.id),
            side_effects,
        })
    }

    /// The stage flagged `is_entry`, or the lowest-order stage as a
    /// fallback. Uniqueness of the entry flag is deliberately not
    /// enforced; the first flagged stage in order wins.
    fn entry_stage(&self, pipeline: &PipelineId) -> Result<Option<Stage>, StoreError> {
        let stages = self.store.stages_for(*pipeline)?;
        Ok(stages
            .iter()
            .find(|stage| stage.is_entry)
            .cloned()
            .or_else(|| stages.into_iter().min_by_key(|stage| stage.order)))
    }
}

/// Maps a lead's intake category to a pipeline segment, refining
/// school leavers into ready-now vs future on the matric-year
/// heuristic (within one year counts as ready).
pub fn segment_for(lead: &Lead, now: DateTime<Utc>) -> Segment {
    match lead.category {
        LeadCategory::Adult => Segment::Adult,
        LeadCategory::Corporate => Segment::Corporate,
        LeadCategory::Referral => Segment::Referral,
        LeadCategory::SchoolLeaver => {
            if let Some(year) = lead.expected_matric_year {
                if year - now.year() <= 1 {
                    return Segment::SchoolLeaverReady;
                }
                return Segment::SchoolLeaverFuture;
            }
            if let Some(grade) = &lead.grade {
                let grade = grade.to_ascii_lowercase();
                if grade.contains("12") || grade.contains("matric") {
                    return Segment::SchoolLeaverReady;
                }
                if ["9", "10", "11"].iter().any(|g| grade.contains(g)) {
                    return Segment::SchoolLeaverFuture;
                }
            }
            Segment::SchoolLeaverReady
        }
    }
}
