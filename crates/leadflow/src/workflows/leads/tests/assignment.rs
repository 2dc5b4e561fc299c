use super::common::*;
use crate::workflows::leads::assignment::{segment_for, AssignmentOutcome};
use crate::workflows::leads::domain::{
    ActivityKind, CampusId, LeadCategory, LeadId, Pipeline, PipelineId, Segment, SideEffect,
    StageId,
};
use crate::workflows::leads::repository::LeadStore;

#[test]
fn segment_resolution_uses_matric_year_first() {
    let now = epoch();

    let mut l = lead(1);
    l.expected_matric_year = Some(2026);
    assert_eq!(segment_for(&l, now), Segment::SchoolLeaverReady);

    l.expected_matric_year = Some(2027);
    assert_eq!(segment_for(&l, now), Segment::SchoolLeaverReady);

    l.expected_matric_year = Some(2028);
    assert_eq!(segment_for(&l, now), Segment::SchoolLeaverFuture);
}

#[test]
fn segment_resolution_falls_back_to_grade() {
    let now = epoch();

    let mut l = lead(1);
    l.expected_matric_year = None;
    l.grade = Some("Grade 10".to_string());
    assert_eq!(segment_for(&l, now), Segment::SchoolLeaverFuture);

    l.grade = Some("Matric".to_string());
    assert_eq!(segment_for(&l, now), Segment::SchoolLeaverReady);

    l.grade = None;
    assert_eq!(segment_for(&l, now), Segment::SchoolLeaverReady);
}

#[test]
fn segment_resolution_maps_non_school_categories() {
    let now = epoch();

    let mut l = lead(1);
    l.category = LeadCategory::Adult;
    assert_eq!(segment_for(&l, now), Segment::Adult);
    l.category = LeadCategory::Corporate;
    assert_eq!(segment_for(&l, now), Segment::Corporate);
    l.category = LeadCategory::Referral;
    assert_eq!(segment_for(&l, now), Segment::Referral);
}

#[test]
fn assign_places_lead_in_default_pipeline_entry_stage() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(10));

    let outcome = h.resolver.assign(LeadId(10), None, None).expect("assignment succeeds");

    let AssignmentOutcome::Assigned {
        pipeline,
        entry_stage,
        side_effects,
    } = outcome
    else {
        panic!("expected assignment");
    };
    assert_eq!(pipeline, PipelineId(1));
    assert_eq!(entry_stage, Some(StageId(1)));

    let stored = h.store.lead(LeadId(10)).expect("lookup").expect("lead present");
    assert_eq!(stored.pipeline, Some(PipelineId(1)));
    assert_eq!(stored.current_stage, Some(StageId(1)));
    assert_eq!(stored.stage_entered_at, Some(epoch()));

    let activities = h.store.activities_for(LeadId(10)).expect("activities");
    assert!(activities
        .iter()
        .any(|a| a.kind == ActivityKind::StatusChange
            && a.description.contains("Assigned to pipeline")));

    // Entry blueprint ran: welcome sent and a follow-up queued.
    assert!(side_effects
        .iter()
        .any(|e| matches!(e, SideEffect::InitialCommunicationSent { .. })));
    assert!(side_effects.contains(&SideEffect::CommunicationScheduled));
    assert_eq!(h.messenger.sent().len(), 1);
}

#[test]
fn assign_prefers_default_pipeline_over_other_active_ones() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_pipeline(Pipeline {
        id: PipelineId(2),
        campus: CampusId(1),
        name: "Secondary Intake".to_string(),
        segment: Segment::SchoolLeaverReady,
        default_cadence_days: 7,
        is_default: false,
        is_active: true,
    });
    h.store.insert_lead(lead(11));

    match h.resolver.assign(LeadId(11), None, None).expect("assignment succeeds") {
        AssignmentOutcome::Assigned { pipeline, .. } => assert_eq!(pipeline, PipelineId(1)),
        AssignmentOutcome::Unassigned => panic!("expected assignment"),
    }
}

#[test]
fn assign_honors_a_preferred_pipeline() {
    let h = harness();
    seed_pipeline(&h);
    let mut l = lead(12);
    // Segment resolution would pick nothing for this category without
    // a corporate pipeline; the preference bypasses it.
    l.category = LeadCategory::Corporate;
    h.store.insert_lead(l);

    match h
        .resolver
        .assign(LeadId(12), Some(PipelineId(1)), None)
        .expect("assignment succeeds")
    {
        AssignmentOutcome::Assigned { pipeline, .. } => assert_eq!(pipeline, PipelineId(1)),
        AssignmentOutcome::Unassigned => panic!("expected assignment"),
    }
}

#[test]
fn assign_reports_unassigned_when_no_pipeline_matches() {
    let h = harness();
    let mut l = lead(13);
    l.category = LeadCategory::Corporate;
    h.store.insert_lead(l);

    let outcome = h.resolver.assign(LeadId(13), None, None).expect("resolution runs");
    assert!(matches!(outcome, AssignmentOutcome::Unassigned));

    let stored = h.store.lead(LeadId(13)).expect("lookup").expect("lead present");
    assert_eq!(stored.pipeline, None);
    assert!(h.store.activities_for(LeadId(13)).expect("activities").is_empty());
}

#[test]
fn assign_falls_back_to_lowest_order_stage_without_entry_flag() {
    let h = harness();
    h.store.insert_pipeline(pipeline());
    let mut first = contacted_stage();
    first.order = 1;
    let mut second = registered_stage();
    second.order = 2;
    h.store.insert_stage(first);
    h.store.insert_stage(second);
    h.store.insert_lead(lead(14));

    match h.resolver.assign(LeadId(14), None, None).expect("assignment succeeds") {
        AssignmentOutcome::Assigned { entry_stage, .. } => {
            assert_eq!(entry_stage, Some(StageId(2)));
        }
        AssignmentOutcome::Unassigned => panic!("expected assignment"),
    }
}
