use super::common::*;
use crate::workflows::leads::domain::{ActivityDraft, ActivityKind, DocumentRecord, LeadId, LeadStatus};
use crate::workflows::leads::duplicates::{normalize_phone, DuplicateQuery, MatchReason, MergeError};
use crate::workflows::leads::repository::{AppendMode, LeadStore};

#[test]
fn phone_normalization_localizes_the_country_code() {
    assert_eq!(normalize_phone("+27 82 123 4567", "27"), "0821234567");
    assert_eq!(normalize_phone("27821234567", "27"), "0821234567");
    assert_eq!(normalize_phone("082-123-4567", "27"), "0821234567");
    assert_eq!(normalize_phone("0821234567", "27"), "0821234567");
    // A bare "27" is a number, not a country prefix.
    assert_eq!(normalize_phone("27", "27"), "27");
}

#[test]
fn find_duplicates_matches_across_phone_formats() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(1));

    let matches = h
        .duplicates
        .find_duplicates(&DuplicateQuery {
            phone: Some("+27821234567".to_string()),
            ..DuplicateQuery::default()
        })
        .expect("search runs");

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].lead.id, LeadId(1));
    assert!(matches[0].reasons.contains(&MatchReason::PhoneMatches));
    assert_eq!(matches[0].score, 50);
}

#[test]
fn match_scores_accumulate_per_reason() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(1));

    let matches = h
        .duplicates
        .find_duplicates(&DuplicateQuery {
            phone: Some("0821234567".to_string()),
            email: Some("THANDI@example.com".to_string()),
            first_name: Some("Thandi".to_string()),
            last_name: Some("Nkosi".to_string()),
            ..DuplicateQuery::default()
        })
        .expect("search runs");

    // Phone 50 + email 40 + exact name 30.
    assert_eq!(matches[0].score, 120);
}

#[test]
fn first_name_only_scores_the_weaker_match() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(1));

    let matches = h
        .duplicates
        .find_duplicates(&DuplicateQuery {
            phone: Some("0821234567".to_string()),
            first_name: Some("Thandi".to_string()),
            last_name: Some("Dlamini".to_string()),
            ..DuplicateQuery::default()
        })
        .expect("search runs");

    assert!(matches[0].reasons.contains(&MatchReason::FirstNameMatches));
    assert_eq!(matches[0].score, 60);
}

#[test]
fn create_check_flags_only_above_the_threshold() {
    let h = harness();
    seed_pipeline(&h);
    let mut existing = lead(1);
    existing.phone = None;
    existing.whatsapp_number = None;
    h.store.insert_lead(existing);

    // Email alone scores 40, exactly at the threshold.
    let (flagged, best) = h
        .duplicates
        .check_duplicate_on_create("0115550000", Some("thandi@example.com"))
        .expect("check runs");
    assert!(flagged);
    assert_eq!(best.expect("match returned").lead.id, LeadId(1));

    let (flagged, best) = h
        .duplicates
        .check_duplicate_on_create("0115550000", Some("nobody@example.com"))
        .expect("check runs");
    assert!(!flagged);
    assert!(best.is_none());
}

#[test]
fn search_excludes_the_requesting_lead() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(1));

    let matches = h
        .duplicates
        .find_duplicates(&DuplicateQuery {
            phone: Some("0821234567".to_string()),
            exclude: Some(LeadId(1)),
            ..DuplicateQuery::default()
        })
        .expect("search runs");
    assert!(matches.is_empty());
}

#[test]
fn merge_backfills_reparents_and_marks_the_duplicate() {
    let h = harness();
    seed_pipeline(&h);

    let mut primary = lead(1);
    primary.email = None;
    primary.school_name = None;
    primary.notes = Some("original note".to_string());
    h.store.insert_lead(primary);

    let mut dup = lead(2);
    dup.email = Some("thandi.home@example.com".to_string());
    dup.school_name = Some("Northcliff High".to_string());
    dup.notes = Some("spoke to parent".to_string());
    h.store.insert_lead(dup);
    h.store
        .append_activity(
            ActivityDraft::manual(LeadId(2), ActivityKind::Call, "first call".to_string(), None),
            epoch(),
            AppendMode::Normal,
        )
        .expect("append succeeds");
    h.store.add_document(DocumentRecord {
        lead: LeadId(2),
        name: "ID copy".to_string(),
        accepted: true,
    });

    let report = h
        .duplicates
        .merge(LeadId(1), &[LeadId(2)], None)
        .expect("merge succeeds");

    assert_eq!(report.merged, vec![LeadId(2)]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.activities_moved, 1);
    assert_eq!(report.documents_moved, 1);

    let primary = h.store.lead(LeadId(1)).expect("lookup").expect("present");
    assert_eq!(primary.email.as_deref(), Some("thandi.home@example.com"));
    assert_eq!(primary.school_name.as_deref(), Some("Northcliff High"));
    let notes = primary.notes.expect("notes present");
    assert!(notes.contains("original note"));
    assert!(notes.contains("[Merged from duplicate #2]"));
    assert!(notes.contains("spoke to parent"));

    let activities = h.store.activities_for(LeadId(1)).expect("activities");
    assert!(activities
        .iter()
        .any(|a| a.description == "[From merged lead #2] first call"));
    assert!(activities
        .iter()
        .any(|a| a.kind == ActivityKind::Note && a.description.contains("Merged duplicate lead #2")));

    let documents = h.store.documents_for(LeadId(1)).expect("documents");
    assert_eq!(documents.len(), 1);

    let dup = h.store.lead(LeadId(2)).expect("lookup").expect("present");
    assert_eq!(dup.status, LeadStatus::Merged);
    assert_eq!(dup.merged_into, Some(LeadId(1)));
    assert_eq!(dup.merged_at, Some(epoch()));
    assert!(!dup.nurture_active);
}

#[test]
fn merge_never_overwrites_populated_primary_fields() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(1));
    let mut dup = lead(2);
    dup.email = Some("other@example.com".to_string());
    h.store.insert_lead(dup);

    h.duplicates
        .merge(LeadId(1), &[LeadId(2)], None)
        .expect("merge succeeds");

    let primary = h.store.lead(LeadId(1)).expect("lookup").expect("present");
    assert_eq!(primary.email.as_deref(), Some("thandi@example.com"));
}

#[test]
fn merge_skips_the_primary_and_already_merged_leads() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(1));
    h.store.insert_lead(lead(2));
    let mut gone = lead(3);
    gone.status = LeadStatus::Merged;
    gone.merged_into = Some(LeadId(1));
    h.store.insert_lead(gone);

    let report = h
        .duplicates
        .merge(LeadId(1), &[LeadId(1), LeadId(2), LeadId(2), LeadId(3), LeadId(404)], None)
        .expect("merge succeeds despite skips");

    assert_eq!(report.merged, vec![LeadId(2)]);
    assert_eq!(report.skipped.len(), 3);
    assert!(report.skipped.iter().any(|(id, _)| *id == LeadId(1)));
    assert!(report.skipped.iter().any(|(id, _)| *id == LeadId(3)));
    assert!(report.skipped.iter().any(|(id, _)| *id == LeadId(404)));
}

#[test]
fn merge_into_a_merged_primary_is_rejected() {
    let h = harness();
    seed_pipeline(&h);
    let mut primary = lead(1);
    primary.status = LeadStatus::Merged;
    primary.merged_into = Some(LeadId(9));
    h.store.insert_lead(primary);
    h.store.insert_lead(lead(2));

    let err = h
        .duplicates
        .merge(LeadId(1), &[LeadId(2)], None)
        .expect_err("merged primary rejected");
    assert!(matches!(err, MergeError::PrimaryAlreadyMerged(LeadId(1))));
}

#[test]
fn merge_conflicts_when_a_participant_is_locked() {
    let h = harness();
    seed_pipeline(&h);
    h.store.insert_lead(lead(1));
    h.store.insert_lead(lead(2));

    let _guard = h.store.lock_lead(LeadId(2)).expect("lock acquired");
    let err = h
        .duplicates
        .merge(LeadId(1), &[LeadId(2)], None)
        .expect_err("locked participant rejected");
    assert!(matches!(err, MergeError::Conflict(LeadId(2))));
}

#[test]
fn scan_groups_by_shared_contact_details() {
    let h = harness();
    seed_pipeline(&h);

    // Two leads sharing a phone suffix through different formats.
    let mut a = lead(1);
    a.phone = Some("+27831112222".to_string());
    a.email = None;
    a.whatsapp_number = None;
    h.store.insert_lead(a);
    let mut b = lead(2);
    b.phone = Some("0831112222".to_string());
    b.email = None;
    b.whatsapp_number = None;
    h.store.insert_lead(b);

    // Three leads sharing an email, one of them terminal.
    for (id, status) in [(3, LeadStatus::New), (4, LeadStatus::New), (5, LeadStatus::Lost)] {
        let mut l = lead(id);
        l.phone = Some(format!("07200000{id:02}"));
        l.whatsapp_number = None;
        l.email = Some("shared@example.com".to_string());
        l.status = status;
        h.store.insert_lead(l);
    }

    let groups = h.duplicates.scan_for_duplicate_groups(10).expect("scan runs");

    assert_eq!(groups.len(), 2);
    let email_group = groups
        .iter()
        .find(|g| g.match_value == "shared@example.com")
        .expect("email group found");
    // The Lost lead is excluded from the scan entirely.
    assert_eq!(email_group.leads.len(), 2);

    let phone_group = groups
        .iter()
        .find(|g| g.match_value == "831112222")
        .expect("phone group found");
    assert_eq!(phone_group.leads, vec![LeadId(1), LeadId(2)]);
}

#[test]
fn scan_does_not_report_the_same_lead_twice() {
    let h = harness();
    seed_pipeline(&h);

    // Same pair shares both phone and email; only one group may appear.
    for id in [1, 2] {
        let mut l = lead(id);
        l.phone = Some("0845556666".to_string());
        l.whatsapp_number = None;
        l.email = Some("pair@example.com".to_string());
        h.store.insert_lead(l);
    }

    let groups = h.duplicates.scan_for_duplicate_groups(10).expect("scan runs");
    assert_eq!(groups.len(), 1);
}
