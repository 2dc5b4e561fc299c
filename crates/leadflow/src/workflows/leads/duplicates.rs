use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{ActivityDraft, ActivityKind, AgentId, Lead, LeadId, LeadStatus};
use super::repository::{AppendMode, Clock, LeadStore, StoreError};

/// Tuning for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateConfig {
    /// Leading country code canonicalized to a local leading zero.
    pub country_code: String,
    /// Minimum match score for `check_duplicate_on_create` to flag.
    pub match_threshold: u32,
    /// Maximum candidates returned per search.
    pub candidate_limit: usize,
    /// Working-set cap for the bulk duplicate scan.
    pub scan_cap: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            country_code: "27".to_string(),
            match_threshold: 40,
            candidate_limit: 10,
            scan_cap: 5000,
        }
    }
}

/// Reason a candidate matched, with its additive weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    PhoneMatches,
    EmailMatches,
    NameMatches,
    FirstNameMatches,
}

impl MatchReason {
    pub const fn weight(self) -> u32 {
        match self {
            Self::PhoneMatches => 50,
            Self::EmailMatches => 40,
            Self::NameMatches => 30,
            Self::FirstNameMatches => 10,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::PhoneMatches => "Phone number matches",
            Self::EmailMatches => "Email matches",
            Self::NameMatches => "Name matches exactly",
            Self::FirstNameMatches => "First name matches",
        }
    }
}

/// One candidate duplicate with its match evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub lead: Lead,
    pub reasons: Vec<MatchReason>,
    pub score: u32,
}

/// Search input for duplicate detection.
#[derive(Debug, Clone, Default)]
pub struct DuplicateQuery {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub exclude: Option<LeadId>,
}

/// Group of leads sharing a normalized phone suffix or email, found by
/// the offline scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub kind: GroupKind,
    pub match_value: String,
    pub leads: Vec<LeadId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Phone,
    Email,
}

/// Result of a merge batch. Skipped entries carry the per-item warning
/// instead of failing the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub primary: LeadId,
    pub merged: Vec<LeadId>,
    pub skipped: Vec<(LeadId, String)>,
    pub activities_moved: usize,
    pub documents_moved: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("primary lead {0} not found")]
    UnknownPrimary(LeadId),
    #[error("primary lead {0} was itself merged into another lead")]
    PrimaryAlreadyMerged(LeadId),
    #[error("lead {0} is locked by a concurrent operation; retry the merge")]
    Conflict(LeadId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for MergeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Contended(lead) => Self::Conflict(lead),
            other => Self::Store(other),
        }
    }
}

/// Strips everything but digits and canonicalizes a leading country
/// code to the local leading zero.
pub fn normalize_phone(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > country_code.len() && digits.starts_with(country_code) {
        format!("0{}", &digits[country_code.len()..])
    } else {
        digits
    }
}

/// Last nine digits of a normalized number; the comparison key for
/// phone matching. `None` when the number is empty.
fn phone_suffix(raw: &str, country_code: &str) -> Option<String> {
    let normalized = normalize_phone(raw, country_code);
    if normalized.is_empty() {
        return None;
    }
    let start = normalized.len().saturating_sub(9);
    Some(normalized[start..].to_string())
}

/// Finds and merges lead records that represent the same real-world
/// contact.
pub struct DuplicateEngine<S> {
    store: Arc<S>,
    config: DuplicateConfig,
    clock: Arc<dyn Clock>,
}

impl<S: LeadStore> DuplicateEngine<S> {
    pub fn new(store: Arc<S>, config: DuplicateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Candidate duplicates for the given contact details, sorted by
    /// descending match score. Requires at least a phone or an email.
    pub fn find_duplicates(&self, query: &DuplicateQuery) -> Result<Vec<DuplicateMatch>, StoreError> {
        let query_suffix = query
            .phone
            .as_deref()
            .and_then(|p| phone_suffix(p, &self.config.country_code));
        let query_email = query.email.as_deref().map(str::to_ascii_lowercase);

        if query_suffix.is_none() && query_email.is_none() {
            return Ok(Vec::new());
        }

        let country = self.config.country_code.clone();
        let suffix = query_suffix.clone();
        let email = query_email.clone();
        let exclude = query.exclude;
        let candidates = self.store.leads_where(&move |lead: &Lead| {
            if exclude == Some(lead.id) {
                return false;
            }
            let phone_hit = suffix.as_deref().is_some_and(|wanted| {
                lead_suffixes(lead, &country)
                    .iter()
                    .any(|have| have == wanted)
            });
            let email_hit = email.as_deref().is_some_and(|wanted| {
                lead.email
                    .as_deref()
                    .is_some_and(|have| have.eq_ignore_ascii_case(wanted))
            });
            phone_hit || email_hit
        })?;

        let mut matches: Vec<DuplicateMatch> = candidates
            .into_iter()
            .map(|lead| {
                let mut reasons = Vec::new();

                if let Some(wanted) = query_suffix.as_deref() {
                    if lead_suffixes(&lead, &self.config.country_code)
                        .iter()
                        .any(|have| have == wanted)
                    {
                        reasons.push(MatchReason::PhoneMatches);
                    }
                }
                if let Some(wanted) = query_email.as_deref() {
                    if lead
                        .email
                        .as_deref()
                        .is_some_and(|have| have.eq_ignore_ascii_case(wanted))
                    {
                        reasons.push(MatchReason::EmailMatches);
                    }
                }
                if let (Some(first), Some(last)) =
                    (query.first_name.as_deref(), query.last_name.as_deref())
                {
                    if first.eq_ignore_ascii_case(&lead.first_name)
                        && last.eq_ignore_ascii_case(&lead.last_name)
                    {
                        reasons.push(MatchReason::NameMatches);
                    } else if first.eq_ignore_ascii_case(&lead.first_name) {
                        reasons.push(MatchReason::FirstNameMatches);
                    }
                }

                let score = reasons.iter().map(|r| r.weight()).sum();
                DuplicateMatch {
                    lead,
                    reasons,
                    score,
                }
            })
            .collect();

        matches.sort_by(|a, b| b.score.cmp(&a.score));
        matches.truncate(self.config.candidate_limit);
        Ok(matches)
    }

    /// Quick check at lead creation: whether a strong-enough match
    /// exists, and the best one if so.
    pub fn check_duplicate_on_create(
        &self,
        phone: &str,
        email: Option<&str>,
    ) -> Result<(bool, Option<DuplicateMatch>), StoreError> {
        let matches = self.find_duplicates(&DuplicateQuery {
            phone: Some(phone.to_string()),
            email: email.map(str::to_string),
            ..DuplicateQuery::default()
        })?;

        match matches.into_iter().next() {
            Some(best) if best.score >= self.config.match_threshold => Ok((true, Some(best))),
            _ => Ok((false, None)),
        }
    }

    /// Merges duplicates into a primary lead: back-fills blank fields,
    /// re-parents activities and documents, and marks each duplicate
    /// with the terminal merged status and a back-reference. Duplicates
    /// are never deleted. Per-item conflicts (the primary itself, an
    /// already-merged lead) are skipped with a warning; the batch
    /// continues.
    pub fn merge(
        &self,
        primary_id: LeadId,
        duplicate_ids: &[LeadId],
        actor: Option<AgentId>,
    ) -> Result<MergeReport, MergeError> {
        // Lock in ascending id order to avoid deadlock between
        // overlapping merges.
        let mut lock_order: Vec<LeadId> = duplicate_ids
            .iter()
            .copied()
            .chain(std::iter::once(primary_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        lock_order.sort();
        let mut guards = Vec::with_capacity(lock_order.len());
        for id in &lock_order {
            guards.push(self.store.lock_lead(*id)?);
        }

        let mut primary = self
            .store
            .lead(primary_id)?
            .ok_or(MergeError::UnknownPrimary(primary_id))?;
        if primary.status == LeadStatus::Merged || primary.merged_into.is_some() {
            return Err(MergeError::PrimaryAlreadyMerged(primary_id));
        }

        let now = self.clock.now();
        let mut report = MergeReport {
            primary: primary_id,
            merged: Vec::new(),
            skipped: Vec::new(),
            activities_moved: 0,
            documents_moved: 0,
        };

        // Validate the whole batch before any write so a rejected item
        // cannot leave the batch half-applied.
        let mut to_merge = Vec::new();
        let mut seen = HashSet::new();
        for id in duplicate_ids {
            if !seen.insert(*id) {
                continue;
            }
            if *id == primary_id {
                report
                    .skipped
                    .push((*id, "duplicate id refers to the primary itself".to_string()));
                continue;
            }
            match self.store.lead(*id)? {
                None => report.skipped.push((*id, "lead not found".to_string())),
                Some(dup) if dup.status == LeadStatus::Merged || dup.merged_into.is_some() => {
                    report
                        .skipped
                        .push((*id, "lead was already merged".to_string()));
                }
                Some(dup) => to_merge.push(dup),
            }
        }
        for (id, reason) in &report.skipped {
            warn!(lead = %id, reason, "duplicate skipped during merge");
        }

        for mut dup in to_merge {
            backfill_profile(&mut primary, &dup);

            if let Some(dup_notes) = &dup.notes {
                let marker = format!("[Merged from duplicate {}]: {dup_notes}", dup.id);
                primary.notes = Some(match &primary.notes {
                    Some(existing) if !existing.is_empty() => {
                        format!("{existing}\n---\n{marker}")
                    }
                    _ => marker,
                });
            }

            report.activities_moved += self.store.reparent_activities(
                dup.id,
                primary.id,
                &format!("[From merged lead {}] ", dup.id),
            )?;
            report.documents_moved += self.store.reparent_documents(dup.id, primary.id)?;

            self.store.append_activity(
                ActivityDraft {
                    lead: primary.id,
                    kind: ActivityKind::Note,
                    description: format!(
                        "Merged duplicate lead {} ({}) into this lead",
                        dup.id,
                        dup.full_name()
                    ),
                    actor,
                    automated: actor.is_none(),
                    automation_source: actor.is_none().then_some("duplicates"),
                    from_stage: None,
                    to_stage: None,
                },
                now,
                AppendMode::Normal,
            )?;

            dup.status = LeadStatus::Merged;
            dup.merged_into = Some(primary.id);
            dup.merged_at = Some(now);
            dup.nurture_active = false;
            dup.updated_at = now;
            self.store.update_lead(&dup)?;

            report.merged.push(dup.id);
        }

        primary.updated_at = now;
        self.store.update_lead(&primary)?;

        info!(
            primary = %primary.id,
            merged = report.merged.len(),
            skipped = report.skipped.len(),
            "duplicate merge completed"
        );
        Ok(report)
    }

    /// Buckets the active lead population by normalized phone suffix
    /// and by email, returning groups of two or more for manual
    /// review. Non-transactional; intended for periodic offline runs.
    pub fn scan_for_duplicate_groups(&self, limit: usize) -> Result<Vec<DuplicateGroup>, StoreError> {
        let mut leads = self
            .store
            .leads_where(&|lead: &Lead| !lead.status.is_terminal())?;
        leads.truncate(self.config.scan_cap);

        let mut phone_groups: BTreeMap<String, Vec<LeadId>> = BTreeMap::new();
        let mut email_groups: BTreeMap<String, Vec<LeadId>> = BTreeMap::new();

        for lead in &leads {
            if let Some(suffix) = lead
                .phone
                .as_deref()
                .and_then(|p| phone_suffix(p, &self.config.country_code))
            {
                phone_groups.entry(suffix).or_default().push(lead.id);
            }
            if let Some(email) = lead.email.as_deref().filter(|e| !e.is_empty()) {
                email_groups
                    .entry(email.to_ascii_lowercase())
                    .or_default()
                    .push(lead.id);
            }
        }

        let mut groups = Vec::new();
        let mut seen: HashSet<LeadId> = HashSet::new();

        for (kind, buckets) in [
            (GroupKind::Phone, phone_groups),
            (GroupKind::Email, email_groups),
        ] {
            for (value, members) in buckets {
                if members.len() < 2 || members.iter().any(|id| seen.contains(id)) {
                    continue;
                }
                seen.extend(members.iter().copied());
                groups.push(DuplicateGroup {
                    kind,
                    match_value: value,
                    leads: members,
                });
            }
        }

        groups.sort_by(|a, b| b.leads.len().cmp(&a.leads.len()));
        groups.truncate(limit);
        Ok(groups)
    }
}

/// All comparable phone suffixes a lead carries.
fn lead_suffixes(lead: &Lead, country_code: &str) -> Vec<String> {
    [&lead.phone, &lead.phone_secondary, &lead.whatsapp_number]
        .into_iter()
        .flatten()
        .filter_map(|number| phone_suffix(number, country_code))
        .collect()
}

/// Fills blank fields on the primary from the duplicate.
fn backfill_profile(primary: &mut Lead, dup: &Lead) {
    fn fill(target: &mut Option<String>, source: &Option<String>) {
        if target.as_deref().map_or(true, str::is_empty) {
            if let Some(value) = source.as_deref().filter(|v| !v.is_empty()) {
                *target = Some(value.to_string());
            }
        }
    }

    fill(&mut primary.email, &dup.email);
    fill(&mut primary.phone_secondary, &dup.phone_secondary);
    fill(&mut primary.whatsapp_number, &dup.whatsapp_number);
    fill(&mut primary.parent_name, &dup.parent_name);
    fill(&mut primary.parent_phone, &dup.parent_phone);
    fill(&mut primary.parent_email, &dup.parent_email);
    fill(&mut primary.school_name, &dup.school_name);
    fill(&mut primary.qualification_interest, &dup.qualification_interest);
}
