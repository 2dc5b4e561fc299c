use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{Activity, ActivityKind, DocumentRecord, Lead, LeadId, LeadStatus, QuoteRecord};
use super::repository::{Clock, LeadStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("lead {0} not found")]
    UnknownLead(LeadId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fixed weight table for the additive engagement score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub call: i32,
    pub email: i32,
    pub whatsapp: i32,
    pub meeting: i32,
    pub note: i32,
    pub quote_sent: i32,
    pub quote_viewed: i32,
    pub document_submitted: i32,
    pub status_change: i32,
    pub default_activity: i32,

    pub recency_7_days: f64,
    pub recency_14_days: f64,
    pub recency_30_days: f64,
    pub recency_older: f64,

    pub has_email: i32,
    pub has_whatsapp: i32,
    pub has_qualification_interest: i32,
    pub has_quote: i32,
    pub per_viewed_quote: i32,
    pub has_documents: i32,
    pub per_document: i32,

    pub no_response_7_days: i32,
    pub no_response_14_days: i32,
    pub unsubscribed: i32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            call: 10,
            email: 5,
            whatsapp: 8,
            meeting: 15,
            note: 2,
            quote_sent: 10,
            quote_viewed: 20,
            document_submitted: 15,
            status_change: 5,
            default_activity: 2,
            recency_7_days: 1.5,
            recency_14_days: 1.2,
            recency_30_days: 1.0,
            recency_older: 0.5,
            has_email: 5,
            has_whatsapp: 8,
            has_qualification_interest: 10,
            has_quote: 15,
            per_viewed_quote: 20,
            has_documents: 10,
            per_document: 5,
            no_response_7_days: -10,
            no_response_14_days: -20,
            unsubscribed: -50,
        }
    }
}

impl ScoreWeights {
    fn activity_base(&self, kind: ActivityKind) -> i32 {
        match kind {
            ActivityKind::Call => self.call,
            ActivityKind::Email => self.email,
            ActivityKind::WhatsApp => self.whatsapp,
            ActivityKind::Meeting => self.meeting,
            ActivityKind::Note => self.note,
            ActivityKind::QuoteSent => self.quote_sent,
            ActivityKind::QuoteViewed => self.quote_viewed,
            ActivityKind::DocumentSubmitted => self.document_submitted,
            ActivityKind::StatusChange => self.status_change,
            _ => self.default_activity,
        }
    }

    fn recency_multiplier(&self, age_days: i64) -> f64 {
        if age_days <= 7 {
            self.recency_7_days
        } else if age_days <= 14 {
            self.recency_14_days
        } else if age_days <= 30 {
            self.recency_30_days
        } else {
            self.recency_older
        }
    }

    fn status_modifier(&self, status: LeadStatus) -> f64 {
        match status {
            LeadStatus::New => 0.8,
            LeadStatus::Contacted => 1.0,
            LeadStatus::Qualified => 1.2,
            LeadStatus::Proposal => 1.3,
            LeadStatus::Negotiation => 1.4,
            _ => 1.0,
        }
    }
}

/// Qualitative bucket for a final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Hot,
    Warm,
    Cool,
    Cold,
}

impl EngagementLevel {
    pub fn for_score(score: u8) -> Self {
        if score >= 80 {
            Self::Hot
        } else if score >= 60 {
            Self::Warm
        } else if score >= 40 {
            Self::Cool
        } else {
            Self::Cold
        }
    }
}

/// Every intermediate value of a scoring pass, for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub profile: i32,
    pub activity: i32,
    pub quotes: i32,
    pub documents: i32,
    pub raw: i32,
    pub status_modifier: f64,
    pub modified: i32,
    pub negative: i32,
    pub final_score: u8,
    pub level: EngagementLevel,
}

/// Everything the pure scoring function reads.
#[derive(Debug, Clone)]
pub struct ScoringInputs<'a> {
    pub lead: &'a Lead,
    pub activities: &'a [Activity],
    pub quotes: &'a [QuoteRecord],
    pub documents: &'a [DocumentRecord],
}

/// Computes the bounded engagement score from inputs and a fixed
/// `now`. Deterministic: repeated calls with unchanged inputs return
/// the same breakdown.
pub fn score_inputs(
    inputs: &ScoringInputs<'_>,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let lead = inputs.lead;

    let mut profile = 0;
    if lead.email.as_deref().is_some_and(|e| !e.is_empty()) {
        profile += weights.has_email;
    }
    if lead
        .whatsapp_number
        .as_deref()
        .is_some_and(|n| !n.is_empty())
    {
        profile += weights.has_whatsapp;
    }
    if lead.qualification_interest.is_some() {
        profile += weights.has_qualification_interest;
    }

    let mut activity = 0;
    for record in inputs.activities {
        let base = weights.activity_base(record.kind);
        let age_days = (now - record.created_at).num_days();
        activity += (f64::from(base) * weights.recency_multiplier(age_days)) as i32;
    }

    let mut quotes = 0;
    if !inputs.quotes.is_empty() {
        quotes += weights.has_quote;
        let viewed = inputs.quotes.iter().filter(|q| q.viewed_at.is_some()).count();
        quotes += viewed as i32 * weights.per_viewed_quote;
    }

    let mut documents = 0;
    let accepted = inputs.documents.iter().filter(|d| d.accepted).count();
    if accepted > 0 {
        documents += weights.has_documents;
        documents += accepted as i32 * weights.per_document;
    }

    let raw = profile + activity + quotes + documents;
    let status_modifier = weights.status_modifier(lead.status);
    let modified = (f64::from(raw) * status_modifier) as i32;

    let negative = negative_adjustment(inputs, weights, now);

    let final_score = (modified + negative).clamp(0, 100) as u8;

    ScoreBreakdown {
        profile,
        activity,
        quotes,
        documents,
        raw,
        status_modifier,
        modified,
        negative,
        final_score,
        level: EngagementLevel::for_score(final_score),
    }
}

/// Unsubscribed leads take the flat penalty and nothing else; everyone
/// else is penalized for silence past 7 and 14 days, measured from the
/// latest contact-type activity or, absent any, the creation date.
fn negative_adjustment(
    inputs: &ScoringInputs<'_>,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> i32 {
    if inputs.lead.unsubscribed {
        return weights.unsubscribed;
    }

    let last_contact = inputs
        .activities
        .iter()
        .filter(|a| a.kind.is_contact())
        .map(|a| a.created_at)
        .max();

    let reference = last_contact.unwrap_or(inputs.lead.created_at);
    let days_silent = (now - reference).num_days();
    if days_silent > 14 {
        weights.no_response_14_days
    } else if days_silent > 7 {
        weights.no_response_7_days
    } else {
        0
    }
}

/// Computes and persists engagement scores by reading a lead's history
/// from the store.
pub struct ScoringEngine<S> {
    store: Arc<S>,
    weights: ScoreWeights,
    clock: Arc<dyn Clock>,
}

impl<S: LeadStore> ScoringEngine<S> {
    pub fn new(store: Arc<S>, weights: ScoreWeights, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            weights,
            clock,
        }
    }

    pub fn score(&self, lead_id: LeadId) -> Result<u8, ScoreError> {
        Ok(self.breakdown(lead_id)?.final_score)
    }

    /// Full component breakdown for a lead.
    pub fn breakdown(&self, lead_id: LeadId) -> Result<ScoreBreakdown, ScoreError> {
        let lead = self
            .store
            .lead(lead_id)?
            .ok_or(ScoreError::UnknownLead(lead_id))?;
        let activities = self.store.activities_for(lead_id)?;
        let quotes = self.store.quotes_for(lead_id)?;
        let documents = self.store.documents_for(lead_id)?;

        Ok(score_inputs(
            &ScoringInputs {
                lead: &lead,
                activities: &activities,
                quotes: &quotes,
                documents: &documents,
            },
            &self.weights,
            self.clock.now(),
        ))
    }

    /// Recomputes a lead's score and persists it only when it changed.
    /// Returns the new score and whether a write happened.
    pub fn update_score(&self, lead_id: LeadId) -> Result<(u8, bool), ScoreError> {
        let mut lead = self
            .store
            .lead(lead_id)?
            .ok_or(ScoreError::UnknownLead(lead_id))?;
        let activities = self.store.activities_for(lead_id)?;
        let quotes = self.store.quotes_for(lead_id)?;
        let documents = self.store.documents_for(lead_id)?;

        let breakdown = score_inputs(
            &ScoringInputs {
                lead: &lead,
                activities: &activities,
                quotes: &quotes,
                documents: &documents,
            },
            &self.weights,
            self.clock.now(),
        );

        if lead.engagement_score == Some(breakdown.final_score) {
            return Ok((breakdown.final_score, false));
        }

        debug!(
            lead = %lead.id,
            old = ?lead.engagement_score,
            new = breakdown.final_score,
            "engagement score updated"
        );
        lead.engagement_score = Some(breakdown.final_score);
        lead.updated_at = self.clock.now();
        self.store.update_lead(&lead)?;
        Ok((breakdown.final_score, true))
    }
}
