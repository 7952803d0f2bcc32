//! Human-in-the-loop review gate.
//!
//! On entry the gate snapshots everything a reviewer needs, opens exactly one
//! ticket and records an urgency score. On resume it turns a validated
//! decision into a ticket resolution, a decision record and a ledger note.

use casegate_types::config::ReviewConfig;
use casegate_types::ledger::{Confidence, LedgerAction};
use casegate_types::run::{
    DecisionRecord, PayloadFragment, PayloadNamespace, ReviewOutput, RunPayload,
};
use casegate_types::subject::FacilityProfile;
use casegate_types::ticket::{DecisionStatus, Ticket, TicketResolution};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use super::stage::{LedgerNote, Stage, StageContext, StageError, StageKind, StageOutput};

/// Errors raised by the review gate.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// The run already has an open ticket; carries that ticket.
    #[error("run {} already has open ticket {}", .0.run_id, .0.id)]
    AlreadyPending(Box<Ticket>),

    #[error("ticket {0} is not open")]
    TicketClosed(Uuid),
}

/// Everything `resume` needs to persist for one decision.
#[derive(Debug, Clone)]
pub struct ResolvedDecision {
    pub resolution: TicketResolution,
    pub record: DecisionRecord,
    pub note: LedgerNote,
}

/// Urgency score in 1..=10 from demand charge and operating hours.
///
/// Each $2,000/month of demand charge and each 2,000 operating hours per
/// year add one point.
pub fn urgency_score(profile: &FacilityProfile) -> u8 {
    let demand = profile.monthly_demand_charge.unwrap_or(0.0).max(0.0);
    let hours = profile.annual_operating_hours.unwrap_or(0.0).max(0.0);
    let raw = (demand / 2000.0 + hours / 2000.0).round();
    raw.clamp(1.0, 10.0) as u8
}

/// The review gate stage.
#[derive(Debug, Clone, Default)]
pub struct ReviewGate {
    config: ReviewConfig,
}

impl ReviewGate {
    pub const NAME: &'static str = "review_gate";

    pub fn new(config: ReviewConfig) -> Self {
        Self { config }
    }

    /// The context a reviewer sees on the ticket.
    pub fn snapshot(&self, ctx: &StageContext) -> serde_json::Value {
        let RunPayload {
            profile,
            qualification,
            analyses,
            ..
        } = &ctx.payload;
        json!({
            "subject_id": ctx.subject_id,
            "profile": profile,
            "qualification": qualification,
            "analyses": analyses,
            "revision_count": ctx.revision_count,
            "feedback": ctx.feedback,
        })
    }

    /// Review fragment pointing at a ticket that is already open.
    pub fn reuse(&self, ctx: &StageContext, ticket: &Ticket) -> ReviewOutput {
        ReviewOutput {
            ticket_id: ticket.id,
            urgency_score: urgency_score(&ctx.payload.profile.clone().unwrap_or_default()),
            opened_at: ticket.created_at,
        }
    }

    /// Turn a decision into its ticket resolution, decision record and
    /// ledger note.
    pub fn resolve(
        &self,
        ticket: &Ticket,
        decision: DecisionStatus,
        feedback_text: Option<String>,
        reviewer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedDecision, ReviewError> {
        if !ticket.is_open() {
            return Err(ReviewError::TicketClosed(ticket.id));
        }

        let resolution = TicketResolution {
            decision,
            notes: feedback_text.clone(),
            reviewer_id: reviewer_id.to_string(),
            resolved_at: now,
        };
        let record = DecisionRecord {
            status: decision,
            reviewer_id: reviewer_id.to_string(),
            feedback_text: feedback_text.clone(),
            ticket_id: ticket.id,
            decided_at: now,
        };
        let note = LedgerNote {
            action: LedgerAction::ReviewDecision,
            input_summary: format!("ticket {}", ticket.id),
            output: json!({
                "decision": decision,
                "feedback_text": feedback_text,
            }),
            confidence: Confidence::High,
            rationale: feedback_text
                .clone()
                .unwrap_or_else(|| format!("reviewer decision: {decision}")),
        };

        Ok(ResolvedDecision {
            resolution,
            record,
            note,
        })
    }
}

impl Stage for ReviewGate {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::ReviewGate
    }

    fn namespace(&self) -> PayloadNamespace {
        PayloadNamespace::Review
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        if let Some(existing) = ctx.open_tickets.first() {
            return Err(ReviewError::AlreadyPending(Box::new(existing.clone())).into());
        }

        let now = Utc::now();
        let profile = ctx.payload.profile.clone().unwrap_or_default();
        let urgency = urgency_score(&profile);
        let ticket = Ticket::open(
            Uuid::now_v7(),
            ctx.run_id,
            self.config.render_question(&ctx.subject_id),
            self.snapshot(ctx),
            DecisionStatus::ALL.to_vec(),
            now,
        );

        let review = ReviewOutput {
            ticket_id: ticket.id,
            urgency_score: urgency,
            opened_at: now,
        };
        let note = LedgerNote {
            action: LedgerAction::ReviewRequested,
            input_summary: format!(
                "{} analyses, revision {}",
                ctx.payload.analyses.len(),
                ctx.revision_count
            ),
            output: json!({
                "ticket_id": ticket.id,
                "urgency_score": urgency,
            }),
            confidence: Confidence::High,
            rationale: "human approval required before a proposal is issued".to_string(),
        };

        Ok(StageOutput {
            fragment: PayloadFragment::Review(review),
            notes: vec![note],
            ticket: Some(ticket),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegate_types::ledger::Confidence;
    use casegate_types::run::AnalysisOutput;
    use casegate_types::ticket::TicketStatus;

    fn profile(hours: f64, demand: f64) -> FacilityProfile {
        FacilityProfile {
            annual_operating_hours: Some(hours),
            monthly_demand_charge: Some(demand),
            facility_power_load: Some(500.0),
            ..Default::default()
        }
    }

    fn ctx() -> StageContext {
        let mut payload = RunPayload {
            profile: Some(profile(5800.0, 8000.0)),
            ..Default::default()
        };
        for name in ["energy_load", "battery_sizing"] {
            payload.analyses.insert(
                name.to_string(),
                AnalysisOutput {
                    data: json!({"status": "complete"}),
                    confidence: Confidence::Medium,
                    rationale: "stub".to_string(),
                    completed_at: Utc::now(),
                },
            );
        }
        StageContext {
            run_id: Uuid::now_v7(),
            subject_id: "FAC-001".to_string(),
            revision_count: 0,
            payload,
            feedback: None,
            open_tickets: Vec::new(),
        }
    }

    #[test]
    fn test_urgency_score_bounds() {
        assert_eq!(urgency_score(&profile(5800.0, 8000.0)), 7);
        assert_eq!(urgency_score(&FacilityProfile::default()), 1);
        assert_eq!(urgency_score(&profile(100_000.0, 100_000.0)), 10);
    }

    #[tokio::test]
    async fn test_gate_opens_ticket_with_all_analyses() {
        let gate = ReviewGate::default();
        let context = ctx();
        let out = gate.execute(&context).await.unwrap();

        let ticket = out.ticket.expect("gate must open a ticket");
        assert_eq!(ticket.run_id, context.run_id);
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.options, DecisionStatus::ALL.to_vec());
        assert_eq!(ticket.question, "Approve the draft proposal for FAC-001?");
        assert!(ticket.context["analyses"].get("energy_load").is_some());
        assert!(ticket.context["analyses"].get("battery_sizing").is_some());

        let PayloadFragment::Review(review) = out.fragment else {
            panic!("expected review fragment");
        };
        assert_eq!(review.ticket_id, ticket.id);
        assert_eq!(review.urgency_score, 7);
        assert_eq!(out.notes[0].action, LedgerAction::ReviewRequested);
    }

    #[tokio::test]
    async fn test_gate_refuses_second_ticket() {
        let gate = ReviewGate::default();
        let mut context = ctx();
        let first = gate.execute(&context).await.unwrap().ticket.unwrap();
        context.open_tickets.push(first.clone());

        let err = gate.execute(&context).await.unwrap_err();
        match err {
            StageError::Review(ReviewError::AlreadyPending(existing)) => {
                assert_eq!(existing.id, first.id)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_builds_record_and_note() {
        let gate = ReviewGate::default();
        let ticket = gate.execute(&ctx()).await.unwrap().ticket.unwrap();

        let resolved = gate
            .resolve(
                &ticket,
                DecisionStatus::RevisionRequested,
                Some("recheck load".to_string()),
                "r1",
                Utc::now(),
            )
            .unwrap();
        assert_eq!(resolved.resolution.decision, DecisionStatus::RevisionRequested);
        assert_eq!(resolved.record.ticket_id, ticket.id);
        assert_eq!(resolved.record.feedback_text.as_deref(), Some("recheck load"));
        assert_eq!(resolved.note.action, LedgerAction::ReviewDecision);
        assert_eq!(resolved.note.rationale, "recheck load");
    }
}
