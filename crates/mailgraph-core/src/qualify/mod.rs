/// Qualification engine - two-stage decision on whether a message merits
/// attachment processing
///
/// Stage 1 is the free keyword gate; Stage 2 is the LLM adjudicator, called
/// through the extractor router so the usual caps and breaker apply. The
/// outcome is written to the message exactly once.
pub mod keywords;

use crate::constants::{
    QUALIFY_BODY_SCAN_BYTES, QUALIFY_KEYWORD_CONFIDENCE, QUALIFY_LLM_BODY_BYTES,
};
use crate::error::MailgraphError;
use crate::extract::ExtractorRouter;
use crate::models::{Message, QualificationOutcome, QualificationStage};
use crate::qualify::keywords::{keyword_gate, GateDecision};
use crate::store::GraphStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Largest prefix of `s` that fits in `max` bytes on a char boundary
fn byte_prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub struct QualificationEngine {
    store: GraphStore,
    router: Arc<ExtractorRouter>,
}

impl QualificationEngine {
    pub fn new(store: GraphStore, router: Arc<ExtractorRouter>) -> Self {
        Self { store, router }
    }

    /// Decides and records qualification for a message. Re-qualifying an
    /// already-decided message returns the recorded outcome unchanged.
    pub async fn qualify(&self, message: &Message) -> Result<QualificationOutcome, MailgraphError> {
        if let (Some(qualified), Some(stage)) = (message.is_qualified, message.qualification_stage)
        {
            debug!(message_id = %message.id, "Message already qualified");
            return Ok(QualificationOutcome {
                qualified,
                stage,
                confidence: message.qualification_confidence.unwrap_or(0.0),
                reason: message.qualification_reason.clone().unwrap_or_default(),
            });
        }

        let body = message.body_text.as_deref().unwrap_or("");
        let gate_prefix = byte_prefix(body, QUALIFY_BODY_SCAN_BYTES);

        let outcome = match keyword_gate(&message.subject, gate_prefix) {
            GateDecision::Qualified { token, in_subject } => QualificationOutcome {
                qualified: true,
                stage: if in_subject {
                    QualificationStage::Subject
                } else {
                    QualificationStage::Body
                },
                confidence: QUALIFY_KEYWORD_CONFIDENCE,
                reason: format!("keyword:{}", token),
            },
            GateDecision::Rejected { token, in_subject } => QualificationOutcome {
                qualified: false,
                stage: if in_subject {
                    QualificationStage::Subject
                } else {
                    QualificationStage::Body
                },
                confidence: QUALIFY_KEYWORD_CONFIDENCE,
                reason: format!("spam:{}", token),
            },
            GateDecision::Inconclusive => {
                let llm_prefix = byte_prefix(body, QUALIFY_LLM_BODY_BYTES);
                let (qualified, confidence, reason) = self
                    .router
                    .adjudicate_qualification(&message.user_id, &message.subject, llm_prefix)
                    .await?;
                QualificationOutcome {
                    qualified,
                    stage: QualificationStage::Llm,
                    confidence,
                    reason,
                }
            }
        };

        let written = self.store.record_qualification(&message.id, &outcome).await?;
        if written {
            info!(
                message_id = %message.id,
                qualified = outcome.qualified,
                stage = outcome.stage.as_str(),
                reason = %outcome.reason,
                "Message qualified"
            );
        }

        Ok(outcome)
    }
}
