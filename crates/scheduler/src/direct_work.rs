//! Peer-to-peer direct-work handoff: offer, accept, result, audit.
//!
//! A coordinator (or agent acting through one) can offer a specific subtask
//! to a specific peer outside the shared queue. Every transition lands in an
//! audit trail served at `/agent-mesh/direct-work/audit`.

use edgecoder_types::error::ScheduleError;
use edgecoder_types::task::{Subtask, SubtaskResult};
use edgecoder_types::time::now_ms;
use edgecoder_types::PeerId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Lifecycle of a direct-work offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferState {
    Offered,
    Accepted,
    Completed,
    Expired,
}

/// One direct handoff of a subtask to a named peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectWorkOffer {
    pub offer_id: String,
    pub subtask: Subtask,
    pub offered_by: PeerId,
    pub offered_to: PeerId,
    pub state: OfferState,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

/// One audit row; the trail is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectWorkAuditEntry {
    pub offer_id: String,
    pub transition: OfferState,
    pub actor_id: PeerId,
    pub at_ms: u64,
}

#[derive(Default)]
struct Book {
    offers: HashMap<String, DirectWorkOffer>,
    audit: Vec<DirectWorkAuditEntry>,
}

/// The direct-work offer book.
pub struct DirectWorkBook {
    inner: Mutex<Book>,
}

impl DirectWorkBook {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Book::default()),
        }
    }

    /// Record a new offer. The offer expires with the subtask's timeout.
    pub fn offer(&self, subtask: Subtask, offered_by: &str, offered_to: &str) -> DirectWorkOffer {
        let now = now_ms();
        let offer = DirectWorkOffer {
            offer_id: uuid::Uuid::new_v4().to_string(),
            expires_at_ms: now.saturating_add(subtask.timeout_ms),
            subtask,
            offered_by: offered_by.to_string(),
            offered_to: offered_to.to_string(),
            state: OfferState::Offered,
            created_at_ms: now,
        };
        let mut book = self.inner.lock();
        book.audit.push(DirectWorkAuditEntry {
            offer_id: offer.offer_id.clone(),
            transition: OfferState::Offered,
            actor_id: offered_by.to_string(),
            at_ms: now,
        });
        book.offers.insert(offer.offer_id.clone(), offer.clone());
        debug!(target: "scheduler", offer = %offer.offer_id, to = %offer.offered_to, "direct work offered");
        offer
    }

    /// The offered peer accepts. Only the addressee may accept, and only
    /// while the offer is open.
    pub fn accept(&self, offer_id: &str, peer_id: &str) -> Result<DirectWorkOffer, ScheduleError> {
        let mut book = self.inner.lock();
        let offer = book
            .offers
            .get_mut(offer_id)
            .ok_or_else(|| ScheduleError::NotFound(offer_id.to_string()))?;
        if offer.offered_to != peer_id {
            return Err(ScheduleError::NoEligibleAgent(
                "offer addressed to another peer".into(),
            ));
        }
        let now = now_ms();
        if offer.state != OfferState::Offered || now > offer.expires_at_ms {
            offer.state = OfferState::Expired;
            return Err(ScheduleError::NotFound(offer_id.to_string()));
        }
        offer.state = OfferState::Accepted;
        let snapshot = offer.clone();
        book.audit.push(DirectWorkAuditEntry {
            offer_id: offer_id.to_string(),
            transition: OfferState::Accepted,
            actor_id: peer_id.to_string(),
            at_ms: now,
        });
        Ok(snapshot)
    }

    /// The accepting peer reports the result, closing the offer.
    pub fn result(
        &self,
        offer_id: &str,
        result: SubtaskResult,
    ) -> Result<DirectWorkOffer, ScheduleError> {
        let mut book = self.inner.lock();
        let offer = book
            .offers
            .get_mut(offer_id)
            .ok_or_else(|| ScheduleError::NotFound(offer_id.to_string()))?;
        if offer.state != OfferState::Accepted {
            return Err(ScheduleError::NotFound(offer_id.to_string()));
        }
        if offer.offered_to != result.agent_id {
            return Err(ScheduleError::NoEligibleAgent(
                "result from non-accepting peer".into(),
            ));
        }
        offer.state = OfferState::Completed;
        let snapshot = offer.clone();
        book.audit.push(DirectWorkAuditEntry {
            offer_id: offer_id.to_string(),
            transition: OfferState::Completed,
            actor_id: result.agent_id,
            at_ms: now_ms(),
        });
        Ok(snapshot)
    }

    pub fn get(&self, offer_id: &str) -> Option<DirectWorkOffer> {
        self.inner.lock().offers.get(offer_id).cloned()
    }

    /// The full audit trail, oldest first.
    pub fn audit(&self) -> Vec<DirectWorkAuditEntry> {
        self.inner.lock().audit.clone()
    }
}

impl Default for DirectWorkBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecoder_types::task::{ProjectMeta, ResourceClass, SubtaskKind};

    fn subtask() -> Subtask {
        Subtask {
            id: "s-1".into(),
            task_id: "t-1".into(),
            kind: SubtaskKind::MicroLoop,
            language: "rust".into(),
            input: "fn main() {}".into(),
            timeout_ms: 60_000,
            snapshot_ref: None,
            project_meta: ProjectMeta {
                project_id: "p".into(),
                tenant_id: None,
                resource_class: ResourceClass::Cpu,
                priority: 0,
            },
            required_model: None,
        }
    }

    fn result_for(agent: &str) -> SubtaskResult {
        SubtaskResult {
            subtask_id: "s-1".into(),
            task_id: "t-1".into(),
            agent_id: agent.into(),
            ok: true,
            output: "done".into(),
            error: None,
            duration_ms: 900,
            report_nonce: None,
            report_signature: None,
        }
    }

    #[test]
    fn offer_accept_result_flow() {
        let book = DirectWorkBook::new();
        let offer = book.offer(subtask(), "coord-1", "agent-1");
        book.accept(&offer.offer_id, "agent-1").unwrap();
        let closed = book.result(&offer.offer_id, result_for("agent-1")).unwrap();
        assert_eq!(closed.state, OfferState::Completed);

        let trail: Vec<OfferState> = book.audit().into_iter().map(|e| e.transition).collect();
        assert_eq!(
            trail,
            vec![OfferState::Offered, OfferState::Accepted, OfferState::Completed]
        );
    }

    #[test]
    fn only_addressee_can_accept() {
        let book = DirectWorkBook::new();
        let offer = book.offer(subtask(), "coord-1", "agent-1");
        assert!(book.accept(&offer.offer_id, "agent-2").is_err());
        book.accept(&offer.offer_id, "agent-1").unwrap();
    }

    #[test]
    fn result_requires_acceptance() {
        let book = DirectWorkBook::new();
        let offer = book.offer(subtask(), "coord-1", "agent-1");
        assert!(book.result(&offer.offer_id, result_for("agent-1")).is_err());
    }

    #[test]
    fn double_accept_rejected() {
        let book = DirectWorkBook::new();
        let offer = book.offer(subtask(), "coord-1", "agent-1");
        book.accept(&offer.offer_id, "agent-1").unwrap();
        assert!(book.accept(&offer.offer_id, "agent-1").is_err());
    }
}
