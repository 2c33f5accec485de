//! Validator gateway: request-tracked front door for external scorers
//!
//! Bridges an external scoring authority (an AI evaluator in practice) to
//! the registry's validate operation. The gateway queues one pending
//! request per discovery and only allow-listed validators may fulfill it.
//! Fulfillment is one-shot: the request is destroyed on success.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// A queued validation request awaiting external scoring.
/// At most one exists per discovery id at any time. There is no timeout
/// or cancellation: a request persists until fulfilled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub discovery_id: u64,
    pub discoverer: String,
    pub content_hash: [u8; 32],
    pub fractal_hash: [u8; 32],
    pub requested_at: u64,
}

/// Pending-request queue plus the validator allow-list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidatorGateway {
    /// Mapping: discovery_id -> pending request
    pending: HashMap<u64, ValidationRequest>,

    /// Addresses permitted to finalize validation through the gateway
    validators: HashSet<String>,
}

impl ValidatorGateway {
    /// Queue a request. Existence of the discovery itself is checked by
    /// the registry before this is called.
    pub fn enqueue(&mut self, request: ValidationRequest) -> Result<(), LedgerError> {
        let id = request.discovery_id;
        if self.pending.contains_key(&id) {
            return Err(LedgerError::PendingRequestExists(id));
        }
        self.pending.insert(id, request);
        Ok(())
    }

    /// Remove and return the pending request for a discovery (one-shot).
    /// Only called after the forwarded validation succeeded.
    pub fn take(&mut self, discovery_id: u64) -> Option<ValidationRequest> {
        self.pending.remove(&discovery_id)
    }

    pub fn pending_request(&self, discovery_id: u64) -> Option<&ValidationRequest> {
        self.pending.get(&discovery_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_validator(&self, address: &str) -> bool {
        self.validators.contains(address)
    }

    pub fn authorize(&mut self, address: &str) {
        self.validators.insert(address.to_string());
    }

    pub fn revoke(&mut self, address: &str) {
        self.validators.remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64) -> ValidationRequest {
        ValidationRequest {
            discovery_id: id,
            discoverer: "alice".to_string(),
            content_hash: [1u8; 32],
            fractal_hash: [2u8; 32],
            requested_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_one_pending_request_per_discovery() {
        let mut gw = ValidatorGateway::default();
        gw.enqueue(request(7)).unwrap();
        assert_eq!(
            gw.enqueue(request(7)),
            Err(LedgerError::PendingRequestExists(7))
        );
        // A different discovery queues fine
        gw.enqueue(request(8)).unwrap();
        assert_eq!(gw.pending_count(), 2);
    }

    #[test]
    fn test_fulfillment_is_one_shot() {
        let mut gw = ValidatorGateway::default();
        gw.enqueue(request(7)).unwrap();
        assert!(gw.take(7).is_some());
        assert!(gw.take(7).is_none());
        // Once fulfilled, a new request may be queued again
        gw.enqueue(request(7)).unwrap();
    }

    #[test]
    fn test_allow_list() {
        let mut gw = ValidatorGateway::default();
        assert!(!gw.is_validator("evaluator"));
        gw.authorize("evaluator");
        assert!(gw.is_validator("evaluator"));
        gw.revoke("evaluator");
        assert!(!gw.is_validator("evaluator"));
    }
}
