//! Signer ordering per signing mode.

use crate::error::{Error, Result};
use crate::model::{Signature, SignatureStatus, SigningMode, SigningSession};

/// Turn and completion rules of a signing mode.
pub trait OrderingStrategy: Send + Sync {
    /// Refuse a signature that may not be applied yet.
    fn check_turn(&self, session: &SigningSession, signature: &Signature) -> Result<()>;

    /// The step to record as current after a change to `signatures`.
    fn next_step(&self, session: &SigningSession, _signatures: &[&Signature]) -> u32 {
        session.current_step_order
    }

    /// Whether every required slot has been signed.
    fn is_complete(&self, signatures: &[&Signature]) -> bool {
        signatures
            .iter()
            .filter(|s| s.is_required)
            .all(|s| s.status == SignatureStatus::Signed)
    }
}

/// Strict step order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialOrdering;

impl OrderingStrategy for SequentialOrdering {
    fn check_turn(&self, session: &SigningSession, signature: &Signature) -> Result<()> {
        if signature.step_order != session.current_step_order {
            return Err(Error::OutOfTurn {
                step: signature.step_order,
                current: session.current_step_order,
            });
        }
        Ok(())
    }

    /// Lowest pending step, so gaps left by rejected or optional slots are
    /// skipped.
    fn next_step(&self, session: &SigningSession, signatures: &[&Signature]) -> u32 {
        signatures
            .iter()
            .filter(|s| s.status == SignatureStatus::Pending)
            .map(|s| s.step_order)
            .min()
            .unwrap_or(session.current_step_order)
    }
}

/// Any order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelOrdering;

impl OrderingStrategy for ParallelOrdering {
    fn check_turn(&self, _session: &SigningSession, _signature: &Signature) -> Result<()> {
        Ok(())
    }
}

/// Sequential groups of parallel signers. Groups are not modeled yet, so
/// every signer is in one group.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridOrdering;

impl OrderingStrategy for HybridOrdering {
    fn check_turn(&self, _session: &SigningSession, _signature: &Signature) -> Result<()> {
        Ok(())
    }
}

/// Strategy for `mode`.
pub fn strategy_for(mode: SigningMode) -> &'static dyn OrderingStrategy {
    match mode {
        SigningMode::Sequential => &SequentialOrdering,
        SigningMode::Parallel => &ParallelOrdering,
        SigningMode::Hybrid => &HybridOrdering,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn session(mode: SigningMode, current: u32) -> SigningSession {
        SigningSession {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            title: "t".to_string(),
            mode,
            status: SessionStatus::InProgress,
            created_by: "owner".to_string(),
            current_step_order: current,
            signature_ids: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn slot(step: u32, status: SignatureStatus, required: bool) -> Signature {
        Signature {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            document_id: Uuid::nil(),
            user_id: format!("user{}", step),
            certificate_id: None,
            role: "signer".to_string(),
            step_order: step,
            is_required: required,
            status,
            signature_file_path: None,
            signed_digest: None,
            result_hash: None,
            signed_at: None,
            ip_address: None,
            user_agent: None,
            rejection_reason: None,
        }
    }

    #[test]
    fn test_sequential_turns() {
        let s = session(SigningMode::Sequential, 1);
        let strategy = strategy_for(SigningMode::Sequential);
        assert!(strategy.check_turn(&s, &slot(1, SignatureStatus::Pending, true)).is_ok());
        let err = strategy
            .check_turn(&s, &slot(2, SignatureStatus::Pending, true))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfTurn { step: 2, current: 1 }));
    }

    #[test]
    fn test_sequential_next_step_skips_gaps() {
        let s = session(SigningMode::Sequential, 1);
        let a = slot(1, SignatureStatus::Signed, true);
        let b = slot(2, SignatureStatus::Rejected, false);
        let c = slot(4, SignatureStatus::Pending, true);
        assert_eq!(SequentialOrdering.next_step(&s, &[&a, &b, &c]), 4);
        assert_eq!(SequentialOrdering.next_step(&s, &[&a]), 1);
    }

    #[test]
    fn test_parallel_and_hybrid_accept_any_order() {
        for mode in [SigningMode::Parallel, SigningMode::Hybrid] {
            let s = session(mode, 1);
            assert!(strategy_for(mode)
                .check_turn(&s, &slot(3, SignatureStatus::Pending, true))
                .is_ok());
        }
    }

    #[test]
    fn test_completion_ignores_optional_slots() {
        let a = slot(1, SignatureStatus::Signed, true);
        let b = slot(2, SignatureStatus::Pending, false);
        let c = slot(3, SignatureStatus::Pending, true);
        assert!(ParallelOrdering.is_complete(&[&a, &b]));
        assert!(!ParallelOrdering.is_complete(&[&a, &b, &c]));
    }
}
