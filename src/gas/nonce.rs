//! Nonce recommendation.

use crate::transaction::TransactionDraft;

/// `max(on_chain, local_pending)`; the on-chain value wins ties and fills gaps.
pub fn merge_nonce(on_chain: u64, local_pending: Option<u64>) -> u64 {
    match local_pending {
        Some(local) if local > on_chain => local,
        _ => on_chain,
    }
}

/// Drafts without a nonce get `recommended + position in batch`.
pub fn assign_batch_nonces(drafts: &[TransactionDraft], recommended: u64) -> Vec<TransactionDraft> {
    drafts
        .iter()
        .enumerate()
        .map(|(i, draft)| match draft.nonce {
            Some(_) => draft.clone(),
            None => draft.with_nonce(recommended + i as u64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use alloy::primitives::Address;

    #[test]
    fn test_merge_prefers_higher() {
        assert_eq!(merge_nonce(5, None), 5);
        assert_eq!(merge_nonce(5, Some(3)), 5);
        assert_eq!(merge_nonce(5, Some(5)), 5);
        assert_eq!(merge_nonce(5, Some(8)), 8);
    }

    #[test]
    fn test_merge_is_idempotent_and_monotonic() {
        let once = merge_nonce(4, Some(6));
        assert_eq!(merge_nonce(once, Some(6)), once);
        for on_chain in 0..10 {
            assert!(merge_nonce(on_chain + 1, Some(6)) >= merge_nonce(on_chain, Some(6)));
        }
    }

    #[test]
    fn test_batch_assignment_keeps_explicit_nonces() {
        let base = TransactionDraft::new(ChainId(1), Address::ZERO, None);
        let drafts = vec![base.clone(), base.with_nonce(99), base];

        let assigned = assign_batch_nonces(&drafts, 10);
        let nonces: Vec<_> = assigned.iter().map(|d| d.nonce).collect();
        assert_eq!(nonces, vec![Some(10), Some(99), Some(12)]);
    }
}
