//! Process-wide store of locally submitted, not yet mined transactions.

use alloy::primitives::{Address, TxHash};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chain::ChainId;
use crate::observability::metrics;
use crate::transaction::TransactionDraft;

/// A broadcast transaction we have not seen mined yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTx {
    pub hash: TxHash,
    pub nonce: u64,
    pub draft: TransactionDraft,
    /// Seconds since epoch.
    pub submitted_at: u64,
}

type PendingKey = (Address, ChainId);

/// Pending transactions keyed by (sender, chain), then nonce.
///
/// Several submissions may share a nonce (speed-up, cancel); the latest one is last.
#[derive(Debug, Clone, Default)]
pub struct PendingTxStore {
    inner: Arc<DashMap<PendingKey, BTreeMap<u64, Vec<PendingTx>>>>,
    persistence_path: Option<String>,
}

impl PendingTxStore {
    /// Create a new empty store.
    pub fn new(persistence_path: Option<String>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
        }
    }

    /// Load from file if it exists.
    pub fn load_from_file(path: &str) -> std::io::Result<Self> {
        let store = Self::new(Some(path.to_string()));
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            let txs: Vec<PendingTx> = serde_json::from_reader(reader)?;
            for tx in txs {
                store.insert(tx);
            }
            metrics::record_pending_store_size(store.count());
            tracing::info!(pending = store.count(), "Loaded pending transactions from file");
        }
        Ok(store)
    }

    /// Save to file.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        if let Some(path) = &self.persistence_path {
            let txs: Vec<PendingTx> = self
                .inner
                .iter()
                .flat_map(|entry| entry.value().values().flatten().cloned().collect::<Vec<_>>())
                .collect();

            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer(writer, &txs)?;
            tracing::debug!(pending = txs.len(), "Saved pending transactions to file");
        }
        Ok(())
    }

    fn insert(&self, tx: PendingTx) {
        self.inner
            .entry((tx.draft.from, tx.draft.chain_id))
            .or_default()
            .entry(tx.nonce)
            .or_default()
            .push(tx);
    }

    /// Track a broadcast. Drafts without a nonce cannot be tracked and are skipped.
    pub fn record_submission(&self, hash: TxHash, draft: &TransactionDraft) -> bool {
        let Some(nonce) = draft.nonce else {
            tracing::warn!(tx_hash = %hash, "Submitted transaction has no nonce, not tracking it");
            return false;
        };

        let submitted_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.insert(PendingTx {
            hash,
            nonce,
            draft: draft.clone(),
            submitted_at,
        });
        metrics::record_pending_store_size(self.count());

        if let Err(e) = self.save_to_file() {
            tracing::warn!(error = %e, "Failed to persist pending transactions");
        }
        true
    }

    /// Next nonce after the highest pending one.
    pub fn pending_nonce(&self, address: Address, chain: ChainId) -> Option<u64> {
        self.inner
            .get(&(address, chain))
            .and_then(|entry| entry.value().keys().next_back().map(|n| n + 1))
    }

    /// Every submission sharing `nonce`, oldest first.
    pub fn pending_txs_by_nonce(&self, address: Address, chain: ChainId, nonce: u64) -> Vec<PendingTx> {
        self.inner
            .get(&(address, chain))
            .and_then(|entry| entry.value().get(&nonce).cloned())
            .unwrap_or_default()
    }

    /// Latest submission per nonce from `start_nonce` upward, in nonce order.
    pub fn pending_txs_from(&self, address: Address, chain: ChainId, start_nonce: u64) -> Vec<TransactionDraft> {
        self.inner
            .get(&(address, chain))
            .map(|entry| {
                entry
                    .value()
                    .range(start_nonce..)
                    .filter_map(|(_, txs)| txs.last().map(|tx| tx.draft.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget everything below the on-chain nonce. Returns how many entries went away.
    pub fn mark_confirmed(&self, address: Address, chain: ChainId, on_chain_nonce: u64) -> usize {
        let mut removed = 0;
        if let Some(mut entry) = self.inner.get_mut(&(address, chain)) {
            let keep = entry.split_off(&on_chain_nonce);
            removed = entry.values().map(Vec::len).sum();
            *entry = keep;
        }
        self.inner.remove_if(&(address, chain), |_, txs| txs.is_empty());

        if removed > 0 {
            metrics::record_pending_store_size(self.count());
            tracing::debug!(%address, chain_id = %chain, removed, "Dropped confirmed pending transactions");
        }
        removed
    }

    /// Count tracked submissions.
    pub fn count(&self) -> usize {
        self.inner
            .iter()
            .map(|entry| entry.value().values().map(Vec::len).sum::<usize>())
            .sum()
    }
}
