//! BEEF (Background Evaluation Extended Format) accumulator.
//!
//! A [`Beef`] bundles transactions with enough ancestry (and, where known, a
//! merkle path) to let a recipient verify a subject transaction without a
//! separate round trip to a chain service. The Wallet façade keeps one
//! long-lived accumulator ("BeefParty" in the original source) per wallet
//! and merges into it after every `create_action` / `sign_action` /
//! `internalize_action`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::hash::{sha256d, Txid};

/// Maximum ancestor recursion depth when walking parent transactions (
/// malformed/cyclic `source_txid` chains must not cause unbounded recursion).
pub const MAX_ANCESTOR_DEPTH: usize = 4;

/// One node in a BUMP (binary merkle path) proof: the sibling hash needed at
/// a given level, keyed by its offset within that level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathElement {
    pub offset: u64,
    pub hash: [u8; 32],
}

/// A merkle path proving one leaf txid is included in the block at
/// `block_height`. `leaf_offset` locates the subject txid in level 0;
/// `levels` holds the sibling hash needed at each level above it, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    pub block_height: u32,
    pub leaf_offset: u64,
    pub levels: Vec<PathElement>,
}

impl MerklePath {
    /// Recomputes the merkle root by successively combining `txid` with each
    /// level's sibling hash. Returns `None` only if `levels` is malformed
    /// relative to a level's expected sibling offset (never happens for a
    /// path this crate produced; defends against a corrupted remote payload).
    pub fn compute_root(&self, txid: &Txid) -> [u8; 32] {
        let mut current = txid.0;
        let mut offset = self.leaf_offset;
        for level in &self.levels {
            let mut buf = [0u8; 64];
            if offset % 2 == 0 {
                buf[..32].copy_from_slice(&current);
                buf[32..].copy_from_slice(&level.hash);
            } else {
                buf[..32].copy_from_slice(&level.hash);
                buf[32..].copy_from_slice(&current);
            }
            current = sha256d(&buf);
            offset /= 2;
        }
        current
    }

    /// Serializes to the wire bytes a chain-services provider hands back
    /// from `get_merkle_path_for_transaction` and a ProvenTx row stores in
    /// its `merkle_path` column.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("MerklePath serializes")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        serde_json::from_slice(bytes).map_err(|e| WalletError::runtime(format!("malformed merkle path: {e}")))
    }
}

/// What the accumulator knows about one txid in the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeefEntry {
    /// Only the txid is known; the caller asserted the recipient already has
    /// the bytes (`knownTxids`). Must be resolved before an atomic BEEF is
    /// emitted to anyone who did not make that assertion.
    TxidOnly,
    /// Full raw transaction bytes, optionally with a merkle path proving
    /// inclusion.
    RawTx {
        raw_tx: Vec<u8>,
        merkle_path: Option<MerklePath>,
    },
}

impl BeefEntry {
    /// Fuller records outrank thinner ones: `RawTx` with a merkle path beats
    /// `RawTx` without one, which beats `TxidOnly`.
    fn rank(&self) -> u8 {
        match self {
            Self::TxidOnly => 0,
            Self::RawTx { merkle_path: None, .. } => 1,
            Self::RawTx {
                merkle_path: Some(_),
                ..
            } => 2,
        }
    }

    fn fragment_hash(&self) -> [u8; 32] {
        match self {
            Self::TxidOnly => [0u8; 32],
            Self::RawTx { raw_tx, .. } => sha256d(raw_tx),
        }
    }

    fn prevout_txids(&self) -> Vec<Txid> {
        match self {
            Self::TxidOnly => Vec::new(),
            Self::RawTx { raw_tx, .. } => {
                use bitcoin::consensus::Decodable;
                match bitcoin::Transaction::consensus_decode(&mut raw_tx.as_slice()) {
                    Ok(tx) => tx
                        .input
                        .iter()
                        .map(|i| Txid(i.previous_output.txid.to_byte_array()))
                        .collect(),
                    Err(_) => Vec::new(),
                }
            }
        }
    }
}

/// A bundle of transactions plus known ancestry, keyed by txid. Ordering is
/// by txid byte value, which makes serialization deterministic and merge
/// trivially commutative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Beef {
    entries: BTreeMap<Txid, BeefEntry>,
}

impl Beef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Txid) -> Option<&BeefEntry> {
        self.entries.get(txid)
    }

    pub fn insert_raw_tx(&mut self, txid: Txid, raw_tx: Vec<u8>, merkle_path: Option<MerklePath>) {
        self.upsert(txid, BeefEntry::RawTx { raw_tx, merkle_path });
    }

    pub fn insert_txid_only(&mut self, txid: Txid) {
        self.entries.entry(txid).or_insert(BeefEntry::TxidOnly);
    }

    fn upsert(&mut self, txid: Txid, entry: BeefEntry) {
        match self.entries.get(&txid) {
            Some(existing) if existing.rank() >= entry.rank() => {}
            _ => {
                self.entries.insert(txid, entry);
            }
        }
    }

    /// Merges `other` into `self`. Commutative for distinct txids; for a
    /// shared txid the fuller record wins.
    pub fn merge(&mut self, other: &Beef) {
        for (txid, entry) in &other.entries {
            self.upsert(*txid, entry.clone());
        }
    }

    /// Resolves every `TxidOnly` placeholder not present in `known_txids`
    /// against `source`. Returns a hard error naming the first txid that
    /// cannot be resolved either way.
    pub fn resolve_against(
        &mut self,
        source: &Beef,
        known_txids: &HashSet<Txid>,
    ) -> Result<(), WalletError> {
        let placeholders: Vec<Txid> = self
            .entries
            .iter()
            .filter(|(txid, entry)| matches!(entry, BeefEntry::TxidOnly) && !known_txids.contains(*txid))
            .map(|(txid, _)| *txid)
            .collect();
        for txid in placeholders {
            match source.entries.get(&txid) {
                Some(fuller @ BeefEntry::RawTx { .. }) => {
                    self.entries.insert(txid, fuller.clone());
                }
                _ => {
                    return Err(WalletError::runtime(format!(
                        "unresolved txid-only placeholder in BEEF: {txid}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Builds a fresh bundle containing `subject` and its ancestry up to
    /// [`MAX_ANCESTOR_DEPTH`], skipping any txid present in `known_txids`
    /// and deduplicating identical fragments.
    pub fn build_atomic(&self, subject: Txid, known_txids: &HashSet<Txid>) -> Result<Beef, WalletError> {
        let mut out = Beef::new();
        let mut seen_fragments: HashSet<[u8; 32]> = HashSet::new();
        let mut frontier = vec![(subject, 0usize)];
        let mut visited = HashSet::new();

        while let Some((txid, depth)) = frontier.pop() {
            if !visited.insert(txid) {
                continue;
            }
            if known_txids.contains(&txid) && txid != subject {
                out.insert_txid_only(txid);
                continue;
            }
            let entry = self.entries.get(&txid).ok_or_else(|| {
                WalletError::runtime(format!("BEEF accumulator missing ancestor {txid}"))
            })?;
            let fragment_hash = entry.fragment_hash();
            if seen_fragments.insert(fragment_hash) {
                out.upsert(txid, entry.clone());
            }
            if depth < MAX_ANCESTOR_DEPTH {
                for parent in entry.prevout_txids() {
                    frontier.push((parent, depth + 1));
                }
            }
        }
        Ok(out)
    }

    pub fn txids(&self) -> impl Iterator<Item = &Txid> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_raw_tx(marker: u8) -> Vec<u8> {
        // Minimal well-formed transaction: version, 0 inputs, 0 outputs, locktime.
        // Real transactions always have >= 1 input, but consensus_decode only
        // cares about the encoding, not consensus validity, which is fine for
        // exercising prevout extraction on inputs we add below.
        vec![1, 0, 0, 0, marker, 0, 0, 0, 0, 0, 0, 0]
    }

    #[test]
    fn merge_is_commutative_for_distinct_txids() {
        let mut a = Beef::new();
        let mut b = Beef::new();
        let t1 = Txid([1u8; 32]);
        let t2 = Txid([2u8; 32]);
        a.insert_raw_tx(t1, dummy_raw_tx(1), None);
        b.insert_raw_tx(t2, dummy_raw_tx(2), None);

        let mut merged_ab = a.clone();
        merged_ab.merge(&b);
        let mut merged_ba = b.clone();
        merged_ba.merge(&a);

        assert_eq!(merged_ab.txids().collect::<Vec<_>>().len(), 2);
        assert!(merged_ab.contains(&t1) && merged_ab.contains(&t2));
        assert!(merged_ba.contains(&t1) && merged_ba.contains(&t2));
    }

    #[test]
    fn fuller_record_wins_on_merge() {
        let txid = Txid([3u8; 32]);
        let mut thin = Beef::new();
        thin.insert_txid_only(txid);

        let mut fat = Beef::new();
        fat.insert_raw_tx(txid, dummy_raw_tx(9), None);

        thin.merge(&fat);
        assert!(matches!(thin.get(&txid), Some(BeefEntry::RawTx { .. })));
    }

    #[test]
    fn resolve_against_fails_hard_when_unresolvable() {
        let txid = Txid([4u8; 32]);
        let mut bundle = Beef::new();
        bundle.insert_txid_only(txid);
        let source = Beef::new();
        let known = HashSet::new();
        assert!(bundle.resolve_against(&source, &known).is_err());
    }

    #[test]
    fn resolve_against_succeeds_when_known() {
        let txid = Txid([5u8; 32]);
        let mut bundle = Beef::new();
        bundle.insert_txid_only(txid);
        let source = Beef::new();
        let mut known = HashSet::new();
        known.insert(txid);
        assert!(bundle.resolve_against(&source, &known).is_ok());
    }

    #[test]
    fn merkle_path_recomputes_root() {
        let leaf = Txid([7u8; 32]);
        let sibling = [8u8; 32];
        let path = MerklePath {
            block_height: 100,
            leaf_offset: 0,
            levels: vec![PathElement { offset: 1, hash: sibling }],
        };
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&leaf.0);
        buf[32..].copy_from_slice(&sibling);
        let expected = sha256d(&buf);
        assert_eq!(path.compute_root(&leaf), expected);
    }

    proptest::proptest! {
        #[test]
        fn merge_is_commutative_for_arbitrary_disjoint_fragments(
            a_markers in proptest::collection::hash_set(proptest::prelude::any::<u8>(), 0..8),
            b_markers in proptest::collection::hash_set(100u8..200, 0..8),
        ) {
            let mut a = Beef::new();
            for m in &a_markers {
                a.insert_raw_tx(Txid([*m; 32]), dummy_raw_tx(*m), None);
            }
            let mut b = Beef::new();
            for m in &b_markers {
                b.insert_raw_tx(Txid([*m; 32]), dummy_raw_tx(*m), None);
            }

            let mut merged_ab = a.clone();
            merged_ab.merge(&b);
            let mut merged_ba = b.clone();
            merged_ba.merge(&a);

            let ab_txids: std::collections::HashSet<_> = merged_ab.txids().collect();
            let ba_txids: std::collections::HashSet<_> = merged_ba.txids().collect();
            proptest::prop_assert_eq!(ab_txids, ba_txids);
        }
    }
}
