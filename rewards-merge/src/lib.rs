//! Balance-Update Merger: from one fetched block, assemble the totally
//! ordered stream of "effective" balance updates that the reconstruction
//! orchestrator replays, applying the protocol's two ordering quirks
//! (burn reordering, unstake-deposit elision).

use rewards_chain::{Block, BalanceUpdate};
use rewards_core::Address;
use serde::{Deserialize, Serialize};

/// Where an `EffectiveUpdate` originated within the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSource {
    TransactionMetadata,
    Delegation,
    TransactionResult,
    TransactionInternalResult,
    BlockMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveUpdate {
    pub address: Address,
    /// `None` for delegation updates, which carry no balance delta.
    pub amount: Option<rewards_core::Z>,
    pub operation_hash: Option<String>,
    pub tx_index: Option<i64>,
    pub internal_index: Option<i64>,
    pub source: UpdateSource,
    pub kind: String,
    pub category: String,
    /// The new delegate, set only when `source == Delegation`.
    pub delegate: Option<Address>,
}

impl EffectiveUpdate {
    fn from_balance_update(
        u: &BalanceUpdate,
        source: UpdateSource,
        operation_hash: Option<String>,
        tx_index: Option<i64>,
        internal_index: Option<i64>,
    ) -> Self {
        Self {
            address: u.address.clone(),
            amount: Some(u.amount.clone()),
            operation_hash,
            tx_index,
            internal_index,
            source,
            kind: u.kind.clone(),
            category: u.category.clone(),
            delegate: None,
        }
    }

    fn delegation(
        address: Address,
        delegate: Address,
        operation_hash: Option<String>,
        tx_index: Option<i64>,
        internal_index: Option<i64>,
    ) -> Self {
        Self {
            address,
            amount: None,
            operation_hash,
            tx_index,
            internal_index,
            source: UpdateSource::Delegation,
            kind: "delegation".to_string(),
            category: String::new(),
            delegate: Some(delegate),
        }
    }

    pub fn is_delegation(&self) -> bool {
        self.source == UpdateSource::Delegation
    }
}

/// Assembles the canonical `EffectiveUpdate` stream for a block. Pure
/// over the block's contents — lazily fetching a delegation source that
/// isn't yet in the in-memory state is the orchestrator's job (it owns
/// the `ChainAccess` handle BUM intentionally does not depend on).
pub fn assemble(block: &Block) -> Vec<EffectiveUpdate> {
    let mut out = Vec::new();

    for batch in &block.operations {
        for operation in batch {
            let op_hash = Some(operation.hash.clone());

            for (tx_index, content) in operation.contents.iter().enumerate() {
                for u in &content.meta_balance_updates {
                    out.push(EffectiveUpdate::from_balance_update(
                        u,
                        UpdateSource::TransactionMetadata,
                        op_hash.clone(),
                        Some(tx_index as i64),
                        None,
                    ));
                }
            }

            for (tx_index, content) in operation.contents.iter().enumerate() {
                if content.is_delegation {
                    if let (Some(source), Some(target)) =
                        (&content.delegation_source, &content.delegation_target)
                    {
                        out.push(EffectiveUpdate::delegation(
                            source.clone(),
                            target.clone(),
                            op_hash.clone(),
                            Some(tx_index as i64),
                            None,
                        ));
                    }
                    continue;
                }

                let result_updates = reorder_burns(&content.result.balance_updates);
                for u in &result_updates {
                    out.push(EffectiveUpdate::from_balance_update(
                        u,
                        UpdateSource::TransactionResult,
                        op_hash.clone(),
                        Some(tx_index as i64),
                        None,
                    ));
                }

                for (internal_index, internal) in content.internal_results.iter().enumerate() {
                    if internal.is_delegation {
                        if let (Some(source), Some(target)) =
                            (&internal.delegation_source, &internal.delegation_target)
                        {
                            out.push(EffectiveUpdate::delegation(
                                source.clone(),
                                target.clone(),
                                op_hash.clone(),
                                Some(tx_index as i64),
                                Some(internal_index as i64),
                            ));
                        }
                        continue;
                    }

                    let internal_updates = reorder_burns(&internal.result.balance_updates);
                    for u in &internal_updates {
                        out.push(EffectiveUpdate::from_balance_update(
                            u,
                            UpdateSource::TransactionInternalResult,
                            op_hash.clone(),
                            Some(tx_index as i64),
                            Some(internal_index as i64),
                        ));
                    }
                }
            }
        }
    }

    let block_meta = elide_unstake_deposits(&block.metadata.balance_updates);
    for u in &block_meta {
        out.push(EffectiveUpdate::from_balance_update(
            u,
            UpdateSource::BlockMetadata,
            None,
            None,
            None,
        ));
    }

    out
}

/// Scans pairs `(prev, curr)` stepping by two; a `curr` that is a storage-fee
/// burn moves the pair to a tail, non-burn pairs keep their relative order.
/// The list length is preserved exactly — this only permutes.
fn reorder_burns(updates: &[BalanceUpdate]) -> Vec<BalanceUpdate> {
    let mut head = Vec::with_capacity(updates.len());
    let mut tail = Vec::new();

    let mut i = 0;
    while i + 1 < updates.len() {
        let prev = &updates[i];
        let curr = &updates[i + 1];
        if curr.kind == "burned" && curr.category == "storage fees" {
            tail.push(prev.clone());
            tail.push(curr.clone());
        } else {
            head.push(prev.clone());
            head.push(curr.clone());
        }
        i += 2;
    }
    if i < updates.len() {
        head.push(updates[i].clone());
    }

    head.extend(tail);
    head
}

/// Walks block-metadata updates; a negative amount immediately followed by
/// a `freezer`/`deposits` entry is deferred to a tail cache, appended after
/// the (shortened) main sequence.
fn elide_unstake_deposits(updates: &[BalanceUpdate]) -> Vec<BalanceUpdate> {
    let mut main = Vec::with_capacity(updates.len());
    let mut deferred = Vec::new();

    let mut i = 0;
    while i < updates.len() {
        if i + 1 < updates.len()
            && updates[i].amount.is_negative()
            && updates[i + 1].kind == "freezer"
            && updates[i + 1].category == "deposits"
        {
            deferred.push(updates[i].clone());
            deferred.push(updates[i + 1].clone());
            i += 2;
            continue;
        }
        main.push(updates[i].clone());
        i += 1;
    }

    main.extend(deferred);
    main
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_chain::{BlockMetadata, Operation, OperationContent, OperationResult};
    use rewards_core::Z;

    fn bu(addr: &str, amount: i64, kind: &str, category: &str) -> BalanceUpdate {
        BalanceUpdate {
            address: Address::new(addr),
            amount: Z::from_i64(amount),
            kind: kind.to_string(),
            category: category.to_string(),
        }
    }

    #[test]
    fn burn_reordering_preserves_length_and_moves_pair_to_tail() {
        let updates = vec![
            bu("a", 100, "contract", ""),
            bu("a", -5, "burned", "storage fees"),
            bu("b", 50, "contract", ""),
            bu("b", -1, "contract", ""),
        ];
        let reordered = reorder_burns(&updates);
        assert_eq!(reordered.len(), updates.len());
        assert_eq!(reordered[0].address.as_str(), "b");
        assert_eq!(reordered[1].address.as_str(), "b");
        assert_eq!(reordered[2].address.as_str(), "a");
        assert_eq!(reordered[3].kind, "burned");
    }

    #[test]
    fn burn_reordering_keeps_odd_trailing_element() {
        let updates = vec![bu("a", 1, "x", ""), bu("b", 2, "y", ""), bu("c", 3, "z", "")];
        let reordered = reorder_burns(&updates);
        assert_eq!(reordered.len(), 3);
        assert_eq!(reordered[2].address.as_str(), "c");
    }

    #[test]
    fn unstake_elision_defers_pair_to_end_preserving_multiset() {
        let updates = vec![
            bu("a", -100, "freezer", "unstaked_deposits"),
            bu("a", -100, "freezer", "deposits"),
            bu("b", 10, "contract", ""),
        ];
        let elided = elide_unstake_deposits(&updates);
        assert_eq!(elided.len(), updates.len());
        assert_eq!(elided[0].address.as_str(), "b");
        assert_eq!(elided[1].category, "unstaked_deposits");
        assert_eq!(elided[2].category, "deposits");
    }

    #[test]
    fn assemble_length_equals_sum_of_all_update_sources() {
        let content = OperationContent {
            is_delegation: false,
            delegation_source: None,
            delegation_target: None,
            meta_balance_updates: vec![bu("a", 1, "fees", "")],
            result: OperationResult {
                balance_updates: vec![bu("a", 2, "contract", "")],
            },
            internal_results: vec![],
        };
        let operation = Operation {
            hash: "op1".to_string(),
            contents: vec![content],
        };
        let block = Block {
            level: 100,
            operations: vec![vec![operation]],
            metadata: BlockMetadata {
                balance_updates: vec![bu("a", 3, "block", "")],
            },
        };

        let updates = assemble(&block);
        assert_eq!(updates.len(), 3);
    }

    fn sort_key(u: &BalanceUpdate) -> (String, String, String, Z) {
        (u.address.as_str().to_string(), u.kind.clone(), u.category.clone(), u.amount.clone())
    }

    // -------------------------------------------------------------------
    // Property-based tests (proptest)
    // -------------------------------------------------------------------

    #[cfg(test)]
    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Burn reordering only permutes: same length, same multiset of
            /// updates, regardless of how many burn pairs appear where.
            #[test]
            fn burn_reordering_is_a_pure_permutation(
                pairs in proptest::collection::vec((any::<bool>(), -1000i64..1000i64, -1000i64..1000i64), 0..30)
            ) {
                let mut updates = Vec::new();
                for (is_burn, amt_a, amt_b) in &pairs {
                    updates.push(bu("a", *amt_a, "contract", ""));
                    if *is_burn {
                        updates.push(bu("a", *amt_b, "burned", "storage fees"));
                    } else {
                        updates.push(bu("b", *amt_b, "contract", ""));
                    }
                }

                let reordered = reorder_burns(&updates);
                prop_assert_eq!(reordered.len(), updates.len());

                let mut original_sorted = updates.clone();
                let mut reordered_sorted = reordered.clone();
                original_sorted.sort_by_key(sort_key);
                reordered_sorted.sort_by_key(sort_key);
                prop_assert_eq!(original_sorted, reordered_sorted);
            }

            /// Unstake-deposit elision only permutes: same length, same
            /// multiset, regardless of how many elidable pairs appear.
            #[test]
            fn unstake_elision_is_a_pure_permutation(
                pairs in proptest::collection::vec((any::<bool>(), 1i64..1000i64), 0..30)
            ) {
                let mut updates = Vec::new();
                for (elidable, amt) in &pairs {
                    if *elidable {
                        updates.push(bu("a", -*amt, "freezer", "unstaked_deposits"));
                        updates.push(bu("a", -*amt, "freezer", "deposits"));
                    } else {
                        updates.push(bu("b", *amt, "contract", ""));
                    }
                }

                let elided = elide_unstake_deposits(&updates);
                prop_assert_eq!(elided.len(), updates.len());

                let mut original_sorted = updates.clone();
                let mut elided_sorted = elided.clone();
                original_sorted.sort_by_key(sort_key);
                elided_sorted.sort_by_key(sort_key);
                prop_assert_eq!(original_sorted, elided_sorted);
            }
        }
    }
}
