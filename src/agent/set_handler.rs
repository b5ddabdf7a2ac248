//! Four-phase SET protocol (RFC 2741 §7.2.4).
//!
//! The master drives each transaction through:
//! 1. **TestSet**: resolve and check every varbind. Nothing is written; if
//!    any varbind fails, the whole test fails with that varbind's index.
//! 2. **CommitSet**: write the staged values, capturing each prior value.
//!    The first failure is reported as `commitFailed`; earlier writes stay.
//! 3. **UndoSet**: restore the prior value of every written binding.
//! 4. **CleanupSet**: forget the transaction.

use std::collections::HashMap;

use bytes::Bytes;

use crate::binding::BindingHandle;
use crate::error::ErrorStatus;
use crate::handler::{Response, SetResult};
use crate::registry::Registry;
use crate::value::Value;
use crate::varbind::VarBind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Tested,
    Committed,
    CommitFailed,
    Undone,
}

struct Staged {
    binding: BindingHandle,
    value: Value,
    /// Value before the commit wrote `value`; `None` until written.
    prior: Option<Value>,
}

struct PendingSet {
    phase: Phase,
    staged: Vec<Staged>,
}

/// Pending SET transactions, keyed by transaction ID.
#[derive(Default)]
pub(crate) struct SetCoordinator {
    pending: HashMap<u32, PendingSet>,
}

impl SetCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of transactions between TestSet and CleanupSet.
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// TestSet: stage all varbinds or none.
    pub(crate) fn test_set(
        &mut self,
        registry: &Registry,
        transaction_id: u32,
        context: Option<&Bytes>,
        varbinds: &[VarBind],
    ) -> Response {
        if self.pending.contains_key(&transaction_id) {
            tracing::warn!(
                agentx.transaction_id = transaction_id,
                "TestSet for a transaction that is already pending"
            );
            return Response::error(ErrorStatus::ProcessingError, 0, Vec::new());
        }

        let mut staged = Vec::with_capacity(varbinds.len());
        for (index, vb) in varbinds.iter().enumerate() {
            let check = registry
                .resolve_for_set(context, &vb.oid)
                .and_then(|binding| match binding.test(&vb.value) {
                    SetResult::Ok => Ok(binding),
                    failed => Err(failed),
                });
            match check {
                Ok(binding) => staged.push(Staged {
                    binding,
                    value: vb.value.clone(),
                    prior: None,
                }),
                Err(result) => {
                    tracing::debug!(
                        agentx.transaction_id = transaction_id,
                        agentx.oid = %vb.oid,
                        status = %result.to_error_status(),
                        "TestSet rejected"
                    );
                    return Response::error(
                        result.to_error_status(),
                        error_index(index),
                        Vec::new(),
                    );
                }
            }
        }

        tracing::trace!(
            agentx.transaction_id = transaction_id,
            count = staged.len(),
            "TestSet staged"
        );
        self.pending.insert(
            transaction_id,
            PendingSet {
                phase: Phase::Tested,
                staged,
            },
        );
        Response::success(Vec::new())
    }

    /// CommitSet: write every staged value.
    pub(crate) fn commit_set(&mut self, transaction_id: u32) -> Response {
        let Some(pending) = self.pending.get_mut(&transaction_id) else {
            tracing::warn!(
                agentx.transaction_id = transaction_id,
                "CommitSet without TestSet"
            );
            return Response::error(ErrorStatus::ProcessingError, 0, Vec::new());
        };
        if pending.phase != Phase::Tested {
            return Response::error(ErrorStatus::ProcessingError, 0, Vec::new());
        }

        for (index, staged) in pending.staged.iter_mut().enumerate() {
            // the validator may depend on state that changed since TestSet
            let result = staged.binding.validate(&staged.value);
            if !result.is_ok() {
                pending.phase = Phase::CommitFailed;
                tracing::debug!(
                    agentx.transaction_id = transaction_id,
                    agentx.oid = %staged.binding.oid(),
                    "CommitSet failed"
                );
                return Response::error(ErrorStatus::CommitFailed, error_index(index), Vec::new());
            }
            staged.prior = Some(staged.binding.replace(staged.value.clone()));
        }

        pending.phase = Phase::Committed;
        tracing::trace!(agentx.transaction_id = transaction_id, "CommitSet applied");
        Response::success(Vec::new())
    }

    /// UndoSet: restore prior values. A no-op without a transaction.
    pub(crate) fn undo_set(&mut self, transaction_id: u32) -> Response {
        let Some(pending) = self.pending.get_mut(&transaction_id) else {
            return Response::success(Vec::new());
        };

        // reverse order, so a binding set twice ends at its oldest value
        for staged in pending.staged.iter_mut().rev() {
            if let Some(prior) = staged.prior.take() {
                staged.binding.replace(prior);
            }
        }
        pending.phase = Phase::Undone;
        tracing::trace!(agentx.transaction_id = transaction_id, "UndoSet restored");
        Response::success(Vec::new())
    }

    /// CleanupSet: release the transaction.
    pub(crate) fn cleanup_set(&mut self, transaction_id: u32) {
        if let Some(pending) = self.pending.remove(&transaction_id) {
            tracing::trace!(
                agentx.transaction_id = transaction_id,
                phase = ?pending.phase,
                "CleanupSet released"
            );
        }
    }

    /// Drop every pending transaction (session closed).
    pub(crate) fn discard_all(&mut self) {
        let count = self.len();
        if count > 0 {
            tracing::debug!(count, "discarding pending set transactions");
        }
        self.pending.clear();
    }
}

fn error_index(index: usize) -> u16 {
    u16::try_from(index + 1).unwrap_or(u16::MAX)
}
