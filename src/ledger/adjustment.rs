//! Balance overrides expressed as auditable adjustment transactions

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::ledger::balance::BalanceCalculator;
use crate::ledger::locks::KeyedLocks;
use crate::ledger::transaction::TransactionEngine;
use crate::traits::*;
use crate::types::*;

/// Turns "set this account's balance to X" into an `adjustment` transaction
/// that moves the computed balance to X.
///
/// The read-balance, decide-delta, write-adjustment sequence runs under the
/// account's lock and commits with an optimistic line-count check, retried a
/// bounded number of times if another writer got in first.
pub struct AdjustmentSynthesizer<S: LedgerStorage> {
    storage: S,
    engine: TransactionEngine<S>,
    locks: Arc<KeyedLocks>,
    max_retries: u32,
}

impl<S: LedgerStorage> AdjustmentSynthesizer<S> {
    pub fn new(
        storage: S,
        engine: TransactionEngine<S>,
        locks: Arc<KeyedLocks>,
        max_retries: u32,
    ) -> Self {
        Self {
            storage,
            engine,
            locks,
            max_retries,
        }
    }

    /// Reconcile the account's computed balance to `target_minor`.
    ///
    /// Returns the adjustment transaction, or `None` when the balance is
    /// already at the target.
    #[instrument(skip(self), err)]
    pub async fn override_balance(
        &self,
        account_id: Uuid,
        target_minor: i64,
        owner_id: &str,
    ) -> LedgerResult<Option<TransactionWithLines>> {
        let _guard = self.locks.acquire(account_id).await?;
        self.reconcile_locked(account_id, target_minor, owner_id, None)
            .await
    }

    /// Same as [`AdjustmentSynthesizer::override_balance`], committing
    /// `account_update` in the same unit. The caller must hold the account's
    /// lock.
    pub(crate) async fn reconcile_locked(
        &self,
        account_id: Uuid,
        target_minor: i64,
        owner_id: &str,
        account_update: Option<Account>,
    ) -> LedgerResult<Option<TransactionWithLines>> {
        let mut attempt = 0;
        loop {
            match self
                .try_reconcile(account_id, target_minor, owner_id, account_update.as_ref())
                .await
            {
                Err(LedgerError::StaleRead(reason)) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        %account_id,
                        attempt,
                        %reason,
                        "balance changed underneath override, retrying"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    async fn try_reconcile(
        &self,
        account_id: Uuid,
        target_minor: i64,
        owner_id: &str,
        account_update: Option<&Account>,
    ) -> LedgerResult<Option<TransactionWithLines>> {
        let snapshot = self
            .storage
            .account_snapshot(account_id)
            .await?
            .filter(|snapshot| snapshot.account.is_owned_by(owner_id))
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        if let Some(updated) = account_update {
            if snapshot.account.reinterprets_history(updated) && !snapshot.lines.is_empty() {
                return Err(LedgerError::Conflict(format!(
                    "account {account_id} has lines; kind and base_currency are fixed"
                )));
            }
        }

        let current = BalanceCalculator::<S>::fold(&snapshot)?;
        let delta = target_minor.checked_sub(current).ok_or_else(|| {
            LedgerError::Overflow(format!(
                "adjustment from {current} to {target_minor} exceeds i64"
            ))
        })?;
        let kind = account_update.map_or(snapshot.account.kind, |account| account.kind);

        let mut changes = ChangeSet::new();
        changes.require(Precondition::AccountLineCount {
            account_id,
            expected: snapshot.lines.len(),
        });
        if let Some(updated) = account_update {
            changes.update_account(updated.clone());
        }

        let adjustment = match kind.direction_for(delta) {
            None => None,
            Some(direction) => {
                let spec = adjustment_spec(account_id, direction, delta, current, target_minor);
                let planned = self.engine.plan_create(spec, &snapshot.account.owner_id).await?;
                changes.extend(TransactionEngine::<S>::change_set(&planned));
                Some(planned)
            }
        };

        if changes.is_empty() {
            tracing::debug!(%account_id, balance = current, "balance already at target");
            return Ok(None);
        }

        self.storage.commit(changes).await?;
        if let Some(adjustment) = &adjustment {
            tracing::info!(
                %account_id,
                transaction_id = %adjustment.transaction.id,
                from = current,
                to = target_minor,
                "balance adjustment recorded"
            );
        }
        Ok(adjustment)
    }
}

fn adjustment_spec(
    account_id: Uuid,
    direction: Direction,
    delta: i64,
    current: i64,
    target: i64,
) -> TransactionSpec {
    let description = if delta > 0 {
        "Balance increased adjustment"
    } else {
        "Balance decreased adjustment"
    };
    let metadata = HashMap::from([
        ("previous_balance_minor".to_string(), current.to_string()),
        ("target_balance_minor".to_string(), target.to_string()),
    ]);

    let (account_from, account_to) = match direction {
        Direction::Debit => (Some(account_id), None),
        Direction::Credit => (None, Some(account_id)),
    };

    TransactionSpec {
        kind: "adjustment".to_string(),
        description: Some(description.to_string()),
        metadata,
        account_from,
        account_to,
        amount_minor: Some(delta),
        ..TransactionSpec::default()
    }
}
