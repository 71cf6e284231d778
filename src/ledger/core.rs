//! Main ledger orchestrator that coordinates accounts and transactions

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::ledger::{
    AccountRegistry, AdjustmentSynthesizer, BalanceCalculator, KeyedLocks, TransactionEngine,
};
use crate::traits::*;
use crate::types::*;

/// Main ledger system that orchestrates all ledger operations
pub struct Ledger<S: LedgerStorage> {
    storage: S,
    account_registry: AccountRegistry<S>,
    balance_calculator: BalanceCalculator<S>,
    transaction_engine: TransactionEngine<S>,
    adjustment_synthesizer: AdjustmentSynthesizer<S>,
    account_locks: Arc<KeyedLocks>,
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, LedgerConfig::default())
    }

    /// Create a new ledger with explicit tunables
    pub fn with_config(storage: S, config: LedgerConfig) -> Self {
        Self::with_validators(
            storage,
            config,
            Arc::new(DefaultAccountValidator),
            Arc::new(DefaultTransactionValidator),
        )
    }

    /// Create a new ledger with custom validators
    pub fn with_validators(
        storage: S,
        config: LedgerConfig,
        account_validator: Arc<dyn AccountValidator>,
        transaction_validator: Arc<dyn TransactionValidator>,
    ) -> Self {
        let account_locks = Arc::new(KeyedLocks::new("account", config.lock_timeout));
        let transaction_locks = Arc::new(KeyedLocks::new("transaction", config.lock_timeout));
        let transaction_engine = TransactionEngine::with_validator(
            storage.clone(),
            transaction_locks,
            transaction_validator,
        );

        Self {
            account_registry: AccountRegistry::with_validator(storage.clone(), account_validator),
            balance_calculator: BalanceCalculator::new(storage.clone()),
            adjustment_synthesizer: AdjustmentSynthesizer::new(
                storage.clone(),
                transaction_engine.clone(),
                Arc::clone(&account_locks),
                config.max_adjustment_retries,
            ),
            transaction_engine,
            account_locks,
            storage,
        }
    }

    // Account operations

    /// Create a new account
    pub async fn create_account(
        &self,
        input: NewAccount,
        owner_id: &str,
    ) -> LedgerResult<AccountView> {
        let account = self.account_registry.create_account(input, owner_id).await?;
        Ok(AccountView {
            current_balance_minor: account.balance_minor,
            account,
        })
    }

    /// Get an account with its current balance
    pub async fn get_account(&self, account_id: Uuid, owner_id: &str) -> LedgerResult<AccountView> {
        self.balance_calculator.account_view(account_id, owner_id).await
    }

    /// List an owner's accounts with their current balances
    pub async fn list_accounts(&self, owner_id: &str) -> LedgerResult<Vec<AccountView>> {
        let accounts = self.account_registry.list_accounts(owner_id).await?;
        let mut views = Vec::with_capacity(accounts.len());
        for account in accounts {
            views.push(self.balance_calculator.account_view(account.id, owner_id).await?);
        }
        Ok(views)
    }

    /// Update an account.
    ///
    /// A `balance_minor` in the patch is an override: the opening balance is
    /// kept and an adjustment transaction closes the gap, committed together
    /// with the other field changes.
    #[instrument(skip(self, patch), err)]
    pub async fn update_account(
        &self,
        account_id: Uuid,
        patch: AccountPatch,
        owner_id: &str,
    ) -> LedgerResult<AccountUpdate> {
        let _guard = self.account_locks.acquire(account_id).await?;
        let patched = self
            .account_registry
            .patched(account_id, &patch, owner_id)
            .await?;

        let adjustment = match patch.balance_minor {
            Some(target) => {
                self.adjustment_synthesizer
                    .reconcile_locked(account_id, target, owner_id, Some(patched))
                    .await?
            }
            None => {
                self.account_registry.commit_update(patched).await?;
                None
            }
        };

        let account = self
            .balance_calculator
            .account_view(account_id, owner_id)
            .await?;
        Ok(AccountUpdate {
            account,
            adjustment,
        })
    }

    /// The unmasked account number, for its owner only
    pub async fn get_account_number(
        &self,
        account_id: Uuid,
        owner_id: &str,
    ) -> LedgerResult<Option<String>> {
        self.account_registry
            .get_account_number(account_id, owner_id)
            .await
    }

    /// Delete an account no line references
    pub async fn delete_account(&self, account_id: Uuid, owner_id: &str) -> LedgerResult<()> {
        let _guard = self.account_locks.acquire(account_id).await?;
        self.account_registry
            .delete_account(account_id, owner_id)
            .await
    }

    /// Current balance of an account
    pub async fn compute_balance(&self, account_id: Uuid, owner_id: &str) -> LedgerResult<i64> {
        let view = self
            .balance_calculator
            .account_view(account_id, owner_id)
            .await?;
        Ok(view.current_balance_minor)
    }

    /// Move an account's balance to `target_minor` with an adjustment
    /// transaction; `None` when it is already there
    pub async fn override_balance(
        &self,
        account_id: Uuid,
        target_minor: i64,
        owner_id: &str,
    ) -> LedgerResult<Option<TransactionWithLines>> {
        self.adjustment_synthesizer
            .override_balance(account_id, target_minor, owner_id)
            .await
    }

    // Transaction operations

    /// Record a new transaction
    pub async fn create_transaction(
        &self,
        spec: TransactionSpec,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        self.transaction_engine.create(spec, owner_id).await
    }

    /// Amend a transaction, compensating its existing lines
    pub async fn update_transaction(
        &self,
        transaction_id: Uuid,
        patch: TransactionPatch,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        self.transaction_engine
            .update(transaction_id, patch, owner_id)
            .await
    }

    /// Reverse a transaction, returning the reversal
    pub async fn reverse_transaction(
        &self,
        transaction_id: Uuid,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        self.transaction_engine
            .reverse_transaction(transaction_id, owner_id)
            .await
    }

    /// Delete a transaction that has no lines and no reversal links
    pub async fn remove_transaction(&self, transaction_id: Uuid, owner_id: &str) -> LedgerResult<()> {
        self.transaction_engine.remove(transaction_id, owner_id).await
    }

    /// Get a transaction with its lines
    pub async fn get_transaction(
        &self,
        transaction_id: Uuid,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        self.transaction_engine.get(transaction_id, owner_id).await
    }

    /// All of an owner's transactions
    pub async fn list_transactions(&self, owner_id: &str) -> LedgerResult<Vec<TransactionWithLines>> {
        self.transaction_engine.list(owner_id).await
    }

    /// Transactions at 1-based positions `lower..=upper`, newest date first
    pub async fn list_transactions_in_range(
        &self,
        owner_id: &str,
        lower: u64,
        upper: u64,
    ) -> LedgerResult<Vec<TransactionWithLines>> {
        self.transaction_engine
            .list_in_range(owner_id, lower, upper)
            .await
    }

    /// Number of transactions an owner has
    pub async fn count_transactions(&self, owner_id: &str) -> LedgerResult<u64> {
        self.transaction_engine.count(owner_id).await
    }

    // Integrity

    /// Audit an owner's ledger for broken reversal links, reversals that do
    /// not cancel their original, and lines pointing at missing rows
    #[instrument(skip(self), err)]
    pub async fn verify_integrity(&self, owner_id: &str) -> LedgerResult<IntegrityReport> {
        let transactions = self.transaction_engine.list(owner_id).await?;
        let by_id: HashMap<Uuid, &TransactionWithLines> = transactions
            .iter()
            .map(|txn| (txn.transaction.id, txn))
            .collect();
        let accounts: HashSet<Uuid> = self
            .account_registry
            .list_accounts(owner_id)
            .await?
            .into_iter()
            .map(|account| account.id)
            .collect();

        let mut issues = Vec::new();

        for txn in &transactions {
            let transaction = &txn.transaction;

            if let Some(reversal_id) = transaction.reversed_by {
                match by_id.get(&reversal_id) {
                    Some(reversal) if reversal.transaction.reversal_of == Some(transaction.id) => {
                        for (account_id, residual_minor) in residuals(txn, reversal) {
                            issues.push(IntegrityIssue::UnbalancedReversal {
                                transaction_id: transaction.id,
                                account_id,
                                residual_minor,
                            });
                        }
                    }
                    _ => issues.push(IntegrityIssue::BrokenReversalLink {
                        transaction_id: transaction.id,
                        linked_id: reversal_id,
                    }),
                }
            }

            if let Some(original_id) = transaction.reversal_of {
                let linked_back = by_id.get(&original_id).is_some_and(|original| {
                    original.transaction.reversed_by == Some(transaction.id)
                });
                if !linked_back {
                    issues.push(IntegrityIssue::BrokenReversalLink {
                        transaction_id: transaction.id,
                        linked_id: original_id,
                    });
                }
            }

            for line in &txn.lines {
                if !accounts.contains(&line.account_id) {
                    issues.push(IntegrityIssue::DanglingLine {
                        line_id: line.id,
                        missing_id: line.account_id,
                    });
                }
            }
        }

        for account_id in &accounts {
            for line in self.storage.list_lines_by_account(*account_id).await? {
                if !by_id.contains_key(&line.transaction_id) {
                    issues.push(IntegrityIssue::DanglingLine {
                        line_id: line.id,
                        missing_id: line.transaction_id,
                    });
                }
            }
        }

        if issues.is_empty() {
            tracing::debug!(owner_id, transactions = transactions.len(), "ledger is consistent");
        } else {
            tracing::warn!(owner_id, issues = issues.len(), "ledger integrity issues found");
        }

        Ok(IntegrityReport {
            owner_id: owner_id.to_string(),
            transactions_checked: transactions.len(),
            accounts_checked: accounts.len(),
            issues,
        })
    }
}

/// Per-account debit-minus-credit left over once a reversal is applied on
/// top of its original; empty when they cancel
fn residuals(
    original: &TransactionWithLines,
    reversal: &TransactionWithLines,
) -> Vec<(Uuid, i64)> {
    let mut net: HashMap<Uuid, i128> = HashMap::new();
    for line in original.lines.iter().chain(&reversal.lines) {
        let amount = i128::from(line.amount_minor);
        *net.entry(line.account_id).or_default() += match line.direction {
            Direction::Debit => amount,
            Direction::Credit => -amount,
        };
    }
    let mut residuals: Vec<(Uuid, i64)> = net
        .into_iter()
        .filter(|(_, residual)| *residual != 0)
        .map(|(account_id, residual)| {
            let clamped = residual.clamp(i128::from(i64::MIN), i128::from(i64::MAX));
            (account_id, clamped as i64)
        })
        .collect();
    residuals.sort();
    residuals
}

/// Report on ledger integrity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub owner_id: String,
    pub transactions_checked: usize,
    pub accounts_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A single integrity finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// `reversed_by`/`reversal_of` point at a transaction that does not
    /// point back
    BrokenReversalLink { transaction_id: Uuid, linked_id: Uuid },
    /// Original and reversal leave a non-zero net on an account
    UnbalancedReversal {
        transaction_id: Uuid,
        account_id: Uuid,
        #[serde(with = "minor_units")]
        residual_minor: i64,
    },
    /// A line references an account or transaction that does not exist
    DanglingLine { line_id: Uuid, missing_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;

    const OWNER: &str = "user-1";

    async fn funded(ledger: &Ledger<MemoryStorage>, name: &str, opening: i64) -> Uuid {
        ledger
            .create_account(NewAccount::new(name, AccountKind::Asset, "USD", opening), OWNER)
            .await
            .unwrap()
            .account
            .id
    }

    #[tokio::test]
    async fn update_account_with_balance_commits_adjustment() {
        let ledger = Ledger::new(MemoryStorage::new());
        let cash = funded(&ledger, "Cash", 1000).await;

        let patch = AccountPatch {
            name: Some("Petty cash".to_string()),
            balance_minor: Some(1200),
            ..AccountPatch::default()
        };
        let update = ledger.update_account(cash, patch, OWNER).await.unwrap();

        assert_eq!(update.account.account.name, "Petty cash");
        assert_eq!(update.account.account.balance_minor, 1000);
        assert_eq!(update.account.current_balance_minor, 1200);
        let adjustment = update.adjustment.unwrap();
        assert_eq!(adjustment.transaction.kind, "adjustment");
        assert_eq!(adjustment.net_effect_on(cash, AccountKind::Asset).unwrap(), 200);
    }

    #[tokio::test]
    async fn update_account_without_balance_has_no_adjustment() {
        let ledger = Ledger::new(MemoryStorage::new());
        let cash = funded(&ledger, "Cash", 1000).await;

        let patch = AccountPatch {
            status: Some(AccountStatus::Inactive),
            ..AccountPatch::default()
        };
        let update = ledger.update_account(cash, patch, OWNER).await.unwrap();

        assert!(update.adjustment.is_none());
        assert_eq!(update.account.account.status, AccountStatus::Inactive);
        assert_eq!(ledger.count_transactions(OWNER).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn kind_flip_with_override_conflicts_after_activity() {
        let ledger = Ledger::new(MemoryStorage::new());
        let cash = funded(&ledger, "Cash", 0).await;
        ledger.override_balance(cash, 50, OWNER).await.unwrap();

        let patch = AccountPatch {
            kind: Some(AccountKind::Liability),
            balance_minor: Some(10),
            ..AccountPatch::default()
        };
        assert!(matches!(
            ledger.update_account(cash, patch, OWNER).await,
            Err(LedgerError::Conflict(_))
        ));
        assert_eq!(ledger.compute_balance(cash, OWNER).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn reversed_ledger_is_clean() {
        let ledger = Ledger::new(MemoryStorage::new());
        let a = funded(&ledger, "A", 1000).await;
        let b = funded(&ledger, "B", 0).await;

        let txn = ledger
            .create_transaction(TransactionSpec::transfer(a, b, 200), OWNER)
            .await
            .unwrap();
        ledger
            .update_transaction(
                txn.transaction.id,
                TransactionPatch {
                    account_from: Some(Some(a)),
                    account_to: Some(Some(b)),
                    amount_minor: Some(350),
                    ..TransactionPatch::default()
                },
                OWNER,
            )
            .await
            .unwrap();
        ledger
            .reverse_transaction(txn.transaction.id, OWNER)
            .await
            .unwrap();

        let report = ledger.verify_integrity(OWNER).await.unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.transactions_checked, 2);
        assert_eq!(report.accounts_checked, 2);
    }

    #[tokio::test]
    async fn one_sided_reversal_link_is_reported() {
        let storage = MemoryStorage::new();
        let ledger = Ledger::new(storage.clone());

        let today = chrono::Utc::now().date_naive();
        let mut orphan = Transaction::new(OWNER, "reversal".to_string(), today);
        let missing = Uuid::new_v4();
        orphan.reversal_of = Some(missing);
        storage.create_transaction(&orphan).await.unwrap();

        let report = ledger.verify_integrity(OWNER).await.unwrap();
        assert_eq!(
            report.issues,
            vec![IntegrityIssue::BrokenReversalLink {
                transaction_id: orphan.id,
                linked_id: missing,
            }]
        );
    }

    #[test]
    fn residuals_cancel_for_mirrored_lines() {
        let txn = Uuid::new_v4();
        let account = Uuid::new_v4();
        let original = TransactionWithLines {
            transaction: Transaction::new(
                OWNER,
                "transfer".to_string(),
                chrono::Utc::now().date_naive(),
            ),
            lines: vec![Line::debit(txn, account, 40)],
        };
        let mut reversal = original.clone();
        reversal.lines = original.lines.iter().map(|line| line.mirrored(txn)).collect();
        assert!(residuals(&original, &reversal).is_empty());

        reversal.lines[0].amount_minor = 30;
        assert_eq!(residuals(&original, &reversal), vec![(account, 10)]);
    }
}
