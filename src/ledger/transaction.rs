//! Transaction processing and management

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::ledger::locks::KeyedLocks;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation;

/// Creates, amends and reverses transactions.
///
/// Every mutation is planned as one [`ChangeSet`] and committed atomically.
/// Amendments and reversals are serialised per transaction id.
#[derive(Clone)]
pub struct TransactionEngine<S: LedgerStorage> {
    storage: S,
    validator: Arc<dyn TransactionValidator>,
    locks: Arc<KeyedLocks>,
}

impl<S: LedgerStorage> TransactionEngine<S> {
    /// Create a new transaction engine
    pub fn new(storage: S, locks: Arc<KeyedLocks>) -> Self {
        Self::with_validator(storage, locks, Arc::new(DefaultTransactionValidator))
    }

    /// Create a new transaction engine with custom validator
    pub fn with_validator(
        storage: S,
        locks: Arc<KeyedLocks>,
        validator: Arc<dyn TransactionValidator>,
    ) -> Self {
        Self {
            storage,
            validator,
            locks,
        }
    }

    /// Validate `spec` and build the transaction and its initial lines
    /// without writing anything.
    pub async fn plan_create(
        &self,
        spec: TransactionSpec,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        self.validator.validate_spec(&spec)?;

        if let Some(original) = spec.reversal_of {
            return Err(LedgerError::Conflict(format!(
                "reversal_of ({original}) is set by reversing a transaction, not on create"
            )));
        }

        let mut transaction = Transaction::new(
            owner_id,
            spec.kind,
            spec.date.unwrap_or_else(|| chrono::Utc::now().date_naive()),
        );
        transaction.description = spec.description;
        transaction.tags = spec.tags;
        transaction.metadata = spec.metadata;

        let lines = self
            .resolve_lines(
                transaction.id,
                spec.account_from,
                spec.account_to,
                spec.amount_minor,
                owner_id,
            )
            .await?;

        Ok(TransactionWithLines { transaction, lines })
    }

    /// Record a new transaction together with its lines
    #[instrument(skip(self, spec), fields(kind = %spec.kind), err)]
    pub async fn create(
        &self,
        spec: TransactionSpec,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        let planned = self.plan_create(spec, owner_id).await?;
        self.storage.commit(Self::change_set(&planned)).await?;

        tracing::info!(
            transaction_id = %planned.transaction.id,
            lines = planned.lines.len(),
            "transaction created"
        );
        Ok(planned)
    }

    /// Amend a transaction.
    ///
    /// Existing lines are never touched: each one gets an opposite line on
    /// the same transaction, then fresh lines for the new accounts and amount
    /// are appended. Scalar fields are updated in place.
    #[instrument(skip(self, patch), err)]
    pub async fn update(
        &self,
        transaction_id: Uuid,
        patch: TransactionPatch,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let existing = self.load(transaction_id, owner_id).await?;

        if let Some(reversal_of) = patch.reversal_of {
            if reversal_of != existing.reversal_of {
                return Err(LedgerError::Conflict(
                    "reversal_of cannot be updated".to_string(),
                ));
            }
        }

        self.validator.validate_patch(&patch)?;

        match existing.state() {
            TransactionState::Active => {}
            TransactionState::Reversed => {
                return Err(LedgerError::Conflict(format!(
                    "transaction {transaction_id} has been reversed and can no longer be amended"
                )))
            }
            TransactionState::IsReversal => {
                return Err(LedgerError::Conflict(format!(
                    "transaction {transaction_id} is a reversal and cannot be amended"
                )))
            }
        }

        let account_from = patch.account_from.flatten();
        let account_to = patch.account_to.flatten();
        if account_from.is_none() && account_to.is_none() {
            return Err(LedgerError::Validation(
                "At least one of account_from or account_to is required".to_string(),
            ));
        }

        let existing_lines = self
            .storage
            .list_lines_by_transaction(transaction_id)
            .await?;
        let compensations: Vec<Line> = existing_lines
            .iter()
            .map(|line| line.mirrored(transaction_id))
            .collect();
        let new_lines = self
            .resolve_lines(
                transaction_id,
                account_from,
                account_to,
                patch.amount_minor,
                owner_id,
            )
            .await?;

        let mut updated = existing;
        if let Some(kind) = patch.kind {
            updated.kind = kind;
        }
        if let Some(date) = patch.date {
            updated.date = date;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(tags) = patch.tags {
            updated.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            updated.metadata = metadata;
        }
        updated.updated_at = chrono::Utc::now().naive_utc();

        let mut changes = ChangeSet::new();
        changes
            .require(Precondition::TransactionNotReversed(transaction_id))
            .require(Precondition::TransactionLineCount {
                transaction_id,
                expected: existing_lines.len(),
            })
            .update_transaction(updated.clone())
            .append_lines(compensations)
            .append_lines(new_lines);
        let appended = changes.lines().count();
        self.storage.commit(changes).await?;

        tracing::info!(%transaction_id, appended, "transaction amended");
        self.with_lines(updated).await
    }

    /// Undo a transaction by recording its mirror image.
    ///
    /// Creates a `reversal` transaction whose lines swap the direction of
    /// every original line, then links the original to it. A transaction can
    /// be reversed once; a reversal can never be reversed.
    #[instrument(skip(self), err)]
    pub async fn reverse_transaction(
        &self,
        transaction_id: Uuid,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let original = self.load(transaction_id, owner_id).await?;

        match original.state() {
            TransactionState::Active => {}
            TransactionState::Reversed => {
                return Err(LedgerError::Conflict(format!(
                    "transaction {transaction_id} has already been reversed"
                )))
            }
            TransactionState::IsReversal => {
                return Err(LedgerError::Conflict(format!(
                    "transaction {transaction_id} is a reversal and cannot be reversed"
                )))
            }
        }

        let original_lines = self
            .storage
            .list_lines_by_transaction(transaction_id)
            .await?;

        let mut reversal = Transaction::new(
            &original.owner_id,
            "reversal".to_string(),
            chrono::Utc::now().date_naive(),
        );
        reversal.description = original.description.clone();
        reversal.tags = original.tags.clone();
        reversal.metadata = original.metadata.clone();
        reversal.reversal_of = Some(transaction_id);

        let mirrored: Vec<Line> = original_lines
            .iter()
            .map(|line| line.mirrored(reversal.id))
            .collect();

        let mut marked = original;
        marked.reversed_by = Some(reversal.id);
        marked.updated_at = chrono::Utc::now().naive_utc();

        let mut changes = ChangeSet::new();
        changes
            .require(Precondition::TransactionNotReversed(transaction_id))
            .require(Precondition::TransactionLineCount {
                transaction_id,
                expected: original_lines.len(),
            })
            .insert_transaction(reversal.clone())
            .append_lines(mirrored.clone())
            .update_transaction(marked);
        self.storage.commit(changes).await?;

        tracing::info!(
            %transaction_id,
            reversal_id = %reversal.id,
            lines = mirrored.len(),
            "transaction reversed"
        );
        Ok(TransactionWithLines {
            transaction: reversal,
            lines: mirrored,
        })
    }

    /// Hard-delete a transaction. Only allowed while it has no lines and no
    /// reversal links; otherwise [`TransactionEngine::reverse_transaction`]
    /// is the way to undo it.
    #[instrument(skip(self), err)]
    pub async fn remove(&self, transaction_id: Uuid, owner_id: &str) -> LedgerResult<()> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let existing = self.load(transaction_id, owner_id).await?;

        if existing.reversal_of.is_some() || existing.reversed_by.is_some() {
            return Err(LedgerError::Conflict(format!(
                "transaction {transaction_id} is linked by a reversal"
            )));
        }
        let lines = self
            .storage
            .list_lines_by_transaction(transaction_id)
            .await?;
        if !lines.is_empty() {
            return Err(LedgerError::Conflict(format!(
                "transaction {transaction_id} has {} lines; reverse it instead",
                lines.len()
            )));
        }

        self.storage.delete_transaction(transaction_id).await?;
        tracing::info!(%transaction_id, "transaction removed");
        Ok(())
    }

    /// Get a transaction with its lines
    pub async fn get(
        &self,
        transaction_id: Uuid,
        owner_id: &str,
    ) -> LedgerResult<TransactionWithLines> {
        let transaction = self.load(transaction_id, owner_id).await?;
        self.with_lines(transaction).await
    }

    /// All of an owner's transactions, newest first
    pub async fn list(&self, owner_id: &str) -> LedgerResult<Vec<TransactionWithLines>> {
        let transactions = self.storage.list_transactions(owner_id, 0, None).await?;
        self.all_with_lines(transactions).await
    }

    /// Transactions at 1-based inclusive positions `lower..=upper`, newest
    /// date first
    pub async fn list_in_range(
        &self,
        owner_id: &str,
        lower: u64,
        upper: u64,
    ) -> LedgerResult<Vec<TransactionWithLines>> {
        let (skip, take) = validation::position_range(lower, upper)?;
        let transactions = self
            .storage
            .list_transactions(owner_id, skip, Some(take))
            .await?;
        self.all_with_lines(transactions).await
    }

    /// Number of transactions an owner has
    pub async fn count(&self, owner_id: &str) -> LedgerResult<u64> {
        self.storage.count_transactions(owner_id).await
    }

    /// The change set that inserts a planned transaction and its lines
    pub fn change_set(planned: &TransactionWithLines) -> ChangeSet {
        let mut changes = ChangeSet::new();
        changes
            .insert_transaction(planned.transaction.clone())
            .append_lines(planned.lines.iter().cloned());
        changes
    }

    /// Debit line on `account_from`, credit line on `account_to`, both for
    /// the absolute value of `amount_minor`.
    async fn resolve_lines(
        &self,
        transaction_id: Uuid,
        account_from: Option<Uuid>,
        account_to: Option<Uuid>,
        amount_minor: Option<i64>,
        owner_id: &str,
    ) -> LedgerResult<Vec<Line>> {
        if account_from.is_none() && account_to.is_none() {
            return Ok(Vec::new());
        }

        let amount = amount_minor.ok_or_else(|| {
            LedgerError::Validation(
                "amount_minor is required when an account is involved".to_string(),
            )
        })?;
        validation::validate_amount(amount)?;
        let amount = amount.abs();

        let from = match account_from {
            Some(id) => Some(self.load_account(id, owner_id).await?),
            None => None,
        };
        let to = match account_to {
            Some(id) => Some(self.load_account(id, owner_id).await?),
            None => None,
        };

        if let (Some(from), Some(to)) = (&from, &to) {
            if from.base_currency != to.base_currency {
                return Err(LedgerError::CurrencyMismatch {
                    from: from.base_currency.clone(),
                    to: to.base_currency.clone(),
                });
            }
        }

        let mut lines = Vec::with_capacity(2);
        if let Some(from) = from {
            lines.push(Line::debit(transaction_id, from.id, amount));
        }
        if let Some(to) = to {
            lines.push(Line::credit(transaction_id, to.id, amount));
        }
        Ok(lines)
    }

    async fn load(&self, transaction_id: Uuid, owner_id: &str) -> LedgerResult<Transaction> {
        self.storage
            .get_transaction(transaction_id, Some(owner_id))
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))
    }

    async fn load_account(&self, account_id: Uuid, owner_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .filter(|account| account.is_owned_by(owner_id))
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    async fn with_lines(&self, transaction: Transaction) -> LedgerResult<TransactionWithLines> {
        let lines = self
            .storage
            .list_lines_by_transaction(transaction.id)
            .await?;
        Ok(TransactionWithLines { transaction, lines })
    }

    async fn all_with_lines(
        &self,
        transactions: Vec<Transaction>,
    ) -> LedgerResult<Vec<TransactionWithLines>> {
        let mut result = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            result.push(self.with_lines(transaction).await?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BalanceCalculator;
    use crate::utils::memory_storage::MemoryStorage;
    use std::time::Duration;

    const OWNER: &str = "user-1";

    struct Fixture {
        storage: MemoryStorage,
        engine: TransactionEngine<MemoryStorage>,
        balances: BalanceCalculator<MemoryStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = MemoryStorage::new();
            let locks = Arc::new(KeyedLocks::new("transaction", Duration::from_secs(1)));
            Self {
                engine: TransactionEngine::new(storage.clone(), locks),
                balances: BalanceCalculator::new(storage.clone()),
                storage,
            }
        }

        async fn account(&self, kind: AccountKind, currency: &str, opening: i64) -> Account {
            let account = Account::new(NewAccount::new("Test", kind, currency, opening), OWNER);
            self.storage.create_account(&account).await.unwrap()
        }

        async fn balance(&self, account: &Account) -> i64 {
            self.balances.compute_balance(account.id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn transfer_moves_assets() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 1000).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;

        let txn = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 200), OWNER)
            .await
            .unwrap();

        assert_eq!(txn.lines.len(), 2);
        assert_eq!(txn.lines[0].direction, Direction::Debit);
        assert_eq!(txn.lines[1].direction, Direction::Credit);
        assert_eq!(fx.balance(&a).await, 800);
        assert_eq!(fx.balance(&b).await, 200);
    }

    #[tokio::test]
    async fn negative_amount_is_stored_as_absolute() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 0).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;

        let txn = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, -75), OWNER)
            .await
            .unwrap();
        assert!(txn.lines.iter().all(|line| line.amount_minor == 75));
    }

    #[tokio::test]
    async fn currency_mismatch_writes_nothing() {
        let fx = Fixture::new();
        let usd = fx.account(AccountKind::Asset, "USD", 500).await;
        let eur = fx.account(AccountKind::Asset, "EUR", 500).await;

        let err = fx
            .engine
            .create(TransactionSpec::transfer(usd.id, eur.id, 100), OWNER)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::CurrencyMismatch { .. }));
        assert_eq!(fx.balance(&usd).await, 500);
        assert_eq!(fx.balance(&eur).await, 500);
        assert_eq!(fx.engine.count(OWNER).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn accounts_of_other_owners_are_not_found() {
        let fx = Fixture::new();
        let mine = fx.account(AccountKind::Asset, "USD", 0).await;
        let theirs = Account::new(NewAccount::new("Other", AccountKind::Asset, "USD", 0), "user-2");
        fx.storage.create_account(&theirs).await.unwrap();

        let err = fx
            .engine
            .create(TransactionSpec::transfer(mine.id, theirs.id, 10), OWNER)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(id) if id == theirs.id));
    }

    #[tokio::test]
    async fn amount_is_required_with_accounts() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 0).await;
        let spec = TransactionSpec {
            kind: "transfer".to_string(),
            account_to: Some(a.id),
            ..TransactionSpec::default()
        };
        assert!(matches!(
            fx.engine.create(spec, OWNER).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn client_cannot_set_reversal_of() {
        let fx = Fixture::new();
        let spec = TransactionSpec {
            kind: "reversal".to_string(),
            reversal_of: Some(Uuid::new_v4()),
            ..TransactionSpec::default()
        };
        assert!(matches!(
            fx.engine.create(spec, OWNER).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_appends_compensations() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 1000).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;
        let c = fx.account(AccountKind::Asset, "USD", 0).await;
        let txn = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 200), OWNER)
            .await
            .unwrap();

        let patch = TransactionPatch {
            account_from: Some(Some(a.id)),
            account_to: Some(Some(c.id)),
            amount_minor: Some(300),
            description: Some(Some("moved to c".to_string())),
            ..TransactionPatch::default()
        };
        let updated = fx.engine.update(txn.transaction.id, patch, OWNER).await.unwrap();

        assert_eq!(updated.lines.len(), 6);
        assert_eq!(updated.transaction.description.as_deref(), Some("moved to c"));
        assert_eq!(fx.balance(&a).await, 700);
        assert_eq!(fx.balance(&b).await, 0);
        assert_eq!(fx.balance(&c).await, 300);
    }

    #[tokio::test]
    async fn update_rejects_reversal_of_change() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 0).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;
        let txn = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 5), OWNER)
            .await
            .unwrap();

        let patch = TransactionPatch {
            reversal_of: Some(Some(Uuid::new_v4())),
            account_to: Some(Some(b.id)),
            amount_minor: Some(5),
            ..TransactionPatch::default()
        };
        assert!(matches!(
            fx.engine.update(txn.transaction.id, patch, OWNER).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_without_account_fields_is_rejected() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 0).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;
        let txn = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 5), OWNER)
            .await
            .unwrap();

        let patch = TransactionPatch {
            kind: Some("fee".to_string()),
            amount_minor: Some(10),
            ..TransactionPatch::default()
        };
        assert!(matches!(
            fx.engine.update(txn.transaction.id, patch, OWNER).await,
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(fx.storage.line_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn reverse_restores_balances_once() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 1000).await;
        let b = fx.account(AccountKind::Liability, "USD", 50).await;
        let txn = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 200), OWNER)
            .await
            .unwrap();
        assert_eq!(fx.balance(&b).await, -150);

        let reversal = fx
            .engine
            .reverse_transaction(txn.transaction.id, OWNER)
            .await
            .unwrap();
        assert_eq!(reversal.transaction.kind, "reversal");
        assert_eq!(reversal.transaction.reversal_of, Some(txn.transaction.id));
        assert_eq!(fx.balance(&a).await, 1000);
        assert_eq!(fx.balance(&b).await, 50);

        let original = fx.engine.get(txn.transaction.id, OWNER).await.unwrap();
        assert_eq!(original.transaction.reversed_by, Some(reversal.transaction.id));
        assert_eq!(original.transaction.state(), TransactionState::Reversed);

        assert!(matches!(
            fx.engine.reverse_transaction(txn.transaction.id, OWNER).await,
            Err(LedgerError::Conflict(_))
        ));
        assert!(matches!(
            fx.engine
                .reverse_transaction(reversal.transaction.id, OWNER)
                .await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn remove_refuses_transactions_with_lines() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 0).await;
        let txn = fx
            .engine
            .create(
                TransactionSpec {
                    kind: "deposit".to_string(),
                    account_to: Some(a.id),
                    amount_minor: Some(10),
                    ..TransactionSpec::default()
                },
                OWNER,
            )
            .await
            .unwrap();

        assert!(matches!(
            fx.engine.remove(txn.transaction.id, OWNER).await,
            Err(LedgerError::Conflict(_))
        ));

        let empty = Transaction::new(OWNER, "note".to_string(), chrono::Utc::now().date_naive());
        fx.storage.create_transaction(&empty).await.unwrap();
        fx.engine.remove(empty.id, OWNER).await.unwrap();
        assert!(matches!(
            fx.engine.get(empty.id, OWNER).await,
            Err(LedgerError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn amended_lines_are_stamped_in_append_order() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 100).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;
        let txn = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 5), OWNER)
            .await
            .unwrap();

        for amount in [9, 3] {
            let patch = TransactionPatch {
                account_from: Some(Some(a.id)),
                account_to: Some(Some(b.id)),
                amount_minor: Some(amount),
                ..TransactionPatch::default()
            };
            fx.engine.update(txn.transaction.id, patch, OWNER).await.unwrap();
        }

        let lines = fx
            .storage
            .list_lines_by_transaction(txn.transaction.id)
            .await
            .unwrap();
        assert_eq!(lines.len(), 14);
        assert!(lines
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at));
        for account_id in [a.id, b.id] {
            let by_account = fx.storage.list_lines_by_account(account_id).await.unwrap();
            assert!(by_account
                .windows(2)
                .all(|pair| pair[0].created_at <= pair[1].created_at));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reversals_succeed_once() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 100).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;
        let transaction_id = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 40), OWNER)
            .await
            .unwrap()
            .transaction
            .id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = fx.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.reverse_transaction(transaction_id, OWNER).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, LedgerError::Conflict(_)), "{err}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(fx.balance(&a).await, 100);
        assert_eq!(fx.balance(&b).await, 0);
        assert_eq!(fx.engine.count(OWNER).await.unwrap(), 2);
        let reversals = fx
            .engine
            .list(OWNER)
            .await
            .unwrap()
            .into_iter()
            .filter(|txn| txn.transaction.reversal_of == Some(transaction_id))
            .count();
        assert_eq!(reversals, 1);
        assert_eq!(fx.storage.line_count().unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_serialised() {
        let fx = Fixture::new();
        let a = fx.account(AccountKind::Asset, "USD", 1000).await;
        let b = fx.account(AccountKind::Asset, "USD", 0).await;
        let transaction_id = fx
            .engine
            .create(TransactionSpec::transfer(a.id, b.id, 1), OWNER)
            .await
            .unwrap()
            .transaction
            .id;

        let amounts = [10_i64, 20, 30, 40];
        let mut handles = Vec::new();
        for amount in amounts {
            let engine = fx.engine.clone();
            let (from, to) = (a.id, b.id);
            handles.push(tokio::spawn(async move {
                let patch = TransactionPatch {
                    account_from: Some(Some(from)),
                    account_to: Some(Some(to)),
                    amount_minor: Some(amount),
                    ..TransactionPatch::default()
                };
                engine.update(transaction_id, patch, OWNER).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // each amendment doubles the lines and adds two
        assert_eq!(fx.storage.line_count().unwrap(), 62);
        let latest = fx.engine.get(transaction_id, OWNER).await.unwrap();
        let net = latest.net_effect_on(b.id, AccountKind::Asset).unwrap();
        assert!(amounts.contains(&net));
        assert_eq!(fx.balance(&b).await, net);
        assert_eq!(fx.balance(&a).await, 1000 - net);
    }

    #[tokio::test]
    async fn range_is_validated() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.engine.list_in_range(OWNER, 0, 3).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(fx.engine.list_in_range(OWNER, 1, 3).await.unwrap().is_empty());
    }
}
