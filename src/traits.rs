//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::*;
use crate::utils::validation;

/// Account rows
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Get an account by ID
    async fn get_account(&self, account_id: Uuid) -> LedgerResult<Option<Account>>;

    /// List accounts, optionally restricted to one owner
    async fn list_accounts(&self, owner_id: Option<&str>) -> LedgerResult<Vec<Account>>;

    /// Insert a new account
    async fn create_account(&self, account: &Account) -> LedgerResult<Account>;

    /// Replace an existing account row
    async fn update_account(&self, account: &Account) -> LedgerResult<Account>;

    /// Delete an account. Fails while any line references it.
    async fn delete_account(&self, account_id: Uuid) -> LedgerResult<()>;
}

/// Append-only line storage
#[async_trait]
pub trait LineStore: Send + Sync {
    /// Append a single line
    async fn append_line(&self, line: &Line) -> LedgerResult<Line>;

    /// All lines on an account, oldest first
    async fn list_lines_by_account(&self, account_id: Uuid) -> LedgerResult<Vec<Line>>;

    /// All lines of a transaction, oldest first
    async fn list_lines_by_transaction(&self, transaction_id: Uuid) -> LedgerResult<Vec<Line>>;
}

/// Transaction headers
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction header
    async fn create_transaction(&self, transaction: &Transaction) -> LedgerResult<Transaction>;

    /// Get a transaction by ID. With an owner filter, transactions owned by
    /// anyone else are reported as absent.
    async fn get_transaction(
        &self,
        transaction_id: Uuid,
        owner_id: Option<&str>,
    ) -> LedgerResult<Option<Transaction>>;

    /// Replace an existing transaction header
    async fn update_transaction(&self, transaction: &Transaction) -> LedgerResult<Transaction>;

    /// Delete a transaction header. Fails while any line references it.
    async fn delete_transaction(&self, transaction_id: Uuid) -> LedgerResult<()>;

    /// An owner's transactions, newest date first (ties: newest created first),
    /// skipping `skip` rows and returning at most `take`.
    async fn list_transactions(
        &self,
        owner_id: &str,
        skip: usize,
        take: Option<usize>,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Number of transactions an owner has
    async fn count_transactions(&self, owner_id: &str) -> LedgerResult<u64>;
}

/// Full storage backend for the ledger.
///
/// Any backend (PostgreSQL, SQLite, in-memory, ...) can drive the engine by
/// implementing the three row stores plus an atomic [`LedgerStorage::commit`].
#[async_trait]
pub trait LedgerStorage: AccountStore + LineStore + TransactionStore {
    /// Apply every op in `changes` as one atomic unit.
    ///
    /// All preconditions are checked first and fail with
    /// [`LedgerError::StaleRead`]. Constraint violations (non-positive line
    /// amounts, dangling references, duplicate ids) fail with
    /// [`LedgerError::Storage`]. On any error nothing is applied.
    async fn commit(&self, changes: ChangeSet) -> LedgerResult<()>;

    /// An account and all its lines, read together.
    ///
    /// The default reads the two separately; backends that can should
    /// override it with a single consistent read.
    async fn account_snapshot(&self, account_id: Uuid) -> LedgerResult<Option<AccountSnapshot>> {
        let Some(account) = self.get_account(account_id).await? else {
            return Ok(None);
        };
        let lines = self.list_lines_by_account(account_id).await?;
        Ok(Some(AccountSnapshot { account, lines }))
    }
}

/// An account and the lines that were on it at read time
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub account: Account,
    pub lines: Vec<Line>,
}

/// One row write inside a [`ChangeSet`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    InsertTransaction(Transaction),
    UpdateTransaction(Transaction),
    AppendLine(Line),
    UpdateAccount(Account),
}

/// Optimistic checks evaluated inside the commit, before any write
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The account still has exactly this many lines
    AccountLineCount { account_id: Uuid, expected: usize },
    /// The transaction still has exactly this many lines
    TransactionLineCount { transaction_id: Uuid, expected: usize },
    /// The transaction exists and has not been reversed
    TransactionNotReversed(Uuid),
}

/// A unit of work: everything in it commits together or not at all
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<StoreOp>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, precondition: Precondition) -> &mut Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn insert_transaction(&mut self, transaction: Transaction) -> &mut Self {
        self.ops.push(StoreOp::InsertTransaction(transaction));
        self
    }

    pub fn update_transaction(&mut self, transaction: Transaction) -> &mut Self {
        self.ops.push(StoreOp::UpdateTransaction(transaction));
        self
    }

    pub fn append_lines(&mut self, lines: impl IntoIterator<Item = Line>) -> &mut Self {
        self.ops.extend(lines.into_iter().map(StoreOp::AppendLine));
        self
    }

    pub fn update_account(&mut self, account: Account) -> &mut Self {
        self.ops.push(StoreOp::UpdateAccount(account));
        self
    }

    /// Append everything from `other` after what is already here
    pub fn extend(&mut self, other: ChangeSet) -> &mut Self {
        self.preconditions.extend(other.preconditions);
        self.ops.extend(other.ops);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Lines appended by this change set, in order
    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.ops.iter().filter_map(|op| match op {
            StoreOp::AppendLine(line) => Some(line),
            _ => None,
        })
    }
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before it is created or updated
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;
}

/// Trait for implementing custom transaction validation rules.
///
/// These checks need no storage access; account existence and currency
/// pairing are checked by the engine.
pub trait TransactionValidator: Send + Sync {
    /// Validate a transaction before it is created
    fn validate_spec(&self, spec: &TransactionSpec) -> LedgerResult<()>;

    /// Validate a patch before it is applied
    fn validate_patch(&self, patch: &TransactionPatch) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        validation::validate_account_name(&account.name)?;
        validation::validate_currency_code(&account.base_currency)?;
        if let Some(limit) = account.credit_limit_minor {
            validation::validate_credit_limit(limit)?;
        }
        Ok(())
    }
}

/// Default transaction validator
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate_spec(&self, spec: &TransactionSpec) -> LedgerResult<()> {
        validation::validate_transaction_kind(&spec.kind)?;
        if let Some(amount) = spec.amount_minor {
            validation::validate_amount(amount)?;
        }
        if spec.account_from.is_none() && spec.account_to.is_none() && spec.reversal_of.is_none()
        {
            return Err(LedgerError::Validation(
                "At least one of account_from, account_to or reversal_of is required".to_string(),
            ));
        }
        if let Some(description) = &spec.description {
            validation::validate_transaction_description(description)?;
        }
        Ok(())
    }

    fn validate_patch(&self, patch: &TransactionPatch) -> LedgerResult<()> {
        if let Some(amount) = patch.amount_minor {
            validation::validate_amount(amount)?;
        }
        if !patch.touches_accounts() {
            return Err(LedgerError::Validation(
                "An update must set account_from or account_to (null clears it)".to_string(),
            ));
        }
        if let Some(kind) = &patch.kind {
            validation::validate_transaction_kind(kind)?;
        }
        if let Some(Some(description)) = &patch.description {
            validation::validate_transaction_description(description)?;
        }
        Ok(())
    }
}
