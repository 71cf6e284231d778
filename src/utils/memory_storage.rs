//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Transaction>,
    /// Append order, which is also `created_at` order
    lines: Vec<Line>,
}

impl State {
    fn lines_for_account(&self, account_id: Uuid) -> impl Iterator<Item = &Line> {
        self.lines.iter().filter(move |line| line.account_id == account_id)
    }

    fn lines_for_transaction(&self, transaction_id: Uuid) -> impl Iterator<Item = &Line> {
        self.lines
            .iter()
            .filter(move |line| line.transaction_id == transaction_id)
    }

    fn check(&self, precondition: &Precondition) -> LedgerResult<()> {
        match precondition {
            Precondition::AccountLineCount {
                account_id,
                expected,
            } => {
                let actual = self.lines_for_account(*account_id).count();
                if actual != *expected {
                    return Err(LedgerError::StaleRead(format!(
                        "account {account_id} has {actual} lines, expected {expected}"
                    )));
                }
            }
            Precondition::TransactionLineCount {
                transaction_id,
                expected,
            } => {
                let actual = self.lines_for_transaction(*transaction_id).count();
                if actual != *expected {
                    return Err(LedgerError::StaleRead(format!(
                        "transaction {transaction_id} has {actual} lines, expected {expected}"
                    )));
                }
            }
            Precondition::TransactionNotReversed(transaction_id) => {
                match self.transactions.get(transaction_id) {
                    Some(txn) if txn.reversed_by.is_none() => {}
                    Some(_) => {
                        return Err(LedgerError::StaleRead(format!(
                            "transaction {transaction_id} was reversed concurrently"
                        )))
                    }
                    None => {
                        return Err(LedgerError::StaleRead(format!(
                            "transaction {transaction_id} no longer exists"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Constraint checks for a whole change set, without mutating anything
    fn validate(&self, ops: &[StoreOp]) -> LedgerResult<()> {
        let mut inserted: HashSet<Uuid> = HashSet::new();
        let mut line_ids: HashSet<Uuid> = HashSet::new();

        for op in ops {
            match op {
                StoreOp::InsertTransaction(txn) => {
                    if self.transactions.contains_key(&txn.id) || !inserted.insert(txn.id) {
                        return Err(LedgerError::Storage(format!(
                            "duplicate transaction id {}",
                            txn.id
                        )));
                    }
                }
                StoreOp::UpdateTransaction(txn) => {
                    if !self.transactions.contains_key(&txn.id) && !inserted.contains(&txn.id) {
                        return Err(LedgerError::Storage(format!(
                            "update of missing transaction {}",
                            txn.id
                        )));
                    }
                }
                StoreOp::AppendLine(line) => {
                    if line.amount_minor <= 0 {
                        return Err(LedgerError::Storage(format!(
                            "line {} has non-positive amount {}",
                            line.id, line.amount_minor
                        )));
                    }
                    if !self.accounts.contains_key(&line.account_id) {
                        return Err(LedgerError::Storage(format!(
                            "line {} references missing account {}",
                            line.id, line.account_id
                        )));
                    }
                    if !self.transactions.contains_key(&line.transaction_id)
                        && !inserted.contains(&line.transaction_id)
                    {
                        return Err(LedgerError::Storage(format!(
                            "line {} references missing transaction {}",
                            line.id, line.transaction_id
                        )));
                    }
                    let duplicate = self.lines.iter().any(|existing| existing.id == line.id);
                    if duplicate || !line_ids.insert(line.id) {
                        return Err(LedgerError::Storage(format!(
                            "duplicate line id {}",
                            line.id
                        )));
                    }
                }
                StoreOp::UpdateAccount(account) => {
                    if !self.accounts.contains_key(&account.id) {
                        return Err(LedgerError::Storage(format!(
                            "update of missing account {}",
                            account.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, ops: Vec<StoreOp>) {
        for op in ops {
            match op {
                StoreOp::InsertTransaction(txn) | StoreOp::UpdateTransaction(txn) => {
                    self.transactions.insert(txn.id, txn);
                }
                StoreOp::AppendLine(line) => self.lines.push(line),
                StoreOp::UpdateAccount(account) => {
                    self.accounts.insert(account.id, account);
                }
            }
        }
    }
}

/// In-memory storage implementation for testing and development.
///
/// Clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> LedgerResult<()> {
        *self.write()? = State::default();
        Ok(())
    }

    /// Total number of stored lines across all accounts
    pub fn line_count(&self) -> LedgerResult<usize> {
        Ok(self.read()?.lines.len())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryStorage {
    async fn get_account(&self, account_id: Uuid) -> LedgerResult<Option<Account>> {
        Ok(self.read()?.accounts.get(&account_id).cloned())
    }

    async fn list_accounts(&self, owner_id: Option<&str>) -> LedgerResult<Vec<Account>> {
        let state = self.read()?;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| owner_id.is_none_or(|owner| account.is_owned_by(owner)))
            .cloned()
            .collect();
        accounts.sort_by_key(|account| account.created_at);
        Ok(accounts)
    }

    async fn create_account(&self, account: &Account) -> LedgerResult<Account> {
        let mut state = self.write()?;
        if state.accounts.contains_key(&account.id) {
            return Err(LedgerError::Storage(format!(
                "duplicate account id {}",
                account.id
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn update_account(&self, account: &Account) -> LedgerResult<Account> {
        let mut state = self.write()?;
        match state.accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(account.clone())
            }
            None => Err(LedgerError::AccountNotFound(account.id)),
        }
    }

    async fn delete_account(&self, account_id: Uuid) -> LedgerResult<()> {
        let mut state = self.write()?;
        if state.lines_for_account(account_id).next().is_some() {
            return Err(LedgerError::Storage(format!(
                "account {account_id} is still referenced by lines"
            )));
        }
        match state.accounts.remove(&account_id) {
            Some(_) => Ok(()),
            None => Err(LedgerError::AccountNotFound(account_id)),
        }
    }
}

#[async_trait]
impl LineStore for MemoryStorage {
    async fn append_line(&self, line: &Line) -> LedgerResult<Line> {
        let mut changes = ChangeSet::new();
        changes.append_lines([line.clone()]);
        self.commit(changes).await?;
        Ok(line.clone())
    }

    async fn list_lines_by_account(&self, account_id: Uuid) -> LedgerResult<Vec<Line>> {
        Ok(self.read()?.lines_for_account(account_id).cloned().collect())
    }

    async fn list_lines_by_transaction(&self, transaction_id: Uuid) -> LedgerResult<Vec<Line>> {
        Ok(self
            .read()?
            .lines_for_transaction(transaction_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionStore for MemoryStorage {
    async fn create_transaction(&self, transaction: &Transaction) -> LedgerResult<Transaction> {
        let mut changes = ChangeSet::new();
        changes.insert_transaction(transaction.clone());
        self.commit(changes).await?;
        Ok(transaction.clone())
    }

    async fn get_transaction(
        &self,
        transaction_id: Uuid,
        owner_id: Option<&str>,
    ) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .get(&transaction_id)
            .filter(|txn| owner_id.is_none_or(|owner| txn.is_owned_by(owner)))
            .cloned())
    }

    async fn update_transaction(&self, transaction: &Transaction) -> LedgerResult<Transaction> {
        let mut state = self.write()?;
        match state.transactions.get_mut(&transaction.id) {
            Some(existing) => {
                *existing = transaction.clone();
                Ok(transaction.clone())
            }
            None => Err(LedgerError::TransactionNotFound(transaction.id)),
        }
    }

    async fn delete_transaction(&self, transaction_id: Uuid) -> LedgerResult<()> {
        let mut state = self.write()?;
        if state.lines_for_transaction(transaction_id).next().is_some() {
            return Err(LedgerError::Storage(format!(
                "transaction {transaction_id} is still referenced by lines"
            )));
        }
        match state.transactions.remove(&transaction_id) {
            Some(_) => Ok(()),
            None => Err(LedgerError::TransactionNotFound(transaction_id)),
        }
    }

    async fn list_transactions(
        &self,
        owner_id: &str,
        skip: usize,
        take: Option<usize>,
    ) -> LedgerResult<Vec<Transaction>> {
        let state = self.read()?;
        let mut transactions: Vec<&Transaction> = state
            .transactions
            .values()
            .filter(|txn| txn.is_owned_by(owner_id))
            .collect();
        transactions.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(transactions
            .into_iter()
            .skip(skip)
            .take(take.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count_transactions(&self, owner_id: &str) -> LedgerResult<u64> {
        let count = self
            .read()?
            .transactions
            .values()
            .filter(|txn| txn.is_owned_by(owner_id))
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn commit(&self, changes: ChangeSet) -> LedgerResult<()> {
        let ChangeSet { preconditions, ops } = changes;
        let mut state = self.write()?;
        for precondition in &preconditions {
            state.check(precondition)?;
        }
        state.validate(&ops)?;
        state.apply(ops);
        Ok(())
    }

    async fn account_snapshot(&self, account_id: Uuid) -> LedgerResult<Option<AccountSnapshot>> {
        let state = self.read()?;
        Ok(state.accounts.get(&account_id).map(|account| AccountSnapshot {
            account: account.clone(),
            lines: state.lines_for_account(account_id).cloned().collect(),
        }))
    }
}
