//! Account management functionality

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Account registry handling account lifecycle operations
pub struct AccountRegistry<S: LedgerStorage> {
    storage: S,
    validator: Arc<dyn AccountValidator>,
}

impl<S: LedgerStorage> AccountRegistry<S> {
    /// Create a new account registry
    pub fn new(storage: S) -> Self {
        Self::with_validator(storage, Arc::new(DefaultAccountValidator))
    }

    /// Create a new account registry with custom validator
    pub fn with_validator(storage: S, validator: Arc<dyn AccountValidator>) -> Self {
        Self { storage, validator }
    }

    /// Create a new account owned by `owner_id`
    #[instrument(skip(self, input), fields(name = %input.name), err)]
    pub async fn create_account(&self, input: NewAccount, owner_id: &str) -> LedgerResult<Account> {
        let account = Account::new(input, owner_id);
        self.validator.validate_account(&account)?;

        let created = self.storage.create_account(&account).await?;
        tracing::info!(account_id = %created.id, kind = ?created.kind, "account created");
        Ok(created)
    }

    /// Get an account, treating other owners' accounts as missing
    pub async fn get_account(&self, account_id: Uuid, owner_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .filter(|account| account.is_owned_by(owner_id))
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// List an owner's accounts
    pub async fn list_accounts(&self, owner_id: &str) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(Some(owner_id)).await
    }

    /// The account as it would look after `patch`, validated but not stored.
    ///
    /// `balance_minor` is left alone; overrides go through adjustment
    /// synthesis.
    pub async fn patched(
        &self,
        account_id: Uuid,
        patch: &AccountPatch,
        owner_id: &str,
    ) -> LedgerResult<Account> {
        let mut account = self.get_account(account_id, owner_id).await?;

        if let Some(name) = &patch.name {
            account.name = name.clone();
        }
        if let Some(kind) = patch.kind {
            account.kind = kind;
        }
        if let Some(account_type) = &patch.account_type {
            account.account_type = account_type.clone();
        }
        if let Some(currency) = &patch.base_currency {
            account.base_currency = currency.to_ascii_uppercase();
        }
        if let Some(number) = &patch.number_full {
            account.number_masked = Some(mask_number(number));
            account.number_full = Some(number.clone());
        }
        if let Some(limit) = patch.credit_limit_minor {
            account.credit_limit_minor = limit;
        }
        if let Some(status) = patch.status {
            account.status = status;
        }
        if let Some(metadata) = &patch.metadata {
            account.metadata = metadata.clone();
        }

        self.validator.validate_account(&account)?;
        account.updated_at = chrono::Utc::now().naive_utc();
        Ok(account)
    }

    /// The full account number, for its owner only
    pub async fn get_account_number(
        &self,
        account_id: Uuid,
        owner_id: &str,
    ) -> LedgerResult<Option<String>> {
        Ok(self.get_account(account_id, owner_id).await?.number_full)
    }

    /// Store a patched account. The caller must hold the account's lock.
    ///
    /// Kind and currency are frozen once lines reference the account; a
    /// change to either also requires that no line lands before the commit.
    pub(crate) async fn commit_update(&self, account: Account) -> LedgerResult<Account> {
        let snapshot = self
            .storage
            .account_snapshot(account.id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account.id))?;

        let mut changes = ChangeSet::new();
        if snapshot.account.reinterprets_history(&account) {
            if !snapshot.lines.is_empty() {
                return Err(LedgerError::Conflict(format!(
                    "account {} has lines; kind and base_currency are fixed",
                    account.id
                )));
            }
            changes.require(Precondition::AccountLineCount {
                account_id: account.id,
                expected: 0,
            });
        }
        changes.update_account(account.clone());
        self.storage.commit(changes).await?;

        tracing::info!(account_id = %account.id, "account updated");
        Ok(account)
    }

    /// Delete an account that no line references.
    /// The caller must hold the account's lock.
    #[instrument(skip(self), err)]
    pub async fn delete_account(&self, account_id: Uuid, owner_id: &str) -> LedgerResult<()> {
        self.get_account(account_id, owner_id).await?;

        let lines = self.storage.list_lines_by_account(account_id).await?;
        if !lines.is_empty() {
            return Err(LedgerError::Conflict(format!(
                "account {account_id} is referenced by {} lines",
                lines.len()
            )));
        }

        self.storage.delete_account(account_id).await?;
        tracing::info!(%account_id, "account deleted");
        Ok(())
    }
}
