//! Balance computation from opening balance and ledger lines

use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

/// Folds an account's opening balance with its lines into a current balance.
///
/// The sign rule is [`AccountKind::signed_effect`]: for assets credits add and
/// debits subtract, for liabilities the reverse. Adjustment synthesis uses the
/// inverse of the same rule, so the two can never disagree.
#[derive(Debug, Clone)]
pub struct BalanceCalculator<S: LedgerStorage> {
    storage: S,
}

impl<S: LedgerStorage> BalanceCalculator<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Current balance of an account
    pub async fn compute_balance(&self, account_id: Uuid) -> LedgerResult<i64> {
        let snapshot = self
            .storage
            .account_snapshot(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        let balance = Self::fold(&snapshot)?;
        tracing::debug!(%account_id, balance, lines = snapshot.lines.len(), "computed balance");
        Ok(balance)
    }

    /// An account the caller owns, with its balance computed from the same
    /// read
    pub async fn account_view(&self, account_id: Uuid, owner_id: &str) -> LedgerResult<AccountView> {
        let snapshot = self
            .storage
            .account_snapshot(account_id)
            .await?
            .filter(|snapshot| snapshot.account.is_owned_by(owner_id))
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        let current_balance_minor = Self::fold(&snapshot)?;
        Ok(AccountView {
            account: snapshot.account,
            current_balance_minor,
        })
    }

    /// Balance of a snapshot. Line order does not matter.
    pub fn fold(snapshot: &AccountSnapshot) -> LedgerResult<i64> {
        let account = &snapshot.account;
        let (debit_sum, credit_sum) = snapshot
            .lines
            .iter()
            .filter(|line| line.account_id == account.id)
            .fold((0_i128, 0_i128), |(debits, credits), line| match line.direction {
                Direction::Debit => (debits + i128::from(line.amount_minor), credits),
                Direction::Credit => (debits, credits + i128::from(line.amount_minor)),
            });

        let movement = match account.kind {
            AccountKind::Liability => debit_sum - credit_sum,
            AccountKind::Asset => credit_sum - debit_sum,
        };

        i64::try_from(i128::from(account.balance_minor) + movement).map_err(|_| {
            LedgerError::Overflow(format!("balance of account {} exceeds i64", account.id))
        })
    }
}
