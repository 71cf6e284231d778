//! Core types and data structures for the ledger

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Account kinds supported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Assets - what the holder owns (cash, savings, receivables, etc.)
    Asset,
    /// Liabilities - what the holder owes (credit cards, loans, etc.)
    Liability,
}

impl AccountKind {
    /// Signed effect of one line on an account of this kind.
    ///
    /// Assets: credit increases the balance, debit decreases it.
    /// Liabilities: debit increases the balance, credit decreases it.
    pub fn signed_effect(&self, direction: Direction, amount_minor: i64) -> i64 {
        match (self, direction) {
            (AccountKind::Asset, Direction::Credit) | (AccountKind::Liability, Direction::Debit) => {
                amount_minor
            }
            (AccountKind::Asset, Direction::Debit) | (AccountKind::Liability, Direction::Credit) => {
                -amount_minor
            }
        }
    }

    /// Line direction that moves the balance of an account of this kind by
    /// `delta`. Returns `None` when there is nothing to move.
    ///
    /// This is the inverse of [`AccountKind::signed_effect`].
    pub fn direction_for(&self, delta: i64) -> Option<Direction> {
        match delta.signum() {
            0 => None,
            1 => Some(match self {
                AccountKind::Asset => Direction::Credit,
                AccountKind::Liability => Direction::Debit,
            }),
            _ => Some(match self {
                AccountKind::Asset => Direction::Debit,
                AccountKind::Liability => Direction::Credit,
            }),
        }
    }
}

/// Side of a ledger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    /// The other side
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }
}

/// Lifecycle status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Closed,
}

/// Core account structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for the account
    pub id: Uuid,
    /// Caller that owns the account
    pub owner_id: String,
    /// Human-readable account name
    pub name: String,
    /// Asset or liability
    pub kind: AccountKind,
    /// Free-form sub-type ("checking", "credit_card", ...)
    pub account_type: Option<String>,
    /// ISO-4217 style three letter code
    pub base_currency: String,
    /// Account number with everything but the last four characters masked
    pub number_masked: Option<String>,
    /// Full account number; never serialized into views
    #[serde(default, skip_serializing)]
    pub number_full: Option<String>,
    /// Opening balance. Never touched by line activity.
    #[serde(with = "minor_units")]
    pub balance_minor: i64,
    #[serde(default, with = "minor_units::option")]
    pub credit_limit_minor: Option<i64>,
    #[serde(default)]
    pub status: AccountStatus,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When the account was created
    pub created_at: NaiveDateTime,
    /// When the account was last updated
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new account from validated input
    pub fn new(input: NewAccount, owner_id: &str) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            name: input.name,
            kind: input.kind,
            account_type: input.account_type,
            base_currency: input.base_currency.to_ascii_uppercase(),
            number_masked: input.number_full.as_deref().map(mask_number),
            number_full: input.number_full,
            balance_minor: input.balance_minor,
            credit_limit_minor: input.credit_limit_minor,
            status: input.status.unwrap_or_default(),
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `other` reads existing lines differently from `self`
    /// (a kind flip or a currency change).
    pub fn reinterprets_history(&self, other: &Account) -> bool {
        self.kind != other.kind || self.base_currency != other.base_currency
    }

    pub(crate) fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// Mask all but the last four characters of an account number
pub fn mask_number(full: &str) -> String {
    let chars: Vec<char> = full.chars().collect();
    let keep = chars.len().min(4);
    let masked = chars.len() - keep;
    "*".repeat(masked) + &chars[masked..].iter().collect::<String>()
}

/// Where a transaction sits in its reversal lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Can be amended or reversed
    Active,
    /// Has been reversed exactly once; terminal
    Reversed,
    /// Is itself a reversal; terminal
    IsReversal,
}

/// Transaction header. Money movements live in its [`Line`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: Uuid,
    /// Caller that owns the transaction
    pub owner_id: String,
    /// Free-form tag: "transfer", "adjustment", "reversal", ...
    pub kind: String,
    /// Business date of the transaction
    pub date: NaiveDate,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Original transaction this one reverses. Engine-managed.
    pub reversal_of: Option<Uuid>,
    /// Transaction that reversed this one. Engine-managed.
    pub reversed_by: Option<Uuid>,
    /// When the transaction was created
    pub created_at: NaiveDateTime,
    /// When the transaction was last updated
    pub updated_at: NaiveDateTime,
}

impl Transaction {
    /// Create a new transaction header
    pub fn new(owner_id: &str, kind: String, date: NaiveDate) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            kind,
            date,
            description: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            reversal_of: None,
            reversed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> TransactionState {
        if self.reversal_of.is_some() {
            TransactionState::IsReversal
        } else if self.reversed_by.is_some() {
            TransactionState::Reversed
        } else {
            TransactionState::Active
        }
    }

    pub(crate) fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// One debit or credit on one account, tied to one transaction.
///
/// Lines are append-only: they are never updated or deleted once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub direction: Direction,
    /// Strictly positive
    #[serde(with = "minor_units")]
    pub amount_minor: i64,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Line {
    /// Create a new line
    pub fn new(
        transaction_id: Uuid,
        account_id: Uuid,
        direction: Direction,
        amount_minor: i64,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            account_id,
            direction,
            amount_minor,
            note,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Create a debit line
    pub fn debit(transaction_id: Uuid, account_id: Uuid, amount_minor: i64) -> Self {
        Self::new(transaction_id, account_id, Direction::Debit, amount_minor, None)
    }

    /// Create a credit line
    pub fn credit(transaction_id: Uuid, account_id: Uuid, amount_minor: i64) -> Self {
        Self::new(transaction_id, account_id, Direction::Credit, amount_minor, None)
    }

    /// A new line on `transaction_id` that cancels this one: same account,
    /// amount and note, opposite direction.
    pub fn mirrored(&self, transaction_id: Uuid) -> Self {
        Self::new(
            transaction_id,
            self.account_id,
            self.direction.opposite(),
            self.amount_minor,
            self.note.clone(),
        )
    }
}

/// Validated input for creating an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    #[serde(default)]
    pub name: String,
    pub kind: AccountKind,
    #[serde(default)]
    pub account_type: Option<String>,
    pub base_currency: String,
    #[serde(default)]
    pub number_full: Option<String>,
    #[serde(with = "minor_units")]
    pub balance_minor: i64,
    #[serde(default, with = "minor_units::option")]
    pub credit_limit_minor: Option<i64>,
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NewAccount {
    pub fn new(name: &str, kind: AccountKind, base_currency: &str, balance_minor: i64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            account_type: None,
            base_currency: base_currency.to_string(),
            number_full: None,
            balance_minor,
            credit_limit_minor: None,
            status: None,
            metadata: HashMap::new(),
        }
    }
}

/// Partial update of an account.
///
/// `balance_minor` is a balance *override*: it never rewrites the opening
/// balance, it is reconciled into an adjustment transaction instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<AccountKind>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub account_type: Option<Option<String>>,
    #[serde(default)]
    pub base_currency: Option<String>,
    #[serde(default)]
    pub number_full: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "minor_units::double_option")]
    pub credit_limit_minor: Option<Option<i64>>,
    #[serde(default, with = "minor_units::option")]
    pub balance_minor: Option<i64>,
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

/// Validated input for creating a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionSpec {
    pub kind: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Account debited
    #[serde(default)]
    pub account_from: Option<Uuid>,
    /// Account credited
    #[serde(default)]
    pub account_to: Option<Uuid>,
    /// Non-zero; the sign is dropped, lines always carry the absolute value
    #[serde(default, with = "minor_units::option")]
    pub amount_minor: Option<i64>,
    #[serde(default)]
    pub reversal_of: Option<Uuid>,
}

impl TransactionSpec {
    /// A two-sided transfer from one account to another
    pub fn transfer(account_from: Uuid, account_to: Uuid, amount_minor: i64) -> Self {
        Self {
            kind: "transfer".to_string(),
            account_from: Some(account_from),
            account_to: Some(account_to),
            amount_minor: Some(amount_minor),
            ..Self::default()
        }
    }
}

/// Partial update of a transaction.
///
/// `account_from` / `account_to` distinguish "not touched" (`None`) from
/// "explicitly cleared" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPatch {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub account_from: Option<Option<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub account_to: Option<Option<Uuid>>,
    #[serde(default, with = "minor_units::option")]
    pub amount_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub reversal_of: Option<Option<Uuid>>,
}

impl TransactionPatch {
    pub fn touches_accounts(&self) -> bool {
        self.account_from.is_some() || self.account_to.is_some()
    }
}

/// Account together with its computed balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub account: Account,
    /// Opening balance folded with every line on the account
    #[serde(with = "minor_units")]
    pub current_balance_minor: i64,
}

/// Transaction together with all of its lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionWithLines {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub lines: Vec<Line>,
}

impl TransactionWithLines {
    /// Net signed effect of this transaction's lines on one account
    pub fn net_effect_on(&self, account_id: Uuid, kind: AccountKind) -> LedgerResult<i64> {
        let net: i128 = self
            .lines
            .iter()
            .filter(|line| line.account_id == account_id)
            .map(|line| i128::from(kind.signed_effect(line.direction, line.amount_minor)))
            .sum();
        i64::try_from(net).map_err(|_| {
            LedgerError::Overflow(format!(
                "net effect of transaction {} on account {account_id} exceeds i64",
                self.transaction.id
            ))
        })
    }
}

/// Result of an account update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub account: AccountView,
    /// Adjustment synthesized for a balance override, if one was needed
    pub adjustment: Option<TransactionWithLines>,
}

/// Serde helpers for minor-unit amounts.
///
/// Amounts serialize as decimal strings so text formats never lose 64-bit
/// precision, and deserialize from either a string or an integer.
pub mod minor_units {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i64),
        Text(String),
    }

    fn parse<E: de::Error>(repr: Repr) -> Result<i64, E> {
        match repr {
            Repr::Int(value) => Ok(value),
            Repr::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid minor-unit amount: {text:?}"))),
        }
    }

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        parse(Repr::deserialize(deserializer)?)
    }

    pub mod option {
        use super::{parse, Repr};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<i64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.collect_str(value),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<i64>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(parse)
                .transpose()
        }
    }

    pub mod double_option {
        use serde::{Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Option<i64>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            super::option::serialize(&value.flatten(), serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Option<i64>>, D::Error> {
            super::option::deserialize(deserializer).map(Some)
        }
    }
}

/// Keeps "field absent" and "field explicitly null" apart in patches
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// Broad error classes, for callers mapping errors onto a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    CurrencyMismatch,
    Conflict,
    Storage,
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),
    #[error("Currency mismatch between accounts: from={from} to={to}")]
    CurrencyMismatch { from: String, to: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Amount overflow: {0}")]
    Overflow(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),
    #[error("Stale read: {0}")]
    StaleRead(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) | LedgerError::Overflow(_) => ErrorKind::Validation,
            LedgerError::AccountNotFound(_) | LedgerError::TransactionNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Storage(_) | LedgerError::LockTimeout(_) | LedgerError::StaleRead(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Transient failures that may succeed if the whole operation is retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(_) | LedgerError::LockTimeout(_) | LedgerError::StaleRead(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_effect_follows_kind() {
        assert_eq!(AccountKind::Asset.signed_effect(Direction::Credit, 50), 50);
        assert_eq!(AccountKind::Asset.signed_effect(Direction::Debit, 50), -50);
        assert_eq!(AccountKind::Liability.signed_effect(Direction::Debit, 50), 50);
        assert_eq!(AccountKind::Liability.signed_effect(Direction::Credit, 50), -50);
    }

    #[test]
    fn direction_for_inverts_signed_effect() {
        for kind in [AccountKind::Asset, AccountKind::Liability] {
            for delta in [-75_i64, 1, 300] {
                let direction = kind.direction_for(delta).unwrap();
                assert_eq!(kind.signed_effect(direction, delta.abs()), delta);
            }
            assert_eq!(kind.direction_for(0), None);
        }
    }

    #[test]
    fn state_is_derived_from_links() {
        let mut txn = Transaction::new("u1", "transfer".to_string(), chrono::Utc::now().date_naive());
        assert_eq!(txn.state(), TransactionState::Active);
        txn.reversed_by = Some(Uuid::new_v4());
        assert_eq!(txn.state(), TransactionState::Reversed);
        txn.reversed_by = None;
        txn.reversal_of = Some(Uuid::new_v4());
        assert_eq!(txn.state(), TransactionState::IsReversal);
    }

    #[test]
    fn masks_all_but_last_four() {
        assert_eq!(mask_number("1234567890"), "******7890");
        assert_eq!(mask_number("123"), "123");
    }

    #[test]
    fn amounts_serialize_as_strings() {
        let line = Line::debit(Uuid::new_v4(), Uuid::new_v4(), 9_007_199_254_740_993);
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["amount_minor"], "9007199254740993");

        let back: Line = serde_json::from_value(json).unwrap();
        assert_eq!(back.amount_minor, 9_007_199_254_740_993);
    }

    #[test]
    fn amounts_accept_integers_and_reject_fractions() {
        let spec: TransactionSpec =
            serde_json::from_str(r#"{"kind":"transfer","amount_minor":250}"#).unwrap();
        assert_eq!(spec.amount_minor, Some(250));

        let spec: TransactionSpec =
            serde_json::from_str(r#"{"kind":"transfer","amount_minor":"-250"}"#).unwrap();
        assert_eq!(spec.amount_minor, Some(-250));

        assert!(serde_json::from_str::<TransactionSpec>(
            r#"{"kind":"transfer","amount_minor":2.5}"#
        )
        .is_err());
    }

    #[test]
    fn patch_tells_null_from_absent() {
        let patch: TransactionPatch = serde_json::from_str(r#"{"account_from":null}"#).unwrap();
        assert_eq!(patch.account_from, Some(None));
        assert_eq!(patch.account_to, None);
        assert!(patch.touches_accounts());

        let patch: TransactionPatch = serde_json::from_str(r#"{"kind":"x"}"#).unwrap();
        assert!(!patch.touches_accounts());
    }

    #[test]
    fn full_number_stays_out_of_json() {
        let input = NewAccount {
            number_full: Some("000123456789".to_string()),
            ..NewAccount::new("Checking", AccountKind::Asset, "USD", 0)
        };
        let account = Account::new(input, "u1");
        assert_eq!(account.number_full.as_deref(), Some("000123456789"));

        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("number_full").is_none());
        assert_eq!(json["number_masked"], "********6789");
    }

    #[test]
    fn net_effect_does_not_overflow_midway() {
        let account = Uuid::new_v4();
        let mut txn = TransactionWithLines {
            transaction: Transaction::new(
                "u1",
                "transfer".to_string(),
                chrono::Utc::now().date_naive(),
            ),
            lines: Vec::new(),
        };
        let id = txn.transaction.id;
        txn.lines = vec![
            Line::credit(id, account, i64::MAX),
            Line::credit(id, account, i64::MAX),
            Line::debit(id, account, i64::MAX),
        ];
        assert_eq!(txn.net_effect_on(account, AccountKind::Asset).unwrap(), i64::MAX);

        txn.lines.pop();
        assert!(matches!(
            txn.net_effect_on(account, AccountKind::Asset),
            Err(LedgerError::Overflow(_))
        ));
    }

    #[test]
    fn retryable_errors() {
        assert!(LedgerError::Storage("io".into()).is_retryable());
        assert!(LedgerError::LockTimeout("k".into()).is_retryable());
        assert!(!LedgerError::Conflict("x".into()).is_retryable());
        assert_eq!(
            LedgerError::AccountNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
    }
}
