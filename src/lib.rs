//! # Ledger Core
//!
//! A double-entry ledger consistency engine: accounts, append-only ledger
//! lines, reversible transactions and balance overrides recorded as
//! auditable adjustments.
//!
//! ## Features
//!
//! - **Append-only lines**: amendments compensate existing lines instead of rewriting them
//! - **Reversals**: a transaction is undone at most once by its mirror image
//! - **Computed balances**: opening balance folded with every line, never stored
//! - **Balance overrides**: synthesized `adjustment` transactions close the gap
//! - **Atomic commits**: every mutation is one all-or-nothing [`ChangeSet`]
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_core::{AccountKind, Ledger, MemoryStorage, NewAccount, TransactionSpec};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ledger = Ledger::new(MemoryStorage::new());
//! let cash = ledger
//!     .create_account(NewAccount::new("Cash", AccountKind::Asset, "USD", 1000), "user-1")
//!     .await?;
//! let savings = ledger
//!     .create_account(NewAccount::new("Savings", AccountKind::Asset, "USD", 0), "user-1")
//!     .await?;
//!
//! ledger
//!     .create_transaction(
//!         TransactionSpec::transfer(cash.account.id, savings.account.id, 200),
//!         "user-1",
//!     )
//!     .await?;
//! assert_eq!(ledger.compute_balance(cash.account.id, "user-1").await?, 800);
//! # Ok::<(), ledger_core::LedgerError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod ledger;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStorage;
