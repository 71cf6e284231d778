//! Ledger module containing account management, balance computation and
//! transaction processing

pub mod account;
pub mod adjustment;
pub mod balance;
pub mod core;
pub mod locks;
pub mod transaction;

pub use account::*;
pub use adjustment::*;
pub use balance::*;
pub use core::*;
pub use locks::*;
pub use transaction::*;
