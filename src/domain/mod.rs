//! Domain layer: accounts, ledger records, and the ports the engine consumes.
//!
//! Nothing in here performs I/O. Storage, locking and time are reached through
//! the traits in [`ports`].

pub mod account;
pub mod ports;
pub mod transaction;
