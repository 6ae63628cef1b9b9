//! Application layer containing the core business logic orchestration.
//!
//! [`engine::TransactionEngine`] validates and applies balance uses and
//! cancellations. Every mutation is wrapped by [`lock::LockCoordinator`], which
//! serializes work per account number through a shared `LockProvider`.

pub mod accounts;
pub mod audit;
pub mod engine;
pub mod lock;
