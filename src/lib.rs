//! coinbridge — an automated custodial bridge.
//!
//! Watches configured networks for incoming deposits, resolves what each
//! deposit should become, and executes that conversion exactly once per
//! deposit, under retries, crashes and concurrent workers.
//!
//! This facade crate re-exports the workspace members under short names
//! and carries the tracing/telemetry initialisation shared by every
//! deployment entry point.

pub use coinbridge_config as config;
pub use coinbridge_engine as engine;
pub use coinbridge_handlers as handlers;
pub use coinbridge_orchestrator as orchestrator;
pub use coinbridge_scanner as scanner;
pub use coinbridge_store as store;
pub use coinbridge_sync as sync;
pub use coinbridge_types as types;
pub use coinbridge_vault as vault;

pub mod telemetry;
