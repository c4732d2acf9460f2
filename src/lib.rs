//! Backhaul: Offline-First Change Synchronization
//!
//! A client-resident durable operation queue that accepts local mutations
//! while disconnected, persists them across restarts, and reconciles them
//! with a remote authority once connectivity returns.

pub mod composition;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod message;
pub mod operation;
pub mod provider;
pub mod queue;
pub mod remote;
pub mod report;
pub mod resolver;
pub mod status;
pub mod store;
pub mod types;
