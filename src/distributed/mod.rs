//! Coordinator/worker pair implementing the distributed orchestrator (C7):
//! shards the input across workers, invokes the local orchestrator's merge
//! step on each worker's accumulated records, and merges the sorted shards
//! on the coordinator.

pub mod coordinator;
pub mod transport;
pub mod worker;

pub use coordinator::run_coordinator;
pub use transport::{channel_pair, ChannelTransport, Transport};
pub use worker::run_worker;
