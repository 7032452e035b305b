//! Application layer: the services that enforce the order and payment rules.
//!
//! `Engine` wires the aggregator, the state machine, the ledger and the orchestrator over a
//! shared set of ports. Per-order serialization is provided by `OrderLocks`.

pub mod aggregator;
pub mod engine;
pub mod gateway;
pub mod ledger;
pub mod locks;
pub mod orchestrator;
pub mod state_machine;
