//! Domain model: orders, ledger attempts, tracking, events and the ports the
//! application layer depends on.

pub mod events;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod tracking;
