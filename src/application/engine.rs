use crate::application::aggregator::OrderAggregator;
use crate::application::ledger::PaymentLedger;
use crate::application::locks::OrderLocks;
use crate::application::orchestrator::{GatewaySet, PaymentOrchestrator};
use crate::application::state_machine::OrderStateMachine;
use crate::domain::ports::{
    EventSinkRef, OrderStoreRef, PaymentStoreRef, ProductCatalogRef, UserDirectoryRef,
};
use crate::error::Result;
use std::sync::Arc;

/// The ports an [`Engine`] is assembled from.
#[derive(Clone)]
pub struct EnginePorts {
    pub orders: OrderStoreRef,
    pub payments: PaymentStoreRef,
    pub catalog: ProductCatalogRef,
    pub users: UserDirectoryRef,
    pub events: EventSinkRef,
}

/// The order and payment services wired over one set of stores.
///
/// The ledger and the state machine share a lock registry so that every write to an
/// order row is serialized, whichever service performs it.
#[derive(Clone)]
pub struct Engine {
    pub aggregator: Arc<OrderAggregator>,
    pub state_machine: Arc<OrderStateMachine>,
    pub ledger: Arc<PaymentLedger>,
    pub orchestrator: Arc<PaymentOrchestrator>,
}

impl Engine {
    /// Creates a new `Engine`.
    ///
    /// # Arguments
    ///
    /// * `ports` - Stores and external collaborators.
    /// * `gateways` - Builds the adapter set once the ledger exists.
    /// * `default_return_url` - Redirect target when a payment request names none.
    pub fn new(
        ports: EnginePorts,
        gateways: impl FnOnce(&Arc<PaymentLedger>) -> Result<GatewaySet>,
        default_return_url: impl Into<String>,
    ) -> Result<Self> {
        let locks = OrderLocks::new();

        let aggregator = Arc::new(OrderAggregator::new(
            ports.orders.clone(),
            ports.catalog,
            ports.users,
            ports.events.clone(),
        ));
        let state_machine = Arc::new(OrderStateMachine::new(
            ports.orders.clone(),
            locks.clone(),
            ports.events.clone(),
        ));
        let ledger = Arc::new(PaymentLedger::new(
            ports.orders,
            ports.payments,
            locks,
            ports.events,
        ));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            ledger.clone(),
            state_machine.clone(),
            gateways(&ledger)?,
            default_return_url,
        ));

        Ok(Self {
            aggregator,
            state_machine,
            ledger,
            orchestrator,
        })
    }
}
