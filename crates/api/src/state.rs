//! Shared application state.

use domain::{InMemoryOrderStore, InMemoryProductStore, InMemoryUserStore};
use messaging::InMemoryBroker;
use resilience::Transport;
use saga::OrderOrchestrator;

/// The order orchestrator as hosted by the API process.
pub type Orchestrator<T> = OrderOrchestrator<InMemoryOrderStore, T, InMemoryBroker>;

/// Shared application state accessible from all handlers.
///
/// The three services share one process but keep separate stores. The order
/// service reaches users and products only through the orchestrator's
/// resilient client.
pub struct AppState<T: Transport> {
    pub users: InMemoryUserStore,
    pub products: InMemoryProductStore,
    pub orchestrator: Orchestrator<T>,
}

impl<T: Transport> AppState<T> {
    pub fn orders(&self) -> &InMemoryOrderStore {
        self.orchestrator.orders()
    }
}
