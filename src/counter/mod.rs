#[allow(clippy::module_inception)]
pub mod counter;
pub mod cleaner;
pub mod flying;
pub mod manager;

pub use cleaner::{CounterCleaner, EndpointSupplier, StaticEndpointSupplier, StaticEndpoints};
pub use counter::{Counter, CounterSnapshot};
pub use flying::FlyingCounter;
pub use manager::{CounterManager, EndpointCounter, ServiceCounter};
