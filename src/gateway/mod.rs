pub mod routes;

pub use routes::{GatewayRoute, GatewayRoutes};
