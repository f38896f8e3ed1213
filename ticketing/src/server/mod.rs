//! HTTP server module for the ticketing service.
//!
//! - Application state shared by the handlers
//! - Liveness endpoint
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use health::health_check;
pub use routes::build_router;
pub use state::AppState;
