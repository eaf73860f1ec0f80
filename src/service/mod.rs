//! Optional HTTP service exposing the tool registry.
//!
//! Enabled with the `service` cargo feature; the `cloudgraphd` binary is
//! the usual entry point.

mod routes;
mod state;

pub use routes::create_router;
pub use state::ServiceState;
