//! Transport-agnostic dispatch contract.
//!
//! Business logic is written once as an [`Endpoint`] and reached from every
//! transport (an axum handler, a tool call on the custom QUIC protocol) with
//! the same [`RequestContext`]. Cross-cutting concerns are [`Middleware`] and
//! compose with [`chain`].

pub mod context;
pub mod endpoint;
pub mod middleware;

pub use context::{RequestContext, Transport};
pub use endpoint::{chain, BoxError, Endpoint, Middleware};
pub use middleware::Cancelled;
