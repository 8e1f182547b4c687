//! roadpulse-core library.
//!
//! The heart of this crate is [`sync::Synchronizer`], which turns an ordered
//! add/modify/remove change feed into minimal create/update/destroy calls on a
//! [`sync::RenderSink`]. Everything else exists to feed it: typed payloads
//! ([`model`]), the change feed ([`feed`]), live query collaborators
//! ([`source`]), a local SQLite-backed live store ([`store`]) and the
//! per-view contexts that wire them together ([`views`]).
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` at application seams, `thiserror` enums for
//!   module-level failures that carry an [`error::ErrorCode`].
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod aggregate;
pub mod config;
pub mod error;
pub mod feed;
pub mod model;
pub mod rank;
pub mod session;
pub mod source;
pub mod store;
pub mod sync;
pub mod views;
