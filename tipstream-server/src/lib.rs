//! HTTP front end for the tipstream payment engine.
//!
//! Wires configured chain adapters into a [`tipstream::registry::Registry`],
//! runs the confirmation poller, serves the four payment operations over
//! JSON, and forwards confirmed donations to the stream overlay.
//!
//! # Modules
//!
//! - [`chains`] - Adapter construction from `[[adapters]]` entries
//! - [`config`] - Server configuration with environment variable expansion
//! - [`error`] - HTTP error responses
//! - [`handlers`] - Axum routes and router builder
//! - [`notify`] - Overlay push notifier
//! - [`page`] - Donor-facing payment page
//! - [`util`] - Shutdown signal handling

pub mod chains;
pub mod config;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod page;
pub mod util;

pub use handlers::{AppState, SharedState, router};
