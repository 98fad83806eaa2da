//! Payment and donation status engine for crypto donations.
//!
//! This crate mints time-bounded payment requests for donations, watches
//! blockchains for the matching transfers, and drives each donation through
//! an ordered status lifecycle shared with a messaging front end and a stream
//! overlay. It is blockchain-agnostic; chain-specific adapters live in
//! separate crates.
//!
//! # Overview
//!
//! A caller creates a payment request through the [`service::PaymentService`]
//! facade and hands the resulting payment URL (or its QR image) to a donor.
//! The [`poller::Poller`] periodically asks each configured
//! [`chain::ChainAdapter`] whether a matching transfer has landed, and the
//! [`registry::Registry`] applies status transitions validated by the
//! [`machine`]. Callers observe progress by polling the facade or by
//! subscribing to registry transition events.
//!
//! # Modules
//!
//! - [`chain`] - Chain adapter trait, adapter lookup table, amount matching
//! - [`config`] - Engine tunables
//! - [`error`] - Error types returned to callers
//! - [`machine`] - Donation status state machine
//! - [`networks`] - Registry of well-known networks and tokens
//! - [`nonce`] - Payment request nonces
//! - [`poller`] - Background confirmation and expiry loop
//! - [`qr`] - QR image encoding
//! - [`registry`] - Payment request store with per-nonce single writer
//! - [`request`] - Payment request records
//! - [`service`] - The four caller-facing operations
//! - [`status`] - Donation status enumeration and wire encoding
//! - [`timestamp`] - Unix timestamps and injectable clocks

pub mod chain;
pub mod config;
pub mod error;
pub mod machine;
pub mod networks;
pub mod nonce;
pub mod poller;
pub mod qr;
pub mod registry;
pub mod request;
pub mod service;
pub mod status;
pub mod timestamp;

pub use error::PaymentError;
pub use status::DonationStatus;
