//! Payment collection and reconciliation for quote-based services.
//!
//! Clients pay quotes through hosted gateways (Paystack, Flutterwave) or
//! offline (bank transfer, cash). Every settlement is verified with the
//! gateway and applied to the quote's balance exactly once.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
