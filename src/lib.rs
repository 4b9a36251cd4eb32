//! Payment orchestration service.
//!
//! Brokers checkout sessions across Stripe, PayPal and Razorpay, drives
//! each payment through a strict lifecycle, and publishes lifecycle events
//! to the message bus consumed by the Order service.

pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod providers;
pub mod services;
pub mod webhooks;
pub mod workers;
