//! vivarium-agent: the digital entity.
//!
//! Authoritative for its own identity, model choice, and the credit ledger.
//! Runs the think-act loop and exposes the loopback API the observer drives
//! births and corrections through. All outbound HTTP leaves through the
//! traffic guard.

pub mod actions;
pub mod brain;
pub mod gateway;
pub mod guard;
pub mod identity;
pub mod models;
pub mod observer_client;
pub mod parse;
pub mod prompt;
pub mod runtime;
pub mod server;
