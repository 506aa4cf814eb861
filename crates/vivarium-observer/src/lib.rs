//! vivarium-observer: the public face of the experiment.
//!
//! Authoritative for life numbers, aliveness, vote rounds, death causes, and
//! the timeline. Talks to the agent only over its loopback API and runs the
//! four background validators that keep both sides honest.

pub mod agent_client;
pub mod budget;
pub mod http;
pub mod lifecycle;
pub mod memories;
pub mod store;
pub mod sync;
pub mod voting;
