//! XMPP WebSocket Bridge
//!
//! Pairs each browser WebSocket connection with an XMPP account session,
//! provisioning missing accounts on first use, and relays one-to-one and
//! multi-user chat traffic in both directions.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
