//! WebSocket adapter - the client-facing transport.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  text frames   ┌──────────────────┐  commands  ┌───────────────┐
//! │   Browser    │ ─────────────► │  handle_socket   │ ─────────► │ SessionBridge │
//! │              │ ◄───────────── │  (one task each) │            │               │
//! └──────────────┘  write_signals └──────────────────┘            └───────────────┘
//!                          ▲                                              │
//!                          │          ClientSignal (mpsc)                 │
//!                          └────────────── ClientConnection ◄─────────────┘
//! ```
//!
//! # Components
//!
//! - [`messages`] - wire frames and their decoding into commands
//! - [`handler`] - axum upgrade handler, per-connection task, router

pub mod handler;
pub mod messages;

pub use handler::{bridge_router, health, ws_handler, HealthResponse, WebSocketState};
pub use messages::{parse_command, ClientFrame, ClientFrameType, CommandParseError, ServerFrame};
