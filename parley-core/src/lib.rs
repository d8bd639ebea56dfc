//! # parley-core
//!
//! Pure logic for Parley (no I/O, instant tests).
//!
//! This crate implements the ordering engine and state machines of a duplex
//! conversation client without any network, audio or timer I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (sockets, HTTP, timers) is performed by `parley-client`,
//! which interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod events;
pub mod mode;
pub mod sequencer;
pub mod turn;

pub use connection::{CloseReason, LinkAction, LinkEvent, LinkState};
pub use error::SequencerError;
pub use events::ConversationEvent;
pub use mode::{ConversationMode, Speaker, TurnMode, VadConfig};
pub use sequencer::{EnqueueRequest, Enqueued, MessageSequencer};
pub use turn::{TurnAction, TurnInput, TurnMachine};
