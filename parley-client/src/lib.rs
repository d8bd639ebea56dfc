//! # parley-client
//!
//! Runtime for Parley conversations.
//!
//! This is the library applications use to hold a conversation that can move
//! between a live audio session and a streamed text exchange without losing
//! its history.
//!
//! ## Features
//!
//! - **Ordered History**: Messages land in intake order even when transcripts
//!   finish out of order
//! - **Mode Switching**: Connect-before-disconnect, with history replayed into
//!   new audio sessions
//! - **Turn Taking**: Barge-in and manual turn timeouts driven by the pure
//!   machine in `parley-core`
//! - **Transport Abstraction**: Pluggable transports (WebSocket, HTTP
//!   streaming, mock)
//!
//! ## Example
//!
//! ```ignore
//! use parley_client::{ConversationConfig, ConversationOrchestrator, DefaultTransportFactory};
//!
//! let config = ConversationConfig::load(Path::new("parley.toml"))?;
//! let credentials = config.credentials()?;
//! let factory = Arc::new(DefaultTransportFactory::new(config.service.clone()));
//! let chat = ConversationOrchestrator::start(
//!     config, credentials, factory, Arc::new(NoTools), Arc::new(NullAudio),
//! ).await?;
//!
//! chat.send("Hello").await?;
//! let history = chat.messages().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audio;
pub mod bus;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod sequencer;
pub mod sse;
pub mod tools;
pub mod transport;
pub mod turn;

pub use audio::{AudioCall, AudioDevice, AudioError, NullAudio, OutputRoute, RecordingAudio};
pub use bus::EventBus;
pub use config::{ConfigError, ConversationConfig, Credentials};
pub use error::ClientError;
pub use orchestrator::{ConversationOrchestrator, SendReceipt};
pub use sequencer::{MessageStream, SequencerHandle};
pub use tools::{NoTools, ToolDispatcher, ToolError, ToolOutcome, ToolRegistry};
pub use transport::{
    DefaultTransportFactory, DisconnectKind, DuplexSession, MockDuplexTransport,
    MockStreamingTransport, MockTransportFactory, RealtimeSession, ResponsesSession,
    StreamingSession, TransportError, TransportFactory, TransportSession,
};
pub use turn::{TurnCoordinator, TurnDelegate};
