//! Root of the `replaycast-core` library.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the view layer or tracing.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod camera;
mod chat;
mod clock;
pub mod config;
mod context;
pub mod error;
pub mod event_stream;
mod names;
mod session;
mod timeline;
pub mod transport;

pub use camera::CameraFollow;
pub use camera::CameraTarget;
pub use camera::derive_target;
pub use chat::ChatMessage;
pub use chat::ChatRole;
pub use chat::ChatSession;
pub use chat::MessageId;
pub use chat::ToolCall;
pub use chat::ToolStatus;
pub use clock::PlaybackClock;
pub use clock::PlaybackState;
pub use clock::TickOutcome;
pub use clock::TimerSlot;
pub use clock::spawn_ticker;
pub use config::ChatBusyPolicy;
pub use config::ConfigLoader;
pub use config::EngineConfig;
pub use context::ChatContextBundle;
pub use context::ExcerptLimits;
pub use context::event_excerpt;
pub use context::snapshot_window;
pub use error::ReplayError;
pub use error::Result;
pub use error::StateError;
pub use event_stream::EventDecoder;
pub use event_stream::EventSink;
pub use event_stream::EventStream;
pub use event_stream::ReadOutcome;
pub use event_stream::read_events;
pub use names::NameCache;
pub use names::NameResolver;
pub use session::PlaybackFrame;
pub use session::ReplaySession;
pub use timeline::NarrationStatus;
pub use timeline::ReconcileReport;
pub use timeline::Timeline;
pub use timeline::reconcile;
pub use transport::ByteStream;
pub use transport::EventTransport;
pub use transport::HttpTransport;

pub use replaycast_protocol as protocol;
