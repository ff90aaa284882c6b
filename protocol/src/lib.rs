//! Wire types shared by the narration and chat collaborators.
//!
//! Everything in this crate is plain serde data. The engine in
//! `replaycast-core` only reads these types; it never invents fields the
//! collaborators do not send.

pub mod chat;
pub mod event;
pub mod narration;
pub mod snapshot;

pub use chat::ChatRequest;
pub use chat::SimulationContext;
pub use event::StreamEvent;
pub use narration::Moment;
pub use narration::NarrationRequest;
pub use narration::RoundContext;
pub use snapshot::FinalState;
pub use snapshot::PlayerState;
pub use snapshot::RosterEntry;
pub use snapshot::Side;
pub use snapshot::SimulationEvent;
pub use snapshot::Snapshot;
