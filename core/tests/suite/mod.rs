// Aggregates all former standalone integration tests as modules.
mod chat_session;
mod narration_build;
mod playback;
