//! Async consumers of state changes.

/// Change events fanned out over a broadcast channel.
pub mod events;
