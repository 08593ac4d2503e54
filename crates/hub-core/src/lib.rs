//! Core types shared across the hub control core
//!
//! This crate defines the vocabulary of the hub: event sources (actor ids),
//! the event envelope carried by the event bus, and the typed state rows
//! that the state tree persists.

pub mod event;
pub mod events;
pub mod source;
pub mod state;

pub use event::{Event, EventData, EventType};
pub use source::Source;
pub use state::{NodeId, StateRow, StateType};
