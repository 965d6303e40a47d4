//! # beacon-types
//!
//! Wire format types for the beacon location-sharing client.
//!
//! This crate provides the foundational types used across all beacon crates:
//! - [`ContactId`], [`PublishId`] - Identity types
//! - [`Inbound`], [`Outbound`], [`Qos`] - Transport routing envelopes
//! - [`Message`] - Domain messages (Location, Card, Transition, ...)
//! - [`decode`], [`encode`] - The JSON codec
//! - [`DecodeError`] - Decode failures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod envelope;
mod error;
mod ids;
mod messages;

pub use codec::{decode, encode, TYPE_FIELD};
pub use envelope::{Inbound, Outbound, Qos};
pub use error::DecodeError;
pub use ids::{ContactId, PublishId};
pub use messages::{
    BatteryStatus, Card, Command, CommandAction, Location, Lwt, Message, MessageKind, Transition,
    TransitionEvent, UnknownAction, Waypoint,
};
