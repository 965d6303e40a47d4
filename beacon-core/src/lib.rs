//! # beacon-core
//!
//! Pure logic for beacon (no I/O, instant tests).
//!
//! This crate implements the merge rules, state machines and schemas of the
//! location-sharing client without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`contact`] decides how one message changes one contact
//! - [`state`] folds transport connection events into an endpoint status
//! - [`buffer`] tracks queued and in-flight publishes
//! - [`preferences`] declares every recognized preference and its coercion
//! - [`endpoint`] derives broker settings and topics from preferences
//!
//! The actual I/O (transport, preference storage, locking) is performed by
//! `beacon-client`, which interprets the outcomes and actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod contact;
pub mod endpoint;
pub mod preferences;
pub mod state;

pub use buffer::{BufferError, OutboundBuffer, QueuedPublish, DEFAULT_BUFFER_CAPACITY};
pub use contact::{display_order, merge, Contact, MergeOutcome, LOCATION_UNKNOWN};
pub use endpoint::{
    command_topic, Credentials, EndpointError, EndpointSettings, Scheme, TlsSettings,
};
pub use preferences::{
    parse_string_set, CoercionError, PreferenceKey, PreferenceKind, PreferenceSnapshot,
    PreferenceValue, MODE_HTTP, MODE_MQTT,
};
pub use state::{Action, EndpointState, EndpointStatus, Event};
