//! CLI command implementations.

pub mod decode;
pub mod prefs;
pub mod replay;
pub mod status;
