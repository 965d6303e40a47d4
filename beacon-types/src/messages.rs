//! Domain messages for beacon.
//!
//! Every payload exchanged over the transport is one of these variants,
//! selected on the wire by the `_type` discriminator. See [`crate::codec`]
//! for the JSON mapping.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::DecodeError;

/// All domain messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A position report from a device.
    Location(Location),
    /// Display name and avatar of a device.
    Card(Card),
    /// A device entered or left a region.
    Transition(Transition),
    /// A region definition.
    Waypoint(Waypoint),
    /// A remote command addressed to a device.
    Command(Command),
    /// The transport's last-will payload for a vanished device.
    Lwt(Lwt),
}

impl Message {
    /// Encode to JSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode(self)
    }

    /// Decode from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::codec::decode(bytes)
    }

    /// The variant tag.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Location(_) => MessageKind::Location,
            Self::Card(_) => MessageKind::Card,
            Self::Transition(_) => MessageKind::Transition,
            Self::Waypoint(_) => MessageKind::Waypoint,
            Self::Command(_) => MessageKind::Command,
            Self::Lwt(_) => MessageKind::Lwt,
        }
    }
}

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `"location"`
    Location,
    /// `"card"`
    Card,
    /// `"transition"`
    Transition,
    /// `"waypoint"`
    Waypoint,
    /// `"cmd"`
    Command,
    /// `"lwt"`
    Lwt,
}

impl MessageKind {
    /// The wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Card => "card",
            Self::Transition => "transition",
            Self::Waypoint => "waypoint",
            Self::Command => "cmd",
            Self::Lwt => "lwt",
        }
    }

    /// Look up a kind by its wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "location" => Some(Self::Location),
            "card" => Some(Self::Card),
            "transition" => Some(Self::Transition),
            "waypoint" => Some(Self::Waypoint),
            "cmd" => Some(Self::Command),
            "lwt" => Some(Self::Lwt),
            _ => None,
        }
    }
}

/// Charging state of a device battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatteryStatus {
    /// State could not be determined.
    Unknown,
    /// Running on battery.
    Unplugged,
    /// Plugged in and charging.
    Charging,
    /// Plugged in and full.
    Full,
}

impl BatteryStatus {
    /// Wire code (`bs` field).
    pub fn code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Unplugged => 1,
            Self::Charging => 2,
            Self::Full => 3,
        }
    }

    /// Look up a status by wire code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Unplugged),
            2 => Some(Self::Charging),
            3 => Some(Self::Full),
            _ => None,
        }
    }
}

/// A position report.
///
/// The reporting device is not a field: it is identified by the routing key
/// the message travels on.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Latitude in degrees, -90..=90.
    pub latitude: f64,
    /// Longitude in degrees, -180..=180.
    pub longitude: f64,
    /// Fix time, seconds since the Unix epoch (UTC).
    pub timestamp: u64,
    /// Altitude in metres.
    pub altitude: Option<f64>,
    /// Horizontal accuracy in metres.
    pub accuracy: Option<f64>,
    /// Vertical accuracy in metres.
    pub vertical_accuracy: Option<f64>,
    /// Velocity in km/h.
    pub velocity: Option<f64>,
    /// Course over ground in degrees.
    pub course: Option<f64>,
    /// Battery level, 0..=100.
    pub battery: Option<u8>,
    /// Battery charging state.
    pub battery_status: Option<BatteryStatus>,
    /// Short tracker id shown in place of a name.
    pub tracker_id: Option<String>,
    /// What caused the report (ping, manual, region, ...).
    pub trigger: Option<String>,
    /// Connectivity at report time (wifi, mobile, offline).
    pub connectivity: Option<String>,
    /// Regions the device is currently inside.
    pub in_regions: Option<Vec<String>>,
}

impl Location {
    /// A report with only the required fields set.
    pub fn new(latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            altitude: None,
            accuracy: None,
            vertical_accuracy: None,
            velocity: None,
            course: None,
            battery: None,
            battery_status: None,
            tracker_id: None,
            trigger: None,
            connectivity: None,
            in_regions: None,
        }
    }
}

/// Display information for a device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Card {
    /// Human readable name.
    pub name: Option<String>,
    /// Base64-encoded avatar image.
    pub face: Option<String>,
}

impl Card {
    /// Decode the avatar image bytes, if any.
    pub fn face_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.face.as_deref().map(|face| STANDARD.decode(face))
    }
}

/// Direction of a region transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionEvent {
    /// Entered the region.
    Enter,
    /// Left the region.
    Leave,
}

impl TransitionEvent {
    /// Wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Leave => "leave",
        }
    }

    /// Parse the wire form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enter" => Some(Self::Enter),
            "leave" => Some(Self::Leave),
            _ => None,
        }
    }
}

/// A device entered or left a region.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Creation time of the region definition.
    pub waypoint_timestamp: u64,
    /// Latitude of the fix that triggered the transition.
    pub latitude: f64,
    /// Longitude of the fix that triggered the transition.
    pub longitude: f64,
    /// Time of the transition.
    pub timestamp: u64,
    /// Enter or leave.
    pub event: TransitionEvent,
    /// Accuracy of the triggering fix in metres.
    pub accuracy: Option<f64>,
    /// Tracker id of the reporting device.
    pub tracker_id: Option<String>,
    /// Region name.
    pub description: Option<String>,
    /// What caused the transition.
    pub trigger: Option<String>,
}

/// A region definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    /// Region name.
    pub description: String,
    /// Centre latitude.
    pub latitude: f64,
    /// Centre longitude.
    pub longitude: f64,
    /// Creation time, doubles as the region id.
    pub timestamp: u64,
    /// Radius in metres.
    pub radius: Option<u32>,
}

/// Action requested by a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandAction {
    /// Publish a fresh location now.
    ReportLocation,
    /// Replace the local region list.
    SetWaypoints,
    /// Import a configuration document.
    SetConfiguration,
    /// Restart the tracking service.
    Restart,
    /// An action this client does not know, kept verbatim.
    Other(UnknownAction),
}

/// Wire name of an action outside the known set.
///
/// Only built by [`CommandAction::parse`], so it never holds a known name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownAction(String);

impl UnknownAction {
    /// The action name as received.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CommandAction {
    /// Wire form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ReportLocation => "reportLocation",
            Self::SetWaypoints => "setWaypoints",
            Self::SetConfiguration => "setConfiguration",
            Self::Restart => "restart",
            Self::Other(action) => action.as_str(),
        }
    }

    /// Parse the wire form.
    pub fn parse(value: &str) -> Self {
        match value {
            "reportLocation" => Self::ReportLocation,
            "setWaypoints" => Self::SetWaypoints,
            "setConfiguration" => Self::SetConfiguration,
            "restart" => Self::Restart,
            other => Self::Other(UnknownAction(other.to_string())),
        }
    }
}

/// A remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// What to do.
    pub action: CommandAction,
}

/// Last-will payload published by the broker when a device drops off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lwt {
    /// Time the will was registered.
    pub timestamp: u64,
}
