//! JSON codec for domain messages.
//!
//! Payloads are JSON objects whose `_type` field selects the variant. The
//! decoder is tolerant:
//! - unknown fields are ignored
//! - optional fields may be omitted or `null`
//! - an optional field with the wrong type or an out-of-range value is
//!   treated as absent
//!
//! Decoding only fails on unreadable JSON, a missing or unknown `_type`, or
//! a required field that is missing or malformed. The encoder omits absent
//! optional fields and never fails.

use serde_json::{Map, Value};

use crate::messages::{
    BatteryStatus, Card, Command, CommandAction, Location, Lwt, Message, MessageKind, Transition,
    TransitionEvent, Waypoint,
};
use crate::DecodeError;

/// Name of the discriminator field.
pub const TYPE_FIELD: &str = "_type";

/// Decode a JSON payload into a domain message.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(classify)?;
    let Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = match object.get(TYPE_FIELD) {
        Some(Value::String(tag)) => {
            MessageKind::from_tag(tag).ok_or_else(|| DecodeError::UnknownType(tag.clone()))?
        }
        _ => return Err(DecodeError::MissingType),
    };

    let fields = Fields(&object);
    let message = match kind {
        MessageKind::Location => Message::Location(read_location(&fields)?),
        MessageKind::Card => Message::Card(Card {
            name: fields.opt_string("name"),
            face: fields.opt_string("face"),
        }),
        MessageKind::Transition => Message::Transition(read_transition(&fields)?),
        MessageKind::Waypoint => Message::Waypoint(Waypoint {
            description: fields.string("desc")?,
            latitude: fields.latitude("lat")?,
            longitude: fields.longitude("lon")?,
            timestamp: fields.u64("tst")?,
            radius: fields
                .opt_u64("rad")
                .and_then(|rad| u32::try_from(rad).ok()),
        }),
        MessageKind::Command => Message::Command(Command {
            action: CommandAction::parse(&fields.string("action")?),
        }),
        MessageKind::Lwt => Message::Lwt(Lwt {
            timestamp: fields.u64("tst")?,
        }),
    };
    Ok(message)
}

/// Encode a domain message as JSON bytes.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut out = Writer::new(message.kind());
    match message {
        Message::Location(location) => write_location(&mut out, location),
        Message::Card(card) => {
            out.opt("name", card.name.clone());
            out.opt("face", card.face.clone());
        }
        Message::Transition(transition) => write_transition(&mut out, transition),
        Message::Waypoint(waypoint) => {
            out.put("desc", waypoint.description.clone());
            out.put("lat", waypoint.latitude);
            out.put("lon", waypoint.longitude);
            out.put("tst", waypoint.timestamp);
            out.opt("rad", waypoint.radius);
        }
        Message::Command(command) => {
            out.put("action", command.action.as_str());
        }
        Message::Lwt(lwt) => {
            out.put("tst", lwt.timestamp);
        }
    }
    out.finish()
}

fn classify(err: serde_json::Error) -> DecodeError {
    if err.is_eof() {
        DecodeError::TruncatedInput
    } else {
        DecodeError::Syntax(err.to_string())
    }
}

fn read_location(fields: &Fields<'_>) -> Result<Location, DecodeError> {
    Ok(Location {
        latitude: fields.latitude("lat")?,
        longitude: fields.longitude("lon")?,
        timestamp: fields.u64("tst")?,
        altitude: fields.opt_f64("alt"),
        accuracy: fields.opt_f64("acc"),
        vertical_accuracy: fields.opt_f64("vac"),
        velocity: fields.opt_f64("vel"),
        course: fields.opt_f64("cog"),
        battery: fields
            .opt_u64("batt")
            .filter(|level| *level <= 100)
            .map(|level| level as u8),
        battery_status: fields.opt_u64("bs").and_then(BatteryStatus::from_code),
        tracker_id: fields.opt_string("tid"),
        trigger: fields.opt_string("t"),
        connectivity: fields.opt_string("conn"),
        in_regions: fields.opt_string_list("inregions"),
    })
}

fn write_location(out: &mut Writer, location: &Location) {
    out.put("lat", location.latitude);
    out.put("lon", location.longitude);
    out.put("tst", location.timestamp);
    out.opt("alt", location.altitude);
    out.opt("acc", location.accuracy);
    out.opt("vac", location.vertical_accuracy);
    out.opt("vel", location.velocity);
    out.opt("cog", location.course);
    out.opt("batt", location.battery);
    out.opt("bs", location.battery_status.map(BatteryStatus::code));
    out.opt("tid", location.tracker_id.clone());
    out.opt("t", location.trigger.clone());
    out.opt("conn", location.connectivity.clone());
    out.opt("inregions", location.in_regions.clone());
}

fn read_transition(fields: &Fields<'_>) -> Result<Transition, DecodeError> {
    let event = fields.string("event")?;
    Ok(Transition {
        waypoint_timestamp: fields.u64("wtst")?,
        latitude: fields.latitude("lat")?,
        longitude: fields.longitude("lon")?,
        timestamp: fields.u64("tst")?,
        event: TransitionEvent::parse(&event).ok_or(DecodeError::MalformedField("event"))?,
        accuracy: fields.opt_f64("acc"),
        tracker_id: fields.opt_string("tid"),
        description: fields.opt_string("desc"),
        trigger: fields.opt_string("t"),
    })
}

fn write_transition(out: &mut Writer, transition: &Transition) {
    out.put("wtst", transition.waypoint_timestamp);
    out.put("lat", transition.latitude);
    out.put("lon", transition.longitude);
    out.put("tst", transition.timestamp);
    out.put("event", transition.event.as_str());
    out.opt("acc", transition.accuracy);
    out.opt("tid", transition.tracker_id.clone());
    out.opt("desc", transition.description.clone());
    out.opt("t", transition.trigger.clone());
}

/// Typed view over the fields of a payload object.
struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
    /// A present, non-null field.
    fn get(&self, name: &str) -> Option<&Value> {
        match self.0.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn f64(&self, name: &'static str) -> Result<f64, DecodeError> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or(DecodeError::MalformedField(name))
    }

    fn latitude(&self, name: &'static str) -> Result<f64, DecodeError> {
        let value = self.f64(name)?;
        if (-90.0..=90.0).contains(&value) {
            Ok(value)
        } else {
            Err(DecodeError::MalformedField(name))
        }
    }

    fn longitude(&self, name: &'static str) -> Result<f64, DecodeError> {
        let value = self.f64(name)?;
        if (-180.0..=180.0).contains(&value) {
            Ok(value)
        } else {
            Err(DecodeError::MalformedField(name))
        }
    }

    fn u64(&self, name: &'static str) -> Result<u64, DecodeError> {
        self.get(name)
            .and_then(Value::as_u64)
            .ok_or(DecodeError::MalformedField(name))
    }

    fn string(&self, name: &'static str) -> Result<String, DecodeError> {
        self.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(DecodeError::MalformedField(name))
    }

    fn opt_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    fn opt_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    fn opt_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Value::as_str).map(str::to_string)
    }

    fn opt_string_list(&self, name: &str) -> Option<Vec<String>> {
        self.get(name)?
            .as_array()?
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect()
    }
}

/// Builds the payload object in field order.
struct Writer(Map<String, Value>);

impl Writer {
    fn new(kind: MessageKind) -> Self {
        let mut object = Map::new();
        object.insert(TYPE_FIELD.to_string(), Value::from(kind.as_str()));
        Self(object)
    }

    fn put(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    fn opt<T: Into<Value>>(&mut self, name: &str, value: Option<T>) {
        if let Some(value) = value {
            self.put(name, value);
        }
    }

    fn finish(self) -> Vec<u8> {
        Value::Object(self.0).to_string().into_bytes()
    }
}
