//! Change-notification types delivered to the event callback

use strum::{Display, EnumString, IntoStaticStr};

use pulse_transport::subscribe;

/// Which entity table an event concerns
///
/// A facility code this library does not know keeps its raw bits in
/// [`EventFacility::Unknown`] and displays as `facility.N`, so events
/// from a newer server are labeled rather than dropped. Display is
/// hand-written here and on [`EventType`] for those data-carrying
/// variants; [`EventMask`] gets its string forms from `strum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFacility {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Module,
    Client,
    SampleCache,
    Server,
    Autoload,
    Card,
    Unknown(u32),
}

impl EventFacility {
    pub(crate) fn from_code(code: u32) -> Self {
        match code {
            subscribe::FACILITY_SINK => Self::Sink,
            subscribe::FACILITY_SOURCE => Self::Source,
            subscribe::FACILITY_SINK_INPUT => Self::SinkInput,
            subscribe::FACILITY_SOURCE_OUTPUT => Self::SourceOutput,
            subscribe::FACILITY_MODULE => Self::Module,
            subscribe::FACILITY_CLIENT => Self::Client,
            subscribe::FACILITY_SAMPLE_CACHE => Self::SampleCache,
            subscribe::FACILITY_SERVER => Self::Server,
            subscribe::FACILITY_AUTOLOAD => Self::Autoload,
            subscribe::FACILITY_CARD => Self::Card,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for EventFacility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sink => f.write_str("sink"),
            Self::Source => f.write_str("source"),
            Self::SinkInput => f.write_str("sink_input"),
            Self::SourceOutput => f.write_str("source_output"),
            Self::Module => f.write_str("module"),
            Self::Client => f.write_str("client"),
            Self::SampleCache => f.write_str("sample_cache"),
            Self::Server => f.write_str("server"),
            Self::Autoload => f.write_str("autoload"),
            Self::Card => f.write_str("card"),
            Self::Unknown(code) => write!(f, "facility.{code}"),
        }
    }
}

/// What happened to the entity
///
/// Like [`EventFacility`], type bits outside the known set keep their
/// raw value in [`EventType::Unknown`] and display as `type.N`; such
/// events are still delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    New,
    Change,
    Remove,
    Unknown(u32),
}

impl EventType {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits {
            subscribe::EVENT_NEW => Self::New,
            subscribe::EVENT_CHANGE => Self::Change,
            subscribe::EVENT_REMOVE => Self::Remove,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => f.write_str("new"),
            Self::Change => f.write_str("change"),
            Self::Remove => f.write_str("remove"),
            Self::Unknown(bits) => write!(f, "type.{bits}"),
        }
    }
}

/// Facility selector for [`event_mask_set`](crate::Pulse::event_mask_set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventMask {
    Null,
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Module,
    Client,
    SampleCache,
    Server,
    Autoload,
    Card,
    All,
}

impl EventMask {
    pub fn bit(self) -> u32 {
        match self {
            Self::Null => subscribe::MASK_NULL,
            Self::Sink => subscribe::MASK_SINK,
            Self::Source => subscribe::MASK_SOURCE,
            Self::SinkInput => subscribe::MASK_SINK_INPUT,
            Self::SourceOutput => subscribe::MASK_SOURCE_OUTPUT,
            Self::Module => subscribe::MASK_MODULE,
            Self::Client => subscribe::MASK_CLIENT,
            Self::SampleCache => subscribe::MASK_SAMPLE_CACHE,
            Self::Server => subscribe::MASK_SERVER,
            Self::Autoload => subscribe::MASK_AUTOLOAD,
            Self::Card => subscribe::MASK_CARD,
            Self::All => subscribe::MASK_ALL,
        }
    }
}

/// One change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub facility: EventFacility,
    pub kind: EventType,
    /// Index of the affected entity, `INVALID_INDEX` for server-wide events
    pub index: u32,
}

/// Returned by the event callback to keep or stop the listen loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum EventAction {
    Continue,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_facility_string_names() {
        assert_eq!(EventFacility::SinkInput.to_string(), "sink_input");
        assert_eq!(
            EventMask::from_str("source_output").unwrap(),
            EventMask::SourceOutput
        );
        assert!(EventMask::from_str("bogus").is_err());
    }

    #[test]
    fn test_facility_round_trip_through_codes() {
        for code in 0..=9 {
            let fac = EventFacility::from_code(code);
            assert_ne!(EventMask::from_str(&fac.to_string()).unwrap().bit(), 0);
        }
    }

    #[test]
    fn test_unknown_facility_keeps_its_bits() {
        let fac = EventFacility::from_code(12);
        assert_eq!(fac, EventFacility::Unknown(12));
        assert_eq!(fac.to_string(), "facility.12");
    }

    #[test]
    fn test_unknown_type_keeps_its_bits() {
        assert_eq!(EventType::from_bits(subscribe::EVENT_NEW), EventType::New);
        let kind = EventType::from_bits(0x30);
        assert_eq!(kind, EventType::Unknown(0x30));
        assert_eq!(kind.to_string(), "type.48");
    }

    #[test]
    fn test_mask_all_is_union() {
        let mut union = 0;
        for m in [
            EventMask::Sink,
            EventMask::Source,
            EventMask::SinkInput,
            EventMask::SourceOutput,
            EventMask::Module,
            EventMask::Client,
            EventMask::SampleCache,
            EventMask::Server,
            EventMask::Autoload,
            EventMask::Card,
        ] {
            union |= m.bit();
        }
        assert_eq!(union, EventMask::All.bit());
    }
}
