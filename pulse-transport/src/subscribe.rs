//! Subscription wire format: facility/type bit packing and mask bits
//!
//! A change notification arrives as one packed integer (facility in the
//! low nibble, event type in the next two bits) plus a target index. The
//! mask bits select which facilities the server reports at all.

/// Low nibble of the packed event: which facility it concerns
pub const EVENT_FACILITY_MASK: u32 = 0x000F;
/// Bits 4-5 of the packed event: what happened
pub const EVENT_TYPE_MASK: u32 = 0x0030;

pub const EVENT_NEW: u32 = 0x0000;
pub const EVENT_CHANGE: u32 = 0x0010;
pub const EVENT_REMOVE: u32 = 0x0020;

pub const FACILITY_SINK: u32 = 0x0000;
pub const FACILITY_SOURCE: u32 = 0x0001;
pub const FACILITY_SINK_INPUT: u32 = 0x0002;
pub const FACILITY_SOURCE_OUTPUT: u32 = 0x0003;
pub const FACILITY_MODULE: u32 = 0x0004;
pub const FACILITY_CLIENT: u32 = 0x0005;
pub const FACILITY_SAMPLE_CACHE: u32 = 0x0006;
pub const FACILITY_SERVER: u32 = 0x0007;
pub const FACILITY_AUTOLOAD: u32 = 0x0008;
pub const FACILITY_CARD: u32 = 0x0009;

pub const MASK_NULL: u32 = 0x0000;
pub const MASK_SINK: u32 = 0x0001;
pub const MASK_SOURCE: u32 = 0x0002;
pub const MASK_SINK_INPUT: u32 = 0x0004;
pub const MASK_SOURCE_OUTPUT: u32 = 0x0008;
pub const MASK_MODULE: u32 = 0x0010;
pub const MASK_CLIENT: u32 = 0x0020;
pub const MASK_SAMPLE_CACHE: u32 = 0x0040;
pub const MASK_SERVER: u32 = 0x0080;
pub const MASK_AUTOLOAD: u32 = 0x0100;
pub const MASK_CARD: u32 = 0x0200;
pub const MASK_ALL: u32 = 0x02FF;

/// Assemble a packed event value from type and facility bits
pub fn pack_event(event_type: u32, facility: u32) -> u32 {
    (event_type & EVENT_TYPE_MASK) | (facility & EVENT_FACILITY_MASK)
}

/// Mask bit for a facility code, `MASK_NULL` for unknown facilities
pub fn facility_mask_bit(facility: u32) -> u32 {
    match facility {
        FACILITY_SINK => MASK_SINK,
        FACILITY_SOURCE => MASK_SOURCE,
        FACILITY_SINK_INPUT => MASK_SINK_INPUT,
        FACILITY_SOURCE_OUTPUT => MASK_SOURCE_OUTPUT,
        FACILITY_MODULE => MASK_MODULE,
        FACILITY_CLIENT => MASK_CLIENT,
        FACILITY_SAMPLE_CACHE => MASK_SAMPLE_CACHE,
        FACILITY_SERVER => MASK_SERVER,
        FACILITY_AUTOLOAD => MASK_AUTOLOAD,
        FACILITY_CARD => MASK_CARD,
        _ => MASK_NULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let ev = pack_event(EVENT_CHANGE, FACILITY_CARD);
        assert_eq!(ev & EVENT_TYPE_MASK, EVENT_CHANGE);
        assert_eq!(ev & EVENT_FACILITY_MASK, FACILITY_CARD);
    }

    #[test]
    fn test_mask_all_covers_every_facility() {
        for fac in [
            FACILITY_SINK,
            FACILITY_SOURCE,
            FACILITY_SINK_INPUT,
            FACILITY_SOURCE_OUTPUT,
            FACILITY_MODULE,
            FACILITY_CLIENT,
            FACILITY_SAMPLE_CACHE,
            FACILITY_SERVER,
            FACILITY_AUTOLOAD,
            FACILITY_CARD,
        ] {
            assert_ne!(facility_mask_bit(fac) & MASK_ALL, 0);
        }
    }
}
