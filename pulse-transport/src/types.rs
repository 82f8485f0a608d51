//! Native value types and raw entity records
//!
//! Everything here is a fixed-size snapshot copied across the transport
//! boundary at query time — the layout mirrors the protocol's own info
//! structures. Interpretation (volume scaling, port identity, client
//! joins) happens in the client crate, not here.

/// Maximum channels a volume or channel map can carry
pub const CHANNELS_MAX: usize = 32;

/// Fixed-point volume of 100% (0 dB)
pub const VOLUME_NORM: u32 = 0x10000;

/// Fixed-point muted volume
pub const VOLUME_MUTED: u32 = 0;

/// Highest volume a UI should offer: +11 dB over norm
pub const VOLUME_UI_MAX: u32 = 99_957;

/// Index value meaning "no such entity"
pub const INVALID_INDEX: u32 = u32::MAX;

/// Sample format and rate of a device or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleSpec {
    pub format: i32,
    pub rate: u32,
    pub channels: u8,
}

/// Channel position layout, opaque to this library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    pub channels: u8,
    pub map: [u8; CHANNELS_MAX],
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            channels: 0,
            map: [0; CHANNELS_MAX],
        }
    }
}

impl ChannelMap {
    pub fn stereo() -> Self {
        let mut map = Self::default();
        map.channels = 2;
        map
    }
}

/// Per-channel fixed-point volume as exchanged with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CVolume {
    pub channels: u8,
    pub values: [u32; CHANNELS_MAX],
}

impl Default for CVolume {
    fn default() -> Self {
        Self {
            channels: 0,
            values: [VOLUME_MUTED; CHANNELS_MAX],
        }
    }
}

impl CVolume {
    pub fn new(values: &[u32]) -> Self {
        let mut v = Self::default();
        v.channels = values.len().min(CHANNELS_MAX) as u8;
        v.values[..v.channels as usize].copy_from_slice(&values[..v.channels as usize]);
        v
    }

    /// The populated slice of channel values
    pub fn as_slice(&self) -> &[u32] {
        &self.values[..self.channels as usize]
    }
}

/// Port availability as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortAvailable {
    #[default]
    Unknown,
    No,
    Yes,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPortInfo {
    pub name: String,
    pub description: String,
    pub priority: u32,
    pub available: PortAvailable,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSinkInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub owner_module: u32,
    pub volume: CVolume,
    pub mute: bool,
    pub monitor_source: u32,
    pub monitor_source_name: String,
    pub latency: u64,
    pub configured_latency: u64,
    pub driver: String,
    pub flags: u32,
    pub card: u32,
    pub ports: Vec<RawPortInfo>,
    pub active_port: Option<RawPortInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSourceInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub owner_module: u32,
    pub volume: CVolume,
    pub mute: bool,
    pub monitor_of_sink: u32,
    pub monitor_of_sink_name: Option<String>,
    pub latency: u64,
    pub configured_latency: u64,
    pub driver: String,
    pub flags: u32,
    pub card: u32,
    pub ports: Vec<RawPortInfo>,
    pub active_port: Option<RawPortInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSinkInputInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    /// Owning client index, `INVALID_INDEX` for client-less streams
    pub client: u32,
    pub sink: u32,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub volume: CVolume,
    pub mute: bool,
    pub corked: bool,
    pub buffer_usec: u64,
    pub sink_usec: u64,
    pub resample_method: Option<String>,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSourceOutputInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    /// Owning client index, `INVALID_INDEX` for client-less streams
    pub client: u32,
    pub source: u32,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub volume: CVolume,
    pub mute: bool,
    pub corked: bool,
    pub buffer_usec: u64,
    pub source_usec: u64,
    pub resample_method: Option<String>,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawClientInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCardProfileInfo {
    pub name: String,
    pub description: String,
    pub n_sinks: u32,
    pub n_sources: u32,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCardInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    pub driver: String,
    pub profiles: Vec<RawCardProfileInfo>,
    /// Name of the active profile, if any
    pub active_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawModuleInfo {
    pub index: u32,
    pub name: String,
    pub argument: Option<String>,
    pub n_used: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawServerInfo {
    pub user_name: String,
    pub host_name: String,
    pub server_version: String,
    pub server_name: String,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub default_sink_name: Option<String>,
    pub default_source_name: Option<String>,
    pub cookie: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawExtStreamRestore {
    pub name: String,
    pub channel_map: ChannelMap,
    pub volume: CVolume,
    pub mute: bool,
    /// Preferred device name, if the rule pins one
    pub device: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvolume_from_slice() {
        let v = CVolume::new(&[VOLUME_NORM, VOLUME_NORM / 2]);
        assert_eq!(v.channels, 2);
        assert_eq!(v.as_slice(), &[VOLUME_NORM, VOLUME_NORM / 2]);
    }

    #[test]
    fn test_cvolume_truncates_to_channels_max() {
        let v = CVolume::new(&[1u32; 40]);
        assert_eq!(v.channels as usize, CHANNELS_MAX);
    }
}
