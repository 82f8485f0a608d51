//! Public snapshots of server entities
//!
//! These are owned, fully decoded views of the raw records the transport
//! returns: fixed-point volumes become [`Volume`] fractions and invalid
//! index sentinels become `Option`s. A snapshot is only as fresh as the
//! query that produced it; the facade helpers that take a snapshot by
//! `&mut` patch the written fields in place once the server acknowledges
//! the change, so the held copy stays usable without a refetch.

use pulse_transport::types::{
    RawCardInfo, RawCardProfileInfo, RawClientInfo, RawExtStreamRestore, RawModuleInfo,
    RawPortInfo, RawServerInfo, RawSinkInfo, RawSinkInputInfo, RawSourceInfo, RawSourceOutputInfo,
    INVALID_INDEX,
};
pub use pulse_transport::types::{ChannelMap, PortAvailable, SampleSpec};

use crate::volume::Volume;

/// The entity tables a facade operation can address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Client,
    Card,
    Module,
}

/// An indexed entity snapshot usable with the generic facade operations
pub trait Entity {
    const KIND: EntityKind;
    fn index(&self) -> u32;
}

/// Snapshot kinds that carry a volume and a mute flag
///
/// The snapshot-taking mutation helpers use these accessors to patch the
/// held record after a successful write.
pub trait VolumeEntity: Entity {
    fn volume(&self) -> &Volume;
    fn volume_mut(&mut self) -> &mut Volume;
    fn mute(&self) -> bool;
    fn mute_mut(&mut self) -> &mut bool;
}

macro_rules! volume_entity {
    ($ty:ty) => {
        impl VolumeEntity for $ty {
            fn volume(&self) -> &Volume {
                &self.volume
            }
            fn volume_mut(&mut self) -> &mut Volume {
                &mut self.volume
            }
            fn mute(&self) -> bool {
                self.mute
            }
            fn mute_mut(&mut self) -> &mut bool {
                &mut self.mute
            }
        }
    };
}

fn opt_index(index: u32) -> Option<u32> {
    (index != INVALID_INDEX).then_some(index)
}

/// A device port. The name is the port's identity: equality and hashing
/// ignore the descriptive fields, so a port compares equal across
/// snapshots even when its availability changed in between.
#[derive(Debug, Clone, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
    pub priority: u32,
    pub available: PortAvailable,
}

impl PartialEq for PortInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::hash::Hash for PortInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl From<RawPortInfo> for PortInfo {
    fn from(raw: RawPortInfo) -> Self {
        Self {
            name: raw.name,
            description: raw.description,
            priority: raw.priority,
            available: raw.available,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub owner_module: u32,
    pub volume: Volume,
    pub mute: bool,
    pub monitor_source: u32,
    pub monitor_source_name: String,
    pub latency_usec: u64,
    pub driver: String,
    pub card: Option<u32>,
    pub ports: Vec<PortInfo>,
    pub active_port: Option<PortInfo>,
}

impl From<RawSinkInfo> for SinkInfo {
    fn from(raw: RawSinkInfo) -> Self {
        Self {
            index: raw.index,
            name: raw.name,
            description: raw.description,
            sample_spec: raw.sample_spec,
            channel_map: raw.channel_map,
            owner_module: raw.owner_module,
            volume: Volume::from_raw(&raw.volume),
            mute: raw.mute,
            monitor_source: raw.monitor_source,
            monitor_source_name: raw.monitor_source_name,
            latency_usec: raw.latency,
            driver: raw.driver,
            card: opt_index(raw.card),
            ports: raw.ports.into_iter().map(Into::into).collect(),
            active_port: raw.active_port.map(Into::into),
        }
    }
}

impl Entity for SinkInfo {
    const KIND: EntityKind = EntityKind::Sink;
    fn index(&self) -> u32 {
        self.index
    }
}

volume_entity!(SinkInfo);

#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub owner_module: u32,
    pub volume: Volume,
    pub mute: bool,
    /// Sink this source monitors, when it is a monitor source
    pub monitor_of_sink: Option<u32>,
    pub latency_usec: u64,
    pub driver: String,
    pub card: Option<u32>,
    pub ports: Vec<PortInfo>,
    pub active_port: Option<PortInfo>,
}

impl From<RawSourceInfo> for SourceInfo {
    fn from(raw: RawSourceInfo) -> Self {
        Self {
            index: raw.index,
            name: raw.name,
            description: raw.description,
            sample_spec: raw.sample_spec,
            channel_map: raw.channel_map,
            owner_module: raw.owner_module,
            volume: Volume::from_raw(&raw.volume),
            mute: raw.mute,
            monitor_of_sink: opt_index(raw.monitor_of_sink),
            latency_usec: raw.latency,
            driver: raw.driver,
            card: opt_index(raw.card),
            ports: raw.ports.into_iter().map(Into::into).collect(),
            active_port: raw.active_port.map(Into::into),
        }
    }
}

impl Entity for SourceInfo {
    const KIND: EntityKind = EntityKind::Source;
    fn index(&self) -> u32 {
        self.index
    }
}

volume_entity!(SourceInfo);

#[derive(Debug, Clone, PartialEq)]
pub struct SinkInputInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    /// Owning client, `None` for client-less streams
    pub client: Option<u32>,
    pub sink: u32,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub volume: Volume,
    pub mute: bool,
    pub corked: bool,
    pub driver: String,
}

impl From<RawSinkInputInfo> for SinkInputInfo {
    fn from(raw: RawSinkInputInfo) -> Self {
        Self {
            index: raw.index,
            name: raw.name,
            owner_module: raw.owner_module,
            client: opt_index(raw.client),
            sink: raw.sink,
            sample_spec: raw.sample_spec,
            channel_map: raw.channel_map,
            volume: Volume::from_raw(&raw.volume),
            mute: raw.mute,
            corked: raw.corked,
            driver: raw.driver,
        }
    }
}

impl Entity for SinkInputInfo {
    const KIND: EntityKind = EntityKind::SinkInput;
    fn index(&self) -> u32 {
        self.index
    }
}

volume_entity!(SinkInputInfo);

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutputInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    /// Owning client, `None` for client-less streams
    pub client: Option<u32>,
    pub source: u32,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub volume: Volume,
    pub mute: bool,
    pub corked: bool,
    pub driver: String,
}

impl From<RawSourceOutputInfo> for SourceOutputInfo {
    fn from(raw: RawSourceOutputInfo) -> Self {
        Self {
            index: raw.index,
            name: raw.name,
            owner_module: raw.owner_module,
            client: opt_index(raw.client),
            source: raw.source,
            sample_spec: raw.sample_spec,
            channel_map: raw.channel_map,
            volume: Volume::from_raw(&raw.volume),
            mute: raw.mute,
            corked: raw.corked,
            driver: raw.driver,
        }
    }
}

impl Entity for SourceOutputInfo {
    const KIND: EntityKind = EntityKind::SourceOutput;
    fn index(&self) -> u32 {
        self.index
    }
}

volume_entity!(SourceOutputInfo);

#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    pub driver: String,
}

impl From<RawClientInfo> for ClientInfo {
    fn from(raw: RawClientInfo) -> Self {
        Self {
            index: raw.index,
            name: raw.name,
            owner_module: raw.owner_module,
            driver: raw.driver,
        }
    }
}

impl Entity for ClientInfo {
    const KIND: EntityKind = EntityKind::Client;
    fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardProfileInfo {
    pub name: String,
    pub description: String,
    pub n_sinks: u32,
    pub n_sources: u32,
    pub priority: u32,
}

impl From<RawCardProfileInfo> for CardProfileInfo {
    fn from(raw: RawCardProfileInfo) -> Self {
        Self {
            name: raw.name,
            description: raw.description,
            n_sinks: raw.n_sinks,
            n_sources: raw.n_sources,
            priority: raw.priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardInfo {
    pub index: u32,
    pub name: String,
    pub owner_module: u32,
    pub driver: String,
    pub profiles: Vec<CardProfileInfo>,
    pub active_profile: Option<String>,
}

impl From<RawCardInfo> for CardInfo {
    fn from(raw: RawCardInfo) -> Self {
        Self {
            index: raw.index,
            name: raw.name,
            owner_module: raw.owner_module,
            driver: raw.driver,
            profiles: raw.profiles.into_iter().map(Into::into).collect(),
            active_profile: raw.active_profile,
        }
    }
}

impl Entity for CardInfo {
    const KIND: EntityKind = EntityKind::Card;
    fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInfo {
    pub index: u32,
    pub name: String,
    pub argument: Option<String>,
    pub n_used: u32,
}

impl From<RawModuleInfo> for ModuleInfo {
    fn from(raw: RawModuleInfo) -> Self {
        Self {
            index: raw.index,
            name: raw.name,
            argument: raw.argument,
            n_used: raw.n_used,
        }
    }
}

impl Entity for ModuleInfo {
    const KIND: EntityKind = EntityKind::Module;
    fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
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

impl From<RawServerInfo> for ServerInfo {
    fn from(raw: RawServerInfo) -> Self {
        Self {
            user_name: raw.user_name,
            host_name: raw.host_name,
            server_version: raw.server_version,
            server_name: raw.server_name,
            sample_spec: raw.sample_spec,
            channel_map: raw.channel_map,
            default_sink_name: raw.default_sink_name,
            default_source_name: raw.default_source_name,
            cookie: raw.cookie,
        }
    }
}

/// One stream-restore rule from the server's restore database
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRestoreInfo {
    pub name: String,
    pub channel_map: ChannelMap,
    pub volume: Volume,
    pub mute: bool,
    pub device: Option<String>,
}

impl From<RawExtStreamRestore> for StreamRestoreInfo {
    fn from(raw: RawExtStreamRestore) -> Self {
        Self {
            name: raw.name,
            channel_map: raw.channel_map,
            volume: Volume::from_raw(&raw.volume),
            mute: raw.mute,
            device: raw.device,
        }
    }
}

impl StreamRestoreInfo {
    pub(crate) fn to_raw(&self) -> RawExtStreamRestore {
        RawExtStreamRestore {
            name: self.name.clone(),
            channel_map: self.channel_map,
            volume: self.volume.to_raw(),
            mute: self.mute,
            device: self.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_transport::types::CVolume;

    #[test]
    fn test_port_identity_is_its_name() {
        let a = PortInfo {
            name: "analog-output".into(),
            description: "Analog Output".into(),
            priority: 9000,
            available: PortAvailable::Yes,
        };
        let mut b = a.clone();
        b.priority = 100;
        b.available = PortAvailable::No;
        assert_eq!(a, b);
        b.name = "hdmi-output".into();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_index_becomes_none() {
        let raw = RawSinkInputInfo {
            index: 3,
            client: INVALID_INDEX,
            volume: CVolume::new(&[0x10000]),
            ..Default::default()
        };
        let info = SinkInputInfo::from(raw);
        assert_eq!(info.client, None);
        assert_eq!(info.volume.values, vec![1.0]);
    }
}
