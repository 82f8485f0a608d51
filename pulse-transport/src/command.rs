//! The closed command surface of the control protocol
//!
//! Each variant corresponds to one entry point of the underlying protocol
//! library. A submitted command produces a stream of [`Reply`] values:
//! zero or more records, then the end-of-results marker with the success
//! flag.

use crate::types::{
    CVolume, RawCardInfo, RawClientInfo, RawExtStreamRestore, RawModuleInfo, RawServerInfo,
    RawSinkInfo, RawSinkInputInfo, RawSourceInfo, RawSourceOutputInfo,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetServerInfo,

    GetSinkInfoList,
    GetSinkInfoByIndex(u32),
    GetSinkInfoByName(String),
    GetSourceInfoList,
    GetSourceInfoByIndex(u32),
    GetSourceInfoByName(String),
    GetSinkInputInfoList,
    GetSinkInputInfoByIndex(u32),
    GetSourceOutputInfoList,
    GetSourceOutputInfoByIndex(u32),
    GetClientInfoList,
    GetClientInfoByIndex(u32),
    GetCardInfoList,
    GetCardInfoByIndex(u32),
    GetCardInfoByName(String),
    GetModuleInfoList,
    GetModuleInfoByIndex(u32),

    SetSinkVolumeByIndex { index: u32, volume: CVolume },
    SetSinkMuteByIndex { index: u32, mute: bool },
    SetSinkPortByIndex { index: u32, port: String },
    SuspendSinkByIndex { index: u32, suspend: bool },
    SetSourceVolumeByIndex { index: u32, volume: CVolume },
    SetSourceMuteByIndex { index: u32, mute: bool },
    SetSourcePortByIndex { index: u32, port: String },
    SuspendSourceByIndex { index: u32, suspend: bool },

    SetSinkInputVolume { index: u32, volume: CVolume },
    SetSinkInputMute { index: u32, mute: bool },
    MoveSinkInputByIndex { index: u32, sink_index: u32 },
    SetSourceOutputVolume { index: u32, volume: CVolume },
    SetSourceOutputMute { index: u32, mute: bool },
    MoveSourceOutputByIndex { index: u32, source_index: u32 },

    SetCardProfileByIndex { index: u32, profile: String },
    SetDefaultSink(String),
    SetDefaultSource(String),

    LoadModule { name: String, argument: Option<String> },
    UnloadModule(u32),

    Subscribe(u32),

    ExtStreamRestoreRead,
    ExtStreamRestoreWrite {
        entries: Vec<RawExtStreamRestore>,
        apply_immediately: bool,
    },
    ExtStreamRestoreDelete(Vec<String>),
}

impl Command {
    /// Short protocol-level name, used in logs and error context
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetServerInfo => "get_server_info",
            Command::GetSinkInfoList => "get_sink_info_list",
            Command::GetSinkInfoByIndex(_) => "get_sink_info_by_index",
            Command::GetSinkInfoByName(_) => "get_sink_info_by_name",
            Command::GetSourceInfoList => "get_source_info_list",
            Command::GetSourceInfoByIndex(_) => "get_source_info_by_index",
            Command::GetSourceInfoByName(_) => "get_source_info_by_name",
            Command::GetSinkInputInfoList => "get_sink_input_info_list",
            Command::GetSinkInputInfoByIndex(_) => "get_sink_input_info",
            Command::GetSourceOutputInfoList => "get_source_output_info_list",
            Command::GetSourceOutputInfoByIndex(_) => "get_source_output_info",
            Command::GetClientInfoList => "get_client_info_list",
            Command::GetClientInfoByIndex(_) => "get_client_info",
            Command::GetCardInfoList => "get_card_info_list",
            Command::GetCardInfoByIndex(_) => "get_card_info_by_index",
            Command::GetCardInfoByName(_) => "get_card_info_by_name",
            Command::GetModuleInfoList => "get_module_info_list",
            Command::GetModuleInfoByIndex(_) => "get_module_info",
            Command::SetSinkVolumeByIndex { .. } => "set_sink_volume_by_index",
            Command::SetSinkMuteByIndex { .. } => "set_sink_mute_by_index",
            Command::SetSinkPortByIndex { .. } => "set_sink_port_by_index",
            Command::SuspendSinkByIndex { .. } => "suspend_sink_by_index",
            Command::SetSourceVolumeByIndex { .. } => "set_source_volume_by_index",
            Command::SetSourceMuteByIndex { .. } => "set_source_mute_by_index",
            Command::SetSourcePortByIndex { .. } => "set_source_port_by_index",
            Command::SuspendSourceByIndex { .. } => "suspend_source_by_index",
            Command::SetSinkInputVolume { .. } => "set_sink_input_volume",
            Command::SetSinkInputMute { .. } => "set_sink_input_mute",
            Command::MoveSinkInputByIndex { .. } => "move_sink_input_by_index",
            Command::SetSourceOutputVolume { .. } => "set_source_output_volume",
            Command::SetSourceOutputMute { .. } => "set_source_output_mute",
            Command::MoveSourceOutputByIndex { .. } => "move_source_output_by_index",
            Command::SetCardProfileByIndex { .. } => "set_card_profile_by_index",
            Command::SetDefaultSink(_) => "set_default_sink",
            Command::SetDefaultSource(_) => "set_default_source",
            Command::LoadModule { .. } => "load_module",
            Command::UnloadModule(_) => "unload_module",
            Command::Subscribe(_) => "subscribe",
            Command::ExtStreamRestoreRead => "ext_stream_restore_read",
            Command::ExtStreamRestoreWrite { .. } => "ext_stream_restore_write",
            Command::ExtStreamRestoreDelete(_) => "ext_stream_restore_delete",
        }
    }
}

/// One decoded record from a query's reply stream
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Sink(RawSinkInfo),
    Source(RawSourceInfo),
    SinkInput(RawSinkInputInfo),
    SourceOutput(RawSourceOutputInfo),
    Client(RawClientInfo),
    Card(RawCardInfo),
    Module(RawModuleInfo),
    Server(RawServerInfo),
    ExtStreamRestore(RawExtStreamRestore),
    /// Index allocated by the server (module load result)
    Index(u32),
}

/// One element of a command's reply stream
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Record(Record),
    /// End-of-results marker; `success = false` reports an operation
    /// failure (no further detail is available on this path)
    Done { success: bool },
}
