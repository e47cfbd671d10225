//! Wire protocol spoken between the host and plugin processes.
//!
//! Both directions carry one JSON document per line. The plugin opens with a
//! [`HandshakeLine`]; afterwards the host writes [`Request`]s to the plugin's
//! stdin and the plugin answers with [`Response`]s on stdout, in any order.

use drivehub_core::{
    Additional, ArchiveArgs, ArchiveDecompressArgs, ArchiveInnerArgs, ArchiveMeta, Capabilities,
    Capability, DriverConfig, DriverError, FileStream, Link, LinkArgs, ListArgs, Obj, Storage,
    StorageDetails,
};
use serde::{Deserialize, Serialize};

/// Environment variable the host sets on every plugin process.
pub const MAGIC_COOKIE_KEY: &str = "DRIVEHUB_PLUGIN";
/// Value a plugin must find in [`MAGIC_COOKIE_KEY`] and echo in its handshake.
pub const MAGIC_COOKIE_VALUE: &str = "drivehub";
/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;
/// Channel used for plugin metadata during discovery.
pub const MAIN_CHANNEL: &str = "main";

/// First line a plugin writes after start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeLine {
    pub magic_cookie: String,
    pub protocol_version: u32,
    /// Every channel the plugin serves.
    pub channels: Vec<String>,
}

impl HandshakeLine {
    pub fn new(channels: Vec<String>) -> Self {
        Self {
            magic_cookie: MAGIC_COOKIE_VALUE.to_string(),
            protocol_version: PROTOCOL_VERSION,
            channels,
        }
    }
}

/// Plugin metadata returned by `Info` on the main channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    /// Driver identifiers in declaration order; each doubles as a channel name.
    #[serde(default)]
    pub driver_ids: Vec<String>,
}

/// One driver exposed by a plugin, as learned during binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverMeta {
    /// Position in [`PluginInfo::driver_ids`]; only meaningful together with the channel.
    pub index: usize,
    pub config: DriverConfig,
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// Request sent from the host to a plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID for correlation.
    pub id: u64,
    /// Channel the request is addressed to.
    pub channel: String,
    /// Driver instance minted by `NewInstance`; absent means the driver's
    /// shared default instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<u64>,
    pub method: Method,
}

/// Response from a plugin process to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response correlates to.
    pub id: u64,
    pub result: Reply,
}

/// Methods that can be invoked on a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Method {
    /// Return the plugin metadata.
    Info,
    /// Exit gracefully.
    Shutdown,
    Config {
        index: usize,
    },
    Capabilities {
        index: usize,
    },
    /// Create a driver instance with its own configuration state.
    NewInstance {
        index: usize,
    },
    /// Forget the instance named by the request.
    ReleaseInstance {
        index: usize,
    },
    GetStorage {
        index: usize,
    },
    SetStorage {
        index: usize,
        storage: Storage,
    },
    GetAddition {
        index: usize,
    },
    SetAddition {
        index: usize,
        addition: Additional,
    },
    Init {
        index: usize,
    },
    Drop {
        index: usize,
    },
    List {
        index: usize,
        dir: Obj,
        #[serde(default)]
        args: ListArgs,
    },
    Link {
        index: usize,
        file: Obj,
        #[serde(default)]
        args: LinkArgs,
    },
    GetRoot {
        index: usize,
    },
    Get {
        index: usize,
        path: String,
    },
    GetObjInfo {
        index: usize,
        path: String,
    },
    MakeDir {
        index: usize,
        parent: Obj,
        name: String,
    },
    MakeDirResult {
        index: usize,
        parent: Obj,
        name: String,
    },
    Move {
        index: usize,
        src: Obj,
        dst_dir: Obj,
    },
    MoveResult {
        index: usize,
        src: Obj,
        dst_dir: Obj,
    },
    Rename {
        index: usize,
        src: Obj,
        new_name: String,
    },
    RenameResult {
        index: usize,
        src: Obj,
        new_name: String,
    },
    Copy {
        index: usize,
        src: Obj,
        dst_dir: Obj,
    },
    CopyResult {
        index: usize,
        src: Obj,
        dst_dir: Obj,
    },
    Remove {
        index: usize,
        obj: Obj,
    },
    Put {
        index: usize,
        dst_dir: Obj,
        file: FileStream,
    },
    PutResult {
        index: usize,
        dst_dir: Obj,
        file: FileStream,
    },
    #[serde(rename = "PutURL")]
    PutUrl {
        index: usize,
        dst_dir: Obj,
        name: String,
        url: String,
    },
    #[serde(rename = "PutURLResult")]
    PutUrlResult {
        index: usize,
        dst_dir: Obj,
        name: String,
        url: String,
    },
    GetArchiveMeta {
        index: usize,
        obj: Obj,
        args: ArchiveArgs,
    },
    ListArchive {
        index: usize,
        obj: Obj,
        args: ArchiveInnerArgs,
    },
    Extract {
        index: usize,
        obj: Obj,
        args: ArchiveInnerArgs,
    },
    ArchiveGet {
        index: usize,
        obj: Obj,
        args: ArchiveInnerArgs,
    },
    ArchiveDecompress {
        index: usize,
        src: Obj,
        dst_dir: Obj,
        args: ArchiveDecompressArgs,
    },
    ArchiveDecompressResult {
        index: usize,
        src: Obj,
        dst_dir: Obj,
        args: ArchiveDecompressArgs,
    },
    GetDetails {
        index: usize,
    },
}

impl Method {
    /// Wire name, as it appears in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Method::Info => "Info",
            Method::Shutdown => "Shutdown",
            Method::Config { .. } => "Config",
            Method::Capabilities { .. } => "Capabilities",
            Method::NewInstance { .. } => "NewInstance",
            Method::ReleaseInstance { .. } => "ReleaseInstance",
            Method::GetStorage { .. } => "GetStorage",
            Method::SetStorage { .. } => "SetStorage",
            Method::GetAddition { .. } => "GetAddition",
            Method::SetAddition { .. } => "SetAddition",
            Method::Init { .. } => "Init",
            Method::Drop { .. } => "Drop",
            Method::List { .. } => "List",
            Method::Link { .. } => "Link",
            Method::GetRoot { .. } => "GetRoot",
            Method::Get { .. } => "Get",
            Method::GetObjInfo { .. } => "GetObjInfo",
            Method::MakeDir { .. } => "MakeDir",
            Method::MakeDirResult { .. } => "MakeDirResult",
            Method::Move { .. } => "Move",
            Method::MoveResult { .. } => "MoveResult",
            Method::Rename { .. } => "Rename",
            Method::RenameResult { .. } => "RenameResult",
            Method::Copy { .. } => "Copy",
            Method::CopyResult { .. } => "CopyResult",
            Method::Remove { .. } => "Remove",
            Method::Put { .. } => "Put",
            Method::PutResult { .. } => "PutResult",
            Method::PutUrl { .. } => "PutURL",
            Method::PutUrlResult { .. } => "PutURLResult",
            Method::GetArchiveMeta { .. } => "GetArchiveMeta",
            Method::ListArchive { .. } => "ListArchive",
            Method::Extract { .. } => "Extract",
            Method::ArchiveGet { .. } => "ArchiveGet",
            Method::ArchiveDecompress { .. } => "ArchiveDecompress",
            Method::ArchiveDecompressResult { .. } => "ArchiveDecompressResult",
            Method::GetDetails { .. } => "GetDetails",
        }
    }

    /// Driver index the call is addressed to; `None` for plugin-level methods.
    pub fn index(&self) -> Option<usize> {
        match self {
            Method::Info | Method::Shutdown => None,
            Method::Config { index }
            | Method::Capabilities { index }
            | Method::NewInstance { index }
            | Method::ReleaseInstance { index }
            | Method::GetStorage { index }
            | Method::SetStorage { index, .. }
            | Method::GetAddition { index }
            | Method::SetAddition { index, .. }
            | Method::Init { index }
            | Method::Drop { index }
            | Method::List { index, .. }
            | Method::Link { index, .. }
            | Method::GetRoot { index }
            | Method::Get { index, .. }
            | Method::GetObjInfo { index, .. }
            | Method::MakeDir { index, .. }
            | Method::MakeDirResult { index, .. }
            | Method::Move { index, .. }
            | Method::MoveResult { index, .. }
            | Method::Rename { index, .. }
            | Method::RenameResult { index, .. }
            | Method::Copy { index, .. }
            | Method::CopyResult { index, .. }
            | Method::Remove { index, .. }
            | Method::Put { index, .. }
            | Method::PutResult { index, .. }
            | Method::PutUrl { index, .. }
            | Method::PutUrlResult { index, .. }
            | Method::GetArchiveMeta { index, .. }
            | Method::ListArchive { index, .. }
            | Method::Extract { index, .. }
            | Method::ArchiveGet { index, .. }
            | Method::ArchiveDecompress { index, .. }
            | Method::ArchiveDecompressResult { index, .. }
            | Method::GetDetails { index } => Some(*index),
        }
    }

    /// Optional capability the method belongs to; `None` for mandatory methods.
    pub fn capability(&self) -> Option<Capability> {
        let capability = match self {
            Method::GetRoot { .. } => Capability::GetRoot,
            Method::Get { .. } => Capability::Get,
            Method::GetObjInfo { .. } => Capability::GetObjInfo,
            Method::MakeDir { .. } => Capability::MakeDir,
            Method::MakeDirResult { .. } => Capability::MakeDirResult,
            Method::Move { .. } => Capability::Move,
            Method::MoveResult { .. } => Capability::MoveResult,
            Method::Rename { .. } => Capability::Rename,
            Method::RenameResult { .. } => Capability::RenameResult,
            Method::Copy { .. } => Capability::Copy,
            Method::CopyResult { .. } => Capability::CopyResult,
            Method::Remove { .. } => Capability::Remove,
            Method::Put { .. } => Capability::Put,
            Method::PutResult { .. } => Capability::PutResult,
            Method::PutUrl { .. } => Capability::PutUrl,
            Method::PutUrlResult { .. } => Capability::PutUrlResult,
            Method::GetArchiveMeta { .. } | Method::ListArchive { .. } | Method::Extract { .. } => {
                Capability::ArchiveReader
            }
            Method::ArchiveGet { .. } => Capability::ArchiveGet,
            Method::ArchiveDecompress { .. } => Capability::ArchiveDecompress,
            Method::ArchiveDecompressResult { .. } => Capability::ArchiveDecompressResult,
            Method::GetDetails { .. } => Capability::Details,
            _ => return None,
        };
        Some(capability)
    }
}

/// Result of a method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Reply {
    Info(PluginInfo),
    Config(DriverConfig),
    Capabilities { capabilities: Capabilities },
    Instance { instance: u64 },
    Storage { storage: Storage },
    Addition(Additional),
    Obj(Obj),
    Objs { objs: Vec<Obj> },
    Link(Link),
    ArchiveMeta(ArchiveMeta),
    Details(StorageDetails),
    /// Method completed with no value.
    Done,
    ShutdownAck,
    Error(RpcError),
}

impl Reply {
    pub fn status(&self) -> &'static str {
        match self {
            Reply::Info(_) => "Info",
            Reply::Config(_) => "Config",
            Reply::Capabilities { .. } => "Capabilities",
            Reply::Instance { .. } => "Instance",
            Reply::Storage { .. } => "Storage",
            Reply::Addition(_) => "Addition",
            Reply::Obj(_) => "Obj",
            Reply::Objs { .. } => "Objs",
            Reply::Link(_) => "Link",
            Reply::ArchiveMeta(_) => "ArchiveMeta",
            Reply::Details(_) => "Details",
            Reply::Done => "Done",
            Reply::ShutdownAck => "ShutdownAck",
            Reply::Error(_) => "Error",
        }
    }
}

/// Error returned over the wire.
///
/// Carries enough detail for the host to rebuild the same [`DriverError`]
/// variant the plugin-side driver produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    Unsupported,
    InvalidIndex,
    Transport,
    Protocol,
    Cancelled,
    Timeout,
    NotFound,
    Operation,
}

impl RpcError {
    fn bare(kind: RpcErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            capability: None,
            index: None,
            count: None,
            path: None,
        }
    }
}

impl From<DriverError> for RpcError {
    fn from(err: DriverError) -> Self {
        let message = err.to_string();
        match err {
            DriverError::Unsupported { capability } => Self {
                capability: Some(capability),
                ..Self::bare(RpcErrorKind::Unsupported, message)
            },
            DriverError::InvalidIndex { index, count } => Self {
                index: Some(index),
                count: Some(count),
                ..Self::bare(RpcErrorKind::InvalidIndex, message)
            },
            DriverError::Transport { message } => Self::bare(RpcErrorKind::Transport, message),
            DriverError::Protocol { message } => Self::bare(RpcErrorKind::Protocol, message),
            DriverError::Cancelled => Self::bare(RpcErrorKind::Cancelled, message),
            DriverError::Timeout => Self::bare(RpcErrorKind::Timeout, message),
            DriverError::NotFound { path } => Self {
                path: Some(path),
                ..Self::bare(RpcErrorKind::NotFound, message)
            },
            DriverError::Operation { message } => Self::bare(RpcErrorKind::Operation, message),
        }
    }
}

impl From<RpcError> for DriverError {
    fn from(err: RpcError) -> Self {
        match err.kind {
            RpcErrorKind::Unsupported => match err.capability {
                Some(capability) => DriverError::Unsupported { capability },
                None => DriverError::Protocol {
                    message: format!("unsupported error without capability: {}", err.message),
                },
            },
            RpcErrorKind::InvalidIndex => DriverError::InvalidIndex {
                index: err.index.unwrap_or_default(),
                count: err.count.unwrap_or_default(),
            },
            RpcErrorKind::Transport => DriverError::Transport {
                message: err.message,
            },
            RpcErrorKind::Protocol => DriverError::Protocol {
                message: err.message,
            },
            RpcErrorKind::Cancelled => DriverError::Cancelled,
            RpcErrorKind::Timeout => DriverError::Timeout,
            RpcErrorKind::NotFound => DriverError::NotFound {
                path: err.path.unwrap_or(err.message),
            },
            RpcErrorKind::Operation => DriverError::Operation {
                message: err.message,
            },
        }
    }
}
