use crate::additional::Additional;
use crate::models::{
    ArchiveArgs, ArchiveDecompressArgs, ArchiveInnerArgs, ArchiveMeta, FileStream, Link,
    LinkArgs, ListArgs, Obj, Storage, StorageDetails,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Static descriptor supplied by a driver implementation.
///
/// `name` is the registry key and must be unique host-wide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    #[serde(default)]
    pub local_sort: bool,
    #[serde(default)]
    pub only_local: bool,
    #[serde(default)]
    pub only_proxy: bool,
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default)]
    pub no_upload: bool,
    #[serde(default)]
    pub need_ms: bool,
    #[serde(default)]
    pub default_root: String,
    #[serde(default)]
    pub check_status: bool,
    #[serde(default)]
    pub alert: String,
    #[serde(default)]
    pub no_overwrite_upload: bool,
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One independently implementable group of optional driver methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    GetRoot,
    Get,
    GetObjInfo,
    MakeDir,
    MakeDirResult,
    Move,
    MoveResult,
    Rename,
    RenameResult,
    Copy,
    CopyResult,
    Remove,
    Put,
    PutResult,
    PutUrl,
    PutUrlResult,
    /// Archive metadata, listing and extraction.
    ArchiveReader,
    ArchiveGet,
    ArchiveDecompress,
    ArchiveDecompressResult,
    Details,
}

impl Capability {
    pub const ALL: [Capability; 21] = [
        Capability::GetRoot,
        Capability::Get,
        Capability::GetObjInfo,
        Capability::MakeDir,
        Capability::MakeDirResult,
        Capability::Move,
        Capability::MoveResult,
        Capability::Rename,
        Capability::RenameResult,
        Capability::Copy,
        Capability::CopyResult,
        Capability::Remove,
        Capability::Put,
        Capability::PutResult,
        Capability::PutUrl,
        Capability::PutUrlResult,
        Capability::ArchiveReader,
        Capability::ArchiveGet,
        Capability::ArchiveDecompress,
        Capability::ArchiveDecompressResult,
        Capability::Details,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GetRoot => "get_root",
            Capability::Get => "get",
            Capability::GetObjInfo => "get_obj_info",
            Capability::MakeDir => "make_dir",
            Capability::MakeDirResult => "make_dir_result",
            Capability::Move => "move",
            Capability::MoveResult => "move_result",
            Capability::Rename => "rename",
            Capability::RenameResult => "rename_result",
            Capability::Copy => "copy",
            Capability::CopyResult => "copy_result",
            Capability::Remove => "remove",
            Capability::Put => "put",
            Capability::PutResult => "put_result",
            Capability::PutUrl => "put_url",
            Capability::PutUrlResult => "put_url_result",
            Capability::ArchiveReader => "archive_reader",
            Capability::ArchiveGet => "archive_get",
            Capability::ArchiveDecompress => "archive_decompress",
            Capability::ArchiveDecompressResult => "archive_decompress_result",
            Capability::Details => "details",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of optional capabilities a driver declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call context: an optional deadline plus a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `Cancelled` or `Timeout` once the call should be abandoned.
    pub fn check(&self) -> DriverResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(DriverError::Timeout),
            _ => Ok(()),
        }
    }
}

/// Failure categories surfaced by drivers, local or remote.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("operation not supported: {capability}")]
    Unsupported { capability: Capability },
    #[error("invalid driver index {index} (plugin serves {count} drivers)")]
    InvalidIndex { index: usize, count: usize },
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("protocol error: {message}")]
    Protocol { message: String },
    #[error("call cancelled")]
    Cancelled,
    #[error("call timed out")]
    Timeout,
    #[error("object not found: {path}")]
    NotFound { path: String },
    #[error("{message}")]
    Operation { message: String },
}

impl DriverError {
    pub fn unsupported(capability: Capability) -> Self {
        Self::Unsupported { capability }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Storage driver contract.
///
/// The mandatory methods must be implemented by every driver. Optional methods
/// default to [`DriverError::Unsupported`]; a driver that overrides one must
/// also declare the matching [`Capability`] from [`Driver::capabilities`],
/// which is what dispatchers consult.
pub trait Driver: Send + Sync {
    fn config(&self) -> DriverResult<DriverConfig>;

    fn storage(&self) -> DriverResult<Storage>;

    fn set_storage(&self, storage: Storage) -> DriverResult<()>;

    fn addition(&self) -> DriverResult<Additional>;

    /// Replaces the driver's additional configuration wholesale.
    fn set_addition(&self, addition: Additional) -> DriverResult<()>;

    fn init(&self, ctx: &Context) -> DriverResult<()>;

    fn teardown(&self, ctx: &Context) -> DriverResult<()>;

    fn list(&self, ctx: &Context, dir: &Obj, args: &ListArgs) -> DriverResult<Vec<Obj>>;

    fn link(&self, ctx: &Context, file: &Obj, args: &LinkArgs) -> DriverResult<Link>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    fn get_root(&self, _ctx: &Context) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::GetRoot))
    }

    fn get(&self, _ctx: &Context, _path: &str) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::Get))
    }

    fn get_obj_info(&self, _ctx: &Context, _path: &str) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::GetObjInfo))
    }

    fn make_dir(&self, _ctx: &Context, _parent: &Obj, _name: &str) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::MakeDir))
    }

    fn make_dir_result(&self, _ctx: &Context, _parent: &Obj, _name: &str) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::MakeDirResult))
    }

    fn move_obj(&self, _ctx: &Context, _src: &Obj, _dst_dir: &Obj) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::Move))
    }

    fn move_result(&self, _ctx: &Context, _src: &Obj, _dst_dir: &Obj) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::MoveResult))
    }

    fn rename(&self, _ctx: &Context, _src: &Obj, _new_name: &str) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::Rename))
    }

    fn rename_result(&self, _ctx: &Context, _src: &Obj, _new_name: &str) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::RenameResult))
    }

    fn copy(&self, _ctx: &Context, _src: &Obj, _dst_dir: &Obj) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::Copy))
    }

    fn copy_result(&self, _ctx: &Context, _src: &Obj, _dst_dir: &Obj) -> DriverResult<Vec<Obj>> {
        Err(DriverError::unsupported(Capability::CopyResult))
    }

    fn remove(&self, _ctx: &Context, _obj: &Obj) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::Remove))
    }

    fn put(&self, _ctx: &Context, _dst_dir: &Obj, _file: &FileStream) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::Put))
    }

    fn put_result(&self, _ctx: &Context, _dst_dir: &Obj, _file: &FileStream) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::PutResult))
    }

    fn put_url(&self, _ctx: &Context, _dst_dir: &Obj, _name: &str, _url: &str) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::PutUrl))
    }

    fn put_url_result(
        &self,
        _ctx: &Context,
        _dst_dir: &Obj,
        _name: &str,
        _url: &str,
    ) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::PutUrlResult))
    }

    fn get_archive_meta(
        &self,
        _ctx: &Context,
        _obj: &Obj,
        _args: &ArchiveArgs,
    ) -> DriverResult<ArchiveMeta> {
        Err(DriverError::unsupported(Capability::ArchiveReader))
    }

    fn list_archive(
        &self,
        _ctx: &Context,
        _obj: &Obj,
        _args: &ArchiveInnerArgs,
    ) -> DriverResult<Vec<Obj>> {
        Err(DriverError::unsupported(Capability::ArchiveReader))
    }

    fn extract(&self, _ctx: &Context, _obj: &Obj, _args: &ArchiveInnerArgs) -> DriverResult<Link> {
        Err(DriverError::unsupported(Capability::ArchiveReader))
    }

    fn archive_get(
        &self,
        _ctx: &Context,
        _obj: &Obj,
        _args: &ArchiveInnerArgs,
    ) -> DriverResult<Obj> {
        Err(DriverError::unsupported(Capability::ArchiveGet))
    }

    fn archive_decompress(
        &self,
        _ctx: &Context,
        _src: &Obj,
        _dst_dir: &Obj,
        _args: &ArchiveDecompressArgs,
    ) -> DriverResult<()> {
        Err(DriverError::unsupported(Capability::ArchiveDecompress))
    }

    fn archive_decompress_result(
        &self,
        _ctx: &Context,
        _src: &Obj,
        _dst_dir: &Obj,
        _args: &ArchiveDecompressArgs,
    ) -> DriverResult<Vec<Obj>> {
        Err(DriverError::unsupported(Capability::ArchiveDecompressResult))
    }

    fn get_details(&self, _ctx: &Context) -> DriverResult<StorageDetails> {
        Err(DriverError::unsupported(Capability::Details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_serialize_as_ordered_names() {
        let caps = Capabilities::empty()
            .with(Capability::Remove)
            .with(Capability::GetRoot);
        let json = serde_json::to_string(&caps).unwrap();
        assert_eq!(json, r#"["get_root","remove"]"#);
        let back: Capabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(back, caps);
    }

    #[test]
    fn all_capabilities_are_distinct() {
        assert_eq!(Capabilities::all().len(), Capability::ALL.len());
    }

    #[test]
    fn context_reports_cancellation_before_deadline() {
        let token = CancelToken::new();
        let ctx = Context::with_timeout(Duration::from_secs(60)).with_cancel(token.clone());
        assert!(ctx.check().is_ok());
        token.cancel();
        assert_eq!(ctx.check(), Err(DriverError::Cancelled));
    }

    #[test]
    fn context_past_deadline_times_out() {
        let ctx = Context::background().with_deadline(Instant::now());
        assert_eq!(ctx.check(), Err(DriverError::Timeout));
    }
}
