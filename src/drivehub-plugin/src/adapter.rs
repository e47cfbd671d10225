//! Driver proxy that forwards every call to a driver inside a plugin process.

use crate::protocol::{DriverMeta, Method, Reply};
use crate::transport::{lock, Channel};
use drivehub_core::{
    Additional, ArchiveArgs, ArchiveDecompressArgs, ArchiveInnerArgs, ArchiveMeta, Capabilities,
    Context, Driver, DriverConfig, DriverError, DriverResult, FileStream, Link, LinkArgs,
    ListArgs, Obj, Storage, StorageDetails,
};
use std::sync::Mutex;

/// A driver backed by an external plugin.
///
/// Bound to one channel and one index. Optional methods are forwarded like
/// mandatory ones; the plugin decides whether they are supported. Each proxy
/// owns a driver instance inside the plugin, created on its first stateful
/// call and released when the proxy is dropped, so storage and additional
/// configuration never leak between proxies.
pub struct RemoteDriver {
    channel: Channel,
    meta: DriverMeta,
    instance: Mutex<Option<u64>>,
}

impl RemoteDriver {
    pub fn new(channel: Channel, meta: DriverMeta) -> Self {
        Self {
            channel,
            meta,
            instance: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.meta.index
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Plugin-side instance id, if one has been created yet.
    pub fn instance(&self) -> Option<u64> {
        *lock(&self.instance)
    }

    fn ensure_instance(&self, ctx: &Context) -> DriverResult<u64> {
        let mut slot = lock(&self.instance);
        if let Some(instance) = *slot {
            return Ok(instance);
        }
        let index = self.meta.index;
        let instance = match self.channel.call(ctx, Method::NewInstance { index })? {
            Reply::Instance { instance } => instance,
            other => return Err(unexpected("NewInstance", &other)),
        };
        *slot = Some(instance);
        Ok(instance)
    }

    fn call(&self, ctx: &Context, method: Method) -> DriverResult<Reply> {
        let instance = self.ensure_instance(ctx)?;
        self.channel.call_scoped(ctx, instance, method)
    }

    fn call_done(&self, ctx: &Context, method: Method) -> DriverResult<()> {
        let name = method.name();
        match self.call(ctx, method)? {
            Reply::Done => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }

    fn call_obj(&self, ctx: &Context, method: Method) -> DriverResult<Obj> {
        let name = method.name();
        match self.call(ctx, method)? {
            Reply::Obj(obj) => Ok(obj),
            other => Err(unexpected(name, &other)),
        }
    }

    fn call_objs(&self, ctx: &Context, method: Method) -> DriverResult<Vec<Obj>> {
        let name = method.name();
        match self.call(ctx, method)? {
            Reply::Objs { objs } => Ok(objs),
            other => Err(unexpected(name, &other)),
        }
    }

    fn call_link(&self, ctx: &Context, method: Method) -> DriverResult<Link> {
        let name = method.name();
        match self.call(ctx, method)? {
            Reply::Link(link) => Ok(link),
            other => Err(unexpected(name, &other)),
        }
    }
}

pub(crate) fn unexpected(method: &str, reply: &Reply) -> DriverError {
    DriverError::Protocol {
        message: format!("unexpected {} response to {method}", reply.status()),
    }
}

impl Drop for RemoteDriver {
    fn drop(&mut self) {
        let Some(instance) = self.instance() else {
            return;
        };
        let index = self.meta.index;
        if let Err(err) = self
            .channel
            .notify(Some(instance), Method::ReleaseInstance { index })
        {
            tracing::debug!(
                channel = %self.channel.name(),
                index,
                instance,
                error = %err,
                "failed to release driver instance"
            );
        }
    }
}

impl Driver for RemoteDriver {
    /// Static metadata, answered by the plugin's default instance.
    fn config(&self) -> DriverResult<DriverConfig> {
        let index = self.meta.index;
        match self
            .channel
            .call(&Context::background(), Method::Config { index })?
        {
            Reply::Config(config) => Ok(config),
            other => Err(unexpected("Config", &other)),
        }
    }

    fn storage(&self) -> DriverResult<Storage> {
        let index = self.meta.index;
        match self.call(&Context::background(), Method::GetStorage { index })? {
            Reply::Storage { storage } => Ok(storage),
            other => Err(unexpected("GetStorage", &other)),
        }
    }

    fn set_storage(&self, storage: Storage) -> DriverResult<()> {
        let index = self.meta.index;
        self.call_done(&Context::background(), Method::SetStorage { index, storage })
    }

    fn addition(&self) -> DriverResult<Additional> {
        let index = self.meta.index;
        match self.call(&Context::background(), Method::GetAddition { index })? {
            Reply::Addition(addition) => Ok(addition),
            other => Err(unexpected("GetAddition", &other)),
        }
    }

    fn set_addition(&self, addition: Additional) -> DriverResult<()> {
        let index = self.meta.index;
        self.call_done(
            &Context::background(),
            Method::SetAddition { index, addition },
        )
    }

    fn init(&self, ctx: &Context) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::Init {
                index: self.meta.index,
            },
        )
    }

    fn teardown(&self, ctx: &Context) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::Drop {
                index: self.meta.index,
            },
        )
    }

    fn list(&self, ctx: &Context, dir: &Obj, args: &ListArgs) -> DriverResult<Vec<Obj>> {
        self.call_objs(
            ctx,
            Method::List {
                index: self.meta.index,
                dir: dir.clone(),
                args: args.clone(),
            },
        )
    }

    fn link(&self, ctx: &Context, file: &Obj, args: &LinkArgs) -> DriverResult<Link> {
        self.call_link(
            ctx,
            Method::Link {
                index: self.meta.index,
                file: file.clone(),
                args: args.clone(),
            },
        )
    }

    /// Declared capabilities as reported when the driver was bound.
    fn capabilities(&self) -> Capabilities {
        self.meta.capabilities.clone()
    }

    fn get_root(&self, ctx: &Context) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::GetRoot {
                index: self.meta.index,
            },
        )
    }

    fn get(&self, ctx: &Context, path: &str) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::Get {
                index: self.meta.index,
                path: path.to_string(),
            },
        )
    }

    fn get_obj_info(&self, ctx: &Context, path: &str) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::GetObjInfo {
                index: self.meta.index,
                path: path.to_string(),
            },
        )
    }

    fn make_dir(&self, ctx: &Context, parent: &Obj, name: &str) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::MakeDir {
                index: self.meta.index,
                parent: parent.clone(),
                name: name.to_string(),
            },
        )
    }

    fn make_dir_result(&self, ctx: &Context, parent: &Obj, name: &str) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::MakeDirResult {
                index: self.meta.index,
                parent: parent.clone(),
                name: name.to_string(),
            },
        )
    }

    fn move_obj(&self, ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::Move {
                index: self.meta.index,
                src: src.clone(),
                dst_dir: dst_dir.clone(),
            },
        )
    }

    fn move_result(&self, ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::MoveResult {
                index: self.meta.index,
                src: src.clone(),
                dst_dir: dst_dir.clone(),
            },
        )
    }

    fn rename(&self, ctx: &Context, src: &Obj, new_name: &str) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::Rename {
                index: self.meta.index,
                src: src.clone(),
                new_name: new_name.to_string(),
            },
        )
    }

    fn rename_result(&self, ctx: &Context, src: &Obj, new_name: &str) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::RenameResult {
                index: self.meta.index,
                src: src.clone(),
                new_name: new_name.to_string(),
            },
        )
    }

    fn copy(&self, ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::Copy {
                index: self.meta.index,
                src: src.clone(),
                dst_dir: dst_dir.clone(),
            },
        )
    }

    fn copy_result(&self, ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<Vec<Obj>> {
        self.call_objs(
            ctx,
            Method::CopyResult {
                index: self.meta.index,
                src: src.clone(),
                dst_dir: dst_dir.clone(),
            },
        )
    }

    fn remove(&self, ctx: &Context, obj: &Obj) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::Remove {
                index: self.meta.index,
                obj: obj.clone(),
            },
        )
    }

    fn put(&self, ctx: &Context, dst_dir: &Obj, file: &FileStream) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::Put {
                index: self.meta.index,
                dst_dir: dst_dir.clone(),
                file: file.clone(),
            },
        )
    }

    fn put_result(&self, ctx: &Context, dst_dir: &Obj, file: &FileStream) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::PutResult {
                index: self.meta.index,
                dst_dir: dst_dir.clone(),
                file: file.clone(),
            },
        )
    }

    fn put_url(&self, ctx: &Context, dst_dir: &Obj, name: &str, url: &str) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::PutUrl {
                index: self.meta.index,
                dst_dir: dst_dir.clone(),
                name: name.to_string(),
                url: url.to_string(),
            },
        )
    }

    fn put_url_result(
        &self,
        ctx: &Context,
        dst_dir: &Obj,
        name: &str,
        url: &str,
    ) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::PutUrlResult {
                index: self.meta.index,
                dst_dir: dst_dir.clone(),
                name: name.to_string(),
                url: url.to_string(),
            },
        )
    }

    fn get_archive_meta(
        &self,
        ctx: &Context,
        obj: &Obj,
        args: &ArchiveArgs,
    ) -> DriverResult<ArchiveMeta> {
        let method = Method::GetArchiveMeta {
            index: self.meta.index,
            obj: obj.clone(),
            args: args.clone(),
        };
        match self.call(ctx, method)? {
            Reply::ArchiveMeta(meta) => Ok(meta),
            other => Err(unexpected("GetArchiveMeta", &other)),
        }
    }

    fn list_archive(
        &self,
        ctx: &Context,
        obj: &Obj,
        args: &ArchiveInnerArgs,
    ) -> DriverResult<Vec<Obj>> {
        self.call_objs(
            ctx,
            Method::ListArchive {
                index: self.meta.index,
                obj: obj.clone(),
                args: args.clone(),
            },
        )
    }

    fn extract(&self, ctx: &Context, obj: &Obj, args: &ArchiveInnerArgs) -> DriverResult<Link> {
        self.call_link(
            ctx,
            Method::Extract {
                index: self.meta.index,
                obj: obj.clone(),
                args: args.clone(),
            },
        )
    }

    fn archive_get(&self, ctx: &Context, obj: &Obj, args: &ArchiveInnerArgs) -> DriverResult<Obj> {
        self.call_obj(
            ctx,
            Method::ArchiveGet {
                index: self.meta.index,
                obj: obj.clone(),
                args: args.clone(),
            },
        )
    }

    fn archive_decompress(
        &self,
        ctx: &Context,
        src: &Obj,
        dst_dir: &Obj,
        args: &ArchiveDecompressArgs,
    ) -> DriverResult<()> {
        self.call_done(
            ctx,
            Method::ArchiveDecompress {
                index: self.meta.index,
                src: src.clone(),
                dst_dir: dst_dir.clone(),
                args: args.clone(),
            },
        )
    }

    fn archive_decompress_result(
        &self,
        ctx: &Context,
        src: &Obj,
        dst_dir: &Obj,
        args: &ArchiveDecompressArgs,
    ) -> DriverResult<Vec<Obj>> {
        self.call_objs(
            ctx,
            Method::ArchiveDecompressResult {
                index: self.meta.index,
                src: src.clone(),
                dst_dir: dst_dir.clone(),
                args: args.clone(),
            },
        )
    }

    fn get_details(&self, ctx: &Context) -> DriverResult<StorageDetails> {
        let method = Method::GetDetails {
            index: self.meta.index,
        };
        match self.call(ctx, method)? {
            Reply::Details(details) => Ok(details),
            other => Err(unexpected("GetDetails", &other)),
        }
    }
}
