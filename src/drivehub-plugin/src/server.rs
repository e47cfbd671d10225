//! Plugin-side half of the protocol: the dispatch server and the `serve`
//! entry point a plugin executable calls from `main`.

use crate::protocol::{
    HandshakeLine, Method, PluginInfo, Reply, Request, Response, RpcError, MAGIC_COOKIE_KEY,
    MAGIC_COOKIE_VALUE, MAIN_CHANNEL,
};
use crate::transport::lock;
use drivehub_core::{Capabilities, Context, Driver, DriverError, DriverFactory, DriverResult};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(
        "this program is a DriveHub plugin and is meant to be launched by the host \
         (DRIVEHUB_PLUGIN is not set to the expected value)"
    )]
    NotLaunchedByHost,
    #[error("plugin io failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Declaration of a plugin executable: its metadata and the drivers it hosts.
pub struct Plugin {
    name: String,
    description: String,
    version: String,
    drivers: Vec<(String, DriverFactory)>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: String::new(),
            drivers: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Adds a driver under `id`, which is also its channel name.
    pub fn driver<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Driver> + Send + Sync + 'static,
    {
        self.drivers.push((id.into(), Arc::new(factory)));
        self
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            driver_ids: self.drivers.iter().map(|(id, _)| id.clone()).collect(),
        }
    }
}

struct ServedDriver {
    factory: DriverFactory,
    /// Answers requests that name no instance.
    default: Arc<dyn Driver>,
    capabilities: Capabilities,
    instances: Mutex<HashMap<u64, Arc<dyn Driver>>>,
}

impl ServedDriver {
    fn resolve(&self, index: usize, instance: Option<u64>) -> DriverResult<Arc<dyn Driver>> {
        let Some(id) = instance else {
            return Ok(Arc::clone(&self.default));
        };
        lock(&self.instances)
            .get(&id)
            .cloned()
            .ok_or_else(|| unknown_instance(index, id))
    }
}

fn unknown_instance(index: usize, instance: u64) -> DriverError {
    DriverError::Protocol {
        message: format!("driver {index} has no instance {instance}"),
    }
}

/// Resolves requests against the plugin's driver instances.
///
/// A default instance per declared driver is created up front and its
/// declared capabilities are cached; the cache is what gates optional
/// methods. `NewInstance` mints further instances from the same factory,
/// each with its own configuration state.
pub struct DispatchServer {
    info: PluginInfo,
    drivers: Vec<ServedDriver>,
    next_instance: AtomicU64,
}

impl DispatchServer {
    pub fn new(plugin: Plugin) -> Self {
        let info = plugin.info();
        let drivers = plugin
            .drivers
            .into_iter()
            .map(|(id, factory)| {
                let default: Arc<dyn Driver> = Arc::from(factory());
                let capabilities = default.capabilities();
                tracing::debug!(driver = %id, capabilities = capabilities.len(), "serving driver");
                ServedDriver {
                    factory,
                    default,
                    capabilities,
                    instances: Mutex::new(HashMap::new()),
                }
            })
            .collect();
        Self {
            info,
            drivers,
            next_instance: AtomicU64::new(1),
        }
    }

    /// Instances minted by `NewInstance` and not yet released.
    pub fn instance_count(&self) -> usize {
        self.drivers
            .iter()
            .map(|served| lock(&served.instances).len())
            .sum()
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    /// `main` plus one channel per driver id.
    pub fn channels(&self) -> Vec<String> {
        std::iter::once(MAIN_CHANNEL.to_string())
            .chain(self.info.driver_ids.iter().cloned())
            .collect()
    }

    pub fn handle(&self, request: Request) -> Response {
        let method_name = request.method.name();
        let result = match self.dispatch(&request.channel, request.instance, request.method) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::debug!(
                    channel = %request.channel,
                    method = method_name,
                    error = %err,
                    "request failed"
                );
                Reply::Error(RpcError::from(err))
            }
        };
        Response {
            id: request.id,
            result,
        }
    }

    /// Checks, in order: the channel is served, the index is in range, the
    /// capability is declared, the instance exists. Only then is the driver
    /// invoked.
    pub fn dispatch(
        &self,
        channel: &str,
        instance: Option<u64>,
        method: Method,
    ) -> DriverResult<Reply> {
        if channel != MAIN_CHANNEL && !self.info.driver_ids.iter().any(|id| id == channel) {
            return Err(DriverError::Protocol {
                message: format!("unknown channel {channel:?}"),
            });
        }
        let Some(index) = method.index() else {
            return Ok(match method {
                Method::Shutdown => Reply::ShutdownAck,
                _ => Reply::Info(self.info.clone()),
            });
        };
        let served = self.drivers.get(index).ok_or(DriverError::InvalidIndex {
            index,
            count: self.drivers.len(),
        })?;
        if let Some(capability) = method.capability() {
            if !served.capabilities.supports(capability) {
                return Err(DriverError::unsupported(capability));
            }
        }
        match method {
            Method::Capabilities { .. } => {
                return Ok(Reply::Capabilities {
                    capabilities: served.capabilities.clone(),
                })
            }
            Method::NewInstance { .. } => {
                let id = self.next_instance.fetch_add(1, Ordering::SeqCst);
                lock(&served.instances).insert(id, Arc::from((served.factory)()));
                tracing::debug!(channel, index, instance = id, "created driver instance");
                return Ok(Reply::Instance { instance: id });
            }
            Method::ReleaseInstance { .. } => {
                let id = instance.ok_or_else(|| DriverError::Protocol {
                    message: "ReleaseInstance names no instance".to_string(),
                })?;
                lock(&served.instances)
                    .remove(&id)
                    .ok_or_else(|| unknown_instance(index, id))?;
                tracing::debug!(channel, index, instance = id, "released driver instance");
                return Ok(Reply::Done);
            }
            _ => {}
        }
        let driver = served.resolve(index, instance)?;
        invoke(driver.as_ref(), &Context::background(), method)
    }
}

fn invoke(driver: &dyn Driver, ctx: &Context, method: Method) -> DriverResult<Reply> {
    let reply = match method {
        Method::Config { .. } => Reply::Config(driver.config()?),
        Method::GetStorage { .. } => Reply::Storage {
            storage: driver.storage()?,
        },
        Method::SetStorage { storage, .. } => {
            driver.set_storage(storage)?;
            Reply::Done
        }
        Method::GetAddition { .. } => Reply::Addition(driver.addition()?),
        Method::SetAddition { addition, .. } => {
            driver.set_addition(addition)?;
            Reply::Done
        }
        Method::Init { .. } => {
            driver.init(ctx)?;
            Reply::Done
        }
        Method::Drop { .. } => {
            driver.teardown(ctx)?;
            Reply::Done
        }
        Method::List { dir, args, .. } => Reply::Objs {
            objs: driver.list(ctx, &dir, &args)?,
        },
        Method::Link { file, args, .. } => Reply::Link(driver.link(ctx, &file, &args)?),
        Method::GetRoot { .. } => Reply::Obj(driver.get_root(ctx)?),
        Method::Get { path, .. } => Reply::Obj(driver.get(ctx, &path)?),
        Method::GetObjInfo { path, .. } => Reply::Obj(driver.get_obj_info(ctx, &path)?),
        Method::MakeDir { parent, name, .. } => {
            driver.make_dir(ctx, &parent, &name)?;
            Reply::Done
        }
        Method::MakeDirResult { parent, name, .. } => {
            Reply::Obj(driver.make_dir_result(ctx, &parent, &name)?)
        }
        Method::Move { src, dst_dir, .. } => {
            driver.move_obj(ctx, &src, &dst_dir)?;
            Reply::Done
        }
        Method::MoveResult { src, dst_dir, .. } => {
            Reply::Obj(driver.move_result(ctx, &src, &dst_dir)?)
        }
        Method::Rename { src, new_name, .. } => {
            driver.rename(ctx, &src, &new_name)?;
            Reply::Done
        }
        Method::RenameResult { src, new_name, .. } => {
            Reply::Obj(driver.rename_result(ctx, &src, &new_name)?)
        }
        Method::Copy { src, dst_dir, .. } => {
            driver.copy(ctx, &src, &dst_dir)?;
            Reply::Done
        }
        Method::CopyResult { src, dst_dir, .. } => Reply::Objs {
            objs: driver.copy_result(ctx, &src, &dst_dir)?,
        },
        Method::Remove { obj, .. } => {
            driver.remove(ctx, &obj)?;
            Reply::Done
        }
        Method::Put { dst_dir, file, .. } => {
            driver.put(ctx, &dst_dir, &file)?;
            Reply::Done
        }
        Method::PutResult { dst_dir, file, .. } => {
            Reply::Obj(driver.put_result(ctx, &dst_dir, &file)?)
        }
        Method::PutUrl {
            dst_dir, name, url, ..
        } => {
            driver.put_url(ctx, &dst_dir, &name, &url)?;
            Reply::Done
        }
        Method::PutUrlResult {
            dst_dir, name, url, ..
        } => Reply::Obj(driver.put_url_result(ctx, &dst_dir, &name, &url)?),
        Method::GetArchiveMeta { obj, args, .. } => {
            Reply::ArchiveMeta(driver.get_archive_meta(ctx, &obj, &args)?)
        }
        Method::ListArchive { obj, args, .. } => Reply::Objs {
            objs: driver.list_archive(ctx, &obj, &args)?,
        },
        Method::Extract { obj, args, .. } => Reply::Link(driver.extract(ctx, &obj, &args)?),
        Method::ArchiveGet { obj, args, .. } => Reply::Obj(driver.archive_get(ctx, &obj, &args)?),
        Method::ArchiveDecompress {
            src, dst_dir, args, ..
        } => {
            driver.archive_decompress(ctx, &src, &dst_dir, &args)?;
            Reply::Done
        }
        Method::ArchiveDecompressResult {
            src, dst_dir, args, ..
        } => Reply::Objs {
            objs: driver.archive_decompress_result(ctx, &src, &dst_dir, &args)?,
        },
        Method::GetDetails { .. } => Reply::Details(driver.get_details(ctx)?),
        Method::Info
        | Method::Shutdown
        | Method::Capabilities { .. }
        | Method::NewInstance { .. }
        | Method::ReleaseInstance { .. } => {
            return Err(DriverError::Protocol {
                message: format!("{} is not a driver method", method.name()),
            })
        }
    };
    Ok(reply)
}

/// Runs `plugin` over this process's stdin/stdout until the host sends
/// `Shutdown` or closes stdin.
///
/// Refuses to run unless the host's magic cookie is present, so launching a
/// plugin by hand fails with an explanation instead of waiting for input.
pub fn serve(plugin: Plugin) -> Result<(), ServeError> {
    if std::env::var(MAGIC_COOKIE_KEY).ok().as_deref() != Some(MAGIC_COOKIE_VALUE) {
        return Err(ServeError::NotLaunchedByHost);
    }
    let server = Arc::new(DispatchServer::new(plugin));
    tracing::info!(
        plugin = %server.info().name,
        drivers = server.info().driver_ids.len(),
        "plugin serving"
    );
    serve_on(server, io::stdin().lock(), io::stdout())
}

/// Writes the handshake, then answers requests read from `reader`. Each
/// request runs on its own thread; responses are written whole, one per line.
pub fn serve_on<R, W>(server: Arc<DispatchServer>, mut reader: R, writer: W) -> Result<(), ServeError>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));
    write_line(&writer, &HandshakeLine::new(server.channels()))?;

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            tracing::debug!("host closed stdin");
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(err) => {
                reject_malformed(&writer, text, &err)?;
                continue;
            }
        };
        if let Method::Shutdown = request.method {
            write_line(
                &writer,
                &Response {
                    id: request.id,
                    result: Reply::ShutdownAck,
                },
            )?;
            tracing::debug!("shutdown requested");
            break;
        }

        workers.retain(|worker| !worker.is_finished());
        let server = Arc::clone(&server);
        let out = Arc::clone(&writer);
        let worker = thread::Builder::new()
            .name(format!("dispatch-{}", request.id))
            .spawn(move || {
                let response = server.handle(request);
                if let Err(err) = write_line(&out, &response) {
                    tracing::warn!(id = response.id, error = %err, "failed to write response");
                }
            })?;
        workers.push(worker);
    }

    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}

fn write_line<W: Write, T: serde::Serialize>(writer: &Mutex<W>, value: &T) -> Result<(), ServeError> {
    let json = serde_json::to_string(value)?;
    let mut out = lock(writer);
    writeln!(out, "{json}")?;
    out.flush()?;
    Ok(())
}

/// Answers an undecodable request with a protocol error when its id can
/// still be recovered, so the caller is not left waiting.
fn reject_malformed<W: Write>(
    writer: &Mutex<W>,
    text: &str,
    err: &serde_json::Error,
) -> Result<(), ServeError> {
    let id = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64));
    let Some(id) = id else {
        tracing::warn!(error = %err, "discarding malformed request");
        return Ok(());
    };
    let error = DriverError::Protocol {
        message: format!("malformed request: {err}"),
    };
    write_line(
        writer,
        &Response {
            id,
            result: Reply::Error(error.into()),
        },
    )
}
