//! Two-phase plugin handshake.
//!
//! Discovery runs a throwaway session serving only `main` to learn the
//! plugin's driver ids. Binding then starts a fresh process whose session
//! serves exactly those ids, since a session's channel set is fixed when it
//! is established.

use crate::adapter::unexpected;
use crate::host::Session;
use crate::manager::{LoadError, PluginSettings};
use crate::protocol::{DriverMeta, Method, PluginInfo, Reply, MAIN_CHANNEL};
use crate::transport::Channel;
use drivehub_core::{Context, DriverResult};
use std::path::Path;

/// Result of the discovery phase.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub info: PluginInfo,
    /// PID of the discovery process, which has already been stopped.
    pub pid: u32,
}

/// One driver dispensed during binding.
#[derive(Debug, Clone)]
pub struct BoundDriver {
    pub id: String,
    pub meta: DriverMeta,
    pub channel: Channel,
}

/// Result of the binding phase: the long-lived session and its drivers.
pub struct Binding {
    pub session: Session,
    pub drivers: Vec<BoundDriver>,
}

/// Phase 1: spawn, query `Info` over `main`, then stop the process whatever
/// the outcome.
pub fn discover(executable: &Path, settings: &PluginSettings) -> Result<Discovery, LoadError> {
    let session = Session::spawn(settings.session_config(executable, vec![MAIN_CHANNEL.into()]))
        .map_err(|source| LoadError::Session {
            path: executable.to_path_buf(),
            source,
        })?;
    let pid = session.pid();
    let result = session
        .dispense(MAIN_CHANNEL)
        .map_err(|source| LoadError::Session {
            path: executable.to_path_buf(),
            source,
        })
        .and_then(|channel| {
            channel
                .call(&settings.handshake_context(), Method::Info)
                .map_err(|source| LoadError::Info {
                    path: executable.to_path_buf(),
                    source,
                })
        });
    session.close();

    let info = match result? {
        Reply::Info(info) => info,
        other => {
            return Err(LoadError::UnexpectedReply {
                path: executable.to_path_buf(),
                status: other.status(),
            })
        }
    };
    if info.name.trim().is_empty() {
        tracing::warn!(plugin = %executable.display(), "plugin reported no name");
    }
    tracing::debug!(
        plugin = %executable.display(),
        pid,
        drivers = ?info.driver_ids,
        "discovered plugin"
    );
    Ok(Discovery { info, pid })
}

/// Phase 2: respawn with one channel per driver id and bind each driver to
/// its index. A driver that cannot be dispensed or described is skipped.
pub fn bind(
    executable: &Path,
    info: &PluginInfo,
    settings: &PluginSettings,
) -> Result<Binding, LoadError> {
    let session = Session::spawn(settings.session_config(executable, info.driver_ids.clone()))
        .map_err(|source| LoadError::Session {
            path: executable.to_path_buf(),
            source,
        })?;
    let ctx = settings.handshake_context();

    let mut drivers = Vec::with_capacity(info.driver_ids.len());
    for (index, id) in info.driver_ids.iter().enumerate() {
        let channel = match session.dispense(id) {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(plugin = %executable.display(), driver = %id, error = %err, "failed to dispense driver");
                continue;
            }
        };
        match describe(&ctx, &channel, index) {
            Ok(meta) => drivers.push(BoundDriver {
                id: id.clone(),
                meta,
                channel,
            }),
            Err(err) => {
                tracing::warn!(plugin = %executable.display(), driver = %id, index, error = %err, "failed to bind driver");
            }
        }
    }
    Ok(Binding { session, drivers })
}

fn describe(ctx: &Context, channel: &Channel, index: usize) -> DriverResult<DriverMeta> {
    let config = match channel.call(ctx, Method::Config { index })? {
        Reply::Config(config) => config,
        other => return Err(unexpected("Config", &other)),
    };
    let capabilities = match channel.call(ctx, Method::Capabilities { index })? {
        Reply::Capabilities { capabilities } => capabilities,
        other => return Err(unexpected("Capabilities", &other)),
    };
    Ok(DriverMeta {
        index,
        config,
        capabilities,
    })
}
