//! Plugin lifecycle: discovery over a file or directory, registration of
//! the resulting drivers, and process teardown.

use crate::adapter::RemoteDriver;
use crate::handshake::{bind, discover, BoundDriver};
use crate::host::{Session, SessionConfig, SessionError};
use crate::protocol::PluginInfo;
use drivehub_core::{
    Context, Driver, DriverError, DriverFactory, DriverRegistry, PluginsConfig,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that fail the load of one plugin.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read plugin path {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("plugin {path}: {source}")]
    Session { path: PathBuf, source: SessionError },
    #[error("plugin {path} metadata query failed: {source}")]
    Info { path: PathBuf, source: DriverError },
    #[error("plugin {path} answered the metadata query with {status}")]
    UnexpectedReply { path: PathBuf, status: &'static str },
}

/// Settings applied to every plugin process a manager starts.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub env: BTreeMap<String, String>,
    pub handshake_timeout: Duration,
    pub call_timeout: Option<Duration>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self::from(&PluginsConfig::default())
    }
}

impl From<&PluginsConfig> for PluginSettings {
    fn from(config: &PluginsConfig) -> Self {
        Self {
            env: config.env.clone(),
            handshake_timeout: config.handshake_timeout(),
            call_timeout: config.call_timeout(),
        }
    }
}

impl PluginSettings {
    pub(crate) fn session_config(&self, executable: &Path, channels: Vec<String>) -> SessionConfig {
        SessionConfig {
            executable: executable.to_path_buf(),
            channels,
            env: self.env.clone(),
            handshake_timeout: self.handshake_timeout,
            call_timeout: self.call_timeout,
        }
    }

    /// Bound for the metadata calls made while loading.
    pub(crate) fn handshake_context(&self) -> Context {
        Context::with_timeout(self.handshake_timeout)
    }
}

/// What a successful load left running.
#[derive(Debug, Clone)]
pub struct PluginSummary {
    pub path: PathBuf,
    pub info: PluginInfo,
    /// PID of the discovery process (already stopped).
    pub discovery_pid: u32,
    /// PID of the serving process.
    pub pid: u32,
    /// Registry names of the drivers this plugin contributed.
    pub drivers: Vec<String>,
}

struct LoadedPlugin {
    summary: PluginSummary,
    session: Session,
}

/// Loads plugins and owns their processes.
pub struct PluginManager {
    settings: PluginSettings,
    plugins: Vec<LoadedPlugin>,
}

impl PluginManager {
    pub fn new(settings: PluginSettings) -> Self {
        Self {
            settings,
            plugins: Vec::new(),
        }
    }

    /// Loads `path` as one plugin, or every file directly inside it when it
    /// is a directory, and registers the drivers into `registry`.
    ///
    /// In directory mode a failing entry is logged and skipped; only an
    /// unreadable directory is an error. Returns the registered names.
    pub fn load(
        &mut self,
        path: &Path,
        registry: &mut DriverRegistry,
    ) -> Result<Vec<String>, LoadError> {
        let metadata = fs::metadata(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return self.load_file(path, registry);
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(path)
            .map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    tracing::warn!(dir = %path.display(), error = %err, "skipping unreadable entry");
                    None
                }
            })
            .collect();
        entries.sort();

        let mut names = Vec::new();
        for entry in entries {
            if entry.is_dir() {
                tracing::debug!(plugin = %entry.display(), "skipping directory");
                continue;
            }
            match self.load_file(&entry, registry) {
                Ok(loaded) => names.extend(loaded),
                Err(err) => {
                    tracing::warn!(plugin = %entry.display(), error = %err, "failed to load plugin");
                }
            }
        }
        Ok(names)
    }

    /// Runs both handshake phases against one executable.
    pub fn load_file(
        &mut self,
        path: &Path,
        registry: &mut DriverRegistry,
    ) -> Result<Vec<String>, LoadError> {
        let discovery = discover(path, &self.settings)?;
        if discovery.info.driver_ids.is_empty() {
            tracing::warn!(plugin = %path.display(), name = %discovery.info.name, "plugin exposes no drivers");
            return Ok(Vec::new());
        }

        let binding = bind(path, &discovery.info, &self.settings)?;
        let mut names = Vec::with_capacity(binding.drivers.len());
        for bound in binding.drivers {
            let id = bound.id.clone();
            match registry.register(remote_factory(bound)) {
                Ok(entry) => names.push(entry.name().to_string()),
                Err(err) => {
                    tracing::warn!(plugin = %path.display(), driver = %id, error = %err, "failed to register plugin driver");
                }
            }
        }

        if names.is_empty() {
            tracing::warn!(plugin = %path.display(), name = %discovery.info.name, "plugin contributed no drivers, stopping it");
            binding.session.close();
            return Ok(names);
        }

        tracing::info!(
            plugin = %path.display(),
            name = %discovery.info.name,
            version = %discovery.info.version,
            pid = binding.session.pid(),
            drivers = ?names,
            "loaded plugin"
        );
        self.plugins.push(LoadedPlugin {
            summary: PluginSummary {
                path: path.to_path_buf(),
                info: discovery.info,
                discovery_pid: discovery.pid,
                pid: binding.session.pid(),
                drivers: names.clone(),
            },
            session: binding.session,
        });
        Ok(names)
    }

    pub fn plugins(&self) -> Vec<PluginSummary> {
        self.plugins
            .iter()
            .map(|plugin| plugin.summary.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Stops every plugin process. Idempotent.
    ///
    /// Drivers already handed out stay registered but their calls fail with
    /// a transport error afterwards.
    pub fn shutdown(&mut self) {
        for plugin in self.plugins.drain(..) {
            plugin.session.close();
            tracing::debug!(plugin = %plugin.summary.path.display(), "plugin unloaded");
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Factory minting proxies that share the bound channel; each proxy gets its
/// own driver instance inside the plugin.
fn remote_factory(bound: BoundDriver) -> DriverFactory {
    let BoundDriver { channel, meta, .. } = bound;
    Arc::new(move || Box::new(RemoteDriver::new(channel.clone(), meta.clone())) as Box<dyn Driver>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_plugins_config() {
        let mut config = PluginsConfig::default();
        config.call_timeout_secs = Some(5);
        config.env.insert("RUST_LOG".into(), "debug".into());
        let settings = PluginSettings::from(&config);
        assert_eq!(settings.handshake_timeout, Duration::from_secs(60));
        assert_eq!(settings.call_timeout, Some(Duration::from_secs(5)));
        assert_eq!(settings.env["RUST_LOG"], "debug");
    }

    #[test]
    fn shutdown_without_plugins_is_a_no_op() {
        let mut manager = PluginManager::new(PluginSettings::default());
        manager.shutdown();
        manager.shutdown();
        assert!(manager.is_empty());
    }

    #[test]
    fn missing_path_is_an_io_error() {
        let mut manager = PluginManager::new(PluginSettings::default());
        let mut registry = DriverRegistry::new();
        let err = manager
            .load(Path::new("/nonexistent/plugins"), &mut registry)
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn empty_directory_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let mut manager = PluginManager::new(PluginSettings::default());
        let mut registry = DriverRegistry::new();
        let names = manager.load(dir.path(), &mut registry).unwrap();
        assert!(names.is_empty());
        assert!(registry.is_empty());
    }
}
