//! Plugin subprocess sessions: spawn, authenticate, dispense channels, stop.

use crate::protocol::{
    HandshakeLine, Method, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, MAIN_CHANNEL, PROTOCOL_VERSION,
};
use crate::transport::{lock, Channel, Connection};
use drivehub_core::{redact_secrets, Context};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Errors from establishing or using a plugin session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn plugin process {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("plugin process has no {0}")]
    MissingPipe(&'static str),
    #[error("failed to start plugin io thread: {0}")]
    Thread(std::io::Error),
    #[error("handshake failed: {reason}")]
    Handshake { reason: String },
    #[error("plugin did not complete the handshake within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("plugin does not serve channel {0}")]
    UnknownChannel(String),
}

/// How to start one plugin session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub executable: PathBuf,
    /// Channels the host will dispense; the plugin must serve all of them.
    pub channels: Vec<String>,
    /// Extra environment for the plugin process.
    pub env: BTreeMap<String, String>,
    pub handshake_timeout: Duration,
    pub call_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(executable: impl Into<PathBuf>, channels: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            channels,
            env: BTreeMap::new(),
            handshake_timeout: Duration::from_secs(60),
            call_timeout: None,
        }
    }
}

/// A running, authenticated plugin process.
///
/// Owns the child process; dropping the session stops it.
pub struct Session {
    executable: PathBuf,
    channels: Vec<String>,
    connection: Arc<Connection>,
    child: Mutex<Option<Child>>,
    pid: u32,
}

impl Session {
    /// Spawns the executable with no arguments and completes the handshake.
    pub fn spawn(config: SessionConfig) -> Result<Self, SessionError> {
        let mut cmd = Command::new(&config.executable);
        cmd.env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| SessionError::Spawn {
            path: config.executable.clone(),
            source,
        })?;
        let pid = child.id();
        let label = config.executable.display().to_string();
        tracing::debug!(plugin = %label, pid, "spawned plugin process");

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            (stdin, stdout, _) => {
                reap(&mut child);
                let missing = if stdin.is_none() {
                    "stdin"
                } else if stdout.is_none() {
                    "stdout"
                } else {
                    "stderr"
                };
                return Err(SessionError::MissingPipe(missing));
            }
        };
        if let Err(err) = forward_stderr(&label, pid, stderr) {
            reap(&mut child);
            return Err(err);
        }

        let opened = Connection::open(
            label.clone(),
            BufReader::new(stdout),
            stdin,
            config.handshake_timeout,
            config.call_timeout,
        )
        .and_then(|(connection, handshake)| {
            validate_handshake(&handshake, &config.channels).map(|()| connection)
        });
        let connection = match opened {
            Ok(connection) => connection,
            Err(err) => {
                tracing::debug!(plugin = %label, pid, error = %err, "plugin handshake failed");
                reap(&mut child);
                return Err(err);
            }
        };

        Ok(Self {
            executable: config.executable,
            channels: config.channels,
            connection: Arc::new(connection),
            child: Mutex::new(Some(child)),
            pid,
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Opens a logical channel by name. Only channels of this session's set
    /// can be dispensed.
    pub fn dispense(&self, name: &str) -> Result<Channel, SessionError> {
        if !self.channels.iter().any(|channel| channel == name) {
            return Err(SessionError::UnknownChannel(name.to_string()));
        }
        Ok(Channel::new(name, Arc::clone(&self.connection)))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.child)
            .as_mut()
            .map(|child| matches!(child.try_wait(), Ok(None)))
            .unwrap_or(false)
    }

    /// Asks the plugin to exit, then kills and reaps the process. Safe to call
    /// more than once.
    pub fn close(&self) {
        let Some(mut child) = lock(&self.child).take() else {
            return;
        };
        if !self.connection.is_closed() {
            let ctx = Context::with_timeout(SHUTDOWN_GRACE);
            if let Err(err) = self.connection.call(&ctx, MAIN_CHANNEL, Method::Shutdown) {
                tracing::debug!(plugin = %self.executable.display(), error = %err, "plugin shutdown request failed");
            }
        }
        self.connection.close_writer();
        reap(&mut child);
        tracing::debug!(plugin = %self.executable.display(), pid = self.pid, "plugin process stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn reap(child: &mut Child) {
    // an already-exited child makes kill fail harmlessly
    let _ = child.kill();
    let _ = child.wait();
}

fn validate_handshake(handshake: &HandshakeLine, required: &[String]) -> Result<(), SessionError> {
    if handshake.magic_cookie != MAGIC_COOKIE_VALUE {
        return Err(SessionError::Handshake {
            reason: format!("unexpected magic cookie {:?}", handshake.magic_cookie),
        });
    }
    if handshake.protocol_version != PROTOCOL_VERSION {
        return Err(SessionError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: handshake.protocol_version,
        });
    }
    if let Some(missing) = required
        .iter()
        .find(|channel| !handshake.channels.contains(channel))
    {
        return Err(SessionError::Handshake {
            reason: format!("plugin does not serve channel {missing:?}"),
        });
    }
    Ok(())
}

/// Re-emits the plugin's stderr through `tracing`, with secrets redacted.
fn forward_stderr(label: &str, pid: u32, stderr: ChildStderr) -> Result<(), SessionError> {
    let label = label.to_string();
    thread::Builder::new()
        .name(format!("plugin-stderr:{pid}"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                tracing::info!(plugin = %label, pid, "{}", redact_secrets(&line));
            }
        })
        .map(drop)
        .map_err(SessionError::Thread)
}
