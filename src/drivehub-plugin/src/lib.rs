//! External plugin support for DriveHub.
//!
//! A plugin is an executable hosting one or more storage drivers. The host
//! starts it as a subprocess and talks to it with newline-delimited JSON
//! over stdin/stdout:
//!
//! - the plugin announces itself with a handshake line carrying the magic
//!   cookie, the protocol version and the channels it serves;
//! - the host sends [`Request`]s addressed to a channel, many may be in
//!   flight at once;
//! - the plugin answers each with a [`Response`] carrying the same id, in
//!   whatever order the calls complete.
//!
//! Loading is two-phase. [`handshake::discover`] starts the plugin, asks
//! for its [`PluginInfo`] over the `main` channel and stops it;
//! [`handshake::bind`] starts it again serving one channel per driver id.
//! [`PluginManager`] drives both phases and registers a [`RemoteDriver`]
//! factory for every driver. Each proxy the factory mints owns a separate
//! driver instance inside the plugin.
//!
//! # Writing a plugin
//!
//! ```rust,ignore
//! use drivehub_plugin::{serve, Plugin};
//!
//! fn main() -> anyhow::Result<()> {
//!     drivehub_core::init_plugin_logging()?;
//!     let plugin = Plugin::new("my-plugin")
//!         .version(env!("CARGO_PKG_VERSION"))
//!         .driver("s3", || Box::new(MyS3Driver::default()));
//!     serve(plugin)?;
//!     Ok(())
//! }
//! ```

mod adapter;
pub mod handshake;
mod host;
mod manager;
pub mod protocol;
mod server;
mod transport;

pub use adapter::RemoteDriver;
pub use host::{Session, SessionConfig, SessionError};
pub use manager::{LoadError, PluginManager, PluginSettings, PluginSummary};
pub use protocol::{
    DriverMeta, HandshakeLine, Method, PluginInfo, Reply, Request, Response, RpcError,
    RpcErrorKind, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, MAIN_CHANNEL, PROTOCOL_VERSION,
};
pub use server::{serve, serve_on, DispatchServer, Plugin, ServeError};
pub use transport::{Channel, Connection};
