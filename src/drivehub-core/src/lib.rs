pub mod additional;
pub mod config;
pub mod driver;
pub mod driver_contract;
pub mod logging;
pub mod models;
pub mod paths;
pub mod redact;
pub mod registry;
pub mod schema;

pub use additional::{Additional, Root, RootId, RootPath};
pub use config::{Config, ConfigError, LogLevel, LoggingConfig, PluginsConfig, ValidationError};
pub use driver::{
    CancelToken, Capabilities, Capability, Context, Driver, DriverConfig, DriverError,
    DriverResult,
};
pub use driver_contract::{run_driver_contract, DriverContractError, DriverContractExpectations};
pub use logging::{init_logging, init_plugin_logging, LoggingError, LoggingGuard};
pub use models::{
    ArchiveArgs, ArchiveDecompressArgs, ArchiveInnerArgs, ArchiveMeta, ArchiveTree, FileStream,
    Link, LinkArgs, ListArgs, Obj, Storage, StorageDetails,
};
pub use paths::{AppDirs, DirsError, HOME_ENV};
pub use redact::{redact_data, redact_secrets};
pub use registry::{DriverFactory, DriverInfo, DriverRegistry, RegisteredDriver, RegistryError};
pub use schema::{ConfigItem, FieldKind, FieldSpec, FieldTags, Reflect, SchemaError};

pub const APP_NAME: &str = "drivehub";
pub const APP_AUTHOR: &str = "DriveHub";
pub const APP_QUALIFIER: &str = "io";
