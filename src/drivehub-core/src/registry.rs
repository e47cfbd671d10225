//! Host-wide driver registry.

use crate::driver::{Capabilities, Driver, DriverConfig, DriverError};
use crate::models::Storage;
use crate::schema::{ConfigItem, Reflect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Mints a fresh driver instance per storage.
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

/// Schema bundle the host UI renders for one driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub common: Vec<ConfigItem>,
    pub additional: Vec<ConfigItem>,
    pub config: DriverConfig,
}

#[derive(Clone)]
pub struct RegisteredDriver {
    factory: DriverFactory,
    info: DriverInfo,
    capabilities: Capabilities,
}

impl RegisteredDriver {
    pub fn name(&self) -> &str {
        &self.info.config.name
    }

    pub fn info(&self) -> &DriverInfo {
        &self.info
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn create(&self) -> Box<dyn Driver> {
        (self.factory)()
    }

    pub fn factory(&self) -> DriverFactory {
        Arc::clone(&self.factory)
    }
}

impl fmt::Debug for RegisteredDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredDriver")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("driver {name} is already registered")]
    Duplicate { name: String },
    #[error("driver has an empty name")]
    EmptyName,
    #[error("driver {name} is not registered")]
    Unknown { name: String },
    #[error("failed to probe driver: {0}")]
    Probe(#[from] DriverError),
}

/// Registry of driver factories keyed by [`DriverConfig::name`].
///
/// Constructed once at host start-up and handed to whatever registers
/// drivers, local or plugin-backed.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, RegisteredDriver>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory. One probe instance is created to read the
    /// driver's config, declared capabilities and schema, which are cached.
    pub fn register(&mut self, factory: DriverFactory) -> Result<&RegisteredDriver, RegistryError> {
        let probe = factory();
        let config = probe.config()?;
        if config.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.drivers.contains_key(&config.name) {
            return Err(RegistryError::Duplicate { name: config.name });
        }
        let additional = probe.addition()?.items().to_vec();
        let capabilities = probe.capabilities();
        let name = config.name.clone();
        tracing::debug!(driver = %name, capabilities = capabilities.len(), "registered driver");
        let entry = self.drivers.entry(name).or_insert(RegisteredDriver {
            factory,
            info: DriverInfo {
                common: Storage::config_items(),
                additional,
                config,
            },
            capabilities,
        });
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredDriver> {
        self.drivers.get(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Driver>, RegistryError> {
        self.drivers
            .get(name)
            .map(RegisteredDriver::create)
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_string(),
            })
    }

    pub fn driver_info(&self, name: &str) -> Option<&DriverInfo> {
        self.drivers.get(name).map(RegisteredDriver::info)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::additional::Additional;
    use crate::driver::{Capability, Context, DriverResult};
    use crate::models::{Link, LinkArgs, ListArgs, Obj};
    use crate::schema::FieldSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;

    #[derive(Serialize)]
    struct NoteAddition {
        folder: String,
    }

    impl Reflect for NoteAddition {
        fn fields() -> Vec<FieldSpec> {
            vec![FieldSpec::string("Folder").json("folder").required()]
        }
    }

    struct NoteDriver {
        name: &'static str,
        storage: RwLock<Storage>,
    }

    impl NoteDriver {
        fn boxed(name: &'static str) -> Box<dyn Driver> {
            Box::new(Self {
                name,
                storage: RwLock::new(Storage::default()),
            })
        }
    }

    impl Driver for NoteDriver {
        fn config(&self) -> DriverResult<DriverConfig> {
            Ok(DriverConfig::new(self.name))
        }

        fn storage(&self) -> DriverResult<Storage> {
            Ok(self.storage.read().unwrap().clone())
        }

        fn set_storage(&self, storage: Storage) -> DriverResult<()> {
            *self.storage.write().unwrap() = storage;
            Ok(())
        }

        fn addition(&self) -> DriverResult<Additional> {
            Additional::without_root(&NoteAddition {
                folder: "/".into(),
            })
            .map_err(|e| DriverError::operation(e.to_string()))
        }

        fn set_addition(&self, _addition: Additional) -> DriverResult<()> {
            Ok(())
        }

        fn init(&self, _ctx: &Context) -> DriverResult<()> {
            Ok(())
        }

        fn teardown(&self, _ctx: &Context) -> DriverResult<()> {
            Ok(())
        }

        fn list(&self, _ctx: &Context, _dir: &Obj, _args: &ListArgs) -> DriverResult<Vec<Obj>> {
            Ok(Vec::new())
        }

        fn link(&self, _ctx: &Context, file: &Obj, _args: &LinkArgs) -> DriverResult<Link> {
            Ok(Link::new(format!("memory://{}", file.path)))
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::empty().with(Capability::Remove)
        }
    }

    #[test]
    fn register_caches_info_and_capabilities() {
        let mut registry = DriverRegistry::new();
        let entry = registry
            .register(Arc::new(|| NoteDriver::boxed("Notes")))
            .unwrap();
        assert_eq!(entry.name(), "Notes");
        assert!(entry.capabilities().supports(Capability::Remove));
        assert_eq!(entry.info().additional[0].name, "folder");
        assert_eq!(entry.info().common[0].name, "mount_path");
    }

    #[test]
    fn duplicate_names_are_rejected_not_overwritten() {
        let mut registry = DriverRegistry::new();
        registry
            .register(Arc::new(|| NoteDriver::boxed("Notes")))
            .unwrap();
        let err = registry
            .register(Arc::new(|| NoteDriver::boxed("Notes")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { ref name } if name == "Notes"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn factories_mint_independent_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let mut registry = DriverRegistry::new();
        registry
            .register(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                NoteDriver::boxed("Notes")
            }))
            .unwrap();

        let first = registry.create("Notes").unwrap();
        let second = registry.create("Notes").unwrap();
        first
            .set_storage(Storage {
                mount_path: "/a".into(),
                ..Storage::default()
            })
            .unwrap();
        assert_eq!(second.storage().unwrap().mount_path, "");
        // one probe plus two instances
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unknown_driver_is_an_error() {
        let registry = DriverRegistry::new();
        assert!(matches!(
            registry.create("missing"),
            Err(RegistryError::Unknown { .. })
        ));
        assert!(registry.is_empty());
    }
}
