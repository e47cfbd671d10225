use crate::driver::{Capability, Context, Driver, DriverError};
use crate::models::{
    ArchiveArgs, ArchiveDecompressArgs, ArchiveInnerArgs, FileStream, LinkArgs, ListArgs, Obj,
};
use thiserror::Error;

/// Expectations supplied by a driver implementation to run the shared contract suite.
#[derive(Debug, Clone)]
pub struct DriverContractExpectations {
    /// Registry name the driver must report.
    pub name: String,
    /// Directory to list.
    pub dir: Obj,
    /// Names that must appear in the listing of `dir`.
    pub expected_children: Vec<String>,
    /// A file whose link must resolve to a non-empty URL.
    pub link_target: Obj,
}

/// Errors surfaced by the driver contract test harness.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriverContractError {
    #[error("driver reported name {actual:?}, expected {expected:?}")]
    NameMismatch { expected: String, actual: String },
    #[error("listing {dir} is missing {missing:?}")]
    MissingChild { dir: String, missing: String },
    #[error("link for {path} has an empty url")]
    EmptyLink { path: String },
    #[error("undeclared capability {capability} did not report unsupported, got {outcome}")]
    UndeclaredCapability {
        capability: Capability,
        outcome: String,
    },
    #[error("driver error while running contract: {0}")]
    DriverFailure(String),
}

/// Run the shared driver contract suite against a driver implementation.
///
/// Works the same against a local driver and a plugin-backed proxy; the
/// suite only reads, except for probing undeclared capabilities which must
/// fail without side effects.
pub fn run_driver_contract<D: Driver + ?Sized>(
    driver: &D,
    expectations: &DriverContractExpectations,
) -> Result<(), DriverContractError> {
    let ctx = Context::background();
    verify_config(driver, expectations)?;
    verify_list(driver, &ctx, expectations)?;
    verify_link(driver, &ctx, expectations)?;
    verify_undeclared_capabilities(driver, &ctx, expectations)?;
    Ok(())
}

fn failure(err: DriverError) -> DriverContractError {
    DriverContractError::DriverFailure(err.to_string())
}

fn verify_config<D: Driver + ?Sized>(
    driver: &D,
    expectations: &DriverContractExpectations,
) -> Result<(), DriverContractError> {
    let config = driver.config().map_err(failure)?;
    if config.name != expectations.name {
        return Err(DriverContractError::NameMismatch {
            expected: expectations.name.clone(),
            actual: config.name,
        });
    }
    // the schema must be obtainable even before init
    driver.addition().map_err(failure)?;
    Ok(())
}

fn verify_list<D: Driver + ?Sized>(
    driver: &D,
    ctx: &Context,
    expectations: &DriverContractExpectations,
) -> Result<(), DriverContractError> {
    let children = driver
        .list(ctx, &expectations.dir, &ListArgs::default())
        .map_err(failure)?;
    for expected in &expectations.expected_children {
        if !children.iter().any(|obj| &obj.name == expected) {
            return Err(DriverContractError::MissingChild {
                dir: expectations.dir.path.clone(),
                missing: expected.clone(),
            });
        }
    }
    Ok(())
}

fn verify_link<D: Driver + ?Sized>(
    driver: &D,
    ctx: &Context,
    expectations: &DriverContractExpectations,
) -> Result<(), DriverContractError> {
    let link = driver
        .link(ctx, &expectations.link_target, &LinkArgs::default())
        .map_err(failure)?;
    if link.url.is_empty() {
        return Err(DriverContractError::EmptyLink {
            path: expectations.link_target.path.clone(),
        });
    }
    Ok(())
}

fn verify_undeclared_capabilities<D: Driver + ?Sized>(
    driver: &D,
    ctx: &Context,
    expectations: &DriverContractExpectations,
) -> Result<(), DriverContractError> {
    let declared = driver.capabilities();
    for capability in Capability::ALL {
        if declared.supports(capability) {
            continue;
        }
        let outcome = invoke_optional(driver, ctx, capability, &expectations.dir);
        match outcome {
            Err(DriverError::Unsupported { capability: got }) if got == capability => {}
            other => {
                return Err(DriverContractError::UndeclaredCapability {
                    capability,
                    outcome: format!("{other:?}"),
                })
            }
        }
    }
    Ok(())
}

/// Calls the first optional method of `capability` with throwaway arguments.
fn invoke_optional<D: Driver + ?Sized>(
    driver: &D,
    ctx: &Context,
    capability: Capability,
    dir: &Obj,
) -> Result<(), DriverError> {
    let probe = Obj::file(format!("{}/.contract-probe", dir.path.trim_end_matches('/')), 0);
    let inner = ArchiveInnerArgs {
        archive: ArchiveArgs::default(),
        inner_path: "/".into(),
    };
    let decompress = ArchiveDecompressArgs {
        inner: inner.clone(),
        ..ArchiveDecompressArgs::default()
    };
    let stream = FileStream::new(".contract-probe", Vec::new());
    match capability {
        Capability::GetRoot => driver.get_root(ctx).map(drop),
        Capability::Get => driver.get(ctx, &probe.path).map(drop),
        Capability::GetObjInfo => driver.get_obj_info(ctx, &probe.path).map(drop),
        Capability::MakeDir => driver.make_dir(ctx, dir, ".contract-probe"),
        Capability::MakeDirResult => driver.make_dir_result(ctx, dir, ".contract-probe").map(drop),
        Capability::Move => driver.move_obj(ctx, &probe, dir),
        Capability::MoveResult => driver.move_result(ctx, &probe, dir).map(drop),
        Capability::Rename => driver.rename(ctx, &probe, ".contract-probe-2"),
        Capability::RenameResult => driver.rename_result(ctx, &probe, ".contract-probe-2").map(drop),
        Capability::Copy => driver.copy(ctx, &probe, dir),
        Capability::CopyResult => driver.copy_result(ctx, &probe, dir).map(drop),
        Capability::Remove => driver.remove(ctx, &probe),
        Capability::Put => driver.put(ctx, dir, &stream),
        Capability::PutResult => driver.put_result(ctx, dir, &stream).map(drop),
        Capability::PutUrl => driver.put_url(ctx, dir, ".contract-probe", "http://127.0.0.1/"),
        Capability::PutUrlResult => driver
            .put_url_result(ctx, dir, ".contract-probe", "http://127.0.0.1/")
            .map(drop),
        Capability::ArchiveReader => driver
            .get_archive_meta(ctx, &probe, &ArchiveArgs::default())
            .map(drop),
        Capability::ArchiveGet => driver.archive_get(ctx, &probe, &inner).map(drop),
        Capability::ArchiveDecompress => driver.archive_decompress(ctx, &probe, dir, &decompress),
        Capability::ArchiveDecompressResult => driver
            .archive_decompress_result(ctx, &probe, dir, &decompress)
            .map(drop),
        Capability::Details => driver.get_details(ctx).map(drop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::additional::Additional;
    use crate::driver::{Capabilities, DriverConfig, DriverResult};
    use crate::models::{Link, Storage};
    use crate::schema::{FieldSpec, Reflect};
    use serde::Serialize;
    use std::sync::RwLock;

    #[derive(Serialize)]
    struct Empty {}

    impl Reflect for Empty {
        fn fields() -> Vec<FieldSpec> {
            Vec::new()
        }
    }

    struct FakeDriver {
        declared: Capabilities,
        link_prefix: String,
        storage: RwLock<Storage>,
    }

    impl FakeDriver {
        fn new(declared: Capabilities) -> Self {
            Self {
                declared,
                link_prefix: "memory://".into(),
                storage: RwLock::new(Storage::default()),
            }
        }
    }

    impl Driver for FakeDriver {
        fn config(&self) -> DriverResult<DriverConfig> {
            Ok(DriverConfig::new("Fake"))
        }

        fn storage(&self) -> DriverResult<Storage> {
            Ok(self.storage.read().unwrap().clone())
        }

        fn set_storage(&self, storage: Storage) -> DriverResult<()> {
            *self.storage.write().unwrap() = storage;
            Ok(())
        }

        fn addition(&self) -> DriverResult<Additional> {
            Additional::without_root(&Empty {}).map_err(|e| DriverError::operation(e.to_string()))
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
            Ok(vec![Obj::file("/readme.md", 12), Obj::folder("/photos")])
        }

        fn link(&self, _ctx: &Context, file: &Obj, _args: &LinkArgs) -> DriverResult<Link> {
            Ok(Link::new(format!("{}{}", self.link_prefix, file.path)))
        }

        fn capabilities(&self) -> Capabilities {
            self.declared.clone()
        }

        fn get_details(&self, _ctx: &Context) -> DriverResult<crate::models::StorageDetails> {
            Ok(crate::models::StorageDetails {
                total_space: 10,
                free_space: 5,
            })
        }
    }

    fn expectations() -> DriverContractExpectations {
        DriverContractExpectations {
            name: "Fake".into(),
            dir: Obj::folder("/"),
            expected_children: vec!["readme.md".into(), "photos".into()],
            link_target: Obj::file("/readme.md", 12),
        }
    }

    #[test]
    fn contract_passes_for_honest_driver() {
        let driver = FakeDriver::new(Capabilities::empty().with(Capability::Details));
        let result = run_driver_contract(&driver, &expectations());
        assert!(result.is_ok(), "expected contract to pass: {result:?}");
    }

    #[test]
    fn contract_flags_capability_implemented_but_undeclared() {
        let driver = FakeDriver::new(Capabilities::empty());
        let result = run_driver_contract(&driver, &expectations());
        assert!(matches!(
            result,
            Err(DriverContractError::UndeclaredCapability {
                capability: Capability::Details,
                ..
            })
        ));
    }

    #[test]
    fn contract_fails_when_link_empty() {
        let mut driver = FakeDriver::new(Capabilities::empty().with(Capability::Details));
        driver.link_prefix.clear();
        let mut exp = expectations();
        exp.link_target = Obj::file("", 0);
        let result = run_driver_contract(&driver, &exp);
        assert!(matches!(result, Err(DriverContractError::EmptyLink { .. })));
    }

    #[test]
    fn contract_fails_on_wrong_name() {
        let driver = FakeDriver::new(Capabilities::empty().with(Capability::Details));
        let mut exp = expectations();
        exp.name = "Other".into();
        assert!(matches!(
            run_driver_contract(&driver, &exp),
            Err(DriverContractError::NameMismatch { .. })
        ));
    }
}
