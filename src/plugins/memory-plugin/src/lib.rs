//! In-memory storage drivers served as a DriveHub plugin.
//!
//! The plugin hosts one driver per id listed in `MEMORY_PLUGIN_DRIVERS`
//! (`alpha,beta` when unset). The first driver declares every optional
//! capability; the others only implement the mandatory operations.

mod tree;

use drivehub_core::models::{parent_path, ArchiveTree};
use drivehub_core::{
    Additional, ArchiveArgs, ArchiveDecompressArgs, ArchiveInnerArgs, ArchiveMeta, Capabilities,
    Capability, Context, Driver, DriverConfig, DriverError, DriverResult, FieldSpec, FileStream,
    Link, LinkArgs, ListArgs, Obj, Reflect, RootPath, Storage, StorageDetails,
};
use drivehub_plugin::Plugin;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use tree::{normalize, MemoryTree};

pub const DRIVERS_ENV: &str = "MEMORY_PLUGIN_DRIVERS";
/// When set, each plugin process appends its PID to this file on start.
pub const SPAWN_LOG_ENV: &str = "MEMORY_PLUGIN_SPAWN_LOG";
pub const DEFAULT_DRIVERS: [&str; 2] = ["alpha", "beta"];
pub const DEFAULT_SEED: &str = "x/a.txt,x/b.txt,docs/readme.md";
const DEFAULT_TOTAL_SPACE: u64 = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryAddition {
    #[serde(flatten)]
    pub root: RootPath,
    pub seed: String,
    pub total_space: u64,
}

impl Default for MemoryAddition {
    fn default() -> Self {
        Self {
            root: RootPath::new("/"),
            seed: DEFAULT_SEED.to_string(),
            total_space: DEFAULT_TOTAL_SPACE,
        }
    }
}

impl Reflect for MemoryAddition {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::nested::<RootPath>("RootPath"),
            FieldSpec::string("Seed")
                .json("seed")
                .default_value(DEFAULT_SEED)
                .help("comma separated paths created on init, a trailing / marks a folder"),
            FieldSpec::uint("TotalSpace")
                .json("total_space")
                .default_value(DEFAULT_TOTAL_SPACE.to_string()),
        ]
    }
}

/// Driver ids from the raw value of [`DRIVERS_ENV`]. An empty value means no
/// drivers; the defaults apply only when the variable is unset.
pub fn driver_ids(value: Option<&str>) -> Vec<String> {
    match value {
        None => DEFAULT_DRIVERS.iter().map(|id| id.to_string()).collect(),
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

pub fn driver_ids_from_env() -> Vec<String> {
    driver_ids(std::env::var(DRIVERS_ENV).ok().as_deref())
}

pub fn build_plugin(ids: &[String]) -> Plugin {
    let mut plugin = Plugin::new("memory")
        .description("In-memory storage drivers")
        .version(env!("CARGO_PKG_VERSION"));
    for (position, id) in ids.iter().enumerate() {
        let capabilities = if position == 0 {
            Capabilities::all()
        } else {
            Capabilities::empty()
        };
        let driver_id = id.clone();
        plugin = plugin.driver(id.clone(), move || {
            Box::new(MemoryDriver::new(driver_id.clone(), capabilities.clone())) as Box<dyn Driver>
        });
    }
    plugin
}

/// A driver over a [`MemoryTree`]. Optional methods are only served for the
/// capabilities it was constructed with.
#[derive(Debug)]
pub struct MemoryDriver {
    id: String,
    capabilities: Capabilities,
    storage: RwLock<Storage>,
    addition: RwLock<MemoryAddition>,
    tree: RwLock<MemoryTree>,
}

impl MemoryDriver {
    pub fn new(id: impl Into<String>, capabilities: Capabilities) -> Self {
        let addition = MemoryAddition::default();
        Self {
            id: id.into(),
            capabilities,
            storage: RwLock::new(Storage::default()),
            tree: RwLock::new(MemoryTree::seeded(&addition.seed)),
            addition: RwLock::new(addition),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn require(&self, capability: Capability) -> DriverResult<()> {
        if self.capabilities.supports(capability) {
            Ok(())
        } else {
            Err(DriverError::unsupported(capability))
        }
    }

    fn tree(&self) -> RwLockReadGuard<'_, MemoryTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_mut(&self) -> RwLockWriteGuard<'_, MemoryTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_addition(&self) -> MemoryAddition {
        self.addition
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn link_for(&self, obj: &Obj) -> Link {
        let mut link = Link::new(format!("memory://{}{}", self.id, normalize(&obj.path)));
        link.content_length = Some(obj.size);
        link
    }

    fn archive(&self, obj: &Obj) -> DriverResult<BTreeMap<String, bool>> {
        Ok(archive_entries(self.tree().content(&obj.path)?))
    }

    fn decompress(
        &self,
        ctx: &Context,
        src: &Obj,
        dst_dir: &Obj,
        args: &ArchiveDecompressArgs,
    ) -> DriverResult<Vec<Obj>> {
        ctx.check()?;
        let archive_path = normalize(&src.path);
        let entries = self.archive(src)?;
        let inner = normalize(&args.inner.inner_path);
        if inner != "/" && !entries.contains_key(&inner) {
            return Err(DriverError::not_found(format!("{archive_path}:{inner}")));
        }

        let mut tree = self.tree_mut();
        let mut created = Vec::new();
        let mut base = tree.get(&dst_dir.path)?.path;
        if args.put_into_new_dir {
            let dir = tree.ensure_below(&base, archive_stem(&src.name))?;
            base = dir.path.clone();
            created.push(dir);
        }

        let strip = if entries.get(&inner) == Some(&false) {
            parent_path(&inner).len()
        } else {
            inner.len()
        };
        for (path, is_folder) in &entries {
            if !within(path, &inner) {
                continue;
            }
            let relative = path[strip..].trim_start_matches('/');
            if relative.is_empty() {
                continue;
            }
            if *is_folder {
                created.push(tree.ensure_below(&base, relative)?);
                continue;
            }
            let (dir, name) = match relative.rsplit_once('/') {
                Some((parent, name)) => (tree.ensure_below(&base, parent)?.path, name),
                None => (base.clone(), relative),
            };
            let content = format!("{archive_path}:{path}").into_bytes();
            created.push(tree.put(&dir, name, content)?);
        }
        tracing::debug!(archive = %archive_path, into = %base, entries = created.len(), "decompressed archive");
        Ok(created)
    }
}

/// Inner entries of an archive file: one path per line, lines ending in `/`
/// are folders. Parents are implied.
fn archive_entries(content: &[u8]) -> BTreeMap<String, bool> {
    let mut entries = BTreeMap::new();
    let text = String::from_utf8_lossy(content);
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let path = normalize(line);
        let mut parent = parent_path(&path).to_string();
        while parent != "/" {
            let next = parent_path(&parent).to_string();
            entries.insert(parent, true);
            parent = next;
        }
        let is_folder = line.ends_with('/');
        entries
            .entry(path)
            .and_modify(|folder| *folder |= is_folder)
            .or_insert(is_folder);
    }
    entries
}

fn within(path: &str, inner: &str) -> bool {
    inner == "/" || path == inner || path.starts_with(&format!("{inner}/"))
}

fn archive_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn archive_obj(path: &str, is_folder: bool) -> Obj {
    if is_folder {
        Obj::folder(path)
    } else {
        Obj::file(path, 0)
    }
}

fn archive_children(entries: &BTreeMap<String, bool>, dir: &str) -> Vec<ArchiveTree> {
    entries
        .iter()
        .filter(|(path, _)| parent_path(path) == dir)
        .map(|(path, is_folder)| ArchiveTree {
            obj: archive_obj(path, *is_folder),
            children: if *is_folder {
                archive_children(entries, path)
            } else {
                Vec::new()
            },
        })
        .collect()
}

fn schema_error(err: drivehub_core::SchemaError) -> DriverError {
    DriverError::operation(err.to_string())
}

impl Driver for MemoryDriver {
    fn config(&self) -> DriverResult<DriverConfig> {
        Ok(DriverConfig {
            local_sort: true,
            no_cache: true,
            default_root: "/".to_string(),
            ..DriverConfig::new(format!("memory-{}", self.id))
        })
    }

    fn storage(&self) -> DriverResult<Storage> {
        Ok(self
            .storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set_storage(&self, storage: Storage) -> DriverResult<()> {
        *self.storage.write().unwrap_or_else(PoisonError::into_inner) = storage;
        Ok(())
    }

    fn addition(&self) -> DriverResult<Additional> {
        let addition = self.current_addition();
        Additional::new(addition.root.clone(), &addition).map_err(schema_error)
    }

    fn set_addition(&self, addition: Additional) -> DriverResult<()> {
        let mut next = self.current_addition();
        addition.unmarshal_data(&mut next).map_err(schema_error)?;
        *self.addition.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }

    fn init(&self, ctx: &Context) -> DriverResult<()> {
        ctx.check()?;
        let addition = self.current_addition();
        let tree = MemoryTree::seeded(&addition.seed);
        let root = normalize(&addition.root.root_folder_path);
        tree.get(&root)?;
        *self.tree_mut() = tree;
        tracing::info!(driver = %self.id, root = %root, "memory driver initialized");
        Ok(())
    }

    fn teardown(&self, _ctx: &Context) -> DriverResult<()> {
        *self.tree_mut() = MemoryTree::new();
        tracing::debug!(driver = %self.id, "memory driver dropped");
        Ok(())
    }

    fn list(&self, ctx: &Context, dir: &Obj, _args: &ListArgs) -> DriverResult<Vec<Obj>> {
        ctx.check()?;
        self.tree().children(&dir.path)
    }

    fn link(&self, ctx: &Context, file: &Obj, _args: &LinkArgs) -> DriverResult<Link> {
        ctx.check()?;
        let obj = self.tree().get(&file.path)?;
        if obj.is_folder {
            return Err(DriverError::operation(format!(
                "{} is a folder",
                obj.path
            )));
        }
        Ok(self.link_for(&obj))
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn get_root(&self, _ctx: &Context) -> DriverResult<Obj> {
        self.require(Capability::GetRoot)?;
        let root = self.current_addition().root.root_folder_path;
        self.tree().get(&root)
    }

    fn get(&self, _ctx: &Context, path: &str) -> DriverResult<Obj> {
        self.require(Capability::Get)?;
        self.tree().get(path)
    }

    fn get_obj_info(&self, _ctx: &Context, path: &str) -> DriverResult<Obj> {
        self.require(Capability::GetObjInfo)?;
        self.tree().get(path)
    }

    fn make_dir(&self, _ctx: &Context, parent: &Obj, name: &str) -> DriverResult<()> {
        self.require(Capability::MakeDir)?;
        self.tree_mut().make_dir(&parent.path, name).map(drop)
    }

    fn make_dir_result(&self, _ctx: &Context, parent: &Obj, name: &str) -> DriverResult<Obj> {
        self.require(Capability::MakeDirResult)?;
        self.tree_mut().make_dir(&parent.path, name)
    }

    fn move_obj(&self, _ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<()> {
        self.require(Capability::Move)?;
        self.tree_mut().move_to(&src.path, &dst_dir.path).map(drop)
    }

    fn move_result(&self, _ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<Obj> {
        self.require(Capability::MoveResult)?;
        self.tree_mut().move_to(&src.path, &dst_dir.path)
    }

    fn rename(&self, _ctx: &Context, src: &Obj, new_name: &str) -> DriverResult<()> {
        self.require(Capability::Rename)?;
        self.tree_mut().rename(&src.path, new_name).map(drop)
    }

    fn rename_result(&self, _ctx: &Context, src: &Obj, new_name: &str) -> DriverResult<Obj> {
        self.require(Capability::RenameResult)?;
        self.tree_mut().rename(&src.path, new_name)
    }

    fn copy(&self, _ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<()> {
        self.require(Capability::Copy)?;
        self.tree_mut().copy_to(&src.path, &dst_dir.path).map(drop)
    }

    fn copy_result(&self, _ctx: &Context, src: &Obj, dst_dir: &Obj) -> DriverResult<Vec<Obj>> {
        self.require(Capability::CopyResult)?;
        self.tree_mut().copy_to(&src.path, &dst_dir.path)
    }

    fn remove(&self, _ctx: &Context, obj: &Obj) -> DriverResult<()> {
        self.require(Capability::Remove)?;
        self.tree_mut().remove(&obj.path)
    }

    fn put(&self, _ctx: &Context, dst_dir: &Obj, file: &FileStream) -> DriverResult<()> {
        self.require(Capability::Put)?;
        self.tree_mut()
            .put(&dst_dir.path, &file.name, file.content.clone())
            .map(drop)
    }

    fn put_result(&self, _ctx: &Context, dst_dir: &Obj, file: &FileStream) -> DriverResult<Obj> {
        self.require(Capability::PutResult)?;
        self.tree_mut()
            .put(&dst_dir.path, &file.name, file.content.clone())
    }

    fn put_url(&self, _ctx: &Context, dst_dir: &Obj, name: &str, url: &str) -> DriverResult<()> {
        self.require(Capability::PutUrl)?;
        self.tree_mut()
            .put(&dst_dir.path, name, url.as_bytes().to_vec())
            .map(drop)
    }

    fn put_url_result(
        &self,
        _ctx: &Context,
        dst_dir: &Obj,
        name: &str,
        url: &str,
    ) -> DriverResult<Obj> {
        self.require(Capability::PutUrlResult)?;
        self.tree_mut()
            .put(&dst_dir.path, name, url.as_bytes().to_vec())
    }

    fn get_archive_meta(
        &self,
        _ctx: &Context,
        obj: &Obj,
        _args: &ArchiveArgs,
    ) -> DriverResult<ArchiveMeta> {
        self.require(Capability::ArchiveReader)?;
        let entries = self.archive(obj)?;
        Ok(ArchiveMeta {
            comment: format!("{} entries", entries.len()),
            encrypted: false,
            tree: Some(archive_children(&entries, "/")),
        })
    }

    fn list_archive(
        &self,
        _ctx: &Context,
        obj: &Obj,
        args: &ArchiveInnerArgs,
    ) -> DriverResult<Vec<Obj>> {
        self.require(Capability::ArchiveReader)?;
        let entries = self.archive(obj)?;
        let inner = normalize(&args.inner_path);
        match entries.get(&inner) {
            Some(true) => {}
            None if inner == "/" => {}
            Some(false) => {
                return Err(DriverError::operation(format!("{inner} is not a folder")))
            }
            None => return Err(DriverError::not_found(inner)),
        }
        Ok(archive_children(&entries, &inner)
            .into_iter()
            .map(|node| node.obj)
            .collect())
    }

    fn extract(&self, _ctx: &Context, obj: &Obj, args: &ArchiveInnerArgs) -> DriverResult<Link> {
        self.require(Capability::ArchiveReader)?;
        let entries = self.archive(obj)?;
        let inner = normalize(&args.inner_path);
        match entries.get(&inner) {
            Some(false) => Ok(Link::new(format!(
                "memory://{}{}?inner={inner}",
                self.id,
                normalize(&obj.path)
            ))),
            Some(true) => Err(DriverError::operation(format!("{inner} is a folder"))),
            None => Err(DriverError::not_found(inner)),
        }
    }

    fn archive_get(
        &self,
        _ctx: &Context,
        obj: &Obj,
        args: &ArchiveInnerArgs,
    ) -> DriverResult<Obj> {
        self.require(Capability::ArchiveGet)?;
        let entries = self.archive(obj)?;
        let inner = normalize(&args.inner_path);
        if inner == "/" {
            return Ok(Obj::folder("/"));
        }
        entries
            .get(&inner)
            .map(|is_folder| archive_obj(&inner, *is_folder))
            .ok_or_else(|| DriverError::not_found(inner))
    }

    fn archive_decompress(
        &self,
        ctx: &Context,
        src: &Obj,
        dst_dir: &Obj,
        args: &ArchiveDecompressArgs,
    ) -> DriverResult<()> {
        self.require(Capability::ArchiveDecompress)?;
        self.decompress(ctx, src, dst_dir, args).map(drop)
    }

    fn archive_decompress_result(
        &self,
        ctx: &Context,
        src: &Obj,
        dst_dir: &Obj,
        args: &ArchiveDecompressArgs,
    ) -> DriverResult<Vec<Obj>> {
        self.require(Capability::ArchiveDecompressResult)?;
        self.decompress(ctx, src, dst_dir, args)
    }

    fn get_details(&self, _ctx: &Context) -> DriverResult<StorageDetails> {
        self.require(Capability::Details)?;
        let total_space = self.current_addition().total_space;
        let used = self.tree().used_bytes();
        Ok(StorageDetails {
            total_space,
            free_space: total_space.saturating_sub(used),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivehub_core::{run_driver_contract, DriverContractExpectations};
    use serde_json::json;

    fn alpha() -> MemoryDriver {
        MemoryDriver::new("alpha", Capabilities::all())
    }

    fn ctx() -> Context {
        Context::background()
    }

    fn expectations(name: &str) -> DriverContractExpectations {
        DriverContractExpectations {
            name: name.into(),
            dir: Obj::folder("/x"),
            expected_children: vec!["a.txt".into(), "b.txt".into()],
            link_target: Obj::file("/x/a.txt", 8),
        }
    }

    #[test]
    fn driver_ids_default_only_when_unset() {
        assert_eq!(driver_ids(None), ["alpha", "beta"]);
        assert!(driver_ids(Some("")).is_empty());
        assert_eq!(driver_ids(Some(" one, ,two ")), ["one", "two"]);
    }

    #[test]
    fn first_driver_declares_everything() {
        let plugin = build_plugin(&["a".to_string(), "b".to_string()]);
        assert_eq!(plugin.info().driver_ids, ["a", "b"]);
        assert_eq!(plugin.info().name, "memory");
    }

    #[test]
    fn both_shapes_satisfy_the_contract() {
        run_driver_contract(&alpha(), &expectations("memory-alpha")).unwrap();
        let beta = MemoryDriver::new("beta", Capabilities::empty());
        run_driver_contract(&beta, &expectations("memory-beta")).unwrap();
    }

    #[test]
    fn undeclared_capability_is_refused_without_side_effects() {
        let beta = MemoryDriver::new("beta", Capabilities::empty());
        let err = beta.remove(&ctx(), &Obj::file("/x/a.txt", 0)).unwrap_err();
        assert_eq!(err, DriverError::unsupported(Capability::Remove));
        assert_eq!(beta.list(&ctx(), &Obj::folder("/x"), &ListArgs::default()).unwrap().len(), 2);
    }

    #[test]
    fn reflected_items_match_serialized_keys() {
        let addition = alpha().addition().unwrap();
        let mut keys: Vec<_> = addition.data().keys().cloned().collect();
        let mut names: Vec<_> = addition.items().iter().map(|i| i.name.clone()).collect();
        keys.sort();
        names.sort();
        assert_eq!(keys, names);
    }

    #[test]
    fn addition_round_trips_and_init_reseeds() {
        let driver = alpha();
        let addition = driver.addition().unwrap();
        assert_eq!(
            addition.items().iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            ["root_folder_path", "seed", "total_space"]
        );
        assert_eq!(addition.get_string("seed", ""), DEFAULT_SEED);

        let updated = addition.with_values([("seed".to_string(), json!("fresh/one,fresh/two"))]);
        driver.set_addition(updated).unwrap();
        // the old tree survives until init
        assert!(driver.get(&ctx(), "/x/a.txt").is_ok());
        driver.init(&ctx()).unwrap();
        let names: Vec<_> = driver
            .list(&ctx(), &Obj::folder("/fresh"), &ListArgs::default())
            .unwrap()
            .into_iter()
            .map(|obj| obj.name)
            .collect();
        assert_eq!(names, ["one", "two"]);
        assert!(driver.get(&ctx(), "/x").is_err());
    }

    #[test]
    fn init_rejects_a_missing_root() {
        let driver = alpha();
        let addition = driver
            .addition()
            .unwrap()
            .with_values([("root_folder_path".to_string(), json!("/missing"))]);
        driver.set_addition(addition).unwrap();
        assert_eq!(
            driver.init(&ctx()).unwrap_err(),
            DriverError::not_found("/missing")
        );
    }

    #[test]
    fn writes_are_visible_to_reads() {
        let driver = alpha();
        let dir = driver
            .make_dir_result(&ctx(), &Obj::folder("/"), "inbox")
            .unwrap();
        let file = FileStream::new("note.txt", b"hello".to_vec());
        let put = driver.put_result(&ctx(), &dir, &file).unwrap();
        assert_eq!(put.path, "/inbox/note.txt");
        assert_eq!(put.size, 5);

        let link = driver.link(&ctx(), &put, &LinkArgs::default()).unwrap();
        assert_eq!(link.url, "memory://alpha/inbox/note.txt");
        assert_eq!(link.content_length, Some(5));

        let renamed = driver.rename_result(&ctx(), &put, "memo.txt").unwrap();
        let moved = driver
            .move_result(&ctx(), &renamed, &Obj::folder("/docs"))
            .unwrap();
        assert_eq!(moved.path, "/docs/memo.txt");
        driver.remove(&ctx(), &dir).unwrap();
        assert!(driver.get_obj_info(&ctx(), "/inbox").is_err());

        let details = driver.get_details(&ctx()).unwrap();
        assert_eq!(details.total_space, DEFAULT_TOTAL_SPACE);
        assert!(details.free_space < details.total_space);
    }

    #[test]
    fn archives_are_listed_and_decompressed() {
        let driver = alpha();
        let listing = b"photos/\nphotos/2024/beach.jpg\nnotes.txt\n".to_vec();
        let archive = driver
            .put_result(&ctx(), &Obj::folder("/"), &FileStream::new("bundle.zip", listing))
            .unwrap();

        let meta = driver
            .get_archive_meta(&ctx(), &archive, &ArchiveArgs::default())
            .unwrap();
        let top: Vec<_> = meta
            .tree
            .unwrap()
            .into_iter()
            .map(|node| node.obj.name)
            .collect();
        assert_eq!(top, ["notes.txt", "photos"]);

        let inner = ArchiveInnerArgs {
            inner_path: "/photos".into(),
            ..ArchiveInnerArgs::default()
        };
        let listed = driver.list_archive(&ctx(), &archive, &inner).unwrap();
        assert_eq!(listed[0].path, "/photos/2024");
        assert!(driver.extract(&ctx(), &archive, &inner).is_err());

        let args = ArchiveDecompressArgs {
            put_into_new_dir: true,
            ..ArchiveDecompressArgs::default()
        };
        let created = driver
            .archive_decompress_result(&ctx(), &archive, &Obj::folder("/docs"), &args)
            .unwrap();
        assert_eq!(created[0].path, "/docs/bundle");
        assert!(driver.get(&ctx(), "/docs/bundle/photos/2024/beach.jpg").is_ok());
        assert!(driver.get(&ctx(), "/docs/bundle/notes.txt").is_ok());
    }

    #[test]
    fn single_archive_file_lands_in_the_target() {
        let driver = alpha();
        let archive = driver
            .put_result(
                &ctx(),
                &Obj::folder("/"),
                &FileStream::new("a.tar", b"deep/inner/file.bin".to_vec()),
            )
            .unwrap();
        let args = ArchiveDecompressArgs {
            inner: ArchiveInnerArgs {
                inner_path: "/deep/inner/file.bin".into(),
                ..ArchiveInnerArgs::default()
            },
            ..ArchiveDecompressArgs::default()
        };
        driver
            .archive_decompress(&ctx(), &archive, &Obj::folder("/docs"), &args)
            .unwrap();
        assert!(driver.get(&ctx(), "/docs/file.bin").is_ok());
        let got = driver
            .archive_get(&ctx(), &archive, &args.inner)
            .unwrap();
        assert_eq!(got.name, "file.bin");
    }
}
