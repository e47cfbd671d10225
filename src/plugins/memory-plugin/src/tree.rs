//! Path-keyed in-memory file tree.

use drivehub_core::models::{base_name, join_path, parent_path};
use drivehub_core::{DriverError, DriverResult, Obj};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct Node {
    obj: Obj,
    content: Vec<u8>,
}

#[derive(Debug)]
pub struct MemoryTree {
    nodes: BTreeMap<String, Node>,
    next_id: u64,
}

/// `/a/b/` and `a/b` both become `/a/b`; the empty path is the root.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn now_secs() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_secs())
}

fn descendant_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

impl MemoryTree {
    /// A tree holding only the root folder.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: BTreeMap::new(),
            next_id: 0,
        };
        let root = tree.node(Obj::folder("/"), Vec::new());
        tree.nodes.insert("/".to_string(), root);
        tree
    }

    /// Builds a tree from a comma separated seed such as `docs/,x/a.txt`.
    ///
    /// Entries ending in `/` are folders; anything else is a file whose
    /// content is its own path. Missing parents are created.
    pub fn seeded(seed: &str) -> Self {
        let mut tree = Self::new();
        for entry in seed.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let path = normalize(entry);
            if entry.ends_with('/') {
                tree.ensure_folder(&path);
            } else {
                tree.ensure_folder(parent_path(&path));
                tree.insert(Obj::file(path.clone(), 0), path.clone().into_bytes());
            }
        }
        tree
    }

    fn node(&mut self, mut obj: Obj, content: Vec<u8>) -> Node {
        self.next_id += 1;
        obj.id = self.next_id.to_string();
        if !obj.is_folder {
            obj.size = content.len() as u64;
        }
        Node { obj, content }
    }

    fn insert(&mut self, obj: Obj, content: Vec<u8>) -> Obj {
        let node = self.node(obj, content);
        let obj = node.obj.clone();
        self.nodes.insert(obj.path.clone(), node);
        obj
    }

    fn ensure_folder(&mut self, path: &str) {
        if path == "/" || self.nodes.contains_key(path) {
            return;
        }
        self.ensure_folder(parent_path(path));
        self.insert(Obj::folder(path), Vec::new());
    }

    pub fn get(&self, path: &str) -> DriverResult<Obj> {
        let path = normalize(path);
        self.nodes
            .get(&path)
            .map(|node| node.obj.clone())
            .ok_or_else(|| DriverError::not_found(path))
    }

    pub fn content(&self, path: &str) -> DriverResult<&[u8]> {
        let path = normalize(path);
        match self.nodes.get(&path) {
            Some(node) if node.obj.is_folder => Err(DriverError::operation(format!(
                "{path} is a folder"
            ))),
            Some(node) => Ok(&node.content),
            None => Err(DriverError::not_found(path)),
        }
    }

    fn folder(&self, path: &str) -> DriverResult<String> {
        let path = normalize(path);
        match self.nodes.get(&path) {
            Some(node) if node.obj.is_folder => Ok(path),
            Some(_) => Err(DriverError::operation(format!("{path} is not a folder"))),
            None => Err(DriverError::not_found(path)),
        }
    }

    fn vacant(&self, path: &str) -> DriverResult<()> {
        if self.nodes.contains_key(path) {
            return Err(DriverError::operation(format!("{path} already exists")));
        }
        Ok(())
    }

    /// Direct children of `dir`, ordered by path.
    pub fn children(&self, dir: &str) -> DriverResult<Vec<Obj>> {
        let dir = self.folder(dir)?;
        let prefix = descendant_prefix(&dir);
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/') && **path != dir)
            .map(|(_, node)| node.obj.clone())
            .collect())
    }

    pub fn make_dir(&mut self, parent: &str, name: &str) -> DriverResult<Obj> {
        let parent = self.folder(parent)?;
        let path = join_path(&parent, name);
        self.vacant(&path)?;
        let mut obj = Obj::folder(path);
        obj.modified = now_secs();
        obj.created = obj.modified;
        Ok(self.insert(obj, Vec::new()))
    }

    pub fn put(&mut self, dir: &str, name: &str, content: Vec<u8>) -> DriverResult<Obj> {
        let dir = self.folder(dir)?;
        let path = join_path(&dir, name);
        if self.nodes.get(&path).is_some_and(|node| node.obj.is_folder) {
            return Err(DriverError::operation(format!("{path} is a folder")));
        }
        let mut obj = Obj::file(path, 0);
        obj.modified = now_secs();
        Ok(self.insert(obj, content))
    }

    /// Keys of `path` and everything below it.
    fn subtree(&self, path: &str) -> Vec<String> {
        let prefix = descendant_prefix(path);
        let mut keys = vec![path.to_string()];
        keys.extend(
            self.nodes
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone()),
        );
        keys
    }

    fn existing_non_root(&self, path: &str) -> DriverResult<String> {
        let path = normalize(path);
        if path == "/" {
            return Err(DriverError::operation("the root folder cannot be modified"));
        }
        if !self.nodes.contains_key(&path) {
            return Err(DriverError::not_found(path));
        }
        Ok(path)
    }

    /// Re-keys `from` and its subtree to `to`.
    fn relocate(&mut self, from: &str, to: &str) -> DriverResult<Obj> {
        self.vacant(to)?;
        if to.starts_with(&descendant_prefix(from)) {
            return Err(DriverError::operation(format!(
                "cannot move {from} into itself"
            )));
        }
        for key in self.subtree(from) {
            if let Some(mut node) = self.nodes.remove(&key) {
                let path = format!("{to}{}", &key[from.len()..]);
                node.obj.name = base_name(&path).to_string();
                node.obj.path = path.clone();
                self.nodes.insert(path, node);
            }
        }
        self.get(to)
    }

    pub fn move_to(&mut self, src: &str, dst_dir: &str) -> DriverResult<Obj> {
        let src = self.existing_non_root(src)?;
        let dst_dir = self.folder(dst_dir)?;
        let to = join_path(&dst_dir, base_name(&src));
        self.relocate(&src, &to)
    }

    pub fn rename(&mut self, src: &str, new_name: &str) -> DriverResult<Obj> {
        let src = self.existing_non_root(src)?;
        if new_name.is_empty() || new_name.contains('/') {
            return Err(DriverError::operation(format!("invalid name {new_name:?}")));
        }
        let to = join_path(parent_path(&src), new_name);
        self.relocate(&src, &to)
    }

    /// Duplicates `src` and its subtree into `dst_dir`. Returns the copies,
    /// top-most first.
    pub fn copy_to(&mut self, src: &str, dst_dir: &str) -> DriverResult<Vec<Obj>> {
        let src = self.existing_non_root(src)?;
        let dst_dir = self.folder(dst_dir)?;
        let to = join_path(&dst_dir, base_name(&src));
        self.vacant(&to)?;
        if to.starts_with(&descendant_prefix(&src)) {
            return Err(DriverError::operation(format!(
                "cannot copy {src} into itself"
            )));
        }
        let mut copies = Vec::new();
        for key in self.subtree(&src) {
            let Some(node) = self.nodes.get(&key).cloned() else {
                continue;
            };
            let path = format!("{to}{}", &key[src.len()..]);
            let mut obj = node.obj;
            obj.name = base_name(&path).to_string();
            obj.path = path;
            copies.push(self.insert(obj, node.content));
        }
        Ok(copies)
    }

    pub fn remove(&mut self, path: &str) -> DriverResult<()> {
        let path = self.existing_non_root(path)?;
        for key in self.subtree(&path) {
            self.nodes.remove(&key);
        }
        Ok(())
    }

    /// Creates a folder (and any missing parents) below `dir`. Existing
    /// folders are reused.
    pub fn ensure_below(&mut self, dir: &str, relative: &str) -> DriverResult<Obj> {
        let dir = self.folder(dir)?;
        let path = join_path(&dir, relative.trim_matches('/'));
        if self.nodes.get(&path).is_some_and(|node| !node.obj.is_folder) {
            return Err(DriverError::operation(format!("{path} is a file")));
        }
        self.ensure_folder(&path);
        self.get(&path)
    }

    pub fn used_bytes(&self) -> u64 {
        self.nodes.values().map(|node| node.content.len() as u64).sum()
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}
