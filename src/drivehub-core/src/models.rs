use crate::schema::{FieldSpec, Reflect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A file or folder exposed by a driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obj {
    #[serde(default)]
    pub id: String,
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    /// Modification time as unix seconds when known.
    #[serde(default)]
    pub modified: Option<u64>,
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub is_folder: bool,
    /// Hash type (e.g. `md5`, `sha1`) to hex digest.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl Obj {
    pub fn folder(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: base_name(&path).to_string(),
            path,
            is_folder: true,
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            name: base_name(&path).to_string(),
            path,
            size,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Last segment of a `/`-separated path; `/` for the root.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Joins a parent path and a child name with exactly one `/`.
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    format!("{parent}/{name}")
}

/// Parent of a `/`-separated path.
pub fn parent_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &trimmed[..pos],
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListArgs {
    #[serde(default)]
    pub req_path: String,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkArgs {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    #[serde(default)]
    pub redirect: bool,
}

/// A resolved download location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    #[serde(default)]
    pub expiration_secs: Option<u64>,
    #[serde(default)]
    pub content_length: Option<u64>,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Upload payload. Content travels base64-encoded on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStream {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub mimetype: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl FileStream {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: content.len() as u64,
            mimetype: "application/octet-stream".into(),
            content,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveArgs {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInnerArgs {
    #[serde(default)]
    pub archive: ArchiveArgs,
    pub inner_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveDecompressArgs {
    pub inner: ArchiveInnerArgs,
    #[serde(default)]
    pub cache_full: bool,
    #[serde(default)]
    pub put_into_new_dir: bool,
}

/// Entry of an archive's directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveTree {
    pub obj: Obj,
    #[serde(default)]
    pub children: Vec<ArchiveTree>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub tree: Option<Vec<ArchiveTree>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDetails {
    pub total_space: u64,
    pub free_space: u64,
}

/// A configured storage instance bound to one driver.
///
/// The reflected fields of this struct are the *common* configuration items
/// shown for every driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub mount_path: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub cache_expiration: u32,
    #[serde(default)]
    pub status: String,
    /// Additional configuration as JSON text.
    #[serde(default)]
    pub addition: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub web_proxy: bool,
    #[serde(default)]
    pub webdav_policy: String,
    #[serde(default)]
    pub down_proxy_url: String,
}

impl Reflect for Storage {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::uint("ID").json("id").ignore(),
            FieldSpec::string("MountPath")
                .json("mount_path")
                .required()
                .help("The path you want to mount to, it is unique and cannot be repeated"),
            FieldSpec::int("Order")
                .json("order")
                .kind("number")
                .help("use to sort"),
            FieldSpec::string("Driver").json("driver").ignore(),
            FieldSpec::uint("CacheExpiration")
                .json("cache_expiration")
                .kind("number")
                .default_value("30")
                .help("The cache expiration time for this storage"),
            FieldSpec::string("Status").json("status").ignore(),
            FieldSpec::string("Addition").json("addition").ignore(),
            FieldSpec::string("Remark").json("remark").kind("text"),
            FieldSpec::boolean("Disabled").json("disabled").ignore(),
            FieldSpec::boolean("WebProxy").json("web_proxy"),
            FieldSpec::string("WebdavPolicy")
                .json("webdav_policy")
                .kind("select")
                .options("302_redirect,use_proxy_url,native_proxy")
                .default_value("302_redirect")
                .required(),
            FieldSpec::string("DownProxyUrl")
                .json("down_proxy_url")
                .kind("text"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers_handle_root_and_trailing_slashes() {
        assert_eq!(base_name("/"), "/");
        assert_eq!(base_name("/a/b/"), "b");
        assert_eq!(parent_path("/a/b"), "/a");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(join_path("/", "x"), "/x");
        assert_eq!(join_path("/a/", "/x"), "/a/x");
    }

    #[test]
    fn file_stream_content_is_base64_on_the_wire() {
        let stream = FileStream::new("hello.txt", b"hello".to_vec());
        let json = serde_json::to_value(&stream).unwrap();
        assert_eq!(json["content"], "aGVsbG8=");
        let back: FileStream = serde_json::from_value(json).unwrap();
        assert_eq!(back.content, b"hello");
        assert_eq!(back.size, 5);
    }

    #[test]
    fn storage_common_items_skip_internal_fields() {
        let items = Storage::config_items();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "mount_path",
                "order",
                "cache_expiration",
                "remark",
                "web_proxy",
                "webdav_policy",
                "down_proxy_url"
            ]
        );
        assert!(items[0].required);
        assert_eq!(items[2].default, "30");
        assert_eq!(items[4].kind, "bool");
    }
}
