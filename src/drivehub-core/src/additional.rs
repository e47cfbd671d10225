//! Opaque driver configuration carrier.

use crate::schema::{data_of, ConfigItem, FieldSpec, Reflect, SchemaError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPath {
    pub root_folder_path: String,
}

impl RootPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            root_folder_path: path.into(),
        }
    }
}

impl Reflect for RootPath {
    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::string("RootFolderPath").json("root_folder_path")]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootId {
    pub root_folder_id: String,
}

impl RootId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            root_folder_id: id.into(),
        }
    }
}

impl Reflect for RootId {
    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::string("RootFolderID").json("root_folder_id")]
    }
}

/// Root of a storage: a path or an id, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Root {
    Path(RootPath),
    Id(RootId),
}

impl Root {
    pub fn root_path(&self) -> Option<&str> {
        match self {
            Root::Path(root) => Some(&root.root_folder_path),
            Root::Id(_) => None,
        }
    }

    pub fn root_id(&self) -> Option<&str> {
        match self {
            Root::Id(root) => Some(&root.root_folder_id),
            Root::Path(_) => None,
        }
    }
}

impl From<RootPath> for Root {
    fn from(value: RootPath) -> Self {
        Root::Path(value)
    }
}

impl From<RootId> for Root {
    fn from(value: RootId) -> Self {
        Root::Id(value)
    }
}

/// Item list, raw data mapping and optional root of a driver configuration.
///
/// Built once when a configuration is bound and replaced wholesale on
/// reconfiguration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Additional {
    #[serde(default)]
    items: Vec<ConfigItem>,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    root: Option<Root>,
}

impl Additional {
    pub fn new<T: Reflect + Serialize>(root: impl Into<Root>, value: &T) -> Result<Self, SchemaError> {
        Ok(Self {
            items: T::config_items(),
            data: data_of(value)?,
            root: Some(root.into()),
        })
    }

    pub fn without_root<T: Reflect + Serialize>(value: &T) -> Result<Self, SchemaError> {
        Ok(Self {
            items: T::config_items(),
            data: data_of(value)?,
            root: None,
        })
    }

    pub fn from_parts(items: Vec<ConfigItem>, data: Map<String, Value>, root: Option<Root>) -> Self {
        Self { items, data, root }
    }

    pub fn items(&self) -> &[ConfigItem] {
        &self.items
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn root(&self) -> Option<&Root> {
        self.root.as_ref()
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.data
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// A new carrier with `overrides` applied on top of this data mapping.
    pub fn with_values<I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut data = self.data.clone();
        data.extend(overrides);
        Self {
            items: self.items.clone(),
            data,
            root: self.root.clone(),
        }
    }

    /// Deserializes the data mapping into `target`. An empty mapping leaves
    /// `target` untouched.
    pub fn unmarshal_data<T: DeserializeOwned>(&self, target: &mut T) -> Result<(), SchemaError> {
        if self.data.is_empty() {
            return Ok(());
        }
        *target = serde_json::from_value(Value::Object(self.data.clone()))
            .map_err(SchemaError::Decode)?;
        Ok(())
    }

    /// The data mapping as JSON text, the form stored on a [`crate::models::Storage`].
    pub fn data_json(&self) -> Result<String, SchemaError> {
        serde_json::to_string(&self.data).map_err(SchemaError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Addition {
        #[serde(flatten)]
        root: RootPath,
        #[serde(rename = "url")]
        address: String,
        #[serde(rename = "forward_archive_requests")]
        forward_archive: bool,
        #[serde(flatten)]
        limits: Limits,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Limits {
        max_depth: String,
        follow_links: bool,
    }

    impl Reflect for Limits {
        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::string("MaxDepth").json("max_depth"),
                FieldSpec::boolean("FollowLinks").json("follow_links"),
            ]
        }
    }

    impl Reflect for Addition {
        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::nested::<RootPath>("RootPath"),
                FieldSpec::string("Address").json("url").required(),
                FieldSpec::boolean("ForwardArchive")
                    .json("forward_archive_requests")
                    .default_value("true"),
                FieldSpec::nested::<Limits>("Limits"),
            ]
        }
    }

    fn sample() -> Addition {
        Addition {
            root: RootPath::new("/data"),
            address: "https://share.example".into(),
            forward_archive: true,
            limits: Limits {
                max_depth: "3".into(),
                follow_links: false,
            },
        }
    }

    #[test]
    fn data_round_trips_into_fresh_struct() {
        let original = sample();
        let additional = Additional::new(original.root.clone(), &original).unwrap();
        let json = serde_json::to_string(&additional).unwrap();
        let decoded: Additional = serde_json::from_str(&json).unwrap();

        let mut fresh = Addition::default();
        decoded.unmarshal_data(&mut fresh).unwrap();
        assert_eq!(fresh, original);
    }

    #[test]
    fn data_keys_match_item_names() {
        let additional = Additional::without_root(&sample()).unwrap();
        let mut keys: Vec<_> = additional.data().keys().cloned().collect();
        let mut names: Vec<_> = additional.items().iter().map(|i| i.name.clone()).collect();
        keys.sort();
        names.sort();
        assert_eq!(keys, names);
    }

    #[test]
    fn root_keeps_exactly_one_shape() {
        let path = Additional::new(RootPath::new("/"), &sample()).unwrap();
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json["root"], serde_json::json!({"root_folder_path": "/"}));
        let back: Additional = serde_json::from_value(json).unwrap();
        assert_eq!(back.root().and_then(Root::root_path), Some("/"));

        let id = Additional::new(RootId::new("0"), &sample()).unwrap();
        let back: Additional =
            serde_json::from_value(serde_json::to_value(&id).unwrap()).unwrap();
        assert_eq!(back.root().and_then(Root::root_id), Some("0"));
        assert_eq!(back.root().and_then(Root::root_path), None);
    }

    #[test]
    fn typed_accessors_fall_back_to_defaults() {
        let additional = Additional::without_root(&sample()).unwrap();
        assert_eq!(additional.get_string("url", ""), "https://share.example");
        assert_eq!(additional.get_string("missing", "x"), "x");
        assert!(additional.get_bool("forward_archive_requests", false));
        assert!(additional.get_bool("url", true));
    }

    #[test]
    fn empty_data_leaves_target_untouched() {
        let mut target = sample();
        Additional::default().unmarshal_data(&mut target).unwrap();
        assert_eq!(target, sample());
    }
}
