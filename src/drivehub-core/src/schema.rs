//! Configuration schema reflection.
//!
//! Configuration structs describe their fields through [`Reflect`]. The
//! description mirrors what a struct declaration carries: the Rust field
//! name, the value kind, and declared tags (`json`, `ignore`, `type`,
//! `default`, `options`, `required`, `help`). [`collect_items`] turns that
//! description into the flat, ordered [`ConfigItem`] list consumed by generic
//! tooling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

/// One configurable field as presented to the host UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub help: String,
}

/// Value kind of a described field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A named value type; the name is lowercased to infer the item type.
    Named(&'static str),
    /// A value type without a usable name (maps, sequences, tuples).
    Unnamed,
    /// A nested configuration struct, flattened into the parent.
    Struct(Vec<FieldSpec>),
}

impl FieldKind {
    fn inferred_type(&self) -> String {
        match self {
            FieldKind::Named(name) => name.to_lowercase(),
            FieldKind::Unnamed | FieldKind::Struct(_) => String::new(),
        }
    }
}

/// Declared tags of a field. Values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTags {
    pub json: Option<String>,
    pub ignore: Option<String>,
    pub kind: Option<String>,
    pub default: Option<String>,
    pub options: Option<String>,
    pub required: Option<String>,
    pub help: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: &'static str,
    pub kind: FieldKind,
    pub tags: FieldTags,
}

impl FieldSpec {
    pub fn new(field: &'static str, kind: FieldKind) -> Self {
        Self {
            field,
            kind,
            tags: FieldTags::default(),
        }
    }

    pub fn string(field: &'static str) -> Self {
        Self::new(field, FieldKind::Named("string"))
    }

    pub fn boolean(field: &'static str) -> Self {
        Self::new(field, FieldKind::Named("bool"))
    }

    pub fn int(field: &'static str) -> Self {
        Self::new(field, FieldKind::Named("int"))
    }

    pub fn uint(field: &'static str) -> Self {
        Self::new(field, FieldKind::Named("uint"))
    }

    pub fn float(field: &'static str) -> Self {
        Self::new(field, FieldKind::Named("float64"))
    }

    pub fn nested<T: Reflect>(field: &'static str) -> Self {
        Self::new(field, FieldKind::Struct(T::fields()))
    }

    pub fn json(mut self, name: impl Into<String>) -> Self {
        self.tags.json = Some(name.into());
        self
    }

    pub fn ignore(self) -> Self {
        self.ignore_tag("true")
    }

    pub fn ignore_tag(mut self, value: impl Into<String>) -> Self {
        self.tags.ignore = Some(value.into());
        self
    }

    /// Overrides the inferred item type.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.tags.kind = Some(kind.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.tags.default = Some(value.into());
        self
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.tags.options = Some(options.into());
        self
    }

    pub fn required(self) -> Self {
        self.required_tag("true")
    }

    pub fn required_tag(mut self, value: impl Into<String>) -> Self {
        self.tags.required = Some(value.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.tags.help = Some(help.into());
        self
    }
}

/// Implemented by configuration structs to expose their field layout.
pub trait Reflect {
    fn fields() -> Vec<FieldSpec>;

    fn config_items() -> Vec<ConfigItem>
    where
        Self: Sized,
    {
        collect_items(&Self::fields())
    }
}

/// Walks a field description depth-first and produces the item list.
///
/// Nested structs are flattened in declaration order. Fields tagged
/// `ignore:"true"` or lacking a `json` name are skipped. An item name that
/// was already produced is dropped so names stay unique.
pub fn collect_items(fields: &[FieldSpec]) -> Vec<ConfigItem> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    walk(fields, &mut items, &mut seen);
    items
}

fn walk(fields: &[FieldSpec], items: &mut Vec<ConfigItem>, seen: &mut HashSet<String>) {
    for field in fields {
        if let FieldKind::Struct(nested) = &field.kind {
            walk(nested, items, seen);
            continue;
        }
        let tags = &field.tags;
        let Some(name) = tags.json.as_ref() else {
            continue;
        };
        if tags.ignore.as_deref() == Some("true") {
            continue;
        }
        let mut kind = match tags.kind.as_deref() {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => field.kind.inferred_type(),
        };
        if kind.is_empty() {
            kind = "string".to_string();
        }
        if !seen.insert(name.clone()) {
            tracing::warn!(item = %name, field = field.field, "duplicate config item skipped");
            continue;
        }
        items.push(ConfigItem {
            name: name.clone(),
            kind,
            default: tags.default.clone().unwrap_or_default(),
            options: tags.options.clone().unwrap_or_default(),
            required: tags.required.as_deref() == Some("true"),
            help: tags.help.clone().unwrap_or_default(),
        });
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to encode configuration: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode configuration: {0}")]
    Decode(serde_json::Error),
    #[error("configuration must serialize to an object, got {found}")]
    NotAnObject { found: &'static str },
}

/// Flat field-name to raw-value mapping of a configuration value.
pub fn data_of<T: Serialize>(value: &T) -> Result<Map<String, Value>, SchemaError> {
    match serde_json::to_value(value).map_err(SchemaError::Encode)? {
        Value::Object(map) => Ok(map),
        other => Err(SchemaError::NotAnObject {
            found: value_kind(&other),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Credentials;

    impl Reflect for Credentials {
        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::string("Token").json("token").required(),
                FieldSpec::string("Cache").json("cache").ignore(),
            ]
        }
    }

    struct Sample;

    impl Reflect for Sample {
        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::nested::<Credentials>("Credentials").json("credentials"),
                FieldSpec::string("Address").json("url").required_tag("True"),
                FieldSpec::boolean("Forward")
                    .json("forward")
                    .default_value("true")
                    .help("forward requests"),
                FieldSpec::string("Internal"),
                FieldSpec::new("Order", FieldKind::Named("Select"))
                    .json("order")
                    .options("name,size"),
                FieldSpec::new("Extra", FieldKind::Unnamed).json("extra"),
                FieldSpec::int("Limit").json("limit").kind("number"),
                FieldSpec::boolean("Hidden").json("hidden").ignore_tag("false"),
                FieldSpec::string("Shadow").json("token"),
            ]
        }
    }

    #[test]
    fn items_follow_declaration_order_and_flatten_nested() {
        let items = Sample::config_items();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            ["token", "url", "forward", "order", "extra", "limit", "hidden"]
        );
    }

    #[test]
    fn item_fields_copy_tags_verbatim() {
        let items = Sample::config_items();
        assert!(items[0].required);
        // only the exact literal counts as required
        assert!(!items[1].required);
        assert_eq!(items[2].kind, "bool");
        assert_eq!(items[2].default, "true");
        assert_eq!(items[2].help, "forward requests");
        assert_eq!(items[3].kind, "select");
        assert_eq!(items[3].options, "name,size");
        assert_eq!(items[4].kind, "string");
        assert_eq!(items[5].kind, "number");
    }

    #[test]
    fn ignored_fields_never_appear_whatever_their_kind() {
        let items = Sample::config_items();
        assert!(items.iter().all(|i| i.name != "cache"));
    }

    #[test]
    fn extraction_is_byte_identical_across_runs() {
        let first = serde_json::to_vec(&Sample::config_items()).unwrap();
        let second = serde_json::to_vec(&Sample::config_items()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn data_of_rejects_non_struct_values() {
        let err = data_of(&42).unwrap_err();
        assert!(matches!(err, SchemaError::NotAnObject { found: "number" }));
    }
}
