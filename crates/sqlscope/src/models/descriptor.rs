use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ScopeMapping;

pub const UNKNOWN_DATATYPE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    View,
}

impl ObjectType {
    #[must_use]
    pub fn from_catalog(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "table" => Some(Self::Table),
            "view" => Some(Self::View),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub datatype: String,
    pub nullable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub schema_name: String,
    pub object_name: String,
    pub object_type: ObjectType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub verified: bool,
    pub columns: Vec<ColumnDescriptor>,
}

impl ObjectDescriptor {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema_name, &self.object_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub role_name: String,
    pub database_name: String,
    pub schema_name: String,
    pub degraded: bool,
    pub objects: BTreeMap<String, ObjectDescriptor>,
}

impl SchemaDescriptor {
    #[must_use]
    pub fn new(
        role_name: impl Into<String>,
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
    ) -> Self {
        Self {
            role_name: role_name.into(),
            database_name: database_name.into(),
            schema_name: schema_name.into(),
            degraded: false,
            objects: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn covers(&self, scope: &ScopeMapping) -> bool {
        self.role_name == scope.role_name
            && self.database_name == scope.database_name
            && self.schema_name == scope.schema_name
    }

    pub fn insert(&mut self, object: ObjectDescriptor) {
        self.objects.insert(object.qualified_name(), object);
    }

    pub fn visible_objects(&self) -> impl Iterator<Item = &str> {
        self.objects
            .values()
            .map(|object| object.object_name.as_str())
    }

    #[must_use]
    pub fn get(&self, object_name: &str) -> Option<&ObjectDescriptor> {
        self.objects
            .get(&qualified_name(&self.schema_name, object_name))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[must_use]
    pub fn count_of(&self, object_type: ObjectType) -> usize {
        self.objects
            .values()
            .filter(|object| object.object_type == object_type)
            .count()
    }
}

#[must_use]
pub fn qualified_name(schema_name: &str, object_name: &str) -> String {
    format!("{schema_name}.{object_name}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DescriptionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(default)]
    pub columns: BTreeMap<String, ColumnNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ColumnNote {
    Detailed(ColumnNoteDetail),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnNoteDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagList>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TagList {
    List(Vec<String>),
    Joined(String),
}

impl TagList {
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::List(values) => values.iter().map(String::as_str).collect(),
            Self::Joined(joined) => joined.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

impl ColumnNote {
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Detailed(detail) => detail.description.as_deref(),
            Self::Text(text) => Some(text.as_str()),
        }
        .map(str::trim)
        .filter(|text| !text.is_empty())
    }

    #[must_use]
    pub fn datatype(&self) -> Option<&str> {
        match self {
            Self::Detailed(detail) => detail.datatype.as_deref(),
            Self::Text(_) => None,
        }
        .map(str::trim)
        .filter(|text| !text.is_empty())
    }

    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        match self {
            Self::Detailed(ColumnNoteDetail {
                tags: Some(tags), ..
            }) => tags.to_vec(),
            _ => Vec::new(),
        }
    }
}

impl DescriptionDocument {
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match serde_json::from_str::<Self>(raw) {
            Ok(document) => document,
            Err(_) => {
                let text = match serde_json::from_str::<Value>(raw) {
                    Ok(Value::String(text)) => text,
                    _ => raw.to_string(),
                };
                let text = text.trim();
                Self {
                    description: (!text.is_empty()).then(|| text.to_string()),
                    ..Self::default()
                }
            }
        }
    }
}

pub fn description_json_schema() -> Value {
    let schema = schemars::schema_for!(DescriptionDocument);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated description schema: {error}");
        }
    }
}
