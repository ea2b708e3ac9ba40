//! Table definitions and descriptions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Item;

/// Role an attribute plays in a table's primary key.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyType {
    /// Partition key. Every table has exactly one.
    #[serde(rename = "HASH")]
    Hash,
    /// Sort key within a partition. At most one.
    #[serde(rename = "RANGE")]
    Range,
}

/// One attribute of a table's primary key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyType,
}

impl KeySchemaElement {
    /// A partition key element for the named attribute.
    pub fn hash(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            key_type: KeyType::Hash,
        }
    }

    /// A sort key element for the named attribute.
    pub fn range(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            key_type: KeyType::Range,
        }
    }
}

/// A table definition, as submitted to table creation.
///
/// Only the name and key schema are interpreted here. Any other settings
/// (throughput hints, TTL configuration, and whatever the service grows
/// next) ride along in `extra` and reach the service byte-for-byte.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableDefinition {
    pub table_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TableDefinition {
    /// A definition with the given name and key schema and no extra
    /// settings.
    pub fn new(table_name: impl Into<String>, key_schema: Vec<KeySchemaElement>) -> Self {
        Self {
            table_name: table_name.into(),
            key_schema,
            extra: Map::new(),
        }
    }

    /// This definition under a different table name.
    pub fn rename(&self, table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..self.clone()
        }
    }

    /// Names of the key attributes, in schema order.
    pub fn key_attribute_names(&self) -> impl Iterator<Item = &str> {
        self.key_schema.iter().map(|e| e.attribute_name.as_str())
    }

    /// Project `item` down to the attributes named by the key schema.
    pub fn key_of(&self, item: &Item) -> Result<Item, MissingKeyAttribute> {
        let mut key = Item::new();
        for name in self.key_attribute_names() {
            let value = item.get(name).ok_or_else(|| MissingKeyAttribute {
                attribute_name: name.to_owned(),
            })?;
            key.insert(name.to_owned(), value.clone());
        }
        Ok(key)
    }
}

/// An item lacked an attribute required by the table's key schema.
#[derive(Debug, thiserror::Error)]
#[error("item is missing key attribute {attribute_name:?}")]
pub struct MissingKeyAttribute {
    pub attribute_name: String,
}

/// Where a table is in its lifecycle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableStatus {
    Creating,
    Active,
    Deleting,
}

/// A table as reported by the service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableDescription {
    #[serde(flatten)]
    pub definition: TableDefinition,
    pub status: TableStatus,
    pub item_count: u64,
}
