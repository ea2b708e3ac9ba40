//! Request and response types for the Gridstore table service.
//!
//! Everything that crosses the wire between a client and a Gridstore
//! endpoint, live or emulated, is defined here so the two sides cannot
//! drift apart.

use serde::{Deserialize, Serialize};

pub mod scan;
pub mod table;
pub mod write;

pub use scan::{ScanOutput, ScanPage, ScanRequest};
pub use table::{
    KeySchemaElement, KeyType, MissingKeyAttribute, TableDefinition, TableDescription, TableStatus,
};
pub use write::{BatchWriteRequest, BatchWriteResponse, PutItemRequest, WriteRequest};

/// An item stored in a table: attribute name to JSON value.
///
/// The service does not interpret attribute values beyond the attributes
/// named by the table's key schema.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Maximum number of entries the service accepts in a single batch write
/// request. Larger batches are rejected outright rather than partially
/// applied.
pub const MAX_BATCH_ITEMS: usize = 25;

/// Response body for listing tables.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListTablesResponse {
    /// Table names in lexicographic order.
    pub tables: Vec<String>,
}

/// Error body returned by the service for any failed request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}
