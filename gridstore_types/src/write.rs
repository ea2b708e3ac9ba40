//! Batch write requests and their unprocessed residue.

use serde::{Deserialize, Serialize};

use crate::Item;

/// One entry in a batch write request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WriteRequest {
    /// Store an item, replacing any existing item with the same key.
    Put { item: Item },
    /// Remove the item with the given key, if present.
    ///
    /// `key` carries only the attributes named by the table's key schema.
    Delete { key: Item },
}

impl WriteRequest {
    pub fn put(item: Item) -> Self {
        Self::Put { item }
    }

    pub fn delete(key: Item) -> Self {
        Self::Delete { key }
    }
}

/// Body of a single-item put request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PutItemRequest {
    pub item: Item,
}

/// Body of a batch write request. At most [`MAX_BATCH_ITEMS`] entries.
///
/// [`MAX_BATCH_ITEMS`]: crate::MAX_BATCH_ITEMS
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BatchWriteRequest {
    pub requests: Vec<WriteRequest>,
}

/// Body of a batch write response.
///
/// Entries the service accepted but did not apply come back in
/// `unprocessed`; the caller is expected to resubmit them. An empty list
/// means the whole batch was applied.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchWriteResponse {
    #[serde(default)]
    pub unprocessed: Vec<WriteRequest>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn write_requests_are_externally_tagged() {
        let put = WriteRequest::put(json!({"id": "a", "n": 1}).as_object().cloned().unwrap());
        assert_eq!(
            serde_json::to_value(&put).unwrap(),
            json!({"put": {"item": {"id": "a", "n": 1}}})
        );

        let delete = WriteRequest::delete(json!({"id": "a"}).as_object().cloned().unwrap());
        assert_eq!(
            serde_json::to_value(&delete).unwrap(),
            json!({"delete": {"key": {"id": "a"}}})
        );

        let batch: BatchWriteRequest = serde_json::from_value(json!({
            "requests": [
                {"put": {"item": {"id": "a"}}},
                {"delete": {"key": {"id": "b"}}},
            ]
        }))
        .unwrap();
        assert_eq!(batch.requests.len(), 2);
    }

    #[test]
    fn unprocessed_defaults_to_empty() {
        let response: BatchWriteResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.unprocessed.is_empty());
    }
}
