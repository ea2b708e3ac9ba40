//! The in-memory table store behind the emulator's HTTP surface.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use gridstore_types::{
    Item, MAX_BATCH_ITEMS, MissingKeyAttribute, ScanPage, ScanRequest, TableDefinition,
    TableDescription, TableStatus, WriteRequest,
};
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("table {table_name:?} already exists")]
    TableExists { table_name: String },

    #[error("table {table_name:?} does not exist")]
    TableNotFound { table_name: String },

    #[error(transparent)]
    MissingKeyAttribute(#[from] MissingKeyAttribute),

    #[error("batch of {count} entries exceeds the {} entry limit", MAX_BATCH_ITEMS)]
    BatchTooLarge { count: usize },
}

/// All tables held by one emulator.
///
/// Every operation locks, mutates, and unlocks; nothing is held across an
/// await point.
#[derive(Debug, Default)]
pub(crate) struct TableStore {
    tables: Mutex<BTreeMap<String, TableData>>,
    inject_unprocessed: AtomicUsize,
    batch_requests: AtomicU64,
}

#[derive(Debug)]
struct TableData {
    definition: TableDefinition,
    /// Rows ordered by the canonical encoding of their key projection.
    rows: BTreeMap<String, Item>,
}

/// The canonical row ordering: the JSON encoding of the key projection.
/// [`Item`] keeps its attributes sorted, so the encoding is deterministic.
fn row_key(key: &Item) -> String {
    serde_json::Value::Object(key.clone()).to_string()
}

impl TableStore {
    /// Tables become active the moment they are created; there is no
    /// asynchronous provisioning to emulate.
    pub(crate) fn create_table(
        &self,
        definition: TableDefinition,
    ) -> Result<TableDescription, StoreError> {
        let mut tables = self.tables.lock();
        match tables.entry(definition.table_name.clone()) {
            Entry::Occupied(_) => Err(StoreError::TableExists {
                table_name: definition.table_name,
            }),
            Entry::Vacant(slot) => {
                let table = TableData {
                    definition,
                    rows: BTreeMap::new(),
                };
                let description = table.description();
                slot.insert(table);
                Ok(description)
            }
        }
    }

    pub(crate) fn list_tables(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }

    pub(crate) fn describe_table(&self, table_name: &str) -> Result<TableDescription, StoreError> {
        let tables = self.tables.lock();
        let table = tables.get(table_name).ok_or_else(|| StoreError::TableNotFound {
            table_name: table_name.to_owned(),
        })?;
        Ok(table.description())
    }

    pub(crate) fn delete_table(&self, table_name: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables
            .remove(table_name)
            .map(|_| ())
            .ok_or_else(|| StoreError::TableNotFound {
                table_name: table_name.to_owned(),
            })
    }

    pub(crate) fn put_item(&self, table_name: &str, item: Item) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::TableNotFound {
                table_name: table_name.to_owned(),
            })?;
        table.put(item)
    }

    /// Apply a batch of writes, in order.
    ///
    /// Returns the entries that were refused because of an armed
    /// [`TableStore::inject_unprocessed`] counter; refusal starts from the
    /// tail of the batch. A validation failure aborts the rest of the batch.
    pub(crate) fn batch_write(
        &self,
        table_name: &str,
        mut requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, StoreError> {
        if requests.len() > MAX_BATCH_ITEMS {
            return Err(StoreError::BatchTooLarge {
                count: requests.len(),
            });
        }
        self.batch_requests.fetch_add(1, Ordering::SeqCst);

        let mut refused = 0;
        let _ = self
            .inject_unprocessed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                refused = remaining.min(requests.len());
                Some(remaining - refused)
            });

        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::TableNotFound {
                table_name: table_name.to_owned(),
            })?;

        let unprocessed = requests.split_off(requests.len() - refused);
        for request in requests {
            table.apply(request)?;
        }
        Ok(unprocessed)
    }

    pub(crate) fn scan(
        &self,
        table_name: &str,
        request: &ScanRequest,
        default_page_size: usize,
    ) -> Result<ScanPage, StoreError> {
        let tables = self.tables.lock();
        let table = tables.get(table_name).ok_or_else(|| StoreError::TableNotFound {
            table_name: table_name.to_owned(),
        })?;

        let page_size = request.page_size.unwrap_or(default_page_size).max(1);
        let start = request
            .start_key
            .as_ref()
            .map(|key| table.definition.key_of(key))
            .transpose()?
            .map(|projection| row_key(&projection));

        let range = match &start {
            Some(start) => table
                .rows
                .range::<String, _>((Bound::Excluded(start), Bound::Unbounded)),
            None => table.rows.range::<String, _>(..),
        };

        let mut items = Vec::new();
        let mut truncated = false;
        for (_, item) in range {
            if items.len() == page_size {
                truncated = true;
                break;
            }
            items.push(item.clone());
        }

        let last_key = match (truncated, items.last()) {
            (true, Some(item)) => Some(table.definition.key_of(item)?),
            _ => None,
        };

        let count = items.len();
        Ok(ScanPage {
            items,
            count,
            scanned_count: count,
            last_key,
        })
    }

    /// Arm the partial-failure injector: the next batch writes will refuse
    /// entries, `count` in total, reporting them as unprocessed.
    pub(crate) fn inject_unprocessed(&self, count: usize) {
        self.inject_unprocessed.store(count, Ordering::SeqCst);
    }

    /// Number of batch write requests served so far.
    pub(crate) fn batch_requests(&self) -> u64 {
        self.batch_requests.load(Ordering::SeqCst)
    }
}

impl TableData {
    fn description(&self) -> TableDescription {
        TableDescription {
            definition: self.definition.clone(),
            status: TableStatus::Active,
            item_count: self.rows.len() as u64,
        }
    }

    fn put(&mut self, item: Item) -> Result<(), StoreError> {
        let key = self.definition.key_of(&item)?;
        self.rows.insert(row_key(&key), item);
        Ok(())
    }

    fn apply(&mut self, request: WriteRequest) -> Result<(), StoreError> {
        match request {
            WriteRequest::Put { item } => self.put(item),
            WriteRequest::Delete { key } => {
                let projection = self.definition.key_of(&key)?;
                self.rows.remove(&row_key(&projection));
                Ok(())
            }
        }
    }
}
