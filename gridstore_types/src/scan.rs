//! Scan requests and result pages.

use serde::{Deserialize, Serialize};

use crate::Item;

/// Body of a scan request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanRequest {
    /// When set, the scan reflects every write acknowledged before it.
    #[serde(default)]
    pub consistent_read: bool,
    /// Resume after this key, exclusive. Comes from a previous page's
    /// `last_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_key: Option<Item>,
    /// Cap on items per page. The service may return fewer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

/// One page of scan results.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// Number of items in this page.
    pub count: usize,
    /// Number of rows the service examined to produce this page.
    pub scanned_count: usize,
    /// Present when more pages remain; pass it back as `start_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_key: Option<Item>,
}

/// All pages of a scan, aggregated client-side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanOutput {
    pub items: Vec<Item>,
    pub count: usize,
    pub scanned_count: usize,
}

impl ScanOutput {
    /// Fold one page into the aggregate.
    pub fn push_page(&mut self, page: ScanPage) {
        self.count += page.count;
        self.scanned_count += page.scanned_count;
        self.items.extend(page.items);
    }
}
