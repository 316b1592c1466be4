//! Keyset pagination over record stores
//!
//! Cursors are primary keys. A page's `next_cursor` is the key of its last
//! item, and the following page resumes strictly after that key, so pages
//! never skip or repeat rows even while writers insert around them.

use serde::{Deserialize, Serialize};

/// Scan direction relative to the key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    #[default]
    Forward,
    Backward,
}

/// Page query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum items to return
    pub limit: usize,
    /// Resume strictly after this key; `None` starts from the edge
    pub cursor: Option<String>,
    /// Key-order direction
    pub direction: PageDirection,
}

impl PageRequest {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            limit,
            cursor: None,
            direction: PageDirection::Forward,
        }
    }

    /// Resume after the given cursor.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Scan in descending key order.
    #[must_use]
    pub const fn backward(mut self) -> Self {
        self.direction = PageDirection::Backward;
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Whether rows remain beyond this page
    pub has_more: bool,
    /// Key of the last item, for resuming; `None` on an empty page
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Assemble a page from `limit + 1` fetched rows and a key extractor.
    pub fn from_rows(mut rows: Vec<T>, limit: usize, key: impl Fn(&T) -> String) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = rows.last().map(&key);
        Self {
            items: rows,
            has_more,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_trims_overfetch_and_sets_cursor() {
        let page = Page::from_rows(vec!["a", "b", "c"], 2, ToString::to_string);
        assert_eq!(page.items, vec!["a", "b"]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("b"));
    }

    #[test]
    fn from_rows_final_page_has_no_more() {
        let page = Page::from_rows(vec!["a"], 2, ToString::to_string);
        assert_eq!(page.items, vec!["a"]);
        assert!(!page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("a"));
    }

    #[test]
    fn from_rows_empty_page() {
        let page: Page<&str> = Page::from_rows(vec![], 2, ToString::to_string);
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }
}
