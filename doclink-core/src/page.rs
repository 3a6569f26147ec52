//! Paged query results.
//!
//! [`PaginationParams`] turns a page number into skip/limit values for a
//! [`ListQuery`](crate::executor::ListQuery); the resulting [`Page`] carries the total match
//! count so callers can navigate without a second query of their own.
//!
//! # Example
//!
//! ```ignore
//! use doclink::page::PaginationParams;
//!
//! let page = graph
//!     .all("Post")
//!     .order("title", SortDirection::Asc)
//!     .page(PaginationParams::new(2, 20))
//!     .await?;
//!
//! assert_eq!(page.previous_page, Some(1));
//! ```

use serde::{Deserialize, Serialize};

/// One page of results plus navigation metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page, in query order.
    pub items: Vec<T>,
    /// Number of matches across all pages.
    pub count: u64,
    /// Next page number, when more matches follow.
    pub next_page: Option<u64>,
    /// Previous page number, unless this is the first page.
    pub previous_page: Option<u64>,
}

impl<T> Page<T> {
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Maps every item, keeping the navigation metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

pub struct PageBuilder<T> {
    items: Vec<T>,
    count: u64,
    next_page: Option<u64>,
    previous_page: Option<u64>,
}

impl<T> PageBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_next_page(mut self, next_page: Option<u64>) -> Self {
        self.next_page = next_page;
        self
    }

    pub fn with_previous_page(mut self, previous_page: Option<u64>) -> Self {
        self.previous_page = previous_page;
        self
    }

    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Which page to fetch. Pages are 1-indexed; page 0 is treated as page 1.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    pub page: u64,
    pub per_page: u64,
}

impl PaginationParams {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }
    }

    fn page_number(&self) -> u64 {
        self.page.max(1)
    }

    /// Number of matches to skip before this page.
    pub fn offset(&self) -> u64 {
        (self.page_number() - 1).saturating_mul(self.per_page)
    }

    /// Wraps the items fetched for this page, given the total match count.
    pub fn page_of<T>(&self, items: Vec<T>, total: u64) -> Page<T> {
        let end = self.offset().saturating_add(items.len() as u64);
        let page = self.page_number();

        Page::builder(items)
            .with_count(total)
            .with_next_page((end < total).then_some(page + 1))
            .with_previous_page((page > 1).then(|| page - 1))
            .build()
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_zero_for_first_page() {
        assert_eq!(PaginationParams::new(1, 20).offset(), 0);
        assert_eq!(PaginationParams::new(0, 20).offset(), 0);
        assert_eq!(PaginationParams::new(3, 20).offset(), 40);
    }

    #[test]
    fn middle_page_links_both_ways() {
        let page = PaginationParams::new(2, 10).page_of((11..=20).collect::<Vec<_>>(), 35);

        assert_eq!(page.count, 35);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));
    }

    #[test]
    fn last_page_has_no_next() {
        let page = PaginationParams::new(4, 10).page_of(vec![31, 32, 33, 34, 35], 35);

        assert_eq!(page.next_page, None);
        assert_eq!(page.previous_page, Some(3));
        assert_eq!(page.map(|n| n * 2).items, vec![62, 64, 66, 68, 70]);
    }
}
