//! Page-based selection for list queries.

use serde::{Deserialize, Serialize};

/// 1-based page selection. Out-of-range inputs are clamped rather than
/// rejected: page 0 becomes 1, an oversized page size becomes the maximum.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    page: u32,
    page_size: u32,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: u32 = 50;
    pub const MAX_PAGE_SIZE: u32 = 200;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

/// One page of results with the total row count for the full filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, pagination: Pagination, total: u64) -> Self {
        Self {
            items,
            page: pagination.page(),
            page_size: pagination.page_size(),
            total,
        }
    }

    pub fn has_more(&self) -> bool {
        u64::from(self.page) * u64::from(self.page_size) < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_page_and_size() {
        let p = Pagination::new(0, 0);
        assert_eq!(p.page(), 1);
        assert_eq!(p.page_size(), 1);
        assert_eq!(p.offset(), 0);

        let p = Pagination::new(3, 10_000);
        assert_eq!(p.page_size(), Pagination::MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 2 * u64::from(Pagination::MAX_PAGE_SIZE));
    }

    #[test]
    fn has_more_accounts_for_total() {
        let page = PageResult::new(vec![1, 2], Pagination::new(1, 2), 5);
        assert!(page.has_more());
        let last = PageResult::new(vec![5], Pagination::new(3, 2), 5);
        assert!(!last.has_more());
    }
}
