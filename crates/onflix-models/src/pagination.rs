//! Page/limit pagination.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Raw page parameters from a query string.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl PageParams {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    /// Page is at least 1; limit defaults to 20 and is clamped to 1..=100.
    pub fn normalize(&self) -> (u64, u64) {
        let page = match self.page {
            Some(p) if p >= 1 => p as u64,
            _ => 1,
        };
        let limit = match self.limit {
            Some(l) => l.clamp(1, MAX_PAGE_SIZE as i64) as u64,
            None => DEFAULT_PAGE_SIZE,
        };
        (page, limit)
    }

    pub fn skip(&self) -> u64 {
        let (page, limit) = self.normalize();
        (page - 1) * limit
    }
}

/// Pagination metadata returned alongside a page of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total_items: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total_items.div_ceil(limit)
        };
        Self {
            current_page: page,
            total_pages,
            total_items,
            items_per_page: limit,
            has_next: page < total_pages,
            has_previous: page > 1 && total_pages > 0,
        }
    }
}

/// A page of items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, params: &PageParams, total_items: u64) -> Self {
        let (page, limit) = params.normalize();
        Self {
            items,
            pagination: Pagination::new(page, limit, total_items),
        }
    }

    /// Paginate an in-memory list.
    pub fn from_slice(all: Vec<T>, params: &PageParams) -> Self {
        let total = all.len() as u64;
        let skip = params.skip() as usize;
        let (_, limit) = params.normalize();
        let items = all.into_iter().skip(skip).take(limit as usize).collect();
        Self::new(items, params, total)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_defaults() {
        assert_eq!(PageParams::default().normalize(), (1, 20));
        assert_eq!(PageParams::new(0, 0).normalize(), (1, 1));
        assert_eq!(PageParams::new(-3, 500).normalize(), (1, 100));
        assert_eq!(PageParams::new(4, 25).skip(), 75);
    }

    #[test]
    fn test_empty_collection() {
        let p = Pagination::new(1, 20, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
        assert!(!p.has_previous);
    }

    #[test]
    fn test_middle_page() {
        let p = Pagination::new(2, 10, 35);
        assert_eq!(p.total_pages, 4);
        assert!(p.has_next);
        assert!(p.has_previous);
    }

    #[test]
    fn test_page_beyond_end_is_empty() {
        let page = Paginated::from_slice((0..5).collect::<Vec<_>>(), &PageParams::new(3, 2));
        assert_eq!(page.items, vec![4]);
        let page = Paginated::from_slice((0..5).collect::<Vec<_>>(), &PageParams::new(9, 2));
        assert!(page.items.is_empty());
        assert!(!page.pagination.has_next);
    }
}
