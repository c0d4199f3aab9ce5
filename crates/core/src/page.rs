//! Pagination descriptors shared by every list operation.

use serde::{Deserialize, Serialize};

/// Page size bounds, injected from configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLimits {
    pub default_size: u32,
    pub max_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 100,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Opaque sort descriptor; each list operation maps `field` onto the
/// columns it supports and falls back to its default order otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Caller-supplied page request. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub sort: Option<Sort>,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size: Some(page_size),
            sort: None,
        }
    }

    pub fn sorted_by(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Clamp the request into a concrete window.
    pub fn window(&self, limits: PageLimits) -> PageWindow {
        let page = self.page.max(1);
        let page_size = match self.page_size {
            Some(0) | None => limits.default_size,
            Some(size) => size.min(limits.max_size),
        }
        .max(1);
        PageWindow { page, page_size }
    }
}

/// A normalized page: `page >= 1`, `1 <= page_size <= max`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub page_size: u32,
}

impl PageWindow {
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    /// Slice an already filtered and ordered collection.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.page_size as usize)
            .collect();
        Page::new(items, total, *self)
    }
}

/// One page of results plus the total count of matching rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, window: PageWindow) -> Self {
        let total_pages = total.div_ceil(u64::from(window.page_size));
        Self {
            items,
            total,
            page: window.page,
            page_size: window.page_size,
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }

    pub fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_applies_defaults_and_caps() {
        let limits = PageLimits::default();
        assert_eq!(
            PageRequest::default().window(limits),
            PageWindow { page: 1, page_size: 20 }
        );
        assert_eq!(
            PageRequest::new(3, 500).window(limits),
            PageWindow { page: 3, page_size: 100 }
        );
    }

    #[test]
    fn slice_reports_totals() {
        let window = PageRequest::new(2, 4).window(PageLimits::default());
        let page = window.slice((1..=10).collect::<Vec<_>>());
        assert_eq!(page.items, vec![5, 6, 7, 8]);
        assert_eq!(page.total, 10);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_more());
    }

    #[test]
    fn empty_result_has_zero_pages() {
        let window = PageRequest::default().window(PageLimits::default());
        let page = window.slice(Vec::<u8>::new());
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_more());
    }
}
