//! Pagination helpers for list endpoints

use serde::Serialize;

/// Sanitised pagination derived from raw query parameters.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// 1-indexed page
    pub page: i64,
    pub page_size: i64,
    pub offset: i64,
}

/// Clamp raw pagination parameters against a page-size cap.
pub fn sanitize(page: Option<i64>, page_size: Option<i64>, default_size: i64, max_size: i64) -> Pagination {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(default_size).clamp(1, max_size);
    Pagination {
        page,
        page_size,
        offset: (page - 1) * page_size,
    }
}

/// Common envelope for paginated responses.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_next: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: Pagination) -> Self {
        Self {
            has_next: pagination.offset + pagination.page_size < total,
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = sanitize(None, None, 30, 365);
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, 30);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_caps_page_size() {
        let p = sanitize(Some(2), Some(9999), 30, 365);
        assert_eq!(p.page_size, 365);
        assert_eq!(p.offset, 365);
    }

    #[test]
    fn test_clamps_low_values() {
        let p = sanitize(Some(0), Some(0), 30, 365);
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, 1);
    }

    #[test]
    fn test_envelope_has_next() {
        let p = sanitize(Some(1), Some(10), 10, 100);
        let page = Page::new(vec![0u8; 10], 25, p);
        assert!(page.has_next);

        let p = sanitize(Some(3), Some(10), 10, 100);
        let page = Page::new(vec![0u8; 5], 25, p);
        assert!(!page.has_next);
    }
}
