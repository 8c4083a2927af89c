//! Pagination for `response` entries carrying a `limit`

use groundwork_common::{Error, Result};
use serde::Serialize;

/// Pagination metadata reported in the response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total_records: i64,
    /// Current page number (1-indexed)
    pub current_page: i64,
    /// 0 on the last page
    pub next_page: i64,
    /// 0 on the first page
    pub previous_page: i64,
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET query
    #[serde(skip)]
    pub offset: i64,
    #[serde(skip)]
    pub limit: i64,
}

/// Calculate pagination metadata from total results, requested page and page size
///
/// Ensures page is within valid bounds [1, total_pages]
///
/// # Examples
/// ```
/// use groundwork_dispatch::pagination::calculate_pagination;
///
/// // 101 records at 25 per page = 5 pages (4 x 25 + 1)
/// let p = calculate_pagination(101, 1, 25).unwrap();
/// assert_eq!(p.total_pages, 5);
/// assert_eq!(p.next_page, 2);
/// assert_eq!(p.previous_page, 0);
///
/// // Requesting out-of-bounds page gets clamped
/// let p = calculate_pagination(101, 99, 25).unwrap();
/// assert_eq!(p.current_page, 5);
/// assert_eq!(p.offset, 100);
/// ```
pub fn calculate_pagination(total_records: i64, requested_page: i64, limit: i64) -> Result<Pagination> {
    if limit < 1 {
        return Err(Error::InvalidInput(format!(
            "limit must be a positive integer, got {}",
            limit
        )));
    }

    let total_records = total_records.max(0);
    let total_pages = total_records / limit + i64::from(total_records % limit != 0);
    let page = requested_page.max(1).min(total_pages.max(1));
    // page > 1 only when limit < total_records, so this cannot overflow
    let offset = (page - 1) * limit;

    Ok(Pagination {
        total_records,
        current_page: page,
        next_page: if page < total_pages { page + 1 } else { 0 },
        previous_page: if page > 1 { page - 1 } else { 0 },
        total_pages,
        offset,
        limit,
    })
}

impl Pagination {
    /// Window of an in-memory result list for this page
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}
