//! Pagination types for query results.
//!
//! This module provides the [`Page`] struct returned by
//! [`QueryBuilder::paginate`](crate::query::QueryBuilder::paginate) and the
//! [`PaginationParams`] used to compute the skip and limit of a page.

use serde::{Deserialize, Serialize};

/// A single page of paginated results.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// let page = User::query(&db).paginate(2, 20).await?;
///
/// assert_eq!(page.page, 2);
/// assert_eq!(page.last_page, page.total.div_ceil(20));
///
/// for user in &page.data {
///     println!("{}", user.name);
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Total count of items matching the query across all pages.
    pub total: u64,
    /// Number of items per page.
    pub per_page: u64,
    /// The number of the last page, `ceil(total / per_page)`.
    pub last_page: u64,
    /// The number of this page (1-indexed).
    pub page: u64,
    /// The items contained in this page.
    pub data: Vec<T>,
}

impl<T> Page<T> {
    /// Creates a page, deriving `last_page` from the total and the page size.
    pub fn new(data: Vec<T>, total: u64, params: PaginationParams) -> Self {
        let last_page = match params.per_page {
            0 => 0,
            per_page => total.div_ceil(per_page),
        };

        Self {
            total,
            per_page: params.per_page,
            last_page,
            page: params.page,
            data,
        }
    }

    /// The next page number, if this is not the last page.
    pub fn next_page(&self) -> Option<u64> {
        (self.page < self.last_page).then(|| self.page + 1)
    }

    /// The previous page number, if this is not the first page.
    pub fn previous_page(&self) -> Option<u64> {
        (self.page > 1).then(|| self.page - 1)
    }

    /// Maps the items of this page, keeping the pagination metadata.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            total: self.total,
            per_page: self.per_page,
            last_page: self.last_page,
            page: self.page,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

/// Parameters for paginating through large result sets.
///
/// Pages are 1-indexed (page 1 is the first page).
///
/// # Example
///
/// ```ignore
/// use docrecord::page::PaginationParams;
///
/// let params = PaginationParams::new(3, 20);
/// assert_eq!(params.offset(), 40);  // Skip 40 items for page 3
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    /// The page number (1-indexed).
    pub page: u64,
    /// Number of items per page.
    pub per_page: u64,
}

impl PaginationParams {
    pub const DEFAULT_PAGE: u64 = 1;
    pub const DEFAULT_PER_PAGE: u64 = 20;

    /// Creates new pagination parameters. A page of `0` is treated as the first page.
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page: page.max(1), per_page }
    }

    /// Calculates the number of items to skip for this page.
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.per_page)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: Self::DEFAULT_PAGE,
            per_page: Self::DEFAULT_PER_PAGE,
        }
    }
}
