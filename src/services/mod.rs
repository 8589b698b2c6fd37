//! Business services, one per resource. Every query is scoped by the caller's
//! company; rows of other tenants are reported as not found.

pub mod accounts;
pub mod companies;
pub mod inventory;
pub mod orders;
pub mod products;
pub mod reports;
pub mod stock_movements;
pub mod suppliers;
pub mod users;
pub mod warehouses;

use crate::errors::ServiceError;
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, Select};
use serde::Serialize;

/// One-based page selection, already clamped to the configured bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn new(page: Option<u64>, per_page: Option<u64>, default_size: u64, max_size: u64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(default_size).clamp(1, max_size.max(1)),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.per_page
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            (self.total + self.per_page - 1) / self.per_page
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Runs a select through sea-orm's paginator.
pub async fn fetch_page<C, E>(
    conn: &C,
    select: Select<E>,
    request: PageRequest,
) -> Result<Page<E::Model>, ServiceError>
where
    C: ConnectionTrait,
    E: EntityTrait,
    E::Model: Send + Sync,
{
    let paginator = select.paginate(conn, request.per_page);
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(request.page - 1).await?;
    Ok(Page {
        items,
        total,
        page: request.page,
        per_page: request.per_page,
    })
}

/// Trims a free-text filter, treating blank input as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Case-insensitive substring match on a column.
pub(crate) fn contains_ci<C>(column: C, term: &str) -> SimpleExpr
where
    C: ColumnTrait,
{
    Expr::expr(Func::lower(Expr::col(column))).like(format!("%{}%", term.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, None, 1, 20)]
    #[case(Some(0), Some(0), 1, 1)]
    #[case(Some(3), Some(500), 3, 100)]
    #[case(Some(2), Some(10), 2, 10)]
    fn page_requests_are_clamped(
        #[case] page: Option<u64>,
        #[case] per_page: Option<u64>,
        #[case] expected_page: u64,
        #[case] expected_size: u64,
    ) {
        let request = PageRequest::new(page, per_page, 20, 100);
        assert_eq!(request.page, expected_page);
        assert_eq!(request.per_page, expected_size);
    }

    #[test]
    fn offset_and_total_pages() {
        let request = PageRequest::new(Some(3), Some(10), 20, 100);
        assert_eq!(request.offset(), 20);

        let page = Page {
            items: vec![1, 2],
            total: 21,
            page: 3,
            per_page: 10,
        };
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.map(|n| n * 2).items, vec![2, 4]);
    }

    #[test]
    fn blank_filters_are_dropped() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" acme ".into())), Some("acme".into()));
    }
}
