//! Shared API request/response types

use serde::{Deserialize, Serialize};

/// Standard JSON error envelope: `{ "error": string, "code"?: string }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
        }
    }
}

/// Pagination query parameters shared by listing endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

pub const PAGE_SIZE: i64 = 100;

/// Paginated listing envelope
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub total_rows: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub rows: Vec<T>,
}

impl<T> Paginated<T> {
    /// Clamp `page` into range and compute the envelope
    pub fn new(total_rows: i64, requested_page: i64, rows: Vec<T>) -> Self {
        let total_pages = (total_rows + PAGE_SIZE - 1) / PAGE_SIZE;
        let page = requested_page.max(1).min(total_pages.max(1));
        Self {
            total_rows,
            page,
            page_size: PAGE_SIZE,
            total_pages,
            rows,
        }
    }

    /// SQL OFFSET for a clamped page
    pub fn offset(total_rows: i64, requested_page: i64) -> i64 {
        let total_pages = (total_rows + PAGE_SIZE - 1) / PAGE_SIZE;
        let page = requested_page.max(1).min(total_pages.max(1));
        (page - 1) * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::new("nope", "forbidden");
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"error\":\"nope\""));
        assert!(json.contains("\"code\":\"forbidden\""));
    }

    #[test]
    fn test_pagination_clamps() {
        let p: Paginated<i64> = Paginated::new(250, 99, vec![]);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.page, 3);

        let p: Paginated<i64> = Paginated::new(250, 0, vec![]);
        assert_eq!(p.page, 1);

        // Empty table still reports page 1
        let p: Paginated<i64> = Paginated::new(0, 5, vec![]);
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 0);
    }

    #[test]
    fn test_offset() {
        assert_eq!(Paginated::<i64>::offset(250, 2), 100);
        assert_eq!(Paginated::<i64>::offset(250, 99), 200);
        assert_eq!(Paginated::<i64>::offset(0, 3), 0);
    }
}
