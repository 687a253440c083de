//! Page/per-page parsing and page navigation metadata.
//!
//! Query values are parsed leniently: a leading integer prefix is used
//! (`"3abc"` is 3) and anything else reads as 0, so malformed input clamps
//! to the defaults instead of failing the request.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PER_PAGE: u64 = 10;
pub const MAX_PER_PAGE: u64 = 100;

/// Raw pagination query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub per_page: Option<String>,
}

/// Clamped pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based page number, at least 1
    pub page: u64,
    /// Page size in `1..=MAX_PER_PAGE`
    pub per_page: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Pagination {
    pub fn from_query(query: &PageQuery) -> Self {
        Self::from_raw(query.page.as_deref(), query.per_page.as_deref())
    }

    pub fn from_raw(page: Option<&str>, per_page: Option<&str>) -> Self {
        let page = page.map(lenient_int).unwrap_or(0);
        let per_page = per_page.map(lenient_int).unwrap_or(0);

        Self {
            page: u64::try_from(page).unwrap_or(0).max(DEFAULT_PAGE),
            per_page: match u64::try_from(per_page) {
                Ok(0) | Err(_) => DEFAULT_PER_PAGE,
                Ok(n) => n.min(MAX_PER_PAGE),
            },
        }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    /// Navigation metadata for this page given the total row count.
    pub fn meta(&self, total_count: u64) -> PageMeta {
        let total_pages = total_count.div_ceil(self.per_page.max(1));
        let out_of_range = self.page > total_pages;

        PageMeta {
            current_page: self.page,
            per_page: self.per_page,
            total_count,
            total_pages,
            next_page: (!out_of_range && self.page < total_pages).then(|| self.page + 1),
            prev_page: (!out_of_range && self.page > 1).then(|| self.page - 1),
        }
    }
}

/// Page navigation metadata returned with every listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub current_page: u64,
    pub per_page: u64,
    pub total_count: u64,
    pub total_pages: u64,
    /// `None` on the last page or when the page is out of range
    pub next_page: Option<u64>,
    /// `None` on the first page or when the page is out of range
    pub prev_page: Option<u64>,
}

/// Parse the leading integer of `raw`, ignoring leading whitespace.
///
/// An optional sign followed by digits is consumed; parsing stops at the
/// first other character. No digits reads as 0 and overflow saturates.
pub fn lenient_int(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, trimmed.get(1..).unwrap_or_default()),
        Some(b'+') => (false, trimmed.get(1..).unwrap_or_default()),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for digit in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i64::from(digit - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(digit)
        } else {
            value.saturating_mul(10).saturating_add(digit)
        };
    }
    value
}
