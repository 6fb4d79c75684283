//! Pagination engine
//!
//! Two request styles are accepted, never mixed:
//!
//! - `page[number]` (0-based) with `page[size]`
//! - `page[offset]` with `page[limit]`
//!
//! Both reduce to a `(limit, offset)` pair for storage. Links reuse the
//! style the request was made in.

mod errors;
mod links;

pub use errors::PageError;
pub use links::{link_header, PageLinks};

use crate::query::{QuerySpec, RawQuery};

pub const PAGE_NUMBER: &str = "page[number]";
pub const PAGE_SIZE: &str = "page[size]";
pub const PAGE_OFFSET: &str = "page[offset]";
pub const PAGE_LIMIT: &str = "page[limit]";

/// Default page size when the request names none
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Largest page size a request may ask for
pub const MAX_PAGE_SIZE: usize = 100;

/// Configured page size limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDefaults {
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for PageDefaults {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_PAGE_SIZE,
            max_size: MAX_PAGE_SIZE,
        }
    }
}

/// Which parameter pair the request used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStyle {
    Number,
    Offset,
}

/// Resolved page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub style: PageStyle,
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    /// First page in the number style
    pub fn first(defaults: &PageDefaults) -> Self {
        Self {
            style: PageStyle::Number,
            limit: defaults.default_size.min(defaults.max_size),
            offset: 0,
        }
    }

    /// Read page parameters from a raw query
    pub fn parse(raw: &RawQuery, defaults: &PageDefaults) -> Result<Self, PageError> {
        let number = read(raw, PAGE_NUMBER)?;
        let size = read(raw, PAGE_SIZE)?;
        let offset = read(raw, PAGE_OFFSET)?;
        let limit = read(raw, PAGE_LIMIT)?;

        let number_style = number.is_some() || size.is_some();
        let offset_style = offset.is_some() || limit.is_some();
        if number_style && offset_style {
            let parameter = if number.is_some() { PAGE_NUMBER } else { PAGE_SIZE };
            return Err(PageError::invalid(
                parameter,
                "page[number]/page[size] cannot be combined with page[offset]/page[limit]",
            ));
        }

        if !number_style && !offset_style {
            return Ok(Self::first(defaults));
        }

        if offset_style {
            let limit = check_size(PAGE_LIMIT, limit, defaults)?;
            return Ok(Self {
                style: PageStyle::Offset,
                limit,
                offset: offset.unwrap_or(0),
            });
        }

        let size = check_size(PAGE_SIZE, size, defaults)?;
        let offset = number
            .unwrap_or(0)
            .checked_mul(size)
            .ok_or_else(|| PageError::invalid(PAGE_NUMBER, "page number is too large"))?;
        Ok(Self {
            style: PageStyle::Number,
            limit: size,
            offset,
        })
    }
}

fn read(raw: &RawQuery, parameter: &str) -> Result<Option<usize>, PageError> {
    match raw.get(parameter) {
        None => Ok(None),
        Some(text) => text.trim().parse::<usize>().map(Some).map_err(|_| {
            PageError::invalid(
                parameter,
                format!("'{}' is not a non-negative integer", text),
            )
        }),
    }
}

fn check_size(parameter: &str, size: Option<usize>, defaults: &PageDefaults) -> Result<usize, PageError> {
    match size {
        None => Ok(defaults.default_size.min(defaults.max_size)),
        Some(0) => Err(PageError::invalid(parameter, "page size must be positive")),
        Some(size) if size > defaults.max_size => Err(PageError::PageSizeExceeded {
            parameter: parameter.to_string(),
            size,
            max: defaults.max_size,
        }),
        Some(size) => Ok(size),
    }
}

/// `(limit, offset)` for the storage query
pub fn paginate(spec: &QuerySpec) -> (usize, usize) {
    (spec.page.limit, spec.page.offset)
}

/// Index of the last page: `max(0, ceil(total / size) - 1)`
pub fn last_page(total: usize, size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    total.div_ceil(size).saturating_sub(1)
}
