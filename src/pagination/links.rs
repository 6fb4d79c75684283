//! Pagination links
//!
//! Links keep every non-page query parameter of the request and rewrite the
//! page parameters in the request's own style.

use serde_json::{Map, Value};

use crate::query::RawQuery;

use super::{last_page, PageRequest, PageStyle, PAGE_LIMIT, PAGE_NUMBER, PAGE_OFFSET, PAGE_SIZE};

/// Top-level `links` of a paginated collection document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLinks {
    pub self_link: String,
    pub first: String,
    pub last: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl PageLinks {
    /// Build links for `endpoint` (absolute URL without query string)
    pub fn build(endpoint: &str, raw: &RawQuery, page: &PageRequest, total: usize) -> Self {
        let size = page.limit.max(1);
        let last_offset = last_page(total, size) * size;

        let prev = (page.offset > 0).then(|| page.offset.saturating_sub(size));
        let next = page
            .offset
            .checked_add(size)
            .filter(|end| *end < total);

        let link = |offset: usize| page_url(endpoint, raw, page.style, size, offset);
        Self {
            self_link: link(page.offset),
            first: link(0),
            last: link(last_offset),
            prev: prev.map(&link),
            next: next.map(&link),
        }
    }

    /// JSON form; unavailable links are `null`
    pub fn to_value(&self) -> Value {
        let mut links = Map::new();
        links.insert("self".into(), Value::String(self.self_link.clone()));
        links.insert("first".into(), Value::String(self.first.clone()));
        links.insert("last".into(), Value::String(self.last.clone()));
        links.insert(
            "prev".into(),
            self.prev.clone().map(Value::String).unwrap_or(Value::Null),
        );
        links.insert(
            "next".into(),
            self.next.clone().map(Value::String).unwrap_or(Value::Null),
        );
        Value::Object(links)
    }
}

/// RFC 8288 `Link` header value for the navigation links
pub fn link_header(links: &PageLinks) -> String {
    let mut parts = vec![
        format!("<{}>; rel=\"first\"", links.first),
        format!("<{}>; rel=\"last\"", links.last),
    ];
    if let Some(prev) = &links.prev {
        parts.push(format!("<{}>; rel=\"prev\"", prev));
    }
    if let Some(next) = &links.next {
        parts.push(format!("<{}>; rel=\"next\"", next));
    }
    parts.join(", ")
}

fn page_url(endpoint: &str, raw: &RawQuery, style: PageStyle, size: usize, offset: usize) -> String {
    let mut pairs: Vec<(String, String)> = raw
        .iter()
        .filter(|(key, _)| !key.starts_with("page["))
        .map(|(key, value)| (encode_key(key), urlencoding::encode(value).into_owned()))
        .collect();

    match style {
        PageStyle::Number => {
            pairs.push((PAGE_NUMBER.to_string(), (offset / size).to_string()));
            pairs.push((PAGE_SIZE.to_string(), size.to_string()));
        }
        PageStyle::Offset => {
            pairs.push((PAGE_OFFSET.to_string(), offset.to_string()));
            pairs.push((PAGE_LIMIT.to_string(), size.to_string()));
        }
    }

    let query: Vec<String> = pairs.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", endpoint, query.join("&"))
}

/// Parameter names keep their brackets readable
fn encode_key(key: &str) -> String {
    urlencoding::encode(key)
        .replace("%5B", "[")
        .replace("%5D", "]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::PageDefaults;

    fn raw(pairs: &[(&str, &str)]) -> RawQuery {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_number_style_links() {
        let query = raw(&[("page[number]", "1"), ("page[size]", "10"), ("sort", "-name")]);
        let page = PageRequest::parse(&query, &PageDefaults::default()).unwrap();
        let links = PageLinks::build("http://h/people", &query, &page, 25);

        assert_eq!(links.first, "http://h/people?sort=-name&page[number]=0&page[size]=10");
        assert_eq!(links.last, "http://h/people?sort=-name&page[number]=2&page[size]=10");
        assert_eq!(
            links.prev.as_deref(),
            Some("http://h/people?sort=-name&page[number]=0&page[size]=10")
        );
        assert_eq!(
            links.next.as_deref(),
            Some("http://h/people?sort=-name&page[number]=2&page[size]=10")
        );
    }

    #[test]
    fn test_offset_style_links() {
        let query = raw(&[("page[offset]", "0"), ("page[limit]", "5")]);
        let page = PageRequest::parse(&query, &PageDefaults::default()).unwrap();
        let links = PageLinks::build("http://h/people", &query, &page, 12);

        assert_eq!(links.self_link, "http://h/people?page[offset]=0&page[limit]=5");
        assert_eq!(links.last, "http://h/people?page[offset]=10&page[limit]=5");
        assert_eq!(links.prev, None);
        assert_eq!(
            links.next.as_deref(),
            Some("http://h/people?page[offset]=5&page[limit]=5")
        );
    }

    #[test]
    fn test_offset_at_usize_max() {
        let query = raw(&[("page[offset]", "18446744073709551615"), ("page[limit]", "10")]);
        let page = PageRequest::parse(&query, &PageDefaults::default()).unwrap();
        let links = PageLinks::build("http://h/people", &query, &page, 2);

        assert_eq!(links.next, None);
        assert_eq!(
            links.prev.as_deref(),
            Some("http://h/people?page[offset]=18446744073709551605&page[limit]=10")
        );
        assert_eq!(links.last, "http://h/people?page[offset]=0&page[limit]=10");
    }

    #[test]
    fn test_empty_collection_links() {
        let query = RawQuery::new();
        let page = PageRequest::first(&PageDefaults::default());
        let links = PageLinks::build("http://h/people", &query, &page, 0);

        assert_eq!(links.first, links.last);
        assert_eq!(links.next, None);
        assert_eq!(links.to_value()["prev"], Value::Null);
    }

    #[test]
    fn test_values_are_encoded() {
        let query = raw(&[("filter", "[{\"name\":\"name\",\"op\":\"like\",\"val\":\"%n%\"}]")]);
        let page = PageRequest::first(&PageDefaults::default());
        let links = PageLinks::build("http://h/people", &query, &page, 1);
        assert!(links.first.starts_with("http://h/people?filter=%5B%7B%22name%22"));
    }

    #[test]
    fn test_link_header() {
        let query = RawQuery::new();
        let page = PageRequest::first(&PageDefaults::default());
        let links = PageLinks::build("http://h/people", &query, &page, 30);
        let header = link_header(&links);
        assert!(header.contains("rel=\"first\""));
        assert!(header.contains("rel=\"next\""));
        assert!(!header.contains("rel=\"prev\""));
    }
}
