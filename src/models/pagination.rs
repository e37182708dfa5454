//! Offset/limit collections with `first`/`last`/`next`/`previous` links.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{AppError, Result};

pub const DEFAULT_LIMIT: u64 = 200;
pub const MAX_LIMIT: u64 = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl PageParams {
    pub fn window(&self) -> Result<Window> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(AppError::validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        Ok(Window {
            offset: self.offset.unwrap_or(0),
            limit,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

impl Window {
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: u64::MAX,
        }
    }

    /// Apply the window to an already-filtered, already-sorted list.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(usize::try_from(self.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(self.limit).unwrap_or(usize::MAX))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Href {
    pub href: String,
}

/// Builds collection links, preserving the caller's filter parameters.
#[derive(Debug, Clone)]
pub struct Links {
    path: String,
    query: Vec<(String, String)>,
}

impl Links {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Option<impl ToString>) -> Self {
        if let Some(v) = value {
            self.query.push((key.to_string(), v.to_string()));
        }
        self
    }

    fn href(&self, offset: u64, limit: u64) -> Href {
        let mut parts: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        parts.push(format!("limit={limit}"));
        parts.push(format!("offset={offset}"));
        Href {
            href: format!("{}?{}", self.path, parts.join("&")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub window: Window,
}

impl<T: Serialize> Page<T> {
    pub fn new(items: Vec<T>, total_count: u64, window: Window) -> Self {
        Self {
            items,
            total_count,
            window,
        }
    }

    /// Collection body with items under `key`.
    pub fn into_body(self, key: &str, links: &Links) -> Result<Value> {
        let Window { offset, limit } = self.window;
        let total = self.total_count;

        let mut body = Map::new();
        body.insert("total_count".into(), json!(total));
        body.insert("offset".into(), json!(offset));
        body.insert("limit".into(), json!(limit));
        body.insert("first".into(), serde_json::to_value(links.href(0, limit))?);

        let last_offset = if total == 0 { 0 } else { (total - 1) / limit * limit };
        body.insert("last".into(), serde_json::to_value(links.href(last_offset, limit))?);

        if offset.saturating_add(limit) < total {
            body.insert(
                "next".into(),
                serde_json::to_value(links.href(offset + limit, limit))?,
            );
        }
        if offset > 0 {
            body.insert(
                "previous".into(),
                serde_json::to_value(links.href(offset.saturating_sub(limit), limit))?,
            );
        }
        body.insert(key.into(), serde_json::to_value(self.items)?);
        Ok(Value::Object(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(offset: u64, limit: u64, total: u64) -> Value {
        let window = Window { offset, limit };
        let items: Vec<u64> = window.slice((0..total).collect());
        Page::new(items, total, window)
            .into_body("secrets", &Links::new("/api/v2/secrets").with("search", Some("db")))
            .unwrap()
    }

    #[test]
    fn test_first_page_has_next_only() {
        let body = page(0, 10, 25);
        assert_eq!(body["secrets"].as_array().unwrap().len(), 10);
        assert_eq!(body["next"]["href"], "/api/v2/secrets?search=db&limit=10&offset=10");
        assert!(body.get("previous").is_none());
        assert_eq!(body["last"]["href"], "/api/v2/secrets?search=db&limit=10&offset=20");
    }

    #[test]
    fn test_last_page_stops_next_link() {
        let body = page(20, 10, 25);
        assert_eq!(body["secrets"].as_array().unwrap().len(), 5);
        assert!(body.get("next").is_none());
        assert_eq!(body["previous"]["href"], "/api/v2/secrets?search=db&limit=10&offset=10");
    }

    #[test]
    fn test_walking_next_links_terminates() {
        let mut offset = 0;
        let mut pages = 0;
        loop {
            let body = page(offset, 7, 30);
            pages += 1;
            match body.get("next") {
                Some(_) => offset += 7,
                None => break,
            }
            assert!(pages < 100);
        }
        assert_eq!(pages, 5);
    }

    #[test]
    fn test_empty_collection() {
        let body = page(0, 10, 0);
        assert_eq!(body["total_count"], 0);
        assert!(body.get("next").is_none());
        assert_eq!(body["last"]["href"], "/api/v2/secrets?search=db&limit=10&offset=0");
    }

    #[test]
    fn test_limit_bounds() {
        let params = PageParams {
            offset: None,
            limit: Some(0),
        };
        assert!(params.window().is_err());
        let params = PageParams {
            offset: Some(5),
            limit: Some(1001),
        };
        assert!(params.window().is_err());
        assert_eq!(PageParams::default().window().unwrap().limit, DEFAULT_LIMIT);
    }
}
