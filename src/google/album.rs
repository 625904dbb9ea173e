use serde_json::Value;

/// One remote album record from `albums` or `sharedAlbums`.
#[derive(Debug, Clone)]
pub struct GoogleAlbum {
    json: Value,
    pub is_shared: bool,
}

impl GoogleAlbum {
    pub fn new(json: Value, is_shared: bool) -> Self {
        Self { json, is_shared }
    }

    pub fn id(&self) -> &str {
        self.json["id"].as_str().unwrap_or_default()
    }

    /// Album title; untitled albums (common for shared ones) read as `none`.
    pub fn title(&self) -> &str {
        match self.json["title"].as_str() {
            Some(t) if !t.is_empty() => t,
            _ => "none",
        }
    }

    /// Declared item count. The API sends it as a decimal string.
    pub fn size(&self) -> u64 {
        match &self.json["mediaItemsCount"] {
            Value::String(s) => s.parse().unwrap_or(0),
            Value::Number(n) => n.as_u64().unwrap_or(0),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_album_fields() {
        let a = GoogleAlbum::new(
            json!({ "id": "al1", "title": "Summer", "mediaItemsCount": "12" }),
            false,
        );
        assert_eq!(a.id(), "al1");
        assert_eq!(a.title(), "Summer");
        assert_eq!(a.size(), 12);
        assert!(!a.is_shared);
    }

    #[test]
    fn test_album_defaults() {
        let a = GoogleAlbum::new(json!({ "id": "al2" }), true);
        assert_eq!(a.title(), "none");
        assert_eq!(a.size(), 0);
        assert!(a.is_shared);
    }
}
