use indexmap::IndexMap;

/// Case-insensitive header collection preserving insertion order and
/// the spelling headers first arrived with.
#[derive(Default, Debug, Clone)]
pub struct HeaderMap {
    // folded name -> (original name, value)
    inner: IndexMap<String, (String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(|(_, v)| v.as_str())
    }

    /// Inserts, replacing any previous value under the same name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.inner.insert(name.to_ascii_lowercase(), (name.to_owned(), value.into()));
    }

    /// Inserts, merging a duplicate into `previous, new`.
    pub fn append(&mut self, name: &str, value: &str) {
        let folded = name.to_ascii_lowercase();
        match self.inner.get_mut(&folded) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                self.inner.insert(folded, (name.to_owned(), value.to_owned()));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.values().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("content-TYPE"));
    }

    #[test]
    fn duplicates_merge_with_comma_space() {
        let mut headers = HeaderMap::new();
        headers.append("Accept", "text/html");
        headers.append("accept", "application/json");
        assert_eq!(headers.get("Accept"), Some("text/html, application/json"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut headers = HeaderMap::new();
        headers.set("Host", "h");
        headers.set("Date", "d");
        headers.set("Server", "s");
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Host", "Date", "Server"]);
    }
}
