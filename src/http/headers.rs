//! Request and response header storage.
//!
//! Header field names compare case-insensitively while field order is
//! significant on the wire (RFC 9110 §5): repeated fields such as
//! `Set-Cookie` must serialize in the order they were added, and proxies
//! may rely on relative ordering. [`Headers`] therefore keeps a flat,
//! append-ordered list of `(name, value)` pairs rather than a map keyed by
//! normalized name. With the handful of fields a typical request or
//! response carries, linear scans beat hashing anyway.
//!
//! Two write paths exist because middleware needs both: [`Headers::insert`]
//! appends (multi-value fields), while [`Headers::set`] claims sole
//! ownership of a field, dropping anything previously recorded under that
//! name. Middleware that owns a field outright (`Content-Encoding`,
//! `Connection`) uses `set`; everything else appends.

use std::fmt;

fn name_matches(candidate: &str, wanted: &str) -> bool {
    candidate.eq_ignore_ascii_case(wanted)
}

/// An append-ordered multimap of HTTP header fields with case-insensitive
/// name lookup.
///
/// # Examples
///
/// ```
/// use trellis::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Set-Cookie", "session=1");
/// headers.insert("Set-Cookie", "theme=dark");
///
/// assert_eq!(headers.get("SET-COOKIE"), Some("session=1"));
/// assert_eq!(headers.get_all("set-cookie").count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty header map with room for `capacity` fields before
    /// reallocating. Request parsing sizes this from the parsed header count.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Records a field after any existing ones. Repeated names accumulate.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Makes `value` the only entry for `name`, discarding earlier ones.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| !name_matches(n, &name));
        self.entries.push((name, value.into()));
    }

    /// The first recorded value for `name`, if the field is present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find_map(|(n, v)| name_matches(n, name).then_some(v.as_str()))
    }

    /// Every recorded value for `name`, oldest first.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter_map(move |(n, v)| name_matches(n, name).then_some(v.as_str()))
    }

    /// Whether any entry is recorded under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| name_matches(n, name))
    }

    /// Drops every entry recorded under `name`. Reports whether anything
    /// was actually removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !name_matches(n, name));
        self.entries.len() != before
    }

    /// Total entry count, counting repeated names once per value.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All `(name, value)` pairs in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Writes every field in `Name: value\r\n` wire form.
    pub(crate) fn write_wire(&self, out: &mut impl fmt::Write) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(out, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_wire(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_name_case() {
        let mut headers = Headers::new();
        headers.insert("X-Trace-Id", "t-1");
        for spelling in ["x-trace-id", "X-TRACE-ID", "X-Trace-Id"] {
            assert_eq!(headers.get(spelling), Some("t-1"));
            assert!(headers.contains(spelling));
        }
        assert_eq!(headers.get("x-trace"), None);
    }

    #[test]
    fn repeated_fields_keep_insertion_order() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "session=1");
        headers.insert("Via", "proxy-a");
        headers.insert("Set-Cookie", "theme=dark");
        let cookies: Vec<_> = headers.get_all("set-cookie").collect();
        assert_eq!(cookies, ["session=1", "theme=dark"]);
        // get returns the oldest value, not the newest.
        assert_eq!(headers.get("set-cookie"), Some("session=1"));
    }

    #[test]
    fn set_claims_sole_ownership_of_a_field() {
        let mut headers = Headers::new();
        headers.insert("Vary", "Origin");
        headers.insert("vary", "Accept");
        headers.set("VARY", "Accept-Encoding");
        assert_eq!(headers.get_all("vary").count(), 1);
        assert_eq!(headers.get("vary"), Some("Accept-Encoding"));
    }

    #[test]
    fn remove_drops_every_occurrence() {
        let mut headers = Headers::new();
        headers.insert("Warning", "199 first");
        headers.insert("warning", "199 second");
        headers.insert("Host", "example.com");
        assert!(headers.remove("WARNING"));
        assert!(!headers.remove("warning"));
        assert_eq!(headers.len(), 1);
        assert!(headers.contains("host"));
    }

    #[test]
    fn clear_keeps_nothing() {
        let mut headers = Headers::with_capacity(4);
        headers.insert("A", "1");
        headers.insert("B", "2");
        headers.clear();
        assert!(headers.is_empty());
        assert_eq!(headers.iter().count(), 0);
    }

    #[test]
    fn display_is_wire_format() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("Content-Length", "2");
        assert_eq!(
            headers.to_string(),
            "Content-Type: text/plain\r\nContent-Length: 2\r\n"
        );
    }
}
