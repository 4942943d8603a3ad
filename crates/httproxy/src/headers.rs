//! An ordered, case-insensitive multimap of header name/value pairs.
//!
//! Modeled as a plain `Vec` rather than a `HashMap`: order and duplicates are
//! semantically meaningful for HTTP (spec §3, §9 "Header model").

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&[u8]> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.as_slice())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
    }

    /// Comma-separated tokens for a list-valued header, trimmed, in order.
    /// Empty if the header is absent.
    pub fn get_all_tokens(&self, name: &str) -> Vec<String> {
        let Some(v) = self.get_str(name) else {
            return Vec::new();
        };
        v.split(',').map(|t| t.trim().to_string()).collect()
    }

    pub fn push(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace all existing values for `name` with a single new value,
    /// appending if absent.
    pub fn set(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.remove(name);
        self.push(name.as_bytes().to_vec(), value);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name.as_bytes()));
    }

    /// Append `suffix` to the last stored value for the continuation-line
    /// case in `http1` header parsing.
    pub(crate) fn append_continuation(&mut self, suffix: &[u8]) -> crate::error::Result<()> {
        let Some(last) = self.entries.last_mut() else {
            return Err(crate::error::ProxyError::HttpSyntax("Invalid headers".into()));
        };
        last.1.extend_from_slice(b"\r\n ");
        last.1.extend_from_slice(suffix);
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries.clone()
    }
}

/// Builds a `Headers` from `(&str, &str)` pairs, handy in tests and for
/// synthesized responses.
impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut h = Headers::new();
        for (k, v) in pairs {
            h.push(k.as_bytes().to_vec(), v.as_bytes().to_vec());
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let mut h = Headers::new();
        h.push(b"Content-Type".to_vec(), b"text/html".to_vec());
        assert_eq!(h.get("content-type"), Some(b"text/html".as_slice()));
    }

    #[test]
    fn duplicate_values_preserved_in_order() {
        let mut h = Headers::new();
        h.push(b"Content-Length".to_vec(), b"10".to_vec());
        h.push(b"Content-Length".to_vec(), b"11".to_vec());
        assert_eq!(h.get_all("content-length"), vec![b"10".as_slice(), b"11".as_slice()]);
    }

    #[test]
    fn connection_tokens_are_trimmed() {
        let mut h = Headers::new();
        h.push(b"Connection".to_vec(), b"keep-alive, Upgrade".to_vec());
        assert_eq!(h.get_all_tokens("connection"), vec!["keep-alive", "Upgrade"]);
    }
}
