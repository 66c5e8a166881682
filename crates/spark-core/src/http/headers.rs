use std::collections::BTreeMap;

/// Case-insensitive header map.
///
/// An entry is either a value or an explicit suppression. Suppressed entries
/// are never sent but tell interceptors the caller opted out of that header,
/// e.g. `authorization` on a request that must go out unauthenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Option<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: AsRef<str>, V: Into<String>>(&mut self, name: N, value: V) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), Some(value.into()));
    }

    pub fn with<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn suppress<N: AsRef<str>>(&mut self, name: N) {
        self.entries.insert(name.as_ref().to_ascii_lowercase(), None);
    }

    /// Value of a present (non-suppressed) header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|value| value.as_deref())
    }

    /// True when the header is present with a value.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when the caller set the header, with a value or as suppressed.
    pub fn is_explicit(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn is_suppressed(&self, name: &str) -> bool {
        matches!(self.entries.get(&name.to_ascii_lowercase()), Some(None))
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_ascii_lowercase()).flatten()
    }

    /// Headers that will actually be sent.
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(name, value)| value.as_deref().map(|value| (name.as_str(), value)))
    }

    pub fn present_len(&self) -> usize {
        self.present().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Repeated fields are folded into one comma-separated value.
impl From<&reqwest::header::HeaderMap> for Headers {
    fn from(map: &reqwest::header::HeaderMap) -> Self {
        let mut headers = Headers::new();
        for name in map.keys() {
            let values: Vec<&str> = map
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            if !values.is_empty() {
                headers.insert(name.as_str(), values.join(", "));
            }
        }
        headers
    }
}
