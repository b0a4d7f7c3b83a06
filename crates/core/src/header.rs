use crate::schema::Schema;

/// Result of resolving a normalized header against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMatch {
    Canonical(&'static str),
    Raw(String),
}

impl HeaderMatch {
    pub fn key(&self) -> &str {
        match self {
            HeaderMatch::Canonical(name) => name,
            HeaderMatch::Raw(key) => key.as_str(),
        }
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, HeaderMatch::Canonical(_))
    }
}

/// Collapses a header to lowercase ASCII alphanumerics:
/// `"Avg. Monthly Bill"` becomes `"avgmonthlybill"`.
pub fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Resolves a normalized header against the household schema.
pub fn map_header(normalized: &str) -> HeaderMatch {
    Schema::household().map_header(normalized)
}
