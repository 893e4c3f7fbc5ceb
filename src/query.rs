use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query is empty")]
    InvalidQuery,
}

/// Canonical listing slug derived from a free-text query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTarget(String);

impl FetchTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-encoded form for use as a URL path segment. Hyphens are unreserved
    /// and survive unchanged.
    pub fn path_segment(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cases the query and joins its whitespace-separated words with `-`.
pub fn normalize(query: &str) -> Result<FetchTarget, QueryError> {
    let slug = query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        return Err(QueryError::InvalidQuery);
    }
    Ok(FetchTarget(slug))
}
