use crate::error::{Error, ErrorKind, Result};
use derive_more::Display;
use std::str::FromStr;

/// Name of one cache generation, following the `{prefix}-{version}`
/// convention (e.g. `contador-cache-v2`).
///
/// The prefix may contain hyphens, the version may not: the last `-` always
/// splits the two, so deployments named `app` and `app-cache` never claim
/// each other's generations.
///
/// The name doubles as the root directory of the generation in the blob
/// store, so it must be a single path component.
///
/// ```
/// use shelter_cache::GenerationName;
///
/// let name = GenerationName::new("contador-cache", "v2").unwrap();
/// assert_eq!(name.as_str(), "contador-cache-v2");
/// assert!(name.has_prefix("contador-cache"));
/// assert!(!name.has_prefix("contador"));
/// assert!(GenerationName::new("contador", "cache-v2").is_err());
/// ```
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0}")]
pub struct GenerationName(String);

impl GenerationName {
    pub fn new(prefix: impl AsRef<str>, version: impl AsRef<str>) -> Result<Self> {
        let (prefix, version) = (prefix.as_ref(), version.as_ref());
        if prefix.is_empty() || version.is_empty() || version.contains('-') {
            exn::bail!(ErrorKind::InvalidName(format!("{prefix}-{version}")));
        }
        format!("{prefix}-{version}").parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this generation belongs to the deployment using `prefix`.
    ///
    /// Everything after `{prefix}-` must be a single version tag, so `app`
    /// claims `app-v1` but neither `application-v1` nor `app-cache-v1`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|version| !version.is_empty() && !version.contains('-'))
    }

    /// The version tag following `{prefix}-`, if this name carries `prefix`.
    pub fn version_for(&self, prefix: &str) -> Option<&str> {
        self.has_prefix(prefix).then(|| &self.0[prefix.len() + 1..])
    }
}

impl FromStr for GenerationName {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = s.is_empty()
            || s == "."
            || s == ".."
            || s.chars().any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
        if invalid {
            exn::bail!(ErrorKind::InvalidName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for GenerationName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
