//! Blob path validation.
//!
//! Every blob path is produced by the cache (`{generation}/entries/{hash}.json`
//! and the like) and is relative to the storage root. Rather than resolving
//! odd spellings, anything that isn't a plain run of named components is
//! rejected, so no backend ever has to think about escaping its root.

use crate::error::{Error, ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Validates a blob path and returns its canonical form.
///
/// `.` components and repeated or trailing separators are dropped. Absolute
/// paths, `..`, platform prefixes, null bytes and empty paths are
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use shelter_storage::validate_path;
///
/// assert!(validate_path("contador-cache-v2/entries/abc.body").is_ok());
/// assert!(validate_path("v1/../v2/generation.json").is_err());
/// assert_eq!(validate_path("./v1//generation.json").unwrap(), Path::new("v1/generation.json"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || Error::from(ErrorKind::InvalidPath(original.to_path_buf()));
    let mut canonical = PathBuf::new();
    for component in original.components() {
        match component {
            Component::CurDir => {},
            // `Path::components()` lets null bytes through on Unix.
            Component::Normal(part) if !part.as_encoded_bytes().contains(&0) => canonical.push(part),
            _ => return Err(invalid()),
        }
    }
    if canonical.as_os_str().is_empty() {
        return Err(invalid());
    }
    Ok(canonical)
}
