use std::path::PathBuf;

/// A blob found by [`list_stream`](crate::StorageBackend::list_stream).
///
/// The cache derives generation names and entry hashes from the relative
/// [`path`](Self::path); it never needs more than the size besides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Canonical path relative to the storage root.
    pub path: PathBuf,
    pub size: u64,
}

impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self { path: path.into(), size }
    }

    /// First component of the path (the generation name), if it is UTF-8.
    pub fn root_component(&self) -> Option<&str> {
        self.path.iter().next().and_then(|part| part.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_component() {
        assert_eq!(FileInfo::new("app-v1/entries/abc.json", 3).root_component(), Some("app-v1"));
        assert_eq!(FileInfo::new("flat.json", 3).root_component(), Some("flat.json"));
        assert_eq!(FileInfo::new("", 0).root_component(), None);
    }
}
