//! Where SQL text comes from: inline strings or named resources.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Reads SQL text for a resource name.
pub trait ResourceLoader: Send + Sync + fmt::Debug {
    fn load(&self, name: &Path) -> Result<String>;
}

/// Loads resources from files below a root directory.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for FsLoader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ResourceLoader for FsLoader {
    fn load(&self, name: &Path) -> Result<String> {
        let path = self.root.join(name);
        tracing::debug!(path = %path.display(), "loading SQL resource");
        std::fs::read_to_string(&path).map_err(|source| Error::Io { path, source })
    }
}

/// SQL text given directly, or the name of a resource holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateSource {
    Inline(String),
    Resource(PathBuf),
}

impl TemplateSource {
    pub fn resource(name: impl Into<PathBuf>) -> Self {
        TemplateSource::Resource(name.into())
    }

    /// Resolves the SQL text.
    ///
    /// # Errors
    ///
    /// Blank text is an [`Error::Config`]; an unreadable resource is an
    /// [`Error::Io`].
    pub fn read(&self, loader: &dyn ResourceLoader) -> Result<Cow<'_, str>> {
        let text = match self {
            TemplateSource::Inline(sql) => Cow::Borrowed(sql.as_str()),
            TemplateSource::Resource(name) => Cow::Owned(loader.load(name)?),
        };
        if text.trim().is_empty() {
            return Err(Error::Config(match self {
                TemplateSource::Inline(_) => "missing SQL text".to_owned(),
                TemplateSource::Resource(name) => {
                    format!("SQL resource '{}' is empty", name.display())
                }
            }));
        }
        Ok(text)
    }
}

impl From<&str> for TemplateSource {
    fn from(sql: &str) -> Self {
        TemplateSource::Inline(sql.to_owned())
    }
}

impl From<String> for TemplateSource {
    fn from(sql: String) -> Self {
        TemplateSource::Inline(sql)
    }
}

impl From<&String> for TemplateSource {
    fn from(sql: &String) -> Self {
        TemplateSource::Inline(sql.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_source() {
        let source = TemplateSource::from("SELECT 1");
        assert_eq!(source.read(&FsLoader::default()).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_blank_inline_source() {
        let err = TemplateSource::from("  \n").read(&FsLoader::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resource_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("people")).unwrap();
        std::fs::write(
            dir.path().join("people/by_id.sql"),
            "SELECT * FROM people WHERE id = #{int64}",
        )
        .unwrap();

        let loader = FsLoader::new(dir.path());
        let source = TemplateSource::resource("people/by_id.sql");
        let text = source.read(&loader).unwrap();
        assert_eq!(text, "SELECT * FROM people WHERE id = #{int64}");
    }

    #[test]
    fn test_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsLoader::new(dir.path());
        let err = TemplateSource::resource("nope.sql").read(&loader).unwrap_err();
        match err {
            Error::Io { path, .. } => assert!(path.ends_with("nope.sql")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_resource() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.sql"), "").unwrap();
        let err = TemplateSource::resource("empty.sql")
            .read(&FsLoader::new(dir.path()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
