//! Catalog loading from TOML files.
//!
//! A catalog source is either a single TOML file or a directory tree of
//! them. Directory entries are visited in sorted path order so that plan
//! declaration order is stable across platforms.

use crate::{
    catalog::Catalog,
    definition::{CatalogDocument, ServiceOffering},
    error::{CatalogError, Result},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loader for catalog definitions from TOML files.
pub struct CatalogLoader {
    /// File or directory holding catalog TOML
    source: PathBuf,
}

impl CatalogLoader {
    /// Create a new loader for the given file or directory.
    ///
    /// # Errors
    /// Returns error if the path doesn't exist.
    pub fn new(source: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();

        if !source.exists() {
            return Err(CatalogError::SourceNotFound {
                path: source.display().to_string(),
            });
        }

        Ok(Self { source })
    }

    /// Path this loader reads from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Load every offering and build the catalog.
    ///
    /// Unlike a best-effort scan, any unreadable, unparsable or invalid file
    /// fails the whole load.
    pub fn load(&self) -> Result<Catalog> {
        let services = self.load_services()?;

        info!(
            count = services.len(),
            source = %self.source.display(),
            "loaded service offerings"
        );

        Catalog::new(services)
    }

    /// Load offerings in declaration order without building indexes.
    pub fn load_services(&self) -> Result<Vec<ServiceOffering>> {
        let mut services = Vec::new();

        if self.source.is_dir() {
            let mut files = Vec::new();
            Self::collect_toml_files(&self.source, &mut files)?;
            files.sort();

            for path in files {
                services.extend(Self::load_from_path(&path)?.services);
            }
        } else {
            services.extend(Self::load_from_path(&self.source)?.services);
        }

        Ok(services)
    }

    /// Recursively collect TOML files below `dir`.
    fn collect_toml_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::collect_toml_files(&path, files)?;
            } else if path.extension().and_then(|s| s.to_str()) == Some("toml") {
                files.push(path);
            }
        }

        Ok(())
    }

    /// Parse one catalog file and validate its offerings.
    fn load_from_path(path: &Path) -> Result<CatalogDocument> {
        let contents = std::fs::read_to_string(path).map_err(|e| CatalogError::LoadError {
            path: path.display().to_string(),
            source: e,
        })?;

        let document: CatalogDocument =
            toml::from_str(&contents).map_err(|e| CatalogError::ParseError {
                path: path.display().to_string(),
                source: e,
            })?;

        for service in &document.services {
            service.validate()?;
        }

        debug!(
            path = %path.display(),
            services = document.services.len(),
            "parsed catalog file"
        );

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_offering(dir: &Path, file: &str, service_id: &str, plan_ids: &[&str]) -> PathBuf {
        let mut content = format!(
            r#"
[[services]]
id = "{service_id}"
name = "{service_id}-name"
description = "Test service {service_id}"
"#
        );

        for plan_id in plan_ids {
            content.push_str(&format!(
                r#"
[[services.plans]]
id = "{plan_id}"
name = "{plan_id}"
description = "{plan_id} plan"
"#
            ));
        }

        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().expect("parent dir")).expect("create dir");
        std::fs::write(&path, content).expect("write catalog file");
        path
    }

    #[test]
    fn test_loader_new_with_missing_path() {
        let loader = CatalogLoader::new("/nonexistent/path/to/catalog.toml");
        assert!(matches!(loader, Err(CatalogError::SourceNotFound { .. })));
    }

    #[test]
    fn test_load_single_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = write_offering(temp_dir.path(), "catalog.toml", "svc-1", &["gold", "silver"]);

        let catalog = CatalogLoader::new(path)
            .expect("create loader")
            .load()
            .expect("load catalog");

        assert_eq!(catalog.services().len(), 1);
        assert_eq!(catalog.plan_count(), 2);
    }

    #[test]
    fn test_load_directory_sorted() {
        let temp_dir = TempDir::new().expect("create temp dir");
        write_offering(temp_dir.path(), "b/second.toml", "svc-b", &["silver"]);
        write_offering(temp_dir.path(), "a/first.toml", "svc-a", &["gold"]);
        std::fs::write(temp_dir.path().join("README.md"), "ignored").expect("write readme");

        let loader = CatalogLoader::new(temp_dir.path()).expect("create loader");
        let services = loader.load_services().expect("load services");

        let ids: Vec<&str> = services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["svc-a", "svc-b"]);
    }

    #[test]
    fn test_load_fails_on_invalid_toml() {
        let temp_dir = TempDir::new().expect("create temp dir");
        write_offering(temp_dir.path(), "valid.toml", "svc-1", &["gold"]);
        std::fs::write(temp_dir.path().join("invalid.toml"), "invalid toml content [[[")
            .expect("write invalid file");

        let loader = CatalogLoader::new(temp_dir.path()).expect("create loader");
        assert!(matches!(
            loader.load(),
            Err(CatalogError::ParseError { .. })
        ));
    }

    #[test]
    fn test_load_fails_on_invalid_offering() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = write_offering(temp_dir.path(), "empty.toml", "svc-1", &[]);

        let loader = CatalogLoader::new(path).expect("create loader");
        assert!(matches!(
            loader.load(),
            Err(CatalogError::ValidationError { .. })
        ));
    }
}
