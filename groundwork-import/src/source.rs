//! CSV file discovery
//!
//! A service's data lives in `<service>.csv` directly inside the import
//! directory. Extensions match case-insensitively and the service name is
//! the lower-cased file stem, so `Customer.CSV` feeds the `customer` service.

use groundwork_common::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Service name -> CSV file found in the import directory
#[derive(Debug, Clone, Default)]
pub struct ServiceFiles {
    directory: PathBuf,
    files: BTreeMap<String, PathBuf>,
}

impl ServiceFiles {
    /// Scan `directory` (not recursively) for CSV files
    pub fn discover(directory: &Path) -> Result<Self> {
        if !directory.is_dir() {
            return Err(Error::Config(format!(
                "Import directory not found: {}",
                directory.display()
            )));
        }

        let mut files = BTreeMap::new();
        for entry in WalkDir::new(directory).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(service) = service_name(path) else {
                continue;
            };
            if let Some(previous) = files.insert(service.clone(), path.to_path_buf()) {
                warn!(
                    "Service '{}' has several files, using {} over {}",
                    service,
                    path.display(),
                    previous.display()
                );
            }
        }

        debug!("Found {} CSV files in {}", files.len(), directory.display());
        Ok(Self {
            directory: directory.to_path_buf(),
            files,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn get(&self, service: &str) -> Option<&Path> {
        self.files.get(service).map(PathBuf::as_path)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.files.contains_key(service)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Lower-cased stem of a `.csv` file
fn service_name(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?;
    if !extension.eq_ignore_ascii_case("csv") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_ascii_lowercase())
}
