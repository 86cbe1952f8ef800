//! Toy store: a directory of CSV tables per toy name.
//!
//! ```text
//! <root>/toys/<name>/fit_results.csv
//! <root>/toys/<name>/input_values.csv
//! <root>/toys/<name>/covariance/<jobid>/<fitnum>/{nominal,rand}.csv
//! ```
//!
//! Tables are only ever appended to. Appending rows whose header differs from
//! the existing file is an error.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::syst_toys::ToyRunOutput;
use super::table::{Cell, ToyTable};
use crate::error::{StoreError, ToyError};
use crate::paths::DataPaths;

pub const FIT_RESULTS_TABLE: &str = "fit_results";
pub const INPUT_VALUES_TABLE: &str = "input_values";

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToyStore {
    dir: PathBuf,
}

impl ToyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store of toy `name` under the data directory.
    ///
    /// With `link_from`, the data lives under `<link_from>/toys/<name>` and the
    /// default location is a symbolic link to it.
    pub fn open(
        paths: &DataPaths,
        name: &str,
        link_from: Option<&Path>,
    ) -> Result<Self, StoreError> {
        let default = paths.toy_store(name);
        let Some(link_from) = link_from else {
            return Ok(Self::new(default));
        };
        let target = DataPaths::linked_toy_store(link_from, name);
        fs::create_dir_all(&target).map_err(io_error(&target))?;
        link_dir(&target, &default)?;
        Ok(Self::new(target))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// `fit_results` -> `<dir>/fit_results.csv`
    pub fn table_path(&self, key: &str) -> PathBuf {
        let mut path = self.dir.clone();
        path.extend(key.split('/'));
        path.set_extension("csv");
        path
    }

    /// Append rows to a table, creating it with a header when absent
    pub fn append_table(&self, key: &str, table: &ToyTable) -> Result<(), StoreError> {
        if table.columns().is_empty() {
            return Ok(());
        }
        let path = self.table_path(key);
        let exists = path.exists();
        if exists {
            let mut reader = csv::Reader::from_path(&path)?;
            let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
            if header != table.columns() {
                return Err(StoreError::IncompatibleColumns {
                    table: key.to_string(),
                    expected: header,
                    found: table.columns().to_vec(),
                });
            }
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;
        table.write_csv(file, !exists)?;
        debug!(table = key, rows = table.len(), path = %path.display(), "Appended rows");
        Ok(())
    }

    pub fn read_table(&self, key: &str) -> Result<ToyTable, ToyError> {
        let path = self.table_path(key);
        if !path.exists() {
            return Err(ToyError::MissingFile(path));
        }
        let mut reader = csv::Reader::from_path(&path).map_err(StoreError::from)?;
        let header = reader
            .headers()
            .map_err(StoreError::from)?
            .iter()
            .map(str::to_string)
            .collect();
        let mut table = ToyTable::new(header);
        for record in reader.records() {
            let record = record.map_err(StoreError::from)?;
            table.push_row(record.iter().map(Cell::parse).collect())?;
        }
        Ok(table)
    }

    /// Write all the tables of a run
    pub fn write_run(&self, output: &ToyRunOutput) -> Result<(), StoreError> {
        self.append_table(FIT_RESULTS_TABLE, &output.fit_results)?;
        for (key, table) in &output.covariance {
            if self.table_path(key).exists() {
                warn!(table = %key, "Covariance table already exists, appending to it");
            }
            self.append_table(key, table)?;
        }
        self.append_table(INPUT_VALUES_TABLE, &output.input_values)?;
        info!(path = %self.dir.display(), "Written output");
        Ok(())
    }
}

#[cfg(unix)]
fn link_dir(target: &Path, link: &Path) -> Result<(), StoreError> {
    if let Ok(existing) = fs::read_link(link) {
        if existing == target {
            return Ok(());
        }
        fs::remove_file(link).map_err(io_error(link))?;
    } else if link.exists() {
        return Err(StoreError::Io {
            path: link.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "cannot link over an existing toy store",
            ),
        });
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    std::os::unix::fs::symlink(target, link).map_err(io_error(link))
}

#[cfg(not(unix))]
fn link_dir(target: &Path, link: &Path) -> Result<(), StoreError> {
    warn!(
        target = %target.display(),
        link = %link.display(),
        "Symbolic links are not supported here, data is only stored at the target"
    );
    Ok(())
}

/// Merge the `fit_results` tables of several toy stores.
///
/// Tables with different columns are an error unless `fail_on_incompatible` is
/// false, in which case they are stacked over the union of their columns.
pub fn load_toy_fits<S: AsRef<str>>(
    paths: &DataPaths,
    names: &[S],
    fail_on_incompatible: bool,
) -> Result<ToyTable, ToyError> {
    let stores: Vec<ToyStore> = names
        .iter()
        .map(|name| ToyStore::new(paths.toy_store(name.as_ref())))
        .collect();
    if let Some(missing) = stores.iter().find(|s| !s.exists()) {
        return Err(ToyError::MissingFile(missing.dir().to_path_buf()));
    }
    let tables = stores
        .iter()
        .map(|s| s.read_table(FIT_RESULTS_TABLE))
        .collect::<Result<Vec<_>, _>>()?;

    let Some(first) = tables.first() else {
        return Ok(ToyTable::default());
    };
    if let Some(other) = tables.iter().find(|t| t.columns() != first.columns()) {
        if fail_on_incompatible {
            return Err(StoreError::IncompatibleColumns {
                table: FIT_RESULTS_TABLE.to_string(),
                expected: first.columns().to_vec(),
                found: other.columns().to_vec(),
            }
            .into());
        }
        warn!("Found incompatible toy tables");
    }
    Ok(ToyTable::concat(tables))
}
