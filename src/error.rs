use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a located file (or an uploaded buffer) into a table.
///
/// Absence of a file is not an error: the loader falls back to sample data
/// and the enricher skips the merge. This type covers files that exist but
/// cannot be read or parsed.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workbook {path}: {message}")]
    Workbook { path: PathBuf, message: String },

    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} contains no worksheets")]
    NoWorksheet { path: PathBuf },

    #[error("{path} has no header row")]
    Empty { path: PathBuf },

    #[error("unsupported file format for {path}")]
    UnsupportedFormat { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX export failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table has {0} columns, more than a worksheet can address")]
    TooManyColumns(usize),

    #[error("table has {0} rows, more than a worksheet can address")]
    TooManyRows(usize),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

#[cfg(feature = "web")]
#[derive(Error, Debug)]
pub enum ChartError {
    #[error("nothing to plot")]
    NoData,

    #[error("chart rendering failed: {0}")]
    Render(String),

    #[error("chart I/O error: {0}")]
    Io(#[from] std::io::Error),
}
