use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::SnapshotError;
use crate::loader::DataSource;
use crate::table::Table;

/// On-disk image of the merged table, so restarts can skip workbook parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub table: Table,
    pub primary: DataSource,
    /// Industry file whose column was merged in
    pub industry: Option<PathBuf>,
    /// Industry file that was resolved at load time, merged or not
    pub industry_source: Option<PathBuf>,
}

impl Snapshot {
    /// True when the snapshot was built from exactly these resolved input files
    pub fn built_from(&self, primary: &Path, industry: Option<&Path>) -> bool {
        matches!(&self.primary, DataSource::File(path) if path == primary)
            && self.industry_source.as_deref() == industry
    }
}

/// Write a snapshot as gzip-compressed bincode
pub fn save_snapshot(snapshot: &Snapshot, path: &Path) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, snapshot)?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())?
        .finish()?;
    Ok(())
}

/// Read a snapshot written by [`save_snapshot`]
///
/// # Arguments
/// * `path` - Snapshot file
///
/// # Returns
/// * `Result<Snapshot, SnapshotError>` - The snapshot, or an error when the file
///   is missing, not gzip, or not a snapshot of this layout
pub fn load_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let snapshot: Snapshot = deserialize_from(&mut reader)?;
    Ok(snapshot)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when the snapshot and every source file exist and no source is newer
/// than the snapshot
pub fn is_fresh<P: AsRef<Path>>(snapshot_path: &Path, sources: &[P]) -> bool {
    let Some(snapshot_time) = modified(snapshot_path) else {
        return false;
    };
    sources
        .iter()
        .all(|source| modified(source.as_ref()).is_some_and(|t| t <= snapshot_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::sample_table;

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("table.bin.gz");
        let snapshot = Snapshot {
            table: sample_table(),
            primary: DataSource::File(PathBuf::from("data.xlsx")),
            industry: None,
            industry_source: Some(PathBuf::from("industry.xlsx")),
        };

        save_snapshot(&snapshot, &path).unwrap();
        assert_eq!(load_snapshot(&path).unwrap(), snapshot);
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.bin.gz");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn freshness_against_sources() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data.csv");
        let snapshot = dir.path().join("table.bin.gz");

        assert!(!is_fresh(&snapshot, &[&source]));

        std::fs::write(&source, "股票代码\n1\n").unwrap();
        std::fs::write(&snapshot, b"").unwrap();
        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(past)
            .unwrap();
        assert!(is_fresh(&snapshot, &[&source]));
        assert!(!is_fresh(&snapshot, &[&source, &dir.path().join("absent.csv")]));

        File::options()
            .write(true)
            .open(&snapshot)
            .unwrap()
            .set_modified(past - std::time::Duration::from_secs(60))
            .unwrap();
        assert!(!is_fresh(&snapshot, &[&source]));
    }

    #[test]
    fn built_from_compares_resolved_inputs() {
        let snapshot = Snapshot {
            table: sample_table(),
            primary: DataSource::File(PathBuf::from("b.csv")),
            industry: None,
            industry_source: Some(PathBuf::from("industry.csv")),
        };
        assert!(snapshot.built_from(Path::new("b.csv"), Some(Path::new("industry.csv"))));
        assert!(!snapshot.built_from(Path::new("a.csv"), Some(Path::new("industry.csv"))));
        assert!(!snapshot.built_from(Path::new("b.csv"), None));

        let sample = Snapshot {
            primary: DataSource::Sample,
            ..snapshot
        };
        assert!(!sample.built_from(Path::new("b.csv"), Some(Path::new("industry.csv"))));
    }
}
