//! One-time construction of the immutable table every query runs against.

use crate::config::Settings;
use crate::enricher::enrich;
use crate::error::LoadError;
use crate::loader::{DataSource, load_primary, resolve_first_existing};
use crate::query::QueryEngine;
use crate::saving::{Snapshot, is_fresh, load_snapshot, save_snapshot};
use crate::schema::IndicatorSchema;
use crate::table::Table;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the loaded data came from and what went wrong along the way
#[derive(Debug, Clone)]
pub struct Provenance {
    pub primary: DataSource,
    pub industry: Option<PathBuf>,
    pub from_snapshot: bool,
    pub warnings: Vec<String>,
}

/// The merged table, frozen after loading and shared by reference
#[derive(Debug, Clone)]
pub struct Dataset {
    table: Arc<Table>,
    provenance: Provenance,
}

impl Dataset {
    /// Load, enrich and freeze the table described by `settings`
    ///
    /// Only an unreadable primary file is an error. A configured snapshot is
    /// reused when it was built from the files the candidate lists resolve to
    /// now and is newer than each of them. It is rewritten after a fresh load
    /// from files.
    pub fn bootstrap(settings: &Settings) -> Result<Self, LoadError> {
        if let Some(dataset) = settings
            .snapshot_path
            .as_deref()
            .and_then(|path| Self::from_fresh_snapshot(path, settings))
        {
            return Ok(dataset);
        }

        let primary = load_primary(&settings.data.primary)?;
        let enrichment = enrich(primary.table, &settings.data.industry);
        let industry_source = enrichment.source.clone();

        let provenance = Provenance {
            primary: primary.source,
            industry: enrichment.merged_column.and(enrichment.source),
            from_snapshot: false,
            warnings: enrichment.warning.iter().map(ToString::to_string).collect(),
        };

        let from_file = matches!(provenance.primary, DataSource::File(_));
        if let Some(path) = settings.snapshot_path.as_ref().filter(|_| from_file) {
            let snapshot = Snapshot {
                table: enrichment.table,
                primary: provenance.primary.clone(),
                industry: provenance.industry.clone(),
                industry_source,
            };
            match save_snapshot(&snapshot, path) {
                Ok(()) => log::info!("wrote snapshot {}", path.display()),
                Err(e) => log::warn!("failed to write snapshot {}: {}", path.display(), e),
            }
            return Ok(Self::new(snapshot.table, provenance));
        }

        Ok(Self::new(enrichment.table, provenance))
    }

    fn from_fresh_snapshot(path: &Path, settings: &Settings) -> Option<Self> {
        // no primary file means sample data, which is never snapshotted
        let primary = resolve_first_existing(&settings.data.primary)?;
        let industry = resolve_first_existing(&settings.data.industry);
        let sources: Vec<&Path> = std::iter::once(primary.as_path())
            .chain(industry.as_deref())
            .collect();
        if !is_fresh(path, &sources) {
            return None;
        }
        match load_snapshot(path) {
            Ok(snapshot) if !snapshot.built_from(&primary, industry.as_deref()) => {
                log::info!(
                    "snapshot {} was built from other input files, reloading",
                    path.display()
                );
                None
            }
            Ok(snapshot) => {
                log::info!(
                    "using snapshot {} ({} rows)",
                    path.display(),
                    snapshot.table.len()
                );
                Some(Self::new(
                    snapshot.table,
                    Provenance {
                        primary: snapshot.primary,
                        industry: snapshot.industry,
                        from_snapshot: true,
                        warnings: Vec::new(),
                    },
                ))
            }
            Err(e) => {
                log::warn!("ignoring unreadable snapshot {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Freeze an already loaded table
    pub fn new(table: Table, provenance: Provenance) -> Self {
        Self {
            table: Arc::new(table),
            provenance,
        }
    }

    pub fn table(&self) -> Arc<Table> {
        Arc::clone(&self.table)
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// A query engine sharing this dataset's table
    pub fn engine(&self, schema: Arc<IndicatorSchema>) -> QueryEngine {
        QueryEngine::new(self.table(), schema)
    }
}
