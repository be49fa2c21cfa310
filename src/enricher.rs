//! Industry enrichment: left-merge industry classification into the primary table.

use crate::loader::{load_table, normalize_stock_codes, normalize_years, resolve_first_existing};
use crate::schema::{FISCAL_YEAR, FULL_STOCK_CODE, INDUSTRY_CODE, INDUSTRY_NAME, STOCK_CODE, YEAR};
use crate::table::{RowRef, Table};
use crate::value::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why enrichment was skipped. Never fatal; the primary table is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichWarning {
    NotFound,
    Unreadable { path: PathBuf, message: String },
    MissingKeys { path: Option<PathBuf>, missing: Vec<&'static str> },
}

impl fmt::Display for EnrichWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrichWarning::NotFound => write!(f, "no industry data file found"),
            EnrichWarning::Unreadable { path, message } => {
                write!(f, "failed to read industry data {}: {}", path.display(), message)
            }
            EnrichWarning::MissingKeys { path, missing } => {
                let source = path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "industry data".to_string());
                write!(f, "{} lacks merge columns: {}", source, missing.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Enrichment {
    pub table: Table,
    pub source: Option<PathBuf>,
    /// Industry column that was merged in, if any
    pub merged_column: Option<&'static str>,
    /// Secondary rows discarded because their key was already seen
    pub duplicates_dropped: usize,
    pub warning: Option<EnrichWarning>,
}

impl Enrichment {
    fn unchanged(table: Table, source: Option<PathBuf>, warning: EnrichWarning) -> Self {
        log::warn!("{}; continuing with primary data only", warning);
        Self {
            table,
            source,
            merged_column: None,
            duplicates_dropped: 0,
            warning: Some(warning),
        }
    }
}

/// Look up the industry file among `candidates` and merge it into `primary`
pub fn enrich<P: AsRef<Path>>(primary: Table, candidates: &[P]) -> Enrichment {
    let Some(path) = resolve_first_existing(candidates) else {
        return Enrichment::unchanged(primary, None, EnrichWarning::NotFound);
    };

    match load_table(&path) {
        Ok(secondary) => {
            log::info!("loaded industry data file {} ({} rows)", path.display(), secondary.len());
            let mut enrichment = merge_industry(primary, secondary);
            if let Some(EnrichWarning::MissingKeys { path: source, .. }) = &mut enrichment.warning {
                *source = Some(path.clone());
            }
            enrichment.source = Some(path);
            enrichment
        }
        Err(e) => {
            let warning = EnrichWarning::Unreadable {
                path: path.clone(),
                message: e.to_string(),
            };
            Enrichment::unchanged(primary, Some(path), warning)
        }
    }
}

/// Bring the industry table's key columns to the canonical names and formats
pub fn normalize_secondary_keys(secondary: &mut Table) {
    if secondary.has_column(FULL_STOCK_CODE) {
        secondary.rename_column(FULL_STOCK_CODE, STOCK_CODE);
    }
    normalize_stock_codes(secondary, STOCK_CODE);

    if secondary.has_column(FISCAL_YEAR) {
        secondary.rename_column(FISCAL_YEAR, YEAR);
    }
    normalize_years(secondary, YEAR);
}

fn merge_key(row: RowRef<'_>) -> Option<(String, i64)> {
    let code = row.get(STOCK_CODE)?.as_text()?;
    let year = row.get(YEAR)?.as_i64()?;
    Some((code, year))
}

/// Left-join the industry column of `secondary` onto `primary` by (stock code, year)
///
/// The secondary table is deduplicated on the key first, keeping the first
/// occurrence, so every primary row appears exactly once in the result.
pub fn merge_industry(primary: Table, mut secondary: Table) -> Enrichment {
    normalize_secondary_keys(&mut secondary);

    let missing: Vec<&'static str> = [STOCK_CODE, YEAR]
        .into_iter()
        .filter(|key| !secondary.has_column(key))
        .collect();
    if !missing.is_empty() {
        return Enrichment::unchanged(primary, None, EnrichWarning::MissingKeys { path: None, missing });
    }

    let merged_column = [INDUSTRY_NAME, INDUSTRY_CODE]
        .into_iter()
        .find(|column| secondary.has_column(column));

    let Some(column) = merged_column else {
        log::info!("industry data has neither {} nor {}; nothing to merge", INDUSTRY_NAME, INDUSTRY_CODE);
        return Enrichment {
            table: primary,
            source: None,
            merged_column: None,
            duplicates_dropped: 0,
            warning: None,
        };
    };

    let mut lookup: HashMap<(String, i64), Value> = HashMap::with_capacity(secondary.len());
    let mut duplicates_dropped = 0;
    for row in secondary.iter() {
        let Some(key) = merge_key(row) else { continue };
        match lookup.entry(key) {
            Entry::Occupied(_) => duplicates_dropped += 1,
            Entry::Vacant(slot) => {
                slot.insert(row.get(column).cloned().unwrap_or_default());
            }
        }
    }
    if duplicates_dropped > 0 {
        log::warn!(
            "industry data has {} duplicate (stock code, year) rows; kept the first of each",
            duplicates_dropped
        );
    }

    let joined: Vec<Value> = primary
        .iter()
        .map(|row| {
            merge_key(row)
                .and_then(|key| lookup.get(&key).cloned())
                .unwrap_or_default()
        })
        .collect();
    let matched = joined.iter().filter(|v| !v.is_null()).count();

    let mut table = primary;
    if table.has_column(column) {
        log::warn!("primary data already has column {}; replacing it with merged values", column);
    }
    table.set_column(column, joined);
    log::info!("merged {} into {} of {} rows", column, matched, table.len());

    Enrichment {
        table,
        source: None,
        merged_column: Some(column),
        duplicates_dropped,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::sample_table;

    fn industry(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    fn industry_of(table: &Table, column: &str) -> Vec<Value> {
        table.column(column).unwrap().cloned().collect()
    }

    #[test]
    fn left_join_keeps_every_primary_row() {
        let secondary = industry(
            &[FULL_STOCK_CODE, FISCAL_YEAR, INDUSTRY_NAME],
            vec![
                vec![Value::Int(1), Value::Int(2020), Value::from("货币金融服务")],
                vec![Value::Int(1), Value::Int(2021), Value::from("货币金融服务")],
                vec![Value::Int(999), Value::Int(2021), Value::from("不相关")],
            ],
        );
        let enrichment = merge_industry(sample_table(), secondary);

        assert_eq!(enrichment.merged_column, Some(INDUSTRY_NAME));
        assert_eq!(enrichment.table.len(), 4);
        assert_eq!(
            industry_of(&enrichment.table, INDUSTRY_NAME),
            [
                Value::from("货币金融服务"),
                Value::from("货币金融服务"),
                Value::Null,
                Value::Null
            ]
        );
    }

    #[test]
    fn duplicate_keys_do_not_fan_out() {
        let secondary = industry(
            &[STOCK_CODE, YEAR, INDUSTRY_NAME],
            vec![
                vec![Value::from("000002"), Value::Int(2020), Value::from("房地产业")],
                vec![Value::from("2"), Value::Float(2020.0), Value::from("重复")],
                vec![Value::from("000002"), Value::Int(2021), Value::from("房地产业")],
            ],
        );
        let primary = sample_table();
        let rows_before = primary.len();
        let enrichment = merge_industry(primary, secondary);

        assert_eq!(enrichment.table.len(), rows_before);
        assert_eq!(enrichment.duplicates_dropped, 1);
        assert_eq!(
            enrichment.table.row(2).unwrap().get(INDUSTRY_NAME),
            Some(&Value::from("房地产业"))
        );
    }

    #[test]
    fn industry_code_is_used_when_name_is_absent() {
        let secondary = industry(
            &[STOCK_CODE, YEAR, INDUSTRY_CODE],
            vec![vec![Value::from("000001"), Value::Int(2021), Value::from("J66")]],
        );
        let enrichment = merge_industry(sample_table(), secondary);
        assert_eq!(enrichment.merged_column, Some(INDUSTRY_CODE));
        assert!(!enrichment.table.has_column(INDUSTRY_NAME));
        assert_eq!(
            enrichment.table.row(1).unwrap().get(INDUSTRY_CODE),
            Some(&Value::from("J66"))
        );
    }

    #[test]
    fn missing_keys_leave_primary_unchanged() {
        let secondary = industry(
            &[STOCK_CODE, INDUSTRY_NAME],
            vec![vec![Value::from("000001"), Value::from("银行")]],
        );
        let primary = sample_table();
        let enrichment = merge_industry(primary.clone(), secondary);
        assert_eq!(enrichment.table, primary);
        assert_eq!(
            enrichment.warning,
            Some(EnrichWarning::MissingKeys {
                path: None,
                missing: vec![YEAR]
            })
        );
    }

    #[test]
    fn absent_or_unreadable_file_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let primary = sample_table();

        let enrichment = enrich(primary.clone(), &[dir.path().join("industry.xlsx")]);
        assert_eq!(enrichment.warning, Some(EnrichWarning::NotFound));
        assert_eq!(enrichment.table, primary);

        let broken = dir.path().join("industry.xlsx");
        std::fs::write(&broken, b"not a workbook").unwrap();
        let enrichment = enrich(primary.clone(), &[broken]);
        assert!(matches!(enrichment.warning, Some(EnrichWarning::Unreadable { .. })));
        assert_eq!(enrichment.table.len(), primary.len());
    }

    #[test]
    fn enrich_reads_csv_classification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("industry.csv");
        std::fs::write(
            &path,
            "股票代码全称,年度,行业名称\n000002,2021,房地产业\n000001,2021,货币金融服务\n",
        )
        .unwrap();

        let enrichment = enrich(sample_table(), &[path.clone()]);
        assert_eq!(enrichment.source, Some(path));
        assert_eq!(
            industry_of(&enrichment.table, INDUSTRY_NAME),
            [
                Value::Null,
                Value::from("货币金融服务"),
                Value::Null,
                Value::from("房地产业")
            ]
        );
    }
}
