use crate::error::LoadError;
use crate::schema::{self, STOCK_CODE, YEAR};
use crate::table::Table;
use crate::value::Value;
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto, open_workbook_auto_from_rs};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

/// Width every stock code is padded to
pub const STOCK_CODE_WIDTH: usize = 6;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Where the primary table came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    File(PathBuf),
    /// Built-in demo data, used when no candidate file exists
    Sample,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub table: Table,
    pub source: DataSource,
}

/// Left-pad a stock code with zeros to six characters
///
/// Longer codes are returned unchanged, never truncated.
///
/// # Examples
/// ```
/// use dti_dashboard::loader::zero_pad;
///
/// assert_eq!(zero_pad("1"), "000001");
/// assert_eq!(zero_pad("000001"), "000001");
/// assert_eq!(zero_pad("6000001"), "6000001");
/// ```
pub fn zero_pad(code: &str) -> String {
    let code = code.trim();
    let len = code.chars().count();
    if len >= STOCK_CODE_WIDTH {
        code.to_string()
    } else {
        format!("{}{}", "0".repeat(STOCK_CODE_WIDTH - len), code)
    }
}

/// Coerce a stock-code column to zero-padded text; blanks stay null
pub fn normalize_stock_codes(table: &mut Table, column: &str) -> bool {
    table.map_column(column, |value| match value.as_text() {
        Some(code) => Value::Text(zero_pad(&code)),
        None => Value::Null,
    })
}

/// Coerce a year column to integers, returning how many cells had to be nulled
pub fn normalize_years(table: &mut Table, column: &str) -> usize {
    let mut invalid = 0;
    table.map_column(column, |value| match value.as_i64() {
        Some(year) => Value::Int(year),
        None => {
            if !value.is_null() {
                invalid += 1;
            }
            Value::Null
        }
    });
    if invalid > 0 {
        log::warn!("{} cells in column {} are not valid years", invalid, column);
    }
    invalid
}

/// Apply the load-time normalization to the canonical key columns
pub fn normalize(table: &mut Table) {
    normalize_stock_codes(table, STOCK_CODE);
    normalize_years(table, YEAR);
}

/// First candidate path that exists, in list order
pub fn resolve_first_existing<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(AsRef::as_ref)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

/// Load the primary indicator table
///
/// The first existing candidate is parsed; if it cannot be parsed the error
/// is returned. Only when no candidate exists at all does this fall back to
/// [`sample_table`].
pub fn load_primary<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadOutcome, LoadError> {
    let Some(path) = resolve_first_existing(candidates) else {
        log::warn!(
            "no primary data file found among {} candidates, using sample data",
            candidates.len()
        );
        return Ok(LoadOutcome {
            table: sample_table(),
            source: DataSource::Sample,
        });
    };

    let mut table = load_table(&path)?;
    normalize(&mut table);
    log::info!(
        "loaded primary data file {} ({} rows, {} columns)",
        path.display(),
        table.len(),
        table.columns().len()
    );
    Ok(LoadOutcome {
        table,
        source: DataSource::File(path),
    })
}

/// Parse an uploaded file held in memory
///
/// The format is chosen from `file_name`. The result is a standalone table
/// with the same normalization as the primary one.
pub fn load_upload(file_name: &str, bytes: Vec<u8>) -> Result<Table, LoadError> {
    let origin = PathBuf::from(file_name);
    let mut table = match extension_of(&origin).as_deref() {
        Some("csv") => from_csv_bytes(&bytes, &origin)?,
        Some(ext) if is_workbook(ext) => {
            let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
                .map_err(|e| workbook_error(&origin, e))?;
            read_first_sheet(&mut workbook, &origin)?
        }
        _ => return Err(LoadError::UnsupportedFormat { path: origin }),
    };
    normalize(&mut table);
    Ok(table)
}

/// Detect file type and load appropriate format
///
/// No normalization is applied; callers decide which key columns to fix up.
pub fn load_table(path: impl AsRef<Path>) -> Result<Table, LoadError> {
    let path = path.as_ref();
    match extension_of(path).as_deref() {
        Some("csv") => from_csv(path),
        Some(ext) if is_workbook(ext) => from_excel(path),
        _ => Err(LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn is_workbook(ext: &str) -> bool {
    matches!(ext, "xlsx" | "xlsm" | "xlsb" | "xls" | "ods")
}

/// Load a table from a CSV file with a header row
pub fn from_csv(path: impl AsRef<Path>) -> Result<Table, LoadError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_csv_bytes(&bytes, path)
}

/// Parse CSV content; a leading UTF-8 byte-order marker is skipped
pub fn from_csv_bytes(bytes: &[u8], origin: &Path) -> Result<Table, LoadError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let csv_error = |source| LoadError::Csv {
        path: origin.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(LoadError::Empty {
            path: origin.to_path_buf(),
        });
    }

    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        table.push_row(record.iter().map(Value::parse).collect());
    }
    Ok(table)
}

/// Load the first worksheet of an Excel or OpenDocument workbook
pub fn from_excel(path: impl AsRef<Path>) -> Result<Table, LoadError> {
    let path = path.as_ref();
    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(path, e))?;
    read_first_sheet(&mut workbook, path)
}

fn workbook_error(path: &Path, e: impl std::fmt::Display) -> LoadError {
    LoadError::Workbook {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn read_first_sheet<RS: Read + Seek>(
    workbook: &mut Sheets<RS>,
    origin: &Path,
) -> Result<Table, LoadError> {
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::NoWorksheet {
            path: origin.to_path_buf(),
        })?
        .map_err(|e| workbook_error(origin, e))?;
    range_to_table(&range, origin)
}

fn range_to_table(range: &Range<Data>, origin: &Path) -> Result<Table, LoadError> {
    let mut rows = range.rows();
    let header = rows.next().ok_or_else(|| LoadError::Empty {
        path: origin.to_path_buf(),
    })?;

    let columns = header
        .iter()
        .enumerate()
        .map(|(idx, cell)| match cell_value(cell).as_text() {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => format!("Unnamed: {}", idx),
        })
        .collect();

    let mut table = Table::new(columns);
    for row in rows {
        table.push_row(row.iter().map(cell_value).collect());
    }
    Ok(table)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::from_f64(*f),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Demo table used when no data file is present: two companies over two years
pub fn sample_table() -> Table {
    const INDICATORS: [(&str, [i64; 4]); 18] = [
        ("数字化转型战略词频数", [15, 25, 10, 20]),
        ("数字化转型愿景词频数", [10, 15, 8, 12]),
        ("数字化转型目标词频数", [12, 20, 9, 16]),
        ("数字化转型投资词频数", [20, 30, 15, 25]),
        ("人工智能词频数", [10, 15, 8, 12]),
        ("大数据词频数", [15, 20, 10, 18]),
        ("云计算词频数", [20, 25, 12, 20]),
        ("区块链词频数", [5, 10, 3, 8]),
        ("数字技术运用词频数", [50, 70, 33, 58]),
        ("数字化组织词频数", [8, 15, 6, 12]),
        ("数字化人才词频数", [12, 20, 9, 16]),
        ("数字化文化词频数", [10, 18, 7, 14]),
        ("数字化治理词频数", [15, 25, 10, 20]),
        ("数字化产品词频数", [12, 20, 8, 16]),
        ("数字化服务词频数", [15, 25, 10, 20]),
        ("数字化营销词频数", [10, 18, 7, 14]),
        ("数字化运营词频数", [18, 30, 12, 24]),
        (schema::COMPOSITE_INDEX, [60, 80, 45, 70]),
    ];
    const CODES: [&str; 4] = ["000001", "000001", "000002", "000002"];
    const NAMES: [&str; 4] = ["平安银行", "平安银行", "万科A", "万科A"];
    const YEARS: [i64; 4] = [2020, 2021, 2020, 2021];

    let mut columns = vec![
        STOCK_CODE.to_string(),
        schema::COMPANY_NAME.to_string(),
        YEAR.to_string(),
    ];
    columns.extend(INDICATORS.iter().map(|(name, _)| name.to_string()));

    let mut table = Table::new(columns);
    for i in 0..CODES.len() {
        let mut row = vec![Value::from(CODES[i]), Value::from(NAMES[i]), Value::Int(YEARS[i])];
        row.extend(INDICATORS.iter().map(|(_, values)| Value::Int(values[i])));
        table.push_row(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{COMPANY_NAME, COMPOSITE_INDEX};
    use rust_xlsxwriter::Workbook;

    #[test]
    fn zero_pad_is_idempotent() {
        for code in ["1", "000001", "600519", "12", "", "1234567"] {
            let once = zero_pad(code);
            assert_eq!(zero_pad(&once), once);
        }
        assert_eq!(zero_pad("1"), "000001");
        assert_eq!(zero_pad("000001"), "000001");
        assert_eq!(zero_pad("1234567"), "1234567");
    }

    #[test]
    fn missing_candidates_fall_back_to_sample() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = load_primary(&[dir.path().join("a.xlsx"), dir.path().join("b.xlsx")]).unwrap();
        assert_eq!(outcome.source, DataSource::Sample);

        let table = outcome.table;
        assert_eq!(table.len(), 4);
        let names: Vec<_> = table
            .column(COMPANY_NAME)
            .unwrap()
            .filter_map(Value::as_text)
            .collect();
        assert_eq!(names, ["平安银行", "平安银行", "万科A", "万科A"]);
        let years: Vec<_> = table.column(YEAR).unwrap().filter_map(Value::as_i64).collect();
        assert_eq!(years, [2020, 2021, 2020, 2021]);
        let composite: Vec<_> = table
            .column(COMPOSITE_INDEX)
            .unwrap()
            .filter_map(Value::as_f64)
            .collect();
        assert_eq!(composite, [60.0, 80.0, 45.0, 70.0]);
    }

    #[test]
    fn first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("second.csv");
        let third = dir.path().join("third.csv");
        std::fs::write(&second, "股票代码,年份\n1,2020\n").unwrap();
        std::fs::write(&third, "股票代码,年份\n2,2020\n3,2021\n").unwrap();

        let candidates = [dir.path().join("first.csv"), second.clone(), third];
        assert_eq!(resolve_first_existing(&candidates), Some(second.clone()));

        let outcome = load_primary(&candidates).unwrap();
        assert_eq!(outcome.source, DataSource::File(second));
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(
            outcome.table.row(0).unwrap().get(STOCK_CODE),
            Some(&Value::from("000001"))
        );
    }

    #[test]
    fn corrupt_file_is_an_error_not_sample_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"this is not a zip archive").unwrap();

        let err = load_primary(&[path]).unwrap_err();
        assert!(matches!(err, LoadError::Workbook { .. }), "{err}");
    }

    #[test]
    fn unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, b"{}").unwrap();
        assert!(matches!(
            load_primary(&[path]),
            Err(LoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn workbook_cells_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "股票代码").unwrap();
        sheet.write_string(0, 1, "年份").unwrap();
        sheet.write_string(0, 2, "数字化转型指数").unwrap();
        sheet.write_number(1, 0, 2.0).unwrap();
        sheet.write_number(1, 1, 2021.0).unwrap();
        sheet.write_number(1, 2, 70.5).unwrap();
        sheet.write_string(2, 0, "600519").unwrap();
        sheet.write_string(2, 1, "2020").unwrap();
        workbook.save(&path).unwrap();

        let table = load_primary(&[&path]).unwrap().table;
        assert_eq!(table.len(), 2);
        let first = table.row(0).unwrap();
        assert_eq!(first.get(STOCK_CODE), Some(&Value::from("000002")));
        assert_eq!(first.get(YEAR), Some(&Value::Int(2021)));
        assert_eq!(first.get(COMPOSITE_INDEX), Some(&Value::Float(70.5)));
        let second = table.row(1).unwrap();
        assert_eq!(second.get(YEAR), Some(&Value::Int(2020)));
        assert_eq!(second.get(COMPOSITE_INDEX), Some(&Value::Null));
    }

    #[test]
    fn csv_with_bom_and_invalid_year() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("股票代码,年份,企业名称\n000002,2021,万科A\n5,unknown,\n".as_bytes());
        let mut table = from_csv_bytes(&bytes, Path::new("upload.csv")).unwrap();
        assert_eq!(table.columns()[0], STOCK_CODE);

        normalize(&mut table);
        assert_eq!(table.row(1).unwrap().get(STOCK_CODE), Some(&Value::from("000005")));
        assert_eq!(table.row(1).unwrap().get(YEAR), Some(&Value::Null));
        assert_eq!(table.row(1).unwrap().get(COMPANY_NAME), Some(&Value::Null));
    }

    #[test]
    fn upload_dispatches_on_file_name() {
        let table = load_upload("custom.CSV", "股票代码,年份\n1,2020\n".as_bytes().to_vec()).unwrap();
        assert_eq!(table.row(0).unwrap().get(STOCK_CODE), Some(&Value::from("000001")));

        assert!(matches!(
            load_upload("custom.xlsx", b"garbage".to_vec()),
            Err(LoadError::Workbook { .. })
        ));
        assert!(matches!(
            load_upload("notes.txt", Vec::new()),
            Err(LoadError::UnsupportedFormat { .. })
        ));
    }
}
