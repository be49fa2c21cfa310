use crate::error::ExportError;
use crate::query::YearSelection;
use crate::table::Table;
use crate::value::Value;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker prepended to CSV exports so spreadsheet programs detect UTF-8
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Trailing part of every export file name
pub const EXPORT_SUFFIX: &str = "数字化转型数据";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

/// Convert a table to CSV
///
/// Output is UTF-8 with a byte-order marker: the header row first, then one
/// record per row in table order. Nulls become empty fields.
///
/// # Examples
/// ```
/// use dti_dashboard::downloader::{UTF8_BOM, to_csv};
/// use dti_dashboard::loader::sample_table;
///
/// let bytes = to_csv(&sample_table()).unwrap();
/// assert!(bytes.starts_with(UTF8_BOM));
/// ```
pub fn to_csv(table: &Table) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());

    writer.write_record(table.columns())?;
    for row in table.iter() {
        writer.write_record(row.values().iter().map(Value::to_string))?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(bytes)
}

/// Convert a table to an XLSX workbook with a single worksheet
///
/// Numeric cells are written as numbers, text as text, and nulls are left blank.
pub fn to_xlsx(table: &Table) -> Result<Vec<u8>, ExportError> {
    let width = table.columns().len();
    u16::try_from(width).map_err(|_| ExportError::TooManyColumns(width))?;
    u32::try_from(table.len() + 1).map_err(|_| ExportError::TooManyRows(table.len()))?;

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    let header = Format::new().set_bold();

    for (c, name) in (0u16..).zip(table.columns()) {
        worksheet.write_string_with_format(0, c, name, &header)?;
    }

    for (r, row) in (1u32..).zip(table.iter()) {
        for (c, value) in (0u16..).zip(row.values()) {
            match value {
                Value::Null => {}
                Value::Int(i) => {
                    worksheet.write_number(r, c, *i as f64)?;
                }
                Value::Float(f) => {
                    worksheet.write_number(r, c, *f)?;
                }
                Value::Text(s) => {
                    worksheet.write_string(r, c, s)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

/// Encode `table` in the requested download format
///
/// # Examples
/// ```
/// use dti_dashboard::downloader::{ExportFormat, UTF8_BOM, export};
/// use dti_dashboard::loader::sample_table;
///
/// let bytes = export(&sample_table(), ExportFormat::Csv).unwrap();
/// assert!(bytes.starts_with(UTF8_BOM));
/// ```
pub fn export(table: &Table, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => to_csv(table),
        ExportFormat::Xlsx => to_xlsx(table),
    }
}

/// Build the download name `{company}_{year}_数字化转型数据.{ext}`
///
/// Path separators in the company name are replaced so the result is always a
/// plain file name.
///
/// # Examples
/// ```
/// use dti_dashboard::downloader::{ExportFormat, export_file_name};
/// use dti_dashboard::query::YearSelection;
///
/// assert_eq!(
///     export_file_name("平安银行", &YearSelection::Year(2021), ExportFormat::Csv),
///     "平安银行_2021_数字化转型数据.csv"
/// );
/// ```
pub fn export_file_name(company: &str, year: &YearSelection, format: ExportFormat) -> String {
    let company = company.trim().replace(['/', '\\'], "_");
    format!(
        "{}_{}_{}.{}",
        company,
        year.label(),
        EXPORT_SUFFIX,
        format.extension()
    )
}
