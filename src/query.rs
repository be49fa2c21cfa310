//! Filter and aggregation queries over the loaded table.
//!
//! [`QueryEngine`] owns a shared, read-only handle to the merged table and
//! answers every question the dashboard asks of it: which industries and
//! stocks are selectable, what a (stock, year) selection contains, and the
//! table-wide composite-index aggregates.

use crate::schema::{COMPANY_NAME, Dimension, INDUSTRY_CODE, INDUSTRY_NAME, IndicatorSchema, STOCK_CODE, YEAR};
use crate::table::{RowRef, Table, serialize_records};
use crate::value::Value;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Label of the "all years" choice, also used in export file names
pub const ALL_YEARS_LABEL: &str = "全部年份";
/// Label of the "all industries" choice
pub const ALL_INDUSTRIES_LABEL: &str = "全部行业";

/// Number of histogram bins used for the composite-index distribution
pub const DEFAULT_DISTRIBUTION_BINS: usize = 20;
/// Upper bound on histogram bins; larger requests are clamped
pub const MAX_DISTRIBUTION_BINS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YearSelection {
    All,
    Year(i64),
}

impl YearSelection {
    pub fn label(&self) -> String {
        match self {
            YearSelection::All => ALL_YEARS_LABEL.to_string(),
            YearSelection::Year(year) => year.to_string(),
        }
    }

    fn matches(&self, year: Option<i64>) -> bool {
        match self {
            YearSelection::All => true,
            YearSelection::Year(wanted) => year == Some(*wanted),
        }
    }
}

impl fmt::Display for YearSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for YearSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all" | "ALL" | "全部显示" | ALL_YEARS_LABEL => Ok(YearSelection::All),
            other => other
                .parse::<i64>()
                .map(YearSelection::Year)
                .map_err(|_| format!("invalid year selection: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndustryFilter {
    All,
    Industry(String),
}

impl IndustryFilter {
    /// Interpret an optional user choice; blanks and the "all" label mean no filter
    pub fn from_choice(choice: Option<&str>) -> Self {
        match choice.map(str::trim) {
            None | Some("") | Some("all") | Some(ALL_INDUSTRIES_LABEL) => IndustryFilter::All,
            Some(name) => IndustryFilter::Industry(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub stock_code: String,
    pub year: YearSelection,
}

impl Selection {
    pub fn new(stock_code: impl Into<String>, year: YearSelection) -> Self {
        Self {
            stock_code: stock_code.into(),
            year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearPoint {
    pub year: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub label: &'static str,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorValue {
    pub field: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSeries {
    pub field: String,
    pub points: Vec<YearPoint>,
}

/// Everything shown for one dimension of a selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionView {
    pub dimension: Dimension,
    pub label: &'static str,
    pub available: Vec<String>,
    /// Non-null indicator values of the first selected row
    pub cards: Vec<IndicatorValue>,
    /// Year-sorted series per indicator, only for multi-year selections
    pub series: Vec<IndicatorSeries>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndustryLabel {
    Name(String),
    Code(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub selection: Selection,
    #[serde(serialize_with = "serialize_records")]
    pub subset: Table,
    pub company_name: String,
    pub industry: Option<IndustryLabel>,
    /// Composite index of the first selected row, read straight from the data
    pub composite: Option<f64>,
    pub composite_trend: Vec<YearPoint>,
    pub dimensions: Vec<DimensionView>,
    pub dimension_scores: Vec<DimensionScore>,
}

impl QueryResult {
    /// No row matched the selection
    pub fn is_empty(&self) -> bool {
        self.subset.is_empty()
    }

    pub fn score(&self, dimension: Dimension) -> Option<f64> {
        self.dimension_scores
            .iter()
            .find(|s| s.dimension == dimension)
            .map(|s| s.score)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockOption {
    pub code: String,
    pub name: Option<String>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndustryMean {
    pub industry: String,
    pub mean: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overview {
    pub stock_count: usize,
    /// `None` when the table carries no industry names
    pub industry_count: Option<usize>,
    pub year_range: Option<(i64, i64)>,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

fn text_of(row: RowRef<'_>, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_text)
}

fn year_of(row: RowRef<'_>) -> Option<i64> {
    row.get(YEAR).and_then(Value::as_i64)
}

fn number_of(row: RowRef<'_>, column: &str) -> Option<f64> {
    row.get(column).and_then(Value::as_f64)
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// The row dimension scores are read from
///
/// A single-row subset uses that row; otherwise the first row at the latest
/// year is used. Without any usable year the first row stands in.
fn representative_row(subset: &Table) -> Option<RowRef<'_>> {
    if subset.len() <= 1 {
        return subset.row(0);
    }
    let latest = subset.iter().filter_map(year_of).max();
    match latest {
        Some(latest) => subset.iter().find(|row| year_of(*row) == Some(latest)),
        None => subset.row(0),
    }
}

/// Mean of the non-null indicator values of each dimension
///
/// Dimensions are returned in display order. A dimension is omitted when
/// none of its fields are columns of `subset` or all of them are null.
pub fn dimension_scores(schema: &IndicatorSchema, subset: &Table) -> Vec<DimensionScore> {
    let Some(row) = representative_row(subset) else {
        return Vec::new();
    };
    Dimension::ALL
        .iter()
        .filter_map(|&dimension| {
            let values: Vec<f64> = schema
                .available_indicators(dimension, subset)
                .into_iter()
                .filter_map(|field| number_of(row, field))
                .collect();
            mean(&values).map(|score| DimensionScore {
                dimension,
                label: dimension.label(),
                score,
            })
        })
        .collect()
}

/// Year-sorted (year, value) points of one column; rows lacking either are skipped
fn series(subset: &Table, column: &str) -> Vec<YearPoint> {
    let mut points: Vec<YearPoint> = subset
        .iter()
        .filter_map(|row| {
            Some(YearPoint {
                year: year_of(row)?,
                value: number_of(row, column)?,
            })
        })
        .collect();
    points.sort_by_key(|p| p.year);
    points
}

/// Read-only query front end over the merged table
#[derive(Debug, Clone)]
pub struct QueryEngine {
    table: Arc<Table>,
    schema: Arc<IndicatorSchema>,
}

impl QueryEngine {
    /// Wrap a frozen table and the schema used to interpret its columns
    ///
    /// # Arguments
    /// * `table` - The merged table, shared with every other reader
    /// * `schema` - Indicator fields per dimension and the composite field
    ///
    /// # Examples
    /// ```
    /// use dti_dashboard::loader::sample_table;
    /// use dti_dashboard::{IndicatorSchema, QueryEngine, Selection, YearSelection};
    /// use std::sync::Arc;
    ///
    /// let engine = QueryEngine::new(Arc::new(sample_table()), Arc::new(IndicatorSchema::default()));
    /// let result = engine.query(&Selection::new("000001", YearSelection::Year(2021)));
    /// assert_eq!(result.company_name, "平安银行");
    /// assert_eq!(result.composite, Some(80.0));
    /// ```
    pub fn new(table: Arc<Table>, schema: Arc<IndicatorSchema>) -> Self {
        Self { table, schema }
    }

    /// The full merged table
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn schema(&self) -> &IndicatorSchema {
        &self.schema
    }

    /// Whether the industry-name column was merged in
    pub fn has_industry_names(&self) -> bool {
        self.table.has_column(INDUSTRY_NAME)
    }

    /// Sorted distinct industry names, empty without industry data
    pub fn industries(&self) -> Vec<String> {
        self.distinct_text(&self.table, INDUSTRY_NAME).into_iter().collect()
    }

    fn distinct_text(&self, table: &Table, column: &str) -> BTreeSet<String> {
        table
            .column(column)
            .map(|cells| cells.filter_map(Value::as_text).collect())
            .unwrap_or_default()
    }

    /// Sorted distinct stock codes selectable under `filter`
    ///
    /// The filter only applies when the table has industry names.
    pub fn stock_codes(&self, filter: &IndustryFilter) -> Vec<String> {
        match filter {
            IndustryFilter::Industry(name) if self.has_industry_names() => {
                let rows = self
                    .table
                    .filter(|row| text_of(row, INDUSTRY_NAME).as_deref() == Some(name.as_str()));
                self.distinct_text(&rows, STOCK_CODE).into_iter().collect()
            }
            _ => self.distinct_text(&self.table, STOCK_CODE).into_iter().collect(),
        }
    }

    /// First non-null company name recorded for `code`
    pub fn company_name(&self, code: &str) -> Option<String> {
        self.table
            .iter()
            .filter(|row| text_of(*row, STOCK_CODE).as_deref() == Some(code))
            .find_map(|row| text_of(row, COMPANY_NAME))
    }

    /// Selector entries labelled `"code - name"`
    pub fn stock_options(&self, filter: &IndustryFilter) -> Vec<StockOption> {
        self.stock_codes(filter)
            .into_iter()
            .map(|code| {
                let name = self.company_name(&code);
                let label = format!("{} - {}", code, name.as_deref().unwrap_or(""));
                StockOption { code, name, label }
            })
            .collect()
    }

    /// Sorted distinct years recorded for `code`
    pub fn years_for(&self, code: &str) -> Vec<i64> {
        let years: BTreeSet<i64> = self
            .table
            .iter()
            .filter(|row| text_of(*row, STOCK_CODE).as_deref() == Some(code))
            .filter_map(year_of)
            .collect();
        years.into_iter().collect()
    }

    /// Rows of one stock, optionally restricted to a single year, in table order
    pub fn subset(&self, selection: &Selection) -> Table {
        self.table.filter(|row| {
            text_of(row, STOCK_CODE).as_deref() == Some(selection.stock_code.as_str())
                && selection.year.matches(year_of(row))
        })
    }

    /// Resolve a selection into its rows and derived views
    ///
    /// An unknown stock code or year yields an empty result, not an error.
    pub fn query(&self, selection: &Selection) -> QueryResult {
        let subset = self.subset(selection);
        let first = subset.row(0);

        let company_name = first
            .and_then(|row| text_of(row, COMPANY_NAME))
            .unwrap_or_else(|| selection.stock_code.clone());

        let industry = first.and_then(|row| {
            if subset.has_column(INDUSTRY_NAME) {
                text_of(row, INDUSTRY_NAME).map(IndustryLabel::Name)
            } else {
                text_of(row, INDUSTRY_CODE).map(IndustryLabel::Code)
            }
        });

        let composite_field = self.schema.composite_field();
        let composite = first.and_then(|row| number_of(row, composite_field));
        let multi_year = subset.len() > 1;
        let composite_trend = if multi_year {
            series(&subset, composite_field)
        } else {
            Vec::new()
        };

        let dimensions = if subset.is_empty() {
            Vec::new()
        } else {
            Dimension::ALL
                .iter()
                .map(|&dimension| self.dimension_view(dimension, &subset, multi_year))
                .collect()
        };
        let dimension_scores = dimension_scores(&self.schema, &subset);

        QueryResult {
            selection: selection.clone(),
            subset,
            company_name,
            industry,
            composite,
            composite_trend,
            dimensions,
            dimension_scores,
        }
    }

    fn dimension_view(&self, dimension: Dimension, subset: &Table, multi_year: bool) -> DimensionView {
        let available = self.schema.available_indicators(dimension, subset);
        let cards = subset
            .row(0)
            .map(|row| {
                available
                    .iter()
                    .filter_map(|field| {
                        number_of(row, field).map(|value| IndicatorValue {
                            field: field.to_string(),
                            value,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let series = if multi_year {
            available
                .iter()
                .map(|field| IndicatorSeries {
                    field: field.to_string(),
                    points: series(subset, field),
                })
                .collect()
        } else {
            Vec::new()
        };

        DimensionView {
            dimension,
            label: dimension.label(),
            available: available.iter().map(|f| f.to_string()).collect(),
            cards,
            series,
        }
    }

    /// Mean composite index per year over the whole table, ascending by year
    pub fn yearly_composite_means(&self) -> Vec<YearPoint> {
        let composite = self.schema.composite_field();
        let mut groups: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for row in self.table.iter() {
            if let (Some(year), Some(value)) = (year_of(row), number_of(row, composite)) {
                groups.entry(year).or_default().push(value);
            }
        }
        groups
            .into_iter()
            .filter_map(|(year, values)| mean(&values).map(|value| YearPoint { year, value }))
            .collect()
    }

    /// Mean composite index per industry, highest first
    ///
    /// Groups are formed in ascending name order and the sort is stable, so
    /// ties keep that order. Rows without an industry name are ignored.
    pub fn industry_ranking(&self) -> Vec<IndustryMean> {
        if !self.has_industry_names() {
            return Vec::new();
        }
        let composite = self.schema.composite_field();
        let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in self.table.iter() {
            if let (Some(industry), Some(value)) = (text_of(row, INDUSTRY_NAME), number_of(row, composite)) {
                groups.entry(industry).or_default().push(value);
            }
        }
        let mut ranking: Vec<IndustryMean> = groups
            .into_iter()
            .filter_map(|(industry, values)| {
                mean(&values).map(|mean| IndustryMean {
                    industry,
                    mean,
                    count: values.len(),
                })
            })
            .collect();
        ranking.sort_by(|a, b| b.mean.total_cmp(&a.mean));
        ranking
    }

    /// Summary of the whole table for the landing view
    ///
    /// # Returns
    /// * `Overview` - Distinct stock count, the distinct industry count (only
    ///   when industry names are loaded), the first and last year on record and
    ///   the row count
    pub fn overview(&self) -> Overview {
        let years: Vec<i64> = self.table.iter().filter_map(year_of).collect();
        let year_range = years
            .iter()
            .min()
            .zip(years.iter().max())
            .map(|(min, max)| (*min, *max));
        Overview {
            stock_count: self.distinct_text(&self.table, STOCK_CODE).len(),
            industry_count: self
                .has_industry_names()
                .then(|| self.distinct_text(&self.table, INDUSTRY_NAME).len()),
            year_range,
            row_count: self.table.len(),
        }
    }

    /// Equal-width histogram of the composite index over the whole table
    ///
    /// # Arguments
    ///
    /// * `bins` - Requested bin count, clamped to `1..=MAX_DISTRIBUTION_BINS`
    ///
    /// # Returns
    ///
    /// The bins in ascending order. Empty when no row has a numeric composite
    /// value, a single bin when all values are equal.
    pub fn composite_distribution(&self, bins: usize) -> Vec<HistogramBin> {
        let composite = self.schema.composite_field();
        let values: Vec<f64> = self
            .table
            .iter()
            .filter_map(|row| number_of(row, composite))
            .collect();
        histogram(&values, bins.clamp(1, MAX_DISTRIBUTION_BINS))
    }
}

fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let (Some(min), Some(max)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) else {
        return Vec::new();
    };
    if min == max {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: values.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for value in values {
        let idx = (((value - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count,
        })
        .collect()
}
