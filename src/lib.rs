/*!
# Digital Transformation Index Dashboard

Data core and web backend for exploring the digital-transformation index of
Chinese listed companies.

## Overview

Annual-report indicator data is loaded once from a workbook, joined with an
industry classification table and frozen into an immutable in-memory table.
Every question the dashboard asks (which stocks exist in an industry, what a
company scored in a year, how industries rank) is a read-only query against
that table.

## Architecture

### Data Layer
- **value / table**: Dynamically typed cells in a column-named row table
- **loader**: CSV and Excel ingestion, stock-code and year normalization, and a
  built-in sample table when no data file exists
- **enricher**: Left join of industry names or codes on (stock code, year)
- **saving**: Gzip-compressed bincode snapshot of the merged table
- **dataset**: One-time bootstrap tying the above together

### Query Layer
- **schema**: Indicator fields of the strategy, technology, organization and
  business dimensions, configurable through `dti.toml`
- **query**: Selection, filtering and aggregation (dimension scores, yearly
  means, industry ranking, composite histogram)

### Presentation Layer
- **downloader**: CSV (UTF-8 with byte-order marker) and XLSX export
- **graph**: PNG line and bar charts (feature `web`)
- **app**: axum JSON API (feature `web`)

## Configuration

Settings are read from an optional `dti.toml` and `DTI__*` environment
variables, see [`config::Settings`].

## REST API Endpoints

- `/api/overview` - Row, stock, industry and year counts
- `/api/schema` - Indicator fields per dimension
- `/api/industries`, `/api/stocks?industry=` - Selector contents
- `/api/years/{code}` - Years recorded for a stock
- `/api/query?stock=&year=` - Rows and derived views for a selection
- `/api/trend`, `/api/industry-ranking`, `/api/distribution?bins=` - Table-wide aggregates
- `/api/export?stock=&year=&format=` - CSV or XLSX download
- `/api/chart/{kind}` - PNG chart
- `/api/upload` - Parse and summarize an ad hoc file
*/

pub mod config;
pub mod dataset;
pub mod downloader;
pub mod enricher;
pub mod error;
pub mod loader;
pub mod query;
pub mod saving;
pub mod schema;
pub mod table;
pub mod value;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;

pub use config::Settings;
pub use dataset::Dataset;
pub use error::{ConfigError, ExportError, LoadError, SnapshotError};
pub use query::{QueryEngine, QueryResult, Selection, YearSelection};
pub use schema::{Dimension, IndicatorSchema};
pub use table::Table;
pub use value::Value;
