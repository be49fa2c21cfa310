//! Indicator schema: which columns make up each dimension of the index.
//!
//! The schema is static for the lifetime of the process. Its field lists can
//! be overridden from configuration, but the shape is fixed: four indicator
//! dimensions plus one composite field.

use crate::error::ConfigError;
use crate::table::Table;
use serde::{Deserialize, Serialize};

pub const STOCK_CODE: &str = "股票代码";
/// Full-length stock identifier used by the industry classification file
pub const FULL_STOCK_CODE: &str = "股票代码全称";
pub const COMPANY_NAME: &str = "企业名称";
pub const YEAR: &str = "年份";
/// Year column name used by the industry classification file
pub const FISCAL_YEAR: &str = "年度";
pub const INDUSTRY_NAME: &str = "行业名称";
pub const INDUSTRY_CODE: &str = "行业代码";
pub const COMPOSITE_INDEX: &str = "数字化转型指数";

pub const COMPOSITE_KEY: &str = "composite";
pub const COMPOSITE_LABEL: &str = "综合指数";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Strategy,
    Technology,
    Organization,
    Business,
}

impl Dimension {
    /// Display order of the dimensions
    pub const ALL: [Dimension; 4] = [
        Dimension::Strategy,
        Dimension::Technology,
        Dimension::Organization,
        Dimension::Business,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Dimension::Strategy => "strategy",
            Dimension::Technology => "technology",
            Dimension::Organization => "organization",
            Dimension::Business => "business",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Dimension::Strategy => "战略维度",
            Dimension::Technology => "技术维度",
            Dimension::Organization => "组织维度",
            Dimension::Business => "业务维度",
        }
    }
}

/// One entry of the schema listing, including the composite pseudo-dimension
#[derive(Debug, Clone, Serialize)]
pub struct SchemaEntry {
    pub key: &'static str,
    pub label: &'static str,
    pub fields: Vec<String>,
}

/// Mapping of dimension to its ordered indicator fields, plus the composite field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSchema {
    pub strategy: Vec<String>,
    pub technology: Vec<String>,
    pub organization: Vec<String>,
    pub business: Vec<String>,
    pub composite: String,
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

impl Default for IndicatorSchema {
    fn default() -> Self {
        Self {
            strategy: owned(&[
                "数字化转型战略词频数",
                "数字化转型愿景词频数",
                "数字化转型目标词频数",
                "数字化转型投资词频数",
            ]),
            technology: owned(&[
                "人工智能词频数",
                "大数据词频数",
                "云计算词频数",
                "区块链词频数",
                "数字技术运用词频数",
            ]),
            organization: owned(&[
                "数字化组织词频数",
                "数字化人才词频数",
                "数字化文化词频数",
                "数字化治理词频数",
            ]),
            business: owned(&[
                "数字化产品词频数",
                "数字化服务词频数",
                "数字化营销词频数",
                "数字化运营词频数",
            ]),
            composite: COMPOSITE_INDEX.to_string(),
        }
    }
}

impl IndicatorSchema {
    pub fn fields(&self, dimension: Dimension) -> &[String] {
        match dimension {
            Dimension::Strategy => &self.strategy,
            Dimension::Technology => &self.technology,
            Dimension::Organization => &self.organization,
            Dimension::Business => &self.business,
        }
    }

    pub fn composite_field(&self) -> &str {
        &self.composite
    }

    /// Fields of `dimension` that are actually columns of `table`, in schema order
    pub fn available_indicators<'a>(&'a self, dimension: Dimension, table: &Table) -> Vec<&'a str> {
        self.fields(dimension)
            .iter()
            .filter(|field| table.has_column(field))
            .map(String::as_str)
            .collect()
    }

    /// The four dimensions followed by the composite entry
    pub fn entries(&self) -> Vec<SchemaEntry> {
        let mut entries: Vec<SchemaEntry> = Dimension::ALL
            .iter()
            .map(|&d| SchemaEntry {
                key: d.key(),
                label: d.label(),
                fields: self.fields(d).to_vec(),
            })
            .collect();
        entries.push(SchemaEntry {
            key: COMPOSITE_KEY,
            label: COMPOSITE_LABEL,
            fields: vec![self.composite.clone()],
        });
        entries
    }

    /// Check that the composite field and every indicator field have a name
    ///
    /// # Returns
    /// * `Result<(), ConfigError>` - `ConfigError::Validation` naming the first
    ///   offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.composite.trim().is_empty() {
            return Err(ConfigError::Validation(
                "schema.composite must name a column".to_string(),
            ));
        }
        for dimension in Dimension::ALL {
            if self.fields(dimension).iter().any(|f| f.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "schema.{} contains an empty field name",
                    dimension.key()
                )));
            }
        }
        Ok(())
    }
}
