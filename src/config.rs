//! Application settings.
//!
//! Settings come from an optional `dti.toml` file and `DTI__*` environment
//! variables (for example `DTI__SERVER__BIND=0.0.0.0:8080`). Every key has a
//! default, so running without any configuration works out of the box.

use crate::error::ConfigError;
use crate::schema::IndicatorSchema;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "dti.toml";
pub const ENV_PREFIX: &str = "DTI";

const PRIMARY_FILE: &str = "两版合并后的年报数据_完整版.xlsx";
const INDUSTRY_FILE: &str = "最终数据dta格式-上市公司年度行业代码至2021.xlsx";

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSources,
    pub schema: IndicatorSchema,
    pub server: ServerSettings,
    /// Where to cache the merged table between runs; no caching when unset
    pub snapshot_path: Option<PathBuf>,
}

/// Ordered candidate locations for the two input workbooks.
///
/// The first existing path in each list wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSources {
    pub primary: Vec<PathBuf>,
    pub industry: Vec<PathBuf>,
}

fn candidates(file: &str) -> Vec<PathBuf> {
    vec![
        Path::new("APP ALL").join(file),
        PathBuf::from(file),
        Path::new("app").join(file),
    ]
}

impl Default for DataSources {
    fn default() -> Self {
        Self {
            primary: candidates(PRIMARY_FILE),
            industry: candidates(INDUSTRY_FILE),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address the web server listens on
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Loads the application configuration.
///
/// With `path` set the file must exist; otherwise `dti.toml` in the working
/// directory is used if present. Environment variables override both.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let settings = config::Config::builder()
        .add_source(file)
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize::<Settings>()?;

    settings.schema.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Dimension;
    use std::io::Write;

    #[test]
    fn defaults_point_at_original_locations() {
        let settings = Settings::default();
        assert_eq!(settings.data.primary.len(), 3);
        assert_eq!(settings.data.primary[1], PathBuf::from(PRIMARY_FILE));
        assert!(settings.data.industry[0].starts_with("APP ALL"));
        assert_eq!(settings.server.bind, "127.0.0.1:3000");
        assert!(settings.snapshot_path.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
snapshot_path = "cache/table.bin.gz"

[data]
primary = ["data/indicators.csv"]

[schema]
business = ["数字化产品词频数"]

[server]
bind = "0.0.0.0:8080"
"#
        )
        .unwrap();

        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.data.primary, [PathBuf::from("data/indicators.csv")]);
        assert_eq!(settings.data.industry.len(), 3);
        assert_eq!(settings.schema.fields(Dimension::Business), ["数字化产品词频数"]);
        assert_eq!(settings.schema.fields(Dimension::Strategy).len(), 4);
        assert_eq!(settings.server.bind, "0.0.0.0:8080");
        assert_eq!(
            settings.snapshot_path,
            Some(PathBuf::from("cache/table.bin.gz"))
        );
    }

    #[test]
    fn no_config_file_means_defaults() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.schema, IndicatorSchema::default());
        assert_eq!(settings.data.primary, DataSources::default().primary);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_settings(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
