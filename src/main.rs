//! dti - query the digital-transformation index dataset from the terminal
#![cfg(not(tarpaulin_include))]

use clap::{Parser, Subcommand};
use dti_dashboard::config::load_settings;
use dti_dashboard::dataset::Dataset;
use dti_dashboard::downloader::{self, ExportFormat};
use dti_dashboard::loader::{self, DataSource, zero_pad};
use dti_dashboard::query::{IndustryFilter, IndustryLabel, QueryEngine, QueryResult, Selection, YearSelection};
use dti_dashboard::schema::COMPOSITE_LABEL;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dti")]
#[command(about = "Explore listed-company digital transformation indices")]
struct Cli {
    /// Configuration file (defaults to dti.toml when present)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summary counts of the loaded dataset
    Overview,
    /// Indicator fields grouped by dimension
    Schema,
    /// Distinct industry names
    Industries,
    /// Selectable stocks, optionally within one industry
    Stocks {
        #[arg(short, long)]
        industry: Option<String>,
    },
    /// Rows and derived scores for one stock
    Query {
        #[arg(short, long)]
        stock: String,

        /// A single year, or "all"
        #[arg(short, long, default_value = "all")]
        year: YearSelection,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the selected rows to a CSV or XLSX file
    Export {
        #[arg(short, long)]
        stock: String,

        #[arg(short, long, default_value = "all")]
        year: YearSelection,

        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,

        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Parse an ad hoc CSV or workbook and describe it
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let open = || -> Result<(Dataset, QueryEngine), Box<dyn Error>> {
        let settings = load_settings(cli.config.as_deref())?;
        let dataset = Dataset::bootstrap(&settings)?;
        let engine = dataset.engine(Arc::new(settings.schema.clone()));
        Ok((dataset, engine))
    };

    match &cli.command {
        Commands::Inspect { file } => inspect(file)?,
        Commands::Overview => {
            let (dataset, engine) = open()?;
            let provenance = dataset.provenance();
            match &provenance.primary {
                DataSource::File(path) => println!("data file:   {}", path.display()),
                DataSource::Sample => println!("data file:   (built-in sample)"),
            }
            if let Some(path) = &provenance.industry {
                println!("industries:  {}", path.display());
            }
            for warning in &provenance.warnings {
                println!("warning:     {}", warning);
            }

            let overview = engine.overview();
            println!("rows:        {}", overview.row_count);
            println!("stocks:      {}", overview.stock_count);
            if let Some(count) = overview.industry_count {
                println!("industries:  {}", count);
            }
            if let Some((first, last)) = overview.year_range {
                println!("years:       {}-{}", first, last);
            }
        }
        Commands::Schema => {
            let (_, engine) = open()?;
            for entry in engine.schema().entries() {
                println!("{} ({})", entry.label, entry.key);
                for field in entry.fields {
                    println!("  {}", field);
                }
            }
        }
        Commands::Industries => {
            let (_, engine) = open()?;
            if !engine.has_industry_names() {
                println!("no industry names loaded");
            }
            for industry in engine.industries() {
                println!("{}", industry);
            }
        }
        Commands::Stocks { industry } => {
            let (_, engine) = open()?;
            let filter = IndustryFilter::from_choice(industry.as_deref());
            for option in engine.stock_options(&filter) {
                println!("{}", option.label);
            }
        }
        Commands::Query { stock, year, json } => {
            let (_, engine) = open()?;
            let result = engine.query(&Selection::new(zero_pad(stock), *year));
            if result.is_empty() {
                return Err(format!("no data for stock {} in {}", zero_pad(stock), year).into());
            }
            if *json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&engine, &result);
            }
        }
        Commands::Export {
            stock,
            year,
            format,
            out_dir,
        } => {
            let (_, engine) = open()?;
            let result = engine.query(&Selection::new(zero_pad(stock), *year));
            if result.is_empty() {
                return Err(format!("no data for stock {} in {}", zero_pad(stock), year).into());
            }
            let bytes = downloader::export(&result.subset, *format)?;
            let path = out_dir.join(downloader::export_file_name(&result.company_name, year, *format));
            std::fs::create_dir_all(out_dir)?;
            std::fs::write(&path, bytes)?;
            println!("wrote {} rows to {}", result.subset.len(), path.display());
        }
    }

    Ok(())
}

fn inspect(file: &Path) -> Result<(), Box<dyn Error>> {
    let bytes = std::fs::read(file)?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let table = loader::load_upload(&name, bytes)?;
    println!("{}: {} rows, {} columns", file.display(), table.len(), table.columns().len());
    for column in table.columns() {
        let filled = table
            .column(column)
            .map(|cells| cells.filter(|v| !v.is_null()).count())
            .unwrap_or(0);
        println!("  {} ({} non-empty)", column, filled);
    }
    Ok(())
}

fn print_result(engine: &QueryEngine, result: &QueryResult) {
    println!("{} ({})", result.company_name, result.selection.stock_code);
    if let Some(industry) = &result.industry {
        match industry {
            IndustryLabel::Name(name) => println!("industry:  {}", name),
            IndustryLabel::Code(code) => println!("industry code: {}", code),
        }
    }
    println!("year:      {}", result.selection.year);
    if let Some(composite) = result.composite {
        println!("{}: {:.2}", COMPOSITE_LABEL, composite);
    }

    for score in &result.dimension_scores {
        println!("{}: {:.2}", score.label, score.score);
    }

    for view in &result.dimensions {
        if view.available.is_empty() {
            println!("\n{}: no indicators in data", view.label);
            continue;
        }
        println!("\n{}", view.label);
        for card in &view.cards {
            println!("  {}: {}", card.field, card.value);
        }
    }

    if !result.composite_trend.is_empty() {
        println!("\ntrend");
        for point in &result.composite_trend {
            println!("  {}: {:.2}", point.year, point.value);
        }
    }

    if result.selection.year == YearSelection::All {
        println!("\n{} years on record", engine.years_for(&result.selection.stock_code).len());
    }
}
