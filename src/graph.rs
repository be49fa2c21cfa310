#![cfg(feature = "web")]
use crate::error::ChartError;
use crate::query::{QueryEngine, Selection, YearPoint};
use crate::schema::COMPOSITE_LABEL;
use plotters::prelude::*;
use std::fmt;
use std::str::FromStr;

/// Charts the dashboard can render
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    /// Composite index of the selected stock over its years
    Trend,
    /// Mean score of each dimension for the selection
    Dimensions,
    /// Mean composite index per industry, highest first
    Industries,
    /// Mean composite index per year across all stocks
    Yearly,
}

impl ChartKind {
    /// Whether rendering needs a stock selection
    pub fn needs_selection(self) -> bool {
        matches!(self, ChartKind::Trend | ChartKind::Dimensions)
    }

    fn name(self) -> &'static str {
        match self {
            ChartKind::Trend => "trend",
            ChartKind::Dimensions => "dimensions",
            ChartKind::Industries => "industries",
            ChartKind::Yearly => "yearly",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trend" => Ok(ChartKind::Trend),
            "dimensions" => Ok(ChartKind::Dimensions),
            "industries" => Ok(ChartKind::Industries),
            "yearly" => Ok(ChartKind::Yearly),
            other => Err(format!("unknown chart kind: {other}")),
        }
    }
}

/// Configuration options for graph generation
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Title displayed at the top of the graph
    pub title: String,

    pub x_label: String,

    pub y_label: String,

    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            x_label: "年份".to_string(),
            y_label: COMPOSITE_LABEL.to_string(),
            width: 800,
            height: 600,
        }
    }
}

impl GraphOptions {
    fn titled(title: impl Into<String>, x_label: &str, y_label: &str) -> Self {
        Self {
            title: title.into(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            ..Self::default()
        }
    }
}

fn render_error(e: impl fmt::Display) -> ChartError {
    ChartError::Render(e.to_string())
}

/// Render `kind` as PNG bytes
///
/// `selection` is only consulted by the per-stock charts; without one they
/// have nothing to plot.
pub fn render(
    engine: &QueryEngine,
    kind: ChartKind,
    selection: Option<&Selection>,
) -> Result<Vec<u8>, ChartError> {
    match kind {
        ChartKind::Trend => {
            let result = engine.query(selection.ok_or(ChartError::NoData)?);
            let title = format!("{} {}", result.company_name, COMPOSITE_LABEL);
            line_chart(
                &result.composite_trend,
                &GraphOptions::titled(title, "年份", COMPOSITE_LABEL),
            )
        }
        ChartKind::Dimensions => {
            let result = engine.query(selection.ok_or(ChartError::NoData)?);
            let bars: Vec<(String, f64)> = result
                .dimension_scores
                .iter()
                .map(|s| (s.label.to_string(), s.score))
                .collect();
            let title = format!("{} 各维度得分", result.company_name);
            bar_chart(&bars, &GraphOptions::titled(title, "维度", "得分"))
        }
        ChartKind::Industries => {
            let bars: Vec<(String, f64)> = engine
                .industry_ranking()
                .into_iter()
                .map(|m| (m.industry, m.mean))
                .collect();
            bar_chart(
                &bars,
                &GraphOptions::titled("行业平均综合指数", "行业", COMPOSITE_LABEL),
            )
        }
        ChartKind::Yearly => line_chart(
            &engine.yearly_composite_means(),
            &GraphOptions::titled("年度平均综合指数", "年份", COMPOSITE_LABEL),
        ),
    }
}

/// Draw into a temporary PNG file and return its bytes
fn draw_png(
    options: &GraphOptions,
    draw: impl FnOnce(DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>) -> Result<(), ChartError>,
) -> Result<Vec<u8>, ChartError> {
    let file = tempfile::Builder::new().suffix(".png").tempfile()?;
    {
        let root = BitMapBackend::new(file.path(), (options.width, options.height)).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;
        draw(root)?;
    }
    let png = std::fs::read(file.path())?;
    Ok(png)
}

fn upper_bound(max: f64) -> f64 {
    if max > 0.0 { max * 1.1 } else { 1.0 }
}

/// Line chart of a yearly series, one marker per year
pub fn line_chart(points: &[YearPoint], options: &GraphOptions) -> Result<Vec<u8>, ChartError> {
    let (Some(first), Some(last)) = (
        points.iter().map(|p| p.year).min(),
        points.iter().map(|p| p.year).max(),
    ) else {
        return Err(ChartError::NoData);
    };
    let max_y = points.iter().map(|p| p.value).fold(f64::MIN, f64::max);
    let min_y = points.iter().map(|p| p.value).fold(0.0, f64::min);

    draw_png(options, |root| {
        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(first..last + 1, min_y..upper_bound(max_y))
            .map_err(render_error)?;

        chart
            .configure_mesh()
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .x_labels(points.len().max(2))
            .x_label_formatter(&|year| year.to_string())
            .draw()
            .map_err(render_error)?;

        chart
            .draw_series(LineSeries::new(points.iter().map(|p| (p.year, p.value)), &BLUE))
            .map_err(render_error)?;
        chart
            .draw_series(
                points
                    .iter()
                    .map(|p| Circle::new((p.year, p.value), 4, BLUE.filled())),
            )
            .map_err(render_error)?;

        root.present().map_err(render_error)?;
        Ok(())
    })
}

/// Bar chart of labelled values, in the given order
pub fn bar_chart(bars: &[(String, f64)], options: &GraphOptions) -> Result<Vec<u8>, ChartError> {
    if bars.is_empty() {
        return Err(ChartError::NoData);
    }
    let max_y = bars.iter().map(|(_, v)| *v).fold(f64::MIN, f64::max);
    let labels: Vec<&str> = bars.iter().map(|(label, _)| label.as_str()).collect();

    draw_png(options, |root| {
        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d((0..bars.len() as i32).into_segmented(), 0.0..upper_bound(max_y))
            .map_err(render_error)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .x_labels(bars.len())
            .x_label_formatter(&|segment| match segment {
                SegmentValue::CenterOf(i) => labels
                    .get(*i as usize)
                    .map(|label| label.to_string())
                    .unwrap_or_default(),
                _ => String::new(),
            })
            .draw()
            .map_err(render_error)?;

        chart
            .draw_series(
                Histogram::vertical(&chart)
                    .style(BLUE.mix(0.8).filled())
                    .margin(8)
                    .data(bars.iter().enumerate().map(|(i, (_, v))| (i as i32, *v))),
            )
            .map_err(render_error)?;

        root.present().map_err(render_error)?;
        Ok(())
    })
}
