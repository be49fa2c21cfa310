//! HTTP surface of the dashboard.
//!
//! Every handler reads the shared, immutable dataset through [`QueryEngine`];
//! nothing a request does can change what the next request sees.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::dataset::Dataset;
use crate::downloader::{self, ExportFormat};
use crate::error::{ChartError, ExportError};
use crate::graph::{self, ChartKind};
use crate::loader::{self, zero_pad};
use crate::query::{DEFAULT_DISTRIBUTION_BINS, IndustryFilter, MAX_DISTRIBUTION_BINS, QueryEngine, Selection, YearSelection};
use crate::table::{Table, serialize_records};

/// Largest accepted upload body
pub const UPLOAD_LIMIT_BYTES: usize = 32 * 1024 * 1024;

/// Rows of an uploaded table echoed back in the summary
const UPLOAD_PREVIEW_ROWS: usize = 10;

pub struct AppState {
    pub engine: QueryEngine,
}

/// Handler error, rendered as `{"error": ..., "status": ...}`
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("{}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<ExportError> for AppError {
    fn from(e: ExportError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<ChartError> for AppError {
    fn from(e: ChartError) -> Self {
        match &e {
            ChartError::NoData => AppError::NotFound(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Deserialize)]
struct StocksQuery {
    industry: Option<String>,
}

#[derive(Deserialize)]
struct SelectionQuery {
    stock: Option<String>,
    year: Option<String>,
}

impl SelectionQuery {
    fn selection(&self) -> AppResult<Selection> {
        let stock = self
            .stock
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BadRequest("missing stock".to_string()))?;
        let year = self
            .year
            .as_deref()
            .unwrap_or_default()
            .parse::<YearSelection>()
            .map_err(AppError::BadRequest)?;
        Ok(Selection::new(zero_pad(stock), year))
    }
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(flatten)]
    selection: SelectionQuery,
    format: Option<String>,
}

#[derive(Deserialize)]
struct DistributionQuery {
    bins: Option<usize>,
}

#[derive(Serialize)]
struct UploadSummary {
    file_name: String,
    rows: usize,
    columns: Vec<String>,
    #[serde(serialize_with = "serialize_records")]
    preview: Table,
    /// Uploaded data is never merged into the shared dataset
    merged: bool,
}

/// All API routes with request logging and permissive CORS
///
/// # Arguments
/// * `state` - Shared query engine handed to every handler
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/overview", get(get_overview))
        .route("/api/schema", get(get_schema))
        .route("/api/industries", get(get_industries))
        .route("/api/stocks", get(get_stocks))
        .route("/api/years/:code", get(get_years))
        .route("/api/query", get(get_query))
        .route("/api/trend", get(get_trend))
        .route("/api/industry-ranking", get(get_industry_ranking))
        .route("/api/distribution", get(get_distribution))
        .route("/api/export", get(export_selection))
        .route("/api/chart/:kind", get(get_chart))
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .layer(middleware::from_fn(log_request))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Load the dataset once and serve the API on `settings.server.bind` until the
/// process is stopped
pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = Dataset::bootstrap(&settings)?;
    for warning in &dataset.provenance().warnings {
        log::warn!("{}", warning);
    }
    let engine = dataset.engine(Arc::new(settings.schema.clone()));
    log::info!("serving {} rows", engine.table().len());

    let app = router(Arc::new(AppState { engine }));

    let listener = TcpListener::bind(&settings.server.bind).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    log::info!(
        "{} {} -> {} in {:?}",
        method,
        uri,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

async fn get_overview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.overview())
}

async fn get_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.schema().entries())
}

async fn get_industries(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "available": state.engine.has_industry_names(),
        "industries": state.engine.industries(),
    }))
}

async fn get_stocks(
    Query(params): Query<StocksQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let filter = IndustryFilter::from_choice(params.industry.as_deref());
    Json(state.engine.stock_options(&filter))
}

async fn get_years(
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    let code = zero_pad(&code);
    let years = state.engine.years_for(&code);
    if years.is_empty() {
        return Err(AppError::NotFound(format!("stock {}", code)));
    }
    Ok(Json(json!({ "stock": code, "years": years })))
}

async fn get_query(
    Query(params): Query<SelectionQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    let selection = params.selection()?;
    let result = state.engine.query(&selection);
    if result.is_empty() {
        return Err(AppError::NotFound(format!(
            "no data for stock {} in {}",
            selection.stock_code, selection.year
        )));
    }
    Ok(Json(result))
}

async fn get_trend(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.yearly_composite_means())
}

async fn get_industry_ranking(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.industry_ranking())
}

async fn get_distribution(
    Query(params): Query<DistributionQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    let bins = params.bins.unwrap_or(DEFAULT_DISTRIBUTION_BINS);
    if !(1..=MAX_DISTRIBUTION_BINS).contains(&bins) {
        return Err(AppError::BadRequest(format!(
            "bins must be between 1 and {}",
            MAX_DISTRIBUTION_BINS
        )));
    }
    Ok(Json(state.engine.composite_distribution(bins)))
}

async fn export_selection(
    Query(params): Query<ExportQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let selection = params.selection.selection()?;
    let format = params
        .format
        .as_deref()
        .unwrap_or_default()
        .parse::<ExportFormat>()
        .map_err(AppError::BadRequest)?;

    let result = state.engine.query(&selection);
    if result.is_empty() {
        return Err(AppError::NotFound(format!("stock {}", selection.stock_code)));
    }

    let bytes = downloader::export(&result.subset, format)?;
    let file_name = downloader::export_file_name(&result.company_name, &selection.year, format);
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&file_name)
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Bytes::from(bytes),
    )
        .into_response())
}

async fn get_chart(
    Path(kind): Path<String>,
    Query(params): Query<SelectionQuery>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let kind = kind.parse::<ChartKind>().map_err(AppError::NotFound)?;
    let selection = if kind.needs_selection() {
        Some(params.selection()?)
    } else {
        None
    };

    let engine = state.engine.clone();
    let png = tokio::task::spawn_blocking(move || graph::render(&engine, kind, selection.as_ref()))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(([(header::CONTENT_TYPE, "image/png")], Bytes::from(png)).into_response())
}

async fn upload_file(mut multipart: Multipart) -> AppResult<Json<UploadSummary>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let table = loader::load_upload(&file_name, bytes.to_vec())
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        log::info!("parsed upload {} ({} rows)", file_name, table.len());

        let preview_rows = table.len().min(UPLOAD_PREVIEW_ROWS);
        let preview = table.filter(|row| row.index() < preview_rows);
        return Ok(Json(UploadSummary {
            file_name,
            rows: table.len(),
            columns: table.columns().to_vec(),
            preview,
            merged: false,
        }));
    }

    Err(AppError::BadRequest("no file field in upload".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::sample_table;
    use crate::schema::IndicatorSchema;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let engine = QueryEngine::new(Arc::new(sample_table()), Arc::new(IndicatorSchema::default()));
        router(Arc::new(AppState { engine }))
    }

    async fn get(uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = get(uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn overview_counts_sample_data() {
        let (status, body) = get_json("/api/overview").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stock_count"], 2);
        assert_eq!(body["row_count"], 4);
        assert!(body["industry_count"].is_null());
    }

    #[tokio::test]
    async fn query_returns_rows_and_scores() {
        let (status, body) = get_json("/api/query?stock=1&year=2021").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["company_name"], "平安银行");
        assert_eq!(body["subset"].as_array().unwrap().len(), 1);
        assert_eq!(body["subset"][0]["股票代码"], "000001");
        assert_eq!(body["composite"], 80.0);
    }

    #[tokio::test]
    async fn query_errors_are_json() {
        let (status, body) = get_json("/api/query?year=2021").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let (status, body) = get_json("/api/query?stock=999999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("999999"));

        let (status, _) = get_json("/api/query?stock=000001&year=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn years_for_known_and_unknown_stock() {
        let (status, body) = get_json("/api/years/000002").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["years"], json!([2020, 2021]));

        let (status, _) = get_json("/api/years/123456").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn csv_export_is_an_attachment() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/export?stock=000002&year=all&format=csv")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename*=UTF-8''"));
        assert!(disposition.ends_with(".csv"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(downloader::UTF8_BOM));
        assert_eq!(body.iter().filter(|&&b| b == b'\n').count(), 3);
    }

    #[tokio::test]
    async fn unknown_chart_kind_is_not_found() {
        let (status, _) = get("/api/chart/pie").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get("/api/chart/trend").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn distribution_rejects_out_of_range_bins() {
        let (status, body) = get_json("/api/distribution?bins=4").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 4);

        let (status, _) = get_json("/api/distribution?bins=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json("/api/distribution?bins=10000000000").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("1000"));

        let uri = format!("/api/distribution?bins={}", MAX_DISTRIBUTION_BINS);
        let (status, body) = get_json(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), MAX_DISTRIBUTION_BINS);
    }

    #[tokio::test]
    async fn schema_lists_dimensions_then_composite() {
        let (status, body) = get_json("/api/schema").await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0]["key"], "strategy");
        assert_eq!(entries[0]["fields"].as_array().unwrap().len(), 4);
        assert_eq!(entries[4]["fields"], json!(["数字化转型指数"]));
    }

    #[tokio::test]
    async fn upload_is_summarized_not_merged() {
        let boundary = "dti-test-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"extra.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n股票代码,年份\r\n1,2022\r\n2,2022\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let app = app();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary: serde_json::Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(summary["rows"], 2);
        assert_eq!(summary["merged"], false);

        let response = app
            .oneshot(Request::builder().uri("/api/overview").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let overview: serde_json::Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(overview["row_count"], 4);
    }
}
