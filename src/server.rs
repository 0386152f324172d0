use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
};
use askama::Template;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::chart::{self, PlotPayload};
use crate::config::Config;
use crate::error::PipelineError;
use crate::forecast::aggregate::{GlobalSeries, StackedSeries};
use crate::forecast::map::{MapRow, Selection};
use crate::forecast::time_select::{SliderRange, TimeSelection, floor_to_hour};
use crate::pipeline::{CountryView, Snapshot};
use crate::quartz::QuartzClient;
use crate::reference::capacity::CapacityEntry;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    provider: Arc<QuartzClient>,
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
}

impl AppState {
    async fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().await.clone()
    }
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, StatusCode>;

/// `EmptyDataset` is an answer, anything else is a server error
fn pipeline_response<T>(result: Result<T, PipelineError>) -> ApiResult<T> {
    match result {
        Ok(data) => Ok(Json(ApiResponse::success(data))),
        Err(PipelineError::EmptyDataset) => {
            Ok(Json(ApiResponse::error(PipelineError::EmptyDataset.to_string())))
        }
        Err(e) => {
            error!("Pipeline error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
struct MapQuery {
    /// Hours ahead of the current hour (default: 0)
    hours: Option<f64>,
    #[serde(default)]
    normalized: bool,
}

#[derive(Deserialize)]
struct StackedQuery {
    top_n: Option<usize>,
}

#[derive(Serialize)]
struct GlobalResponse {
    total_capacity_gw: f64,
    generated_at: String,
    series: GlobalSeries,
    plot: PlotPayload,
}

#[derive(Serialize)]
struct StackedResponse {
    top_n: usize,
    series: StackedSeries,
    plot: PlotPayload,
}

#[derive(Serialize)]
struct MapResponse {
    timestamp: String,
    label: String,
    /// Summed power of all countries at `timestamp`
    global_power_gw: Option<f64>,
    offset_hours: f64,
    slider: Option<SliderRange>,
    unit: &'static str,
    rows: Vec<MapRow>,
    plot: PlotPayload,
}

#[derive(Serialize)]
struct SelectResponse {
    selection: Selection,
    country: Option<CountryResponse>,
}

#[derive(Serialize)]
struct CountryResponse {
    view: CountryView,
    plot: PlotPayload,
}

impl From<CountryView> for CountryResponse {
    fn from(view: CountryView) -> Self {
        let plot = chart::country_chart(&view);
        Self { view, plot }
    }
}

#[derive(Serialize)]
struct CapacityListing {
    total_capacity_gw: f64,
    countries: Vec<CapacityRow>,
}

#[derive(Serialize)]
struct CapacityRow {
    label: String,
    #[serde(flatten)]
    entry: CapacityEntry,
}

#[derive(Serialize)]
struct RefreshResponse {
    generated_at: String,
    rows: usize,
    skipped: usize,
}

fn selected_time_text(selection: &TimeSelection) -> String {
    format!(
        "{} | {} UTC",
        selection.label(),
        selection.timestamp.format("%Y-%m-%d %H:%M")
    )
}

/// GET /api/v1/global
async fn get_global(State(state): State<AppState>) -> ApiResult<GlobalResponse> {
    let snapshot = state.current().await;

    pipeline_response(snapshot.require_data().map(|()| {
        let series = snapshot.global_series();
        GlobalResponse {
            total_capacity_gw: snapshot.capacities.total(),
            generated_at: snapshot.generated_at.to_rfc3339(),
            plot: chart::global_chart(&series),
            series,
        }
    }))
}

/// GET /api/v1/stacked?top_n=N
async fn get_stacked(
    State(state): State<AppState>,
    Query(query): Query<StackedQuery>,
) -> ApiResult<StackedResponse> {
    let snapshot = state.current().await;
    let top_n = query.top_n.unwrap_or(state.config.top_n);

    pipeline_response(snapshot.require_data().map(|()| {
        let series = snapshot.stacked_series(top_n);
        StackedResponse {
            top_n,
            plot: chart::stacked_chart(&series),
            series,
        }
    }))
}

/// GET /api/v1/map?hours=H&normalized=true
async fn get_map(
    State(state): State<AppState>,
    Query(query): Query<MapQuery>,
) -> ApiResult<MapResponse> {
    let snapshot = state.current().await;
    let reference = floor_to_hour(Utc::now());

    pipeline_response(
        snapshot
            .map_frame(reference, query.hours.unwrap_or(0.0), query.normalized)
            .map(|(selection, frame)| MapResponse {
                timestamp: frame.timestamp.to_rfc3339(),
                label: selection.label(),
                global_power_gw: snapshot.global_series().get(frame.timestamp),
                offset_hours: selection.offset_hours,
                slider: snapshot.slider_range(reference),
                unit: frame.unit(),
                plot: chart::map_chart(&frame),
                rows: frame.rows,
            }),
    )
}

/// GET /api/v1/map/select/{index}?hours=H
/// Resolve a clicked map location to the country page data
async fn select_map_point(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Query(query): Query<MapQuery>,
) -> ApiResult<SelectResponse> {
    let snapshot = state.current().await;
    let reference = floor_to_hour(Utc::now());

    let (_, frame) = match snapshot.map_frame(reference, query.hours.unwrap_or(0.0), false) {
        Ok(result) => result,
        Err(e) => return pipeline_response(Err(e)),
    };
    let selection = frame
        .select(index, &snapshot.capacities)
        .ok_or(StatusCode::NOT_FOUND)?;

    if let Selection::NoForecast(code) = &selection {
        info!("No forecast data available for the selected country {}", code);
    }
    let country = snapshot.country_view(&selection).map(CountryResponse::from);

    Ok(Json(ApiResponse::success(SelectResponse { selection, country })))
}

/// GET /api/v1/countries/{code}
async fn get_country(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<CountryResponse> {
    let snapshot = state.current().await;
    let selection = snapshot.selection_for_code(&code.to_ascii_uppercase());

    snapshot
        .country_view(&selection)
        .map(|view| Json(ApiResponse::success(CountryResponse::from(view))))
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/v1/capacities
async fn get_capacities(State(state): State<AppState>) -> ApiResult<CapacityListing> {
    let snapshot = state.current().await;
    let countries = snapshot
        .capacities
        .entries()
        .map(|entry| CapacityRow {
            label: entry.label(),
            entry: entry.clone(),
        })
        .collect();

    Ok(Json(ApiResponse::success(CapacityListing {
        total_capacity_gw: snapshot.capacities.total(),
        countries,
    })))
}

/// POST /api/v1/refresh
/// Re-run the whole pipeline and swap the snapshot in when it is done
async fn refresh(State(state): State<AppState>) -> ApiResult<RefreshResponse> {
    let fresh = Snapshot::build(&state.config, state.provider.as_ref())
        .await
        .map_err(|e| {
            error!("Refresh failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let response = RefreshResponse {
        generated_at: fresh.generated_at.to_rfc3339(),
        rows: fresh.table.len(),
        skipped: fresh.skipped.len(),
    };
    *state.snapshot.write().await = Arc::new(fresh);

    Ok(Json(ApiResponse::success(response)))
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    total_capacity: String,
    countries_with_data: usize,
    has_data: bool,
    stacked: bool,
    normalized: bool,
    hours: f64,
    slider_max: f64,
    slider_step: f64,
    selected_time: Option<String>,
    chart_data: String,
    chart_layout: String,
    map_data: String,
    map_layout: String,
}

#[derive(Deserialize)]
struct DashboardQuery {
    hours: Option<f64>,
    #[serde(default)]
    normalized: bool,
    #[serde(default)]
    stacked: bool,
}

/// GET /
async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let snapshot = state.current().await;
    let html = render_dashboard(&snapshot, state.config.top_n, &query)?;
    Ok(Html(html))
}

fn render_dashboard(
    snapshot: &Snapshot,
    top_n: usize,
    query: &DashboardQuery,
) -> Result<String, StatusCode> {
    let reference = floor_to_hour(Utc::now());
    let hours = query.hours.unwrap_or(0.0);
    let has_data = snapshot.require_data().is_ok();

    let chart = match (has_data, query.stacked) {
        (false, _) => None,
        (true, true) => Some(chart::stacked_chart(&snapshot.stacked_series(top_n))),
        (true, false) => Some(chart::global_chart(&snapshot.global_series())),
    };

    let (selected_time, map) = match snapshot.map_frame(reference, hours, query.normalized) {
        Ok((selection, frame)) => (
            Some(selected_time_text(&selection)),
            Some(chart::map_chart(&frame)),
        ),
        Err(PipelineError::EmptyDataset) => (None, None),
        Err(e) => {
            error!("Map projection failed: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let slider = snapshot.slider_range(reference);

    let template = DashboardTemplate {
        total_capacity: format!("{:.2}", snapshot.capacities.total()),
        countries_with_data: snapshot.table.country_count(),
        has_data,
        stacked: query.stacked,
        normalized: query.normalized,
        hours,
        slider_max: slider.map(|s| s.max).unwrap_or(0.0),
        slider_step: slider.map(|s| s.step).unwrap_or(1.0),
        selected_time,
        chart_data: chart
            .as_ref()
            .map(|c| c.data.to_string())
            .unwrap_or_else(|| "[]".to_string()),
        chart_layout: chart
            .as_ref()
            .map(|c| c.layout.to_string())
            .unwrap_or_else(|| "{}".to_string()),
        map_data: map.as_ref().map(|m| m.data.to_string()).unwrap_or_else(|| "[]".to_string()),
        map_layout: map.as_ref().map(|m| m.layout.to_string()).unwrap_or_else(|| "{}".to_string()),
    };

    template.render().map_err(|e| {
        error!("Template rendering error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/api/v1/global", get(get_global))
        .route("/api/v1/stacked", get(get_stacked))
        .route("/api/v1/map", get(get_map))
        .route("/api/v1/map/select/{index}", get(select_map_point))
        .route("/api/v1/countries/{code}", get(get_country))
        .route("/api/v1/capacities", get(get_capacities))
        .route("/api/v1/refresh", post(refresh))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let provider = QuartzClient::new(config.provider_url.clone(), config.provider_timeout)?;
    let snapshot = Snapshot::build(&config, &provider).await?;

    let bind_addr = config.bind_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        provider: Arc::new(provider),
        snapshot: Arc::new(RwLock::new(Arc::new(snapshot))),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server running on http://{}", bind_addr);
    info!("Endpoints: / /health /api/v1/{{global,stacked,map,map/select/:index,countries/:code,capacities,refresh}}");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
