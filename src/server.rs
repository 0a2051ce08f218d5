use crate::aggregate::PopulationFloor;
use crate::config::AppConfig;
use crate::data::Dataset;
use crate::error::DashboardError;
use crate::period::{self, Period};
use crate::projection::Reprojector;
use crate::query::{self, Selection};
use crate::render::{self, MapScene, MapView};
use crate::types::AggregatedRate;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use geo::algorithm::contains::Contains;
use geo::{BoundingRect, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

const DASHBOARD_PAGE: &str = include_str!("dashboard.html");

// Wrapper for RTree indexing
pub struct AreaIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub dataset: Arc<Dataset>,
    pub tree: RTree<AreaIndex>,
    pub config: AppConfig,
    pub reprojector: Reprojector,
}

impl AppState {
    pub fn new(config: AppConfig, dataset: Arc<Dataset>) -> Self {
        let tree_items: Vec<AreaIndex> = dataset.municipalities.iter().enumerate()
            .filter_map(|(i, m)| {
                let rect = m.polygon.bounding_rect()?;
                Some(AreaIndex {
                    index: i,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();
        info!(features = tree_items.len(), "spatial index built");

        Self {
            tree: RTree::bulk_load(tree_items),
            reprojector: Reprojector::new(config.input.source_crs),
            dataset,
            config,
        }
    }
}

#[derive(Serialize)]
pub struct ViewInfo {
    slug: &'static str,
    subheading: &'static str,
}

#[derive(Serialize)]
pub struct OptionsResponse {
    crime_types: Vec<String>,
    anchors: Vec<Period>,
    latest_period: Option<Period>,
    default_crime: Option<String>,
    default_anchor: Option<Period>,
    population_floor: u64,
    views: Vec<ViewInfo>,
}

#[derive(Serialize)]
pub struct RateRow {
    clave: String,
    state_name: Option<String>,
    municipality_name: Option<String>,
    #[serde(flatten)]
    rate: AggregatedRate,
}

#[derive(Serialize)]
pub struct RatesResponse {
    crime: String,
    title: String,
    anchor: Period,
    window: Vec<Period>,
    floor_enforced: bool,
    rows: Vec<RateRow>,
}

#[derive(Deserialize)]
pub struct PointQuery {
    lon: f64,
    lat: f64,
    crime: Option<String>,
    anchor: Option<String>,
    floor: Option<bool>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    id: String,
    #[serde(flatten)]
    row: RateRow,
    /// Whether the municipality passes the population filter and is filled on the map.
    shown: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/options", get(options_handler))
        .route("/api/rates", get(rates_handler))
        .route("/api/query", get(query_handler))
        .route("/map/{file}", get(map_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, dataset: Dataset) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = Arc::new(AppState::new(config, Arc::new(dataset)));
    let app = router(state);

    info!(%addr, "dashboard listening");
    let listener = tokio::net::TcpListener::bind(addr).await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn row(dataset: &Dataset, rate: AggregatedRate) -> RateRow {
    let census = dataset.population.get(&rate.key);
    RateRow {
        clave: rate.key.to_string(),
        state_name: census.map(|p| p.state_name.clone()),
        municipality_name: census.map(|p| p.municipality_name.clone()),
        rate,
    }
}

async fn dashboard_handler() -> Html<&'static str> {
    Html(DASHBOARD_PAGE)
}

async fn options_handler(State(state): State<Arc<AppState>>) -> Json<OptionsResponse> {
    let dataset = &state.dataset;
    let (default_crime, default_anchor) = query::defaults(dataset);
    Json(OptionsResponse {
        crime_types: dataset.crimes.crime_types.clone(),
        anchors: period::selectable_anchors(&dataset.periods).to_vec(),
        latest_period: period::latest_period(&dataset.periods),
        default_crime: default_crime.map(str::to_string),
        default_anchor,
        population_floor: state.config.render.population_floor,
        views: MapView::ALL.iter()
            .map(|v| ViewInfo { slug: v.slug(), subheading: v.subheading() })
            .collect(),
    })
}

async fn rates_handler(
    State(state): State<Arc<AppState>>,
    Query(selection): Query<Selection>,
) -> Result<Json<RatesResponse>, DashboardError> {
    let dataset = &state.dataset;
    let resolved = query::resolve(dataset, &selection, state.config.render.population_floor)?;
    let rows = query::run(dataset, &resolved)?
        .into_iter()
        .map(|r| row(dataset, r))
        .collect();

    Ok(Json(RatesResponse {
        title: render::title(&resolved.crime),
        floor_enforced: matches!(resolved.floor, PopulationFloor::Enforced(_)),
        crime: resolved.crime,
        anchor: resolved.anchor,
        window: resolved.window,
        rows,
    }))
}

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
    Query(selection): Query<Selection>,
) -> Result<impl IntoResponse, DashboardError> {
    let view: MapView = file.parse()?;
    let dataset = &state.dataset;
    let resolved = query::resolve(dataset, &selection, state.config.render.population_floor)?;
    let rates = query::run(dataset, &resolved)?;

    let render_config = &state.config.render;
    let scene = MapScene::new(dataset, &resolved.crime, &rates, render_config.no_data_color.clone());
    let svg = scene.render(view, render_config.width, render_config.height);

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointQuery>,
) -> Result<Json<Option<QueryResponse>>, DashboardError> {
    let coord = state.reprojector.project_geographic(params.lon, params.lat);
    let point = Point::from(coord);
    let envelope = AABB::from_point([coord.x, coord.y]);

    // Query RTree
    let hit = state.tree.locate_in_envelope_intersecting(&envelope)
        .filter_map(|candidate| state.dataset.municipalities.get(candidate.index))
        .find(|m| m.polygon.contains(&point));
    let Some(municipality) = hit else {
        return Ok(Json(None));
    };

    let selection = Selection { crime: params.crime, anchor: params.anchor, floor: params.floor };
    let dataset = &state.dataset;
    let resolved = query::resolve(dataset, &selection, state.config.render.population_floor)?;
    let found = query::aggregate_all(dataset, &resolved)?
        .into_iter()
        .find(|r| r.key == municipality.key);
    // Municipalities without crimes in the window are not on the map.
    let shown = found.as_ref().is_some_and(|r| resolved.floor.admits(r.total_population));
    let rate = found.unwrap_or_else(|| {
        let total_population = dataset.population.get(&municipality.key)
            .and_then(|p| p.total_population);
        AggregatedRate {
            key: municipality.key,
            summed_count: 0,
            total_population,
            rate_per_100k: None,
        }
    });

    Ok(Json(Some(QueryResponse {
        id: municipality.id.clone(),
        shown,
        row: row(dataset, rate),
    })))
}
