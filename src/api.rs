// REST API - axum router over the shared SQLite connection

use crate::db::{self, ApartmentTrade, TradeFilter, TrendPoint, User};
use crate::error::RecommendError;
use crate::recommend::{self, BudgetRange, Recommendations};
use crate::trends::{self, MonthlyAverage, TrendSummary, DEFAULT_LOOKBACK_YEARS, MAX_LOOKBACK_YEARS};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 500;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db.lock().map_err(|_| ApiError::Internal {
            context: "Database connection is unavailable",
            cause: anyhow::anyhow!("connection mutex poisoned"),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{context}: {cause:#}")]
    Internal {
        context: &'static str,
        cause: anyhow::Error,
    },
}

impl ApiError {
    fn internal(context: &'static str) -> impl FnOnce(anyhow::Error) -> ApiError {
        move |cause| ApiError::Internal { context, cause }
    }
}

impl From<RecommendError> for ApiError {
    fn from(e: RecommendError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal { context, cause } => {
                error!("{}: {:#}", context, cause);
                (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Query parameters
// ============================================================================

// Everything arrives as text so a bad number becomes our 400 (or a default),
// not an extractor rejection.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sgg_cd: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationQuery {
    pub budget: Option<String>,
    pub min_budget: Option<String>,
    pub max_budget: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendQuery {
    pub apt_name: Option<String>,
    pub sgg_cd: Option<String>,
    pub exclu_use_ar: Option<String>,
    pub years: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Positive integer or the default
pub fn page_param(raw: Option<&str>, default: u32) -> u32 {
    non_blank(raw)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|&n| n >= 1)
        .unwrap_or(default)
}

/// Validated trend lookup
#[derive(Debug, Clone, PartialEq)]
pub struct TrendRequest {
    pub apt_name: String,
    pub sgg_cd: String,
    pub exclu_use_ar: f64,
    pub years: u32,
}

impl TrendQuery {
    pub fn validate(&self) -> Result<TrendRequest, ApiError> {
        let (Some(apt_name), Some(sgg_cd), Some(area)) = (
            non_blank(self.apt_name.as_deref()),
            non_blank(self.sgg_cd.as_deref()),
            non_blank(self.exclu_use_ar.as_deref()),
        ) else {
            return Err(ApiError::BadRequest(
                "aptName, sggCd, and excluUseAr are required query parameters.".to_string(),
            ));
        };

        let exclu_use_ar = area
            .parse::<f64>()
            .ok()
            .filter(|a| a.is_finite())
            .ok_or_else(|| ApiError::BadRequest("excluUseAr must be a number.".to_string()))?;

        let years = match non_blank(self.years.as_deref()) {
            None => DEFAULT_LOOKBACK_YEARS,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|y| (1..=MAX_LOOKBACK_YEARS).contains(y))
                .ok_or_else(|| {
                    ApiError::BadRequest(format!("years must be between 1 and {}.", MAX_LOOKBACK_YEARS))
                })?,
        };

        Ok(TrendRequest {
            apt_name: apt_name.to_string(),
            sgg_cd: sgg_cd.to_string(),
            exclu_use_ar,
            years,
        })
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
    pub total_records: i64,
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub data: Vec<ApartmentTrade>,
    pub meta: PageMeta,
}

#[derive(Debug, Serialize)]
pub struct TrendOverview {
    pub points: Vec<MonthlyAverage>,
    pub summary: Option<TrendSummary>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /
async fn root() -> &'static str {
    "Apartment Finder API is running"
}

/// GET /api/health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    })
}

/// GET /api/apartments/trades
async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> ApiResult<TradesResponse> {
    let page = page_param(query.page.as_deref(), DEFAULT_PAGE);
    let limit = page_param(query.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT);
    let filter = TradeFilter {
        sgg_cd: non_blank(query.sgg_cd.as_deref()).map(str::to_string),
        page,
        limit,
    };

    let conn = state.conn()?;
    let data = db::list_trades(&conn, &filter)
        .map_err(ApiError::internal("Error fetching apartment trades"))?;
    let total_records = db::count_trades_filtered(&conn, filter.sgg_cd.as_deref())
        .map_err(ApiError::internal("Error fetching apartment trades"))?;

    let limit_wide = i64::from(limit);
    Ok(Json(TradesResponse {
        data,
        meta: PageMeta {
            page,
            limit,
            total_pages: (total_records + limit_wide - 1) / limit_wide,
            total_records,
        },
    }))
}

/// GET /api/apartments/recommendations
async fn recommendations(
    State(state): State<AppState>,
    Query(query): Query<RecommendationQuery>,
) -> ApiResult<Recommendations> {
    let range = BudgetRange::from_params(
        query.budget.as_deref(),
        query.min_budget.as_deref(),
        query.max_budget.as_deref(),
    )?;
    let top_n = recommend::top_n_from_param(query.limit.as_deref());

    let conn = state.conn()?;
    let result = recommend::recommend_from_db(&conn, range, top_n)
        .map_err(ApiError::internal("Error fetching recommendations"))?;
    Ok(Json(result))
}

fn load_trend(state: &AppState, query: &TrendQuery, today: NaiveDate) -> Result<Vec<TrendPoint>, ApiError> {
    let request = query.validate()?;
    let since = trends::lookback_start(today, request.years);

    let conn = state.conn()?;
    db::trade_trend(&conn, &request.apt_name, &request.sgg_cd, request.exclu_use_ar, since)
        .map_err(ApiError::internal("Error fetching trend data"))
}

/// GET /api/apartments/trends
async fn trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> ApiResult<Vec<TrendPoint>> {
    load_trend(&state, &query, Local::now().date_naive()).map(Json)
}

/// GET /api/apartments/trends/monthly
async fn monthly_trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> ApiResult<TrendOverview> {
    let points = load_trend(&state, &query, Local::now().date_naive())?;
    Ok(Json(TrendOverview {
        points: trends::monthly_average(&points),
        summary: trends::summarize(&points),
    }))
}

/// GET /api/users
async fn users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    let conn = state.conn()?;
    let users = db::list_users(&conn).map_err(ApiError::internal("Error fetching users"))?;
    Ok(Json(users))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/apartments/trades", get(list_trades))
        .route("/apartments/recommendations", get(recommendations))
        .route("/apartments/trends", get(trend))
        .route("/apartments/trends/monthly", get(monthly_trend))
        .route("/users", get(users));

    let mut app = Router::new().route("/", get(root)).nest("/api", api_routes);

    if let Some(dir) = static_dir {
        app = app.nest_service("/static", ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{create_test_trade, test_conn};
    use crate::grades::seed_grades_and_definitions;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Duration;
    use serde_json::Value;
    use tower::ServiceExt;

    const EOK: i64 = 100_000_000;

    fn app_with(conn: Connection) -> Router {
        router(AppState::new(conn), None)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn days_ago(days: i64) -> String {
        (Local::now().date_naive() - Duration::days(days))
            .format("%Y-%m-%d")
            .to_string()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let app = app_with(test_conn());
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, body) = get_json(app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_trades_paging() {
        let conn = test_conn();
        let trades: Vec<_> = (1..=25)
            .map(|day| create_test_trade("래미안", "11680", EOK + day, &format!("2024-01-{:02}", day), 84.0))
            .collect();
        db::insert_trades(&conn, &trades).unwrap();
        db::insert_trades(&conn, &[create_test_trade("자이", "11440", EOK, "2024-02-01", 59.0)]).unwrap();
        let app = app_with(conn);

        let (status, body) = get_json(app.clone(), "/api/apartments/trades").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 20);
        assert_eq!(body["meta"]["totalRecords"], 26);
        assert_eq!(body["meta"]["totalPages"], 2);
        assert_eq!(body["data"][0]["dealDate"], "2024-02-01");
        assert!(body["data"][0]["dealAmount"].is_string());

        let (_, body) = get_json(app.clone(), "/api/apartments/trades?page=2&limit=10&sggCd=11680").await;
        assert_eq!(body["meta"]["totalRecords"], 25);
        assert_eq!(body["meta"]["totalPages"], 3);
        assert_eq!(body["data"][0]["dealDate"], "2024-01-15");

        let (_, body) = get_json(app, "/api/apartments/trades?page=abc&limit=-5").await;
        assert_eq!(body["meta"]["page"], 1);
        assert_eq!(body["meta"]["limit"], 20);
    }

    #[test]
    fn test_page_param() {
        assert_eq!(page_param(None, 20), 20);
        assert_eq!(page_param(Some("0"), 20), 20);
        assert_eq!(page_param(Some("7"), 20), 7);
        assert_eq!(page_param(Some("1.5"), 1), 1);
    }

    #[tokio::test]
    async fn test_recommendations() {
        let conn = test_conn();
        seed_grades_and_definitions(&conn).unwrap();
        db::insert_trades(
            &conn,
            &[
                create_test_trade("래미안", "11680", 9 * EOK, "2024-03-01", 84.0),
                create_test_trade("자이", "11680", 12 * EOK, "2024-03-02", 84.0),
            ],
        )
        .unwrap();
        let app = app_with(conn);

        let (status, body) = get_json(app.clone(), "/api/apartments/recommendations?budget=1000000000").await;
        assert_eq!(status, StatusCode::OK);
        let grades = body.as_object().unwrap();
        assert_eq!(grades.len(), 4);
        assert_eq!(body["1급지"][0]["aptName"], "래미안");
        assert_eq!(body["1급지"][0]["dealAmount"], "900000000");
        assert_eq!(body["1급지"][0]["sggNm"], "서울특별시 강남구");
        assert_eq!(body["4급지"], Value::Array(vec![]));

        let (status, body) = get_json(app.clone(), "/api/apartments/recommendations").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "budget or minBudget and maxBudget are required query parameters."
        );

        let (status, _) =
            get_json(app, "/api/apartments/recommendations?minBudget=5&maxBudget=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_trends_window_and_filters() {
        let conn = test_conn();
        db::insert_trades(
            &conn,
            &[
                create_test_trade("은마", "11680", 20 * EOK, &days_ago(30), 76.79),
                create_test_trade("은마", "11680", 19 * EOK, &days_ago(200), 76.79),
                create_test_trade("은마", "11680", 15 * EOK, &days_ago(365 * 3), 76.79),
                create_test_trade("은마", "11680", 25 * EOK, &days_ago(10), 84.43),
                create_test_trade("은마", "11650", 18 * EOK, &days_ago(10), 76.79),
            ],
        )
        .unwrap();
        let app = app_with(conn);
        let name = urlencoding::encode("은마");

        let uri = format!("/api/apartments/trends?aptName={}&sggCd=11680&excluUseAr=76.79", name);
        let (status, body) = get_json(app.clone(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        let points = body.as_array().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["dealAmount"], "1900000000");
        assert_eq!(points[1]["dealDate"], days_ago(30));

        let uri = format!("/api/apartments/trends?aptName={}&sggCd=11680&excluUseAr=76.79&years=5", name);
        let (_, body) = get_json(app.clone(), &uri).await;
        assert_eq!(body.as_array().unwrap().len(), 3);

        let uri = format!("/api/apartments/trends/monthly?aptName={}&sggCd=11680&excluUseAr=76.79", name);
        let (status, body) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["count"], 2);
        assert_eq!(body["summary"]["maxAmount"], "2000000000");
    }

    #[tokio::test]
    async fn test_trends_rejects_missing_or_bad_params() {
        let app = app_with(test_conn());

        let (status, body) = get_json(app.clone(), "/api/apartments/trends?sggCd=11680").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("required"));

        let (status, _) =
            get_json(app.clone(), "/api/apartments/trends?aptName=A&sggCd=11680&excluUseAr=big").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            get_json(app, "/api/apartments/trends?aptName=A&sggCd=11680&excluUseAr=84&years=99").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_users() {
        let conn = test_conn();
        db::insert_user(&conn, "kim@example.com", Some("김철수")).unwrap();
        let (status, body) = get_json(app_with(conn), "/api/users").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["email"], "kim@example.com");
    }
}
