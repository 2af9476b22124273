// devdash - Caching API proxy for a weather, GitHub, and AI developer dashboard
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::cache::{cache_key, CacheKind, ResponseCache};
use crate::clock::Clock;
use crate::error::ClientError;
use crate::gemini::{GeminiClient, InsightMode, InsightRequest};
use crate::github::{GitHubClient, NormalizedIssue, NormalizedProject, RepoRef, Since, DEFAULT_ISSUE_LIMIT};
use crate::metrics::DashboardMetrics;
use crate::projects::{default_curated, CuratedRepo, ProjectFinder, ProjectQuery, DEFAULT_PROJECT_COUNT};
use crate::weather::{CombinedWeatherData, CurrentWeather, Units, WeatherClient, DEFAULT_FORECAST_DAYS};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const OPENMETRICS_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";
const WEATHER_ENDPOINT: &str = "/api/weather";
const WEATHER_CURRENT_ENDPOINT: &str = "/api/weather/current";
const SEARCH_ENDPOINT: &str = "/api/github/search";
const DEFAULT_SEARCH_COUNT: usize = 10;
const MAX_FORECAST_DAYS: usize = 7;

/// Upstream service behind an endpoint, which decides how some errors are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Weather,
    GitHub,
    Gemini,
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::GitHub => "github",
            Self::Gemini => "gemini",
        }
    }
}

/// HTTP status used to report `err` from an endpoint backed by `service`.
pub fn status_for(err: &ClientError, service: Service) -> StatusCode {
    match err {
        ClientError::Validation(_) => StatusCode::BAD_REQUEST,
        // The Gemini key belongs to this server, not to the caller
        ClientError::Auth(_) if service == Service::Gemini => StatusCode::INTERNAL_SERVER_ERROR,
        ClientError::Auth(_) => StatusCode::UNAUTHORIZED,
        ClientError::NotFound(_) => StatusCode::NOT_FOUND,
        ClientError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        ClientError::Upstream(status, _) if status.is_client_error() || status.is_server_error() => *status,
        ClientError::Upstream(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
        ClientError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClientError::MalformedResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ClientError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ClientError::Batch(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Error envelope returned by every endpoint: `{"error": ..., "details": ...}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// Log a failed operation and convert it into a response for the caller.
    pub fn new(service: Service, operation: &str, target: &str, err: ClientError) -> Self {
        let status = status_for(&err, service);
        if status.is_server_error() {
            tracing::error!(message = "request failed", operation = operation, target = %target, error = %err);
        } else {
            tracing::warn!(message = "request failed", operation = operation, target = %target, error = %err);
        }

        let error = match err {
            ClientError::Configuration(_) => "service is not configured".to_owned(),
            ClientError::Validation(_) => "invalid request".to_owned(),
            _ => format!("failed to {}", operation),
        };

        ApiError {
            status,
            body: ErrorBody {
                error,
                details: err.to_string(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub repositories: Vec<NormalizedProject>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IssuesResponse {
    pub issues: Vec<NormalizedIssue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuestionResponse {
    pub message: String,
    pub question: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct WeatherParams {
    city: Option<String>,
    units: Option<String>,
    days: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct GitHubParams {
    count: Option<String>,
    filter: Option<String>,
    language: Option<String>,
    since: Option<String>,
    topic: Option<String>,
    repo: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct SearchParams {
    q: Option<String>,
    count: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct IssuesParams {
    repo: Option<String>,
}

/// Everything the handlers need: upstream clients, caches, and metrics.
///
/// Created once when the server starts and shared between all requests.
pub struct RequestContext {
    weather: WeatherClient,
    github: GitHubClient,
    gemini: GeminiClient,
    curated: Vec<CuratedRepo>,
    registry: Registry,
    metrics: DashboardMetrics,
    current_cache: ResponseCache<CurrentWeather>,
    combined_cache: ResponseCache<CombinedWeatherData>,
    search_cache: ResponseCache<Vec<NormalizedProject>>,
    details_cache: ResponseCache<NormalizedProject>,
    trending_cache: ResponseCache<Vec<NormalizedProject>>,
}

impl RequestContext {
    pub fn new(weather: WeatherClient, github: GitHubClient, gemini: GeminiClient, clock: Arc<dyn Clock>) -> Self {
        let mut registry = Registry::default();
        let metrics = DashboardMetrics::new(&mut registry);

        RequestContext {
            weather,
            github,
            gemini,
            curated: default_curated(),
            registry,
            current_cache: ResponseCache::new(CacheKind::Weather, clock.clone()).with_metrics(metrics.clone()),
            combined_cache: ResponseCache::new(CacheKind::WeatherCombined, clock.clone())
                .with_metrics(metrics.clone()),
            search_cache: ResponseCache::new(CacheKind::Search, clock.clone()).with_metrics(metrics.clone()),
            details_cache: ResponseCache::new(CacheKind::RepoDetails, clock.clone()).with_metrics(metrics.clone()),
            trending_cache: ResponseCache::new(CacheKind::Trending, clock).with_metrics(metrics.clone()),
            metrics,
        }
    }

    /// Replace the curated repositories used when trending or filtered lookups fail.
    pub fn with_curated(mut self, curated: Vec<CuratedRepo>) -> Self {
        self.curated = curated;
        self
    }

    pub async fn combined_weather(
        &self,
        city: &str,
        units: Units,
        days: usize,
    ) -> Result<CombinedWeatherData, ClientError> {
        let key = cache_key(
            WEATHER_ENDPOINT,
            [
                ("city", city.to_lowercase()),
                ("units", units.to_string()),
                ("days", days.to_string()),
            ],
        );

        self.combined_cache
            .get_or_try_fetch(&key, move || async move {
                let res = self.weather.combined(city, units, days).await;
                self.metrics.upstream(Service::Weather.name(), &res);
                res
            })
            .await
    }

    pub async fn current_weather(&self, city: &str, units: Units) -> Result<CurrentWeather, ClientError> {
        let key = cache_key(
            WEATHER_CURRENT_ENDPOINT,
            [("city", city.to_lowercase()), ("units", units.to_string())],
        );

        self.current_cache
            .get_or_try_fetch(&key, move || async move {
                let res = self.weather.current(city, units).await;
                self.metrics.upstream(Service::Weather.name(), &res);
                res
            })
            .await
    }

    pub async fn search(&self, query: &str, count: usize) -> Result<Vec<NormalizedProject>, ClientError> {
        let key = cache_key(SEARCH_ENDPOINT, [("q", query.to_owned()), ("count", count.to_string())]);

        self.search_cache
            .get_or_try_fetch(&key, move || async move {
                let res = self.github.search(query, count).await;
                self.metrics.upstream(Service::GitHub.name(), &res);
                res
            })
            .await
    }

    pub async fn issues(&self, repo: &RepoRef) -> Vec<NormalizedIssue> {
        let res = self.github.beginner_issues(repo, DEFAULT_ISSUE_LIMIT).await;
        self.metrics.upstream(Service::GitHub.name(), &res);

        res.unwrap_or_else(|e| {
            tracing::warn!(message = "failed to fetch issues, returning none", repo = %repo, error = %e);
            Vec::new()
        })
    }

    pub async fn insight(&self, mode: &InsightMode) -> Result<String, ClientError> {
        let res = self.gemini.insight(mode).await;
        self.metrics.upstream(Service::Gemini.name(), &res);
        res
    }

    pub async fn answer(&self, question: &str, repo_name: Option<&str>) -> Result<String, ClientError> {
        let res = self.gemini.answer(question, repo_name).await;
        self.metrics.upstream(Service::Gemini.name(), &res);
        res
    }

    pub fn finder(&self) -> ProjectFinder<'_> {
        ProjectFinder {
            github: &self.github,
            details: &self.details_cache,
            trending: &self.trending_cache,
            curated: &self.curated,
            metrics: &self.metrics,
        }
    }

    fn log_github_auth(&self, operation: &str) {
        if !self.github.is_authenticated() {
            tracing::debug!(message = "no GitHub token configured, making unauthenticated requests", operation = operation);
        }
    }
}

/// Build the router for all API endpoints, `/metrics`, and `/health`.
pub fn router(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/api/weather", get(weather_combined))
        .route("/api/weather/current", get(weather_current))
        .route("/api/github", get(github_projects))
        .route("/api/github/search", get(github_search))
        .route("/api/github/issues", get(github_issues))
        .route("/api/gemini", post(gemini_insight))
        .route("/api/gemini/question", post(gemini_question))
        .route("/metrics", get(text_metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn weather_combined(
    State(ctx): State<Arc<RequestContext>>,
    params: Result<Query<WeatherParams>, QueryRejection>,
) -> Result<Json<CombinedWeatherData>, ApiError> {
    const OPERATION: &str = "fetch weather data";
    let invalid = |e| ApiError::new(Service::Weather, OPERATION, "", e);
    let params = query_params(params).map_err(invalid)?;

    let city = required(params.city.as_deref(), "city").map_err(invalid)?;
    let units = parse_or(params.units.as_deref(), Units::default()).map_err(invalid)?;
    let days = parse_number(params.days.as_deref(), "days", DEFAULT_FORECAST_DAYS)
        .map_err(invalid)?
        .clamp(1, MAX_FORECAST_DAYS);

    ctx.combined_weather(city, units, days)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(Service::Weather, OPERATION, city, e))
}

async fn weather_current(
    State(ctx): State<Arc<RequestContext>>,
    params: Result<Query<WeatherParams>, QueryRejection>,
) -> Result<Json<CurrentWeather>, ApiError> {
    const OPERATION: &str = "fetch current weather";
    let invalid = |e| ApiError::new(Service::Weather, OPERATION, "", e);
    let params = query_params(params).map_err(invalid)?;

    let city = required(params.city.as_deref(), "city").map_err(invalid)?;
    let units = parse_or(params.units.as_deref(), Units::default()).map_err(invalid)?;

    ctx.current_weather(city, units)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(Service::Weather, OPERATION, city, e))
}

async fn github_projects(
    State(ctx): State<Arc<RequestContext>>,
    params: Result<Query<GitHubParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    const OPERATION: &str = "fetch GitHub projects";
    let invalid = |e| ApiError::new(Service::GitHub, OPERATION, "", e);
    let params = query_params(params).map_err(invalid)?;
    ctx.log_github_auth(OPERATION);

    if let Some(repo) = optional(params.repo.as_deref()) {
        let repo = RepoRef::parse(repo).map_err(invalid)?;
        return ctx
            .finder()
            .repository_with_issues(&repo, DEFAULT_ISSUE_LIMIT)
            .await
            .map(|r| Json(r).into_response())
            .map_err(|e| ApiError::new(Service::GitHub, OPERATION, &repo.to_string(), e));
    }

    let trending = match optional(params.filter.as_deref()) {
        None => false,
        Some(f) if f.eq_ignore_ascii_case("all") => false,
        Some(f) if f.eq_ignore_ascii_case("trending") => true,
        Some(f) => {
            return Err(invalid(ClientError::Validation(format!(
                "filter must be 'trending' or 'all', got '{}'",
                f
            ))))
        }
    };

    let count = parse_number(params.count.as_deref(), "count", DEFAULT_PROJECT_COUNT).map_err(invalid)?;
    let query = ProjectQuery {
        trending,
        since: parse_or(params.since.as_deref(), Since::default()).map_err(invalid)?,
        language: optional(params.language.as_deref()).map(str::to_owned),
        topic: optional(params.topic.as_deref()).map(str::to_owned),
        ..Default::default()
    }
    .with_count(count);

    ctx.finder()
        .find(&query)
        .await
        .map(|projects| Json(projects).into_response())
        .map_err(|e| ApiError::new(Service::GitHub, OPERATION, "projects", e))
}

async fn github_search(
    State(ctx): State<Arc<RequestContext>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    const OPERATION: &str = "search GitHub repositories";
    let invalid = |e| ApiError::new(Service::GitHub, OPERATION, "", e);
    let params = query_params(params).map_err(invalid)?;
    ctx.log_github_auth(OPERATION);

    let q = required(params.q.as_deref(), "q").map_err(invalid)?;
    let count = parse_number(params.count.as_deref(), "count", DEFAULT_SEARCH_COUNT).map_err(invalid)?;

    ctx.search(q, count)
        .await
        .map(|repositories| Json(SearchResponse { repositories }))
        .map_err(|e| ApiError::new(Service::GitHub, OPERATION, q, e))
}

async fn github_issues(
    State(ctx): State<Arc<RequestContext>>,
    params: Result<Query<IssuesParams>, QueryRejection>,
) -> Result<Json<IssuesResponse>, ApiError> {
    const OPERATION: &str = "fetch GitHub issues";
    let invalid = |e| ApiError::new(Service::GitHub, OPERATION, "", e);
    let params = query_params(params).map_err(invalid)?;
    ctx.log_github_auth(OPERATION);

    let repo = required(params.repo.as_deref(), "repo").map_err(invalid)?;
    let repo = RepoRef::parse(repo).map_err(invalid)?;

    Ok(Json(IssuesResponse {
        issues: ctx.issues(&repo).await,
    }))
}

async fn gemini_insight(
    State(ctx): State<Arc<RequestContext>>,
    body: Result<Json<InsightRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    const OPERATION: &str = "generate insight";
    let invalid = |e| ApiError::new(Service::Gemini, OPERATION, "", e);

    let Json(req) = body.map_err(|e| invalid(ClientError::Validation(e.body_text())))?;
    let mode = InsightMode::select(&req).map_err(invalid)?;

    ctx.insight(&mode)
        .await
        .map(|message| Json(MessageResponse { message }))
        .map_err(|e| ApiError::new(Service::Gemini, OPERATION, mode.name(), e))
}

async fn gemini_question(
    State(ctx): State<Arc<RequestContext>>,
    body: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<QuestionResponse>, ApiError> {
    const OPERATION: &str = "answer question";
    let invalid = |e| ApiError::new(Service::Gemini, OPERATION, "", e);

    let Json(req) = body.map_err(|e| invalid(ClientError::Validation(e.body_text())))?;
    let question = required(req.question.as_deref(), "question").map_err(invalid)?;
    let repo_name = optional(req.repo_name.as_deref());

    ctx.answer(question, repo_name)
        .await
        .map(|message| {
            Json(QuestionResponse {
                message,
                question: question.to_owned(),
            })
        })
        .map_err(|e| ApiError::new(Service::Gemini, OPERATION, repo_name.unwrap_or("general"), e))
}

async fn text_metrics(State(ctx): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &ctx.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            (StatusCode::OK, [(CONTENT_TYPE, OPENMETRICS_FORMAT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Query parameters, reporting a query string that could not be decoded as a validation error.
fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ClientError> {
    query
        .map(|Query(params)| params)
        .map_err(|e| ClientError::Validation(e.body_text()))
}

/// Trimmed value of an optional parameter, treating blank values as missing.
fn optional(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ClientError> {
    optional(value).ok_or_else(|| ClientError::Validation(format!("'{}' is required", name)))
}

fn parse_or<T>(value: Option<&str>, default: T) -> Result<T, ClientError>
where
    T: FromStr<Err = ClientError>,
{
    optional(value).map_or(Ok(default), T::from_str)
}

fn parse_number(value: Option<&str>, name: &str, default: usize) -> Result<usize, ClientError> {
    match optional(value) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ClientError::Validation(format!("'{}' must be a positive number, got '{}'", name, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::{optional, parse_number, parse_or, required, status_for, ApiError, Service};
    use crate::error::ClientError;
    use crate::weather::Units;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let validation = ClientError::Validation("x".into());
        assert_eq!(StatusCode::BAD_REQUEST, status_for(&validation, Service::Weather));

        let auth = ClientError::Auth("x".into());
        assert_eq!(StatusCode::UNAUTHORIZED, status_for(&auth, Service::Weather));
        assert_eq!(StatusCode::UNAUTHORIZED, status_for(&auth, Service::GitHub));
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status_for(&auth, Service::Gemini));

        let upstream = ClientError::Upstream(StatusCode::BAD_GATEWAY, "x".into());
        assert_eq!(StatusCode::BAD_GATEWAY, status_for(&upstream, Service::GitHub));

        let redirect = ClientError::Upstream(StatusCode::MOVED_PERMANENTLY, "x".into());
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status_for(&redirect, Service::GitHub));

        assert_eq!(
            StatusCode::TOO_MANY_REQUESTS,
            status_for(&ClientError::RateLimited("x".into()), Service::GitHub)
        );
        assert_eq!(
            StatusCode::NOT_FOUND,
            status_for(&ClientError::NotFound("x".into()), Service::Weather)
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            status_for(&ClientError::MalformedResponse("x".into()), Service::Gemini)
        );
        assert_eq!(
            StatusCode::BAD_GATEWAY,
            status_for(&ClientError::Batch(3), Service::GitHub)
        );
    }

    #[test]
    fn test_configuration_error_message() {
        let err = ApiError::new(Service::Gemini, "generate insight", "", ClientError::Configuration("Gemini API key"));
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, err.status());
        assert_eq!("service is not configured", err.body.error);
        assert_eq!("Gemini API key is not configured", err.body.details);
    }

    #[test]
    fn test_params() {
        assert_eq!(None, optional(Some("  ")));
        assert_eq!(Some("London"), optional(Some(" London ")));
        assert!(required(None, "city").is_err());
        assert_eq!(Units::Imperial, parse_or(Some("imperial"), Units::Metric).unwrap());
        assert_eq!(Units::Metric, parse_or(None, Units::Metric).unwrap());
        assert_eq!(6, parse_number(None, "count", 6).unwrap());
        assert!(parse_number(Some("-1"), "count", 6).is_err());
        assert!(parse_number(Some("abc"), "count", 6).is_err());
    }
}
