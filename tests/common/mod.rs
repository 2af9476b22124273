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

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use devdash::clock::ManualClock;
use devdash::gemini::GeminiClient;
use devdash::github::GitHubClient;
use devdash::http::{router, RequestContext};
use devdash::projects::CuratedRepo;
use devdash::weather::WeatherClient;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::MockServer;

pub const WEATHER_KEY: &str = "weather-key";
pub const GEMINI_KEY: &str = "gemini-key";
pub const GEMINI_MODEL: &str = "gemini-test";
/// 2024-03-01T12:00:00Z
pub const START_MILLIS: i64 = 1_709_294_400_000;

pub struct Harness {
    pub server: MockServer,
    pub clock: Arc<ManualClock>,
    pub app: Router,
}

pub struct Keys {
    pub weather: Option<String>,
    pub github: Option<String>,
    pub gemini: Option<String>,
}

impl Default for Keys {
    fn default() -> Self {
        Keys {
            weather: Some(WEATHER_KEY.to_owned()),
            github: None,
            gemini: Some(GEMINI_KEY.to_owned()),
        }
    }
}

/// Router whose upstream services all point at a single mock server.
pub async fn harness() -> Harness {
    harness_with(Keys::default(), None).await
}

pub async fn harness_with(keys: Keys, curated: Option<Vec<CuratedRepo>>) -> Harness {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let client = Client::new();

    let weather = WeatherClient::new(client.clone(), &server.uri(), keys.weather).unwrap();
    let github = GitHubClient::new(client.clone(), &server.uri(), keys.github, clock.clone()).unwrap();
    let gemini = GeminiClient::new(client, &server.uri(), keys.gemini, GEMINI_MODEL).unwrap();

    let mut context = RequestContext::new(weather, github, gemini, clock.clone());
    if let Some(curated) = curated {
        context = context.with_curated(curated);
    }

    Harness {
        server,
        clock,
        app: router(Arc::new(context)),
    }
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, req).await
}

pub async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    post_raw(app, uri, &body.to_string()).await
}

pub async fn post_raw(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_owned()))
        .unwrap();
    send(app, req).await
}

pub async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, body)
}

pub fn current_weather(city: &str) -> Value {
    json!({
        "coord": {"lon": -0.1257, "lat": 51.5085},
        "weather": [{"id": 803, "main": "Clouds", "description": "broken clouds", "icon": "04d"}],
        "main": {"temp": 11.2, "feels_like": 10.4, "temp_min": 9.9, "temp_max": 12.3, "pressure": 1012, "humidity": 81},
        "wind": {"speed": 4.1},
        "dt": 1709294400,
        "sys": {"country": "GB", "sunrise": 1709276000, "sunset": 1709315000},
        "timezone": 0,
        "name": city
    })
}

pub fn forecast(city: &str) -> Value {
    json!({
        "list": [
            {"dt": 1709294400, "main": {"temp": 11.0, "temp_min": 10.0, "temp_max": 12.0},
             "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}], "pop": 0.6},
            {"dt": 1709305200, "main": {"temp": 9.0, "temp_min": 8.0, "temp_max": 9.5},
             "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10n"}], "pop": 0.3},
            {"dt": 1709380800, "main": {"temp": 13.0, "temp_min": 12.5, "temp_max": 14.0},
             "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"}], "pop": 0.0}
        ],
        "city": {"name": city, "timezone": 0}
    })
}

pub fn repository(id: i64, full_name: &str, language: &str) -> Value {
    let name = full_name.split('/').nth(1).unwrap_or(full_name);
    json!({
        "id": id,
        "name": name,
        "full_name": full_name,
        "description": format!("{} description", name),
        "html_url": format!("https://github.com/{}", full_name),
        "homepage": null,
        "stargazers_count": 1000 + id,
        "forks_count": 10,
        "open_issues_count": 3,
        "language": language,
        "owner": {"avatar_url": "https://avatars.example/1"},
        "topics": ["systems"],
        "license": {"spdx_id": "MIT", "name": "MIT License"},
        "created_at": "2020-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
        "pushed_at": "2024-01-01T00:00:00Z"
    })
}

pub fn issue(id: i64, title: &str, labels: &[&str], pull_request: bool) -> Value {
    let labels: Vec<Value> = labels.iter().map(|l| json!({"name": l, "color": "7057ff"})).collect();
    let mut issue = json!({
        "id": id,
        "number": id,
        "title": title,
        "html_url": format!("https://github.com/torvalds/linux/issues/{}", id),
        "labels": labels,
        "created_at": "2024-02-01T00:00:00Z"
    });

    if pull_request {
        issue["pull_request"] = json!({"url": "https://api.github.com/pulls/1"});
    }

    issue
}

pub fn gemini_text(text: &str) -> Value {
    json!({
        "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
    })
}
