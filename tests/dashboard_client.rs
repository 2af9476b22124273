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

mod common;

use common::{current_weather, forecast, harness, repository};
use devdash::clock::ManualClock;
use devdash::error::ClientError;
use devdash::fetch::{DashboardApi, ProjectParams, Resource, ResourceKind};
use devdash::github::NormalizedProject;
use devdash::local_cache::LocalCache;
use devdash::preferences::Preferences;
use devdash::storage::FileStorage;
use devdash::weather::{CombinedWeatherData, Units};
use reqwest::Client;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn api_for(server: &MockServer) -> DashboardApi {
    DashboardApi::new(Client::new(), &server.uri()).unwrap()
}

#[tokio::test]
async fn test_api_search() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/github/search"))
        .and(query_param("q", "rust"))
        .and(query_param("count", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "repositories": [{
                "id": 1, "name": "rust", "full_name": "rust-lang/rust", "description": "", "url": "",
                "homepage": "", "stars": 1, "forks": 2, "open_issues": 3, "language": "Rust",
                "owner_avatar": "", "topics": [], "created_at": "", "updated_at": "", "pushed_at": ""
            }]
        })))
        .mount(&server)
        .await;

    let api = api_for(&server).await;
    let repos = api.search("rust", 5).await.unwrap();
    assert_eq!(1, repos.len());
    assert_eq!("rust-lang/rust", repos[0].full_name);
    assert_eq!(None, repos[0].license);
}

#[tokio::test]
async fn test_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/weather"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": "invalid request", "details": "'city' is required"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/github"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/gemini"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": "service is not configured",
            "details": "Gemini API key is not configured"
        })))
        .mount(&server)
        .await;

    let api = api_for(&server).await;

    let err = api.weather("", Units::Metric, 5).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(ref d) if d == "'city' is required"));

    let err = api.repository("nobody/nothing").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));

    let err = api.insight(&Default::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::Upstream(s, ref d) if s.as_u16() == 500 && d.contains("Gemini")));
}

#[tokio::test]
async fn test_api_ask() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/gemini/question"))
        .and(body_json(json!({"question": "Where do I start?", "repoName": "tokio-rs/tokio"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Read CONTRIBUTING.md", "question": "Where do I start?"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server).await;
    let answer = api.ask("Where do I start?", Some("tokio-rs/tokio")).await.unwrap();
    assert_eq!("Read CONTRIBUTING.md", answer.message);
}

#[tokio::test]
async fn test_resource_cached_in_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/github"))
        .and(query_param("filter", "trending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage_path = dir.path().join("store.json");
    let clock = Arc::new(ManualClock::new(0));
    let api = api_for(&server).await;
    let params = ProjectParams {
        count: 6,
        trending: true,
        ..Default::default()
    };

    // Each pass uses a new store over the same file, like separate invocations
    for _ in 0..2 {
        let storage = FileStorage::new(&storage_path);
        let cache = LocalCache::new(&storage, clock.clone());
        let mut res: Resource<Vec<NormalizedProject>> = Resource::new(ResourceKind::Projects, params.cache_key());
        res.load(&cache, || api.projects(&params)).await;

        assert_eq!(None, res.error());
        assert_eq!(Some(&Vec::new()), res.data());
    }
}

#[tokio::test]
async fn test_end_to_end_weather() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather("London")))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast("London")))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/tokio-rs/tokio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository(3, "tokio-rs/tokio", "Rust")))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/tokio-rs/tokio/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.server)
        .await;

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = axum::Server::bind(&addr).serve(h.app.clone().into_make_service());
    let url = format!("http://{}/", server.local_addr());
    tokio::spawn(server);

    let api = DashboardApi::new(Client::new(), &url).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("store.json"));
    let cache = LocalCache::new(&storage, Arc::new(ManualClock::new(0)));

    let mut weather: Resource<CombinedWeatherData> = Resource::new(ResourceKind::Weather, "weather_london");
    weather.load(&cache, || api.weather("London", Units::Metric, 5)).await;
    assert_eq!(None, weather.error());
    assert_eq!("London", weather.data().unwrap().current.city);

    let details = api.repository("tokio-rs/tokio").await.unwrap();
    assert!(details.beginner_issues.is_empty());

    let prefs = Preferences::new(&storage);
    assert!(prefs.add_bookmark(details.project.clone()).unwrap());
    assert!(!prefs.add_bookmark(details.project).unwrap());
    prefs.record_view("tokio-rs/tokio").unwrap();

    // Cache entries and preferences share one file without interfering
    assert_eq!(0, cache.clean_cache().unwrap());
    assert_eq!(1, cache.clear_all().unwrap());
    assert_eq!(1, prefs.bookmarks().unwrap().len());
    assert_eq!(vec!["tokio-rs/tokio"], prefs.view_history().unwrap());
}
