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

//! Loading dashboard data from the proxy, through the local cache.
//!
//! A `Resource` tracks one piece of data the terminal client shows along with whether
//! it is loading and the last error. Loads consult the `LocalCache` first and only call
//! the proxy (via `DashboardApi`) when nothing fresh is stored.

use crate::error::{ClientError, StorageError};
use crate::gemini::InsightRequest;
use crate::github::{NormalizedIssue, NormalizedProject};
use crate::http::{ErrorBody, IssuesResponse, MessageResponse, QuestionRequest, QuestionResponse, SearchResponse};
use crate::local_cache::LocalCache;
use crate::projects::RepositoryWithIssues;
use crate::storage::Storage;
use crate::weather::{CombinedWeatherData, Units};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Kind of data the client caches, each with its own lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Weather,
    Projects,
    Search,
    Insight,
}

impl ResourceKind {
    pub fn ttl(self) -> Duration {
        match self {
            Self::Weather => Duration::from_secs(10 * 60),
            Self::Projects => Duration::from_secs(30 * 60),
            Self::Search => Duration::from_secs(5 * 60),
            Self::Insight => Duration::from_secs(30 * 60),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Projects => "projects",
            Self::Search => "search",
            Self::Insight => "insight",
        }
    }

    /// Local cache key for this kind of data, qualified by `parts`.
    pub fn key<I, S>(self, parts: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = self.name().to_owned();
        for p in parts {
            key.push('_');
            key.push_str(&p.as_ref().to_lowercase());
        }

        key
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data shown by the client along with its loading and error state.
#[derive(Debug, Clone)]
pub struct Resource<T> {
    kind: ResourceKind,
    key: String,
    data: Option<T>,
    loading: bool,
    error: Option<String>,
}

impl<T> Resource<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new<K: Into<String>>(kind: ResourceKind, key: K) -> Self {
        Resource {
            kind,
            key: key.into(),
            data: None,
            loading: false,
            error: None,
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Use a fresh cached value if there is one, otherwise call `fetcher`.
    pub async fn load<S, F, Fut>(&mut self, cache: &LocalCache<S>, fetcher: F)
    where
        S: Storage,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        match cache.get::<T>(&self.key) {
            Ok(Some(v)) => {
                tracing::debug!(message = "using locally cached value", kind = self.kind.name(), key = %self.key);
                self.data = Some(v);
                self.error = None;
                return;
            }
            Ok(None) => {}
            Err(e) => log_storage_error(&self.key, &e),
        }

        self.refresh(cache, fetcher).await;
    }

    /// Call `fetcher` regardless of what is cached, storing a successful result.
    pub async fn refresh<S, F, Fut>(&mut self, cache: &LocalCache<S>, fetcher: F)
    where
        S: Storage,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.loading = true;
        self.error = None;

        match fetcher().await {
            Ok(v) => {
                if let Err(e) = cache.set(&self.key, &v, self.kind.ttl()) {
                    log_storage_error(&self.key, &e);
                }
                self.data = Some(v);
            }
            Err(e) => {
                tracing::warn!(message = "failed to load data", kind = self.kind.name(), key = %self.key, error = %e);
                self.error = Some(e.to_string());
            }
        }

        self.loading = false;
    }
}

fn log_storage_error(key: &str, e: &StorageError) {
    tracing::warn!(message = "local cache unavailable", key = key, error = %e);
}

/// Client for the proxy's own `/api` endpoints.
#[derive(Debug, Clone)]
pub struct DashboardApi {
    client: Client,
    base_url: Url,
}

impl DashboardApi {
    const USER_AGENT: &'static str = "dashctl (https://github.com/56quarters/devdash)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: &str) -> Result<Self, url::ParseError> {
        Ok(DashboardApi {
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    pub async fn weather(&self, city: &str, units: Units, days: usize) -> Result<CombinedWeatherData, ClientError> {
        let mut url = self.endpoint(&["api", "weather"]);
        url.query_pairs_mut()
            .append_pair("city", city)
            .append_pair("units", units.as_str())
            .append_pair("days", &days.to_string());

        self.send(self.client.get(url.clone()), &url).await
    }

    pub async fn projects(&self, params: &ProjectParams) -> Result<Vec<NormalizedProject>, ClientError> {
        let mut url = self.endpoint(&["api", "github"]);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("count", &params.count.to_string());
            if params.trending {
                pairs.append_pair("filter", "trending");
            }
            if let Some(since) = &params.since {
                pairs.append_pair("since", since);
            }
            if let Some(language) = &params.language {
                pairs.append_pair("language", language);
            }
            if let Some(topic) = &params.topic {
                pairs.append_pair("topic", topic);
            }
        }

        self.send(self.client.get(url.clone()), &url).await
    }

    pub async fn repository(&self, repo: &str) -> Result<RepositoryWithIssues, ClientError> {
        let mut url = self.endpoint(&["api", "github"]);
        url.query_pairs_mut().append_pair("repo", repo);

        self.send(self.client.get(url.clone()), &url).await
    }

    pub async fn search(&self, query: &str, count: usize) -> Result<Vec<NormalizedProject>, ClientError> {
        let mut url = self.endpoint(&["api", "github", "search"]);
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("count", &count.to_string());

        let res: SearchResponse = self.send(self.client.get(url.clone()), &url).await?;
        Ok(res.repositories)
    }

    pub async fn issues(&self, repo: &str) -> Result<Vec<NormalizedIssue>, ClientError> {
        let mut url = self.endpoint(&["api", "github", "issues"]);
        url.query_pairs_mut().append_pair("repo", repo);

        let res: IssuesResponse = self.send(self.client.get(url.clone()), &url).await?;
        Ok(res.issues)
    }

    pub async fn insight(&self, req: &InsightRequest) -> Result<String, ClientError> {
        let url = self.endpoint(&["api", "gemini"]);
        let res: MessageResponse = self.send(self.client.post(url.clone()).json(req), &url).await?;
        Ok(res.message)
    }

    pub async fn ask(&self, question: &str, repo_name: Option<&str>) -> Result<QuestionResponse, ClientError> {
        let url = self.endpoint(&["api", "gemini", "question"]);
        let body = QuestionRequest {
            question: Some(question.to_owned()),
            repo_name: repo_name.map(str::to_owned),
        };

        self.send(self.client.post(url.clone()).json(&body), &url).await
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, url: &Url) -> Result<T, ClientError> {
        tracing::debug!(message = "making dashboard API request", url = %url);

        let res = req
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Network)?;

        let status = res.status();
        if status.is_success() {
            return res.json::<T>().await.map_err(|e| ClientError::from_reqwest(e, url.path()));
        }

        // Use the proxy's explanation of the failure when it sent one
        let details = match res.json::<ErrorBody>().await {
            Ok(body) => body.details,
            Err(_) => url.path().to_owned(),
        };

        if status == reqwest::StatusCode::BAD_REQUEST {
            Err(ClientError::Validation(details))
        } else {
            Err(ClientError::from_status(status, details))
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        url
    }
}

/// Parameters for the project highlights endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectParams {
    pub count: usize,
    pub trending: bool,
    pub since: Option<String>,
    pub language: Option<String>,
    pub topic: Option<String>,
}

impl ProjectParams {
    /// Local cache key identifying this set of parameters.
    pub fn cache_key(&self) -> String {
        let count = self.count.to_string();
        ResourceKind::Projects.key([
            if self.trending { "trending" } else { "all" },
            self.since.as_deref().unwrap_or("-"),
            self.language.as_deref().unwrap_or("-"),
            self.topic.as_deref().unwrap_or("-"),
            count.as_str(),
        ])
    }
}
