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

use crate::clock::Clock;
use crate::error::ClientError;
use chrono::{DateTime, Duration, NaiveDate};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Token value shipped in sample configuration, treated the same as no token at all.
pub const PLACEHOLDER_TOKEN: &str = "your_github_token_here";
pub const MAX_PAGE_SIZE: usize = 30;
pub const DEFAULT_ISSUE_LIMIT: usize = 5;

const ISSUE_PAGE_SIZE: usize = 50;
const BEGINNER_LABELS: &[&str] = &[
    "good first issue",
    "help wanted",
    "beginner",
    "easy",
    "first-timers-only",
    "starter",
];

/// Window of repository creation dates considered for trending repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Since {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl Since {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Earliest creation date included in the window ending on `today`.
    pub fn start_date(self, today: NaiveDate) -> NaiveDate {
        let days = match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
        };

        today - Duration::days(days)
    }
}

impl FromStr for Since {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ClientError::Validation(format!(
                "since must be one of 'daily', 'weekly', or 'monthly', got '{}'",
                other
            ))),
        }
    }
}

/// Repository reference in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(s: &str) -> Result<Self, ClientError> {
        let invalid = || ClientError::Validation(format!("repository must be in 'owner/name' form, got '{}'", s));
        let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;

        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }

        Ok(RepoRef {
            owner: owner.to_owned(),
            name: name.to_owned(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendingQuery {
    pub since: Since,
    pub language: Option<String>,
    pub topic: Option<String>,
    pub count: usize,
}

impl TrendingQuery {
    /// Build the search qualifier string for repositories created inside the window.
    pub fn search_terms(&self, today: NaiveDate) -> String {
        let mut terms = format!("created:>{}", self.since.start_date(today).format("%Y-%m-%d"));
        if let Some(lang) = &self.language {
            terms.push_str(&format!(" language:{}", qualifier_value(lang)));
        }
        if let Some(topic) = &self.topic {
            terms.push_str(&format!(" topic:{}", qualifier_value(topic)));
        }

        terms
    }
}

/// Qualifier values with whitespace must be quoted or the search reads the rest as free text.
fn qualifier_value(value: &str) -> String {
    let value = value.trim();
    if value.contains(char::is_whitespace) {
        format!("\"{}\"", value.replace('"', ""))
    } else {
        value.to_owned()
    }
}

pub struct GitHubClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    clock: Arc<dyn Clock>,
}

impl GitHubClient {
    const USER_AGENT: &'static str = "devdash (https://github.com/56quarters/devdash)";
    const JSON_RESPONSE: &'static str = "application/vnd.github+json";
    const API_VERSION: &'static str = "2022-11-28";

    pub fn new(
        client: Client,
        base_url: &str,
        token: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, url::ParseError> {
        let token = token.filter(|t| !t.trim().is_empty() && t != PLACEHOLDER_TOKEN);

        Ok(GitHubClient {
            client,
            base_url: Url::parse(base_url)?,
            token,
            clock,
        })
    }

    /// True if requests will carry a bearer token.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Search repositories, most starred first.
    pub async fn search(&self, query: &str, count: usize) -> Result<Vec<NormalizedProject>, ClientError> {
        let mut url = self.endpoint(&["search", "repositories"]);
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("sort", "stars")
            .append_pair("order", "desc")
            .append_pair("per_page", &page_size(count).to_string());
        tracing::debug!(message = "making repository search request", url = %url);

        let res: SearchResponse = self.make_request(url, query).await?;
        Ok(res.items.into_iter().map(NormalizedProject::from).collect())
    }

    /// Most starred repositories created inside the query's window.
    pub async fn trending(&self, query: &TrendingQuery) -> Result<Vec<NormalizedProject>, ClientError> {
        let terms = query.search_terms(self.today());
        self.search(&terms, query.count).await
    }

    pub async fn repository(&self, repo: &RepoRef) -> Result<NormalizedProject, ClientError> {
        let url = self.endpoint(&["repos", &repo.owner, &repo.name]);
        tracing::debug!(message = "making repository details request", url = %url);

        let res: UpstreamRepository = self.make_request(url, &repo.to_string()).await?;
        Ok(res.into())
    }

    /// Open issues (not pull requests) carrying a beginner friendly label, at most `limit`.
    pub async fn beginner_issues(&self, repo: &RepoRef, limit: usize) -> Result<Vec<NormalizedIssue>, ClientError> {
        let mut url = self.endpoint(&["repos", &repo.owner, &repo.name, "issues"]);
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("per_page", &ISSUE_PAGE_SIZE.to_string());
        tracing::debug!(message = "making issues request", url = %url);

        let res: Vec<UpstreamIssue> = self.make_request(url, &repo.to_string()).await?;
        Ok(res
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .filter(|i| is_beginner_friendly(i.labels.iter().map(|l| l.name.as_str())))
            .take(limit)
            .map(NormalizedIssue::from)
            .collect())
    }

    fn today(&self) -> NaiveDate {
        DateTime::from_timestamp_millis(self.clock.now_millis())
            .unwrap_or_default()
            .date_naive()
    }

    fn request(&self, url: Url) -> RequestBuilder {
        let req = self
            .client
            .get(url)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .header("X-GitHub-Api-Version", Self::API_VERSION);

        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn make_request<T: DeserializeOwned>(&self, url: Url, target: &str) -> Result<T, ClientError> {
        let res = self.request(url).send().await.map_err(ClientError::Network)?;

        let status = res.status();
        if status == StatusCode::FORBIDDEN && is_rate_limit_exhausted(&res) {
            return Err(ClientError::RateLimited(target.to_owned()));
        } else if !status.is_success() {
            return Err(ClientError::from_status(status, target));
        }

        res.json::<T>().await.map_err(|e| ClientError::from_reqwest(e, target))
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        url
    }
}

/// True if any label looks like one used to mark issues for newcomers.
pub fn is_beginner_friendly<'a, I>(labels: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    labels.into_iter().any(|label| {
        let label = label.to_lowercase();
        BEGINNER_LABELS.iter().any(|b| label.contains(b))
    })
}

fn page_size(count: usize) -> usize {
    count.clamp(1, MAX_PAGE_SIZE)
}

fn is_rate_limit_exhausted(res: &reqwest::Response) -> bool {
    res.headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == "0")
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<UpstreamRepository>,
}

#[derive(Deserialize, Debug)]
pub struct UpstreamRepository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub owner: Option<UpstreamOwner>,
    #[serde(default)]
    pub topics: Option<Vec<String>>,
    #[serde(default)]
    pub license: Option<UpstreamLicense>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UpstreamOwner {
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UpstreamLicense {
    #[serde(default)]
    pub spdx_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct UpstreamIssue {
    id: i64,
    number: u64,
    title: String,
    html_url: String,
    #[serde(default)]
    labels: Vec<UpstreamLabel>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct UpstreamLabel {
    name: String,
    #[serde(default)]
    color: Option<String>,
}

/// Flattened subset of a GitHub repository. Fields that may be `null` upstream are
/// normalized to empty values so that consumers never see `null`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NormalizedProject {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub description: String,
    pub url: String,
    pub homepage: String,
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    pub language: String,
    pub owner_avatar: String,
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub pushed_at: String,
}

impl From<UpstreamRepository> for NormalizedProject {
    fn from(r: UpstreamRepository) -> Self {
        let license = r.license.and_then(|l| match l.spdx_id {
            Some(id) if !id.is_empty() && id != "NOASSERTION" => Some(id),
            _ => l.name.filter(|n| !n.is_empty()),
        });

        NormalizedProject {
            id: r.id,
            name: r.name,
            full_name: r.full_name,
            description: r.description.unwrap_or_default(),
            url: r.html_url,
            homepage: r.homepage.unwrap_or_default(),
            stars: r.stargazers_count,
            forks: r.forks_count,
            open_issues: r.open_issues_count,
            language: r.language.unwrap_or_default(),
            owner_avatar: r.owner.and_then(|o| o.avatar_url).unwrap_or_default(),
            topics: r.topics.unwrap_or_default(),
            license,
            created_at: r.created_at.unwrap_or_default(),
            updated_at: r.updated_at.unwrap_or_default(),
            pushed_at: r.pushed_at.unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NormalizedIssue {
    pub id: i64,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub labels: Vec<IssueLabel>,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IssueLabel {
    pub name: String,
    pub color: String,
}

impl From<UpstreamIssue> for NormalizedIssue {
    fn from(i: UpstreamIssue) -> Self {
        NormalizedIssue {
            id: i.id,
            number: i.number,
            title: i.title,
            url: i.html_url,
            labels: i
                .labels
                .into_iter()
                .map(|l| IssueLabel {
                    name: l.name,
                    color: l.color.unwrap_or_default(),
                })
                .collect(),
            created_at: i.created_at,
        }
    }
}
