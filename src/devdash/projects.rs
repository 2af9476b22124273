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

//! Selection of repositories for the project highlights endpoint.
//!
//! Repositories are chosen by running an ordered list of strategies until one of them
//! produces something. Which strategies are tried depends on the query: trending
//! repositories fall back to a curated list, filtered lookups fall back to an unfiltered
//! sample of the curated list, and everything ends with static metadata for the curated
//! list which needs no network access at all.

use crate::cache::{cache_key, ResponseCache};
use crate::error::ClientError;
use crate::github::{GitHubClient, NormalizedIssue, NormalizedProject, RepoRef, Since, TrendingQuery, MAX_PAGE_SIZE};
use crate::metrics::DashboardMetrics;
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROJECT_COUNT: usize = 6;
pub const GITHUB_ENDPOINT: &str = "/api/github";
const SERVICE: &str = "github";

/// Well known repository with enough metadata to be shown without asking GitHub.
#[derive(Debug, Clone, PartialEq)]
pub struct CuratedRepo {
    pub full_name: String,
    pub description: String,
    pub language: String,
    pub topics: Vec<String>,
}

impl CuratedRepo {
    pub fn new(full_name: &str, description: &str, language: &str, topics: &[&str]) -> Self {
        CuratedRepo {
            full_name: full_name.to_owned(),
            description: description.to_owned(),
            language: language.to_owned(),
            topics: topics.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    pub fn repo_ref(&self) -> Result<RepoRef, ClientError> {
        RepoRef::parse(&self.full_name)
    }

    pub fn to_project(&self, id: i64) -> NormalizedProject {
        let name = self
            .full_name
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.full_name);

        NormalizedProject {
            id,
            name: name.to_owned(),
            full_name: self.full_name.clone(),
            description: self.description.clone(),
            url: format!("https://github.com/{}", self.full_name),
            homepage: String::new(),
            stars: 0,
            forks: 0,
            open_issues: 0,
            language: self.language.clone(),
            owner_avatar: String::new(),
            topics: self.topics.clone(),
            license: None,
            created_at: String::new(),
            updated_at: String::new(),
            pushed_at: String::new(),
        }
    }
}

/// Repositories shown when trending or filtered lookups come up empty.
pub fn default_curated() -> Vec<CuratedRepo> {
    vec![
        CuratedRepo::new("rust-lang/rust", "Empowering everyone to build reliable and efficient software.", "Rust", &["rust", "compiler", "language"]),
        CuratedRepo::new("tokio-rs/tokio", "A runtime for writing reliable asynchronous applications with Rust.", "Rust", &["async", "networking", "rust"]),
        CuratedRepo::new("BurntSushi/ripgrep", "ripgrep recursively searches directories for a regex pattern.", "Rust", &["cli", "search", "regex"]),
        CuratedRepo::new("microsoft/vscode", "Visual Studio Code", "TypeScript", &["editor", "electron", "typescript"]),
        CuratedRepo::new("facebook/react", "The library for web and native user interfaces.", "JavaScript", &["javascript", "react", "ui", "frontend"]),
        CuratedRepo::new("vercel/next.js", "The React Framework", "JavaScript", &["react", "nextjs", "framework"]),
        CuratedRepo::new("golang/go", "The Go programming language", "Go", &["go", "language", "compiler"]),
        CuratedRepo::new("kubernetes/kubernetes", "Production-Grade Container Scheduling and Management", "Go", &["containers", "kubernetes", "cloud-native"]),
        CuratedRepo::new("python/cpython", "The Python programming language", "Python", &["python", "language", "interpreter"]),
        CuratedRepo::new("pallets/flask", "The Python micro framework for building web applications.", "Python", &["python", "web", "framework"]),
        CuratedRepo::new("torvalds/linux", "Linux kernel source tree", "C", &["kernel", "operating-system"]),
        CuratedRepo::new("neovim/neovim", "Vim-fork focused on extensibility and usability", "Vim Script", &["editor", "vim", "lua"]),
    ]
}

/// Parameters of a project highlights request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectQuery {
    pub count: usize,
    pub trending: bool,
    pub since: Since,
    pub language: Option<String>,
    pub topic: Option<String>,
}

impl Default for ProjectQuery {
    fn default() -> Self {
        ProjectQuery {
            count: DEFAULT_PROJECT_COUNT,
            trending: false,
            since: Since::default(),
            language: None,
            topic: None,
        }
    }
}

impl ProjectQuery {
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.clamp(1, MAX_PAGE_SIZE);
        self
    }

    fn has_filters(&self) -> bool {
        self.language.is_some() || self.topic.is_some()
    }

    /// True if the project matches every filter given.
    pub fn matches(&self, project: &NormalizedProject) -> bool {
        let language = self
            .language
            .as_ref()
            .map_or(true, |l| project.language.eq_ignore_ascii_case(l));
        let topic = self
            .topic
            .as_ref()
            .map_or(true, |t| project.topics.iter().any(|pt| pt.eq_ignore_ascii_case(t)));

        language && topic
    }
}

/// One way of coming up with repositories for a `ProjectQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Trending,
    CuratedFiltered,
    CuratedSample,
    StaticCurated,
}

/// Strategies to try for a query, in order.
pub fn plan(query: &ProjectQuery) -> Vec<Strategy> {
    if query.trending {
        vec![Strategy::Trending, Strategy::StaticCurated]
    } else if query.has_filters() {
        vec![Strategy::CuratedFiltered, Strategy::CuratedSample, Strategy::StaticCurated]
    } else {
        vec![Strategy::CuratedSample, Strategy::StaticCurated]
    }
}

/// Repository details merged with issues suitable for newcomers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RepositoryWithIssues {
    #[serde(flatten)]
    pub project: NormalizedProject,
    pub beginner_issues: Vec<NormalizedIssue>,
}

pub struct ProjectFinder<'a> {
    pub github: &'a GitHubClient,
    pub details: &'a ResponseCache<NormalizedProject>,
    pub trending: &'a ResponseCache<Vec<NormalizedProject>>,
    pub curated: &'a [CuratedRepo],
    pub metrics: &'a DashboardMetrics,
}

impl<'a> ProjectFinder<'a> {
    /// Run each strategy for the query in order, returning the first non-empty result.
    pub async fn find(&self, query: &ProjectQuery) -> Result<Vec<NormalizedProject>, ClientError> {
        let mut last_err = None;

        for strategy in plan(query) {
            match self.run(strategy, query).await {
                Ok(projects) if !projects.is_empty() => {
                    tracing::debug!(message = "found projects", strategy = ?strategy, count = projects.len());
                    return Ok(projects);
                }
                Ok(_) => {
                    tracing::debug!(message = "strategy found no projects", strategy = ?strategy);
                }
                Err(e) => {
                    tracing::warn!(message = "project strategy failed", strategy = ?strategy, error = %e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    /// Repository details (cached) along with beginner friendly issues. Failing to fetch
    /// issues is not an error, the repository is returned with no issues instead.
    pub async fn repository_with_issues(&self, repo: &RepoRef, limit: usize) -> Result<RepositoryWithIssues, ClientError> {
        let project = self.repository(repo).await?;

        let res = self.github.beginner_issues(repo, limit).await;
        self.metrics.upstream(SERVICE, &res);
        let beginner_issues = res.unwrap_or_else(|e| {
            tracing::warn!(message = "failed to fetch beginner issues", repo = %repo, error = %e);
            Vec::new()
        });

        Ok(RepositoryWithIssues {
            project,
            beginner_issues,
        })
    }

    /// Repository details, served from cache when fresh.
    pub async fn repository(&self, repo: &RepoRef) -> Result<NormalizedProject, ClientError> {
        let key = cache_key(GITHUB_ENDPOINT, [("repo", repo.to_string())]);
        self.details
            .get_or_try_fetch(&key, move || async move {
                let res = self.github.repository(repo).await;
                self.metrics.upstream(SERVICE, &res);
                res
            })
            .await
    }

    async fn run(&self, strategy: Strategy, query: &ProjectQuery) -> Result<Vec<NormalizedProject>, ClientError> {
        match strategy {
            Strategy::Trending => self.trending(query).await,
            Strategy::CuratedFiltered => self.curated_filtered(query).await,
            Strategy::CuratedSample => self.curated_sample(query.count).await,
            Strategy::StaticCurated => Ok(self.static_curated(query)),
        }
    }

    async fn trending(&self, query: &ProjectQuery) -> Result<Vec<NormalizedProject>, ClientError> {
        let trending = TrendingQuery {
            since: query.since,
            language: query.language.clone(),
            topic: query.topic.clone(),
            count: query.count,
        };

        let key = cache_key(
            GITHUB_ENDPOINT,
            [
                ("filter", "trending".to_owned()),
                ("since", query.since.as_str().to_owned()),
                ("language", query.language.clone().unwrap_or_default()),
                ("topic", query.topic.clone().unwrap_or_default()),
                ("count", query.count.to_string()),
            ],
        );

        self.trending
            .get_or_try_fetch(&key, move || async move {
                let res = self.github.trending(&trending).await;
                self.metrics.upstream(SERVICE, &res);
                res
            })
            .await
    }

    /// Probe curated repositories in random order until enough match the filters.
    async fn curated_filtered(&self, query: &ProjectQuery) -> Result<Vec<NormalizedProject>, ClientError> {
        let mut found = Vec::new();

        for repo in self.shuffled_refs() {
            if found.len() >= query.count {
                break;
            }

            match self.repository(&repo).await {
                Ok(p) if query.matches(&p) => found.push(p),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(message = "failed to probe curated repository", repo = %repo, error = %e);
                }
            }
        }

        Ok(found)
    }

    /// Fetch a random sample of curated repositories concurrently. Individual failures are
    /// dropped and only a sample where every fetch failed is an error.
    async fn curated_sample(&self, count: usize) -> Result<Vec<NormalizedProject>, ClientError> {
        let sample: Vec<RepoRef> = self.shuffled_refs().into_iter().take(count).collect();
        if sample.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(sample.iter().map(|r| self.repository(r))).await;
        let attempted = results.len();
        let projects: Vec<NormalizedProject> = results
            .into_iter()
            .zip(sample.iter())
            .filter_map(|(res, repo)| match res {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(message = "failed to fetch sampled repository", repo = %repo, error = %e);
                    None
                }
            })
            .collect();

        if projects.is_empty() {
            Err(ClientError::Batch(attempted))
        } else {
            Ok(projects)
        }
    }

    /// Static metadata for curated repositories, preferring those matching the filters.
    fn static_curated(&self, query: &ProjectQuery) -> Vec<NormalizedProject> {
        let all: Vec<NormalizedProject> = self
            .curated
            .iter()
            .enumerate()
            .map(|(i, r)| r.to_project(i as i64 + 1))
            .collect();

        let matching: Vec<NormalizedProject> = all.iter().filter(|p| query.matches(p)).cloned().collect();
        let chosen = if matching.is_empty() { all } else { matching };

        chosen.into_iter().take(query.count).collect()
    }

    fn shuffled_refs(&self) -> Vec<RepoRef> {
        let mut refs: Vec<RepoRef> = self
            .curated
            .iter()
            .filter_map(|r| match r.repo_ref() {
                Ok(repo) => Some(repo),
                Err(e) => {
                    tracing::warn!(message = "skipping invalid curated repository", error = %e);
                    None
                }
            })
            .collect();

        refs.shuffle(&mut rand::thread_rng());
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::{default_curated, plan, CuratedRepo, ProjectFinder, ProjectQuery, Strategy};
    use crate::cache::{CacheKind, ResponseCache};
    use crate::clock::ManualClock;
    use crate::error::ClientError;
    use crate::github::{GitHubClient, MAX_PAGE_SIZE};
    use crate::metrics::DashboardMetrics;
    use prometheus_client::registry::Registry;
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        github: GitHubClient,
        details: ResponseCache<crate::github::NormalizedProject>,
        trending: ResponseCache<Vec<crate::github::NormalizedProject>>,
        curated: Vec<CuratedRepo>,
        metrics: DashboardMetrics,
    }

    impl Fixture {
        fn new(server: &MockServer) -> Self {
            let clock = Arc::new(ManualClock::new(0));
            Fixture {
                github: GitHubClient::new(Client::new(), &server.uri(), None, clock.clone()).unwrap(),
                details: ResponseCache::new(CacheKind::RepoDetails, clock.clone()),
                trending: ResponseCache::new(CacheKind::Trending, clock),
                curated: vec![
                    CuratedRepo::new("rust-lang/rust", "", "Rust", &[]),
                    CuratedRepo::new("golang/go", "", "Go", &[]),
                    CuratedRepo::new("python/cpython", "", "Python", &[]),
                ],
                metrics: DashboardMetrics::new(&mut Registry::default()),
            }
        }

        fn finder(&self) -> ProjectFinder<'_> {
            ProjectFinder {
                github: &self.github,
                details: &self.details,
                trending: &self.trending,
                curated: &self.curated,
                metrics: &self.metrics,
            }
        }
    }

    fn repository(id: i64, full_name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": full_name.split('/').nth(1),
            "full_name": full_name,
            "html_url": format!("https://github.com/{}", full_name),
            "stargazers_count": 10,
            "forks_count": 1,
            "open_issues_count": 0,
            "owner": {"avatar_url": ""}
        })
    }

    fn project(language: &str, topics: &[&str]) -> crate::github::NormalizedProject {
        CuratedRepo::new("o/r", "", language, topics).to_project(1)
    }

    #[test]
    fn test_plans() {
        let trending = ProjectQuery {
            trending: true,
            ..Default::default()
        };
        assert_eq!(vec![Strategy::Trending, Strategy::StaticCurated], plan(&trending));

        let filtered = ProjectQuery {
            language: Some("Rust".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            vec![Strategy::CuratedFiltered, Strategy::CuratedSample, Strategy::StaticCurated],
            plan(&filtered)
        );

        assert_eq!(
            vec![Strategy::CuratedSample, Strategy::StaticCurated],
            plan(&ProjectQuery::default())
        );
    }

    #[test]
    fn test_matches() {
        let query = ProjectQuery {
            language: Some("rust".to_owned()),
            topic: Some("CLI".to_owned()),
            ..Default::default()
        };

        assert!(query.matches(&project("Rust", &["cli", "search"])));
        assert!(!query.matches(&project("Rust", &["web"])));
        assert!(!query.matches(&project("Go", &["cli"])));
        assert!(ProjectQuery::default().matches(&project("", &[])));
    }

    #[test]
    fn test_count_clamped() {
        assert_eq!(1, ProjectQuery::default().with_count(0).count);
        assert_eq!(MAX_PAGE_SIZE, ProjectQuery::default().with_count(1000).count);
    }

    #[test]
    fn test_curated_list_valid() {
        let curated = default_curated();
        assert!(!curated.is_empty());
        assert!(curated.iter().all(|r| r.repo_ref().is_ok()));
    }

    #[test]
    fn test_static_project_fields() {
        let p = CuratedRepo::new("torvalds/linux", "Linux kernel source tree", "C", &["kernel"]).to_project(3);
        assert_eq!(3, p.id);
        assert_eq!("linux", p.name);
        assert_eq!("https://github.com/torvalds/linux", p.url);
    }

    #[tokio::test]
    async fn test_curated_sample_all_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/repos/[^/]+/[^/]+$"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let fixture = Fixture::new(&server);
        let res = fixture.finder().curated_sample(3).await;
        assert!(matches!(res, Err(ClientError::Batch(3))), "unexpected result: {:?}", res);
    }

    #[tokio::test]
    async fn test_curated_sample_partial_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/golang/go"))
            .respond_with(ResponseTemplate::new(200).set_body_json(repository(2, "golang/go")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/repos/(rust-lang/rust|python/cpython)$"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let fixture = Fixture::new(&server);
        let projects = fixture.finder().curated_sample(3).await.unwrap();
        assert_eq!(1, projects.len());
        assert_eq!("golang/go", projects[0].full_name);
    }
}
