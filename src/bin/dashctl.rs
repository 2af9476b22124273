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

use clap::{Args, Parser, Subcommand};
use devdash::clock::SystemClock;
use devdash::fetch::{DashboardApi, ProjectParams, Resource, ResourceKind};
use devdash::gemini::InsightRequest;
use devdash::github::NormalizedProject;
use devdash::local_cache::LocalCache;
use devdash::preferences::Preferences;
use devdash::projects::{RepositoryWithIssues, DEFAULT_PROJECT_COUNT};
use devdash::storage::FileStorage;
use devdash::weather::{CombinedWeatherData, Units, DEFAULT_FORECAST_DAYS};
use directories::ProjectDirs;
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::WARN;
const DEFAULT_API_URL: &str = "http://localhost:3001/";
const DEFAULT_TIMEOUT_MILLIS: u64 = 30000;
const DEFAULT_SEARCH_COUNT: usize = 10;
const STORE_FILE: &str = "store.json";

#[derive(Debug, Parser)]
#[clap(name = "dashctl", version = clap::crate_version!())]
struct DashctlApplication {
    /// Base URL of the devdash server
    #[clap(long, env = "DEVDASH_API_URL", default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Directory for the local cache, bookmarks, and history. Defaults to the
    /// platform data directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for requests to the devdash server, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Print results as JSON instead of text
    #[clap(long)]
    json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show current weather and a daily forecast for a city
    Weather {
        city: String,

        /// Units for temperature and wind speed: 'metric', 'imperial', or 'standard'
        #[clap(long, default_value_t = Units::Metric.to_string())]
        units: String,

        /// Ignore locally cached data
        #[clap(long)]
        refresh: bool,
    },

    /// Show project highlights
    Projects(ProjectsArgs),

    /// Show details and beginner friendly issues for a repository
    Repo {
        /// Repository as 'owner/name'
        repo: String,
    },

    /// Search GitHub repositories
    Search {
        query: String,

        #[clap(long, default_value_t = DEFAULT_SEARCH_COUNT)]
        count: usize,
    },

    /// Generate an insight for a repository, the weather in a city, or both
    Insight {
        #[clap(long)]
        city: Option<String>,

        /// Repository as 'owner/name'
        #[clap(long)]
        repo: Option<String>,
    },

    /// Ask a question, optionally about a repository
    Ask {
        question: String,

        /// Repository as 'owner/name'
        #[clap(long)]
        repo: Option<String>,
    },

    /// Manage bookmarked repositories
    #[clap(subcommand)]
    Bookmark(BookmarkCommand),

    /// Manage preferred languages and topics, and show recently viewed repositories
    #[clap(subcommand)]
    Prefs(PrefsCommand),

    /// Manage the local cache
    #[clap(subcommand)]
    Cache(CacheCommand),
}

#[derive(Debug, Args)]
struct ProjectsArgs {
    /// Either 'trending' or 'all'
    #[clap(long, default_value = "all")]
    filter: String,

    /// Defaults to the first preferred language
    #[clap(long)]
    language: Option<String>,

    /// Defaults to the first preferred topic
    #[clap(long)]
    topic: Option<String>,

    /// Do not fill in language and topic from preferences
    #[clap(long)]
    no_preferences: bool,

    /// Time window for trending repositories: 'daily', 'weekly', or 'monthly'
    #[clap(long)]
    since: Option<String>,

    #[clap(long, default_value_t = DEFAULT_PROJECT_COUNT)]
    count: usize,

    /// Ignore locally cached data
    #[clap(long)]
    refresh: bool,
}

#[derive(Debug, Subcommand)]
enum BookmarkCommand {
    /// Bookmark a repository
    Add {
        /// Repository as 'owner/name'
        repo: String,
    },

    /// Remove a bookmark by repository ID
    Remove { id: i64 },

    /// List bookmarked repositories
    List,
}

#[derive(Debug, Subcommand)]
enum PrefsCommand {
    /// Show preferred languages and topics
    Show,

    /// Replace preferred languages, most preferred first
    Languages { languages: Vec<String> },

    /// Replace preferred topics, most preferred first
    Topics { topics: Vec<String> },

    /// Show recently viewed repositories
    History,
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    /// Remove expired entries
    Clean,

    /// Remove all entries
    Clear,
}

#[tokio::main]
async fn main() {
    let opts = DashctlApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let data_dir = opts.data_dir.clone().unwrap_or_else(|| {
        ProjectDirs::from("", "", "devdash")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| {
                tracing::error!(message = "unable to determine data directory, use --data-dir");
                process::exit(1)
            })
    });

    let http_client = Client::builder()
        .timeout(Duration::from_millis(opts.timeout_millis))
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(message = "unable to initialize HTTP client", error = %e);
            process::exit(1)
        });

    let api = DashboardApi::new(http_client, &opts.api_url).unwrap_or_else(|e| {
        tracing::error!(message = "invalid API URL", url = %opts.api_url, error = %e);
        process::exit(1)
    });

    let storage = FileStorage::new(data_dir.join(STORE_FILE));
    let cache = LocalCache::new(&storage, Arc::new(SystemClock));
    let prefs = Preferences::new(&storage);

    // Expired entries from previous runs are dropped once per invocation
    if let Err(e) = cache.clean_cache() {
        tracing::warn!(message = "failed to clean local cache", path = %storage.path().display(), error = %e);
    }

    let app = Dashctl {
        api,
        cache,
        prefs,
        json: opts.json,
    };

    if let Err(e) = app.run(opts.command).await {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

struct Dashctl<'a> {
    api: DashboardApi,
    cache: LocalCache<&'a FileStorage>,
    prefs: Preferences<&'a FileStorage>,
    json: bool,
}

impl<'a> Dashctl<'a> {
    async fn run(&self, command: Command) -> Result<(), String> {
        match command {
            Command::Weather { city, units, refresh } => self.weather(&city, &units, refresh).await,
            Command::Projects(args) => self.projects(args).await,
            Command::Repo { repo } => self.repo(&repo).await,
            Command::Search { query, count } => self.search(&query, count).await,
            Command::Insight { city, repo } => self.insight(city.as_deref(), repo.as_deref()).await,
            Command::Ask { question, repo } => self.ask(&question, repo.as_deref()).await,
            Command::Bookmark(cmd) => self.bookmark(cmd).await,
            Command::Prefs(cmd) => self.preferences(cmd),
            Command::Cache(cmd) => self.manage_cache(cmd),
        }
    }

    async fn weather(&self, city: &str, units: &str, refresh: bool) -> Result<(), String> {
        let units = units.parse::<Units>().map_err(|e| e.to_string())?;
        let data = self.load_weather(city, units, refresh).await?;

        self.print(&data, || {
            let c = &data.current;
            println!("{}, {}: {:.1}° {} (feels like {:.1}°)", c.city, c.country, c.temp, c.description, c.feels_like);
            println!("humidity {}%, wind {:.1}", c.humidity, c.wind_speed);
            for day in &data.forecast {
                println!(
                    "  {}  {:>6.1}° / {:>6.1}°  {:>3.0}%  {}",
                    day.date,
                    day.temp_min,
                    day.temp_max,
                    day.pop * 100.0,
                    day.description
                );
            }
        });

        Ok(())
    }

    async fn projects(&self, args: ProjectsArgs) -> Result<(), String> {
        let (language, topic) = if args.no_preferences {
            (args.language, args.topic)
        } else {
            let (language, topic) = self.prefs.default_filters().unwrap_or_else(|e| {
                tracing::warn!(message = "failed to read preferences", error = %e);
                (None, None)
            });
            (args.language.or(language), args.topic.or(topic))
        };

        let params = ProjectParams {
            count: args.count,
            trending: args.filter.eq_ignore_ascii_case("trending"),
            since: args.since,
            language,
            topic,
        };

        let mut res: Resource<Vec<NormalizedProject>> = Resource::new(ResourceKind::Projects, params.cache_key());
        let fetch = || self.api.projects(&params);
        if args.refresh {
            res.refresh(&self.cache, fetch).await;
        } else {
            res.load(&self.cache, fetch).await;
        }

        let projects = into_result(res)?;
        self.print(&projects, || print_projects(&projects));
        Ok(())
    }

    async fn repo(&self, repo: &str) -> Result<(), String> {
        let details = self.load_repo(repo).await?;
        if let Err(e) = self.prefs.record_view(&details.project.full_name) {
            tracing::warn!(message = "failed to record view history", repo = %repo, error = %e);
        }

        self.print(&details, || {
            let p = &details.project;
            println!("{} ({} stars, {} forks)", p.full_name, p.stars, p.forks);
            if !p.description.is_empty() {
                println!("{}", p.description);
            }
            println!("{}", p.url);
            if details.beginner_issues.is_empty() {
                println!("no beginner friendly issues found");
            }
            for issue in &details.beginner_issues {
                println!("  #{} {} ({})", issue.number, issue.title, issue.url);
            }
        });

        Ok(())
    }

    async fn search(&self, query: &str, count: usize) -> Result<(), String> {
        let count_key = count.to_string();
        let key = ResourceKind::Search.key([query, count_key.as_str()]);
        let mut res: Resource<Vec<NormalizedProject>> = Resource::new(ResourceKind::Search, key);
        res.load(&self.cache, || self.api.search(query, count)).await;

        let projects = into_result(res)?;
        self.print(&projects, || print_projects(&projects));
        Ok(())
    }

    async fn insight(&self, city: Option<&str>, repo: Option<&str>) -> Result<(), String> {
        let mut req = InsightRequest::default();

        if let Some(city) = city {
            let weather = self.load_weather(city, Units::Metric, false).await?;
            req.weather_data = Some(to_value(&weather.current)?);
        }

        if let Some(repo) = repo {
            let details = self.load_repo(repo).await?;
            let project = to_value(&details.project)?;
            if req.weather_data.is_some() {
                req.project_data = Some(serde_json::Value::Array(vec![project]));
            } else {
                req.project = Some(project);
            }
        }

        if req.weather_data.is_none() && req.project.is_none() {
            return Err("one of --city or --repo is required".to_owned());
        }

        let key = ResourceKind::Insight.key([city.unwrap_or("-"), repo.unwrap_or("-")]);
        let mut res: Resource<String> = Resource::new(ResourceKind::Insight, key);
        res.load(&self.cache, || self.api.insight(&req)).await;

        let message = into_result(res)?;
        self.print(&message, || println!("{}", message));
        Ok(())
    }

    async fn ask(&self, question: &str, repo: Option<&str>) -> Result<(), String> {
        let answer = self.api.ask(question, repo).await.map_err(|e| e.to_string())?;
        self.print(&answer, || println!("{}", answer.message));
        Ok(())
    }

    async fn bookmark(&self, cmd: BookmarkCommand) -> Result<(), String> {
        match cmd {
            BookmarkCommand::Add { repo } => {
                let details = self.load_repo(&repo).await?;
                let added = self.prefs.add_bookmark(details.project).map_err(|e| e.to_string())?;
                if added {
                    println!("bookmarked {}", repo);
                } else {
                    println!("{} is already bookmarked", repo);
                }
            }
            BookmarkCommand::Remove { id } => {
                let removed = self.prefs.remove_bookmark(id).map_err(|e| e.to_string())?;
                if !removed {
                    return Err(format!("no bookmark with ID {}", id));
                }
                println!("removed bookmark {}", id);
            }
            BookmarkCommand::List => {
                let bookmarks = self.prefs.bookmarks().map_err(|e| e.to_string())?;
                self.print(&bookmarks, || {
                    for p in &bookmarks {
                        println!("{:>12}  {}", p.id, p.full_name);
                    }
                });
            }
        }

        Ok(())
    }

    fn preferences(&self, cmd: PrefsCommand) -> Result<(), String> {
        match cmd {
            PrefsCommand::Show => {
                let languages = self.prefs.preferred_languages().map_err(|e| e.to_string())?;
                let topics = self.prefs.preferred_topics().map_err(|e| e.to_string())?;
                let value = serde_json::json!({ "languages": languages, "topics": topics });
                self.print(&value, || {
                    println!("languages: {}", languages.join(", "));
                    println!("topics: {}", topics.join(", "));
                });
            }
            PrefsCommand::Languages { languages } => {
                self.prefs.set_preferred_languages(&languages).map_err(|e| e.to_string())?;
                println!("saved {} preferred languages", self.prefs.preferred_languages().map_err(|e| e.to_string())?.len());
            }
            PrefsCommand::Topics { topics } => {
                self.prefs.set_preferred_topics(&topics).map_err(|e| e.to_string())?;
                println!("saved {} preferred topics", self.prefs.preferred_topics().map_err(|e| e.to_string())?.len());
            }
            PrefsCommand::History => {
                let history = self.prefs.view_history().map_err(|e| e.to_string())?;
                self.print(&history, || {
                    for name in &history {
                        println!("{}", name);
                    }
                });
            }
        }

        Ok(())
    }

    fn manage_cache(&self, cmd: CacheCommand) -> Result<(), String> {
        match cmd {
            CacheCommand::Clean => {
                let removed = self.cache.clean_cache().map_err(|e| e.to_string())?;
                println!("removed {} expired entries", removed);
            }
            CacheCommand::Clear => {
                let removed = self.cache.clear_all().map_err(|e| e.to_string())?;
                println!("removed {} entries", removed);
            }
        }

        Ok(())
    }

    async fn load_weather(&self, city: &str, units: Units, refresh: bool) -> Result<CombinedWeatherData, String> {
        let key = ResourceKind::Weather.key([city, units.as_str()]);
        let mut res: Resource<CombinedWeatherData> = Resource::new(ResourceKind::Weather, key);
        let fetch = || self.api.weather(city, units, DEFAULT_FORECAST_DAYS);

        if refresh {
            res.refresh(&self.cache, fetch).await;
        } else {
            res.load(&self.cache, fetch).await;
        }

        into_result(res)
    }

    async fn load_repo(&self, repo: &str) -> Result<RepositoryWithIssues, String> {
        let key = ResourceKind::Projects.key(["repo", repo]);
        let mut res: Resource<RepositoryWithIssues> = Resource::new(ResourceKind::Projects, key);
        res.load(&self.cache, || self.api.repository(repo)).await;

        into_result(res)
    }

    fn print<T: Serialize, F: FnOnce()>(&self, value: &T, text: F) {
        if !self.json {
            return text();
        }

        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => tracing::error!(message = "failed to encode output", error = %e),
        }
    }
}

fn into_result<T>(res: Resource<T>) -> Result<T, String>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    if let Some(e) = res.error() {
        return Err(e.to_owned());
    }

    res.into_data().ok_or_else(|| "no data returned".to_owned())
}

fn to_value<T: Serialize>(v: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(v).map_err(|e| e.to_string())
}

fn print_projects(projects: &[NormalizedProject]) {
    for p in projects {
        let language = if p.language.is_empty() { "-" } else { &p.language };
        println!("{:<40} {:>8}★  {:<12} {}", p.full_name, p.stars, language, p.description);
    }
}
