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

use clap::Parser;
use devdash::clock::SystemClock;
use devdash::gemini::GeminiClient;
use devdash::github::GitHubClient;
use devdash::http::RequestContext;
use devdash::weather::WeatherClient;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3001);
const DEFAULT_TIMEOUT_MILLIS: u64 = 10000;
const DEFAULT_WEATHER_URL: &str = "https://api.openweathermap.org/";
const DEFAULT_GITHUB_URL: &str = "https://api.github.com/";
const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Parser)]
#[clap(name = "devdash", version = clap::crate_version!())]
struct DevdashApplication {
    /// Key for the OpenWeather API. Weather endpoints respond with an error if not set.
    #[clap(long, env = "OPENWEATHER_API_KEY", hide_env_values = true)]
    weather_api_key: Option<String>,

    /// Base URL for the OpenWeather API
    #[clap(long, env = "OPENWEATHER_API_URL", default_value_t = DEFAULT_WEATHER_URL.into())]
    weather_api_url: String,

    /// Token for the GitHub API. Requests are made without authentication if not set,
    /// which has a much lower rate limit.
    #[clap(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Base URL for the GitHub API
    #[clap(long, env = "GITHUB_API_URL", default_value_t = DEFAULT_GITHUB_URL.into())]
    github_api_url: String,

    /// Key for the Gemini API. Insight endpoints respond with an error if not set.
    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Base URL for the Gemini API
    #[clap(long, env = "GEMINI_API_URL", default_value_t = DEFAULT_GEMINI_URL.into())]
    gemini_api_url: String,

    /// Gemini model used to generate insights and answers
    #[clap(long, env = "GEMINI_MODEL", default_value_t = DEFAULT_GEMINI_MODEL.into())]
    gemini_model: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for requests to upstream APIs, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind to.
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = DevdashApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let weather = WeatherClient::new(http_client.clone(), &opts.weather_api_url, opts.weather_api_key.clone())
        .unwrap_or_else(|e| {
            tracing::error!(message = "invalid weather API URL", url = %opts.weather_api_url, error = %e);
            process::exit(1)
        });

    let github = GitHubClient::new(
        http_client.clone(),
        &opts.github_api_url,
        opts.github_token.clone(),
        Arc::new(SystemClock),
    )
    .unwrap_or_else(|e| {
        tracing::error!(message = "invalid GitHub API URL", url = %opts.github_api_url, error = %e);
        process::exit(1)
    });

    let gemini = GeminiClient::new(
        http_client,
        &opts.gemini_api_url,
        opts.gemini_api_key.clone(),
        &opts.gemini_model,
    )
    .unwrap_or_else(|e| {
        tracing::error!(message = "invalid Gemini API URL", url = %opts.gemini_api_url, error = %e);
        process::exit(1)
    });

    if !github.is_authenticated() {
        tracing::warn!(message = "no GitHub token set, requests will be heavily rate limited");
    }

    let context = Arc::new(RequestContext::new(weather, github, gemini, Arc::new(SystemClock)));
    let app = devdash::http::router(context);

    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr());

    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
