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

//! Caching API proxy for a weather, GitHub, and AI developer dashboard
//!
//! ## Features
//!
//! `devdash` is a small HTTP server that sits between a developer dashboard and the
//! upstream services it displays data from: [OpenWeather] for current conditions and
//! forecasts, the [GitHub API] for project highlights, search, and beginner friendly
//! issues, and [Gemini] for generated insights. Secrets for each of these stay on the
//! server and responses are cached in memory so that a busy dashboard doesn't burn
//! through upstream rate limits.
//!
//! * Current weather plus a daily forecast summarized from 3-hour samples.
//! * Trending or curated GitHub repositories, with fallbacks when GitHub is unavailable.
//! * Repository details merged with issues labeled for newcomers.
//! * Short insights and answers to questions about a repository, generated by Gemini.
//!
//! `dashctl` is a terminal client for the server. It keeps its own expiring cache,
//! bookmarks, preferred languages and topics, and view history in a JSON file in your
//! data directory. Preferred languages and topics fill in `projects` filters.
//!
//! [OpenWeather]: https://openweathermap.org/api
//! [GitHub API]: https://docs.github.com/en/rest
//! [Gemini]: https://ai.google.dev/
//!
//! ## Build
//!
//! `devdash` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/devdash.git && cd devdash
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Configuration
//!
//! Keys for the upstream services are read from the environment (or the matching
//! command line flags). A service without a key responds with a `500` error explaining
//! that it isn't configured. GitHub works without a token but is limited to 60 requests
//! per hour.
//!
//! * `OPENWEATHER_API_KEY` - Key for the OpenWeather API.
//! * `GITHUB_TOKEN` - Optional GitHub token.
//! * `GEMINI_API_KEY` - Key for the Gemini API.
//! * `GEMINI_MODEL` - Gemini model to use, `gemini-1.5-flash` by default.
//!
//! ### Run
//!
//! ```text
//! export OPENWEATHER_API_KEY=...
//! export GEMINI_API_KEY=...
//! ./devdash --bind 127.0.0.1:3001
//! ```
//!
//! ### Endpoints
//!
//! * `GET /api/weather?city=London&units=metric&days=5` - Current weather and daily forecast.
//! * `GET /api/weather/current?city=London` - Current weather only.
//! * `GET /api/github?filter=trending&since=weekly&language=rust&count=6` - Project highlights.
//! * `GET /api/github?repo=owner/name` - Repository details with beginner friendly issues.
//! * `GET /api/github/search?q=http+server` - Repository search.
//! * `GET /api/github/issues?repo=owner/name` - Beginner friendly issues.
//! * `POST /api/gemini` - Insight for a project, weather, or both.
//! * `POST /api/gemini/question` - Answer to a question, optionally about a repository.
//! * `GET /metrics` - Cache and upstream request counts in OpenMetrics format.
//! * `GET /health` - Liveness check.
//!
//! ### Terminal client
//!
//! ```text
//! ./dashctl weather London
//! ./dashctl projects --filter trending --language rust
//! ./dashctl prefs languages rust go
//! ./dashctl repo tokio-rs/tokio
//! ./dashctl ask "How do I get started contributing?" --repo tokio-rs/tokio
//! ```
//!

pub mod cache;
pub mod clock;
pub mod error;
pub mod fetch;
pub mod forecast;
pub mod gemini;
pub mod github;
pub mod http;
pub mod local_cache;
pub mod metrics;
pub mod preferences;
pub mod projects;
pub mod storage;
pub mod weather;
