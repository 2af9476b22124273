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

use crate::error::ClientError;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sampling parameters sent with every generation request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

pub const INSIGHT_SETTINGS: GenerationSettings = GenerationSettings {
    temperature: 0.7,
    max_output_tokens: 1024,
};

pub const QUESTION_SETTINGS: GenerationSettings = GenerationSettings {
    temperature: 0.4,
    max_output_tokens: 512,
};

const MAX_PROMPT_PROJECTS: usize = 5;

/// Body of an insight request. Exactly one combination of fields selects a prompt, see
/// `InsightMode::select`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_data: Option<Value>,
}

/// Repository fields used when writing prompts. Every field is optional so that any
/// project-like object the dashboard sends can be used.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ProjectContext {
    pub name: String,
    pub full_name: String,
    pub description: String,
    pub language: String,
    #[serde(alias = "stargazers_count")]
    pub stars: u64,
    pub topics: Vec<String>,
}

impl ProjectContext {
    fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.name
        } else {
            &self.full_name
        }
    }
}

/// Current conditions used when writing prompts.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WeatherContext {
    #[serde(alias = "name")]
    pub city: String,
    pub temp: f64,
    pub description: String,
    pub humidity: f64,
    pub wind_speed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsightMode {
    Project(ProjectContext),
    WeatherAndProjects(WeatherContext, Vec<ProjectContext>),
    Weather(WeatherContext),
}

impl InsightMode {
    /// Pick the prompt to use based on which fields of the request are present.
    ///
    /// A field counts as present when it is "truthy": `null`, `false`, `0`, and `""`
    /// are absent while objects and arrays are present even when empty.
    pub fn select(req: &InsightRequest) -> Result<Self, ClientError> {
        let project = req.project.as_ref().filter(|v| is_truthy(v));
        let weather = req.weather_data.as_ref().filter(|v| is_truthy(v));
        let projects = req.project_data.as_ref().filter(|v| is_truthy(v));

        match (project, weather, projects) {
            (Some(p), None, None) => Ok(Self::Project(project_context(p)?)),
            (None, Some(w), Some(ps)) => Ok(Self::WeatherAndProjects(weather_context(w)?, project_list(ps)?)),
            (None, Some(w), None) => Ok(Self::Weather(weather_context(w)?)),
            _ => Err(ClientError::Validation(
                "request must contain exactly one of 'project', 'weatherData' with 'projectData', or 'weatherData'"
                    .to_owned(),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Project(_) => "project",
            Self::WeatherAndProjects(_, _) => "weather_and_projects",
            Self::Weather(_) => "weather",
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            Self::Project(p) => project_prompt(p),
            Self::WeatherAndProjects(w, ps) => weather_projects_prompt(w, ps),
            Self::Weather(w) => weather_prompt(w),
        }
    }
}

pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn project_context(v: &Value) -> Result<ProjectContext, ClientError> {
    serde_json::from_value(v.clone())
        .map_err(|e| ClientError::Validation(format!("'project' is not a valid repository: {}", e)))
}

fn project_list(v: &Value) -> Result<Vec<ProjectContext>, ClientError> {
    match v {
        Value::Array(items) => items.iter().map(project_context).collect(),
        other => Ok(vec![project_context(other)?]),
    }
}

fn weather_context(v: &Value) -> Result<WeatherContext, ClientError> {
    // Combined weather responses nest current conditions under "current"
    let current = v.get("current").unwrap_or(v);
    serde_json::from_value(current.clone())
        .map_err(|e| ClientError::Validation(format!("'weatherData' is not valid weather: {}", e)))
}

fn project_prompt(p: &ProjectContext) -> String {
    let mut prompt = format!(
        "You are a friendly developer advocate. Write a short, engaging insight (3-4 sentences) about the \
         GitHub repository {}.\n",
        p.display_name()
    );
    if !p.description.is_empty() {
        prompt.push_str(&format!("Description: {}\n", p.description));
    }
    if !p.language.is_empty() {
        prompt.push_str(&format!("Primary language: {}\n", p.language));
    }
    prompt.push_str(&format!("Stars: {}\n", p.stars));
    if !p.topics.is_empty() {
        prompt.push_str(&format!("Topics: {}\n", p.topics.join(", ")));
    }
    prompt.push_str("Explain what makes the project interesting and who would enjoy contributing to it.");
    prompt
}

fn weather_projects_prompt(w: &WeatherContext, ps: &[ProjectContext]) -> String {
    let mut prompt = format!(
        "The weather in {} is currently {} at {:.1} degrees. Here are some open source projects:\n",
        w.city, w.description, w.temp
    );
    for p in ps.iter().take(MAX_PROMPT_PROJECTS) {
        prompt.push_str(&format!("- {} ({}): {}\n", p.display_name(), p.language, p.description));
    }
    prompt.push_str(
        "In 3-4 sentences and with a light-hearted tone, suggest which of these projects would be a good one \
         to work on today given the weather, and why.",
    );
    prompt
}

fn weather_prompt(w: &WeatherContext) -> String {
    format!(
        "The current weather in {} is {} with a temperature of {:.1} degrees, {:.0}% humidity, and wind at {:.1}. \
         In 2-3 light-hearted sentences, suggest what kind of coding work suits this weather.",
        w.city, w.description, w.temp, w.humidity, w.wind_speed
    )
}

fn question_prompt(question: &str, repo_name: Option<&str>) -> String {
    let context = match repo_name {
        Some(repo) => format!(
            "You are an expert on the GitHub repository {}. Answer the question about it",
            repo
        ),
        None => "You are a knowledgeable software engineer. Answer the question".to_owned(),
    };

    format!(
        "{} concisely in at most 3 sentences of plain text without markdown formatting.\nQuestion: {}",
        context, question
    )
}

/// Remove markdown emphasis from generated text.
///
/// Only paired markers that open and close at word boundaries on a single line are
/// removed, so arithmetic like `2*3`, list bullets, `snake_case`, and dunder names
/// such as `__init__` are left as they are.
pub fn strip_emphasis(text: &str) -> String {
    let text = strip_delimited(text, '*', 2);
    let text = strip_delimited(&text, '_', 2);
    let text = strip_delimited(&text, '*', 1);
    strip_delimited(&text, '_', 1).trim().to_owned()
}

fn strip_delimited(text: &str, marker: char, width: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if let Some(close) = closing_marker(&chars, i, marker, width) {
            let inner: String = chars[i + width..close].iter().collect();
            // Double underscores around a bare name are an identifier, not emphasis
            if !(marker == '_' && width == 2 && is_identifier(&inner)) {
                out.push_str(&inner);
                i = close + width;
                continue;
            }
        }

        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Index of the marker run closing the one that opens at `open`, if `open` starts emphasis.
fn closing_marker(chars: &[char], open: usize, marker: char, width: usize) -> Option<usize> {
    let is_run = |at: usize| at + width <= chars.len() && chars[at..at + width].iter().all(|&c| c == marker);
    let boundary = |c: Option<&char>| c.map_or(true, |c| !c.is_alphanumeric() && *c != marker);

    if !is_run(open) || !boundary(open.checked_sub(1).and_then(|p| chars.get(p))) {
        return None;
    }

    match chars.get(open + width) {
        Some(c) if !c.is_whitespace() && *c != marker => {}
        _ => return None,
    }

    let mut at = open + width + 1;
    while at < chars.len() && chars[at] != '\n' {
        let before = chars[at - 1];
        if is_run(at) && !before.is_whitespace() && before != marker && boundary(chars.get(at + width)) {
            return Some(at);
        }
        at += 1;
    }

    None
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize, Debug)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

#[derive(Debug)]
pub struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
}

impl GeminiClient {
    const USER_AGENT: &'static str = "devdash (https://github.com/56quarters/devdash)";
    const JSON_RESPONSE: &'static str = "application/json";
    const TARGET: &'static str = "Gemini";

    pub fn new(client: Client, base_url: &str, api_key: Option<String>, model: &str) -> Result<Self, url::ParseError> {
        Ok(GeminiClient {
            client,
            base_url: Url::parse(base_url)?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.to_owned(),
        })
    }

    /// Generate text for a prompt and return the first part of the first candidate.
    pub async fn generate(&self, prompt: &str, settings: GenerationSettings) -> Result<String, ClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ClientError::Configuration("Gemini API key"))?;

        let url = self.endpoint();
        tracing::debug!(message = "making generate content request", url = %url, model = %self.model);

        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: settings.temperature,
                max_output_tokens: settings.max_output_tokens,
            },
        };

        let res = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Network)?;

        let status = res.status();
        if !status.is_success() {
            return Err(ClientError::from_status(status, Self::TARGET));
        }

        let parsed = res
            .json::<GenerateResponse>()
            .await
            .map_err(|e| ClientError::from_reqwest(e, Self::TARGET))?;

        parsed
            .first_text()
            .ok_or_else(|| ClientError::MalformedResponse(Self::TARGET.to_owned()))
    }

    /// Generate an insight using the prompt for the given mode.
    pub async fn insight(&self, mode: &InsightMode) -> Result<String, ClientError> {
        self.generate(&mode.prompt(), INSIGHT_SETTINGS).await
    }

    /// Answer a free-text question, optionally about a named repository.
    pub async fn answer(&self, question: &str, repo_name: Option<&str>) -> Result<String, ClientError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ClientError::Validation("'question' must not be empty".to_owned()));
        }

        let repo_name = repo_name.map(str::trim).filter(|r| !r.is_empty());
        let text = self.generate(&question_prompt(question, repo_name), QUESTION_SETTINGS).await?;
        Ok(strip_emphasis(&text))
    }

    fn endpoint(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(&["v1beta", "models"])
                .push(&format!("{}:generateContent", self.model));
        }

        url
    }
}

#[cfg(test)]
mod tests {
    use super::{
        is_truthy, question_prompt, strip_emphasis, GeminiClient, GenerateResponse, InsightMode, InsightRequest,
    };
    use crate::error::ClientError;
    use reqwest::Client;
    use serde_json::json;

    fn request(body: serde_json::Value) -> InsightRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_mode_project() {
        let req = request(json!({"project": {"full_name": "tokio-rs/tokio", "language": "Rust", "stargazers_count": 10}}));
        match InsightMode::select(&req).unwrap() {
            InsightMode::Project(p) => {
                assert_eq!("tokio-rs/tokio", p.full_name);
                assert_eq!(10, p.stars);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_mode_weather_and_projects() {
        let req = request(json!({
            "weatherData": {"current": {"city": "London", "temp": 11.5, "description": "rain"}},
            "projectData": [{"name": "ripgrep"}, {"name": "tokio"}]
        }));
        match InsightMode::select(&req).unwrap() {
            InsightMode::WeatherAndProjects(w, ps) => {
                assert_eq!("London", w.city);
                assert_eq!(2, ps.len());
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_mode_weather() {
        let req = request(json!({"weatherData": {"name": "Paris", "temp": 20.0}}));
        assert_eq!("weather", InsightMode::select(&req).unwrap().name());
    }

    #[test]
    fn test_mode_ambiguous_rejected() {
        let req = request(json!({"project": {"name": "a"}, "weatherData": {"city": "London"}}));
        assert!(matches!(InsightMode::select(&req), Err(ClientError::Validation(_))));

        // Empty objects are present, like any other object
        let req = request(json!({"project": {"name": "a"}, "weatherData": {}}));
        assert!(matches!(InsightMode::select(&req), Err(ClientError::Validation(_))));

        let req = request(json!({"projectData": [{"name": "a"}]}));
        assert!(matches!(InsightMode::select(&req), Err(ClientError::Validation(_))));

        assert!(InsightMode::select(&InsightRequest::default()).is_err());
    }

    #[test]
    fn test_mode_falsy_fields_ignored() {
        let req = request(json!({"project": {"name": "a"}, "weatherData": null, "projectData": ""}));
        assert_eq!("project", InsightMode::select(&req).unwrap().name());
    }

    #[test]
    fn test_truthy() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!("x")));
    }

    #[test]
    fn test_first_text() {
        let res: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "hello"}, {"text": "ignored"}]}}]
        }))
        .unwrap();
        assert_eq!(Some("hello".to_owned()), res.first_text());

        let res: GenerateResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert_eq!(None, res.first_text());

        let res: GenerateResponse = serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(None, res.first_text());
    }

    #[test]
    fn test_strip_emphasis() {
        assert_eq!("Use tokio for async IO.", strip_emphasis("**Use** *tokio* for __async IO__."));
        assert_eq!("It really matters", strip_emphasis("It _really_ matters"));
        assert_eq!("snake_case stays", strip_emphasis("snake_case stays"));

        let literal = "Override __init__ and use 2*3 in\n* item one\n* item two";
        assert_eq!(literal, strip_emphasis(literal));
        assert_eq!("2 * 3 and *", strip_emphasis("2 * 3 and *"));
        assert_eq!("Use Rust, not 2*3", strip_emphasis("Use **Rust**, not 2*3"));
    }

    #[test]
    fn test_question_prompt_mentions_repo() {
        assert!(question_prompt("What is it?", Some("tokio-rs/tokio")).contains("tokio-rs/tokio"));
        assert!(!question_prompt("What is Rust?", None).contains("repository"));
    }

    #[test]
    fn test_endpoint() {
        let client = GeminiClient::new(Client::new(), "https://example.com/", None, "gemini-1.5-flash").unwrap();
        assert_eq!(
            "https://example.com/v1beta/models/gemini-1.5-flash:generateContent",
            client.endpoint().as_str()
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let client = GeminiClient::new(Client::new(), "https://example.com/", None, "gemini-1.5-flash").unwrap();
        let res = client.generate("hi", super::INSIGHT_SETTINGS).await;
        assert!(matches!(res, Err(ClientError::Configuration(_))));
    }
}
