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
use crate::forecast::{daily_forecast, DailyForecast, ForecastSample};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_FORECAST_DAYS: usize = 5;

/// Unit system used for temperatures and wind speed in upstream responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
            Self::Standard => "standard",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            "standard" => Ok(Self::Standard),
            other => Err(ClientError::Validation(format!(
                "units must be one of 'metric', 'imperial', or 'standard', got '{}'",
                other
            ))),
        }
    }
}

/// Where to fetch a forecast for. Coordinates are preferred since they avoid the
/// upstream having to geocode the city name a second time.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastTarget {
    Coordinates(Coord),
    City(String),
}

impl fmt::Display for ForecastTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinates(c) => write!(f, "{},{}", c.lat, c.lon),
            Self::City(city) => f.write_str(city),
        }
    }
}

#[derive(Debug)]
pub struct WeatherClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl WeatherClient {
    const USER_AGENT: &'static str = "devdash (https://github.com/56quarters/devdash)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Result<Self, url::ParseError> {
        Ok(WeatherClient {
            client,
            base_url: Url::parse(base_url)?,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Fetch current conditions for a city.
    pub async fn current(&self, city: &str, units: Units) -> Result<CurrentWeather, ClientError> {
        let mut url = self.endpoint(&["data", "2.5", "weather"]);
        url.query_pairs_mut().append_pair("q", city).append_pair("units", units.as_str());
        tracing::debug!(message = "making current weather request", url = %url);

        let current: UpstreamCurrent = self.make_request(url, city).await?;
        Ok(current.into())
    }

    /// Fetch the raw 3-hour forecast for a location.
    pub async fn forecast(&self, target: &ForecastTarget, units: Units) -> Result<UpstreamForecast, ClientError> {
        let mut url = self.endpoint(&["data", "2.5", "forecast"]);
        {
            let mut pairs = url.query_pairs_mut();
            match target {
                ForecastTarget::Coordinates(c) => {
                    pairs
                        .append_pair("lat", &c.lat.to_string())
                        .append_pair("lon", &c.lon.to_string());
                }
                ForecastTarget::City(city) => {
                    pairs.append_pair("q", city);
                }
            }
            pairs.append_pair("units", units.as_str());
        }
        tracing::debug!(message = "making forecast request", url = %url);

        self.make_request(url, &target.to_string()).await
    }

    /// Fetch current conditions and the forecast for a city, reducing the forecast to
    /// at most `days` daily summaries.
    pub async fn combined(&self, city: &str, units: Units, days: usize) -> Result<CombinedWeatherData, ClientError> {
        let current = self.current(city, units).await?;
        let target = match current.coord {
            Some(c) => ForecastTarget::Coordinates(c),
            None => ForecastTarget::City(city.to_owned()),
        };

        let forecast = self.forecast(&target, units).await?;
        let daily = daily_forecast(&forecast.list, forecast.city.timezone, days);

        Ok(CombinedWeatherData {
            current,
            forecast: daily,
        })
    }

    async fn make_request<T: DeserializeOwned>(&self, url: Url, target: &str) -> Result<T, ClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ClientError::Configuration("weather API key"))?;

        let res = self
            .client
            .get(url)
            .query(&[("appid", api_key)])
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Network)?;

        let status = res.status();
        if !status.is_success() {
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

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Condition {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Deserialize, Debug)]
struct UpstreamCurrent {
    #[serde(default)]
    coord: Option<Coord>,
    #[serde(default)]
    weather: Vec<Condition>,
    main: UpstreamCurrentMain,
    #[serde(default)]
    wind: Option<UpstreamWind>,
    dt: i64,
    #[serde(default)]
    timezone: i64,
    #[serde(default)]
    sys: Option<UpstreamSys>,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize, Debug)]
struct UpstreamCurrentMain {
    temp: f64,
    #[serde(default)]
    feels_like: Option<f64>,
    #[serde(default)]
    temp_min: Option<f64>,
    #[serde(default)]
    temp_max: Option<f64>,
    #[serde(default)]
    pressure: f64,
    #[serde(default)]
    humidity: f64,
}

#[derive(Deserialize, Debug)]
struct UpstreamWind {
    #[serde(default)]
    speed: f64,
}

#[derive(Deserialize, Debug)]
struct UpstreamSys {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    sunrise: Option<i64>,
    #[serde(default)]
    sunset: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpstreamForecast {
    #[serde(default)]
    pub list: Vec<ForecastSample>,
    #[serde(default)]
    pub city: ForecastCity,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForecastCity {
    #[serde(default)]
    pub name: String,
    /// Offset from UTC in seconds.
    #[serde(default)]
    pub timezone: i64,
}

/// Current conditions flattened into the shape the dashboard renders.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CurrentWeather {
    pub city: String,
    pub country: String,
    pub coord: Option<Coord>,
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub condition: String,
    pub description: String,
    pub icon: String,
    pub dt: i64,
    pub timezone: i64,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
}

impl From<UpstreamCurrent> for CurrentWeather {
    fn from(c: UpstreamCurrent) -> Self {
        let condition = c.weather.into_iter().next().unwrap_or_else(|| Condition {
            id: 0,
            main: String::new(),
            description: String::new(),
            icon: String::new(),
        });
        let sys = c.sys.unwrap_or(UpstreamSys {
            country: None,
            sunrise: None,
            sunset: None,
        });

        CurrentWeather {
            city: c.name,
            country: sys.country.unwrap_or_default(),
            coord: c.coord,
            temp: c.main.temp,
            feels_like: c.main.feels_like.unwrap_or(c.main.temp),
            temp_min: c.main.temp_min.unwrap_or(c.main.temp),
            temp_max: c.main.temp_max.unwrap_or(c.main.temp),
            humidity: c.main.humidity,
            pressure: c.main.pressure,
            wind_speed: c.wind.map(|w| w.speed).unwrap_or_default(),
            condition: condition.main,
            description: condition.description,
            icon: condition.icon,
            dt: c.dt,
            timezone: c.timezone,
            sunrise: sys.sunrise,
            sunset: sys.sunset,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CombinedWeatherData {
    pub current: CurrentWeather,
    pub forecast: Vec<DailyForecast>,
}
