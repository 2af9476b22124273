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

//! Reduction of a 3-hour resolution forecast into per-day summaries.
//!
//! Samples are grouped by the calendar date they fall on in the forecast location's
//! timezone (the sample timestamp shifted by the offset reported with the forecast).
//! Each group is then reduced into a single `DailyForecast`.

use crate::weather::Condition;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

const LOCAL_NOON_MINUTES: u32 = 12 * 60;
const NOON_WINDOW_START: u32 = 11 * 60;
const NOON_WINDOW_END: u32 = 13 * 60;

/// Single entry of the forecast `list` array.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ForecastSample {
    pub dt: i64,
    pub main: SampleMain,
    #[serde(default)]
    pub weather: Vec<Condition>,
    /// Probability of precipitation, 0 to 1.
    #[serde(default)]
    pub pop: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SampleMain {
    pub temp: f64,
    #[serde(default)]
    pub temp_min: Option<f64>,
    #[serde(default)]
    pub temp_max: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub dt: i64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub icon: String,
    pub description: String,
    pub pop: f64,
}

/// Group `samples` by local calendar day and reduce each group, keeping at most `days`
/// leading days in the order they first appear.
pub fn daily_forecast(samples: &[ForecastSample], tz_offset_secs: i64, days: usize) -> Vec<DailyForecast> {
    let mut buckets: Vec<(NaiveDate, Vec<&ForecastSample>)> = Vec::new();

    for sample in samples {
        let local = match local_time(sample.dt, tz_offset_secs) {
            Some(t) => t,
            None => {
                tracing::warn!(message = "skipping forecast sample with invalid timestamp", dt = sample.dt);
                continue;
            }
        };

        let date = local.date();
        match buckets.iter_mut().find(|(d, _)| *d == date) {
            Some((_, bucket)) => bucket.push(sample),
            None => buckets.push((date, vec![sample])),
        }
    }

    buckets
        .into_iter()
        .take(days)
        .map(|(date, bucket)| summarize(date, &bucket, tz_offset_secs))
        .collect()
}

/// Pick the most frequent icon with night variants folded into their daytime equivalent.
///
/// When more than one icon shares the highest count, the one seen first wins. Returns
/// `None` when there are no icons at all.
pub fn representative_icon<'a, I>(icons: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(String, usize)> = Vec::new();
    for icon in icons {
        let icon = day_icon(icon);
        match counts.iter_mut().find(|(i, _)| *i == icon) {
            Some((_, count)) => *count += 1,
            None => counts.push((icon, 1)),
        }
    }

    let mut best: Option<(String, usize)> = None;
    for (icon, count) in counts {
        if best.as_ref().map_or(true, |(_, c)| count > *c) {
            best = Some((icon, count));
        }
    }

    best.map(|(icon, _)| icon)
}

/// Convert a night icon code (`01n`) to the daytime code (`01d`).
pub fn day_icon(icon: &str) -> String {
    match icon.strip_suffix('n') {
        Some(base) => format!("{}d", base),
        None => icon.to_owned(),
    }
}

fn local_time(dt: i64, tz_offset_secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(dt.checked_add(tz_offset_secs)?, 0).map(|t| t.naive_utc())
}

fn summarize(date: NaiveDate, bucket: &[&ForecastSample], tz_offset_secs: i64) -> DailyForecast {
    let temp_min = bucket
        .iter()
        .map(|s| s.main.temp_min.unwrap_or(s.main.temp))
        .fold(f64::INFINITY, f64::min);
    let temp_max = bucket
        .iter()
        .map(|s| s.main.temp_max.unwrap_or(s.main.temp))
        .fold(f64::NEG_INFINITY, f64::max);
    let pop = bucket.iter().map(|s| s.pop).sum::<f64>() / bucket.len().max(1) as f64;

    let conditions: Vec<&Condition> = bucket.iter().filter_map(|s| s.weather.first()).collect();
    let icon = representative_icon(conditions.iter().map(|c| c.icon.as_str())).unwrap_or_default();
    let description = conditions
        .iter()
        .find(|c| day_icon(&c.icon) == icon)
        .map(|c| c.description.clone())
        .unwrap_or_default();

    let dt = nearest_noon(bucket, tz_offset_secs)
        .or_else(|| bucket.first().map(|s| s.dt))
        .unwrap_or_default();

    DailyForecast {
        date,
        dt,
        temp_min,
        temp_max,
        icon,
        description,
        pop,
    }
}

fn nearest_noon(bucket: &[&ForecastSample], tz_offset_secs: i64) -> Option<i64> {
    bucket
        .iter()
        .filter_map(|s| {
            let local = local_time(s.dt, tz_offset_secs)?;
            let minutes = local.hour() * 60 + local.minute();
            if (NOON_WINDOW_START..=NOON_WINDOW_END).contains(&minutes) {
                Some((minutes.abs_diff(LOCAL_NOON_MINUTES), s.dt))
            } else {
                None
            }
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, dt)| dt)
}
