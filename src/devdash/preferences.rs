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

//! Bookmarks, preferred languages and topics, and recently viewed repositories.

use crate::error::StorageError;
use crate::github::NormalizedProject;
use crate::storage::Storage;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const BOOKMARKS_KEY: &str = "devdash_bookmarks";
pub const LANGUAGES_KEY: &str = "devdash_preferred_languages";
pub const TOPICS_KEY: &str = "devdash_preferred_topics";
pub const HISTORY_KEY: &str = "devdash_view_history";
pub const MAX_HISTORY: usize = 20;

pub struct Preferences<S> {
    storage: S,
}

impl<S: Storage> Preferences<S> {
    pub fn new(storage: S) -> Self {
        Preferences { storage }
    }

    pub fn bookmarks(&self) -> Result<Vec<NormalizedProject>, StorageError> {
        self.read(BOOKMARKS_KEY)
    }

    pub fn is_bookmarked(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.bookmarks()?.iter().any(|p| p.id == id))
    }

    /// Bookmark a project, returning false if it was already bookmarked.
    pub fn add_bookmark(&self, project: NormalizedProject) -> Result<bool, StorageError> {
        let mut bookmarks = self.bookmarks()?;
        if bookmarks.iter().any(|p| p.id == project.id) {
            return Ok(false);
        }

        bookmarks.push(project);
        self.write(BOOKMARKS_KEY, &bookmarks)?;
        Ok(true)
    }

    /// Remove a bookmark by project ID, returning false if there was none.
    pub fn remove_bookmark(&self, id: i64) -> Result<bool, StorageError> {
        let mut bookmarks = self.bookmarks()?;
        let before = bookmarks.len();
        bookmarks.retain(|p| p.id != id);

        if bookmarks.len() == before {
            return Ok(false);
        }

        self.write(BOOKMARKS_KEY, &bookmarks)?;
        Ok(true)
    }

    pub fn preferred_languages(&self) -> Result<Vec<String>, StorageError> {
        self.read(LANGUAGES_KEY)
    }

    /// Replace the preferred languages. Blank and repeated values are dropped.
    pub fn set_preferred_languages(&self, languages: &[String]) -> Result<(), StorageError> {
        self.write(LANGUAGES_KEY, &distinct(languages))
    }

    pub fn preferred_topics(&self) -> Result<Vec<String>, StorageError> {
        self.read(TOPICS_KEY)
    }

    /// Replace the preferred topics. Blank and repeated values are dropped.
    pub fn set_preferred_topics(&self, topics: &[String]) -> Result<(), StorageError> {
        self.write(TOPICS_KEY, &distinct(topics))
    }

    /// Language and topic used to filter project highlights when none are given: the
    /// first of each preference, if any.
    pub fn default_filters(&self) -> Result<(Option<String>, Option<String>), StorageError> {
        let language = self.preferred_languages()?.into_iter().next();
        let topic = self.preferred_topics()?.into_iter().next();
        Ok((language, topic))
    }

    /// Full names of viewed repositories, most recent first.
    pub fn view_history(&self) -> Result<Vec<String>, StorageError> {
        self.read(HISTORY_KEY)
    }

    /// Move `full_name` to the front of the view history, dropping the oldest entries
    /// past `MAX_HISTORY`.
    pub fn record_view(&self, full_name: &str) -> Result<(), StorageError> {
        let mut history = self.view_history()?;
        history.retain(|n| n != full_name);
        history.insert(0, full_name.to_owned());
        history.truncate(MAX_HISTORY);

        self.write(HISTORY_KEY, &history)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StorageError> {
        match self.storage.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn write<T: Serialize>(&self, key: &str, values: &[T]) -> Result<(), StorageError> {
        self.storage.set(key, &serde_json::to_string(values)?)
    }
}

fn distinct(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if !out.iter().any(|o| o.eq_ignore_ascii_case(v)) {
            out.push(v.to_owned());
        }
    }

    out
}
