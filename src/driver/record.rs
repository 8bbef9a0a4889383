// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use crate::value::ValueReceive;

/// A single row of a query result.
#[derive(Debug)]
pub struct Record {
    pub entries: Vec<(Arc<String>, ValueReceive)>,
}

impl Record {
    pub(crate) fn new(keys: &[Arc<String>], fields: Vec<ValueReceive>) -> Self {
        Self {
            entries: keys.iter().map(Arc::clone).zip(fields).collect(),
        }
    }

    /// Iterate over the record's column names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Iterate over the record's values.
    pub fn values(&self) -> impl Iterator<Item = &ValueReceive> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Get the value of the given column, if present.
    pub fn value(&self, key: &str) -> Option<&ValueReceive> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, value)| value)
    }

    /// Remove and return the value of the given column, if present.
    pub fn take_value(&mut self, key: &str) -> Option<ValueReceive> {
        let index = self.entries.iter().position(|(k, _)| k.as_str() == key)?;
        Some(self.entries.remove(index).1)
    }
}
