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

use std::mem;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use super::io::bolt::{BoltRecordFields, ResponseCallbacks};
use super::record::Record;
use crate::error_::{BoltError, Result, ServerError};
use crate::value::ValueReceive;

/// A fully buffered query result.
#[derive(Debug)]
pub struct EagerResult {
    pub keys: Vec<Arc<String>>,
    pub records: Vec<Record>,
}

impl EagerResult {
    /// Extract the single value of the single record, if the result has this
    /// shape.
    pub fn into_single_value(mut self) -> Option<ValueReceive> {
        if self.records.len() != 1 {
            return None;
        }
        let mut record = self.records.pop()?;
        if record.entries.len() != 1 {
            return None;
        }
        Some(record.entries.pop()?.1)
    }
}

/// Collects the RUN/PULL response stream of one query into an [`EagerResult`].
///
/// The slots are shared with the response callbacks; they are filled while
/// the replies are read off the wire.
#[derive(Debug, Default)]
pub(crate) struct ResultCollector {
    keys: Arc<AtomicRefCell<Vec<Arc<String>>>>,
    records: Arc<AtomicRefCell<Vec<BoltRecordFields>>>,
    bookmark: Arc<AtomicRefCell<Option<String>>>,
}

impl ResultCollector {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    pub(crate) fn run_callbacks(&self) -> ResponseCallbacks {
        let keys = Arc::clone(&self.keys);
        ResponseCallbacks::new()
            .with_on_success(move |mut meta| {
                let Some(fields) = meta.remove("fields") else {
                    return Ok(());
                };
                let fields = fields
                    .try_into_list()
                    .map_err(|_| BoltError::protocol_error("RUN \"fields\" was not a list"))?;
                *keys.borrow_mut() = fields
                    .into_iter()
                    .map(|field| {
                        field
                            .try_into_string()
                            .map(Arc::new)
                            .map_err(|_| {
                                BoltError::protocol_error("RUN \"fields\" contained a non-string")
                            })
                    })
                    .collect::<Result<_>>()?;
                Ok(())
            })
            .with_on_failure(|meta| Err(ServerError::from_meta(meta).into()))
    }

    pub(crate) fn pull_callbacks(&self) -> ResponseCallbacks {
        let records = Arc::clone(&self.records);
        let bookmark = Arc::clone(&self.bookmark);
        ResponseCallbacks::new()
            .with_on_record(move |fields| {
                records.borrow_mut().push(fields);
                Ok(())
            })
            .with_on_success(move |mut meta| {
                if let Some(ValueReceive::String(bm)) = meta.remove("bookmark") {
                    *bookmark.borrow_mut() = Some(bm);
                }
                Ok(())
            })
            .with_on_failure(|meta| Err(ServerError::from_meta(meta).into()))
    }

    pub(crate) fn take_bookmark(&self) -> Option<String> {
        self.bookmark.borrow_mut().take()
    }

    pub(crate) fn take_result(&self) -> EagerResult {
        let keys = mem::take(&mut *self.keys.borrow_mut());
        let records = mem::take(&mut *self.records.borrow_mut())
            .into_iter()
            .map(|fields| Record::new(&keys, fields))
            .collect();
        EagerResult { keys, records }
    }
}
