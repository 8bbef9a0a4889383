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

use std::collections::HashMap;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use super::eager_result::{EagerResult, ResultCollector};
use super::io::bolt::message_parameters::{PullParameters, RunParameters};
use super::io::bolt::ResponseCallbacks;
use super::session::holder::ConnectionHolder;
use crate::error_::{Result, ServerError};
use crate::value::{ValueReceive, ValueSend};

/// An explicit transaction.
///
/// The transaction is bound to the closure passed to
/// [`TransactionBuilder::run()`](super::session::TransactionBuilder::run):
/// leaving the closure without having called [`Transaction::commit()`] rolls
/// the transaction back.
#[derive(Debug)]
pub struct Transaction<'tx, 'pool> {
    holder: &'tx mut ConnectionHolder<'pool>,
    bookmark: Arc<AtomicRefCell<Option<String>>>,
    finished: &'tx mut bool,
}

impl<'tx, 'pool> Transaction<'tx, 'pool> {
    pub(crate) fn new(
        holder: &'tx mut ConnectionHolder<'pool>,
        bookmark: Arc<AtomicRefCell<Option<String>>>,
        finished: &'tx mut bool,
    ) -> Self {
        Self {
            holder,
            bookmark,
            finished,
        }
    }

    /// Run a query without parameters inside the transaction and buffer the
    /// full result.
    pub fn run(&mut self, query: &str) -> Result<EagerResult> {
        self.run_inner(query, None)
    }

    /// Run a parameterized query inside the transaction and buffer the full
    /// result.
    pub fn run_with_parameters(
        &mut self,
        query: &str,
        parameters: &HashMap<String, ValueSend>,
    ) -> Result<EagerResult> {
        self.run_inner(query, Some(parameters))
    }

    fn run_inner(
        &mut self,
        query: &str,
        parameters: Option<&HashMap<String, ValueSend>>,
    ) -> Result<EagerResult> {
        let collector = ResultCollector::new();
        let connection = self.holder.get_connection()?;
        connection.run(
            RunParameters::new_transaction_run(query, parameters),
            collector.run_callbacks(),
        )?;
        connection.pull(PullParameters::new_all(), collector.pull_callbacks())?;
        connection.write_all(None)?;
        connection.read_all(None)?;
        Ok(collector.take_result())
    }

    /// Commit the transaction.
    pub fn commit(self) -> Result<()> {
        *self.finished = true;
        let connection = self.holder.get_connection()?;
        let bookmark = Arc::clone(&self.bookmark);
        connection.commit(
            ResponseCallbacks::new()
                .with_on_success(move |mut meta| {
                    if let Some(ValueReceive::String(bm)) = meta.remove("bookmark") {
                        *bookmark.borrow_mut() = Some(bm);
                    }
                    Ok(())
                })
                .with_on_failure(|meta| Err(ServerError::from_meta(meta).into())),
        )?;
        connection.write_all_during_commit(None)?;
        connection.read_all_during_commit(None)
    }

    /// Roll the transaction back.
    pub fn rollback(self) -> Result<()> {
        *self.finished = true;
        Self::rollback_holder(self.holder)
    }

    pub(crate) fn rollback_holder(holder: &mut ConnectionHolder<'_>) -> Result<()> {
        let connection = holder.get_connection()?;
        connection.rollback()?;
        connection.write_all(None)?;
        connection.read_all(None)
    }
}
