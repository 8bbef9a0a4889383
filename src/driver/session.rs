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

pub mod bookmarks;
pub(crate) mod holder;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use log::warn;

use super::eager_result::{EagerResult, ResultCollector};
use super::io::bolt::message_parameters::{BeginParameters, PullParameters, RunParameters};
use super::io::bolt::ResponseCallbacks;
use super::io::pool::Pool;
use super::transaction::Transaction;
use super::RoutingControl;
use crate::error_::{Result, ServerError};
use crate::value::ValueSend;
use bookmarks::Bookmarks;
use holder::ConnectionHolder;

/// Configure how a session should behave.
#[derive(Debug, Default)]
pub struct SessionConfig {
    pub(crate) database: Option<Arc<String>>,
    pub(crate) bookmarks: Option<Arc<Bookmarks>>,
}

impl SessionConfig {
    /// Create a new session configuration with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the database the session should operate on.
    ///
    /// Always specify the database when possible: it spares the driver a
    /// round-trip and lets the routing layer keep a dedicated routing table
    /// per database.
    #[inline]
    pub fn with_database(mut self, database: Arc<String>) -> Self {
        self.database = Some(database);
        self
    }

    /// Use the default database of the server.
    ///
    /// This is the *default*.
    #[inline]
    pub fn with_default_database(mut self) -> Self {
        self.database = None;
        self
    }

    /// Bookmarks the session's first unit of work should wait for.
    #[inline]
    pub fn with_bookmarks(mut self, bookmarks: Arc<Bookmarks>) -> Self {
        self.bookmarks = Some(bookmarks);
        self
    }

    /// Start the session without any bookmarks.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_bookmarks(mut self) -> Self {
        self.bookmarks = None;
        self
    }
}

/// A session spawned from a [`Driver`](super::Driver).
///
/// Sessions borrow connections from the driver's pool for every unit of work
/// and chain those units causally through bookmarks.
#[derive(Debug)]
pub struct Session<'driver> {
    config: SessionConfig,
    pool: &'driver Pool,
    latest_bookmarks: Option<Arc<Bookmarks>>,
}

impl<'driver> Session<'driver> {
    pub(crate) fn new(config: SessionConfig, pool: &'driver Pool) -> Self {
        Self {
            config,
            pool,
            latest_bookmarks: None,
        }
    }

    /// Prepare a query that manages its own transaction.
    pub fn auto_commit<'session>(
        &'session mut self,
        query: impl Into<String>,
    ) -> AutoCommitBuilder<'driver, 'session> {
        AutoCommitBuilder::new(self, query.into())
    }

    /// Prepare an explicit transaction.
    pub fn transaction<'session>(&'session mut self) -> TransactionBuilder<'driver, 'session> {
        TransactionBuilder::new(self)
    }

    /// The bookmarks the next unit of work would wait for.
    pub fn last_bookmarks(&self) -> Arc<Bookmarks> {
        self.bookmarks_for_work()
            .unwrap_or_else(|| Arc::new(Bookmarks::empty()))
    }

    fn bookmarks_for_work(&self) -> Option<Arc<Bookmarks>> {
        self.latest_bookmarks
            .clone()
            .or_else(|| self.config.bookmarks.clone())
    }

    fn update_bookmark(&mut self, bookmark: Option<String>) {
        if let Some(bookmark) = bookmark {
            self.latest_bookmarks = Some(Arc::new(Bookmarks::from_raw([bookmark])));
        }
    }
}

/// See [`Session::auto_commit()`].
#[derive(Debug)]
pub struct AutoCommitBuilder<'driver, 'session> {
    session: &'session mut Session<'driver>,
    query: String,
    parameters: HashMap<String, ValueSend>,
    mode: RoutingControl,
    tx_timeout: Option<i64>,
    tx_metadata: HashMap<String, ValueSend>,
}

impl<'driver, 'session> AutoCommitBuilder<'driver, 'session> {
    fn new(session: &'session mut Session<'driver>, query: String) -> Self {
        Self {
            session,
            query,
            parameters: HashMap::new(),
            mode: RoutingControl::Write,
            tx_timeout: None,
            tx_metadata: HashMap::new(),
        }
    }

    /// Use query parameters (instead of string interpolation) to avoid
    /// injection attacks and improve performance.
    #[inline]
    pub fn with_parameters(mut self, parameters: HashMap<String, ValueSend>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Tell the routing layer whether a read server suffices for this query.
    ///
    /// The default is [`RoutingControl::Write`].
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Instruct the server to abort the transaction after the given timeout
    /// in milliseconds.
    #[inline]
    pub fn with_transaction_timeout(mut self, timeout_ms: i64) -> Self {
        self.tx_timeout = Some(timeout_ms);
        self
    }

    /// Attach metadata to the transaction (visible in the server's query
    /// log and to `SHOW TRANSACTIONS`).
    #[inline]
    pub fn with_transaction_meta(mut self, metadata: HashMap<String, ValueSend>) -> Self {
        self.tx_metadata = metadata;
        self
    }

    /// Send the query and buffer the full result.
    pub fn run(self) -> Result<EagerResult> {
        let Self {
            session,
            query,
            parameters,
            mode,
            tx_timeout,
            tx_metadata,
        } = self;
        let db = session.config.database.clone();
        let bookmarks = session.bookmarks_for_work();
        let mut holder = ConnectionHolder::new(session.pool, mode, db.clone());
        holder.initialize(bookmarks.as_deref())?;

        let collector = ResultCollector::new();
        let res = (|| {
            let connection = holder.get_connection()?;
            connection.run(
                RunParameters::new_auto_commit_run(
                    &query,
                    Some(&parameters),
                    bookmarks.as_deref(),
                    tx_timeout,
                    if tx_metadata.is_empty() {
                        None
                    } else {
                        Some(&tx_metadata)
                    },
                    Some(mode.as_protocol_str()),
                    db.as_ref().map(|db| db.as_str()),
                ),
                collector.run_callbacks(),
            )?;
            connection.pull(PullParameters::new_all(), collector.pull_callbacks())?;
            connection.write_all(None)?;
            connection.read_all(None)
        })();
        match res {
            Ok(()) => {
                holder.release();
                session.update_bookmark(collector.take_bookmark());
                Ok(collector.take_result())
            }
            Err(err) => {
                holder.close();
                Err(err)
            }
        }
    }
}

/// See [`Session::transaction()`].
#[derive(Debug)]
pub struct TransactionBuilder<'driver, 'session> {
    session: &'session mut Session<'driver>,
    mode: RoutingControl,
    tx_timeout: Option<i64>,
    tx_metadata: HashMap<String, ValueSend>,
}

impl<'driver, 'session> TransactionBuilder<'driver, 'session> {
    fn new(session: &'session mut Session<'driver>) -> Self {
        Self {
            session,
            mode: RoutingControl::Write,
            tx_timeout: None,
            tx_metadata: HashMap::new(),
        }
    }

    /// Tell the routing layer whether a read server suffices for this
    /// transaction.
    ///
    /// The default is [`RoutingControl::Write`].
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Instruct the server to abort the transaction after the given timeout
    /// in milliseconds.
    #[inline]
    pub fn with_transaction_timeout(mut self, timeout_ms: i64) -> Self {
        self.tx_timeout = Some(timeout_ms);
        self
    }

    /// Attach metadata to the transaction.
    #[inline]
    pub fn with_transaction_meta(mut self, metadata: HashMap<String, ValueSend>) -> Self {
        self.tx_metadata = metadata;
        self
    }

    /// Begin the transaction and hand it to `receiver`.
    ///
    /// Leaving the receiver without having committed rolls the transaction
    /// back.
    pub fn run<R>(self, receiver: impl FnOnce(Transaction) -> Result<R>) -> Result<R> {
        let Self {
            session,
            mode,
            tx_timeout,
            tx_metadata,
        } = self;
        let db = session.config.database.clone();
        let bookmarks = session.bookmarks_for_work();
        let mut holder = ConnectionHolder::new(session.pool, mode, db.clone());
        holder.initialize(bookmarks.as_deref())?;

        let begin_res = (|| {
            let connection = holder.get_connection()?;
            connection.begin(
                BeginParameters::new(
                    bookmarks.as_deref(),
                    tx_timeout,
                    if tx_metadata.is_empty() {
                        None
                    } else {
                        Some(&tx_metadata)
                    },
                    Some(mode.as_protocol_str()),
                    db.as_ref().map(|db| db.as_str()),
                ),
                ResponseCallbacks::new()
                    .with_on_failure(|meta| Err(ServerError::from_meta(meta).into())),
            )?;
            connection.write_all(None)?;
            connection.read_all(None)
        })();
        if let Err(err) = begin_res {
            holder.close();
            return Err(err);
        }

        let bookmark = Arc::new(AtomicRefCell::new(None));
        let mut finished = false;
        let transaction = Transaction::new(&mut holder, Arc::clone(&bookmark), &mut finished);
        let res = receiver(transaction);
        if !finished {
            // the receiver left the transaction open
            if let Err(err) = Transaction::rollback_holder(&mut holder) {
                warn!("failed to roll back unfinished transaction: {err}");
            }
        }
        match res {
            Ok(r) => {
                holder.release();
                session.update_bookmark(bookmark.borrow_mut().take());
                Ok(r)
            }
            Err(err) => {
                holder.close();
                Err(err)
            }
        }
    }
}
