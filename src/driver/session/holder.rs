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

use super::super::io::pool::{AcquireConfig, Pool, PooledBolt, UpdateRtArgs};
use super::bookmarks::Bookmarks;
use crate::driver::RoutingControl;
use crate::error_::{BoltError, Result};

/// Reference-counted borrow of a pooled connection.
///
/// Sessions hand one holder to every piece of work they spawn.
/// The first [`ConnectionHolder::initialize`] acquires a connection from the
/// pool; nested initializations only bump the count.
/// The connection goes back to its pool when every initialization has been
/// balanced by a [`ConnectionHolder::release`], or immediately on
/// [`ConnectionHolder::close`].
#[derive(Debug)]
pub(crate) struct ConnectionHolder<'pool> {
    pool: &'pool Pool,
    mode: RoutingControl,
    db: Option<Arc<String>>,
    ref_count: usize,
    connection: Option<PooledBolt<'pool>>,
    closed: bool,
}

impl<'pool> ConnectionHolder<'pool> {
    pub(crate) fn new(pool: &'pool Pool, mode: RoutingControl, db: Option<Arc<String>>) -> Self {
        Self {
            pool,
            mode,
            db,
            ref_count: 0,
            connection: None,
            closed: false,
        }
    }

    pub(crate) fn initialize(&mut self, bookmarks: Option<&Bookmarks>) -> Result<()> {
        if self.closed {
            return Err(BoltError::disconnect("the connection holder was closed"));
        }
        self.ref_count += 1;
        if self.connection.is_none() {
            let acquired = self.pool.acquire(AcquireConfig {
                mode: self.mode,
                update_rt_args: UpdateRtArgs {
                    db: self.db.as_ref(),
                    bookmarks,
                    deadline: self.pool.config.connection_acquisition_deadline(),
                    idle_time_before_connection_test: self
                        .pool
                        .config
                        .idle_time_before_connection_test,
                },
            });
            match acquired {
                Ok(connection) => self.connection = Some(connection),
                Err(err) => {
                    self.ref_count -= 1;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn get_connection(&mut self) -> Result<&mut PooledBolt<'pool>> {
        if self.closed {
            return Err(BoltError::disconnect("the connection holder was closed"));
        }
        self.connection
            .as_mut()
            .ok_or_else(|| BoltError::disconnect("the connection holder holds no connection"))
    }

    /// Balances one `initialize` call.
    /// Releasing below zero is a no-op.
    pub(crate) fn release(&mut self) {
        if self.ref_count == 0 {
            return;
        }
        self.ref_count -= 1;
        if self.ref_count == 0 {
            // dropping resets the connection and returns it to the pool
            self.connection = None;
        }
    }

    /// Gives up the connection regardless of outstanding initializations.
    pub(crate) fn close(&mut self) {
        self.ref_count = 0;
        self.connection = None;
        self.closed = true;
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::io::pool::PoolConfig;

    fn unreachable_pool() -> Pool {
        // no listener on this address; acquisition attempts fail fast
        let address = Arc::new(crate::address_::Address::from(("127.0.0.1", 1)));
        Pool::new(
            address,
            PoolConfig {
                routing_context: None,
                tls_config: None,
                user_agent: String::from("test"),
                auth: Default::default(),
                max_connection_lifetime: None,
                max_connection_pool_size: 1,
                connection_timeout: Some(Duration::from_millis(100)),
                keep_alive: None,
                connection_acquisition_timeout: Some(Duration::from_millis(100)),
                routing_table_purge_delay: Duration::from_secs(30),
                idle_time_before_connection_test: None,
                resolver: None,
            },
        )
    }

    #[test]
    fn test_failed_initialize_keeps_ref_count_balanced() {
        let pool = unreachable_pool();
        let mut holder = ConnectionHolder::new(&pool, RoutingControl::Read, None);
        assert!(holder.initialize(None).is_err());
        assert_eq!(holder.ref_count(), 0);
    }

    #[test]
    fn test_release_below_zero_is_noop() {
        let pool = unreachable_pool();
        let mut holder = ConnectionHolder::new(&pool, RoutingControl::Read, None);
        holder.release();
        holder.release();
        assert_eq!(holder.ref_count(), 0);
    }

    #[test]
    fn test_get_connection_without_initialize_fails() {
        let pool = unreachable_pool();
        let mut holder = ConnectionHolder::new(&pool, RoutingControl::Read, None);
        assert!(holder.get_connection().is_err());
    }

    #[test]
    fn test_closed_holder_rejects_work() {
        let pool = unreachable_pool();
        let mut holder = ConnectionHolder::new(&pool, RoutingControl::Write, None);
        holder.close();
        assert!(holder.initialize(None).is_err());
        assert!(holder.get_connection().is_err());
        assert_eq!(holder.ref_count(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let pool = unreachable_pool();
        let mut holder = ConnectionHolder::new(&pool, RoutingControl::Read, None);
        holder.close();
        holder.close();
        assert_eq!(holder.ref_count(), 0);
    }
}
