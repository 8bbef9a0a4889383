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
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use parking_lot::lock_api::MutexGuard;
use parking_lot::{Condvar, Mutex, RawMutex};

use super::super::bolt::message_parameters::HelloParameters;
use super::super::bolt::{self, OnServerErrorCb, TcpBolt, TcpRW};
use super::PoolConfig;
use crate::address_::Address;
use crate::error_::{BoltError, Result};

type PoolElement = TcpBolt;

#[derive(Debug)]
pub(crate) struct InnerPool {
    address: Arc<Address>,
    config: Arc<PoolConfig>,
    synced: Mutex<InnerPoolSyncedData>,
    made_room_condition: Condvar,
}

#[derive(Debug)]
struct InnerPoolSyncedData {
    /// LIFO; the most recently returned connection is the warmest.
    raw_pool: Vec<PoolElement>,
    reservations: usize,
    borrowed: usize,
    purged: bool,
}

impl InnerPool {
    fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        let raw_pool = Vec::with_capacity(config.max_connection_pool_size);
        let synced = Mutex::new(InnerPoolSyncedData {
            raw_pool,
            reservations: 0,
            borrowed: 0,
            purged: false,
        });
        Self {
            address,
            config,
            synced,
            made_room_condition: Condvar::new(),
        }
    }

    fn acquire_new(&self, deadline: Option<Instant>) -> Result<PoolElement> {
        let connection = self.open_new(deadline);
        let mut sync = self.synced.lock();
        sync.reservations -= 1;
        let connection = connection?;
        sync.borrowed += 1;
        Ok(connection)
    }

    fn open_new(&self, deadline: Option<Instant>) -> Result<PoolElement> {
        let address = Arc::clone(&self.address);
        let mut connection = self.open_socket(address, deadline)?;

        connection.hello(HelloParameters::new(
            &self.config.user_agent,
            &self.config.auth,
            self.config.routing_context.as_ref(),
        ))?;
        connection.write_all(deadline)?;
        connection.read_all(deadline, None)?;
        connection.debug_log(|| format!("connected to {}", connection.server_agent()));
        Ok(connection)
    }

    fn open_socket(&self, address: Arc<Address>, deadline: Option<Instant>) -> Result<TcpBolt> {
        let mut last_err = None;
        for address in address.fully_resolve(self.config.resolver.as_deref())? {
            last_err = match address {
                Ok(address) => {
                    match bolt::open(
                        bolt::TcpConnector,
                        address,
                        deadline,
                        self.config.connection_timeout,
                        self.config.keep_alive,
                        self.config.tls_config.as_ref().map(Arc::clone),
                    ) {
                        Ok(connection) => return Ok(connection),
                        Err(err) => {
                            info!("failed to open connection: {}", err);
                            Some(Err(err))
                        }
                    }
                }
                Err(err) => {
                    info!("failed to resolve address: {}", err);
                    Some(Err(BoltError::connect_error(err)))
                }
            }
        }
        last_err.expect("fully_resolve returned at least one address")
    }
}

#[derive(Debug)]
pub(crate) struct SimplePool(Arc<InnerPool>);

impl SimplePool {
    pub(crate) fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        Self(Arc::new(InnerPool::new(address, config)))
    }

    pub(crate) fn acquire(&self, deadline: Option<Instant>) -> Result<UnpreparedSinglePooledBolt> {
        {
            let mut synced = self.synced.lock();
            loop {
                if synced.purged {
                    return Err(BoltError::disconnect(format!(
                        "connection pool for {} was closed",
                        self.address
                    )));
                }
                if let Some(connection) = self.acquire_existing(&mut synced) {
                    return Ok(UnpreparedSinglePooledBolt::new(
                        Some(connection),
                        Arc::clone(&self.0),
                    ));
                }
                if self.has_room(&synced) {
                    synced.reservations += 1;
                    break;
                } else {
                    self.wait_for_room(deadline, &mut synced)?;
                }
            }
        }
        Ok(UnpreparedSinglePooledBolt::new(None, Arc::clone(&self.0)))
    }

    fn wait_for_room(
        &self,
        deadline: Option<Instant>,
        synced: &mut MutexGuard<RawMutex, InnerPoolSyncedData>,
    ) -> Result<()> {
        match deadline {
            None => self.made_room_condition.wait(synced),
            Some(deadline) => {
                if self
                    .made_room_condition
                    .wait_until(synced, deadline)
                    .timed_out()
                {
                    return Err(BoltError::connection_acquisition_timeout(
                        "waiting for room in the connection pool",
                    ));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn in_use(&self) -> usize {
        let synced = self.synced.lock();
        synced.borrowed + synced.reservations
    }

    /// Close all idle connections and mark the pool so that borrowed
    /// connections are closed when they come back.
    pub(crate) fn purge(&self) {
        let connections = {
            let mut synced = self.synced.lock();
            synced.purged = true;
            mem::take(&mut synced.raw_pool)
        };
        // closing sockets outside the lock
        drop(connections);
        self.made_room_condition.notify_all();
    }

    fn has_room(&self, synced: &InnerPoolSyncedData) -> bool {
        self.config.max_connection_pool_size == 0
            || synced.raw_pool.len() + synced.borrowed + synced.reservations
                < self.config.max_connection_pool_size
    }

    fn acquire_existing(&self, synced: &mut InnerPoolSyncedData) -> Option<PoolElement> {
        let connection = synced.raw_pool.pop();
        if connection.is_some() {
            synced.borrowed += 1;
        }
        connection
    }

    fn release(inner_pool: &Arc<InnerPool>, mut connection: PoolElement) {
        let mut lock = inner_pool.synced.lock();
        lock.borrowed -= 1;
        if connection.needs_reset() {
            let res = connection
                .reset()
                .and_then(|_| connection.write_all(None))
                .and_then(|_| connection.read_all(None, None));
            if res.is_err() {
                info!("ignoring failure during reset, dropping connection");
            }
        }
        let lifetime_exceeded = inner_pool
            .config
            .max_connection_lifetime
            .map(|lifetime| connection.is_older_than(lifetime))
            .unwrap_or(false);
        if !connection.closed() && !lock.purged && !lifetime_exceeded {
            lock.raw_pool.push(connection);
        } else {
            // closing the socket happens outside the lock
            drop(lock);
            drop(connection);
        }
        inner_pool.made_room_condition.notify_one();
    }
}

impl Deref for SimplePool {
    type Target = InnerPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub(crate) struct UnpreparedSinglePooledBolt {
    pool: Arc<InnerPool>,
    bolt: Option<PoolElement>,
}

impl UnpreparedSinglePooledBolt {
    fn new(bolt: Option<PoolElement>, pool: Arc<InnerPool>) -> Self {
        Self { pool, bolt }
    }

    pub(crate) fn prepare(
        mut self,
        deadline: Option<Instant>,
        idle_time_before_connection_test: Option<Duration>,
        on_server_error: OnServerErrorCb<TcpRW>,
    ) -> Result<Option<SinglePooledBolt>> {
        let bolt = self.bolt.take();
        let pool = Arc::clone(&self.pool);
        match bolt {
            None => {
                let connection = self.pool.acquire_new(deadline)?;
                Ok(Some(SinglePooledBolt::new(connection, pool)))
            }
            Some(mut connection) => {
                if let Some(max_lifetime) = self.pool.config.max_connection_lifetime {
                    if connection.is_older_than(max_lifetime) {
                        connection.debug_log(|| String::from("connection reached max lifetime"));
                        connection.kill();
                        SimplePool::release(&self.pool, connection);
                        return Ok(None);
                    }
                }
                match idle_time_before_connection_test {
                    None => {}
                    Some(timeout) => {
                        if let Err(err) =
                            Self::liveness_check(&mut connection, timeout, deadline, on_server_error)
                        {
                            connection.debug_log(|| format!("liveness check failed: {}", err));
                            SimplePool::release(&self.pool, connection);
                            return Ok(None);
                        }
                    }
                }
                Ok(Some(SinglePooledBolt {
                    pool,
                    bolt: Some(connection),
                }))
            }
        }
    }

    fn liveness_check(
        connection: &mut PoolElement,
        timeout: Duration,
        deadline: Option<Instant>,
        on_server_error: OnServerErrorCb<TcpRW>,
    ) -> Result<()> {
        if connection.is_idle_for(timeout) {
            connection.debug_log(|| String::from("liveness check"));
            connection.reset()?;
            connection.write_all(None)?;
            connection.read_all(deadline, on_server_error)?;
        }
        Ok(())
    }
}

impl Drop for UnpreparedSinglePooledBolt {
    fn drop(&mut self) {
        let Some(bolt) = self.bolt.take() else {
            return;
        };
        SimplePool::release(&self.pool, bolt);
    }
}

#[derive(Debug)]
pub(crate) struct SinglePooledBolt {
    pool: Arc<InnerPool>,
    bolt: Option<PoolElement>,
}

impl SinglePooledBolt {
    fn new(bolt: PoolElement, pool: Arc<InnerPool>) -> Self {
        Self {
            pool,
            bolt: Some(bolt),
        }
    }
}

impl Drop for SinglePooledBolt {
    fn drop(&mut self) {
        let bolt = self
            .bolt
            .take()
            .expect("bolt option should be Some from init to drop");
        SimplePool::release(&self.pool, bolt);
    }
}

impl Deref for SinglePooledBolt {
    type Target = TcpBolt;

    fn deref(&self) -> &Self::Target {
        self.bolt
            .as_ref()
            .expect("bolt option should be Some from init to drop")
    }
}

impl DerefMut for SinglePooledBolt {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bolt
            .as_mut()
            .expect("bolt option should be Some from init to drop")
    }
}
