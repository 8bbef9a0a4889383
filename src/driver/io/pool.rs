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

mod load_balancing;
mod rediscovery;
mod routing;
mod single_pool;

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::{debug, error};
use parking_lot::RwLockReadGuard;
use rustls::ClientConfig;

use super::bolt::{BoltData, TcpRW};
use crate::address_::resolution::AddressResolver;
use crate::address_::Address;
use crate::driver::config::auth::AuthToken;
use crate::driver::config::KeepAliveConfig;
use crate::driver::session::bookmarks::Bookmarks;
use crate::driver::RoutingControl;
use crate::error_::{BoltError, Result, ServerError};
use crate::sync::MostlyRLock;
use crate::value::ValueSend;
use load_balancing::LeastConnectedStrategy;
use rediscovery::{wrap_discovery_error, RoutingProcedureRunner};
use routing::RoutingTable;
use single_pool::{SimplePool, SinglePooledBolt};

// 7 is a reasonable common upper bound for the size of clusters
// this is, however, not a hard limit
const DEFAULT_CLUSTER_SIZE: usize = 7;

#[derive(Debug)]
pub(crate) struct PoolConfig {
    pub(crate) routing_context: Option<HashMap<String, ValueSend>>,
    pub(crate) tls_config: Option<Arc<ClientConfig>>,
    pub(crate) user_agent: String,
    pub(crate) auth: Arc<AuthToken>,
    pub(crate) max_connection_lifetime: Option<Duration>,
    pub(crate) max_connection_pool_size: usize,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) keep_alive: Option<KeepAliveConfig>,
    pub(crate) connection_acquisition_timeout: Option<Duration>,
    pub(crate) routing_table_purge_delay: Duration,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
    pub(crate) resolver: Option<Box<dyn AddressResolver>>,
}

impl PoolConfig {
    pub(crate) fn connection_acquisition_deadline(&self) -> Option<Instant> {
        self.connection_acquisition_timeout
            .map(|timeout| Instant::now() + timeout)
    }
}

#[derive(Debug)]
pub(crate) struct PooledBolt<'pool> {
    bolt: Option<SinglePooledBolt>,
    pool: &'pool Pool,
    db: Option<Arc<String>>,
}

impl<'pool> PooledBolt<'pool> {
    fn wrap_io(&mut self, io_op: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
        self.wrap_io_with(false, io_op)
    }

    fn wrap_io_with(
        &mut self,
        during_commit: bool,
        mut io_op: impl FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let was_broken = self.deref().unexpectedly_closed();
        let mut res = io_op(self);
        if during_commit {
            res = BoltError::wrap_commit(res);
        }
        if !was_broken && self.deref().unexpectedly_closed() {
            self.pool.forget_address_all(&self.deref().address());
        }
        self.pool.rewrite_io_error(res)
    }

    #[inline]
    pub(crate) fn read_one(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io(|this| {
            let pool = this.pool;
            let db = this.db.clone();
            let mut cb = move |bolt_data: &mut BoltData<TcpRW>, error: &mut ServerError| {
                pool.handle_server_error(&db, bolt_data, error)
            };
            this.bolt
                .as_mut()
                .expect("bolt option should be Some from init to drop")
                .read_one(deadline, Some(&mut cb))
        })
    }

    #[inline]
    pub(crate) fn read_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io(|this| {
            let pool = this.pool;
            let db = this.db.clone();
            let mut cb = move |bolt_data: &mut BoltData<TcpRW>, error: &mut ServerError| {
                pool.handle_server_error(&db, bolt_data, error)
            };
            this.bolt
                .as_mut()
                .expect("bolt option should be Some from init to drop")
                .read_all(deadline, Some(&mut cb))
        })
    }

    #[inline]
    pub(crate) fn read_all_during_commit(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io_with(true, |this| {
            let pool = this.pool;
            let db = this.db.clone();
            let mut cb = move |bolt_data: &mut BoltData<TcpRW>, error: &mut ServerError| {
                pool.handle_server_error(&db, bolt_data, error)
            };
            this.bolt
                .as_mut()
                .expect("bolt option should be Some from init to drop")
                .read_all(deadline, Some(&mut cb))
        })
    }

    #[inline]
    pub(crate) fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io(|this| this.deref_mut().write_all(deadline))
    }

    #[inline]
    pub(crate) fn write_all_during_commit(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.wrap_io_with(true, |this| this.deref_mut().write_all(deadline))
    }
}

impl Deref for PooledBolt<'_> {
    type Target = SinglePooledBolt;

    fn deref(&self) -> &Self::Target {
        self.bolt
            .as_ref()
            .expect("bolt option should be Some from init to drop")
    }
}

impl DerefMut for PooledBolt<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bolt
            .as_mut()
            .expect("bolt option should be Some from init to drop")
    }
}

#[derive(Debug)]
pub(crate) struct Pool {
    address: Arc<Address>,
    pub(crate) config: Arc<PoolConfig>,
    pools: Pools,
    closed: AtomicBool,
}

impl Pool {
    pub(crate) fn new(address: Arc<Address>, config: PoolConfig) -> Self {
        let config = Arc::new(config);
        let pools = Pools::new(Arc::clone(&address), Arc::clone(&config));
        Self {
            address,
            config,
            pools,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn is_routing(&self) -> bool {
        self.config.routing_context.is_some()
    }

    #[inline]
    pub(crate) fn address(&self) -> &Arc<Address> {
        &self.address
    }

    pub(crate) fn acquire(&self, args: AcquireConfig) -> Result<PooledBolt<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BoltError::disconnect(
                "the driver was closed; no new connections can be acquired",
            ));
        }
        let db = args.update_rt_args.db.map(Arc::clone);
        let bolt = match &self.pools {
            Pools::Direct(single_pool) => {
                let mut connection = None;
                while connection.is_none() {
                    connection = single_pool.acquire(args.update_rt_args.deadline)?.prepare(
                        args.update_rt_args.deadline,
                        args.update_rt_args.idle_time_before_connection_test,
                        None,
                    )?;
                }
                connection.expect("loop above asserts existence")
            }
            Pools::Routing(routing_pool) => routing_pool.acquire(args)?,
        };
        Ok(PooledBolt {
            bolt: Some(bolt),
            pool: self,
            db,
        })
    }

    /// Graceful shutdown: new acquisitions fail, idle connections are closed,
    /// borrowed connections close as their holders release them.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing the connection pool");
        match &self.pools {
            Pools::Direct(single_pool) => single_pool.purge(),
            Pools::Routing(routing_pool) => routing_pool.purge_all(),
        }
    }

    fn handle_server_error<RW: Read + Write>(
        &self,
        db: &Option<Arc<String>>,
        bolt_data: &mut BoltData<RW>,
        error: &mut ServerError,
    ) -> Result<()> {
        let Pools::Routing(routing_pool) = &self.pools else {
            return Ok(());
        };
        if error.deactivates_server() {
            routing_pool.forget_address(db, bolt_data.address());
        } else if error.invalidates_writer() {
            routing_pool.forget_writer(db, bolt_data.address());
        }
        Ok(())
    }

    fn forget_address_all(&self, address: &Arc<Address>) {
        if let Pools::Routing(routing_pool) = &self.pools {
            routing_pool.forget_address_all(address)
        }
    }

    /// Translate errors on routed connections for the session (§error contract):
    /// losing the transport or the writer role is recoverable on another
    /// server, so it surfaces as a session-expired error.
    fn rewrite_io_error(&self, res: Result<()>) -> Result<()> {
        if !self.is_routing() {
            return res;
        }
        match res {
            Err(BoltError::Disconnect {
                message,
                source,
                during_commit: false,
            }) => Err(BoltError::session_expired(match source {
                Some(err) => format!("{message}: {err}"),
                None => message,
            })),
            Err(BoltError::ServerError { error }) if error.invalidates_writer() => {
                Err(BoltError::session_expired(format!(
                    "it is no longer possible to write to this server: {error}"
                )))
            }
            res => res,
        }
    }
}

#[derive(Debug)]
enum Pools {
    Direct(SimplePool),
    Routing(RoutingPool),
}

impl Pools {
    fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        match config.routing_context {
            None => Pools::Direct(SimplePool::new(address, config)),
            Some(_) => Pools::Routing(RoutingPool::new(address, config)),
        }
    }
}

type RoutingTables = HashMap<Option<Arc<String>>, RoutingTable>;
type RoutingPools = HashMap<Arc<Address>, SimplePool>;

#[derive(Debug)]
struct RoutingPool {
    pools: MostlyRLock<RoutingPools>,
    routing_tables: MostlyRLock<RoutingTables>,
    strategy: LeastConnectedStrategy,
    use_seed_router: AtomicBool,
    address: Arc<Address>,
    config: Arc<PoolConfig>,
}

impl RoutingPool {
    fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        assert!(config.routing_context.is_some());
        Self {
            pools: MostlyRLock::new(HashMap::with_capacity(DEFAULT_CLUSTER_SIZE)),
            routing_tables: MostlyRLock::new(HashMap::new()),
            strategy: LeastConnectedStrategy::new(),
            use_seed_router: AtomicBool::new(true),
            address,
            config,
        }
    }

    fn acquire(&self, args: AcquireConfig) -> Result<SinglePooledBolt> {
        debug!(
            "acquiring {:?} connection towards {}",
            args.mode,
            args.update_rt_args
                .db
                .map(|db| format!("{db:?}"))
                .unwrap_or(String::from("the default database"))
        );
        let target = self.choose_address_from_fresh_rt(args)?;
        match self.acquire_routing_address(&target, args.update_rt_args) {
            Ok(connection) => Ok(connection),
            Err(err @ BoltError::Disconnect { .. }) => {
                self.forget_address_all(&target);
                Err(BoltError::session_expired(format!(
                    "failed to open connection to {target}: {err}"
                )))
            }
            Err(err) => Err(err),
        }
    }

    fn choose_address_from_fresh_rt(&self, args: AcquireConfig) -> Result<Arc<Address>> {
        let db = args.update_rt_args.rt_key();
        let rts = self.get_fresh_rt(args)?;
        let rt = rts.get(&db).expect("get_fresh_rt ensures the table exists");
        let candidates = rt.servers_for_mode(args.mode);
        let pools = self.pools.read();
        let target = self.strategy.select(candidates, |addr| {
            pools.get(addr).map(SimplePool::in_use).unwrap_or(0)
        });
        target.map(Arc::clone).ok_or_else(|| {
            BoltError::session_expired(match args.mode {
                RoutingControl::Read => "no server available for read access",
                RoutingControl::Write => "no server available for write access",
            })
        })
    }

    fn get_fresh_rt(&self, args: AcquireConfig) -> Result<RwLockReadGuard<'_, RoutingTables>> {
        let rt_args = args.update_rt_args;
        let db = rt_args.rt_key();
        self.routing_tables.try_maybe_write_until(
            rt_args.deadline,
            "waiting for a fresh routing table",
            |rts| {
                rts.get(&db)
                    .map(|rt| rt.is_stale_for(args.mode))
                    .unwrap_or(true)
            },
            |mut rts| {
                let rt = rts
                    .entry(db.clone())
                    .or_insert_with(|| RoutingTable::new(db.clone()));
                if rt.is_stale_for(args.mode) {
                    self.update_rts(rt_args, &mut rts)?;
                }
                Ok(())
            },
        )
    }

    /// Refresh the routing table for `args.db` (§rediscovery):
    /// routers are tried one by one, starting at the seed router when it is
    /// preferred, else at the known routers, falling back to the respective
    /// other group.
    fn update_rts(&self, args: UpdateRtArgs, rts: &mut RoutingTables) -> Result<()> {
        let db = args.rt_key();
        debug!("fetching new routing table for {db:?}");
        let rt = rts
            .entry(db.clone())
            .or_insert_with(|| RoutingTable::new(db.clone()));
        let known_routers = rt.routers.to_vec();
        let prefer_seed = self.use_seed_router.load(Ordering::Acquire) || known_routers.is_empty();

        let mut tried: HashSet<Arc<Address>> = HashSet::with_capacity(DEFAULT_CLUSTER_SIZE);
        let mut last_err = None;
        let new_rt = if prefer_seed {
            match self.fetch_rt_from_seed(args, rts, &mut tried, &mut last_err)? {
                Some(new_rt) => Some(new_rt),
                None => {
                    self.fetch_rt_from_routers(&known_routers, args, rts, &mut tried, &mut last_err)?
                }
            }
        } else {
            match self.fetch_rt_from_routers(&known_routers, args, rts, &mut tried, &mut last_err)?
            {
                Some(new_rt) => Some(new_rt),
                None => self.fetch_rt_from_seed(args, rts, &mut tried, &mut last_err)?,
            }
        };

        match new_rt {
            None => {
                let rt = rts.get(&db).expect("created above");
                let message = format!(
                    "unable to retrieve routing information; last error: {}; \
                     last known routing table: {rt:?}",
                    last_err
                        .map(|err| err.to_string())
                        .unwrap_or_else(|| String::from("no router was reachable")),
                );
                error!("{message}");
                Err(BoltError::disconnect(message))
            }
            Some(mut new_rt) => {
                new_rt.database.clone_from(&db);
                if new_rt.writers.is_empty() {
                    debug!("new routing table has no writers, next refresh will start at the seed");
                    self.use_seed_router.store(true, Ordering::Release);
                }
                debug!("storing new routing table for {db:?}: {new_rt:?}");
                rts.insert(db.clone(), new_rt);
                self.purge_expired_tables(rts, &db);
                self.clean_up_pools(rts);
                Ok(())
            }
        }
    }

    fn fetch_rt_from_seed(
        &self,
        args: UpdateRtArgs,
        rts: &mut RoutingTables,
        tried: &mut HashSet<Arc<Address>>,
        last_err: &mut Option<BoltError>,
    ) -> Result<Option<RoutingTable>> {
        debug!("trying to fetch routing table from the seed router {}", self.address);
        let db = args.rt_key();
        let resolutions =
            Arc::clone(&self.address).fully_resolve(self.config.resolver.as_deref())?;
        for resolution in resolutions {
            let resolved = match resolution {
                Ok(resolved) => resolved,
                Err(err) => {
                    *last_err = Some(BoltError::connect_error(err));
                    continue;
                }
            };
            if !tried.insert(Arc::clone(&resolved)) {
                continue;
            }
            match self.fetch_rt_from_single_router(&resolved, args)? {
                Ok(new_rt) => {
                    self.use_seed_router.store(false, Ordering::Release);
                    return Ok(Some(new_rt));
                }
                Err(err) => {
                    *last_err = Some(err);
                    Self::forget_router_locked(rts, &db, &resolved);
                }
            }
        }
        Ok(None)
    }

    fn fetch_rt_from_routers(
        &self,
        routers: &[Arc<Address>],
        args: UpdateRtArgs,
        rts: &mut RoutingTables,
        tried: &mut HashSet<Arc<Address>>,
        last_err: &mut Option<BoltError>,
    ) -> Result<Option<RoutingTable>> {
        let db = args.rt_key();
        for router in routers {
            for resolution in Arc::clone(router).dns_resolve() {
                let resolved = match resolution {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        *last_err = Some(BoltError::connect_error(err));
                        Self::forget_router_locked(rts, &db, router);
                        continue;
                    }
                };
                if !tried.insert(Arc::clone(&resolved)) {
                    continue;
                }
                match self.fetch_rt_from_single_router(&resolved, args)? {
                    Ok(new_rt) => return Ok(Some(new_rt)),
                    Err(err) => {
                        *last_err = Some(err);
                        Self::forget_router_locked(rts, &db, &resolved);
                    }
                }
            }
        }
        Ok(None)
    }

    fn fetch_rt_from_single_router(
        &self,
        address: &Arc<Address>,
        args: UpdateRtArgs,
    ) -> Result<Result<RoutingTable>> {
        let res = self
            .acquire_routing_address(address, args)
            .and_then(|mut con| {
                RoutingProcedureRunner::fetch_routing_table(
                    &mut con,
                    self.config
                        .routing_context
                        .as_ref()
                        .expect("routing pools always have a routing context"),
                    args.db,
                    args.bookmarks,
                    args.deadline,
                )
            });
        wrap_discovery_error(res)
    }

    fn acquire_routing_address(
        &self,
        target: &Arc<Address>,
        args: UpdateRtArgs,
    ) -> Result<SinglePooledBolt> {
        let mut connection = None;
        while connection.is_none() {
            let unprepared_connection = {
                let pools = self.ensure_pool_exists(target);
                pools
                    .get(target)
                    .expect("just created above")
                    .acquire(args.deadline)
            }?;
            connection = unprepared_connection.prepare(
                args.deadline,
                args.idle_time_before_connection_test,
                None,
            )?;
        }
        Ok(connection.expect("loop above asserts existence"))
    }

    fn ensure_pool_exists(&self, target: &Arc<Address>) -> RwLockReadGuard<'_, RoutingPools> {
        self.pools
            .maybe_write(
                |pools| !pools.contains_key(target),
                |mut pools| {
                    pools.insert(
                        Arc::clone(target),
                        SimplePool::new(Arc::clone(target), Arc::clone(&self.config)),
                    );
                    Ok(())
                },
            )
            .expect("updater is infallible")
    }

    fn purge_expired_tables(&self, rts: &mut RoutingTables, current_db: &Option<Arc<String>>) {
        let purge_delay = self.config.routing_table_purge_delay;
        rts.retain(|db, rt| {
            let keep = db == current_db || !rt.is_expired_for(purge_delay);
            if !keep {
                debug!("purging long expired routing table for {db:?}");
            }
            keep
        });
    }

    /// Close pools for every address no retained routing table mentions.
    fn clean_up_pools(&self, rts: &mut RoutingTables) {
        drop(self.pools.update(|mut pools| {
            let used_addresses = rts
                .values()
                .flat_map(|rt| rt.all_servers())
                .map(Arc::clone)
                .unique()
                .collect::<Vec<_>>();
            let existing_addresses = pools.keys().map(Arc::clone).collect::<Vec<_>>();
            for address in existing_addresses {
                if !used_addresses.contains(&address) {
                    if let Some(pool) = pools.remove(&address) {
                        pool.purge();
                    }
                }
            }
            Ok(())
        }));
    }

    fn forget_address_all(&self, address: &Arc<Address>) {
        debug!("forgetting address in all routing tables: {address}");
        drop(self.routing_tables.update(|mut rts| {
            rts.values_mut().for_each(|rt| rt.forget(address));
            Ok(())
        }));
        self.purge_pool(address);
    }

    fn forget_address(&self, db: &Option<Arc<String>>, address: &Arc<Address>) {
        debug!("forgetting address for {db:?}: {address}");
        drop(self.routing_tables.update(|mut rts| {
            if let Some(rt) = rts.get_mut(db) {
                rt.forget(address);
            }
            Ok(())
        }));
        self.purge_pool(address);
    }

    fn forget_writer(&self, db: &Option<Arc<String>>, address: &Arc<Address>) {
        debug!("forgetting writer for {db:?}: {address}");
        drop(self.routing_tables.update(|mut rts| {
            if let Some(rt) = rts.get_mut(db) {
                rt.forget_writer(address);
            }
            Ok(())
        }));
    }

    fn forget_router_locked(
        rts: &mut RoutingTables,
        db: &Option<Arc<String>>,
        address: &Arc<Address>,
    ) {
        debug!("forgetting router for {db:?}: {address}");
        if let Some(rt) = rts.get_mut(db) {
            rt.forget_router(address);
        }
    }

    fn purge_pool(&self, address: &Arc<Address>) {
        drop(self.pools.update(|mut pools| {
            if let Some(pool) = pools.remove(address) {
                pool.purge();
            }
            Ok(())
        }));
    }

    fn purge_all(&self) {
        drop(self.pools.update(|mut pools| {
            for (_, pool) in pools.drain() {
                pool.purge();
            }
            Ok(())
        }));
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct AcquireConfig<'a> {
    pub(crate) mode: RoutingControl,
    pub(crate) update_rt_args: UpdateRtArgs<'a>,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct UpdateRtArgs<'a> {
    pub(crate) db: Option<&'a Arc<String>>,
    pub(crate) bookmarks: Option<&'a Bookmarks>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
}

impl UpdateRtArgs<'_> {
    fn rt_key(&self) -> Option<Arc<String>> {
        self.db.map(Arc::clone)
    }
}
