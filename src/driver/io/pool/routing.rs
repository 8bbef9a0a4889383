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

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::address_::Address;
use crate::driver::io::bolt::BoltRecordFields;
use crate::driver::RoutingControl;
use crate::value::ValueReceive;

/// Per-database view of the cluster as last advertised by a router.
#[derive(Debug)]
pub(crate) struct RoutingTable {
    pub(crate) database: Option<Arc<String>>,
    pub(crate) routers: Vec<Arc<Address>>,
    pub(crate) readers: Vec<Arc<Address>>,
    pub(crate) writers: Vec<Arc<Address>>,
    created: Instant,
    ttl: Duration,
}

impl RoutingTable {
    pub(crate) fn new(database: Option<Arc<String>>) -> Self {
        Self {
            database,
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            created: Instant::now(),
            ttl: Duration::ZERO,
        }
    }

    pub(crate) fn servers_for_mode(&self, mode: RoutingControl) -> &[Arc<Address>] {
        match mode {
            RoutingControl::Read => &self.readers,
            RoutingControl::Write => &self.writers,
        }
    }

    pub(crate) fn all_servers(&self) -> impl Iterator<Item = &Arc<Address>> {
        self.routers
            .iter()
            .chain(self.readers.iter())
            .chain(self.writers.iter())
    }

    pub(crate) fn is_stale_for(&self, mode: RoutingControl) -> bool {
        if self.routers.is_empty() {
            debug!("routing table stale: no routers left {:?}", self);
            return true;
        }
        if self.servers_for_mode(mode).is_empty() {
            debug!(
                "routing table stale: no servers for {:?} mode left {:?}",
                mode, self
            );
            return true;
        }
        if self.created.elapsed() >= self.ttl {
            debug!(
                "routing table stale: ttl ({:?}) <= age ({:?}) {:?}",
                self.ttl,
                self.created.elapsed(),
                self
            );
            return true;
        }
        false
    }

    pub(crate) fn is_expired_for(&self, purge_delay: Duration) -> bool {
        self.created.elapsed() >= self.ttl.saturating_add(purge_delay)
    }

    /// Remove the address from the readers and the writers.
    /// Routers are kept; the address may still answer discovery requests.
    pub(crate) fn forget(&mut self, addr: &Address) {
        self.readers = mem::take(&mut self.readers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
        self.forget_writer(addr);
    }

    pub(crate) fn forget_writer(&mut self, addr: &Address) {
        self.writers = mem::take(&mut self.writers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
    }

    pub(crate) fn forget_router(&mut self, addr: &Address) {
        self.routers = mem::take(&mut self.routers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
    }

    /// Build a table from the records returned by the routing procedure.
    pub(crate) fn try_parse(
        database: Option<Arc<String>>,
        keys: &[String],
        mut records: Vec<BoltRecordFields>,
    ) -> Result<Self, RoutingTableParseError> {
        if records.len() != 1 {
            return Err(RoutingTableParseError {
                reason: "expected exactly one record",
            });
        }
        let record = records.pop().expect("checked length above");
        if record.len() != keys.len() {
            return Err(RoutingTableParseError {
                reason: "record length did not match the advertised keys",
            });
        }

        let mut ttl = None;
        let mut servers = None;
        for (key, value) in keys.iter().zip(record) {
            match key.as_str() {
                "ttl" => ttl = Some(value),
                "servers" => servers = Some(value),
                _ => {}
            }
        }

        let ttl = ttl.ok_or(RoutingTableParseError {
            reason: "missing \"ttl\"",
        })?;
        let ttl: i64 = ttl.try_into().map_err(|_| RoutingTableParseError {
            reason: "\"ttl\" was not an integer",
        })?;
        // a negative TTL means the table never expires by age
        let ttl = u64::try_from(ttl)
            .map(Duration::from_secs)
            .unwrap_or(Duration::MAX);

        let servers = servers.ok_or(RoutingTableParseError {
            reason: "missing \"servers\"",
        })?;
        let servers = servers
            .try_into_list()
            .map_err(|_| RoutingTableParseError {
                reason: "\"servers\" was not a list",
            })?;

        let mut routers = Vec::new();
        let mut readers = Vec::new();
        let mut writers = Vec::new();
        for server in servers {
            let (role, addresses) = Self::parse_server(server)?;
            let target = match role {
                ServerRole::Router => &mut routers,
                ServerRole::Reader => &mut readers,
                ServerRole::Writer => &mut writers,
            };
            target.extend(addresses);
        }
        for addresses in [&mut routers, &mut readers, &mut writers] {
            let mut seen = HashSet::with_capacity(addresses.len());
            addresses.retain(|address| seen.insert(Arc::clone(address)));
        }

        if routers.is_empty() {
            return Err(RoutingTableParseError {
                reason: "received routing table without routers",
            });
        }
        if readers.is_empty() {
            return Err(RoutingTableParseError {
                reason: "received routing table without readers",
            });
        }
        // An empty writers list is accepted: it occurs during leader
        // elections and read-only workloads must keep working through it.

        Ok(Self {
            database,
            routers,
            readers,
            writers,
            created: Instant::now(),
            ttl,
        })
    }

    fn parse_server(
        server: ValueReceive,
    ) -> Result<(ServerRole, Vec<Arc<Address>>), RoutingTableParseError> {
        let mut server = server.try_into_map().map_err(|_| RoutingTableParseError {
            reason: "\"servers\" entry was not a map",
        })?;
        let role = server.remove("role").ok_or(RoutingTableParseError {
            reason: "\"servers\" entry missing \"role\"",
        })?;
        let role: String = role.try_into().map_err(|_| RoutingTableParseError {
            reason: "\"servers\" entry \"role\" was not a string",
        })?;
        let role = ServerRole::try_from(role.as_str()).map_err(|_| RoutingTableParseError {
            reason: "\"servers\" entry contained an unknown \"role\"",
        })?;
        let addresses = server.remove("addresses").ok_or(RoutingTableParseError {
            reason: "\"servers\" entry missing \"addresses\"",
        })?;
        let addresses: Vec<ValueReceive> =
            addresses.try_into().map_err(|_| RoutingTableParseError {
                reason: "\"servers\" entry \"addresses\" was not a list",
            })?;
        let addresses = addresses
            .into_iter()
            .map(|address| {
                let address: String = address.try_into().map_err(|_| RoutingTableParseError {
                    reason: "\"servers\" entry \"addresses\" contained a non-string",
                })?;
                Ok(Arc::new(Address::from(&*address)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((role, addresses))
    }
}

#[derive(Error, Debug)]
#[error("failed to parse routing table: {reason}")]
pub(crate) struct RoutingTableParseError {
    reason: &'static str,
}

enum ServerRole {
    Router,
    Reader,
    Writer,
}

impl TryFrom<&str> for ServerRole {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "ROUTE" => Ok(ServerRole::Router),
            "READ" => Ok(ServerRole::Reader),
            "WRITE" => Ok(ServerRole::Writer),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;
    use crate::macros::hash_map;

    fn addr(host: &str) -> Arc<Address> {
        Arc::new(Address::from(host))
    }

    fn server_entry(role: &str, addresses: &[&str]) -> ValueReceive {
        ValueReceive::Map(hash_map!(
            String::from("role") => ValueReceive::String(role.into()),
            String::from("addresses") => ValueReceive::List(
                addresses
                    .iter()
                    .map(|a| ValueReceive::String(String::from(*a)))
                    .collect()
            ),
        ))
    }

    fn keys() -> Vec<String> {
        vec![String::from("ttl"), String::from("servers")]
    }

    fn record(ttl: i64, servers: Vec<ValueReceive>) -> BoltRecordFields {
        vec![ValueReceive::Integer(ttl), ValueReceive::List(servers)]
    }

    fn full_record(ttl: i64) -> BoltRecordFields {
        record(
            ttl,
            vec![
                server_entry("ROUTE", &["host1:7687", "host2:7687"]),
                server_entry("READ", &["host2:7687", "host3:7687"]),
                server_entry("WRITE", &["host1:7687"]),
            ],
        )
    }

    #[test]
    fn test_parse() {
        let rt = RoutingTable::try_parse(None, &keys(), vec![full_record(300)]).unwrap();
        assert_eq!(rt.routers, vec![addr("host1:7687"), addr("host2:7687")]);
        assert_eq!(rt.readers, vec![addr("host2:7687"), addr("host3:7687")]);
        assert_eq!(rt.writers, vec![addr("host1:7687")]);
        assert!(rt.database.is_none());
    }

    #[test]
    fn test_parse_keeps_database() {
        let db = Some(Arc::new(String::from("foo")));
        let rt = RoutingTable::try_parse(db.clone(), &keys(), vec![full_record(300)]).unwrap();
        assert_eq!(rt.database, db);
    }

    #[test]
    fn test_fresh_table_is_not_stale() {
        let rt = RoutingTable::try_parse(None, &keys(), vec![full_record(300)]).unwrap();
        assert!(!rt.is_stale_for(RoutingControl::Read));
        assert!(!rt.is_stale_for(RoutingControl::Write));
    }

    #[test]
    fn test_zero_ttl_is_stale() {
        let rt = RoutingTable::try_parse(None, &keys(), vec![full_record(0)]).unwrap();
        assert!(rt.is_stale_for(RoutingControl::Read));
        assert!(rt.is_stale_for(RoutingControl::Write));
    }

    #[test]
    fn test_negative_ttl_never_expires_by_age() {
        let rt = RoutingTable::try_parse(None, &keys(), vec![full_record(-1)]).unwrap();
        assert!(!rt.is_stale_for(RoutingControl::Read));
        assert!(!rt.is_expired_for(Duration::ZERO));
    }

    #[test]
    fn test_empty_table_is_stale() {
        let rt = RoutingTable::new(None);
        assert!(rt.is_stale_for(RoutingControl::Read));
        assert!(rt.is_stale_for(RoutingControl::Write));
    }

    #[test]
    fn test_table_without_writers_serves_reads_only() {
        let rt = RoutingTable::try_parse(
            None,
            &keys(),
            vec![record(
                300,
                vec![
                    server_entry("ROUTE", &["host1:7687"]),
                    server_entry("READ", &["host2:7687"]),
                    server_entry("WRITE", &[]),
                ],
            )],
        )
        .unwrap();
        assert!(!rt.is_stale_for(RoutingControl::Read));
        assert!(rt.is_stale_for(RoutingControl::Write));
    }

    #[test]
    fn test_expiry_for_purge_delay() {
        let rt = RoutingTable::try_parse(None, &keys(), vec![full_record(0)]).unwrap();
        assert!(rt.is_expired_for(Duration::ZERO));
        assert!(!rt.is_expired_for(Duration::from_secs(3600)));
    }

    #[test]
    fn test_forget_removes_readers_and_writers_but_not_routers() {
        let mut rt = RoutingTable::try_parse(None, &keys(), vec![full_record(300)]).unwrap();
        rt.forget(&addr("host2:7687"));
        assert_eq!(rt.routers, vec![addr("host1:7687"), addr("host2:7687")]);
        assert_eq!(rt.readers, vec![addr("host3:7687")]);
        assert_eq!(rt.writers, vec![addr("host1:7687")]);
    }

    #[test]
    fn test_forget_writer_keeps_reader_role() {
        let mut rt = RoutingTable::try_parse(
            None,
            &keys(),
            vec![record(
                300,
                vec![
                    server_entry("ROUTE", &["host1:7687"]),
                    server_entry("READ", &["host1:7687", "host2:7687"]),
                    server_entry("WRITE", &["host1:7687"]),
                ],
            )],
        )
        .unwrap();
        rt.forget_writer(&addr("host1:7687"));
        assert!(rt.writers.is_empty());
        assert_eq!(rt.readers, vec![addr("host1:7687"), addr("host2:7687")]);
        assert_eq!(rt.routers, vec![addr("host1:7687")]);
    }

    #[test]
    fn test_forget_router() {
        let mut rt = RoutingTable::try_parse(None, &keys(), vec![full_record(300)]).unwrap();
        rt.forget_router(&addr("host1:7687"));
        assert_eq!(rt.routers, vec![addr("host2:7687")]);
        assert_eq!(rt.writers, vec![addr("host1:7687")]);
    }

    #[test]
    fn test_duplicate_addresses_within_role_are_deduplicated() {
        let rt = RoutingTable::try_parse(
            None,
            &keys(),
            vec![record(
                300,
                vec![
                    server_entry("ROUTE", &["host1:7687", "host1:7687"]),
                    server_entry("READ", &["host1:7687"]),
                    server_entry("WRITE", &["host1:7687"]),
                ],
            )],
        )
        .unwrap();
        assert_eq!(rt.routers, vec![addr("host1:7687")]);
    }

    #[rstest]
    #[case::no_record(vec![])]
    #[case::two_records(vec![full_record(300), full_record(300)])]
    fn test_wrong_record_count(#[case] records: Vec<BoltRecordFields>) {
        assert!(RoutingTable::try_parse(None, &keys(), records).is_err());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let res = RoutingTable::try_parse(
            None,
            &keys(),
            vec![record(
                300,
                vec![
                    server_entry("ROUTE", &["host1:7687"]),
                    server_entry("READ", &["host1:7687"]),
                    server_entry("SCRIBE", &["host1:7687"]),
                ],
            )],
        );
        assert!(format!("{}", res.unwrap_err()).contains("unknown"));
    }

    #[rstest]
    #[case::no_routers(vec![server_entry("READ", &["host1:7687"])])]
    #[case::no_readers(vec![server_entry("ROUTE", &["host1:7687"])])]
    fn test_missing_mandatory_role_is_rejected(#[case] servers: Vec<ValueReceive>) {
        assert!(RoutingTable::try_parse(None, &keys(), vec![record(300, servers)]).is_err());
    }

    #[test]
    fn test_missing_ttl_is_rejected() {
        let res = RoutingTable::try_parse(
            None,
            &[String::from("servers")],
            vec![vec![ValueReceive::List(vec![])]],
        );
        assert!(format!("{}", res.unwrap_err()).contains("ttl"));
    }
}
