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

mod config;
mod eager_result;
pub(crate) mod io;
mod record;
pub mod session;
pub mod transaction;

use std::sync::Arc;

use crate::error_::{BoltError, Result};

pub use config::{
    ConnectionConfig, ConnectionConfigParseError, DriverConfig, InvalidRoutingContextError,
    KeepAliveConfig, TlsConfigError,
};
pub use eager_result::EagerResult;
pub use record::Record;
pub use session::{Session, SessionConfig};

pub mod auth {
    pub use super::config::auth::*;
}

use io::bolt;
use io::pool::{Pool, PoolConfig};

const MULTI_DB_PROTOCOL_VERSION: (u8, u8) = (4, 0);
const TRANSACTION_CONFIG_PROTOCOL_VERSION: (u8, u8) = (3, 0);

/// Selects which cluster members are eligible to run a piece of work.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum RoutingControl {
    /// Any reader will do.
    Read,
    /// A writer is required.
    Write,
}

impl RoutingControl {
    pub(crate) fn as_protocol_str(&self) -> &'static str {
        match self {
            RoutingControl::Read => "r",
            RoutingControl::Write => "w",
        }
    }
}

/// The main entry point of the crate.
///
/// The driver holds the connection pools towards the cluster (or the single
/// server) and spawns [`Session`]s.
/// There is no need to pool driver objects; usually, each application will
/// use one global driver.
#[derive(Debug)]
pub struct Driver {
    pool: Pool,
}

impl Driver {
    pub fn new(connection_config: ConnectionConfig, config: DriverConfig) -> Self {
        let ConnectionConfig {
            address,
            routing_context,
            tls_config,
        } = connection_config;
        let address = Arc::new(address);
        let routing_context = routing_context.map(|mut context| {
            context.insert(String::from("address"), address.to_string().into());
            context
        });
        let pool_config = PoolConfig {
            routing_context,
            tls_config: tls_config.map(Arc::new),
            user_agent: config.user_agent,
            auth: config.auth,
            max_connection_lifetime: config.max_connection_lifetime,
            max_connection_pool_size: config.max_connection_pool_size,
            connection_timeout: config.connection_timeout,
            keep_alive: config.keep_alive,
            connection_acquisition_timeout: config.connection_acquisition_timeout,
            routing_table_purge_delay: config.routing_table_purge_delay,
            idle_time_before_connection_test: config.idle_time_before_connection_test,
            resolver: config.resolver,
        };
        Self {
            pool: Pool::new(address, pool_config),
        }
    }

    /// Spawn a new session.
    pub fn session(&self, config: SessionConfig) -> Session<'_> {
        Session::new(config, &self.pool)
    }

    /// Check whether the server supports multiple databases.
    ///
    /// A short-lived probe connection is opened for the answer; it only
    /// completes the protocol negotiation and never authenticates.
    pub fn supports_multi_db(&self) -> Result<bool> {
        Ok(self.probe_protocol_version()? >= MULTI_DB_PROTOCOL_VERSION)
    }

    /// Check whether the server supports transaction configuration
    /// (metadata and timeouts).
    ///
    /// See [`Driver::supports_multi_db()`] regarding the probe connection.
    pub fn supports_transaction_config(&self) -> Result<bool> {
        Ok(self.probe_protocol_version()? >= TRANSACTION_CONFIG_PROTOCOL_VERSION)
    }

    fn probe_protocol_version(&self) -> Result<(u8, u8)> {
        let config = &self.pool.config;
        let deadline = config.connection_acquisition_deadline();
        let mut last_err = None;
        for address in
            Arc::clone(self.pool.address()).fully_resolve(config.resolver.as_deref())?
        {
            match address {
                Ok(address) => {
                    match bolt::open(
                        bolt::TcpConnector,
                        address,
                        deadline,
                        config.connection_timeout,
                        config.keep_alive,
                        config.tls_config.as_ref().map(Arc::clone),
                    ) {
                        Ok(mut connection) => {
                            let version = connection.protocol_version();
                            connection.kill();
                            return Ok(version);
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(err) => last_err = Some(BoltError::connect_error(err)),
            }
        }
        Err(last_err
            .unwrap_or_else(|| BoltError::disconnect("address resolution yielded no addresses")))
    }

    /// Shut the driver down.
    ///
    /// All subsequent connection acquisitions will fail.
    /// Idle connections are closed right away; connections currently in use
    /// are closed as their sessions return them.
    pub fn close(&self) {
        self.pool.close()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use crate::macros::hash_map;

    use super::io::bolt::chunk::{Chunker, Dechunker};
    use super::io::bolt::message::BoltMessage;
    use super::io::bolt::packstream::{
        PackStreamDeserializer, PackStreamDeserializerImpl, PackStreamSerializer,
        PackStreamSerializerImpl,
    };
    use super::*;
    use crate::address_::Address;
    use crate::value::{ValueReceive, ValueSend};
    use crate::value_map;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Scripted single-instance "cluster": one server that answers the
    /// handshake, HELLO, the routing procedure (advertising itself in every
    /// role), plain queries, and transaction control messages.
    struct StubServer {
        port: u16,
    }

    impl StubServer {
        fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind stub server");
            let port = listener.local_addr().expect("bound above").port();
            thread::spawn(move || {
                while let Ok((stream, _)) = listener.accept() {
                    thread::spawn(move || serve(stream, port));
                }
            });
            Self { port }
        }

        fn address(&self) -> Address {
            Address::from(("127.0.0.1", self.port))
        }
    }

    fn serve(mut stream: TcpStream, port: u16) {
        let mut handshake = [0u8; 20];
        if stream.read_exact(&mut handshake).is_err() {
            return;
        }
        if stream.write_all(&[0, 0, 4, 4]).is_err() {
            return;
        }
        let mut pending_records: Vec<Vec<ValueSend>> = Vec::new();
        let mut failed = false;
        loop {
            let message = {
                let mut dechunker = Dechunker::new(&mut stream);
                match BoltMessage::load(&mut dechunker, |r| {
                    let mut deserializer = PackStreamDeserializerImpl::new(r);
                    deserializer.load().map_err(Into::into)
                }) {
                    Ok(message) => message,
                    Err(_) => return,
                }
            };
            if failed && !matches!(message.tag, 0x0F | 0x02) {
                if send_message(&mut stream, 0x7E, &[]).is_err() {
                    return;
                }
                continue;
            }
            let res = match message.tag {
                // HELLO
                0x01 => send_success(
                    &mut stream,
                    value_map!({
                        "server": "StubGraph/4.4.0",
                        "connection_id": "bolt-stub",
                    }),
                ),
                // RUN
                0x10 => {
                    let Some(ValueReceive::String(query)) = message.fields.first() else {
                        return;
                    };
                    if query.contains("getRoutingTable") {
                        pending_records = vec![routing_record(port)];
                        send_success(
                            &mut stream,
                            value_map!({
                                "fields": vec!["ttl", "servers"],
                            }),
                        )
                    } else if query.contains("notALeader") {
                        failed = true;
                        pending_records.clear();
                        send_failure(
                            &mut stream,
                            "Neo.ClientError.Cluster.NotALeader",
                            "No longer the leader.",
                        )
                    } else {
                        pending_records = vec![vec![ValueSend::Integer(1)]];
                        send_success(
                            &mut stream,
                            value_map!({
                                "fields": vec!["x"],
                            }),
                        )
                    }
                }
                // PULL
                0x3F => {
                    let mut res = Ok(());
                    for record in pending_records.drain(..) {
                        res = res.and_then(|_| send_record(&mut stream, record));
                    }
                    res.and_then(|_| {
                        send_success(
                            &mut stream,
                            value_map!({
                                "bookmark": "bm:stub:1",
                            }),
                        )
                    })
                }
                // RESET
                0x0F => {
                    failed = false;
                    send_success(&mut stream, value_map!({}))
                }
                // BEGIN
                0x11 => send_success(&mut stream, value_map!({})),
                // COMMIT
                0x12 => send_success(
                    &mut stream,
                    value_map!({
                        "bookmark": "bm:stub:2",
                    }),
                ),
                // ROLLBACK
                0x13 => send_success(&mut stream, value_map!({})),
                // GOODBYE
                0x02 => return,
                _ => return,
            };
            if res.is_err() {
                return;
            }
        }
    }

    fn routing_record(port: u16) -> Vec<ValueSend> {
        let address = format!("127.0.0.1:{port}");
        let server = |role: &str| {
            ValueSend::Map(hash_map!(
                String::from("role") => ValueSend::String(role.into()),
                String::from("addresses") => ValueSend::List(
                    vec![ValueSend::String(address.clone())]
                ),
            ))
        };
        vec![
            ValueSend::Integer(300),
            ValueSend::List(vec![server("ROUTE"), server("READ"), server("WRITE")]),
        ]
    }

    fn send_success(
        stream: &mut TcpStream,
        meta: HashMap<String, ValueSend>,
    ) -> std::io::Result<()> {
        send_message(stream, 0x70, &[ValueSend::Map(meta)])
    }

    fn send_failure(stream: &mut TcpStream, code: &str, message: &str) -> std::io::Result<()> {
        send_message(
            stream,
            0x7F,
            &[ValueSend::Map(hash_map!(
                String::from("code") => ValueSend::String(code.into()),
                String::from("message") => ValueSend::String(message.into()),
            ))],
        )
    }

    fn send_record(stream: &mut TcpStream, fields: Vec<ValueSend>) -> std::io::Result<()> {
        send_message(stream, 0x71, &[ValueSend::List(fields)])
    }

    fn send_message(stream: &mut TcpStream, tag: u8, fields: &[ValueSend]) -> std::io::Result<()> {
        let mut buffer = Vec::new();
        let mut serializer = PackStreamSerializerImpl::new(&mut buffer);
        serializer
            .write_struct_header(tag, fields.len() as u8)
            .expect("writing to Vec cannot fail");
        for field in fields {
            serialize_value(&mut serializer, field);
        }
        for chunk in Chunker::new(&[buffer]) {
            stream.write_all(&chunk)?;
        }
        stream.flush()
    }

    fn serialize_value<W: Write>(serializer: &mut PackStreamSerializerImpl<W>, value: &ValueSend) {
        let res = match value {
            ValueSend::Null => serializer.write_null(),
            ValueSend::Boolean(v) => serializer.write_bool(*v),
            ValueSend::Integer(v) => serializer.write_int(*v),
            ValueSend::Float(v) => serializer.write_float(*v),
            ValueSend::Bytes(v) => serializer.write_bytes(v),
            ValueSend::String(v) => serializer.write_string(v),
            ValueSend::List(v) => {
                serializer
                    .write_list_header(v.len() as u64)
                    .expect("writing to Vec cannot fail");
                for entry in v {
                    serialize_value(serializer, entry);
                }
                Ok(())
            }
            ValueSend::Map(v) => {
                serializer
                    .write_dict_header(v.len() as u64)
                    .expect("writing to Vec cannot fail");
                for (key, entry) in v {
                    serializer
                        .write_string(key)
                        .expect("writing to Vec cannot fail");
                    serialize_value(serializer, entry);
                }
                Ok(())
            }
        };
        res.expect("writing to Vec cannot fail");
    }

    fn routing_driver(server: &StubServer) -> Driver {
        Driver::new(
            ConnectionConfig::new(server.address()),
            DriverConfig::new(),
        )
    }

    #[test]
    fn test_read_query_through_routing() {
        init_logging();
        let server = StubServer::start();
        let driver = routing_driver(&server);

        let mut session = driver.session(SessionConfig::new());
        let result = session
            .auto_commit("RETURN 1 AS x")
            .with_routing_control(RoutingControl::Read)
            .run()
            .unwrap();

        assert_eq!(result.keys.len(), 1);
        assert_eq!(result.keys[0].as_str(), "x");
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            result.records[0].value("x"),
            Some(&ValueReceive::Integer(1))
        );
    }

    #[test]
    fn test_write_query_through_routing() {
        init_logging();
        let server = StubServer::start();
        let driver = routing_driver(&server);

        let mut session = driver.session(SessionConfig::new());
        let result = session
            .auto_commit("CREATE (n) RETURN 1 AS x")
            .with_routing_control(RoutingControl::Write)
            .run()
            .unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(
            session.last_bookmarks().raw().collect::<Vec<_>>(),
            vec!["bm:stub:1"]
        );
    }

    #[test]
    fn test_direct_driver() {
        init_logging();
        let server = StubServer::start();
        let driver = Driver::new(
            ConnectionConfig::new(server.address()).with_routing(false),
            DriverConfig::new(),
        );

        let mut session = driver.session(SessionConfig::new());
        let result = session.auto_commit("RETURN 1 AS x").run().unwrap();
        assert_eq!(result.records.len(), 1);
    }

    #[test]
    fn test_transaction_commit() {
        init_logging();
        let server = StubServer::start();
        let driver = routing_driver(&server);

        let mut session = driver.session(SessionConfig::new());
        let records = session
            .transaction()
            .with_routing_control(RoutingControl::Read)
            .run(|mut tx| {
                let result = tx.run("RETURN 1 AS x")?;
                tx.commit()?;
                Ok(result.records)
            })
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            session.last_bookmarks().raw().collect::<Vec<_>>(),
            vec!["bm:stub:2"]
        );
    }

    #[test]
    fn test_writer_failure_invalidates_writer_and_recovers() {
        init_logging();
        let server = StubServer::start();
        let driver = routing_driver(&server);

        let mut session = driver.session(SessionConfig::new());
        let res = session.auto_commit("notALeader").run();
        let Err(BoltError::SessionExpired { .. }) = res else {
            panic!("expected SessionExpired, got {res:?}");
        };

        // the writer was forgotten; the next write forces a rediscovery
        let mut session = driver.session(SessionConfig::new());
        let result = session.auto_commit("RETURN 1 AS x").run().unwrap();
        assert_eq!(result.records.len(), 1);
    }

    #[test]
    fn test_protocol_version_probe() {
        init_logging();
        let server = StubServer::start();
        let driver = routing_driver(&server);

        assert!(driver.supports_multi_db().unwrap());
        assert!(driver.supports_transaction_config().unwrap());
    }

    #[test]
    fn test_closed_driver_rejects_new_work() {
        init_logging();
        let server = StubServer::start();
        let driver = routing_driver(&server);

        driver.close();
        let mut session = driver.session(SessionConfig::new());
        assert!(session.auto_commit("RETURN 1 AS x").run().is_err());
    }
}
