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
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use atomic_refcell::AtomicRefCell;
use log::{info, warn};

use super::super::bolt::message_parameters::{PullParameters, RunParameters};
use super::super::bolt::{BoltRecordFields, ResponseCallbacks, TcpBolt};
use super::routing::RoutingTable;
use crate::driver::session::bookmarks::Bookmarks;
use crate::error_::{BoltError, Result, ServerError};
use crate::value::ValueSend;

const ROUTING_PROCEDURE_MULTI_DB: &str = "CALL dbms.routing.getRoutingTable($context, $database)";
const ROUTING_PROCEDURE_SINGLE_DB: &str = "CALL dbms.cluster.routing.getRoutingTable($context)";
const SYSTEM_DATABASE: &str = "system";
const MULTI_DB_PROTOCOL_VERSION: (u8, u8) = (4, 0);

/// Invokes the routing discovery procedure on an open connection and parses
/// the reply into a [`RoutingTable`].
///
/// Servers speaking a protocol older than 4.0 only know the cluster-wide
/// procedure and get the call on their default database without bookmarks.
/// 4.0+ servers are asked on the `system` database, forwarding the session's
/// bookmarks so freshly created databases are visible to the discovery.
pub(crate) struct RoutingProcedureRunner;

impl RoutingProcedureRunner {
    pub(crate) fn fetch_routing_table(
        con: &mut TcpBolt,
        routing_context: &HashMap<String, ValueSend>,
        db: Option<&Arc<String>>,
        bookmarks: Option<&Bookmarks>,
        deadline: Option<Instant>,
    ) -> Result<RoutingTable> {
        let multi_db = con.protocol_version() >= MULTI_DB_PROTOCOL_VERSION;

        let mut parameters = HashMap::with_capacity(2);
        parameters.insert(
            String::from("context"),
            ValueSend::Map(routing_context.clone()),
        );
        let (query, session_db, bookmarks) = if multi_db {
            parameters.insert(
                String::from("database"),
                db.map(|db| db.as_str()).into(),
            );
            (ROUTING_PROCEDURE_MULTI_DB, Some(SYSTEM_DATABASE), bookmarks)
        } else {
            (ROUTING_PROCEDURE_SINGLE_DB, None, None)
        };

        let keys = Arc::new(AtomicRefCell::new(Vec::<String>::new()));
        let records = Arc::new(AtomicRefCell::new(Vec::<BoltRecordFields>::new()));

        con.run(
            RunParameters::new_auto_commit_run(
                query,
                Some(&parameters),
                bookmarks,
                None,
                None::<&HashMap<String, ValueSend>>,
                Some("r"),
                session_db,
            ),
            ResponseCallbacks::new()
                .with_on_success({
                    let keys = Arc::clone(&keys);
                    move |mut meta| {
                        let Some(fields) = meta.remove("fields") else {
                            return Ok(());
                        };
                        let fields = fields.try_into_list().map_err(|_| {
                            BoltError::protocol_error("RUN \"fields\" was not a list")
                        })?;
                        *keys.borrow_mut() = fields
                            .into_iter()
                            .map(|field| {
                                field.try_into_string().map_err(|_| {
                                    BoltError::protocol_error(
                                        "RUN \"fields\" contained a non-string",
                                    )
                                })
                            })
                            .collect::<Result<_>>()?;
                        Ok(())
                    }
                })
                .with_on_failure(|meta| Err(ServerError::from_meta(meta).into())),
        )?;
        con.pull(
            PullParameters::new_all(),
            ResponseCallbacks::new()
                .with_on_record({
                    let records = Arc::clone(&records);
                    move |fields| {
                        records.borrow_mut().push(fields);
                        Ok(())
                    }
                })
                .with_on_failure(|meta| Err(ServerError::from_meta(meta).into())),
        )?;
        con.write_all(deadline)?;
        con.read_all(deadline, None)?;

        let keys = mem::take(&mut *keys.borrow_mut());
        let records = mem::take(&mut *records.borrow_mut());
        RoutingTable::try_parse(db.map(Arc::clone), &keys, records).map_err(|err| {
            warn!("failed to parse routing table: {err}");
            BoltError::protocol_error(format!("{err}"))
        })
    }
}

/// Separates errors that abort the whole discovery from errors that merely
/// disqualify the router that produced them.
///
/// The outer `Err` is fatal; an inner `Err` tells the caller to forget the
/// router and try the next one.
pub(crate) fn wrap_discovery_error<T>(res: Result<T>) -> Result<Result<T>> {
    match res {
        Ok(t) => Ok(Ok(t)),
        Err(e) => {
            if let BoltError::ServerError { error } = &e {
                if error.is_routing_procedure_not_found() {
                    return Err(BoltError::disconnect(format!(
                        "server does not support routing; make sure the driver is pointed at a \
                         cluster member: {}",
                        error.message()
                    )));
                }
            }
            if e.fatal_during_discovery() {
                Err(e)
            } else {
                info!("ignored error during discovery: {e:?}");
                Ok(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    fn server_error(code: &str) -> BoltError {
        ServerError {
            code: String::from(code),
            message: String::from("test error"),
        }
        .into()
    }

    #[test]
    fn test_ok_passes_through() {
        let res = wrap_discovery_error(Ok(1)).unwrap();
        assert_eq!(res.unwrap(), 1);
    }

    #[rstest]
    #[case::transport(BoltError::disconnect("gone"))]
    #[case::transient(server_error("Neo.TransientError.General.DatabaseUnavailable"))]
    #[case::session_expired(BoltError::session_expired("gone"))]
    fn test_recoverable_errors_disqualify_router(#[case] err: BoltError) {
        let res = wrap_discovery_error::<()>(Err(err)).unwrap();
        assert!(res.is_err());
    }

    #[rstest]
    #[case::database_not_found(server_error("Neo.ClientError.Database.DatabaseNotFound"))]
    #[case::unauthorized(server_error("Neo.ClientError.Security.Unauthorized"))]
    #[case::malformed_record(BoltError::protocol_error("bad record"))]
    #[case::bad_config(BoltError::InvalidConfig { message: String::from("nope") })]
    fn test_fatal_errors_propagate(#[case] err: BoltError) {
        assert!(wrap_discovery_error::<()>(Err(err)).is_err());
    }

    #[test]
    fn test_procedure_not_found_is_fatal_service_unavailable() {
        let err = server_error("Neo.ClientError.Procedure.ProcedureNotFound");
        let res = wrap_discovery_error::<()>(Err(err));
        let Err(BoltError::Disconnect { message, .. }) = res else {
            panic!("expected fatal Disconnect, got {res:?}");
        };
        assert!(message.contains("does not support routing"));
    }
}
