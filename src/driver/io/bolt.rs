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

mod bolt3;
mod bolt4x4;
mod bolt_common;
mod bolt_state;
pub(crate) mod chunk;
mod handshake;
pub(crate) mod message;
pub(crate) mod message_parameters;
pub(crate) mod packstream;
mod response;
mod socket;

use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::ops::Deref;
use std::result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use atomic_refcell::AtomicRefCell;
use enum_dispatch::enum_dispatch;
use usize_cast::FromUsize;

use super::deadline::DeadlineIO;
use crate::address_::Address;
use crate::error_::{BoltError, Result, ServerError};
use crate::value::{ValueReceive, ValueSend};
use bolt3::Bolt3;
use bolt4x4::Bolt4x4;
use bolt_state::BoltStateTracker;
use chunk::{Chunker, Dechunker};
pub(crate) use handshake::{open, TcpConnector};
use message::BoltMessage;
use message_parameters::{
    BeginParameters, CommitParameters, DiscardParameters, GoodbyeParameters, HelloParameters,
    PullParameters, ResetParameters, RollbackParameters, RunParameters,
};
use packstream::PackStreamSerializer;
pub(crate) use response::{BoltRecordFields, BoltResponse, ResponseCallbacks, ResponseMessage};
pub(crate) use socket::{BufTcpStream, Socket};

macro_rules! debug_buf_start {
    ($name:ident) => {
        let mut $name = None;
        {
            #![allow(unused_imports)]
            use log::{log_enabled, Level};

            if log_enabled!(Level::Debug) {
                $name = Some(String::new());
            }
        }
    };
}
pub(crate) use debug_buf_start;

macro_rules! debug_buf {
    ($name:ident, $($args:tt)+) => {{
        #![allow(unused_imports)]
        use log::{log_enabled, Level};

        if log_enabled!(Level::Debug) {
            $name.as_mut().unwrap().push_str(&format!($($args)*))
        };
    }}
}
pub(crate) use debug_buf;

macro_rules! bolt_debug_extra {
    ($meta:expr, $local_port:expr) => {
        'a: {
            {
                #![allow(unused_imports)]
                use crate::driver::io::bolt::dbg_extra;
                use crate::value::ValueReceive;

                let meta = $meta;
                let Ok(meta) = meta else {
                    break 'a dbg_extra($local_port, Some("!!!!"));
                };
                let Some(ValueReceive::String(id)) = meta.get("connection_id") else {
                    break 'a dbg_extra($local_port, None);
                };
                dbg_extra($local_port, Some(id))
            }
        }
    };
}
pub(crate) use bolt_debug_extra;

macro_rules! debug_buf_end {
    ($bolt:expr, $name:ident) => {{
        #![allow(unused_imports)]
        use log::debug;

        use crate::driver::io::bolt::bolt_debug_extra;

        debug!(
            "{}{}",
            bolt_debug_extra!($bolt.meta.try_borrow(), $bolt.local_port),
            $name.as_ref().map(|s| s.as_str()).unwrap_or("")
        );
    }};
}
pub(crate) use debug_buf_end;

macro_rules! bolt_debug {
    ($bolt:expr, $($args:tt)+) => {{
        #![allow(unused_imports)]
        use log::debug;

        use crate::driver::io::bolt::bolt_debug_extra;

        debug!(
            "{}{}",
            bolt_debug_extra!($bolt.meta.try_borrow(), $bolt.local_port),
            format!($($args)*)
        );
    }};
}
pub(crate) use bolt_debug;

macro_rules! socket_debug {
    ($local_port:expr, $($args:tt)+) => {{
        #![allow(unused_imports)]
        use log::debug;

        use crate::driver::io::bolt::dbg_extra;

        debug!(
            "{}{}",
            dbg_extra(Some($local_port), None),
            format!($($args)*)
        );
    }};
}
pub(crate) use socket_debug;

pub(crate) fn dbg_extra(port: Option<u16>, bolt_id: Option<&str>) -> String {
    format!(
        "[#{:04X} {:<10}] ",
        port.unwrap_or(0),
        bolt_id.unwrap_or("")
    )
}

pub(crate) type TcpRW = Socket<BufTcpStream>;
pub(crate) type TcpBolt = Bolt<TcpRW>;

pub(crate) type OnServerErrorCb<'a, 'b, RW> =
    Option<&'a mut (dyn FnMut(&mut BoltData<RW>, &mut ServerError) -> Result<()> + 'b)>;

#[derive(Debug)]
pub(crate) struct Bolt<RW: Read + Write> {
    data: BoltData<RW>,
    protocol: BoltProtocolVersion,
}

impl<RW: Read + Write> Bolt<RW> {
    fn new(
        version: (u8, u8),
        stream: RW,
        socket: Arc<Option<TcpStream>>,
        local_port: Option<u16>,
        address: Arc<Address>,
    ) -> Self {
        let protocol = match version {
            (4, 0..=4) => Bolt4x4::default().into(),
            (3, 0) => Bolt3::default().into(),
            _ => panic!("implement protocol for version {version:?}"),
        };
        let data = BoltData::new(version, stream, socket, local_port, address);
        Self { data, protocol }
    }

    pub(crate) fn close(&mut self) {
        if self.data.closed() {
            return;
        }
        self.data.connection_state = ConnectionState::Closed;
        self.data.message_buff.clear();
        self.data.responses.clear();
        if self.goodbye().is_err() {
            return;
        }
        let _ = self
            .data
            .write_all(Some(Instant::now() + Duration::from_millis(100)));
    }

    /// Tears the connection down without saying GOODBYE.
    /// Used for connections that never completed authentication
    /// (e.g., the protocol-version probe).
    pub(crate) fn kill(&mut self) {
        bolt_debug!(self.data, "C: <KILL>");
        self.data.connection_state = ConnectionState::Closed;
        self.data.message_buff.clear();
        self.data.responses.clear();
        self.data
            .socket
            .deref()
            .as_ref()
            .map(|s| s.shutdown(Shutdown::Both));
    }

    pub(crate) fn closed(&self) -> bool {
        self.data.closed()
    }

    pub(crate) fn unexpectedly_closed(&self) -> bool {
        self.data.unexpectedly_closed()
    }

    pub(crate) fn protocol_version(&self) -> (u8, u8) {
        self.data.version
    }

    pub(crate) fn address(&self) -> Arc<Address> {
        Arc::clone(&self.data.address)
    }

    pub(crate) fn server_agent(&self) -> Arc<String> {
        Arc::clone(self.data.server_agent.deref().borrow().deref())
    }

    pub(crate) fn hello(&mut self, parameters: HelloParameters) -> Result<()> {
        self.protocol.hello(&mut self.data, parameters)
    }

    pub(crate) fn goodbye(&mut self) -> Result<()> {
        self.protocol
            .goodbye(&mut self.data, GoodbyeParameters::new())
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        self.protocol.reset(&mut self.data, ResetParameters::new())
    }

    pub(crate) fn run<KP: Borrow<str> + Debug, KM: Borrow<str> + Debug>(
        &mut self,
        parameters: RunParameters<KP, KM>,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.run(&mut self.data, parameters, callbacks)
    }

    #[allow(dead_code)] // discarding is part of the protocol surface
    pub(crate) fn discard(
        &mut self,
        parameters: DiscardParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.discard(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn pull(
        &mut self,
        parameters: PullParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.pull(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn begin<K: Borrow<str> + Debug>(
        &mut self,
        parameters: BeginParameters<K>,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.begin(&mut self.data, parameters, callbacks)
    }

    pub(crate) fn commit(&mut self, callbacks: ResponseCallbacks) -> Result<()> {
        self.protocol
            .commit(&mut self.data, CommitParameters::new(), callbacks)
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.protocol
            .rollback(&mut self.data, RollbackParameters::new())
    }

    pub(crate) fn read_all(
        &mut self,
        deadline: Option<Instant>,
        mut on_server_error: OnServerErrorCb<RW>,
    ) -> Result<()> {
        let on_server_error_ref = &mut on_server_error;
        while self.expects_reply() {
            self.read_one(deadline, on_server_error_ref.as_deref_mut())?;
        }
        Ok(())
    }

    pub(crate) fn read_one(
        &mut self,
        deadline: Option<Instant>,
        on_server_error: OnServerErrorCb<RW>,
    ) -> Result<()> {
        let mut reader = DeadlineIO::new(
            &mut self.data.stream,
            deadline,
            self.data.socket.deref().as_ref(),
        );
        let mut dechunker = Dechunker::new(&mut reader);
        let message_result: Result<BoltMessage<ValueReceive>> =
            BoltMessage::load(&mut dechunker, |r| self.protocol.load_value(r));
        drop(dechunker);
        let message_result = reader.rewrite_error(message_result);
        let message = self.wrap_read_result(message_result)?;
        self.data.idle_since = Instant::now();
        self.protocol
            .handle_response(&mut self.data, message, on_server_error)
    }

    fn wrap_read_result<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(err) = &res {
            bolt_debug!(self.data, "read failed: {err:?}");
            self.data.connection_state = ConnectionState::Broken;
            self.data
                .socket
                .deref()
                .as_ref()
                .map(|s| s.shutdown(Shutdown::Both));
        }
        res
    }

    pub(crate) fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.data.idle_since = Instant::now();
        self.data.write_all(deadline)?;
        self.data.flush(deadline)
    }

    pub(crate) fn expects_reply(&self) -> bool {
        self.data.expects_reply()
    }

    pub(crate) fn needs_reset(&self) -> bool {
        self.data.needs_reset()
    }

    pub(crate) fn is_older_than(&self, duration: Duration) -> bool {
        self.data.is_older_than(duration)
    }

    pub(crate) fn is_idle_for(&self, timeout: Duration) -> bool {
        self.data.is_idle_for(timeout)
    }

    #[inline(always)]
    pub(crate) fn debug_log(&self, msg: impl FnOnce() -> String) {
        bolt_debug!(self.data, "{}", msg());
    }
}

impl<RW: Read + Write> Drop for Bolt<RW> {
    fn drop(&mut self) {
        self.close();
    }
}

#[enum_dispatch]
trait BoltProtocol: Debug {
    fn hello<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: HelloParameters,
    ) -> Result<()>;
    fn goodbye<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: GoodbyeParameters,
    ) -> Result<()>;
    fn reset<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: ResetParameters,
    ) -> Result<()>;
    fn run<RW: Read + Write, KP: Borrow<str> + Debug, KM: Borrow<str> + Debug>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: RunParameters<KP, KM>,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn discard<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: DiscardParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn pull<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: PullParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn begin<RW: Read + Write, K: Borrow<str> + Debug>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: BeginParameters<K>,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn commit<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: CommitParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn rollback<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        parameters: RollbackParameters,
    ) -> Result<()>;
    fn load_value<R: Read>(&mut self, reader: &mut R) -> Result<ValueReceive>;
    fn handle_response<RW: Read + Write>(
        &mut self,
        data: &mut BoltData<RW>,
        message: BoltMessage<ValueReceive>,
        on_server_error: OnServerErrorCb<RW>,
    ) -> Result<()>;
}

#[enum_dispatch(BoltProtocol)]
#[derive(Debug)]
enum BoltProtocolVersion {
    V3(Bolt3),
    V4x4(Bolt4x4),
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
enum ConnectionState {
    Healthy,
    Broken,
    Closed,
}

pub(crate) struct BoltData<RW: Read + Write> {
    message_buff: VecDeque<Vec<Vec<u8>>>,
    responses: VecDeque<BoltResponse>,
    stream: RW,
    socket: Arc<Option<TcpStream>>,
    local_port: Option<u16>,
    version: (u8, u8),
    connection_state: ConnectionState,
    bolt_state: BoltStateTracker,
    meta: Arc<AtomicRefCell<HashMap<String, ValueReceive>>>,
    server_agent: Arc<AtomicRefCell<Arc<String>>>,
    address: Arc<Address>,
    last_qid: Arc<AtomicRefCell<Option<i64>>>,
    created_at: Instant,
    idle_since: Instant,
}

impl<RW: Read + Write> BoltData<RW> {
    fn new(
        version: (u8, u8),
        stream: RW,
        socket: Arc<Option<TcpStream>>,
        local_port: Option<u16>,
        address: Arc<Address>,
    ) -> Self {
        let now = Instant::now();
        Self {
            message_buff: VecDeque::with_capacity(2048),
            responses: VecDeque::with_capacity(10),
            stream,
            socket,
            local_port,
            version,
            connection_state: ConnectionState::Healthy,
            bolt_state: BoltStateTracker::new(),
            meta: Default::default(),
            server_agent: Default::default(),
            address,
            last_qid: Default::default(),
            created_at: now,
            idle_since: now,
        }
    }

    pub(crate) fn address(&self) -> &Arc<Address> {
        &self.address
    }

    fn closed(&self) -> bool {
        !matches!(self.connection_state, ConnectionState::Healthy)
    }

    fn unexpectedly_closed(&self) -> bool {
        matches!(self.connection_state, ConnectionState::Broken)
            && !matches!(self.bolt_state.state(), bolt_state::BoltState::Failed)
    }

    fn can_omit_qid(&self, qid: i64) -> bool {
        qid == -1 || Some(qid) == *(self.last_qid.deref().borrow())
    }

    fn serialize_dict<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        map: &HashMap<impl Borrow<str>, ValueSend>,
    ) -> result::Result<(), S::Error> {
        serializer.write_dict_header(u64::from_usize(map.len()))?;
        for (k, v) in map {
            serializer.write_string(k.borrow())?;
            self.serialize_value(serializer, v)?;
        }
        Ok(())
    }

    fn serialize_str_slice<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        slice: &[impl Borrow<str>],
    ) -> result::Result<(), S::Error> {
        serializer.write_list_header(u64::from_usize(slice.len()))?;
        for v in slice {
            serializer.write_string(v.borrow())?;
        }
        Ok(())
    }

    #[inline]
    fn serialize_str_iter<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        iter: impl Iterator<Item = impl Borrow<str>>,
    ) -> result::Result<(), S::Error> {
        self.serialize_str_slice(serializer, &iter.collect::<Vec<_>>())
    }

    fn serialize_value<S: PackStreamSerializer>(
        &self,
        serializer: &mut S,
        v: &ValueSend,
    ) -> result::Result<(), S::Error> {
        match v {
            ValueSend::Null => serializer.write_null(),
            ValueSend::Boolean(b) => serializer.write_bool(*b),
            ValueSend::Integer(i) => serializer.write_int(*i),
            ValueSend::Float(f) => serializer.write_float(*f),
            ValueSend::Bytes(b) => serializer.write_bytes(b),
            ValueSend::String(s) => serializer.write_string(s),
            ValueSend::List(l) => {
                serializer.write_list_header(u64::from_usize(l.len()))?;
                for v in l {
                    self.serialize_value(serializer, v)?;
                }
                Ok(())
            }
            ValueSend::Map(m) => self.serialize_dict(serializer, m),
        }
    }

    fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        while self.has_buffered_message() {
            self.write_one(deadline)?
        }
        Ok(())
    }

    fn write_one(&mut self, deadline: Option<Instant>) -> Result<()> {
        if let Some(message_buff) = self.message_buff.pop_front() {
            let chunker = Chunker::new(&message_buff);
            let mut writer =
                DeadlineIO::new(&mut self.stream, deadline, self.socket.deref().as_ref());
            for chunk in chunker {
                let res = BoltError::wrap_write(writer.write_all(&chunk));
                let res = writer.rewrite_error(res);
                if let Err(err) = &res {
                    self.handle_write_error(err);
                    return res;
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self, deadline: Option<Instant>) -> Result<()> {
        let mut writer = DeadlineIO::new(&mut self.stream, deadline, self.socket.deref().as_ref());
        let res = BoltError::wrap_write(writer.flush());
        let res = writer.rewrite_error(res);
        if let Err(err) = &res {
            self.handle_write_error(err);
            return res;
        }
        Ok(())
    }

    fn handle_write_error(&mut self, err: &BoltError) {
        bolt_debug!(self, "write failed: {}", err);
        self.connection_state = ConnectionState::Broken;
        self.socket
            .deref()
            .as_ref()
            .map(|s| s.shutdown(Shutdown::Both));
    }

    fn has_buffered_message(&self) -> bool {
        !self.message_buff.is_empty()
    }

    fn expects_reply(&self) -> bool {
        !self.responses.is_empty()
    }

    fn needs_reset(&self) -> bool {
        if let Some(response) = self.responses.iter().last() {
            if response.message == ResponseMessage::Reset {
                return false;
            }
        }
        if self.connection_state != ConnectionState::Healthy {
            return false;
        }
        !(self.bolt_state.state() == bolt_state::BoltState::Ready && self.responses.is_empty())
    }

    fn is_older_than(&self, duration: Duration) -> bool {
        self.created_at.elapsed() >= duration
    }

    fn is_idle_for(&self, timeout: Duration) -> bool {
        self.idle_since.elapsed() >= timeout
    }
}

impl<RW: Read + Write> Debug for BoltData<RW> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltData")
            .field("message_buff", &self.message_buff)
            .field("responses", &self.responses)
            .finish()
    }
}
