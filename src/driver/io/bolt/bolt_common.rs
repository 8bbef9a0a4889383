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

use std::io::{Read, Write};

use super::message::BoltMessage;
use super::{bolt_debug, BoltData, OnServerErrorCb};
use crate::error_::{BoltError, Result, ServerError};
use crate::value::ValueReceive;

pub(super) fn assert_response_field_count<T>(
    name: &str,
    fields: &[T],
    expected_count: usize,
) -> Result<()> {
    if fields.len() == expected_count {
        Ok(())
    } else {
        Err(BoltError::protocol_error(format!(
            "{} response should have {} field(s) but found {:?}",
            name,
            expected_count,
            fields.len()
        )))
    }
}

/// Response handling is identical across all supported protocol versions.
pub(super) fn handle_response<RW: Read + Write>(
    data: &mut BoltData<RW>,
    message: BoltMessage<ValueReceive>,
    on_server_error: OnServerErrorCb<RW>,
) -> Result<()> {
    let mut response = data
        .responses
        .pop_front()
        .expect("called Bolt::read_one with empty response queue");
    match message {
        BoltMessage {
            tag: 0x70,
            mut fields,
        } => {
            // SUCCESS
            assert_response_field_count("SUCCESS", &fields, 1)?;
            let meta = fields.pop().expect("checked fields count above");
            bolt_debug!(data, "S: SUCCESS {}", meta.dbg_print());
            data.bolt_state.success(response.message, &meta);
            response.callbacks.on_success(meta)
        }
        BoltMessage { tag: 0x7E, fields } => {
            // IGNORED
            assert_response_field_count("IGNORED", &fields, 0)?;
            bolt_debug!(data, "S: IGNORED");
            response.callbacks.on_ignored()
        }
        BoltMessage {
            tag: 0x7F,
            mut fields,
        } => {
            // FAILURE
            assert_response_field_count("FAILURE", &fields, 1)?;
            let meta = fields.pop().expect("checked fields count above");
            bolt_debug!(data, "S: FAILURE {}", meta.dbg_print());
            data.bolt_state.failure();
            let meta = meta
                .try_into_map()
                .map_err(|_| BoltError::protocol_error("FAILURE meta was not a Dictionary"))?;
            if let Some(cb) = on_server_error {
                let mut error = ServerError::from_meta(meta.clone());
                cb(data, &mut error)?;
            }
            response.callbacks.on_failure(ValueReceive::Map(meta))
        }
        BoltMessage {
            tag: 0x71,
            mut fields,
        } => {
            // RECORD
            assert_response_field_count("RECORD", &fields, 1)?;
            let record = fields.pop().expect("checked fields count above");
            bolt_debug!(data, "S: RECORD [...]");
            let res = response.callbacks.on_record(record);
            data.responses.push_front(response);
            res
        }
        BoltMessage { tag, .. } => Err(BoltError::protocol_error(format!(
            "unknown response message tag {:02X?}",
            tag
        ))),
    }
}
