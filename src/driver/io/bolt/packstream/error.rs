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

use std::io;

use thiserror::Error;

use crate::error_::BoltError;

#[derive(Error, Debug)]
#[error("{reason}")]
pub(crate) struct PackStreamSerializeError {
    reason: String,
    #[source]
    cause: Option<io::Error>,
}

impl From<String> for PackStreamSerializeError {
    fn from(reason: String) -> Self {
        Self {
            reason,
            cause: None,
        }
    }
}

impl From<&str> for PackStreamSerializeError {
    fn from(reason: &str) -> Self {
        String::from(reason).into()
    }
}

impl From<io::Error> for PackStreamSerializeError {
    fn from(err: io::Error) -> Self {
        let mut e: Self = format!("IO failure: {err}").into();
        e.cause = Some(err);
        e
    }
}

impl From<PackStreamSerializeError> for BoltError {
    fn from(err: PackStreamSerializeError) -> Self {
        match err.cause {
            Some(io_err) => BoltError::write_error(io_err),
            None => BoltError::InvalidConfig {
                message: err.reason,
            },
        }
    }
}

#[derive(Error, Debug)]
#[error("{reason}")]
pub(crate) struct PackStreamDeserializeError {
    reason: String,
    protocol_violation: bool,
    #[source]
    cause: Option<io::Error>,
}

impl PackStreamDeserializeError {
    pub(crate) fn protocol_violation<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
            protocol_violation: true,
            cause: None,
        }
    }
}

impl From<&str> for PackStreamDeserializeError {
    fn from(reason: &str) -> Self {
        Self::protocol_violation(reason)
    }
}

impl From<io::Error> for PackStreamDeserializeError {
    fn from(err: io::Error) -> Self {
        Self {
            reason: format!("IO failure: {err}"),
            protocol_violation: false,
            cause: Some(err),
        }
    }
}

impl From<PackStreamDeserializeError> for BoltError {
    fn from(err: PackStreamDeserializeError) -> Self {
        match err.cause {
            Some(io_err) => BoltError::read_err(io_err),
            None => BoltError::protocol_error(err.reason),
        }
    }
}
