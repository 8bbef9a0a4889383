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

use log::warn;

use super::response::ResponseMessage;
use crate::value::ValueReceive;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum BoltState {
    Connected,
    Ready,
    Streaming,
    TxReady,
    TxStreaming,
    Failed,
}

/// Tracks the server-side state machine to know whether a connection has to
/// be reset before it can be returned to the pool.
#[derive(Debug)]
pub(crate) struct BoltStateTracker {
    state: BoltState,
}

impl BoltStateTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: BoltState::Connected,
        }
    }

    pub(crate) fn state(&self) -> BoltState {
        self.state
    }

    pub(crate) fn failure(&mut self) {
        self.state = BoltState::Failed;
    }

    pub(crate) fn success(&mut self, message: ResponseMessage, meta: &ValueReceive) {
        let in_tx = matches!(self.state, BoltState::TxReady | BoltState::TxStreaming);
        self.state = match message {
            ResponseMessage::Hello | ResponseMessage::Reset => BoltState::Ready,
            ResponseMessage::Run => match in_tx {
                true => BoltState::TxStreaming,
                false => BoltState::Streaming,
            },
            ResponseMessage::Pull | ResponseMessage::Discard => {
                if Self::meta_has_more(meta) {
                    self.state
                } else if in_tx {
                    BoltState::TxReady
                } else {
                    BoltState::Ready
                }
            }
            ResponseMessage::Begin => BoltState::TxReady,
            ResponseMessage::Commit | ResponseMessage::Rollback => BoltState::Ready,
        };
    }

    fn meta_has_more(meta: &ValueReceive) -> bool {
        let ValueReceive::Map(meta) = meta else {
            return false;
        };
        match meta.get("has_more") {
            None => false,
            Some(ValueReceive::Boolean(has_more)) => *has_more,
            Some(value) => {
                warn!("server sent non-boolean \"has_more\" entry: {value:?}");
                false
            }
        }
    }
}
