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

use super::ValueConversionError;

/// A value received from the server.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValueReceive {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<ValueReceive>),
    Map(HashMap<String, ValueReceive>),
    /// A value the driver failed to interpret (e.g., a structure of a kind
    /// this protocol version doesn't know).
    /// Accessing it is a client-side error; it can, however, be safely
    /// ignored when contained in an otherwise valid result.
    BrokenValue { reason: String },
}

macro_rules! impl_value_accessors {
    ( $variant:ident, $ty:ty, $as_name:ident, $try_into_name:ident ) => {
        pub fn $as_name(&self) -> Option<&$ty> {
            match self {
                Self::$variant(v) => Some(v),
                _ => None,
            }
        }

        pub fn $try_into_name(self) -> Result<$ty, Self> {
            match self {
                Self::$variant(v) => Ok(v),
                _ => Err(self),
            }
        }
    };
}

impl ValueReceive {
    impl_value_accessors!(Boolean, bool, as_bool, try_into_bool);
    impl_value_accessors!(Integer, i64, as_int, try_into_int);
    impl_value_accessors!(Float, f64, as_float, try_into_float);
    impl_value_accessors!(Bytes, Vec<u8>, as_bytes, try_into_bytes);
    impl_value_accessors!(String, String, as_string, try_into_string);
    impl_value_accessors!(List, Vec<ValueReceive>, as_list, try_into_list);
    impl_value_accessors!(Map, HashMap<String, ValueReceive>, as_map, try_into_map);

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub(crate) fn broken(reason: impl Into<String>) -> Self {
        Self::BrokenValue {
            reason: reason.into(),
        }
    }

    pub(crate) fn dbg_print(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Boolean(v) => format!("{v}"),
            Self::Integer(v) => format!("{v}"),
            Self::Float(v) => format!("{v}"),
            Self::Bytes(v) => format!("bytes{v:02X?}"),
            Self::String(v) => format!("{v:?}"),
            Self::List(v) => format!(
                "[{}]",
                v.iter().map(Self::dbg_print).collect::<Vec<_>>().join(", ")
            ),
            Self::Map(v) => format!(
                "{{{}}}",
                v.iter()
                    .map(|(k, v)| format!("{:?}: {}", k, v.dbg_print()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::BrokenValue { reason } => format!("BrokenValue({reason})"),
        }
    }
}

macro_rules! impl_try_from_value {
    ( $variant:ident, $ty:ty, $reason:literal ) => {
        impl TryFrom<ValueReceive> for $ty {
            type Error = ValueConversionError;

            fn try_from(v: ValueReceive) -> Result<Self, Self::Error> {
                match v {
                    ValueReceive::$variant(v) => Ok(v),
                    _ => Err($reason.into()),
                }
            }
        }
    };
}

impl_try_from_value!(Boolean, bool, "expected boolean");
impl_try_from_value!(Integer, i64, "expected integer");
impl_try_from_value!(Float, f64, "expected float");
impl_try_from_value!(String, String, "expected string");
impl_try_from_value!(List, Vec<ValueReceive>, "expected list");
impl_try_from_value!(Map, HashMap<String, ValueReceive>, "expected map");
