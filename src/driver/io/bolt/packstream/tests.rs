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

use rstest::*;

use super::deserialize::{PackStreamDeserializer, PackStreamDeserializerImpl};
use super::serialize::{PackStreamSerializer, PackStreamSerializerImpl};
use crate::macros::hash_map;
use crate::value::ValueReceive;

fn serialize(write: impl FnOnce(&mut PackStreamSerializerImpl<Vec<u8>>)) -> Vec<u8> {
    let mut buff = Vec::new();
    let mut serializer = PackStreamSerializerImpl::new(&mut buff);
    write(&mut serializer);
    buff
}

fn deserialize(mut bytes: &[u8]) -> ValueReceive {
    let mut deserializer = PackStreamDeserializerImpl::new(&mut bytes);
    let value = deserializer.load().unwrap();
    assert!(bytes.is_empty(), "deserializer left {bytes:02X?} unread");
    value
}

#[rstest]
#[case(0, vec![0x00])]
#[case(1, vec![0x01])]
#[case(-1, vec![0xFF])]
#[case(127, vec![0x7F])]
#[case(-16, vec![0xF0])]
#[case(-17, vec![0xC8, 0xEF])]
#[case(-128, vec![0xC8, 0x80])]
#[case(128, vec![0xC9, 0x00, 0x80])]
#[case(-32_768, vec![0xC9, 0x80, 0x00])]
#[case(32_768, vec![0xCA, 0x00, 0x00, 0x80, 0x00])]
#[case(2_147_483_648, vec![0xCB, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00])]
#[case(i64::MAX, vec![0xCB, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])]
#[case(i64::MIN, vec![0xCB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])]
fn test_int_serialization(#[case] value: i64, #[case] expected: Vec<u8>) {
    let bytes = serialize(|s| s.write_int(value).unwrap());
    assert_eq!(bytes, expected);
    assert_eq!(deserialize(&bytes), ValueReceive::Integer(value));
}

#[rstest]
#[case(vec![0xC0], ValueReceive::Null)]
#[case(vec![0xC2], ValueReceive::Boolean(false))]
#[case(vec![0xC3], ValueReceive::Boolean(true))]
#[case(vec![0xC1, 0x3F, 0xF1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9A],
       ValueReceive::Float(1.1))]
fn test_scalar_deserialization(#[case] bytes: Vec<u8>, #[case] expected: ValueReceive) {
    assert_eq!(deserialize(&bytes), expected);
}

#[test]
fn test_tiny_string_serialization() {
    let bytes = serialize(|s| s.write_string("hello").unwrap());
    assert_eq!(bytes, vec![0x85, b'h', b'e', b'l', b'l', b'o']);
    assert_eq!(deserialize(&bytes), ValueReceive::String("hello".into()));
}

#[rstest]
#[case(16, vec![0xD0, 16])]
#[case(255, vec![0xD0, 255])]
#[case(256, vec![0xD1, 0x01, 0x00])]
#[case(65_536, vec![0xD2, 0x00, 0x01, 0x00, 0x00])]
fn test_string_size_markers(#[case] size: usize, #[case] header: Vec<u8>) {
    let string = "x".repeat(size);
    let bytes = serialize(|s| s.write_string(&string).unwrap());
    assert_eq!(&bytes[..header.len()], header.as_slice());
    assert_eq!(bytes.len(), header.len() + size);
    assert_eq!(deserialize(&bytes), ValueReceive::String(string));
}

#[test]
fn test_bytes_serialization() {
    let bytes = serialize(|s| s.write_bytes(&[1, 2, 3]).unwrap());
    assert_eq!(bytes, vec![0xCC, 3, 1, 2, 3]);
    assert_eq!(deserialize(&bytes), ValueReceive::Bytes(vec![1, 2, 3]));
}

#[test]
fn test_list_serialization() {
    let bytes = serialize(|s| {
        s.write_list_header(2).unwrap();
        s.write_int(1).unwrap();
        s.write_string("two").unwrap();
    });
    assert_eq!(bytes[0], 0x92);
    assert_eq!(
        deserialize(&bytes),
        ValueReceive::List(vec![
            ValueReceive::Integer(1),
            ValueReceive::String("two".into()),
        ])
    );
}

#[test]
fn test_dict_serialization() {
    let bytes = serialize(|s| {
        s.write_dict_header(1).unwrap();
        s.write_string("key").unwrap();
        s.write_null().unwrap();
    });
    assert_eq!(bytes[0], 0xA1);
    assert_eq!(
        deserialize(&bytes),
        ValueReceive::Map(hash_map!(String::from("key") => ValueReceive::Null))
    );
}

#[test]
fn test_nested_collection_roundtrip() {
    let bytes = serialize(|s| {
        s.write_dict_header(1).unwrap();
        s.write_string("servers").unwrap();
        s.write_list_header(2).unwrap();
        s.write_string("localhost:7687").unwrap();
        s.write_string("localhost:7688").unwrap();
    });
    assert_eq!(
        deserialize(&bytes),
        ValueReceive::Map(hash_map!(
            String::from("servers") => ValueReceive::List(vec![
                ValueReceive::String("localhost:7687".into()),
                ValueReceive::String("localhost:7688".into()),
            ])
        ))
    );
}

#[test]
fn test_unhandled_struct_deserializes_to_broken_value() {
    // Node structure (tag 0x4E) with three fields
    let bytes = serialize(|s| {
        s.write_struct_header(0x4E, 3).unwrap();
        s.write_int(1).unwrap();
        s.write_list_header(0).unwrap();
        s.write_dict_header(0).unwrap();
    });
    let value = deserialize(&bytes);
    let ValueReceive::BrokenValue { reason } = value else {
        panic!("expected BrokenValue, got {value:?}");
    };
    assert!(reason.contains("0x4E"));
}

#[test]
fn test_unknown_marker_is_error() {
    let mut bytes: &[u8] = &[0xDF];
    let mut deserializer = PackStreamDeserializerImpl::new(&mut bytes);
    let err = deserializer.load().unwrap_err();
    assert!(format!("{err}").contains("unknown marker"));
}

#[test]
fn test_incomplete_input_is_error() {
    let mut bytes: &[u8] = &[0xC9, 0x00];
    let mut deserializer = PackStreamDeserializerImpl::new(&mut bytes);
    assert!(deserializer.load().is_err());
}
