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

macro_rules! hash_map {
    () => {std::collections::HashMap::new()};
    ( $($key:expr => $value:expr),* $(,)? ) => {
        {
            let mut m = std::collections::HashMap::with_capacity(
                hash_map!(_capacity($($value),*))
            );
            $(
                m.insert($key, $value);
            )*
            m
        }
    };
    ( _capacity() ) => (0usize);
    ( _capacity($x:tt) ) => (1usize);
    ( _capacity($x:tt, $($xs:tt),*) ) => (1usize + hash_map!(_capacity($($xs),*)));
}

pub(crate) use hash_map;

/// Short notation for creating a `HashMap<String, ValueSend>`.
///
/// Keys are string literals, values are anything that implements
/// `Into<ValueSend>`.
///
/// # Example
/// ```
/// use graphbolt::{value_map, ValueSend};
///
/// let map = value_map!({
///     "name": "Alice",
///     "age": 42,
/// });
///
/// assert_eq!(map.get("name"), Some(&ValueSend::String("Alice".into())));
/// assert_eq!(map.get("age"), Some(&ValueSend::Integer(42)));
/// ```
#[macro_export]
macro_rules! value_map {
    ({}) => {
        std::collections::HashMap::<String, $crate::ValueSend>::new()
    };
    ({ $($key:literal : $value:expr),* $(,)? }) => {
        {
            let mut m = std::collections::HashMap::<String, $crate::ValueSend>::new();
            $(
                m.insert(String::from($key), $crate::ValueSend::from($value));
            )*
            m
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::ValueSend;

    #[test]
    fn test_empty_value_map() {
        let map = value_map!({});
        assert!(map.is_empty());
    }

    #[test]
    fn test_value_map() {
        let map = value_map!({
            "null": None::<i64>,
            "int": 1,
            "string": "foo",
        });
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("null"), Some(&ValueSend::Null));
        assert_eq!(map.get("int"), Some(&ValueSend::Integer(1)));
        assert_eq!(map.get("string"), Some(&ValueSend::String("foo".into())));
    }
}
