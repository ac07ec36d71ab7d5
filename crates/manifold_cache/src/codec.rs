//! Value marshalling between typed application values and their stored form.
//!
//! Values travel in one of two wire shapes: a plain string (`Encoded::Text`)
//! or a field map (`Encoded::Fields`) when a composite value is spread across
//! the fields of one hash key. Scalars use their canonical textual form,
//! composites use JSON. The codec for a batch call is chosen by the caller,
//! which is also how the target type and its array-ness are declared; there
//! is no runtime type inspection.

use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cluster::Reply;
use crate::error::CodecError;

/// Wire form produced by [`ValueCodec::encode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoded {
    /// A single string value, stored as-is.
    Text(String),
    /// Field name to encoded-string pairs for whole-hash storage.
    Fields(Vec<(String, String)>),
}

impl Encoded {
    pub fn kind(&self) -> &'static str {
        match self {
            Encoded::Text(_) => "text",
            Encoded::Fields(_) => "field-map",
        }
    }
}

/// Bidirectional mapping between a typed value and its stored form.
///
/// `decode` answers `Ok(None)` for an absent value: a missing reply, or an
/// empty field map (an expired hash key reads back as an empty map, which is
/// a miss, never an empty-object hit).
pub trait ValueCodec<V> {
    fn encode(&self, value: &V) -> Result<Encoded, CodecError>;
    fn decode(&self, reply: Reply) -> Result<Option<V>, CodecError>;
}

/// Canonical textual form for scalar values: text, integers, floats, bool.
pub struct ScalarCodec<T>(PhantomData<T>);

impl<T> ScalarCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ScalarCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueCodec<T> for ScalarCodec<T>
where
    T: Display + FromStr,
    <T as FromStr>::Err: Display,
{
    fn encode(&self, value: &T) -> Result<Encoded, CodecError> {
        Ok(Encoded::Text(value.to_string()))
    }

    fn decode(&self, reply: Reply) -> Result<Option<T>, CodecError> {
        match reply {
            Reply::Missing => Ok(None),
            Reply::Text(raw) => match raw.parse::<T>() {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(CodecError::Parse {
                    raw,
                    message: err.to_string(),
                }),
            },
            other => Err(CodecError::UnexpectedReply(other.kind())),
        }
    }
}

/// JSON text form for composite values. `JsonCodec<Vec<T>>` is the declared
/// shape for values stored as a JSON array.
pub struct JsonCodec<T>(PhantomData<T>);

impl<T> JsonCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Encoded, CodecError> {
        match serde_json::to_string(value) {
            Ok(text) => Ok(Encoded::Text(text)),
            Err(err) => Err(CodecError::Json {
                message: err.to_string(),
            }),
        }
    }

    fn decode(&self, reply: Reply) -> Result<Option<T>, CodecError> {
        match reply {
            Reply::Missing => Ok(None),
            Reply::Text(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(CodecError::Json {
                    message: err.to_string(),
                }),
            },
            other => Err(CodecError::UnexpectedReply(other.kind())),
        }
    }
}

/// One declared field of a hash-stored composite type: its stored name, an
/// accessor producing the field's encoded string, and an assigner applying a
/// stored string back onto the value.
pub struct HashField<V> {
    pub name: &'static str,
    pub get: fn(&V) -> Result<String, CodecError>,
    pub set: fn(&mut V, &str) -> Result<(), CodecError>,
}

/// A composite type that can be spread across the fields of one hash key.
///
/// The field table is declared once per type and reused; fields present in
/// the store but absent from the table are ignored on decode.
pub trait HashValue: Default {
    fn fields() -> &'static [HashField<Self>]
    where
        Self: Sized;
}

/// Whole-hash layout: each declared field of the value occupies one hash
/// field under the key.
pub struct HashCodec<V>(PhantomData<V>);

impl<V> HashCodec<V> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V> Default for HashCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: HashValue + 'static> ValueCodec<V> for HashCodec<V> {
    fn encode(&self, value: &V) -> Result<Encoded, CodecError> {
        let specs = V::fields();
        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            fields.push((spec.name.to_string(), (spec.get)(value)?));
        }
        Ok(Encoded::Fields(fields))
    }

    fn decode(&self, reply: Reply) -> Result<Option<V>, CodecError> {
        match reply {
            Reply::Missing => Ok(None),
            // An absent or expired hash key reads back as an empty map.
            Reply::Fields(map) if map.is_empty() => Ok(None),
            Reply::Fields(map) => {
                let mut value = V::default();
                for (name, raw) in &map {
                    let Some(spec) = V::fields().iter().find(|f| f.name == name) else {
                        continue;
                    };
                    (spec.set)(&mut value, raw).map_err(|err| CodecError::Field {
                        field: name.clone(),
                        message: err.to_string(),
                    })?;
                }
                Ok(Some(value))
            }
            other => Err(CodecError::UnexpectedReply(other.kind())),
        }
    }
}

/// Helpers for [`HashField`] accessors and assigners.
pub mod field {
    use super::*;

    /// Canonical textual form of a scalar field.
    pub fn text<T: Display>(value: &T) -> Result<String, CodecError> {
        Ok(value.to_string())
    }

    /// Parse a scalar field from its textual form.
    pub fn scalar<T>(raw: &str) -> Result<T, CodecError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        raw.parse::<T>().map_err(|err| CodecError::Parse {
            raw: raw.to_string(),
            message: err.to_string(),
        })
    }

    /// JSON text of a composite field.
    pub fn json_text<T: Serialize>(value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|err| CodecError::Json {
            message: err.to_string(),
        })
    }

    /// Parse a composite field from JSON text.
    pub fn json<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
        serde_json::from_str(raw).map_err(|err| CodecError::Json {
            message: err.to_string(),
        })
    }

    /// Parse a collection-typed field as a JSON array of its element type.
    pub fn json_vec<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, CodecError> {
        json::<Vec<T>>(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Profile {
        name: String,
        age: i32,
        tags: Vec<String>,
    }

    impl HashValue for Profile {
        fn fields() -> &'static [HashField<Self>] {
            const FIELDS: &[HashField<Profile>] = &[
                HashField {
                    name: "name",
                    get: |v| field::text(&v.name),
                    set: |v, raw| {
                        v.name = field::scalar(raw)?;
                        Ok(())
                    },
                },
                HashField {
                    name: "age",
                    get: |v| field::text(&v.age),
                    set: |v, raw| {
                        v.age = field::scalar(raw)?;
                        Ok(())
                    },
                },
                HashField {
                    name: "tags",
                    get: |v| field::json_text(&v.tags),
                    set: |v, raw| {
                        v.tags = field::json_vec(raw)?;
                        Ok(())
                    },
                },
            ];
            FIELDS
        }
    }

    fn fields_reply(pairs: &[(&str, &str)]) -> Reply {
        Reply::Fields(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn scalar_round_trips() {
        let ints = ScalarCodec::<i64>::new();
        let Encoded::Text(text) = ints.encode(&42).unwrap() else {
            panic!("scalar must encode as text");
        };
        assert_eq!(text, "42");
        assert_eq!(ints.decode(Reply::Text("42".into())).unwrap(), Some(42));

        let bools = ScalarCodec::<bool>::new();
        assert_eq!(bools.encode(&true).unwrap(), Encoded::Text("true".into()));
        assert_eq!(bools.decode(Reply::Text("true".into())).unwrap(), Some(true));

        let floats = ScalarCodec::<f64>::new();
        assert_eq!(floats.decode(Reply::Text("2.5".into())).unwrap(), Some(2.5));

        let text = ScalarCodec::<String>::new();
        assert_eq!(
            text.decode(Reply::Text("plain".into())).unwrap(),
            Some("plain".to_string())
        );
    }

    #[test]
    fn scalar_missing_is_absent_and_garbage_is_an_error() {
        let ints = ScalarCodec::<i32>::new();
        assert_eq!(ints.decode(Reply::Missing).unwrap(), None);
        assert!(matches!(
            ints.decode(Reply::Text("not-a-number".into())),
            Err(CodecError::Parse { .. })
        ));
        assert!(matches!(
            ints.decode(fields_reply(&[("a", "1")])),
            Err(CodecError::UnexpectedReply("fields"))
        ));
    }

    #[test]
    fn json_object_round_trips() {
        let codec = JsonCodec::<Profile>::new();
        let profile = Profile {
            name: "a".into(),
            age: 7,
            tags: vec!["x".into(), "y".into()],
        };
        let Encoded::Text(text) = codec.encode(&profile).unwrap() else {
            panic!("json must encode as text");
        };
        assert_eq!(codec.decode(Reply::Text(text)).unwrap(), Some(profile));
    }

    #[test]
    fn json_array_round_trips_via_vec_shape() {
        let codec = JsonCodec::<Vec<i64>>::new();
        let Encoded::Text(text) = codec.encode(&vec![1, 2, 3]).unwrap() else {
            panic!("json must encode as text");
        };
        assert_eq!(text, "[1,2,3]");
        assert_eq!(codec.decode(Reply::Text(text)).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        let codec = JsonCodec::<Profile>::new();
        assert!(matches!(
            codec.decode(Reply::Text("{broken".into())),
            Err(CodecError::Json { .. })
        ));
    }

    #[test]
    fn hash_encode_produces_declared_fields() {
        let codec = HashCodec::<Profile>::new();
        let profile = Profile {
            name: "a".into(),
            age: 7,
            tags: vec!["x".into(), "y".into()],
        };
        let Encoded::Fields(fields) = codec.encode(&profile).unwrap() else {
            panic!("hash must encode as a field map");
        };
        assert_eq!(
            fields,
            vec![
                ("name".to_string(), "a".to_string()),
                ("age".to_string(), "7".to_string()),
                ("tags".to_string(), r#"["x","y"]"#.to_string()),
            ]
        );
    }

    #[test]
    fn hash_decode_maps_fields_and_nested_collections() {
        let codec = HashCodec::<Profile>::new();
        let decoded = codec
            .decode(fields_reply(&[
                ("name", "a"),
                ("age", "7"),
                ("tags", r#"["x","y"]"#),
            ]))
            .unwrap()
            .expect("populated map must decode");
        assert_eq!(decoded.name, "a");
        assert_eq!(decoded.age, 7);
        assert_eq!(decoded.tags, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn hash_empty_map_is_absent() {
        let codec = HashCodec::<Profile>::new();
        assert_eq!(codec.decode(fields_reply(&[])).unwrap(), None);
    }

    #[test]
    fn hash_unknown_fields_are_ignored() {
        let codec = HashCodec::<Profile>::new();
        let decoded = codec
            .decode(fields_reply(&[("name", "a"), ("legacy_column", "zzz")]))
            .unwrap()
            .expect("known fields must still decode");
        assert_eq!(decoded.name, "a");
        assert_eq!(decoded.age, 0);
    }

    #[test]
    fn hash_bad_field_value_is_an_error() {
        let codec = HashCodec::<Profile>::new();
        assert!(matches!(
            codec.decode(fields_reply(&[("age", "elderly")])),
            Err(CodecError::Field { .. })
        ));
    }
}
