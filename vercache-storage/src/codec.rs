//! Envelope codec and caller destinations.
//!
//! Values cross the store boundary as [`Payload`]s. Reads decode into a
//! caller-supplied [`Destination`] whose shape is declared explicitly, so the
//! store can reject a mismatched destination before touching the engine.

use std::any::type_name;
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use vercache_core::{CodecError, DestinationShape, Envelope, Payload};

/// Serialize a value into a payload.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Payload, CodecError> {
    serde_json::to_value(value)
        .map(Payload::from_value)
        .map_err(|e| CodecError::Serialize(e.to_string()))
}

/// Deserialize a payload into `T`.
pub fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T, CodecError> {
    T::deserialize(payload.as_value()).map_err(|e| CodecError::Deserialize {
        target: type_name::<T>(),
        reason: e.to_string(),
    })
}

/// A writable destination for decoded envelopes.
///
/// Implementations must leave themselves untouched when `fill` fails.
pub trait Destination: Send {
    /// Declared shape of this destination.
    fn shape(&self) -> DestinationShape;

    /// Name of the destination type, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Decode every envelope, then store all of them.
    fn fill(&mut self, envelopes: &[Envelope]) -> Result<(), CodecError>;
}

/// Destination holding exactly one value.
///
/// When filled from several envelopes the last one wins.
pub struct Single<'a, T> {
    slot: &'a mut T,
}

impl<'a, T> Single<'a, T> {
    pub fn new(slot: &'a mut T) -> Self {
        Self { slot }
    }
}

impl<T: DeserializeOwned + Send> Destination for Single<'_, T> {
    fn shape(&self) -> DestinationShape {
        DestinationShape::Single
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn fill(&mut self, envelopes: &[Envelope]) -> Result<(), CodecError> {
        if let Some(envelope) = envelopes.last() {
            *self.slot = decode(&envelope.data)?;
        }
        Ok(())
    }
}

/// Destination keyed by envelope id.
pub struct Keyed<'a, T> {
    map: &'a mut HashMap<String, T>,
}

impl<'a, T> Keyed<'a, T> {
    pub fn new(map: &'a mut HashMap<String, T>) -> Self {
        Self { map }
    }
}

impl<T: DeserializeOwned + Send> Destination for Keyed<'_, T> {
    fn shape(&self) -> DestinationShape {
        DestinationShape::Keyed
    }

    fn type_name(&self) -> &'static str {
        type_name::<HashMap<String, T>>()
    }

    fn fill(&mut self, envelopes: &[Envelope]) -> Result<(), CodecError> {
        let staged = envelopes
            .iter()
            .map(|envelope| Ok((envelope.id.clone(), decode(&envelope.data)?)))
            .collect::<Result<Vec<(String, T)>, CodecError>>()?;
        self.map.extend(staged);
        Ok(())
    }
}

/// Destination appending to a sequence, in engine order.
pub struct Sequence<'a, T> {
    items: &'a mut Vec<T>,
}

impl<'a, T> Sequence<'a, T> {
    pub fn new(items: &'a mut Vec<T>) -> Self {
        Self { items }
    }
}

impl<T: DeserializeOwned + Send> Destination for Sequence<'_, T> {
    fn shape(&self) -> DestinationShape {
        DestinationShape::Sequence
    }

    fn type_name(&self) -> &'static str {
        type_name::<Vec<T>>()
    }

    fn fill(&mut self, envelopes: &[Envelope]) -> Result<(), CodecError> {
        let staged = envelopes
            .iter()
            .map(|envelope| decode(&envelope.data))
            .collect::<Result<Vec<T>, CodecError>>()?;
        self.items.extend(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Item {
        name: String,
        price: f32,
    }

    fn envelope(id: &str, value: serde_json::Value) -> Envelope {
        Envelope::new(id, "1", Payload::from_value(value))
    }

    #[test]
    fn test_encode_then_decode() {
        let item = Item {
            name: "Item1".to_string(),
            price: 10.5,
        };
        let payload = encode(&item).unwrap();
        assert_eq!(payload.as_value()["name"], "Item1");
        assert_eq!(decode::<Item>(&payload).unwrap(), item);
    }

    #[test]
    fn test_encode_rejects_non_string_map_keys() {
        let mut map = BTreeMap::new();
        map.insert((1, 2), "pair");
        assert!(matches!(encode(&map), Err(CodecError::Serialize(_))));
    }

    #[test]
    fn test_decode_reports_target_type() {
        let err = decode::<Item>(&Payload::from_value(json!(42))).unwrap_err();
        match err {
            CodecError::Deserialize { target, .. } => assert!(target.ends_with("Item")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_single_fill_overwrites() {
        let mut item = Item::default();
        let mut dest = Single::new(&mut item);
        assert_eq!(dest.shape(), DestinationShape::Single);
        dest.fill(&[envelope("1", json!({"name": "a", "price": 1.0}))])
            .unwrap();
        assert_eq!(item.name, "a");
    }

    #[test]
    fn test_keyed_fill_is_all_or_nothing() {
        let mut map: HashMap<String, Item> = HashMap::new();
        let mut dest = Keyed::new(&mut map);
        let result = dest.fill(&[
            envelope("1", json!({"name": "a", "price": 1.0})),
            envelope("2", json!("not an item")),
        ]);
        assert!(result.is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn test_keyed_fill_keys_by_envelope_id() {
        let mut map: HashMap<String, Item> = HashMap::new();
        Keyed::new(&mut map)
            .fill(&[
                envelope("1", json!({"name": "a", "price": 1.0})),
                envelope("2", json!({"name": "b", "price": 2.0})),
            ])
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["2"].name, "b");
    }

    #[test]
    fn test_sequence_fill_appends_in_order() {
        let mut items: Vec<u32> = vec![0];
        Sequence::new(&mut items)
            .fill(&[envelope("a", json!(1)), envelope("a", json!(2))])
            .unwrap();
        assert_eq!(items, vec![0, 1, 2]);
    }
}
