//! # Mock Synthesis
//!
//! Produces structurally valid example values for Protobuf message types, used as the
//! suggested request body of a method.
//!
//! Every field is first classified into a [`FieldKind`] and then synthesized by matching on
//! it, in this order:
//!
//! 1. **Map**: a single `key -> value` entry.
//! 2. **Oneof member**: only the first declared alternative of the group is produced.
//! 3. **Message**: recursion into the message type, bounded per type name by [`MAX_TYPE_DEPTH`].
//! 4. **Enum**: a uniformly random declared value.
//! 5. **Scalar**: a value picked from the scalar rules (see [`ScalarKind`]).
//!
//! Well-known types (`google.protobuf.Timestamp`, wrappers, ...) get a value in the shape of
//! their special JSON mapping instead. `google.protobuf.Any` fields are omitted, since their
//! JSON form needs an `@type` naming a message the schema may not contain.
//!
//! Repeated fields hold a single element. Anything that cannot be synthesized is omitted
//! from the output instead of failing the whole synthesis.
use prost_reflect::{EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor};
use rand::rngs::ThreadRng;
use rand::seq::SliceRandom;
use rand::{Rng, thread_rng};
use std::collections::HashMap;

/// How many times a message type may nest inside itself before it is cut to `{}`.
pub const MAX_TYPE_DEPTH: usize = 3;

const PLACEHOLDER_WORDS: &[&str] = &[
    "amber", "harbor", "quiet", "lantern", "meadow", "silver", "orchard", "river", "copper",
    "willow", "summit", "falcon", "cedar", "morning", "canyon", "ember",
];

const PLACEHOLDER_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

const ANY_TYPE: &str = "google.protobuf.Any";

/// Occurrences of each message type along the current recursion path.
pub type DepthCounter = HashMap<String, usize>;

/// Protobuf scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarKind {
    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            ScalarKind::Double
                | ScalarKind::Float
                | ScalarKind::Bool
                | ScalarKind::String
                | ScalarKind::Bytes
        )
    }
}

/// The shape of a single field, resolved once and matched exhaustively.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Scalar(ScalarKind),
    EnumRef(EnumDescriptor),
    MessageRef(MessageDescriptor),
    MapField {
        key: Box<FieldKind>,
        value: Box<FieldKind>,
    },
}

impl FieldKind {
    fn of_kind(kind: Kind) -> Self {
        match kind {
            Kind::Double => FieldKind::Scalar(ScalarKind::Double),
            Kind::Float => FieldKind::Scalar(ScalarKind::Float),
            Kind::Int32 => FieldKind::Scalar(ScalarKind::Int32),
            Kind::Int64 => FieldKind::Scalar(ScalarKind::Int64),
            Kind::Uint32 => FieldKind::Scalar(ScalarKind::Uint32),
            Kind::Uint64 => FieldKind::Scalar(ScalarKind::Uint64),
            Kind::Sint32 => FieldKind::Scalar(ScalarKind::Sint32),
            Kind::Sint64 => FieldKind::Scalar(ScalarKind::Sint64),
            Kind::Fixed32 => FieldKind::Scalar(ScalarKind::Fixed32),
            Kind::Fixed64 => FieldKind::Scalar(ScalarKind::Fixed64),
            Kind::Sfixed32 => FieldKind::Scalar(ScalarKind::Sfixed32),
            Kind::Sfixed64 => FieldKind::Scalar(ScalarKind::Sfixed64),
            Kind::Bool => FieldKind::Scalar(ScalarKind::Bool),
            Kind::String => FieldKind::Scalar(ScalarKind::String),
            Kind::Bytes => FieldKind::Scalar(ScalarKind::Bytes),
            Kind::Enum(e) => FieldKind::EnumRef(e),
            Kind::Message(m) => FieldKind::MessageRef(m),
        }
    }
}

impl From<&FieldDescriptor> for FieldKind {
    fn from(field: &FieldDescriptor) -> Self {
        match field.kind() {
            Kind::Message(entry) if field.is_map() => FieldKind::MapField {
                key: Box::new(FieldKind::of_kind(entry.map_entry_key_field().kind())),
                value: Box::new(FieldKind::of_kind(entry.map_entry_value_field().kind())),
            },
            kind => FieldKind::of_kind(kind),
        }
    }
}

/// A synthesized value. Mirrors the shape of the message it was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum MockValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// The constant [`MockValue::BYTES_PAYLOAD`].
    Bytes,
    Enum {
        name: String,
        number: i32,
    },
    /// A one-element sequence. `length_hint` is informational and never serialized.
    List {
        items: Vec<MockValue>,
        length_hint: u32,
    },
    Map(Vec<(String, MockValue)>),
    Message(Vec<(String, MockValue)>),
}

impl MockValue {
    pub const BYTES_PAYLOAD: &'static [u8] = b"mock bytes";
    const BYTES_PAYLOAD_BASE64: &'static str = "bW9jayBieXRlcw==";

    /// Field lookup on a `Message` value.
    pub fn get(&self, field: &str) -> Option<&MockValue> {
        match self {
            MockValue::Message(fields) => fields
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Converts the value into its canonical Protobuf JSON form.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            MockValue::Bool(v) => Value::Bool(*v),
            MockValue::Int(v) => Value::from(*v),
            MockValue::Float(v) => Value::from(*v),
            MockValue::String(v) => Value::String(v.clone()),
            MockValue::Bytes => Value::String(Self::BYTES_PAYLOAD_BASE64.to_string()),
            MockValue::Enum { name, .. } => Value::String(name.clone()),
            MockValue::List { items, .. } => Value::Array(items.iter().map(Self::to_json).collect()),
            MockValue::Map(entries) | MockValue::Message(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Builds example values for message types.
///
/// The random source is pluggable so tests can seed it.
pub struct MockSynthesizer<R = ThreadRng> {
    rng: R,
}

impl MockSynthesizer<ThreadRng> {
    pub fn new() -> Self {
        Self { rng: thread_rng() }
    }
}

impl Default for MockSynthesizer<ThreadRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> MockSynthesizer<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Synthesizes an example of `message`.
    pub fn synthesize(&mut self, message: &MessageDescriptor) -> MockValue {
        self.message(message, DepthCounter::new())
    }

    /// Synthesizes an example of `message` as Protobuf JSON.
    pub fn synthesize_json(&mut self, message: &MessageDescriptor) -> serde_json::Value {
        self.synthesize(message).to_json()
    }

    fn message(&mut self, message: &MessageDescriptor, mut depth: DepthCounter) -> MockValue {
        if let Some(value) = self.well_known(message) {
            return value;
        }

        let seen = depth.entry(message.full_name().to_string()).or_insert(0);
        if *seen >= MAX_TYPE_DEPTH {
            return MockValue::Message(Vec::new());
        }
        *seen += 1;

        let mut fields = Vec::new();

        for field in message.fields() {
            if !is_first_alternative(&field) {
                continue;
            }

            if let Some(value) = self.field(&field, &depth) {
                fields.push((field.name().to_string(), value));
            }
        }

        MockValue::Message(fields)
    }

    fn field(&mut self, field: &FieldDescriptor, depth: &DepthCounter) -> Option<MockValue> {
        match FieldKind::from(field) {
            FieldKind::MapField { key, value } => {
                let key = self.map_key(&key, field.name())?;
                let value = self.single(&value, field.name(), depth)?;
                Some(MockValue::Map(vec![(key, value)]))
            }
            kind => {
                let value = self.single(&kind, field.name(), depth)?;

                if field.is_list() {
                    Some(MockValue::List {
                        items: vec![value],
                        length_hint: self.rng.gen_range(1..=1000),
                    })
                } else {
                    Some(value)
                }
            }
        }
    }

    fn single(
        &mut self,
        kind: &FieldKind,
        field_name: &str,
        depth: &DepthCounter,
    ) -> Option<MockValue> {
        match kind {
            FieldKind::MessageRef(message) if message.full_name() == ANY_TYPE => None,
            FieldKind::MessageRef(message) => Some(self.message(message, depth.clone())),
            FieldKind::EnumRef(enum_desc) => self.enum_value(enum_desc),
            FieldKind::Scalar(scalar) => Some(self.scalar(*scalar, field_name)),
            // A map value can never itself be a map.
            FieldKind::MapField { .. } => None,
        }
    }

    fn enum_value(&mut self, enum_desc: &EnumDescriptor) -> Option<MockValue> {
        let values: Vec<_> = enum_desc.values().collect();
        let value = values.choose(&mut self.rng)?;

        Some(MockValue::Enum {
            name: value.name().to_string(),
            number: value.number(),
        })
    }

    /// Well-known types have their own JSON mapping, so they get values in that shape.
    fn well_known(&mut self, message: &MessageDescriptor) -> Option<MockValue> {
        let value = match message.full_name() {
            "google.protobuf.Timestamp" => MockValue::String(PLACEHOLDER_TIMESTAMP.to_string()),
            "google.protobuf.Duration" => {
                MockValue::String(format!("{}s", self.rng.gen_range(1..=1000)))
            }
            "google.protobuf.FieldMask" => MockValue::String(String::new()),
            "google.protobuf.Value" | "google.protobuf.StringValue" => {
                MockValue::String(self.text(""))
            }
            "google.protobuf.BoolValue" => MockValue::Bool(true),
            "google.protobuf.BytesValue" => MockValue::Bytes,
            "google.protobuf.DoubleValue" | "google.protobuf.FloatValue" => {
                self.scalar(ScalarKind::Double, "")
            }
            "google.protobuf.Int32Value"
            | "google.protobuf.Int64Value"
            | "google.protobuf.UInt32Value"
            | "google.protobuf.UInt64Value" => self.scalar(ScalarKind::Int64, ""),
            "google.protobuf.ListValue" => MockValue::List {
                items: Vec::new(),
                length_hint: 0,
            },
            // A top-level Any has no field to drop.
            "google.protobuf.Struct" | "google.protobuf.Empty" | ANY_TYPE => {
                MockValue::Message(Vec::new())
            }
            _ => return None,
        };

        Some(value)
    }

    /// Scalar rules, by declared type.
    pub fn scalar(&mut self, kind: ScalarKind, field_name: &str) -> MockValue {
        match kind {
            ScalarKind::String => MockValue::String(self.text(field_name)),
            ScalarKind::Bool => MockValue::Bool(true),
            ScalarKind::Double | ScalarKind::Float => {
                // Two decimals between 1.00 and 10.99.
                let cents: i64 = self.rng.gen_range(100..=1099);
                MockValue::Float(cents as f64 / 100.0)
            }
            ScalarKind::Bytes => MockValue::Bytes,
            _ => MockValue::Int(self.rng.gen_range(1..=1000)),
        }
    }

    /// Map keys are strings in JSON; only string, integer and bool keys can be produced.
    fn map_key(&mut self, kind: &FieldKind, field_name: &str) -> Option<String> {
        match kind {
            FieldKind::Scalar(ScalarKind::String) => Some(self.text(field_name)),
            FieldKind::Scalar(ScalarKind::Bool) => Some("true".to_string()),
            FieldKind::Scalar(scalar) if scalar.is_integer() => {
                Some(self.rng.gen_range(1..=1000).to_string())
            }
            _ => None,
        }
    }

    fn text(&mut self, field_name: &str) -> String {
        let lower = field_name.to_lowercase();

        if lower.starts_with("id") || lower.ends_with("id") {
            let bytes: [u8; 16] = self.rng.r#gen();
            return uuid::Builder::from_random_bytes(bytes)
                .into_uuid()
                .to_string();
        }

        let len = self.rng.gen_range(2..=4);
        PLACEHOLDER_WORDS
            .choose_multiple(&mut self.rng, len)
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Whether `field` should be synthesized with respect to its oneof group, if any.
fn is_first_alternative(field: &FieldDescriptor) -> bool {
    match field.containing_oneof() {
        Some(oneof) if !oneof.is_synthetic() => oneof
            .fields()
            .next()
            .is_some_and(|first| first.number() == field.number()),
        _ => true,
    }
}
