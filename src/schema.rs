//! Payload schemas.
//!
//! A [`SchemaInfo`] describes how payloads on a topic are encoded; it is
//! validated when a reader or consumer is created. [`Schema`]
//! implementations turn payload bytes into typed values. Built-in codecs
//! cover raw bytes, UTF-8 strings, big-endian fixed-width numbers and JSON.
//! Avro and Protobuf definitions are validated here but their codecs are
//! supplied by the application as further [`Schema`] implementations.

use std::{collections::HashMap, fmt, marker::PhantomData};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Encoding families understood by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaType {
    Bytes,
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Json,
    Avro,
    Protobuf,
    /// Protobuf described by its message descriptor, without a definition
    /// string.
    ProtobufNative,
}

impl SchemaType {
    /// Whether the encoding is described by a record definition string.
    #[must_use]
    pub const fn requires_definition(self) -> bool {
        matches!(self, Self::Json | Self::Avro | Self::Protobuf)
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bytes => "BYTES",
            Self::String => "STRING",
            Self::Int8 => "INT8",
            Self::Int16 => "INT16",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Json => "JSON",
            Self::Avro => "AVRO",
            Self::Protobuf => "PROTOBUF",
            Self::ProtobufNative => "PROTOBUF_NATIVE",
        };
        f.write_str(name)
    }
}

/// Errors raised while validating schemas or decoding payloads.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema definition is missing or malformed.
    #[error("invalid {schema_type} schema definition: {reason}")]
    InvalidDefinition {
        schema_type: SchemaType,
        reason: String,
    },
    /// A payload does not match the schema.
    #[error("failed to decode {schema_type} payload: {reason}")]
    Decode {
        schema_type: SchemaType,
        reason: String,
    },
    /// A value could not be encoded.
    #[error("failed to encode {schema_type} value: {reason}")]
    Encode {
        schema_type: SchemaType,
        reason: String,
    },
}

/// Description of a topic's payload encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaInfo {
    /// Schema name.
    pub name: String,
    /// Encoding family.
    pub schema_type: SchemaType,
    /// Record definition for JSON, Avro and Protobuf.
    pub definition: String,
    /// Free-form properties; ordering carries no meaning.
    pub properties: HashMap<String, String>,
}

impl SchemaInfo {
    /// Schema of `schema_type` with no definition or properties.
    #[must_use]
    pub fn new(schema_type: SchemaType) -> Self {
        Self {
            name: schema_type.to_string(),
            schema_type,
            definition: String::new(),
            properties: HashMap::new(),
        }
    }

    /// Attach a record definition.
    #[must_use]
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into();
        self
    }

    /// Attach properties.
    #[must_use]
    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Check that the definition suits the encoding.
    ///
    /// JSON, Avro and Protobuf need a JSON object definition carrying a
    /// `type` field; every other encoding takes no definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDefinition`] describing the problem.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let schema_type = self.schema_type;
        let invalid = |reason: String| SchemaError::InvalidDefinition {
            schema_type,
            reason,
        };

        if !schema_type.requires_definition() {
            if self.definition.trim().is_empty() {
                return Ok(());
            }
            return Err(invalid("encoding does not take a definition".to_owned()));
        }

        if self.definition.trim().is_empty() {
            return Err(invalid("definition is required".to_owned()));
        }
        let parsed: serde_json::Value =
            serde_json::from_str(&self.definition).map_err(|err| invalid(err.to_string()))?;
        match parsed.get("type") {
            Some(serde_json::Value::String(_)) => Ok(()),
            _ => Err(invalid("definition must be an object with a \"type\"".to_owned())),
        }
    }
}

/// Typed codec for payloads.
pub trait Schema: Send + Sync {
    /// Decoded value type.
    type Value;

    /// Description of the encoding.
    fn info(&self) -> &SchemaInfo;

    /// Encode a value into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Encode`] when the value cannot be encoded.
    fn encode(&self, value: &Self::Value) -> Result<Bytes, SchemaError>;

    /// Decode payload bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Decode`] when the payload does not match.
    fn decode(&self, payload: &[u8]) -> Result<Self::Value, SchemaError>;
}

/// Raw payload bytes.
#[derive(Clone, Debug)]
pub struct BytesSchema {
    info: SchemaInfo,
}

impl BytesSchema {
    /// Create the schema with optional properties.
    #[must_use]
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self {
            info: SchemaInfo::new(SchemaType::Bytes).with_properties(properties),
        }
    }
}

impl Schema for BytesSchema {
    type Value = Bytes;

    fn info(&self) -> &SchemaInfo { &self.info }

    fn encode(&self, value: &Bytes) -> Result<Bytes, SchemaError> { Ok(value.clone()) }

    fn decode(&self, payload: &[u8]) -> Result<Bytes, SchemaError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

/// UTF-8 text.
#[derive(Clone, Debug)]
pub struct StringSchema {
    info: SchemaInfo,
}

impl StringSchema {
    /// Create the schema with optional properties.
    #[must_use]
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self {
            info: SchemaInfo::new(SchemaType::String).with_properties(properties),
        }
    }
}

impl Schema for StringSchema {
    type Value = String;

    fn info(&self) -> &SchemaInfo { &self.info }

    fn encode(&self, value: &String) -> Result<Bytes, SchemaError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, payload: &[u8]) -> Result<String, SchemaError> {
        String::from_utf8(payload.to_vec()).map_err(|err| SchemaError::Decode {
            schema_type: SchemaType::String,
            reason: err.to_string(),
        })
    }
}

macro_rules! fixed_width_schema {
    ($(#[$doc:meta])* $name:ident, $value:ty, $schema_type:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug)]
        pub struct $name {
            info: SchemaInfo,
        }

        impl $name {
            /// Create the schema with optional properties.
            #[must_use]
            pub fn new(properties: HashMap<String, String>) -> Self {
                Self {
                    info: SchemaInfo::new($schema_type).with_properties(properties),
                }
            }
        }

        impl Schema for $name {
            type Value = $value;

            fn info(&self) -> &SchemaInfo { &self.info }

            fn encode(&self, value: &$value) -> Result<Bytes, SchemaError> {
                Ok(Bytes::copy_from_slice(&value.to_be_bytes()))
            }

            fn decode(&self, payload: &[u8]) -> Result<$value, SchemaError> {
                let bytes: [u8; std::mem::size_of::<$value>()] =
                    payload.try_into().map_err(|_| SchemaError::Decode {
                    schema_type: $schema_type,
                    reason: format!(
                        "expected {} bytes, found {}",
                        std::mem::size_of::<$value>(),
                        payload.len()
                    ),
                })?;
                Ok(<$value>::from_be_bytes(bytes))
            }
        }
    };
}

fixed_width_schema!(
    /// Big-endian `i8`.
    Int8Schema, i8, SchemaType::Int8
);
fixed_width_schema!(
    /// Big-endian `i16`.
    Int16Schema, i16, SchemaType::Int16
);
fixed_width_schema!(
    /// Big-endian `i32`.
    Int32Schema, i32, SchemaType::Int32
);
fixed_width_schema!(
    /// Big-endian `i64`.
    Int64Schema, i64, SchemaType::Int64
);
fixed_width_schema!(
    /// Big-endian IEEE 754 `f32`.
    FloatSchema, f32, SchemaType::Float
);
fixed_width_schema!(
    /// Big-endian IEEE 754 `f64`.
    DoubleSchema, f64, SchemaType::Double
);

/// JSON records mapped onto a `serde` type.
pub struct JsonSchema<T> {
    info: SchemaInfo,
    _value: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    /// Create a JSON schema from a record definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDefinition`] when the definition is
    /// not a JSON object with a `type` field.
    pub fn new(
        definition: impl Into<String>,
        properties: HashMap<String, String>,
    ) -> Result<Self, SchemaError> {
        let info = SchemaInfo::new(SchemaType::Json)
            .with_definition(definition)
            .with_properties(properties);
        info.validate()?;
        Ok(Self {
            info,
            _value: PhantomData,
        })
    }
}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema").field("info", &self.info).finish()
    }
}

impl<T> Schema for JsonSchema<T>
where
    T: Serialize + DeserializeOwned,
{
    type Value = T;

    fn info(&self) -> &SchemaInfo { &self.info }

    fn encode(&self, value: &T) -> Result<Bytes, SchemaError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| SchemaError::Encode {
                schema_type: SchemaType::Json,
                reason: err.to_string(),
            })
    }

    fn decode(&self, payload: &[u8]) -> Result<T, SchemaError> {
        serde_json::from_slice(payload).map_err(|err| SchemaError::Decode {
            schema_type: SchemaType::Json,
            reason: err.to_string(),
        })
    }
}
