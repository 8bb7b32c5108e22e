use crate::schema_registry::SchemaId;
use crate::{Error, Result};
use apache_avro::types::Value as AvroValue;
use apache_avro::Schema;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

/// Leading byte of every schema-framed record.
pub const MAGIC_BYTE: u8 = 0;

const HEADER_LEN: usize = 5;

/// Prefixes `payload` with the magic byte and schema id.
pub fn frame(schema_id: SchemaId, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_u32(schema_id.0);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Splits a framed record into its schema id and payload.
pub fn unframe(data: &[u8]) -> Result<(SchemaId, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(Error::InvalidMessage {
            message: format!("framed record too short: {} bytes", data.len()),
        });
    }

    let mut cursor = data;
    let magic = cursor.get_u8();
    if magic != MAGIC_BYTE {
        return Err(Error::InvalidMessage {
            message: format!("unknown magic byte {:#04x}", magic),
        });
    }
    let schema_id = SchemaId(cursor.get_u32());

    Ok((schema_id, cursor))
}

/// Encodes values against one registered Avro schema.
#[derive(Debug, Clone)]
pub struct AvroEncoder {
    schema: Schema,
    schema_id: SchemaId,
}

impl AvroEncoder {
    pub fn new(schema: Schema, schema_id: SchemaId) -> Self {
        Self { schema, schema_id }
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    /// Rejects values that would only fit the schema by narrowing a
    /// `long` into an `int`; resolution alone wraps them silently.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let original = apache_avro::to_value(value)?;
        let resolved = original.clone().resolve(&self.schema)?;
        check_narrowing(&original, &resolved, "$")?;
        let datum = apache_avro::to_avro_datum(&self.schema, resolved)?;
        Ok(frame(self.schema_id, &datum))
    }

    pub fn decode(&self, data: &[u8]) -> Result<AvroValue> {
        let (schema_id, mut payload) = unframe(data)?;
        if schema_id != self.schema_id {
            return Err(Error::InvalidMessage {
                message: format!(
                    "record written with schema {} but decoder expects {}",
                    schema_id, self.schema_id
                ),
            });
        }
        Ok(apache_avro::from_avro_datum(&self.schema, &mut payload, None)?)
    }
}

/// Walks a value alongside its resolved form and fails where an `int`-backed
/// field came from a `long` that does not fit.
fn check_narrowing(original: &AvroValue, resolved: &AvroValue, path: &str) -> Result<()> {
    let original = match original {
        AvroValue::Union(_, inner) => inner.as_ref(),
        _ => original,
    };

    match (original, resolved) {
        (AvroValue::Long(wide), AvroValue::Int(narrow))
        | (AvroValue::Long(wide), AvroValue::Date(narrow))
        | (AvroValue::Long(wide), AvroValue::TimeMillis(narrow)) => {
            if *wide != i64::from(*narrow) {
                return Err(Error::InvalidMessage {
                    message: format!("{} = {} does not fit in an Avro int", path, wide),
                });
            }
            Ok(())
        }
        (_, AvroValue::Union(_, inner)) => check_narrowing(original, inner, path),
        (AvroValue::Record(fields), AvroValue::Record(resolved_fields)) => {
            for (name, resolved_field) in resolved_fields {
                if let Some((_, field)) = fields.iter().find(|(n, _)| n == name) {
                    check_narrowing(field, resolved_field, &format!("{}.{}", path, name))?;
                }
            }
            Ok(())
        }
        (AvroValue::Map(fields), AvroValue::Record(resolved_fields)) => {
            for (name, resolved_field) in resolved_fields {
                if let Some(field) = fields.get(name) {
                    check_narrowing(field, resolved_field, &format!("{}.{}", path, name))?;
                }
            }
            Ok(())
        }
        (AvroValue::Map(entries), AvroValue::Map(resolved_entries)) => {
            for (key, resolved_entry) in resolved_entries {
                if let Some(entry) = entries.get(key) {
                    check_narrowing(entry, resolved_entry, &format!("{}[{:?}]", path, key))?;
                }
            }
            Ok(())
        }
        (AvroValue::Array(items), AvroValue::Array(resolved_items)) => {
            for (i, (item, resolved_item)) in items.iter().zip(resolved_items).enumerate() {
                check_narrowing(item, resolved_item, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone)]
enum ValueEncoding {
    Avro(AvroEncoder),
    Unstructured,
}

/// Key and value encoders for one stream.
///
/// Keys are always Avro-encoded. Values are Avro-encoded only when the
/// stream declared a value schema; otherwise they are written as plain JSON
/// with no schema framing.
#[derive(Debug, Clone)]
pub struct SerializationContext {
    key: AvroEncoder,
    value: ValueEncoding,
}

impl SerializationContext {
    pub fn new(key: AvroEncoder, value: Option<AvroEncoder>) -> Self {
        let value = match value {
            Some(encoder) => ValueEncoding::Avro(encoder),
            None => ValueEncoding::Unstructured,
        };
        Self { key, value }
    }

    pub fn has_value_schema(&self) -> bool {
        matches!(self.value, ValueEncoding::Avro(_))
    }

    pub fn key_schema_id(&self) -> SchemaId {
        self.key.schema_id()
    }

    pub fn value_schema_id(&self) -> Option<SchemaId> {
        match &self.value {
            ValueEncoding::Avro(encoder) => Some(encoder.schema_id()),
            ValueEncoding::Unstructured => None,
        }
    }

    pub fn encode_key<K: Serialize + ?Sized>(&self, key: &K) -> Result<Vec<u8>> {
        self.key.encode(key)
    }

    pub fn encode_value<V: Serialize + ?Sized>(&self, value: &V) -> Result<Vec<u8>> {
        match &self.value {
            ValueEncoding::Avro(encoder) => encoder.encode(value),
            ValueEncoding::Unstructured => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode_key(&self, data: &[u8]) -> Result<AvroValue> {
        self.key.decode(data)
    }
}
