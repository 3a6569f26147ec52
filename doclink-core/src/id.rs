//! Conversions between display identifiers and store-native identifiers.

use bson::{Bson, oid::ObjectId, spec::BinarySubtype};

use crate::{
    class::{ClassDef, IdStrategy},
    error::{OdmError, OdmResult},
    value::Value,
};

/// Generates a fresh display identifier for generated strategies.
pub fn generate(strategy: IdStrategy) -> Option<Value> {
    match strategy {
        IdStrategy::ObjectId => Some(Value::String(ObjectId::new().to_hex())),
        IdStrategy::Uuid => Some(Value::String(bson::Uuid::new().to_string())),
        IdStrategy::String | IdStrategy::Int => None,
    }
}

/// Converts a display identifier into the class's store-native identifier.
pub fn to_store(class: &ClassDef, value: &Value) -> OdmResult<Bson> {
    let invalid = || OdmError::InvalidId {
        class: class.name().to_string(),
        value: value.display(),
    };

    match (class.id_strategy(), value) {
        (IdStrategy::ObjectId, Value::String(hex)) => ObjectId::parse_str(hex)
            .map(Bson::ObjectId)
            .map_err(|_| invalid()),
        (IdStrategy::Uuid, Value::String(s)) => bson::Uuid::parse_str(s)
            .map(Bson::from)
            .map_err(|_| invalid()),
        (IdStrategy::String, Value::String(s)) => Ok(Bson::String(s.clone())),
        (IdStrategy::Int, Value::Int(i)) => Ok(Bson::Int64(*i)),
        (IdStrategy::Int, Value::String(s)) => s
            .parse::<i64>()
            .map(Bson::Int64)
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Converts a store-native identifier into its display form.
pub fn from_store(class: &ClassDef, bson: &Bson) -> OdmResult<Value> {
    match bson {
        Bson::ObjectId(oid) => Ok(Value::String(oid.to_hex())),
        Bson::String(s) => Ok(Value::String(s.clone())),
        Bson::Int32(i) => Ok(Value::Int(*i as i64)),
        Bson::Int64(i) => Ok(Value::Int(*i)),
        Bson::Binary(bin) if bin.subtype == BinarySubtype::Uuid => {
            <[u8; 16]>::try_from(bin.bytes.as_slice())
                .map(|bytes| Value::String(bson::Uuid::from_bytes(bytes).to_string()))
                .map_err(|_| OdmError::decode(class.name(), "_id", "malformed uuid"))
        }
        other => Err(OdmError::decode(
            class.name(),
            "_id",
            format!("unsupported identifier {other}"),
        )),
    }
}
