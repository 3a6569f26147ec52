//! Documents to typed objects.
//!
//! A [`Decoder`] restores declared types (dates are truncated, enum values are checked),
//! copies stored local keys into reference-key attributes and leaves relation attributes
//! unset unless the document carries looked-up related documents under the relation's key.
//!
//! Within one decoder, objects are deduplicated by class and identifier: two parents that
//! embed the same related record share one instance.

use std::{collections::HashMap, sync::Arc};

use bson::{Bson, Document, spec::BinarySubtype};
use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::{
    class::{ClassDef, ClassRef, FieldDef, FieldKind, FieldType},
    classify::{FieldClass, classify},
    error::{OdmError, OdmResult},
    id,
    keys::{self, ID_KEY},
    object::Object,
    schema::Schema,
    value::Value,
};

/// Decodes a single document, `None` when there is none.
pub fn decode_root(
    schema: &Arc<Schema>,
    document: Option<&Document>,
    class: &ClassRef,
) -> OdmResult<Option<Object>> {
    document
        .map(|document| Decoder::new(schema.clone()).decode(class, document))
        .transpose()
}

/// Decodes a result set in one pass, sharing related instances across the roots.
pub fn decode_root_list(
    schema: &Arc<Schema>,
    documents: &[Document],
    class: &ClassRef,
) -> OdmResult<Vec<Object>> {
    let mut decoder = Decoder::new(schema.clone());
    documents
        .iter()
        .map(|document| decoder.decode(class, document))
        .collect()
}

/// One decode pass with its identity map.
#[derive(Debug)]
pub struct Decoder {
    schema: Arc<Schema>,
    identity: HashMap<(String, String), Object>,
}

impl Decoder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            identity: HashMap::new(),
        }
    }

    /// Decodes `document` as an instance of `class`.
    pub fn decode(&mut self, class: &ClassRef, document: &Document) -> OdmResult<Object> {
        let id = match document.get(ID_KEY) {
            Some(Bson::Null) | None => None,
            Some(bson) => Some(id::from_store(class, bson)?),
        };
        let identity_key = id
            .as_ref()
            .map(|id| (class.name().to_string(), id.display()));

        if let Some(existing) = identity_key.as_ref().and_then(|k| self.identity.get(k)).cloned() {
            self.attach_relations(&existing, class, document)?;
            return Ok(existing);
        }

        let object = Object::new(class);
        if let (Some(id), Some(key)) = (id, identity_key) {
            object.set_id(id);
            self.identity.insert(key, object.clone());
        }

        for field in class.fields() {
            match classify(field) {
                FieldClass::Identifier => {}
                FieldClass::Embedded | FieldClass::EmbeddedInstance => {
                    let FieldKind::Embedded(ty) = &field.kind else {
                        continue;
                    };
                    if let Some(bson) = document.get(class.db_key(&field.name)) {
                        let value = self.decode_value(class, &field.name, ty, bson)?;
                        object.set(&field.name, value)?;
                    }
                }
                FieldClass::LocalKey => {
                    let key = keys::db_reference_key(&field.name, class);
                    match document.get(&key) {
                        Some(Bson::Null) | None => {}
                        Some(bson) => {
                            let target = self.schema.target(class, field)?;
                            object.set_ref_key(keys::reference_key(&field.name), id::from_store(&target, bson)?);
                        }
                    }
                }
                FieldClass::LocalKeys => {
                    let key = keys::db_reference_keys_key(&field.name, class);
                    if let Some(Bson::Array(items)) = document.get(&key) {
                        let target = self.schema.target(class, field)?;
                        let ids = items
                            .iter()
                            .map(|item| id::from_store(&target, item))
                            .collect::<OdmResult<Vec<_>>>()?;
                        object.set_ref_key(keys::reference_keys_key(&field.name), Value::List(ids));
                    }
                }
                FieldClass::ForeignKey | FieldClass::ForeignKeys | FieldClass::JoinKeys => {}
            }
        }

        self.attach_relations(&object, class, document)?;
        object.mark_persisted();

        Ok(object)
    }

    /// Hands back the identity map, for callers that continue a pass elsewhere.
    pub fn into_identity(self) -> HashMap<(String, String), Object> {
        self.identity
    }

    /// Decodes looked-up related documents stored under relation keys.
    fn attach_relations(&mut self, object: &Object, class: &ClassRef, document: &Document) -> OdmResult<()> {
        for field in class.fields() {
            let kind = classify(field);
            if !kind.is_reference() {
                continue;
            }
            let Some(bson) = document.get(class.db_key(&field.name)) else {
                continue;
            };
            let target = self.schema.target(class, field)?;

            let value = match (kind.is_many(), bson) {
                (_, Bson::Null) => Value::Null,
                (false, Bson::Document(related)) => Value::Object(self.decode(&target, related)?),
                (false, Bson::Array(items)) => match items.iter().find_map(Bson::as_document) {
                    Some(related) => Value::Object(self.decode(&target, related)?),
                    None => Value::Null,
                },
                (true, Bson::Array(items)) => {
                    let mut related = items
                        .iter()
                        .filter_map(Bson::as_document)
                        .map(|d| self.decode(&target, d))
                        .collect::<OdmResult<Vec<_>>>()?;
                    if kind == FieldClass::LocalKeys {
                        reorder(object, field, &mut related);
                    }
                    Value::from(related)
                }
                (true, Bson::Document(related)) => Value::from(vec![self.decode(&target, related)?]),
                (_, other) => {
                    return Err(OdmError::decode(
                        class.name(),
                        &field.name,
                        format!("expected related documents, got {other}"),
                    ));
                }
            };

            if value.is_null() && kind == FieldClass::LocalKey {
                continue;
            }
            object.set(&field.name, value)?;
        }

        Ok(())
    }

    fn decode_value(
        &mut self,
        class: &ClassDef,
        field: &str,
        ty: &FieldType,
        bson: &Bson,
    ) -> OdmResult<Value> {
        let mismatch = || OdmError::decode(class.name(), field, format!("{bson} does not match {ty:?}"));

        let value = match (ty, bson) {
            (_, Bson::Null) => Value::Null,
            (FieldType::Any, bson) => any_value(bson),
            (FieldType::Str, Bson::String(s)) => Value::String(s.clone()),
            (FieldType::Enum(values), Bson::String(s)) => {
                if !values.iter().any(|v| v == s) {
                    return Err(OdmError::decode(
                        class.name(),
                        field,
                        format!("{s} is not one of {}", values.join(", ")),
                    ));
                }
                Value::String(s.clone())
            }
            (FieldType::Int, Bson::Int32(i)) => Value::Int(*i as i64),
            (FieldType::Int, Bson::Int64(i)) => Value::Int(*i),
            (FieldType::Int, Bson::Double(f)) if f.fract() == 0.0 => Value::Int(*f as i64),
            (FieldType::Float, Bson::Double(f)) => Value::Float(*f),
            (FieldType::Float, Bson::Int32(i)) => Value::Float(*i as f64),
            (FieldType::Float, Bson::Int64(i)) => Value::Float(*i as f64),
            (FieldType::Bool, Bson::Boolean(b)) => Value::Bool(*b),
            (FieldType::Date, Bson::DateTime(dt)) => Value::Date(dt.to_chrono().date_naive()),
            (FieldType::Date, Bson::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| mismatch())?,
            (FieldType::DateTime, Bson::DateTime(dt)) => Value::DateTime(dt.to_chrono()),
            (FieldType::List(item), Bson::Array(items)) => Value::List(
                items
                    .iter()
                    .map(|b| self.decode_value(class, field, item, b))
                    .collect::<OdmResult<Vec<_>>>()?,
            ),
            (FieldType::Dict(item), Bson::Document(document)) => {
                let mut map = IndexMap::new();
                for (key, b) in document {
                    map.insert(key.to_string(), self.decode_value(class, field, item, b)?);
                }
                Value::Dict(map)
            }
            (FieldType::Shape(members), Bson::Document(document)) => {
                let mut map = IndexMap::new();
                for member in members {
                    if let Some(b) = document.get(&member.name) {
                        map.insert(member.name.clone(), self.decode_value(class, field, &member.ty, b)?);
                    }
                }
                Value::Dict(map)
            }
            (FieldType::Instance(name), Bson::Document(document)) => {
                let nested = self.schema.class(name)?;
                Value::Object(self.decode(&nested, document)?)
            }
            _ => return Err(mismatch()),
        };

        Ok(value)
    }
}

/// Orders related objects by the identifier list stored on the holder.
fn reorder(object: &Object, field: &FieldDef, related: &mut [Object]) {
    let Some(Value::List(ids)) = object.ref_key(&keys::reference_keys_key(&field.name)) else {
        return;
    };
    related.sort_by_key(|o| {
        o.id()
            .and_then(|id| ids.iter().position(|i| *i == id))
            .unwrap_or(usize::MAX)
    });
}

/// Untyped conversion for [`FieldType::Any`] values.
fn any_value(bson: &Bson) -> Value {
    match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Int(*i as i64),
        Bson::Int64(i) => Value::Int(*i),
        Bson::Double(f) => Value::Float(*f),
        Bson::String(s) => Value::String(s.clone()),
        Bson::DateTime(dt) => Value::DateTime(dt.to_chrono()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Binary(bin) if bin.subtype == BinarySubtype::Uuid => <[u8; 16]>::try_from(bin.bytes.as_slice())
            .map(|bytes| Value::String(bson::Uuid::from_bytes(bytes).to_string()))
            .unwrap_or(Value::Null),
        Bson::Array(items) => Value::List(items.iter().map(any_value).collect()),
        Bson::Document(document) => Value::Dict(
            document
                .iter()
                .map(|(k, v)| (k.to_string(), any_value(v)))
                .collect(),
        ),
        other => Value::String(other.to_string()),
    }
}
