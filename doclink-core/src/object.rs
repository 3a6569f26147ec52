//! Typed object instances.
//!
//! An [`Object`] is a shared handle: clones refer to the same instance, so a related object
//! decoded once and attached to several holders is mutated in one place. Field access is
//! checked against the class definition.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    class::{ClassRef, FieldDef, FieldKind, FieldType, IdStrategy},
    classify::{FieldClass, classify},
    error::{OdmError, OdmResult},
    keys,
    value::Value,
};

#[derive(Debug)]
struct ObjectState {
    class: ClassRef,
    values: IndexMap<String, Value>,
    ref_keys: IndexMap<String, Value>,
    persisted: bool,
}

/// A typed object: a class plus a mapping from field name to value.
#[derive(Clone)]
pub struct Object {
    inner: Arc<RwLock<ObjectState>>,
}

impl Object {
    /// Creates an empty, unsaved instance of `class`.
    pub fn new(class: &ClassRef) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ObjectState {
                class: class.clone(),
                values: IndexMap::new(),
                ref_keys: IndexMap::new(),
                persisted: false,
            })),
        }
    }

    /// Sets a field and returns the instance, for construction chains.
    pub fn with(self, field: &str, value: impl Into<Value>) -> OdmResult<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn class(&self) -> ClassRef {
        self.inner.read().class.clone()
    }

    pub fn class_name(&self) -> String {
        self.inner.read().class.name().to_string()
    }

    /// Returns `true` when both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Reads a field or a reference-key attribute such as `author_id`.
    pub fn get(&self, name: &str) -> Option<Value> {
        let state = self.inner.read();
        state
            .values
            .get(name)
            .or_else(|| state.ref_keys.get(name))
            .cloned()
    }

    /// Assigns a field, or a reference-key attribute of a local-key field.
    ///
    /// Fails with [`OdmError::UnknownField`] for undeclared names and with
    /// [`OdmError::ImmutableId`] when changing the identifier of a persisted object.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> OdmResult<()> {
        let value = value.into();
        let mut state = self.inner.write();
        let class = state.class.clone();

        if let Some(field) = class.field(name) {
            if matches!(field.kind, FieldKind::Primary(_)) && state.persisted {
                if let Some(current) = state.values.get(name) {
                    if *current != value {
                        return Err(OdmError::ImmutableId {
                            class: class.name().to_string(),
                            id: current.display(),
                        });
                    }
                }
            }
            if let Some(attr) = keys::attribute_key(field) {
                if value.is_null() {
                    state.ref_keys.shift_remove(&attr);
                }
            }
            state.values.insert(name.to_string(), value);
            return Ok(());
        }

        if class
            .fields()
            .iter()
            .any(|f| keys::attribute_key(f).as_deref() == Some(name))
        {
            state.ref_keys.insert(name.to_string(), value);
            return Ok(());
        }

        Err(OdmError::UnknownField {
            class: class.name().to_string(),
            field: name.to_string(),
        })
    }

    /// Removes a field value, leaving it unset.
    pub fn unset(&self, name: &str) {
        let mut state = self.inner.write();
        if state.values.shift_remove(name).is_none() {
            state.ref_keys.shift_remove(name);
        }
    }

    /// Returns `true` when the field holds a value, including an explicit null.
    pub fn is_set(&self, name: &str) -> bool {
        self.inner.read().values.contains_key(name)
    }

    pub fn id(&self) -> Option<Value> {
        let state = self.inner.read();
        let name = state.class.primary_field().name.clone();
        state.values.get(&name).filter(|v| !v.is_null()).cloned()
    }

    /// Display form of the identifier.
    pub fn id_string(&self) -> Option<String> {
        self.id().map(|id| id.display())
    }

    pub(crate) fn set_id(&self, id: Value) {
        let mut state = self.inner.write();
        let name = state.class.primary_field().name.clone();
        state.values.insert(name, id);
    }

    /// The related object held by a single relation field.
    pub fn related(&self, field: &str) -> Option<Object> {
        self.get(field).and_then(|v| v.as_object().cloned())
    }

    /// The related objects held by a list relation field; empty when unset.
    pub fn related_list(&self, field: &str) -> Vec<Object> {
        self.get(field).map(|v| v.objects()).unwrap_or_default()
    }

    pub fn ref_key(&self, attr: &str) -> Option<Value> {
        self.inner.read().ref_keys.get(attr).cloned()
    }

    pub(crate) fn set_ref_key(&self, attr: String, value: Value) {
        self.inner.write().ref_keys.insert(attr, value);
    }

    /// Returns `true` until the object has been written or was decoded from the store.
    pub fn is_new(&self) -> bool {
        !self.inner.read().persisted
    }

    pub(crate) fn mark_persisted(&self) {
        self.inner.write().persisted = true;
    }

    /// Snapshot of the assigned field values in assignment order.
    pub fn values(&self) -> Vec<(String, Value)> {
        self.inner
            .read()
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Checks required fields, enum membership and declared types.
    ///
    /// Embedded instances are validated recursively; related objects are validated when
    /// they are encoded themselves.
    pub fn validate(&self) -> OdmResult<()> {
        let class = self.class();

        for field in class.fields() {
            let value = self.get(&field.name).filter(|v| !v.is_null());

            match (classify(field), value) {
                (FieldClass::Identifier, None) => {
                    if !class.id_strategy().is_generated() {
                        return Err(OdmError::validation(
                            class.name(),
                            &field.name,
                            "identifier must be supplied",
                        ));
                    }
                }
                (FieldClass::Identifier, Some(value)) => {
                    let ok = match class.id_strategy() {
                        IdStrategy::Int => matches!(value, Value::Int(_)),
                        _ => matches!(value, Value::String(_)),
                    };
                    if !ok {
                        return Err(OdmError::validation(
                            class.name(),
                            &field.name,
                            format!("unexpected identifier {}", value.display()),
                        ));
                    }
                }
                (FieldClass::LocalKey, None) => {
                    let attr = keys::reference_key(&field.name);
                    if field.required && self.ref_key(&attr).is_none() {
                        return Err(OdmError::validation(class.name(), &field.name, "is required"));
                    }
                }
                (_, None) => {
                    if field.required && !classify(field).is_virtual() {
                        return Err(OdmError::validation(class.name(), &field.name, "is required"));
                    }
                }
                (_, Some(value)) => check_field(class.name(), field, &value)?,
            }
        }

        Ok(())
    }
}

fn check_field(class: &str, field: &FieldDef, value: &Value) -> OdmResult<()> {
    match &field.kind {
        FieldKind::Primary(_) => Ok(()),
        FieldKind::Embedded(ty) => check_type(class, &field.name, ty, value),
        FieldKind::LocalKey(rel) | FieldKind::ForeignKey(rel) => match value {
            Value::Object(o) if o.class_name() == rel.target => Ok(()),
            other => Err(OdmError::validation(
                class,
                &field.name,
                format!("expected {} instance, got {}", rel.target, other.display()),
            )),
        },
        FieldKind::LocalKeys(rel) | FieldKind::ForeignKeys(rel) => match value {
            Value::List(items) => {
                for item in items {
                    match item {
                        Value::Object(o) if o.class_name() == rel.target => {}
                        other => {
                            return Err(OdmError::validation(
                                class,
                                &field.name,
                                format!("expected {} instances, got {}", rel.target, other.display()),
                            ));
                        }
                    }
                }
                Ok(())
            }
            other => Err(OdmError::validation(
                class,
                &field.name,
                format!("expected a list, got {}", other.display()),
            )),
        },
    }
}

fn check_type(class: &str, field: &str, ty: &FieldType, value: &Value) -> OdmResult<()> {
    let mismatch = || {
        OdmError::validation(
            class,
            field,
            format!("{} does not match {:?}", value.display(), ty),
        )
    };

    match (ty, value) {
        (_, Value::Null) | (FieldType::Any, _) => Ok(()),
        (FieldType::Str, Value::String(_))
        | (FieldType::Int, Value::Int(_))
        | (FieldType::Float, Value::Float(_) | Value::Int(_))
        | (FieldType::Bool, Value::Bool(_))
        | (FieldType::Date | FieldType::DateTime, Value::Date(_) | Value::DateTime(_)) => Ok(()),
        (FieldType::Enum(values), Value::String(s)) => {
            if values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(OdmError::validation(
                    class,
                    field,
                    format!("{s} is not one of {}", values.join(", ")),
                ))
            }
        }
        (FieldType::List(item), Value::List(items)) => items
            .iter()
            .try_for_each(|v| check_type(class, field, item, v)),
        (FieldType::Dict(item), Value::Dict(map)) => map
            .values()
            .try_for_each(|v| check_type(class, field, item, v)),
        (FieldType::Shape(members), Value::Dict(map)) => {
            for key in map.keys() {
                if !members.iter().any(|m| &m.name == key) {
                    return Err(OdmError::validation(
                        class,
                        field,
                        format!("unknown shape member {key}"),
                    ));
                }
            }
            members.iter().try_for_each(|m| match map.get(&m.name) {
                Some(v) => check_type(class, field, &m.ty, v),
                None => Ok(()),
            })
        }
        (FieldType::Instance(target), Value::Object(o)) if o.class_name() == *target => {
            o.validate()
        }
        _ => Err(mismatch()),
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        let id_field = &state.class.primary_field().name;

        match state.values.get(id_field) {
            Some(id) if !id.is_null() => write!(f, "{}({})", state.class.name(), id.display()),
            _ => write!(f, "{}(<new>)", state.class.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassDef, FieldDef, Relation};

    fn person() -> ClassRef {
        ClassDef::builder("Person")
            .field(FieldDef::embedded("name", FieldType::Str).required())
            .field(FieldDef::embedded(
                "mood",
                FieldType::enumeration(["happy", "sad"]),
            ))
            .field(FieldDef::local_key("employer", Relation::to("Company")))
            .build()
            .unwrap()
    }

    #[test]
    fn clones_share_state() {
        let class = person();
        let a = Object::new(&class);
        let b = a.clone();

        b.set("name", "Ada").unwrap();

        assert!(a.ptr_eq(&b));
        assert_eq!(a.get("name"), Some(Value::from("Ada")));
    }

    #[test]
    fn set_rejects_unknown_fields() {
        let err = Object::new(&person()).set("age", 3).unwrap_err();
        assert!(matches!(err, OdmError::UnknownField { .. }));
    }

    #[test]
    fn reference_key_attributes_are_settable() {
        let obj = Object::new(&person());
        obj.set("employer_id", "65a000000000000000000001").unwrap();

        assert_eq!(
            obj.ref_key("employer_id"),
            Some(Value::from("65a000000000000000000001"))
        );
        assert!(obj.related("employer").is_none());
    }

    #[test]
    fn identifier_is_immutable_after_persistence() {
        let obj = Object::new(&person());
        obj.set("id", "65a000000000000000000001").unwrap();
        obj.mark_persisted();

        assert!(obj.set("id", "65a000000000000000000001").is_ok());
        assert!(matches!(
            obj.set("id", "65a000000000000000000002"),
            Err(OdmError::ImmutableId { .. })
        ));
    }

    #[test]
    fn validate_checks_required_and_enum() {
        let obj = Object::new(&person());
        assert!(matches!(obj.validate(), Err(OdmError::Validation { field, .. }) if field == "name"));

        obj.set("name", "Ada").unwrap();
        obj.set("mood", "angry").unwrap();
        assert!(matches!(obj.validate(), Err(OdmError::Validation { field, .. }) if field == "mood"));

        obj.set("mood", "happy").unwrap();
        assert!(obj.validate().is_ok());
    }
}
