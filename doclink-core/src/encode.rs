//! Object graph to write commands.
//!
//! [`encode_root`] walks an object graph depth-first and returns one [`WriteCommand`] per
//! touched document, dependencies first: a referenced object's command precedes the command
//! of every object whose local key holds its identifier. Instances are memoized by address,
//! so cyclic graphs terminate and every object is encoded once.
//!
//! Foreign-key relations write nothing on the holder. Each related object is encoded with
//! the holder as its owner and writes the back-reference itself. When a back-reference
//! targets an object already on the stack, it is applied once that object's document is
//! final.

use std::collections::{HashMap, HashSet};

use bson::{Bson, Document, doc};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::{
    class::{ClassDef, ClassRef, FieldDef, FieldKind, FieldType},
    classify::{FieldClass, classify},
    command::{CommandTarget, WriteCommand},
    error::{OdmError, OdmResult},
    id,
    keys::{self, ID_KEY},
    object::Object,
    query::Filter,
    schema::Schema,
    value::Value,
};

/// Encodes `object` and everything reachable from it.
///
/// The root is validated before anything is encoded; related objects are validated as
/// they are reached.
pub fn encode_root(schema: &Schema, object: &Object) -> OdmResult<Vec<WriteCommand>> {
    let mut encoder = Encoder::new(schema);
    encoder.encode(object)?;
    Ok(encoder.finish())
}

/// A back-reference to write on an object encoded on behalf of its owner.
#[derive(Debug, Clone)]
struct Link {
    owner_id: Bson,
    owner_display: Value,
    field: String,
}

pub struct Encoder<'s> {
    schema: &'s Schema,
    visited: HashMap<usize, Bson>,
    emitted: HashMap<usize, usize>,
    pending: HashMap<usize, Vec<Link>>,
    join_rows: HashSet<(String, Vec<(String, String)>)>,
    commands: Vec<WriteCommand>,
}

impl<'s> Encoder<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            visited: HashMap::new(),
            emitted: HashMap::new(),
            pending: HashMap::new(),
            join_rows: HashSet::new(),
            commands: Vec::new(),
        }
    }

    /// Returns the commands in dependency order.
    pub fn finish(self) -> Vec<WriteCommand> {
        self.commands
    }

    /// Encodes one object and its reachable graph, returning the object's store-native identifier.
    pub fn encode(&mut self, object: &Object) -> OdmResult<Bson> {
        self.visit(object, None)
    }

    fn visit(&mut self, object: &Object, link: Option<Link>) -> OdmResult<Bson> {
        let addr = object.addr();
        if let Some(id) = self.visited.get(&addr).cloned() {
            if let Some(link) = link {
                self.link_late(addr, object, link)?;
            }
            return Ok(id);
        }

        let class = object.class();
        if class.is_embedded() {
            return Err(OdmError::InvalidSchema(format!(
                "{} is an embedded class and has no collection of its own",
                class.name()
            )));
        }

        if let Some(link) = &link {
            link_object(object, &class, link)?;
        }
        object.validate()?;

        let id = self.assign_id(object, &class)?;
        self.visited.insert(addr, id.clone());

        let mut document = doc! { ID_KEY: id.clone() };
        self.encode_fields(object, &class, &id, &mut document)?;

        let mut links = link.into_iter().collect::<Vec<_>>();
        links.extend(self.pending.remove(&addr).unwrap_or_default());
        for link in &links {
            link_document(&class, &mut document, link)?;
        }

        self.emitted.insert(addr, self.commands.len());
        self.commands.push(WriteCommand {
            target: CommandTarget::Class(class.clone()),
            filter: Filter::eq(ID_KEY, id.clone()),
            document,
            object: Some(object.clone()),
        });

        Ok(id)
    }

    fn assign_id(&self, object: &Object, class: &ClassDef) -> OdmResult<Bson> {
        let value = match object.id() {
            Some(value) => value,
            None => {
                let value = id::generate(class.id_strategy()).ok_or_else(|| {
                    OdmError::validation(
                        class.name(),
                        &class.primary_field().name,
                        "identifier must be supplied",
                    )
                })?;
                object.set_id(value.clone());
                value
            }
        };

        id::to_store(class, &value)
    }

    /// Records a back-reference on an object that is already being encoded or done.
    fn link_late(&mut self, addr: usize, object: &Object, link: Link) -> OdmResult<()> {
        let class = object.class();
        link_object(object, &class, &link)?;

        match self.emitted.get(&addr) {
            Some(index) => link_document(&class, &mut self.commands[*index].document, &link),
            None => {
                self.pending.entry(addr).or_default().push(link);
                Ok(())
            }
        }
    }

    fn encode_fields(
        &mut self,
        object: &Object,
        class: &ClassRef,
        id: &Bson,
        document: &mut Document,
    ) -> OdmResult<()> {
        for field in class.fields() {
            match classify(field) {
                FieldClass::Identifier => {}
                FieldClass::Embedded | FieldClass::EmbeddedInstance => {
                    let FieldKind::Embedded(ty) = &field.kind else {
                        continue;
                    };
                    if let Some(value) = object.get(&field.name) {
                        let bson = self.encode_value(class.name(), &field.name, ty, &value)?;
                        document.insert(class.db_key(&field.name), bson);
                    }
                }
                FieldClass::LocalKey => self.encode_local_key(object, class, field, document)?,
                FieldClass::LocalKeys => self.encode_local_keys(object, class, field, document)?,
                FieldClass::ForeignKey | FieldClass::ForeignKeys => {
                    let Some(foreign_key) = field.relation().and_then(|r| r.foreign_key.clone()) else {
                        continue;
                    };
                    let link = Link {
                        owner_id: id.clone(),
                        owner_display: object.id().unwrap_or(Value::Null),
                        field: foreign_key,
                    };
                    for related in related_objects(object, field) {
                        self.visit(&related, Some(link.clone()))?;
                    }
                }
                FieldClass::JoinKeys => {
                    let related = related_objects(object, field);
                    if related.is_empty() {
                        continue;
                    }
                    let join = self.schema.join_spec(class, field)?;
                    for other in related {
                        let other_id = self.visit(&other, None)?;
                        self.join_row(&join.collection, (&join.local_column, id), (&join.target_column, &other_id));
                    }
                }
            }
        }

        Ok(())
    }

    fn encode_local_key(
        &mut self,
        object: &Object,
        class: &ClassDef,
        field: &FieldDef,
        document: &mut Document,
    ) -> OdmResult<()> {
        let key = keys::db_reference_key(&field.name, class);
        let attr = keys::reference_key(&field.name);

        match object.get(&field.name) {
            Some(Value::Object(related)) => {
                let related_id = self.visit(&related, None)?;
                object.set_ref_key(attr, related.id().unwrap_or(Value::Null));
                document.insert(key, related_id);
            }
            Some(Value::Null) => {
                document.insert(key, Bson::Null);
            }
            Some(other) => {
                return Err(OdmError::validation(
                    class.name(),
                    &field.name,
                    format!("expected a related object, got {}", other.display()),
                ));
            }
            None => {
                if let Some(value) = object.ref_key(&attr).filter(|v| !v.is_null()) {
                    let target = self.schema.target(class, field)?;
                    document.insert(key, id::to_store(&target, &value)?);
                }
            }
        }

        Ok(())
    }

    fn encode_local_keys(
        &mut self,
        object: &Object,
        class: &ClassDef,
        field: &FieldDef,
        document: &mut Document,
    ) -> OdmResult<()> {
        let key = keys::db_reference_keys_key(&field.name, class);
        let attr = keys::reference_keys_key(&field.name);

        match object.get(&field.name) {
            Some(Value::Null) => {
                document.insert(key, Bson::Array(Vec::new()));
            }
            Some(value) => {
                let mut ids = Vec::new();
                let mut displays = Vec::new();
                for related in value.objects() {
                    ids.push(self.visit(&related, None)?);
                    displays.push(related.id().unwrap_or(Value::Null));
                }
                object.set_ref_key(attr, Value::List(displays));
                document.insert(key, Bson::Array(ids));
            }
            None => {
                if let Some(Value::List(values)) = object.ref_key(&attr) {
                    let target = self.schema.target(class, field)?;
                    let ids = values
                        .iter()
                        .map(|v| id::to_store(&target, v))
                        .collect::<OdmResult<Vec<_>>>()?;
                    document.insert(key, Bson::Array(ids));
                }
            }
        }

        Ok(())
    }

    fn join_row(&mut self, collection: &str, a: (&String, &Bson), b: (&String, &Bson)) {
        let mut pair = vec![
            (a.0.clone(), a.1.to_string()),
            (b.0.clone(), b.1.to_string()),
        ];
        pair.sort();
        if !self.join_rows.insert((collection.to_string(), pair)) {
            return;
        }

        let mut row = Document::new();
        row.insert(a.0.clone(), a.1.clone());
        row.insert(b.0.clone(), b.1.clone());
        self.commands.push(WriteCommand {
            target: CommandTarget::Join {
                collection: collection.to_string(),
            },
            filter: Filter::and([Filter::eq(a.0.clone(), a.1.clone()), Filter::eq(b.0.clone(), b.1.clone())]),
            document: row,
            object: None,
        });
    }

    fn encode_value(
        &mut self,
        class: &str,
        field: &str,
        ty: &FieldType,
        value: &Value,
    ) -> OdmResult<Bson> {
        let mismatch = || {
            OdmError::validation(
                class,
                field,
                format!("{} does not match {:?}", value.display(), ty),
            )
        };

        let bson = match (ty, value) {
            (_, Value::Null) => Bson::Null,
            (FieldType::Any, value) => self.encode_any(value)?,
            (FieldType::Str | FieldType::Enum(_), Value::String(s)) => Bson::String(s.clone()),
            (FieldType::Int, Value::Int(i)) => Bson::Int64(*i),
            (FieldType::Float, Value::Float(f)) => Bson::Double(*f),
            (FieldType::Float, Value::Int(i)) => Bson::Double(*i as f64),
            (FieldType::Bool, Value::Bool(b)) => Bson::Boolean(*b),
            (FieldType::Date, Value::Date(d)) => date_to_bson(*d),
            (FieldType::Date, Value::DateTime(dt)) => date_to_bson(dt.date_naive()),
            (FieldType::DateTime, Value::DateTime(dt)) => datetime_to_bson(*dt),
            (FieldType::DateTime, Value::Date(d)) => date_to_bson(*d),
            (FieldType::List(item), Value::List(items)) => Bson::Array(
                items
                    .iter()
                    .map(|v| self.encode_value(class, field, item, v))
                    .collect::<OdmResult<Vec<_>>>()?,
            ),
            (FieldType::Dict(item), Value::Dict(map)) => {
                let mut document = Document::new();
                for (key, v) in map {
                    document.insert(key.clone(), self.encode_value(class, field, item, v)?);
                }
                Bson::Document(document)
            }
            (FieldType::Shape(members), Value::Dict(map)) => {
                let mut document = Document::new();
                for member in members {
                    if let Some(v) = map.get(&member.name) {
                        document.insert(
                            member.name.clone(),
                            self.encode_value(class, field, &member.ty, v)?,
                        );
                    }
                }
                Bson::Document(document)
            }
            (FieldType::Instance(_), Value::Object(object)) => self.encode_instance(object)?,
            _ => return Err(mismatch()),
        };

        Ok(bson)
    }

    fn encode_any(&mut self, value: &Value) -> OdmResult<Bson> {
        let bson = match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => Bson::Int64(*i),
            Value::Float(f) => Bson::Double(*f),
            Value::String(s) => Bson::String(s.clone()),
            Value::Date(d) => date_to_bson(*d),
            Value::DateTime(dt) => datetime_to_bson(*dt),
            Value::List(items) => Bson::Array(
                items
                    .iter()
                    .map(|v| self.encode_any(v))
                    .collect::<OdmResult<Vec<_>>>()?,
            ),
            Value::Dict(map) => {
                let mut document = Document::new();
                for (key, v) in map {
                    document.insert(key.clone(), self.encode_any(v)?);
                }
                Bson::Document(document)
            }
            Value::Object(object) => self.encode_instance(object)?,
        };

        Ok(bson)
    }

    /// Inlines an instance. Instances of collection-backed classes also get their own command.
    fn encode_instance(&mut self, object: &Object) -> OdmResult<Bson> {
        let class = object.class();

        if !class.is_embedded() {
            let id = self.visit(object, None)?;
            let inline = match self.emitted.get(&object.addr()) {
                Some(index) => self.commands[*index].document.clone(),
                None => doc! { ID_KEY: id },
            };
            return Ok(Bson::Document(inline));
        }

        object.validate()?;
        let mut document = Document::new();
        if let Some(value) = object.id() {
            document.insert(ID_KEY, id::to_store(&class, &value)?);
        }
        for field in class.fields() {
            match &field.kind {
                FieldKind::Embedded(ty) => {
                    if let Some(value) = object.get(&field.name) {
                        let bson = self.encode_value(class.name(), &field.name, ty, &value)?;
                        document.insert(class.db_key(&field.name), bson);
                    }
                }
                FieldKind::LocalKey(_) => self.encode_local_key(object, &class, field, &mut document)?,
                FieldKind::LocalKeys(_) => self.encode_local_keys(object, &class, field, &mut document)?,
                FieldKind::Primary(_) | FieldKind::ForeignKey(_) | FieldKind::ForeignKeys(_) => {}
            }
        }

        Ok(Bson::Document(document))
    }
}

fn related_objects(object: &Object, field: &FieldDef) -> Vec<Object> {
    object
        .get(&field.name)
        .map(|value| value.objects())
        .unwrap_or_default()
}

fn link_field<'c>(class: &'c ClassDef, link: &Link) -> OdmResult<&'c FieldDef> {
    class
        .field(&link.field)
        .filter(|f| matches!(f.kind, FieldKind::LocalKey(_) | FieldKind::LocalKeys(_)))
        .ok_or_else(|| {
            OdmError::InvalidSchema(format!(
                "{}.{} must be a local key to hold a back-reference",
                class.name(),
                link.field
            ))
        })
}

/// Stores the owner's identifier in the linked object's reference-key attribute.
fn link_object(object: &Object, class: &ClassDef, link: &Link) -> OdmResult<()> {
    let field = link_field(class, link)?;

    match &field.kind {
        FieldKind::LocalKey(_) => {
            object.set_ref_key(keys::reference_key(&field.name), link.owner_display.clone());
        }
        _ => {
            let attr = keys::reference_keys_key(&field.name);
            let mut ids = match object.ref_key(&attr) {
                Some(Value::List(ids)) => ids,
                _ => Vec::new(),
            };
            if !ids.contains(&link.owner_display) {
                ids.push(link.owner_display.clone());
            }
            object.set_ref_key(attr, Value::List(ids));
        }
    }

    Ok(())
}

/// Writes the owner's identifier under the linked field's on-document key.
fn link_document(class: &ClassDef, document: &mut Document, link: &Link) -> OdmResult<()> {
    let field = link_field(class, link)?;

    match &field.kind {
        FieldKind::LocalKey(_) => {
            document.insert(keys::db_reference_key(&field.name, class), link.owner_id.clone());
        }
        _ => {
            let key = keys::db_reference_keys_key(&field.name, class);
            let mut ids = match document.get(&key) {
                Some(Bson::Array(ids)) => ids.clone(),
                _ => Vec::new(),
            };
            if !ids.contains(&link.owner_id) {
                ids.push(link.owner_id.clone());
            }
            document.insert(key, Bson::Array(ids));
        }
    }

    Ok(())
}

/// Dates are stored as datetimes at midnight UTC.
pub fn date_to_bson(date: NaiveDate) -> Bson {
    Bson::DateTime(bson::DateTime::from_chrono(date.and_time(NaiveTime::MIN).and_utc()))
}

pub fn datetime_to_bson(datetime: DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_chrono(datetime))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use indexmap::IndexMap;

    use super::*;
    use crate::testing;

    fn object(schema: &Schema, class: &str) -> Object {
        Object::new(&schema.class(class).unwrap())
    }

    fn index_of(commands: &[WriteCommand], object: &Object) -> usize {
        commands
            .iter()
            .position(|c| c.object.as_ref().is_some_and(|o| o.ptr_eq(object)))
            .unwrap()
    }

    #[test]
    fn embedded_values_are_encoded_inline() {
        let schema = testing::blog_schema();
        let home = object(&schema, "Address").with("street", "Main St").unwrap();
        let mut limits = IndexMap::new();
        limits.insert("speed".to_string(), Value::Float(1.5));
        let mut size = IndexMap::new();
        size.insert("height".to_string(), Value::Int(180));

        let person = object(&schema, "Person")
            .with("name", "Ada").unwrap()
            .with("born", NaiveDate::from_ymd_opt(1815, 12, 10).unwrap()).unwrap()
            .with("scores", vec![Value::Int(1), Value::Int(2)]).unwrap()
            .with("limits", limits).unwrap()
            .with("size", size).unwrap()
            .with("home", home).unwrap();

        let commands = encode_root(&schema, &person).unwrap();
        assert_eq!(commands.len(), 1);

        let document = &commands[0].document;
        assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(document.get_str("name").unwrap(), "Ada");
        assert_eq!(
            document.get_datetime("born").unwrap().to_chrono(),
            Utc.with_ymd_and_hms(1815, 12, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(document.get_array("scores").unwrap(), &vec![Bson::Int64(1), Bson::Int64(2)]);
        assert_eq!(document.get_document("limits").unwrap().get_f64("speed").unwrap(), 1.5);
        assert_eq!(document.get_document("size").unwrap().get_i64("height").unwrap(), 180);
        assert_eq!(document.get_document("home").unwrap().get_str("street").unwrap(), "Main St");
        assert!(document.get("lastSeen").is_none());
        assert!(person.id().is_some());
    }

    #[test]
    fn local_key_dependencies_come_first() {
        let schema = testing::blog_schema();
        let profile = object(&schema, "Profile").with("bio", "hi").unwrap();
        let user = object(&schema, "User")
            .with("name", "u").unwrap()
            .with("profile", &profile).unwrap();

        let commands = encode_root(&schema, &user).unwrap();

        assert_eq!(commands.len(), 2);
        assert!(index_of(&commands, &profile) < index_of(&commands, &user));
        let profile_id = commands[0].document.get("_id").cloned().unwrap();
        assert_eq!(commands[1].document.get("profileId"), Some(&profile_id));
        assert_eq!(user.ref_key("profile_id"), profile.id());
    }

    #[test]
    fn one_to_many_writes_back_references() {
        let schema = testing::blog_schema();
        let first = object(&schema, "Post").with("title", "one").unwrap();
        let second = object(&schema, "Post").with("title", "two").unwrap();
        let author = object(&schema, "Author")
            .with("name", "A1").unwrap()
            .with("posts", vec![first.clone(), second.clone()]).unwrap();

        let commands = encode_root(&schema, &author).unwrap();

        assert_eq!(commands.len(), 3);
        let author_index = index_of(&commands, &author);
        assert_eq!(author_index, 2);
        let author_id = commands[author_index].document.get("_id").unwrap();
        for post in [&first, &second] {
            let command = &commands[index_of(&commands, post)];
            assert_eq!(command.document.get("authorId"), Some(author_id));
            assert!(command.document.get("posts").is_none());
        }
        assert!(commands[author_index].document.get("posts").is_none());
    }

    #[test]
    fn cycles_terminate_and_link_both_ways() {
        let schema = testing::blog_schema();
        let user = object(&schema, "User").with("name", "u").unwrap();
        let profile = object(&schema, "Profile")
            .with("bio", "b").unwrap()
            .with("user", &user).unwrap();
        user.set("profile", &profile).unwrap();

        let commands = encode_root(&schema, &profile).unwrap();

        assert_eq!(commands.len(), 2);
        let user_command = &commands[index_of(&commands, &user)];
        let profile_command = &commands[index_of(&commands, &profile)];
        assert_eq!(
            user_command.document.get("profileId"),
            profile_command.document.get("_id")
        );
    }

    #[test]
    fn many_to_many_emits_one_row_per_pair() {
        let schema = testing::blog_schema();
        let post = object(&schema, "Post").with("title", "p").unwrap();
        let b = object(&schema, "Tag").with("label", "b").unwrap();
        let c = object(&schema, "Tag").with("label", "c").unwrap();
        post.set("tags", vec![b.clone(), c.clone()]).unwrap();
        b.set("posts", vec![post.clone()]).unwrap();

        let commands = encode_root(&schema, &post).unwrap();
        let rows = commands.iter().filter(|c| c.is_join_row()).collect::<Vec<_>>();

        assert_eq!(rows.len(), 2);
        let post_id = commands[index_of(&commands, &post)].document.get("_id").unwrap();
        for (row, tag) in rows.iter().zip([&b, &c]) {
            assert_eq!(row.collection(), "postsTagsTagsPosts");
            assert_eq!(row.document.get("postId"), Some(post_id));
            assert_eq!(
                row.document.get("tagId"),
                commands[index_of(&commands, tag)].document.get("_id")
            );
        }
    }

    #[test]
    fn caller_supplied_ids_are_required() {
        let mut schema = Schema::new();
        schema
            .register(
                ClassDef::builder("Invoice")
                    .field(FieldDef::primary("number", crate::class::IdStrategy::String))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let invoice = object(&schema, "Invoice");
        assert!(matches!(
            encode_root(&schema, &invoice),
            Err(OdmError::Validation { field, .. }) if field == "number"
        ));

        invoice.set("number", "INV-1").unwrap();
        let commands = encode_root(&schema, &invoice).unwrap();
        assert_eq!(commands[0].filter, Filter::eq("_id", "INV-1"));
    }

    #[test]
    fn validation_runs_before_encoding() {
        let schema = testing::blog_schema();
        let person = object(&schema, "Person").with("mood", "angry").unwrap();

        assert!(matches!(encode_root(&schema, &person), Err(OdmError::Validation { .. })));
        assert!(person.id().is_none());
    }
}
