//! Compilation of [`Query`] values into aggregation pipelines.
//!
//! Filters and sorts are rewritten from in-memory field names to on-document keys, with
//! identifier values coerced to the store-native identifier type of the class they point
//! at. Each include becomes one `$lookup` (plus `$unwind` for single-valued relations);
//! many-to-many includes nest a second lookup through the join collection.
//!
//! The assembled order is match, sort, limit, skip, lookups. When both skip and limit are
//! present the limit stage carries `skip + limit`, so applying it before the skip still
//! yields the requested window. A limit of zero means no limit, as it does for a store's
//! find command.

use bson::Bson;

use crate::{
    class::{ClassDef, ClassRef, FieldDef, FieldKind},
    classify::{FieldClass, classify},
    error::{OdmError, OdmResult},
    id,
    keys::{self, ID_KEY},
    pipeline::Stage,
    query::{Expr, FieldOp, ID_ALIAS, Include, Query, QueryVisitor, Sort},
    schema::Schema,
    value::Value,
};

/// Key under which the nested lookup of a join-collection include stores its target.
pub const JOIN_TARGET_KEY: &str = "_target";

/// Compiles a query into its pipeline.
pub fn build_pipeline(schema: &Schema, query: &Query) -> OdmResult<Vec<Stage>> {
    let class = schema.class(&query.class)?;
    PipelineBuilder::new(schema).stages(&class, query)
}

/// Translates a filter expression over `class` into on-document keys and store values.
pub fn translate_filter(schema: &Schema, class: &ClassDef, filter: &Expr) -> OdmResult<Expr> {
    FilterTranslator::new(schema, class).visit_expr(filter)
}

/// Resolves a possibly dotted in-memory path to its on-document key, together with the
/// class identifiers on that key refer to, if any.
fn resolve_path<'a>(
    schema: &Schema,
    class: &'a ClassDef,
    path: &str,
) -> OdmResult<(String, Option<ClassRef>, Option<&'a FieldDef>)> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    if head == ID_ALIAS || head == class.primary_field().name {
        return Ok((ID_KEY.to_string(), None, Some(class.primary_field())));
    }

    let (field, key) = match class.field(head) {
        Some(field) => (field, keys::stored_key(class, field)),
        None => {
            let field = class
                .fields()
                .iter()
                .find(|f| keys::attribute_key(f).as_deref() == Some(head))
                .ok_or_else(|| OdmError::UnknownField {
                    class: class.name().to_string(),
                    field: head.to_string(),
                })?;
            (field, keys::stored_key(class, field))
        }
    };
    let key = key.ok_or_else(|| {
        OdmError::InvalidSchema(format!(
            "{}.{} is stored on the related documents and cannot be filtered on",
            class.name(),
            field.name
        ))
    })?;

    let refers_to = match &field.kind {
        FieldKind::LocalKey(rel) | FieldKind::LocalKeys(rel) => Some(schema.class(&rel.target)?),
        _ => None,
    };
    let key = match rest {
        Some(rest) => format!("{key}.{rest}"),
        None => key,
    };

    Ok((key, refers_to, Some(field)))
}

/// Coerces display identifiers inside a filter value to store-native identifiers.
fn coerce_id(class: &ClassDef, value: &Bson) -> OdmResult<Bson> {
    match value {
        Bson::String(s) => id::to_store(class, &Value::String(s.clone())),
        Bson::Int32(i) => id::to_store(class, &Value::Int(*i as i64)),
        Bson::Int64(i) => id::to_store(class, &Value::Int(*i)),
        Bson::Array(items) => items
            .iter()
            .map(|item| coerce_id(class, item))
            .collect::<OdmResult<Vec<_>>>()
            .map(Bson::Array),
        other => Ok(other.clone()),
    }
}

/// Visitor rewriting field names and identifier values of a filter.
pub struct FilterTranslator<'a> {
    schema: &'a Schema,
    class: &'a ClassDef,
}

impl<'a> FilterTranslator<'a> {
    pub fn new(schema: &'a Schema, class: &'a ClassDef) -> Self {
        Self { schema, class }
    }
}

impl QueryVisitor for FilterTranslator<'_> {
    type Output = Expr;
    type Error = OdmError;

    fn visit_and(&mut self, exprs: &[Expr]) -> OdmResult<Expr> {
        exprs
            .iter()
            .map(|e| self.visit_expr(e))
            .collect::<OdmResult<Vec<_>>>()
            .map(Expr::And)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> OdmResult<Expr> {
        exprs
            .iter()
            .map(|e| self.visit_expr(e))
            .collect::<OdmResult<Vec<_>>>()
            .map(Expr::Or)
    }

    fn visit_not(&mut self, expr: &Expr) -> OdmResult<Expr> {
        Ok(self.visit_expr(expr)?.not())
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> OdmResult<Expr> {
        let (key, _, _) = resolve_path(self.schema, self.class, field)?;
        Ok(Expr::Exists(key, should_exist))
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> OdmResult<Expr> {
        let (key, refers_to, def) = resolve_path(self.schema, self.class, field)?;
        let is_identifier = def.is_some_and(|f| matches!(f.kind, FieldKind::Primary(_)));
        let dotted = key.contains('.');

        let value = match (&refers_to, is_identifier, dotted) {
            (_, _, true) => value.clone(),
            (Some(target), _, _) => coerce_id(target, value)?,
            (None, true, _) => coerce_id(self.class, value)?,
            (None, false, _) => value.clone(),
        };

        Ok(Expr::field(key, *op, value))
    }
}

/// Builds the stages of a query and, recursively, of its include subqueries.
pub struct PipelineBuilder<'a> {
    schema: &'a Schema,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Stages for `query` evaluated against documents of `class`.
    pub fn stages(&self, class: &ClassDef, query: &Query) -> OdmResult<Vec<Stage>> {
        let mut stages = Vec::new();

        if let Some(filter) = &query.filter {
            stages.push(Stage::Match(translate_filter(self.schema, class, filter)?));
        }
        if !query.sorts.is_empty() {
            let sorts = query
                .sorts
                .iter()
                .map(|sort| {
                    let (key, _, _) = resolve_path(self.schema, class, &sort.field)?;
                    Ok(Sort {
                        field: key,
                        direction: sort.direction,
                    })
                })
                .collect::<OdmResult<Vec<_>>>()?;
            stages.push(Stage::Sort(sorts));
        }
        if let Some(limit) = query.limit.filter(|l| *l > 0) {
            stages.push(Stage::Limit(limit.saturating_add(query.skip.unwrap_or(0))));
        }
        if let Some(skip) = query.skip.filter(|s| *s > 0) {
            stages.push(Stage::Skip(skip));
        }
        for include in &query.includes {
            stages.extend(self.lookup(class, include)?);
        }

        Ok(stages)
    }

    fn lookup(&self, class: &ClassDef, include: &Include) -> OdmResult<Vec<Stage>> {
        let field = class.require_field(&include.field)?;
        let target = self.schema.target(class, field)?;
        let sub = match &include.subquery {
            Some(subquery) if subquery.class != target.name() => {
                return Err(OdmError::InvalidSchema(format!(
                    "include {}.{} expects a {} subquery, got {}",
                    class.name(),
                    field.name,
                    target.name(),
                    subquery.class
                )));
            }
            Some(subquery) => self.stages(&target, subquery)?,
            None => Vec::new(),
        };
        let as_field = class.db_key(&field.name);
        let unwind = |as_field: &str| Stage::Unwind {
            path: as_field.to_string(),
            preserve_null_and_empty: !include.required,
        };

        let stages = match classify(field) {
            FieldClass::LocalKey | FieldClass::LocalKeys => {
                let local_field = keys::stored_key(class, field).ok_or_else(|| {
                    OdmError::InvalidSchema(format!("{}.{} has no stored key", class.name(), field.name))
                })?;
                let lookup = Stage::Lookup {
                    from: target.collection().to_string(),
                    local_field,
                    foreign_field: ID_KEY.to_string(),
                    pipeline: sub,
                    as_field: as_field.clone(),
                };
                match classify(field) {
                    FieldClass::LocalKey => vec![lookup, unwind(&as_field)],
                    _ => vec![lookup],
                }
            }
            FieldClass::ForeignKey | FieldClass::ForeignKeys => {
                let (_, back_key) = self.schema.back_reference_key(class, field)?;
                let lookup = Stage::Lookup {
                    from: target.collection().to_string(),
                    local_field: ID_KEY.to_string(),
                    foreign_field: back_key,
                    pipeline: sub,
                    as_field: as_field.clone(),
                };
                match classify(field) {
                    FieldClass::ForeignKey => vec![lookup, unwind(&as_field)],
                    _ => vec![lookup],
                }
            }
            FieldClass::JoinKeys => {
                let join = self.schema.join_spec(class, field)?;
                let mut pipeline = vec![
                    Stage::Lookup {
                        from: target.collection().to_string(),
                        local_field: join.target_column,
                        foreign_field: ID_KEY.to_string(),
                        pipeline: Vec::new(),
                        as_field: JOIN_TARGET_KEY.to_string(),
                    },
                    Stage::Unwind {
                        path: JOIN_TARGET_KEY.to_string(),
                        preserve_null_and_empty: false,
                    },
                    Stage::ReplaceRoot(JOIN_TARGET_KEY.to_string()),
                ];
                pipeline.extend(sub);

                vec![Stage::Lookup {
                    from: join.collection,
                    local_field: ID_KEY.to_string(),
                    foreign_field: join.local_column,
                    pipeline,
                    as_field,
                }]
            }
            FieldClass::Identifier | FieldClass::Embedded | FieldClass::EmbeddedInstance => {
                return Err(OdmError::InvalidSchema(format!(
                    "{}.{} is not a relation and cannot be included",
                    class.name(),
                    field.name
                )));
            }
        };

        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;

    use super::*;
    use crate::{
        query::{Filter, SortDirection},
        testing,
    };

    #[test]
    fn filters_use_db_keys_and_native_ids() {
        let schema = testing::blog_schema();
        let author = ObjectId::new();
        let query = Query::find(
            "Post",
            Filter::eq("author", author.to_hex()).and(Filter::eq("publishedOn", "x")),
        );

        let err = build_pipeline(&schema, &query).unwrap_err();
        assert!(matches!(err, OdmError::UnknownField { field, .. } if field == "publishedOn"));

        let query = Query::find("Post", Filter::eq("author_id", author.to_hex()))
            .filter(Filter::exists("published_on"));
        let stages = build_pipeline(&schema, &query).unwrap();

        assert_eq!(
            stages,
            vec![Stage::Match(Expr::And(vec![
                Expr::field("authorId".into(), FieldOp::Eq, Bson::ObjectId(author)),
                Expr::Exists("publishedOn".into(), true),
            ]))]
        );
    }

    #[test]
    fn id_queries_coerce_lists() {
        let schema = testing::blog_schema();
        let a = ObjectId::new();
        let b = ObjectId::new();
        let query = Query::find("Author", Filter::any_of("id", vec![a.to_hex(), b.to_hex()]));

        let stages = build_pipeline(&schema, &query).unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Expr::field(
                "_id".into(),
                FieldOp::AnyOf,
                Bson::Array(vec![Bson::ObjectId(a), Bson::ObjectId(b)]),
            ))]
        );
    }

    #[test]
    fn modifiers_follow_match_sort_limit_skip_order() {
        let schema = testing::blog_schema();
        let query = Query::find("Post", Filter::eq("title", "t"))
            .order("published_on", SortDirection::Desc)
            .order("title", SortDirection::Asc)
            .skip(10)
            .limit(5);

        let stages = build_pipeline(&schema, &query).unwrap();
        let operators = stages.iter().map(Stage::operator).collect::<Vec<_>>();
        assert_eq!(operators, vec!["$match", "$sort", "$limit", "$skip"]);
        assert_eq!(stages[2], Stage::Limit(15));
        assert_eq!(stages[3], Stage::Skip(10));
        assert_eq!(
            stages[1],
            Stage::Sort(vec![
                Sort { field: "publishedOn".into(), direction: SortDirection::Desc },
                Sort { field: "title".into(), direction: SortDirection::Asc },
            ])
        );
    }

    #[test]
    fn zero_limit_emits_no_limit_stage() {
        let schema = testing::blog_schema();
        let query = Query::all("Post").skip(3).limit(0);

        let stages = build_pipeline(&schema, &query).unwrap();
        assert_eq!(stages, vec![Stage::Skip(3)]);
    }

    #[test]
    fn local_key_include_unwinds_preserving_parents() {
        let schema = testing::blog_schema();
        let stages = build_pipeline(&schema, &Query::all("User").include("profile")).unwrap();

        assert_eq!(
            stages,
            vec![
                Stage::Lookup {
                    from: "profiles".into(),
                    local_field: "profileId".into(),
                    foreign_field: "_id".into(),
                    pipeline: vec![],
                    as_field: "profile".into(),
                },
                Stage::Unwind { path: "profile".into(), preserve_null_and_empty: true },
            ]
        );

        let required = Query::all("User").include_with(Include::new("profile").required());
        let stages = build_pipeline(&schema, &required).unwrap();
        assert_eq!(
            stages[1],
            Stage::Unwind { path: "profile".into(), preserve_null_and_empty: false }
        );
    }

    #[test]
    fn foreign_key_include_matches_back_reference() {
        let schema = testing::blog_schema();
        let query = Query::all("Author").include_with(Include::with(
            "posts",
            Query::find("Post", Filter::eq("title", "a")).limit(2),
        ));

        let stages = build_pipeline(&schema, &query).unwrap();
        assert_eq!(
            stages,
            vec![Stage::Lookup {
                from: "posts".into(),
                local_field: "_id".into(),
                foreign_field: "authorId".into(),
                pipeline: vec![
                    Stage::Match(Filter::eq("title", "a")),
                    Stage::Limit(2),
                ],
                as_field: "posts".into(),
            }]
        );
    }

    #[test]
    fn join_include_flattens_join_rows() {
        let schema = testing::blog_schema();
        let stages = build_pipeline(&schema, &Query::all("Post").include("tags")).unwrap();

        let Stage::Lookup { from, local_field, foreign_field, pipeline, as_field } = &stages[0] else {
            panic!("expected a lookup, got {:?}", stages[0]);
        };
        assert_eq!(from, "postsTagsTagsPosts");
        assert_eq!(local_field, "_id");
        assert_eq!(foreign_field, "postId");
        assert_eq!(as_field, "tags");

        let operators = pipeline.iter().map(Stage::operator).collect::<Vec<_>>();
        assert_eq!(operators, vec!["$lookup", "$unwind", "$replaceRoot"]);
        assert!(matches!(
            &pipeline[0],
            Stage::Lookup { from, local_field, .. } if from == "tags" && local_field == "tagId"
        ));
    }

    #[test]
    fn subquery_class_must_match_target() {
        let schema = testing::blog_schema();
        let query = Query::all("Author").include_with(Include::with("posts", Query::all("Tag")));

        assert!(matches!(build_pipeline(&schema, &query), Err(OdmError::InvalidSchema(_))));
    }

    #[test]
    fn virtual_fields_cannot_be_filtered() {
        let schema = testing::blog_schema();
        let query = Query::find("Author", Filter::eq("posts", "x"));

        assert!(matches!(build_pipeline(&schema, &query), Err(OdmError::InvalidSchema(_))));
    }
}
