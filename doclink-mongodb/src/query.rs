//! Translation of filter expressions and pipeline stages into MongoDB syntax.

use bson::{Bson, Document, doc};

use doclink_core::{
    error::{OdmError, OdmResult},
    pipeline::Stage,
    query::{Expr, FieldOp, QueryVisitor, SortDirection},
};

/// Translates filter expressions into MongoDB query documents.
///
/// String operators are case-sensitive and match their operand literally.
pub struct MongoQueryTranslator;

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = OdmError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let requires = |what: &str| {
            OdmError::Backend(format!("{op:?} on {field} requires {what}"))
        };

        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$elemMatch": { "$eq": other } },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)) },
                    _ => return Err(requires("a string value")),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)) },
                    _ => return Err(requires("a string value")),
                },
                FieldOp::AnyOf => match value {
                    Bson::Array(arr) => doc! { "$in": arr },
                    other => doc! { "$in": [other] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$nin": [other] },
                },
            }
        })
    }
}

fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Translates a typed stage into its MongoDB pipeline document.
pub fn stage_document(stage: &Stage) -> OdmResult<Document> {
    Ok(match stage {
        Stage::Match(filter) => doc! { "$match": MongoQueryTranslator.visit_expr(filter)? },
        Stage::Sort(sorts) => {
            let mut keys = Document::new();
            for sort in sorts {
                keys.insert(
                    sort.field.clone(),
                    match sort.direction {
                        SortDirection::Asc => 1,
                        SortDirection::Desc => -1,
                    },
                );
            }
            doc! { "$sort": keys }
        }
        Stage::Skip(n) => doc! { "$skip": clamp(*n) },
        Stage::Limit(n) => doc! { "$limit": clamp(*n) },
        Stage::Lookup {
            from,
            local_field,
            foreign_field,
            pipeline,
            as_field,
        } => doc! {
            "$lookup": {
                "from": from,
                "localField": local_field,
                "foreignField": foreign_field,
                "pipeline": pipeline_documents(pipeline)?,
                "as": as_field,
            }
        },
        Stage::Unwind {
            path,
            preserve_null_and_empty,
        } => doc! {
            "$unwind": {
                "path": format!("${path}"),
                "preserveNullAndEmptyArrays": preserve_null_and_empty,
            }
        },
        Stage::ReplaceRoot(key) => doc! { "$replaceRoot": { "newRoot": format!("${key}") } },
    })
}

/// Saturates counts beyond the server's signed 64-bit range.
fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub fn pipeline_documents(stages: &[Stage]) -> OdmResult<Vec<Document>> {
    stages.iter().map(stage_document).collect()
}

#[cfg(test)]
mod tests {
    use doclink_core::query::{Filter, Sort};

    use super::*;

    #[test]
    fn not_becomes_nor() {
        let translated = MongoQueryTranslator
            .visit_expr(&Filter::eq("name", "Ada").not())
            .unwrap();

        assert_eq!(translated, doc! { "$nor": [{ "name": { "$eq": "Ada" } }] });
    }

    #[test]
    fn string_operators_escape_their_operand() {
        let translated = MongoQueryTranslator
            .visit_expr(&Filter::starts_with("title", "C++"))
            .unwrap();

        assert_eq!(translated, doc! { "title": { "$regex": "^C\\+\\+" } });
    }

    #[test]
    fn oversized_counts_saturate() {
        assert_eq!(
            pipeline_documents(&[Stage::Skip(u64::MAX), Stage::Limit(u64::MAX)]).unwrap(),
            vec![doc! { "$skip": i64::MAX }, doc! { "$limit": i64::MAX }]
        );
    }

    #[test]
    fn stages_translate_to_pipeline_syntax() {
        let stages = vec![
            Stage::Sort(vec![
                Sort { field: "publishedOn".into(), direction: SortDirection::Desc },
                Sort { field: "title".into(), direction: SortDirection::Asc },
            ]),
            Stage::Lookup {
                from: "profiles".into(),
                local_field: "profileId".into(),
                foreign_field: "_id".into(),
                pipeline: vec![Stage::Limit(1)],
                as_field: "profile".into(),
            },
            Stage::Unwind { path: "profile".into(), preserve_null_and_empty: true },
            Stage::ReplaceRoot("_target".into()),
        ];

        assert_eq!(
            pipeline_documents(&stages).unwrap(),
            vec![
                doc! { "$sort": { "publishedOn": -1, "title": 1 } },
                doc! { "$lookup": {
                    "from": "profiles",
                    "localField": "profileId",
                    "foreignField": "_id",
                    "pipeline": [{ "$limit": 1_i64 }],
                    "as": "profile",
                } },
                doc! { "$unwind": { "path": "$profile", "preserveNullAndEmptyArrays": true } },
                doc! { "$replaceRoot": { "newRoot": "$_target" } },
            ]
        );
    }
}
