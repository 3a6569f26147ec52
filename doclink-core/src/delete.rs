//! Deletes honoring per-relation delete policies.
//!
//! A delete is planned in full before anything is written. Planning walks the cascade
//! breadth-first, collecting the documents to remove, the back-references to clear and the
//! join rows to drop. Any `Deny` relation with a live counterpart anywhere in the plan aborts
//! the delete, even when another relation would cascade into it.

use std::collections::{HashSet, VecDeque};

use bson::{Bson, Document};
use futures::TryStreamExt;

use crate::{
    class::{ClassRef, DeletePolicy, FieldKind},
    classify::{FieldClass, classify},
    error::{OdmError, OdmResult},
    id,
    keys::{self, ID_KEY},
    object::Object,
    pipeline::Stage,
    query::{Expr, Filter},
    registry::Graph,
    schema::Schema,
    value::Value,
};

#[derive(Debug, Clone, PartialEq)]
enum Step {
    /// Clear `key` on every document of `collection` pointing at `id`.
    Nullify {
        collection: String,
        key: String,
        id: Bson,
        many: bool,
    },
    /// Drop join rows whose `column` holds `id`.
    Unlink {
        collection: String,
        column: String,
        id: Bson,
    },
    /// Remove the document itself.
    Remove { collection: String, id: Bson },
}

#[derive(Debug, Default)]
struct DeletePlan {
    steps: Vec<Step>,
    removed: HashSet<(String, String)>,
}

impl DeletePlan {
    fn removes(&self, collection: &str, id: &Bson) -> bool {
        self.removed
            .contains(&(collection.to_string(), id.to_string()))
    }
}

impl Graph {
    /// Deletes a saved object, applying the delete policies of its relations.
    ///
    /// # Errors
    ///
    /// - [`OdmError::NotFound`] when the object has no identifier or no stored document.
    /// - [`OdmError::DeleteDenied`] when a `Deny` relation still has related documents.
    pub async fn delete(&self, object: &Object) -> OdmResult<()> {
        let id = object.id().ok_or_else(|| OdmError::NotFound {
            class: object.class_name(),
            description: "object has no identifier".to_string(),
        })?;

        self.delete_by_id(&object.class_name(), id).await
    }

    /// Deletes the document of `class` with the given display identifier.
    pub async fn delete_by_id(&self, class: &str, id: impl Into<Value>) -> OdmResult<()> {
        let schema = self.schema();
        let class = schema.class(class)?;
        let id = id.into();
        let stored = id::to_store(&class, &id)?;

        let root = self.class_collection(&class).await?;
        let filter = Filter::eq(ID_KEY, stored.clone());
        if root.count(Some(filter), Some(1)).await? == 0 {
            return Err(OdmError::NotFound {
                class: class.name().to_string(),
                description: format!("id = {}", id.display()),
            });
        }

        let plan = self.plan_delete(&schema, class.clone(), stored).await?;
        tracing::debug!(
            graph = self.name(),
            class = class.name(),
            id = %id.display(),
            steps = plan.steps.len(),
            "deleting object"
        );

        self.run_plan(&plan).await
    }

    async fn plan_delete(&self, schema: &Schema, class: ClassRef, id: Bson) -> OdmResult<DeletePlan> {
        let mut plan = DeletePlan::default();
        let mut queue = VecDeque::from([(class, id)]);

        while let Some((class, id)) = queue.pop_front() {
            if !plan
                .removed
                .insert((class.collection().to_string(), id.to_string()))
            {
                continue;
            }

            for field in class.fields() {
                let Some(rel) = field.relation() else {
                    continue;
                };
                let deny = || OdmError::DeleteDenied {
                    class: class.name().to_string(),
                    id: id::from_store(&class, &id)
                        .map(|v| v.display())
                        .unwrap_or_else(|_| id.to_string()),
                    field: field.name.clone(),
                };

                match classify(field) {
                    FieldClass::ForeignKey | FieldClass::ForeignKeys => {
                        let (target, key) = schema.back_reference_key(&class, field)?;
                        let many = schema
                            .counterpart(&class, field, &target)?
                            .is_some_and(|c| classify(c) == FieldClass::LocalKeys);
                        let filter = Filter::eq(key.clone(), id.clone());

                        match rel.on_delete {
                            DeletePolicy::Deny => {
                                if self.exists(target.collection(), filter).await? {
                                    return Err(deny());
                                }
                            }
                            DeletePolicy::Cascade => {
                                for document in self.matching(target.collection(), filter).await? {
                                    if let Some(related) = document.get(ID_KEY) {
                                        queue.push_back((target.clone(), related.clone()));
                                    }
                                }
                            }
                            DeletePolicy::Nullify => plan.steps.push(Step::Nullify {
                                collection: target.collection().to_string(),
                                key,
                                id: id.clone(),
                                many,
                            }),
                        }
                    }
                    FieldClass::JoinKeys => {
                        let target = schema.target(&class, field)?;
                        let join = schema.join_spec(&class, field)?;
                        let filter = Filter::eq(join.local_column.clone(), id.clone());

                        match rel.on_delete {
                            DeletePolicy::Deny => {
                                if self.exists(&join.collection, filter).await? {
                                    return Err(deny());
                                }
                            }
                            DeletePolicy::Cascade => {
                                for row in self.matching(&join.collection, filter).await? {
                                    if let Some(related) = row.get(&join.target_column) {
                                        queue.push_back((target.clone(), related.clone()));
                                    }
                                }
                            }
                            DeletePolicy::Nullify => {}
                        }
                        plan.steps.push(Step::Unlink {
                            collection: join.collection,
                            column: join.local_column,
                            id: id.clone(),
                        });
                    }
                    _ => {}
                }
            }

            // Local keys pointing here without a declared counterpart.
            for other in schema.classes() {
                for field in other.fields() {
                    let (FieldKind::LocalKey(rel) | FieldKind::LocalKeys(rel)) = &field.kind else {
                        continue;
                    };
                    if rel.target != class.name() || rel.foreign_key.is_some() {
                        continue;
                    }
                    if let Some(key) = keys::stored_key(other, field) {
                        plan.steps.push(Step::Nullify {
                            collection: other.collection().to_string(),
                            key,
                            id: id.clone(),
                            many: matches!(field.kind, FieldKind::LocalKeys(_)),
                        });
                    }
                }
            }

            plan.steps.push(Step::Remove {
                collection: class.collection().to_string(),
                id,
            });
        }

        Ok(plan)
    }

    async fn run_plan(&self, plan: &DeletePlan) -> OdmResult<()> {
        for step in &plan.steps {
            match step {
                Step::Nullify {
                    collection,
                    key,
                    id,
                    many,
                } => {
                    let handle = self.collection(collection).await?;
                    for mut document in self
                        .matching(collection, Filter::eq(key.clone(), id.clone()))
                        .await?
                    {
                        let Some(doc_id) = document.get(ID_KEY).cloned() else {
                            continue;
                        };
                        if plan.removes(collection, &doc_id) {
                            continue;
                        }
                        clear_reference(&mut document, key, id, *many);
                        handle.replace(Filter::eq(ID_KEY, doc_id), document).await?;
                    }
                }
                Step::Unlink {
                    collection,
                    column,
                    id,
                } => {
                    self.collection(collection)
                        .await?
                        .delete_many(Filter::eq(column.clone(), id.clone()))
                        .await?;
                }
                Step::Remove { collection, id } => {
                    self.collection(collection)
                        .await?
                        .delete_one(Filter::eq(ID_KEY, id.clone()))
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn exists(&self, collection: &str, filter: Expr) -> OdmResult<bool> {
        let handle = self.collection(collection).await?;
        Ok(handle.count(Some(filter), Some(1)).await? > 0)
    }

    async fn matching(&self, collection: &str, filter: Expr) -> OdmResult<Vec<Document>> {
        let handle = self.collection(collection).await?;
        handle
            .aggregate(vec![Stage::Match(filter)])
            .await?
            .try_collect()
            .await
    }
}

fn clear_reference(document: &mut Document, key: &str, id: &Bson, many: bool) {
    if many {
        if let Ok(ids) = document.get_array_mut(key) {
            ids.retain(|existing| existing != id);
        }
    } else {
        document.insert(key, Bson::Null);
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn clearing_a_single_reference_sets_null() {
        let mut document = doc! { "_id": 1, "authorId": 7 };
        clear_reference(&mut document, "authorId", &Bson::Int32(7), false);
        assert_eq!(document.get("authorId"), Some(&Bson::Null));
    }

    #[test]
    fn clearing_a_list_reference_keeps_other_ids() {
        let mut document = doc! { "_id": 1, "favoriteIds": [7, 8, 7] };
        clear_reference(&mut document, "favoriteIds", &Bson::Int32(7), true);
        assert_eq!(document.get_array("favoriteIds").unwrap(), &vec![Bson::Int32(8)]);
    }
}
