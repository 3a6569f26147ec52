//! Interpreter for typed aggregation pipelines over in-memory documents.

use std::cmp::Ordering;

use bson::{Bson, Document};

use doclink_core::{
    error::{OdmError, OdmResult},
    pipeline::Stage,
    query::{Sort, SortDirection},
};

use crate::evaluator::{Comparable, DocumentEvaluator, get_path};

/// Runs `stages` over `documents`. `collection` supplies the documents of lookup sources.
pub(crate) fn run<F>(stages: &[Stage], documents: Vec<Document>, collection: &F) -> OdmResult<Vec<Document>>
where
    F: Fn(&str) -> Vec<Document>,
{
    let mut documents = documents;

    for stage in stages {
        documents = match stage {
            Stage::Match(filter) => DocumentEvaluator::filter_documents(documents, filter)?,
            Stage::Sort(sorts) => {
                documents.sort_by(|a, b| compare(a, b, sorts));
                documents
            }
            Stage::Skip(n) => documents.into_iter().skip(*n as usize).collect(),
            Stage::Limit(n) => documents.into_iter().take(*n as usize).collect(),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                pipeline,
                as_field,
            } => {
                let source = collection(from);
                let mut joined = Vec::with_capacity(documents.len());
                for mut document in documents {
                    let local = get_path(&document, local_field);
                    let related = source
                        .iter()
                        .filter(|candidate| lookup_matches(local, get_path(candidate, foreign_field)))
                        .cloned()
                        .collect::<Vec<_>>();
                    let related = run(pipeline, related, collection)?;

                    document.insert(
                        as_field.clone(),
                        Bson::Array(related.into_iter().map(Bson::Document).collect()),
                    );
                    joined.push(document);
                }
                joined
            }
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => unwind(documents, path, *preserve_null_and_empty),
            Stage::ReplaceRoot(key) => documents
                .into_iter()
                .map(|document| match document.get(key) {
                    Some(Bson::Document(root)) => Ok(root.clone()),
                    other => Err(OdmError::Backend(format!(
                        "$replaceRoot expects a document at {key}, found {}",
                        other.map(|v| v.to_string()).unwrap_or_else(|| "nothing".into())
                    ))),
                })
                .collect::<OdmResult<Vec<_>>>()?,
        };
    }

    Ok(documents)
}

fn compare(a: &Document, b: &Document, sorts: &[Sort]) -> Ordering {
    for sort in sorts {
        let left = get_path(a, &sort.field).map(Comparable::from).unwrap_or(Comparable::Null);
        let right = get_path(b, &sort.field).map(Comparable::from).unwrap_or(Comparable::Null);

        let ordering = match sort.direction {
            SortDirection::Asc => left.sort_cmp(&right),
            SortDirection::Desc => right.sort_cmp(&left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Lookup equality: either side may be an array, matching on any shared element. A missing
/// local value matches foreign documents whose key is null or missing.
fn lookup_matches(local: Option<&Bson>, foreign: Option<&Bson>) -> bool {
    let values = |bson: Option<&Bson>| -> Vec<Bson> {
        match bson {
            None => vec![Bson::Null],
            Some(Bson::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        }
    };
    let local = values(local);
    let foreign = values(foreign);

    local.iter().any(|l| {
        foreign
            .iter()
            .any(|f| Comparable::from(l) == Comparable::from(f))
    })
}

fn unwind(documents: Vec<Document>, path: &str, preserve: bool) -> Vec<Document> {
    let mut unwound = Vec::with_capacity(documents.len());

    for document in documents {
        match document.get(path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    copy.insert(path, item);
                    unwound.push(copy);
                }
            }
            Some(Bson::Array(_)) => {
                if preserve {
                    let mut copy = document;
                    copy.remove(path);
                    unwound.push(copy);
                }
            }
            None | Some(Bson::Null) => {
                if preserve {
                    unwound.push(document);
                }
            }
            Some(_) => unwound.push(document),
        }
    }

    unwound
}
