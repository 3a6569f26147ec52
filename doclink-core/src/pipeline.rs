//! Typed aggregation pipeline stages.
//!
//! Stages address documents by on-document keys and carry store-native values. Backends
//! interpret them directly (in-memory) or translate them into their own pipeline syntax.

use crate::query::{Expr, Sort};

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Expr),
    Sort(Vec<Sort>),
    Skip(u64),
    Limit(u64),
    /// Joins documents of `from` whose `foreign_field` equals (or, for arrays, contains)
    /// `local_field`, runs `pipeline` over them and stores the result array under `as_field`.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        pipeline: Vec<Stage>,
        as_field: String,
    },
    /// Emits one document per element of the array at `path`.
    Unwind {
        path: String,
        /// Keeps documents whose array is missing, null or empty.
        preserve_null_and_empty: bool,
    },
    /// Promotes the sub-document at the given key to the root.
    ReplaceRoot(String),
}

impl Stage {
    /// Name of the stage operator, as it appears in the store's pipeline syntax.
    pub fn operator(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Lookup { .. } => "$lookup",
            Stage::Unwind { .. } => "$unwind",
            Stage::ReplaceRoot(_) => "$replaceRoot",
        }
    }
}

/// Renders the stage operators of a pipeline, for logging.
pub fn outline(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|stage| match stage {
            Stage::Lookup { from, pipeline, .. } if pipeline.is_empty() => {
                format!("$lookup({from})")
            }
            Stage::Lookup { from, pipeline, .. } => {
                format!("$lookup({from}: {})", outline(pipeline))
            }
            other => other.operator().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}
