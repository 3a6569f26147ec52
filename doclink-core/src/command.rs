//! Write commands produced by the encoder.

use bson::Document;

use crate::{class::ClassRef, object::Object, query::Expr};

/// Where a write command lands.
#[derive(Debug, Clone)]
pub enum CommandTarget {
    /// The collection of a class.
    Class(ClassRef),
    /// A many-to-many join collection.
    Join { collection: String },
}

/// A fully encoded document paired with its target, applied as an upsert matching `filter`.
#[derive(Debug, Clone)]
pub struct WriteCommand {
    pub target: CommandTarget,
    /// Filter over on-document keys identifying the document to replace.
    pub filter: Expr,
    pub document: Document,
    /// The instance the document was encoded from; `None` for join rows.
    pub object: Option<Object>,
}

impl WriteCommand {
    pub fn collection(&self) -> &str {
        match &self.target {
            CommandTarget::Class(class) => class.collection(),
            CommandTarget::Join { collection } => collection,
        }
    }

    /// The target class, `None` for join rows.
    pub fn class(&self) -> Option<&ClassRef> {
        match &self.target {
            CommandTarget::Class(class) => Some(class),
            CommandTarget::Join { .. } => None,
        }
    }

    pub fn is_join_row(&self) -> bool {
        matches!(self.target, CommandTarget::Join { .. })
    }
}
