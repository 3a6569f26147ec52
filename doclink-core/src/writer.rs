//! Write execution.
//!
//! Commands produced by the encoder are applied one after another as upserts. There is no
//! atomicity across documents: a failure leaves every earlier document written, and those
//! objects are already marked persisted when the error is returned.

use crate::{
    class::ClassDef,
    command::{CommandTarget, WriteCommand},
    encode,
    error::{OdmError, OdmResult},
    index, keys,
    object::Object,
    registry::Graph,
};

impl Graph {
    /// Validates, encodes and writes `object` together with every unsaved or changed object
    /// reachable from it.
    ///
    /// # Errors
    ///
    /// - [`OdmError::Validation`] before anything is written.
    /// - [`OdmError::UniqueConstraint`] when a declared unique index rejects a document,
    ///   naming the in-memory field names of the index.
    /// - [`OdmError::NotConnected`] before [`Graph::connect`].
    pub async fn save(&self, object: &Object) -> OdmResult<()> {
        let schema = self.schema();
        let commands = encode::encode_root(&schema, object)?;
        tracing::debug!(
            graph = self.name(),
            root = ?object,
            commands = commands.len(),
            "saving object graph"
        );

        for command in commands {
            self.apply(command).await?;
        }

        Ok(())
    }

    /// Saves several roots in order. Objects shared between roots are written once per root.
    pub async fn save_all(&self, objects: &[Object]) -> OdmResult<()> {
        for object in objects {
            self.save(object).await?;
        }

        Ok(())
    }

    pub(crate) async fn apply(&self, command: WriteCommand) -> OdmResult<()> {
        let collection = self.collection(command.collection()).await?;
        let WriteCommand {
            target,
            filter,
            document,
            object,
        } = command;

        match collection.replace(filter, document).await {
            Ok(()) => {
                if let Some(object) = object {
                    object.mark_persisted();
                }
                Ok(())
            }
            Err(OdmError::DuplicateKey {
                collection,
                index,
                value,
            }) => {
                let (class, fields) = match &target {
                    CommandTarget::Class(class) => {
                        (class.name().to_string(), index_fields(class, &index))
                    }
                    CommandTarget::Join { .. } => (collection, vec![index]),
                };
                Err(OdmError::UniqueConstraint { class, fields, value })
            }
            Err(err) => Err(err),
        }
    }
}

/// In-memory field names covered by a declared index, or the index name itself when the
/// index is not one the class declares.
fn index_fields(class: &ClassDef, index_name: &str) -> Vec<String> {
    let Some(spec) = index::class_indexes(class)
        .into_iter()
        .find(|spec| spec.name == index_name)
    else {
        return vec![index_name.to_string()];
    };

    spec.keys
        .iter()
        .map(|key| {
            class
                .fields()
                .iter()
                .find(|f| keys::stored_key(class, f).as_deref() == Some(key.as_str()))
                .map(|f| f.name.clone())
                .unwrap_or_else(|| key.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn index_names_map_back_to_field_names() {
        let schema = testing::blog_schema();
        let author = schema.class("Author").unwrap();
        let post = schema.class("Post").unwrap();

        assert_eq!(index_fields(&author, "name_1"), vec!["name"]);
        assert_eq!(index_fields(&post, "authorId_1"), vec!["author"]);
        assert_eq!(index_fields(&author, "legacy_1"), vec!["legacy_1"]);
    }
}
