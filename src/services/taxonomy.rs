//! Taxonomy operations: classifications, fields, and possible values.
//!
//! DESIGN
//! ======
//! Definitions are upserted by id. Selectable block values are stored by
//! possible-value *name*, so an upsert that renames an option has to rewrite
//! every block value holding the old name. Renames are collected per field
//! (a field only sees renames of options it actually lists), every rewrite
//! is computed against the pre-mutation board, and only then applied. Two
//! options swapping names in one call therefore land correctly.
//!
//! ERROR HANDLING
//! ==============
//! All validation runs before the first write. A field may only be retyped
//! within its compatibility group; anything else is `InvalidArgument` and the
//! board is left as it was.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{
    BlockId, ClassificationDefinition, ClassificationId, FieldCategory, FieldDefinition, FieldId, FieldValue,
    PossibleValueDefinition, PossibleValueId,
};
use crate::services::engine::{BoardEngine, EngineError, Entity};

// =============================================================================
// TYPES
// =============================================================================

/// One block value rewritten or removed by a taxonomy edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFieldValue {
    pub block_id: BlockId,
    pub field_id: FieldId,
    /// `None` when the value was removed.
    pub value: Option<FieldValue>,
}

/// An option whose name changed during an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PossibleValueRename {
    pub possible_value_id: PossibleValueId,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationDefinitionsOutcome {
    pub classification_ids: Vec<ClassificationId>,
    pub classifications: HashMap<ClassificationId, ClassificationDefinition>,
    pub fields: HashMap<FieldId, FieldDefinition>,
    pub possible_values: HashMap<PossibleValueId, PossibleValueDefinition>,
    pub changed_field_values: Vec<ChangedFieldValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinitionsOutcome {
    pub field_definitions: HashMap<FieldId, FieldDefinition>,
    pub possible_value_definitions: HashMap<PossibleValueId, PossibleValueDefinition>,
    /// Resulting `fieldIds` of every listed block.
    pub block_field_ids: HashMap<BlockId, Vec<FieldId>>,
    pub changed_field_values: Vec<ChangedFieldValue>,
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl BoardEngine {
    /// Replace the classification list and map, upserting the fields and
    /// possible values they use.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a field is retyped across compatibility groups,
    /// a listed classification has no definition, or a definition refers to
    /// a field or option that exists neither in the payload nor the board.
    pub fn set_classification_definitions(
        &mut self,
        classification_ids: Vec<ClassificationId>,
        classifications: HashMap<ClassificationId, ClassificationDefinition>,
        fields: HashMap<FieldId, FieldDefinition>,
        possible_values: HashMap<PossibleValueId, PossibleValueDefinition>,
    ) -> Result<ClassificationDefinitionsOutcome, EngineError> {
        self.check_field_types(&fields)?;
        self.check_possible_value_refs(&fields, &possible_values)?;
        for id in &classification_ids {
            let Some(definition) = classifications.get(id) else {
                return Err(EngineError::invalid(format!("classification {id} is listed but not defined")));
            };
            for field_id in &definition.field_ids {
                if !fields.contains_key(field_id) && !self.board.fields.contains_key(field_id) {
                    return Err(EngineError::invalid(format!("classification {id} uses unknown field {field_id}")));
                }
            }
        }

        let renames = self.upsert_possible_values(&possible_values);
        self.upsert_fields(&fields);

        let mut classifications = classifications;
        for (key, definition) in &mut classifications {
            definition.id.clone_from(key);
        }
        self.board.classification_ids.clone_from(&classification_ids);
        self.board.classifications.clone_from(&classifications);

        let changed_field_values = self.propagate_renames(&renames);
        self.touch();
        debug!(
            classifications = classification_ids.len(),
            renames = renames.len(),
            changed = changed_field_values.len(),
            "classification definitions replaced"
        );

        Ok(ClassificationDefinitionsOutcome {
            classification_ids,
            classifications,
            fields: normalized(fields),
            possible_values: normalized(possible_values),
            changed_field_values,
        })
    }

    /// Turn one classification on or off for a set of blocks.
    ///
    /// # Errors
    ///
    /// `NotFound` if the classification is not active on the board or any
    /// block is missing.
    pub fn set_classification_on_blocks(
        &mut self,
        block_ids: &[BlockId],
        classification_id: &str,
        is_active: bool,
    ) -> Result<(), EngineError> {
        if self.board.classification(classification_id).is_none() {
            return Err(EngineError::not_found(Entity::Classification, classification_id));
        }
        for id in block_ids {
            self.require_block(id)?;
        }

        for id in block_ids {
            let Some(block) = self.board.blocks.get_mut(id) else {
                continue;
            };
            if is_active {
                block.classification_ids.insert(classification_id.to_owned());
            } else {
                block.classification_ids.remove(classification_id);
            }
        }
        self.touch();
        Ok(())
    }

    /// Upsert block-level field definitions and attach `field_ids` to every
    /// listed block, removing `deleted_field_ids` from them.
    ///
    /// Each block ends up with `field_ids` first, in caller order, followed by
    /// the fields it already had that were neither listed nor deleted.
    ///
    /// # Errors
    ///
    /// `NotFound` if a block is missing; `InvalidArgument` for incompatible
    /// retypes or a listed field that is not defined anywhere.
    pub fn set_field_definitions(
        &mut self,
        block_ids: &[BlockId],
        field_definitions: HashMap<FieldId, FieldDefinition>,
        field_ids: &[FieldId],
        possible_value_definitions: HashMap<PossibleValueId, PossibleValueDefinition>,
        deleted_field_ids: &[FieldId],
    ) -> Result<FieldDefinitionsOutcome, EngineError> {
        for id in block_ids {
            self.require_block(id)?;
        }
        self.check_field_types(&field_definitions)?;
        self.check_possible_value_refs(&field_definitions, &possible_value_definitions)?;
        for field_id in field_ids {
            if !field_definitions.contains_key(field_id) && !self.board.fields.contains_key(field_id) {
                return Err(EngineError::invalid(format!("field {field_id} is not defined")));
            }
        }

        let renames = self.upsert_possible_values(&possible_value_definitions);
        self.upsert_fields(&field_definitions);
        let mut changed_field_values = self.propagate_renames(&renames);

        let deleted: BTreeSet<&str> = deleted_field_ids.iter().map(String::as_str).collect();
        let mut block_field_ids = HashMap::with_capacity(block_ids.len());
        let mut removed = Vec::new();
        for id in block_ids {
            let Some(block) = self.board.blocks.get_mut(id) else {
                continue;
            };
            for field_id in &deleted {
                if block.field_values.remove(*field_id).is_some() {
                    removed.push(ChangedFieldValue { block_id: id.clone(), field_id: (*field_id).to_owned(), value: None });
                }
            }

            let mut merged: Vec<FieldId> = Vec::with_capacity(field_ids.len() + block.field_ids.len());
            for field_id in field_ids.iter().chain(block.field_ids.iter()) {
                if !deleted.contains(field_id.as_str()) && !merged.contains(field_id) {
                    merged.push(field_id.clone());
                }
            }
            block.field_ids.clone_from(&merged);
            block_field_ids.insert(id.clone(), merged);
        }
        removed.sort_by(|a, b| (&a.block_id, &a.field_id).cmp(&(&b.block_id, &b.field_id)));
        changed_field_values.extend(removed);

        self.drop_orphaned_fields(&deleted);
        self.touch();

        Ok(FieldDefinitionsOutcome {
            field_definitions: normalized(field_definitions),
            possible_value_definitions: normalized(possible_value_definitions),
            block_field_ids,
            changed_field_values,
        })
    }

    /// Set or clear one field's value on several blocks. `None` removes the
    /// value and detaches the field from the block.
    ///
    /// # Errors
    ///
    /// `NotFound` if the field or a block is missing; `InvalidArgument` if a
    /// value's shape does not match the field's type.
    pub fn set_field_on_blocks(
        &mut self,
        field_id: &str,
        block_id_to_value: &HashMap<BlockId, Option<FieldValue>>,
    ) -> Result<(), EngineError> {
        let Some(field) = self.board.fields.get(field_id) else {
            return Err(EngineError::not_found(Entity::Field, field_id));
        };
        let category = field.field_type.category();
        for (block_id, value) in block_id_to_value {
            self.require_block(block_id)?;
            if let Some(value) = value {
                if !fits(value, category) {
                    return Err(EngineError::invalid(format!(
                        "value for block {block_id} does not match the type of field {field_id}"
                    )));
                }
            }
        }

        for (block_id, value) in block_id_to_value {
            let Some(block) = self.board.blocks.get_mut(block_id) else {
                continue;
            };
            match value {
                Some(value) => {
                    block.field_values.insert(field_id.to_owned(), value.clone());
                    if !block.field_ids.iter().any(|f| f == field_id) {
                        block.field_ids.push(field_id.to_owned());
                    }
                }
                None => {
                    block.field_values.remove(field_id);
                    block.field_ids.retain(|f| f != field_id);
                }
            }
        }
        self.touch();
        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

impl BoardEngine {
    fn check_field_types(&self, fields: &HashMap<FieldId, FieldDefinition>) -> Result<(), EngineError> {
        for (id, incoming) in fields {
            let Some(existing) = self.board.fields.get(id) else {
                continue;
            };
            if !existing.field_type.is_compatible_with(incoming.field_type) {
                return Err(EngineError::invalid(format!(
                    "field {id} cannot change type from {:?} to {:?}",
                    existing.field_type, incoming.field_type
                )));
            }
        }
        Ok(())
    }

    fn check_possible_value_refs(
        &self,
        fields: &HashMap<FieldId, FieldDefinition>,
        possible_values: &HashMap<PossibleValueId, PossibleValueDefinition>,
    ) -> Result<(), EngineError> {
        for (id, field) in fields {
            for pv_id in &field.possible_value_ids {
                if !possible_values.contains_key(pv_id) && !self.board.possible_values.contains_key(pv_id) {
                    return Err(EngineError::invalid(format!("field {id} uses unknown option {pv_id}")));
                }
            }
        }
        Ok(())
    }

    /// Upsert options and report every name change.
    fn upsert_possible_values(
        &mut self,
        possible_values: &HashMap<PossibleValueId, PossibleValueDefinition>,
    ) -> Vec<PossibleValueRename> {
        let mut renames = Vec::new();
        for (id, incoming) in possible_values {
            let mut definition = incoming.clone();
            definition.id.clone_from(id);
            if let Some(existing) = self.board.possible_values.get(id) {
                if existing.name != definition.name {
                    renames.push(PossibleValueRename {
                        possible_value_id: id.clone(),
                        old_name: existing.name.clone(),
                        new_name: definition.name.clone(),
                    });
                }
            }
            self.board.possible_values.insert(id.clone(), definition);
        }
        renames.sort_by(|a, b| a.possible_value_id.cmp(&b.possible_value_id));
        renames
    }

    fn upsert_fields(&mut self, fields: &HashMap<FieldId, FieldDefinition>) {
        for (id, incoming) in fields {
            let mut definition = incoming.clone();
            definition.id.clone_from(id);
            self.board.fields.insert(id.clone(), definition);
        }
    }

    /// Rewrite block values for renamed options. Returns the rewritten
    /// values sorted by block then field.
    fn propagate_renames(&mut self, renames: &[PossibleValueRename]) -> Vec<ChangedFieldValue> {
        if renames.is_empty() {
            return Vec::new();
        }

        // field id -> (old name -> new name)
        let mut by_field: HashMap<FieldId, HashMap<String, String>> = HashMap::new();
        for rename in renames {
            for field_id in self.board.fields_with_possible_value(&rename.possible_value_id) {
                by_field
                    .entry(field_id.clone())
                    .or_default()
                    .insert(rename.old_name.clone(), rename.new_name.clone());
            }
        }

        let mut changes: Vec<ChangedFieldValue> = Vec::new();
        for block in self.board.blocks.values() {
            for (field_id, value) in &block.field_values {
                let Some(map) = by_field.get(field_id) else {
                    continue;
                };
                if let Some(rewritten) = value.renamed(map) {
                    changes.push(ChangedFieldValue {
                        block_id: block.id.clone(),
                        field_id: field_id.clone(),
                        value: Some(rewritten),
                    });
                }
            }
        }
        changes.sort_by(|a, b| (&a.block_id, &a.field_id).cmp(&(&b.block_id, &b.field_id)));

        for change in &changes {
            let (Some(block), Some(value)) = (self.board.blocks.get_mut(&change.block_id), change.value.as_ref())
            else {
                continue;
            };
            block.field_values.insert(change.field_id.clone(), value.clone());
        }
        changes
    }

    /// Remove definitions of deleted block-level fields nothing refers to.
    fn drop_orphaned_fields(&mut self, deleted: &BTreeSet<&str>) {
        for field_id in deleted {
            let in_use = self.board.blocks.values().any(|b| b.field_ids.iter().any(|f| f == field_id))
                || self
                    .board
                    .classifications
                    .values()
                    .any(|c| c.field_ids.iter().any(|f| f == field_id));
            if !in_use {
                self.board.fields.remove(*field_id);
            }
        }
    }
}

/// Whether a value's shape matches a field category.
fn fits(value: &FieldValue, category: FieldCategory) -> bool {
    matches!(
        (value, category),
        (FieldValue::Single(_), FieldCategory::Text | FieldCategory::SingleSelect)
            | (FieldValue::Many(_), FieldCategory::MultiSelect)
            | (FieldValue::DateTime(_), FieldCategory::Temporal)
    )
}

/// Map keys are authoritative for ids; echo definitions with the id they were stored under.
fn normalized<T: HasId>(mut map: HashMap<String, T>) -> HashMap<String, T> {
    for (key, value) in &mut map {
        value.set_id(key);
    }
    map
}

trait HasId {
    fn set_id(&mut self, id: &str);
}

impl HasId for FieldDefinition {
    fn set_id(&mut self, id: &str) {
        id.clone_into(&mut self.id);
    }
}

impl HasId for PossibleValueDefinition {
    fn set_id(&mut self, id: &str) {
        id.clone_into(&mut self.id);
    }
}

#[cfg(test)]
#[path = "taxonomy_test.rs"]
mod tests;
