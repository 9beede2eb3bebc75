//! Clipboard paste: reconcile a foreign taxonomy with the board's, then
//! create the pasted blocks.
//!
//! DESIGN
//! ======
//! A pasted classification is reused when the board has an active
//! classification with the same name and every pasted field of it has a
//! same-named, type-compatible counterpart there. Options of reused fields
//! are matched by name; unmatched options are added to the existing field.
//! Everything else (unmatched classifications, block-level fields, their
//! options) is minted fresh and written through
//! `set_classification_definitions`, so the usual validation applies.
//!
//! Pasted blocks always get fresh ids, so pasting the same payload twice
//! yields two copies. Parent links are restored in a second pass with
//! `skip_resize` set, which keeps the pasted geometry as copied.
//!
//! ERROR HANDLING
//! ==============
//! The block payload is validated before anything is written: duplicate
//! block ids are `InvalidArgument`, parent cycles inside the payload are
//! `CircularDependency`.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{
    Block, BlockId, ClassificationDefinition, ClassificationId, FieldDefinition, FieldId, PossibleValueDefinition,
    PossibleValueId, new_id,
};
use crate::services::engine::{BoardEngine, EngineError};

// =============================================================================
// TYPES
// =============================================================================

/// Clipboard contents as produced by a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PastePayload {
    pub classifications: Vec<ClassificationDefinition>,
    pub fields: Vec<FieldDefinition>,
    pub possible_values: Vec<PossibleValueDefinition>,
    pub blocks: Vec<Block>,
}

/// Pasted id → board id maps, plus every entity the paste created or changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteOutcome {
    pub classification_ids: HashMap<ClassificationId, ClassificationId>,
    pub field_ids: HashMap<FieldId, FieldId>,
    pub possible_value_ids: HashMap<PossibleValueId, PossibleValueId>,
    pub block_ids: HashMap<BlockId, BlockId>,
    pub classifications: Vec<ClassificationDefinition>,
    pub fields: Vec<FieldDefinition>,
    pub possible_values: Vec<PossibleValueDefinition>,
    pub blocks: Vec<Block>,
}

/// Taxonomy writes accumulated while reconciling.
#[derive(Default)]
struct Reconciled {
    class_map: HashMap<ClassificationId, ClassificationId>,
    field_map: HashMap<FieldId, FieldId>,
    option_map: HashMap<PossibleValueId, PossibleValueId>,
    new_classifications: Vec<ClassificationDefinition>,
    fields: HashMap<FieldId, FieldDefinition>,
    possible_values: HashMap<PossibleValueId, PossibleValueDefinition>,
}

// =============================================================================
// OPERATION
// =============================================================================

impl BoardEngine {
    /// Paste a copied selection.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for duplicate pasted block ids, `CircularDependency`
    /// for a parent cycle inside the payload, or whatever
    /// `set_classification_definitions` rejects.
    pub fn paste_data(&mut self, payload: PastePayload) -> Result<PasteOutcome, EngineError> {
        check_pasted_blocks(&payload.blocks)?;

        let pasted_fields: HashMap<&str, &FieldDefinition> =
            payload.fields.iter().map(|f| (f.id.as_str(), f)).collect();
        let pasted_options: HashMap<&str, &PossibleValueDefinition> =
            payload.possible_values.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut plan = Reconciled::default();
        for pasted in &payload.classifications {
            if !self.reuse_classification(pasted, &pasted_fields, &pasted_options, &mut plan) {
                mint_classification(pasted, &pasted_fields, &pasted_options, &mut plan);
            }
        }
        // Fields not reached through a classification are block-level.
        for pasted in &payload.fields {
            if !plan.field_map.contains_key(&pasted.id) {
                mint_field(pasted, &pasted_options, &mut plan);
            }
        }

        if !plan.new_classifications.is_empty() || !plan.fields.is_empty() || !plan.possible_values.is_empty() {
            let mut classification_ids = self.board.classification_ids.clone();
            let mut classifications = self.board.classifications.clone();
            for definition in &plan.new_classifications {
                classification_ids.push(definition.id.clone());
                classifications.insert(definition.id.clone(), definition.clone());
            }
            self.set_classification_definitions(
                classification_ids,
                classifications,
                plan.fields.clone(),
                plan.possible_values.clone(),
            )?;
        }

        let block_map: HashMap<BlockId, BlockId> = payload.blocks.iter().map(|b| (b.id.clone(), new_id())).collect();
        for pasted in &payload.blocks {
            let block = self.remap_block(pasted, &block_map, &plan);
            self.insert_block(block)?;
        }
        for pasted in &payload.blocks {
            let Some(parent_id) = pasted.parent_block_id.as_deref() else {
                continue;
            };
            let target = match block_map.get(parent_id) {
                Some(mapped) => mapped.as_str(),
                None if self.board.blocks.contains_key(parent_id) => parent_id,
                None => continue,
            };
            if let Some(new_block_id) = block_map.get(&pasted.id) {
                self.set_block_parent(Some(new_block_id), Some(target), true)?;
            }
        }

        let blocks: Vec<Block> = payload
            .blocks
            .iter()
            .filter_map(|b| block_map.get(&b.id))
            .filter_map(|id| self.board.blocks.get(id).cloned())
            .collect();
        info!(
            blocks = blocks.len(),
            new_classifications = plan.new_classifications.len(),
            reused_classifications = plan.class_map.len() - plan.new_classifications.len(),
            "paste applied"
        );

        Ok(PasteOutcome {
            classification_ids: plan.class_map,
            field_ids: plan.field_map,
            possible_value_ids: plan.option_map,
            block_ids: block_map,
            classifications: plan.new_classifications,
            fields: sorted(plan.fields.into_values(), |f| f.id.clone()),
            possible_values: sorted(plan.possible_values.into_values(), |p| p.id.clone()),
            blocks,
        })
    }

    /// Try to map `pasted` onto an existing same-named classification. The
    /// first active candidate whose fields all have compatible counterparts
    /// wins.
    fn reuse_classification(
        &self,
        pasted: &ClassificationDefinition,
        pasted_fields: &HashMap<&str, &FieldDefinition>,
        pasted_options: &HashMap<&str, &PossibleValueDefinition>,
        plan: &mut Reconciled,
    ) -> bool {
        let Some((existing, matches)) = self
            .board
            .active_classifications()
            .filter(|c| c.name == pasted.name)
            .find_map(|c| self.match_fields(c, pasted, pasted_fields).map(|m| (c, m)))
        else {
            return false;
        };

        plan.class_map.insert(pasted.id.clone(), existing.id.clone());
        for (pasted_field, counterpart) in matches {
            plan.field_map.insert(pasted_field.id.clone(), counterpart.id.clone());

            let mut target = plan
                .fields
                .get(&counterpart.id)
                .cloned()
                .unwrap_or_else(|| counterpart.clone());
            let mut extended = false;
            for option_id in &pasted_field.possible_value_ids {
                let Some(option) = pasted_options.get(option_id.as_str()) else {
                    continue;
                };
                let same_name = target.possible_value_ids.iter().find(|id| {
                    self.board.possible_values.get(*id).map(|p| &p.name) == Some(&option.name)
                        || plan.possible_values.get(*id).map(|p| &p.name) == Some(&option.name)
                });
                if let Some(existing_option) = same_name {
                    plan.option_map.insert(option_id.clone(), existing_option.clone());
                } else {
                    let minted = mint_option(option, plan);
                    target.possible_value_ids.push(minted);
                    extended = true;
                }
            }
            if extended {
                plan.fields.insert(target.id.clone(), target);
            }
        }
        true
    }

    /// Pair every pasted field with a same-named, type-compatible field of
    /// `existing`, or `None` if any pasted field has no counterpart.
    fn match_fields<'a>(
        &'a self,
        existing: &ClassificationDefinition,
        pasted: &ClassificationDefinition,
        pasted_fields: &HashMap<&str, &'a FieldDefinition>,
    ) -> Option<Vec<(&'a FieldDefinition, &'a FieldDefinition)>> {
        let mut matches = Vec::new();
        for field_id in &pasted.field_ids {
            let Some(&pasted_field) = pasted_fields.get(field_id.as_str()) else {
                continue;
            };
            let counterpart = existing
                .field_ids
                .iter()
                .filter_map(|id| self.board.fields.get(id))
                .find(|f| f.name == pasted_field.name && f.field_type.is_compatible_with(pasted_field.field_type))?;
            matches.push((pasted_field, counterpart));
        }
        Some(matches)
    }

    fn remap_block(&self, pasted: &Block, block_map: &HashMap<BlockId, BlockId>, plan: &Reconciled) -> Block {
        let id = block_map.get(&pasted.id).cloned().unwrap_or_else(new_id);
        let mut block = Block::new(id, pasted.location, None);
        block.content = pasted.content.clone();

        block.classification_ids = pasted
            .classification_ids
            .iter()
            .filter_map(|c| match plan.class_map.get(c) {
                Some(mapped) => Some(mapped.clone()),
                None => self.board.classification(c).map(|_| c.clone()),
            })
            .collect::<BTreeSet<_>>();

        for field_id in &pasted.field_ids {
            if let Some(mapped) = plan.field_map.get(field_id) {
                if !block.field_ids.contains(mapped) {
                    block.field_ids.push(mapped.clone());
                }
            }
        }
        // Values are stored by option name, which reconciliation preserves.
        for (field_id, value) in &pasted.field_values {
            if let Some(mapped) = plan.field_map.get(field_id) {
                block.field_values.insert(mapped.clone(), value.clone());
            }
        }
        block
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn check_pasted_blocks(blocks: &[Block]) -> Result<(), EngineError> {
    let mut parents: HashMap<&str, Option<&str>> = HashMap::with_capacity(blocks.len());
    for block in blocks {
        if parents.insert(block.id.as_str(), block.parent_block_id.as_deref()).is_some() {
            return Err(EngineError::invalid(format!("pasted block {} appears twice", block.id)));
        }
    }

    for block in blocks {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut cursor = Some(block.id.as_str());
        while let Some(id) = cursor {
            if !seen.insert(id) {
                return Err(EngineError::CircularDependency {
                    block_id: block.id.clone(),
                    parent_id: block.parent_block_id.clone().unwrap_or_default(),
                });
            }
            cursor = parents.get(id).copied().flatten();
        }
    }
    Ok(())
}

fn mint_classification(
    pasted: &ClassificationDefinition,
    pasted_fields: &HashMap<&str, &FieldDefinition>,
    pasted_options: &HashMap<&str, &PossibleValueDefinition>,
    plan: &mut Reconciled,
) {
    let mut field_ids = Vec::with_capacity(pasted.field_ids.len());
    for field_id in &pasted.field_ids {
        if let Some(mapped) = plan.field_map.get(field_id) {
            field_ids.push(mapped.clone());
        } else if let Some(pasted_field) = pasted_fields.get(field_id.as_str()) {
            field_ids.push(mint_field(pasted_field, pasted_options, plan));
        }
    }

    let definition = ClassificationDefinition { id: new_id(), name: pasted.name.clone(), field_ids };
    plan.class_map.insert(pasted.id.clone(), definition.id.clone());
    plan.new_classifications.push(definition);
}

fn mint_field(
    pasted: &FieldDefinition,
    pasted_options: &HashMap<&str, &PossibleValueDefinition>,
    plan: &mut Reconciled,
) -> FieldId {
    let mut definition = pasted.clone();
    definition.id = new_id();
    definition.possible_value_ids = pasted
        .possible_value_ids
        .iter()
        .filter_map(|id| pasted_options.get(id.as_str()))
        .map(|option| mint_option(option, plan))
        .collect();

    plan.field_map.insert(pasted.id.clone(), definition.id.clone());
    let id = definition.id.clone();
    plan.fields.insert(id.clone(), definition);
    id
}

fn mint_option(pasted: &PossibleValueDefinition, plan: &mut Reconciled) -> PossibleValueId {
    if let Some(mapped) = plan.option_map.get(&pasted.id) {
        return mapped.clone();
    }
    let definition = PossibleValueDefinition { id: new_id(), name: pasted.name.clone(), style: pasted.style.clone() };
    plan.option_map.insert(pasted.id.clone(), definition.id.clone());
    let id = definition.id.clone();
    plan.possible_values.insert(id.clone(), definition);
    id
}

fn sorted<T>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| key(item));
    items
}

#[cfg(test)]
#[path = "paste_test.rs"]
mod tests;
