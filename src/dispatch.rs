//! Mutation dispatch: the one entry point both transports call.
//!
//! DESIGN
//! ======
//! A mutation arrives as an operation name plus a flat JSON payload. It is
//! decoded into `Mutation`, applied to a `BoardEngine` by `apply`, and the
//! result comes back as frame data plus a `Scope` telling who should see it.
//! The room notifies peers; transports only answer the caller. Nothing here
//! sends frames.
//!
//! ERROR HANDLING
//! ==============
//! Wire error codes are per operation: each mutation lists the engine error
//! kinds it can raise, and the code is `3 + position` in that list. Codes
//! 0-2 are reserved for the transport (see `frame`). Anything unlisted is
//! reported as internal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::frame::{CODE_INTERNAL, Data, ErrorCode};
use crate::model::{
    BlockId, ClassificationDefinition, ClassificationId, FieldDefinition, FieldId, FieldValue, Location,
    PossibleValueDefinition, PossibleValueId, ViewId, new_id,
};
use crate::services::engine::{BlockPosition, BoardEngine, EngineError};
use crate::services::paste::PastePayload;

/// First code available to operations.
pub const FIRST_OPERATION_CODE: u16 = 3;

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlock {
    /// Client-minted id for optimistic inserts; minted here when absent.
    #[serde(default)]
    pub id: Option<BlockId>,
    pub location: Location,
    #[serde(default)]
    pub parent_block_id: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBlockPositions {
    pub blocks_and_positions: Vec<BlockPosition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBlocks {
    pub block_ids: Vec<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBlockParent {
    #[serde(default)]
    pub block_id: Option<BlockId>,
    #[serde(default)]
    pub parent_block_id: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBlockContent {
    pub block_id: BlockId,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetClassificationDefinitions {
    pub classification_ids: Vec<ClassificationId>,
    #[serde(default)]
    pub classifications: HashMap<ClassificationId, ClassificationDefinition>,
    #[serde(default)]
    pub fields: HashMap<FieldId, FieldDefinition>,
    #[serde(default)]
    pub possible_values: HashMap<PossibleValueId, PossibleValueDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetClassificationOnBlocks {
    pub block_ids: Vec<BlockId>,
    pub classification_id: ClassificationId,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFieldDefinitions {
    pub block_ids: Vec<BlockId>,
    #[serde(default)]
    pub field_definitions: HashMap<FieldId, FieldDefinition>,
    #[serde(default)]
    pub field_ids: Vec<FieldId>,
    #[serde(default)]
    pub possible_value_definitions: HashMap<PossibleValueId, PossibleValueDefinition>,
    #[serde(default)]
    pub deleted_field_ids: Vec<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFieldOnBlocks {
    pub field_id: FieldId,
    /// `null` clears the value.
    pub block_id_to_field_value: HashMap<BlockId, Option<FieldValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBlockPriority {
    #[serde(rename = "blockId", alias = "blockIds")]
    pub block_ids: Vec<BlockId>,
    #[serde(default)]
    pub before_id: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveView {
    pub view_config: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRef {
    pub view_id: ViewId,
}

// =============================================================================
// MUTATION
// =============================================================================

/// Every board mutation, decoded from `{name, payload}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "camelCase")]
pub enum Mutation {
    CreateBlock(CreateBlock),
    SetBlockPositions(SetBlockPositions),
    DeleteBlocks(DeleteBlocks),
    SetBlockParent(SetBlockParent),
    SetBlockContent(SetBlockContent),
    SetClassificationDefinitions(SetClassificationDefinitions),
    SetClassificationOnBlocks(SetClassificationOnBlocks),
    SetFieldDefinitions(SetFieldDefinitions),
    SetFieldOnBlocks(SetFieldOnBlocks),
    SetBlockPriority(SetBlockPriority),
    SaveView(SaveView),
    DeleteView(ViewRef),
    LoadView(ViewRef),
    PasteData(PastePayload),
}

/// Who receives a mutation's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every room member, the caller included (its copy is the confirmation).
    Everyone,
    /// Every room member except the caller, which already applied it locally.
    Others,
    /// Only the caller. Reads.
    Caller,
}

/// Result of an applied mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub data: Data,
    pub scope: Scope,
}

const E_NOT_FOUND: &str = "E_NOT_FOUND";
const E_CONFLICT: &str = "E_CONFLICT";
const E_INVALID_ARGUMENT: &str = "E_INVALID_ARGUMENT";
const E_CIRCULAR_DEPENDENCY: &str = "E_CIRCULAR_DEPENDENCY";

impl Mutation {
    /// Decode a mutation from its operation name and flat payload.
    ///
    /// # Errors
    ///
    /// Returns the serde error for unknown names or malformed payloads.
    pub fn from_request(name: &str, payload: &Data) -> Result<Self, serde_json::Error> {
        let payload: serde_json::Map<String, serde_json::Value> =
            payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(serde_json::json!({ "name": name, "payload": payload }))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateBlock(_) => "createBlock",
            Self::SetBlockPositions(_) => "setBlockPositions",
            Self::DeleteBlocks(_) => "deleteBlocks",
            Self::SetBlockParent(_) => "setBlockParent",
            Self::SetBlockContent(_) => "setBlockContent",
            Self::SetClassificationDefinitions(_) => "setClassificationDefinitions",
            Self::SetClassificationOnBlocks(_) => "setClassificationOnBlocks",
            Self::SetFieldDefinitions(_) => "setFieldDefinitions",
            Self::SetFieldOnBlocks(_) => "setFieldOnBlocks",
            Self::SetBlockPriority(_) => "setBlockPriority",
            Self::SaveView(_) => "saveView",
            Self::DeleteView(_) => "deleteView",
            Self::LoadView(_) => "loadView",
            Self::PasteData(_) => "pasteData",
        }
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        match self {
            Self::SetBlockPositions(_) => Scope::Others,
            Self::LoadView(_) => Scope::Caller,
            _ => Scope::Everyone,
        }
    }

    /// Error kinds this mutation can raise, in code order.
    #[must_use]
    pub fn error_kinds(&self) -> &'static [&'static str] {
        match self {
            Self::CreateBlock(_) => &[E_NOT_FOUND, E_CONFLICT, E_INVALID_ARGUMENT],
            Self::SetBlockPositions(_) => &[],
            Self::DeleteBlocks(_)
            | Self::SetClassificationOnBlocks(_)
            | Self::DeleteView(_)
            | Self::LoadView(_) => &[E_NOT_FOUND],
            Self::SetBlockParent(_) => &[E_INVALID_ARGUMENT, E_NOT_FOUND, E_CIRCULAR_DEPENDENCY],
            Self::SetBlockContent(_)
            | Self::SetFieldDefinitions(_)
            | Self::SetFieldOnBlocks(_)
            | Self::SetBlockPriority(_) => &[E_NOT_FOUND, E_INVALID_ARGUMENT],
            Self::SetClassificationDefinitions(_) | Self::SaveView(_) => &[E_INVALID_ARGUMENT],
            Self::PasteData(_) => &[E_INVALID_ARGUMENT, E_CIRCULAR_DEPENDENCY, E_NOT_FOUND],
        }
    }
}

/// Integer wire code for an engine error raised by a mutation with `kinds`.
#[must_use]
pub fn error_code(kinds: &[&str], err: &EngineError) -> u16 {
    let kind = err.error_code();
    kinds
        .iter()
        .position(|k| *k == kind)
        .and_then(|i| u16::try_from(i).ok())
        .map_or(CODE_INTERNAL, |i| FIRST_OPERATION_CODE + i)
}

// =============================================================================
// APPLY
// =============================================================================

/// Apply one mutation to an engine.
///
/// # Errors
///
/// Returns the engine's error unchanged; a result that cannot be encoded
/// becomes `EngineError::Internal`.
pub fn apply(engine: &mut BoardEngine, mutation: Mutation) -> Result<Applied, EngineError> {
    let scope = mutation.scope();
    let data = match mutation {
        Mutation::CreateBlock(p) => {
            let id = p.id.filter(|id| !id.is_empty()).unwrap_or_else(new_id);
            let block = engine.create_block(id, p.location, p.parent_block_id)?;
            to_data(&serde_json::json!({ "block": block }))?
        }
        Mutation::SetBlockPositions(p) => {
            let echoed = engine.set_block_positions(p.blocks_and_positions);
            to_data(&serde_json::json!({ "blocksAndPositions": echoed }))?
        }
        Mutation::DeleteBlocks(p) => {
            let deleted = engine.delete_blocks(&p.block_ids)?;
            to_data(&serde_json::json!({ "blockIds": deleted }))?
        }
        Mutation::SetBlockParent(p) => {
            engine.set_block_parent(p.block_id.as_deref(), p.parent_block_id.as_deref(), false)?;
            to_data(&serde_json::json!({
                "blockId": p.block_id,
                "parentBlockId": p.parent_block_id,
            }))?
        }
        Mutation::SetBlockContent(p) => {
            let content = engine.set_block_content(&p.block_id, p.content)?;
            to_data(&serde_json::json!({ "blockId": p.block_id, "content": content }))?
        }
        Mutation::SetClassificationDefinitions(p) => {
            let outcome =
                engine.set_classification_definitions(p.classification_ids, p.classifications, p.fields, p.possible_values)?;
            to_data(&outcome)?
        }
        Mutation::SetClassificationOnBlocks(p) => {
            engine.set_classification_on_blocks(&p.block_ids, &p.classification_id, p.is_active)?;
            to_data(&p)?
        }
        Mutation::SetFieldDefinitions(p) => {
            let outcome = engine.set_field_definitions(
                &p.block_ids,
                p.field_definitions,
                &p.field_ids,
                p.possible_value_definitions,
                &p.deleted_field_ids,
            )?;
            to_data(&outcome)?
        }
        Mutation::SetFieldOnBlocks(p) => {
            engine.set_field_on_blocks(&p.field_id, &p.block_id_to_field_value)?;
            to_data(&p)?
        }
        Mutation::SetBlockPriority(p) => {
            engine.set_block_priority(&p.block_ids, p.before_id.as_deref())?;
            to_data(&p)?
        }
        Mutation::SaveView(p) => {
            let summary = engine.save_view(p.view_config)?;
            to_data(&serde_json::json!({ "viewConfig": summary }))?
        }
        Mutation::DeleteView(p) => {
            engine.delete_view(&p.view_id)?;
            to_data(&p)?
        }
        Mutation::LoadView(p) => {
            let view = engine.load_view(&p.view_id)?;
            to_data(&serde_json::json!({ "viewConfig": view }))?
        }
        Mutation::PasteData(p) => {
            let outcome = engine.paste_data(p)?;
            to_data(&outcome)?
        }
    };
    Ok(Applied { data, scope })
}

fn to_data(value: &impl Serialize) -> Result<Data, EngineError> {
    let value = serde_json::to_value(value).map_err(|e| EngineError::Internal(format!("encode result: {e}")))?;
    serde_json::from_value(value).map_err(|e| EngineError::Internal(format!("result is not an object: {e}")))
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
