//! Board engine: the single writer for one board's data.
//!
//! DESIGN
//! ======
//! `BoardEngine` owns a `Board` and is the only code path that mutates it.
//! Every operation validates first and mutates only after validation passes,
//! so a rejected mutation leaves the board untouched. Accepted mutations bump
//! `revision` and schedule a debounced save.
//!
//! Operations are split across modules by concern:
//! - this module: blocks, priorities, views
//! - `services::taxonomy`: classifications, fields, possible values
//! - `services::paste`: clipboard reconciliation
//!
//! Callers serialize access (the room map's write lock), which gives each
//! operation a consistent snapshot for its read-modify-write sequence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::geometry;
use crate::model::{Block, BlockContent, BlockId, Board, Location, Point, ViewConfig, ViewLayout, ViewSummary};
use crate::services::persistence::{PendingSave, SaveScheduler, SaveStatus};
use crate::services::store::StoreError;

// =============================================================================
// ERRORS
// =============================================================================

/// Which kind of entity a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Block,
    ParentBlock,
    Classification,
    Field,
    View,
    PriorityAnchor,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Block => "block",
            Self::ParentBlock => "parent block",
            Self::Classification => "classification",
            Self::Field => "field",
            Self::View => "view",
            Self::PriorityAnchor => "priority anchor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },
    #[error("block already exists: {0}")]
    Conflict(BlockId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cannot place block {block_id} under {parent_id}: circular dependency")]
    CircularDependency { block_id: BlockId, parent_id: BlockId },
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl crate::frame::ErrorCode for EngineError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::Conflict(_) => "E_CONFLICT",
            Self::InvalidArgument(_) => "E_INVALID_ARGUMENT",
            Self::CircularDependency { .. } => "E_CIRCULAR_DEPENDENCY",
            Self::Internal(_) => "E_INTERNAL",
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// One entry of a bulk position update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPosition {
    pub block_id: BlockId,
    pub location: Location,
}

/// Owner of one board's mutable state.
pub struct BoardEngine {
    pub(crate) board: Board,
    revision: u64,
    saver: Option<SaveScheduler>,
}

impl BoardEngine {
    /// In-memory engine with no persistence.
    #[must_use]
    pub fn new(board: Board) -> Self {
        Self { board, revision: 0, saver: None }
    }

    /// Engine whose mutations schedule debounced saves.
    #[must_use]
    pub fn with_saver(board: Board, saver: SaveScheduler) -> Self {
        Self { board, revision: 0, saver: Some(saver) }
    }

    #[must_use]
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Monotonic count of accepted mutations.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn save_status(&self) -> SaveStatus {
        self.saver.as_ref().map_or(SaveStatus::Clean, SaveScheduler::status)
    }

    #[must_use]
    pub fn subscribe_save_status(&self) -> Option<watch::Receiver<SaveStatus>> {
        self.saver.as_ref().map(SaveScheduler::subscribe)
    }

    /// Write any unsaved state now, cancelling the debounce timer.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        match self.saver.as_mut() {
            Some(saver) => saver.flush(&self.board).await,
            None => Ok(()),
        }
    }

    /// Cancel the debounce timer and snapshot unsaved state for a write the
    /// caller runs later. `None` when there is nothing to save.
    pub fn begin_flush(&mut self) -> Option<PendingSave> {
        self.saver.as_mut()?.begin_flush(&self.board)
    }

    /// Record an accepted mutation.
    pub(crate) fn touch(&mut self) {
        self.revision += 1;
        if let Some(saver) = self.saver.as_mut() {
            saver.schedule();
        }
    }

    pub(crate) fn require_block(&self, id: &str) -> Result<&Block, EngineError> {
        self.board
            .blocks
            .get(id)
            .ok_or_else(|| EngineError::not_found(Entity::Block, id))
    }

    /// Absolute depth of each listed block.
    fn depths(&self, ids: &[BlockId]) -> HashMap<BlockId, u32> {
        ids.iter()
            .map(|id| (id.clone(), geometry::depth(id, &self.board.blocks, None)))
            .collect()
    }

    /// Rescale every block in `before` by its depth change around `focal`.
    fn rescale_from(&mut self, before: &HashMap<BlockId, u32>, focal: Point) {
        let ids: Vec<BlockId> = before.keys().cloned().collect();
        let after = self.depths(&ids);
        for (id, old_depth) in before {
            let Some(&new_depth) = after.get(id) else {
                continue;
            };
            if let Some(block) = self.board.blocks.get_mut(id) {
                block.location = geometry::rescale(block.location, *old_depth, new_depth, Some(focal));
            }
        }
    }
}

// =============================================================================
// BLOCKS
// =============================================================================

impl BoardEngine {
    /// Insert a new block and append it to the priority list.
    ///
    /// # Errors
    ///
    /// `NotFound` if `parent_id` is set but missing; `Conflict` if `id` exists.
    pub fn create_block(
        &mut self,
        id: BlockId,
        location: Location,
        parent_id: Option<BlockId>,
    ) -> Result<Block, EngineError> {
        let block = Block::new(id, location, parent_id);
        self.insert_block(block)
    }

    /// Validate and insert a fully built block.
    pub(crate) fn insert_block(&mut self, block: Block) -> Result<Block, EngineError> {
        if let Some(parent_id) = block.parent_block_id.as_deref() {
            if !self.board.blocks.contains_key(parent_id) {
                return Err(EngineError::not_found(Entity::ParentBlock, parent_id));
            }
        }
        if block.id.is_empty() {
            return Err(EngineError::invalid("block id must not be empty"));
        }
        if self.board.blocks.contains_key(&block.id) {
            return Err(EngineError::Conflict(block.id));
        }

        self.board.block_priorities.push(block.id.clone());
        self.board.blocks.insert(block.id.clone(), block.clone());
        self.touch();
        Ok(block)
    }

    /// Overwrite locations. Unknown ids are skipped.
    pub fn set_block_positions(&mut self, positions: Vec<BlockPosition>) -> Vec<BlockPosition> {
        for position in &positions {
            if let Some(block) = self.board.blocks.get_mut(&position.block_id) {
                block.location = position.location;
            } else {
                tracing::debug!(block_id = %position.block_id, "position update for unknown block skipped");
            }
        }
        self.touch();
        positions
    }

    /// Delete blocks one at a time in caller order, lifting each deleted
    /// block's children onto its own parent.
    ///
    /// # Errors
    ///
    /// `NotFound` if any id is missing; nothing is deleted in that case.
    pub fn delete_blocks(&mut self, ids: &[BlockId]) -> Result<Vec<BlockId>, EngineError> {
        let mut unique: Vec<BlockId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        for id in &unique {
            self.require_block(id)?;
        }

        for id in &unique {
            self.delete_one(id);
        }
        self.touch();
        Ok(unique)
    }

    fn delete_one(&mut self, id: &str) {
        let Some(deleted) = self.board.blocks.get(id).cloned() else {
            return;
        };
        let children = self
            .board
            .children_index()
            .remove(&Some(id.to_owned()))
            .unwrap_or_default();

        if !children.is_empty() {
            // The child nearest the deleted block anchors the zoom.
            let focal = children
                .iter()
                .filter_map(|child_id| self.board.blocks.get(child_id))
                .min_by(|a, b| {
                    a.location
                        .distance_to(&deleted.location)
                        .total_cmp(&b.location.distance_to(&deleted.location))
                })
                .map_or_else(|| deleted.location.origin(), |b| b.location.origin());

            let affected = self.board.subtrees(&children);
            let before = self.depths(&affected);
            for child_id in &children {
                if let Some(child) = self.board.blocks.get_mut(child_id) {
                    child.parent_block_id.clone_from(&deleted.parent_block_id);
                }
            }
            self.rescale_from(&before, focal);
        }

        self.board.blocks.remove(id);
        self.board.block_priorities.retain(|p| p != id);
    }

    /// Reparent a block, rescaling its subtree around its own location
    /// unless `skip_resize` is set.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `block_id` is absent; `NotFound` if the block or
    /// the new parent is missing; `CircularDependency` if the new parent is
    /// the block itself or one of its descendants.
    pub fn set_block_parent(
        &mut self,
        block_id: Option<&str>,
        parent_id: Option<&str>,
        skip_resize: bool,
    ) -> Result<(), EngineError> {
        let Some(block_id) = block_id.filter(|id| !id.is_empty()) else {
            return Err(EngineError::invalid("blockId is required"));
        };
        let parent_id = parent_id.filter(|id| !id.is_empty());

        let focal = self.require_block(block_id)?.location.origin();
        if let Some(parent_id) = parent_id {
            if !self.board.blocks.contains_key(parent_id) {
                return Err(EngineError::not_found(Entity::ParentBlock, parent_id));
            }
            self.check_not_ancestor(block_id, parent_id)?;
        }

        let affected = self.board.subtree(block_id);
        let before = if skip_resize { HashMap::new() } else { self.depths(&affected) };

        if let Some(block) = self.board.blocks.get_mut(block_id) {
            block.parent_block_id = parent_id.map(str::to_owned);
        }
        if !skip_resize {
            self.rescale_from(&before, focal);
        }
        self.touch();
        Ok(())
    }

    /// Fail if walking up from `parent_id` reaches `block_id`.
    fn check_not_ancestor(&self, block_id: &str, parent_id: &str) -> Result<(), EngineError> {
        let mut cursor = Some(parent_id);
        let mut hops = 0;
        while let Some(current) = cursor {
            if current == block_id {
                return Err(EngineError::CircularDependency {
                    block_id: block_id.to_owned(),
                    parent_id: parent_id.to_owned(),
                });
            }
            hops += 1;
            if hops > self.board.blocks.len() {
                break;
            }
            cursor = self
                .board
                .blocks
                .get(current)
                .and_then(|b| b.parent_block_id.as_deref());
        }
        Ok(())
    }

    /// Replace a block's content after validating its tagged shape.
    ///
    /// # Errors
    ///
    /// `NotFound` if the block is missing; `InvalidArgument` if `content`
    /// is not a recognised content payload.
    pub fn set_block_content(&mut self, block_id: &str, content: serde_json::Value) -> Result<BlockContent, EngineError> {
        self.require_block(block_id)?;
        let content: BlockContent =
            serde_json::from_value(content).map_err(|e| EngineError::invalid(format!("malformed content: {e}")))?;

        if let Some(block) = self.board.blocks.get_mut(block_id) {
            block.content = content.clone();
        }
        self.touch();
        Ok(content)
    }
}

// =============================================================================
// PRIORITY
// =============================================================================

impl BoardEngine {
    /// Move `ids` as one batch to the end of the priority list, or
    /// immediately before `before_id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if `before_id` is not in the list or an id is not a block;
    /// `InvalidArgument` if `before_id` is itself being moved.
    pub fn set_block_priority(&mut self, ids: &[BlockId], before_id: Option<&str>) -> Result<(), EngineError> {
        if let Some(before_id) = before_id {
            if !self.board.block_priorities.iter().any(|p| p == before_id) {
                return Err(EngineError::not_found(Entity::PriorityAnchor, before_id));
            }
            if ids.iter().any(|id| id == before_id) {
                return Err(EngineError::invalid(format!("block {before_id} cannot be placed before itself")));
            }
        }
        for id in ids {
            self.require_block(id)?;
        }

        let mut batch: Vec<BlockId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !batch.contains(id) {
                batch.push(id.clone());
            }
        }

        let priorities = &mut self.board.block_priorities;
        priorities.retain(|p| !batch.contains(p));
        // EDGE: re-resolve the anchor; removal may have shifted it.
        let at = before_id
            .and_then(|b| priorities.iter().position(|p| p == b))
            .unwrap_or(priorities.len());
        let tail = priorities.split_off(at);
        priorities.extend(batch);
        priorities.extend(tail);

        self.touch();
        Ok(())
    }
}

// =============================================================================
// VIEWS
// =============================================================================

impl BoardEngine {
    /// Validate and upsert a view.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the payload is not a view config, has an empty
    /// id, or groups by a field that does not exist.
    pub fn save_view(&mut self, raw: serde_json::Value) -> Result<ViewSummary, EngineError> {
        let view: ViewConfig =
            serde_json::from_value(raw).map_err(|e| EngineError::invalid(format!("malformed view config: {e}")))?;
        if view.id.is_empty() {
            return Err(EngineError::invalid("view id must not be empty"));
        }
        if let ViewLayout::Kanban { group_by_field_id } = &view.layout {
            if !self.board.fields.contains_key(group_by_field_id) {
                return Err(EngineError::invalid(format!("kanban view groups by unknown field {group_by_field_id}")));
            }
        }

        let summary = ViewSummary::from(&view);
        self.board.views.insert(view.id.clone(), view);
        self.touch();
        Ok(summary)
    }

    /// # Errors
    ///
    /// `NotFound` if the view does not exist.
    pub fn delete_view(&mut self, view_id: &str) -> Result<(), EngineError> {
        if self.board.views.remove(view_id).is_none() {
            return Err(EngineError::not_found(Entity::View, view_id));
        }
        self.touch();
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` if the view does not exist.
    pub fn load_view(&self, view_id: &str) -> Result<ViewConfig, EngineError> {
        self.board
            .views
            .get(view_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Entity::View, view_id))
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
