//! Nesting depth and size rescaling for reparented blocks.
//!
//! Each nesting level scales by `SCALE_STEP`, and deeper blocks are stored
//! larger. When a subtree moves between depths, every box in it is resized
//! by the ratio of the new and old scale factors, and optionally re-projected
//! around a focal point so the subtree zooms in place instead of jumping.

use std::collections::HashMap;

use crate::model::{Block, BlockId, Location, Point};

pub const SCALE_STEP: f64 = 1.5;

/// 1-based depth of `block_id` in the forest.
///
/// Walks `parent_block_id` links. When `stop_at` is given, the walk stops
/// before that ancestor, so its direct children have depth 1. Dangling
/// parent ids end the walk. The hop count is capped at the number of
/// blocks, so a corrupted chain cannot loop forever.
#[must_use]
pub fn depth(block_id: &str, blocks: &HashMap<BlockId, Block>, stop_at: Option<&str>) -> u32 {
    let mut depth = 1;
    let mut hops = 0;
    let mut current = blocks.get(block_id);
    while let Some(block) = current {
        let Some(parent_id) = block.parent_block_id.as_deref() else {
            break;
        };
        if stop_at == Some(parent_id) || hops >= blocks.len() {
            break;
        }
        let Some(parent) = blocks.get(parent_id) else {
            break;
        };
        depth += 1;
        hops += 1;
        current = Some(parent);
    }
    depth
}

/// `SCALE_STEP^(depth - 1)`.
#[must_use]
pub fn scale_factor(depth: u32) -> f64 {
    let exponent = i32::try_from(depth.saturating_sub(1)).unwrap_or(i32::MAX);
    SCALE_STEP.powi(exponent)
}

/// Resize `bounds` for a move from `old_depth` to `new_depth`.
///
/// Width and height are multiplied by `scale_factor(new) / scale_factor(old)`:
/// nesting one level deeper grows a box by `SCALE_STEP`, lifting it to its
/// grandparent shrinks it by the same step.
/// With a focal point, x and y are re-projected around it by the same ratio.
#[must_use]
pub fn rescale(bounds: Location, old_depth: u32, new_depth: u32, focal_point: Option<Point>) -> Location {
    if old_depth == new_depth {
        return bounds;
    }
    let ratio = scale_factor(new_depth) / scale_factor(old_depth);
    let (x, y) = match focal_point {
        Some(focal) => (focal.x + (bounds.x - focal.x) * ratio, focal.y + (bounds.y - focal.y) * ratio),
        None => (bounds.x, bounds.y),
    };
    Location { x, y, width: bounds.width * ratio, height: bounds.height * ratio }
}
