//! Board data model: blocks, taxonomy, views, and the priority list.
//!
//! DESIGN
//! ======
//! The `Board` aggregate is serialized verbatim as the on-disk document and
//! as the join snapshot, so every type here uses camelCase JSON names.
//! Blocks form a forest through `parent_block_id` back-references only;
//! children are derived on demand (see `Board::children_index`).
//!
//! Selectable field values are stored by possible-value *name*, not id.
//! Renaming a possible value therefore has to rewrite block values, which
//! the engine does in `services::taxonomy`.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

// =============================================================================
// IDS
// =============================================================================

pub type BoardId = String;
pub type BlockId = String;
pub type ClassificationId = String;
pub type FieldId = String;
pub type PossibleValueId = String;
pub type ViewId = String;

/// Mint a fresh entity id.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// GEOMETRY PRIMITIVES
// =============================================================================

/// Axis-aligned bounding box in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Location {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Top-left corner.
    #[must_use]
    pub fn origin(&self) -> Point {
        Point { x: self.x, y: self.y }
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point { x: self.x + self.width / 2.0, y: self.y + self.height / 2.0 }
    }

    /// Distance between the centers of two boxes.
    #[must_use]
    pub fn distance_to(&self, other: &Location) -> f64 {
        let a = self.center();
        let b = other.center();
        (a.x - b.x).hypot(a.y - b.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

// =============================================================================
// BLOCK
// =============================================================================

/// Tagged block content. Only plain text exists today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BlockContent {
    Text { text: String },
}

impl Default for BlockContent {
    fn default() -> Self {
        Self::Text { text: String::new() }
    }
}

/// Temporal field value. Either half may be missing (date-only, time-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// A block's stored value for one field. The shape follows the field's
/// category: multi-select is `Many`, temporal is `DateTime`, everything
/// else (text, dropdown, radio) is `Single`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Many(Vec<String>),
    DateTime(DateTimeValue),
    Single(String),
}

impl FieldValue {
    /// Rewrite every occurrence of a renamed option. Returns the rewritten
    /// value, or `None` when nothing matched.
    #[must_use]
    pub fn renamed(&self, renames: &HashMap<String, String>) -> Option<FieldValue> {
        match self {
            Self::Single(name) => renames.get(name).map(|new| Self::Single(new.clone())),
            Self::Many(names) => {
                if !names.iter().any(|n| renames.contains_key(n)) {
                    return None;
                }
                let mapped = names
                    .iter()
                    .map(|n| renames.get(n).unwrap_or(n).clone())
                    .collect();
                Some(Self::Many(mapped))
            }
            Self::DateTime(_) => None,
        }
    }
}

/// A positioned content node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    pub location: Location,
    #[serde(default)]
    pub content: BlockContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<BlockId>,
    #[serde(default)]
    pub field_values: HashMap<FieldId, FieldValue>,
    #[serde(default)]
    pub field_ids: Vec<FieldId>,
    #[serde(default)]
    pub classification_ids: BTreeSet<ClassificationId>,
}

impl Block {
    #[must_use]
    pub fn new(id: impl Into<BlockId>, location: Location, parent_block_id: Option<BlockId>) -> Self {
        Self {
            id: id.into(),
            location,
            content: BlockContent::default(),
            parent_block_id,
            field_values: HashMap::new(),
            field_ids: Vec::new(),
            classification_ids: BTreeSet::new(),
        }
    }
}

// =============================================================================
// TAXONOMY
// =============================================================================

/// Field data types. Retyping is only allowed within one `FieldCategory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Textbox,
    TextEditor,
    Dropdown,
    Radio,
    Checkboxes,
    Date,
    Time,
    Datetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Text,
    SingleSelect,
    MultiSelect,
    Temporal,
}

impl FieldType {
    #[must_use]
    pub fn category(self) -> FieldCategory {
        match self {
            Self::Textbox | Self::TextEditor => FieldCategory::Text,
            Self::Dropdown | Self::Radio => FieldCategory::SingleSelect,
            Self::Checkboxes => FieldCategory::MultiSelect,
            Self::Date | Self::Time | Self::Datetime => FieldCategory::Temporal,
        }
    }

    #[must_use]
    pub fn is_compatible_with(self, other: FieldType) -> bool {
        self.category() == other.category()
    }
}

/// Where a field definition originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldSourceType {
    #[default]
    Block,
    Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationDefinition {
    /// Map keys are authoritative; an omitted id is filled from the key.
    #[serde(default)]
    pub id: ClassificationId,
    pub name: String,
    #[serde(default)]
    pub field_ids: Vec<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    #[serde(default)]
    pub id: FieldId,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub possible_value_ids: Vec<PossibleValueId>,
    #[serde(default)]
    pub source_type: FieldSourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PossibleValueDefinition {
    #[serde(default)]
    pub id: PossibleValueId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

// =============================================================================
// VIEWS
// =============================================================================

/// How a saved view lays out blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewLayout {
    Canvas,
    #[serde(rename_all = "camelCase")]
    Kanban { group_by_field_id: FieldId },
    #[serde(rename_all = "camelCase")]
    Table {
        #[serde(default)]
        column_field_ids: Vec<FieldId>,
    },
}

/// One filter clause. A block passes when its value for `field_id` matches
/// any of `values`; an empty `values` list matches blocks that have the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFilter {
    pub field_id: FieldId,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A saved filter/grouping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    pub id: ViewId,
    pub name: String,
    #[serde(flatten)]
    pub layout: ViewLayout,
    #[serde(default)]
    pub classification_ids: Vec<ClassificationId>,
    #[serde(default)]
    pub filters: Vec<ViewFilter>,
}

/// The identifying part of a view, returned after a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSummary {
    pub id: ViewId,
    pub name: String,
    #[serde(flatten)]
    pub layout: ViewLayout,
}

impl From<&ViewConfig> for ViewSummary {
    fn from(view: &ViewConfig) -> Self {
        Self { id: view.id.clone(), name: view.name.clone(), layout: view.layout.clone() }
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// Classification taxonomy used to seed a new board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoardTemplate {
    pub classification_ids: Vec<ClassificationId>,
    pub classifications: HashMap<ClassificationId, ClassificationDefinition>,
    pub fields: HashMap<FieldId, FieldDefinition>,
    pub possible_values: HashMap<PossibleValueId, PossibleValueDefinition>,
}

/// Root aggregate. One per board file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Board {
    pub blocks: HashMap<BlockId, Block>,
    pub block_priorities: Vec<BlockId>,
    pub classification_ids: Vec<ClassificationId>,
    pub classifications: HashMap<ClassificationId, ClassificationDefinition>,
    pub fields: HashMap<FieldId, FieldDefinition>,
    pub possible_values: HashMap<PossibleValueId, PossibleValueDefinition>,
    pub views: HashMap<ViewId, ViewConfig>,
}

impl Board {
    #[must_use]
    pub fn from_template(template: BoardTemplate) -> Self {
        Self {
            classification_ids: template.classification_ids,
            classifications: template.classifications,
            fields: template.fields,
            possible_values: template.possible_values,
            ..Self::default()
        }
    }

    /// A classification exists only while it is listed in `classification_ids`.
    #[must_use]
    pub fn classification(&self, id: &str) -> Option<&ClassificationDefinition> {
        if !self.classification_ids.iter().any(|c| c == id) {
            return None;
        }
        self.classifications.get(id)
    }

    /// Active classifications in display order.
    pub fn active_classifications(&self) -> impl Iterator<Item = &ClassificationDefinition> {
        self.classification_ids
            .iter()
            .filter_map(|id| self.classifications.get(id))
    }

    /// Reverse parent index: parent id → direct child ids. Roots are keyed
    /// under `None`. Child lists are sorted for deterministic traversal.
    #[must_use]
    pub fn children_index(&self) -> HashMap<Option<BlockId>, Vec<BlockId>> {
        let mut index: HashMap<Option<BlockId>, Vec<BlockId>> = HashMap::new();
        for block in self.blocks.values() {
            index
                .entry(block.parent_block_id.clone())
                .or_default()
                .push(block.id.clone());
        }
        for children in index.values_mut() {
            children.sort();
        }
        index
    }

    /// `root` followed by all of its descendants, breadth first.
    #[must_use]
    pub fn subtree(&self, root: &str) -> Vec<BlockId> {
        self.subtrees(&[root.to_owned()])
    }

    /// Every root followed by its descendants, breadth first, sharing one
    /// reverse index. A block is listed once even if reachable twice.
    #[must_use]
    pub fn subtrees(&self, roots: &[BlockId]) -> Vec<BlockId> {
        let index = self.children_index();
        let mut seen = std::collections::HashSet::new();
        let mut out: Vec<BlockId> = Vec::new();
        for root in roots {
            if seen.insert(root.clone()) {
                out.push(root.clone());
            }
        }
        let mut cursor = 0;
        while cursor < out.len() {
            let key = Some(out[cursor].clone());
            if let Some(children) = index.get(&key) {
                for child in children {
                    if seen.insert(child.clone()) {
                        out.push(child.clone());
                    }
                }
            }
            cursor += 1;
        }
        out
    }

    /// Field ids whose option list contains `possible_value_id`.
    pub fn fields_with_possible_value<'a>(&'a self, possible_value_id: &'a str) -> impl Iterator<Item = &'a FieldId> {
        self.fields
            .values()
            .filter(move |f| f.possible_value_ids.iter().any(|p| p == possible_value_id))
            .map(|f| &f.id)
    }
}
