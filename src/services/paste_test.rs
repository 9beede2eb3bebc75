use super::*;
use crate::model::{Board, FieldSourceType, FieldType, FieldValue, Location};

fn option(id: &str, name: &str) -> PossibleValueDefinition {
    PossibleValueDefinition { id: id.into(), name: name.into(), style: None }
}

fn field(id: &str, name: &str, field_type: FieldType, options: &[&str], source: FieldSourceType) -> FieldDefinition {
    FieldDefinition {
        id: id.into(),
        name: name.into(),
        field_type,
        possible_value_ids: options.iter().map(|o| (*o).to_owned()).collect(),
        source_type: source,
    }
}

fn status_board() -> BoardEngine {
    let mut board = Board::default();
    board.possible_values.insert("o1".into(), option("o1", "Open"));
    board.possible_values.insert("o2".into(), option("o2", "Done"));
    board.fields.insert(
        "state".into(),
        field("state", "State", FieldType::Dropdown, &["o1", "o2"], FieldSourceType::Classification),
    );
    board.classification_ids.push("st".into());
    board.classifications.insert(
        "st".into(),
        ClassificationDefinition { id: "st".into(), name: "Status".into(), field_ids: vec!["state".into()] },
    );
    BoardEngine::new(board)
}

fn pasted_block(id: &str, parent: Option<&str>, location: Location) -> Block {
    Block::new(id, location, parent.map(str::to_owned))
}

fn status_payload(state_type: FieldType) -> PastePayload {
    let mut root = pasted_block("pb1", None, Location::new(10.0, 10.0, 300.0, 200.0));
    root.classification_ids.insert("p-st".into());
    root.field_ids.push("p-state".into());
    root.field_values.insert("p-state".into(), FieldValue::Single("Blocked".into()));
    let child = pasted_block("pb2", Some("pb1"), Location::new(20.0, 20.0, 40.0, 30.0));

    PastePayload {
        classifications: vec![ClassificationDefinition {
            id: "p-st".into(),
            name: "Status".into(),
            field_ids: vec!["p-state".into()],
        }],
        fields: vec![field("p-state", "State", state_type, &["p-o1", "p-o3"], FieldSourceType::Classification)],
        possible_values: vec![option("p-o1", "Open"), option("p-o3", "Blocked")],
        blocks: vec![root, child],
    }
}

#[test]
fn compatible_classification_is_reused() {
    let mut engine = status_board();
    let outcome = engine.paste_data(status_payload(FieldType::Radio)).unwrap();

    assert_eq!(outcome.classification_ids["p-st"], "st");
    assert_eq!(outcome.field_ids["p-state"], "state");
    assert_eq!(outcome.possible_value_ids["p-o1"], "o1");
    assert!(outcome.classifications.is_empty());
    assert_eq!(engine.board().classification_ids, vec!["st".to_owned()]);

    // "Blocked" was missing, so it is added to the existing field.
    let blocked = &outcome.possible_value_ids["p-o3"];
    assert_eq!(engine.board().possible_values[blocked].name, "Blocked");
    assert_eq!(engine.board().fields["state"].possible_value_ids, vec!["o1".to_owned(), "o2".to_owned(), blocked.clone()]);
    // Reused field keeps its type.
    assert_eq!(engine.board().fields["state"].field_type, FieldType::Dropdown);

    let root = &engine.board().blocks[&outcome.block_ids["pb1"]];
    assert!(root.classification_ids.contains("st"));
    assert_eq!(root.field_ids, vec!["state".to_owned()]);
    assert_eq!(root.field_values["state"], FieldValue::Single("Blocked".into()));
}

#[test]
fn parents_are_restored_without_resizing() {
    let mut engine = status_board();
    let outcome = engine.paste_data(status_payload(FieldType::Dropdown)).unwrap();

    let root_id = &outcome.block_ids["pb1"];
    let child = &engine.board().blocks[&outcome.block_ids["pb2"]];
    assert_eq!(child.parent_block_id.as_ref(), Some(root_id));
    assert_eq!(child.location, Location::new(20.0, 20.0, 40.0, 30.0));
    assert_eq!(engine.board().block_priorities.len(), 2);
    assert_eq!(outcome.blocks.len(), 2);
}

#[test]
fn incompatible_field_mints_new_classification() {
    let mut engine = status_board();
    let outcome = engine.paste_data(status_payload(FieldType::Checkboxes)).unwrap();

    let new_class = &outcome.classification_ids["p-st"];
    assert_ne!(new_class, "st");
    assert_eq!(engine.board().classification_ids, vec!["st".to_owned(), new_class.clone()]);

    let new_field = &outcome.field_ids["p-state"];
    assert_ne!(new_field, "state");
    assert_eq!(engine.board().fields[new_field].field_type, FieldType::Checkboxes);
    assert_eq!(engine.board().fields[new_field].possible_value_ids.len(), 2);
    assert_eq!(engine.board().fields["state"].possible_value_ids.len(), 2);
}

#[test]
fn later_same_named_classification_is_reused_when_earlier_one_is_incompatible() {
    let mut engine = status_board();
    let board = &mut engine.board;
    board.fields.insert(
        "state0".into(),
        field("state0", "State", FieldType::Checkboxes, &[], FieldSourceType::Classification),
    );
    board.classification_ids.insert(0, "st0".into());
    board.classifications.insert(
        "st0".into(),
        ClassificationDefinition { id: "st0".into(), name: "Status".into(), field_ids: vec!["state0".into()] },
    );

    let outcome = engine.paste_data(status_payload(FieldType::Dropdown)).unwrap();

    assert_eq!(outcome.classification_ids["p-st"], "st");
    assert_eq!(outcome.field_ids["p-state"], "state");
    assert!(outcome.classifications.is_empty());
    assert_eq!(engine.board().classification_ids, vec!["st0".to_owned(), "st".to_owned()]);
}

#[test]
fn pasting_twice_creates_two_copies() {
    let mut engine = status_board();
    let first = engine.paste_data(status_payload(FieldType::Dropdown)).unwrap();
    let second = engine.paste_data(status_payload(FieldType::Dropdown)).unwrap();

    assert_ne!(first.block_ids["pb1"], second.block_ids["pb1"]);
    assert_eq!(engine.board().blocks.len(), 4);
    // The option added by the first paste is matched by name the second time.
    assert_eq!(first.possible_value_ids["p-o3"], second.possible_value_ids["p-o3"]);
    assert_eq!(engine.board().fields["state"].possible_value_ids.len(), 3);
}

#[test]
fn block_level_fields_get_fresh_ids() {
    let mut engine = status_board();
    let mut block = pasted_block("pb1", None, Location::new(0.0, 0.0, 10.0, 10.0));
    block.field_ids.push("p-note".into());
    block.field_values.insert("p-note".into(), FieldValue::Single("hello".into()));
    let payload = PastePayload {
        fields: vec![field("p-note", "Note", FieldType::Textbox, &[], FieldSourceType::Block)],
        blocks: vec![block],
        ..PastePayload::default()
    };

    let outcome = engine.paste_data(payload).unwrap();
    let note = &outcome.field_ids["p-note"];
    assert_eq!(engine.board().fields[note].source_type, FieldSourceType::Block);
    let pasted = &engine.board().blocks[&outcome.block_ids["pb1"]];
    assert_eq!(pasted.field_values[note], FieldValue::Single("hello".into()));
}

#[test]
fn parent_outside_the_paste_is_kept_when_it_exists() {
    let mut engine = status_board();
    engine
        .create_block("host".into(), Location::new(0.0, 0.0, 500.0, 500.0), None)
        .unwrap();
    let payload = PastePayload {
        blocks: vec![
            pasted_block("a", Some("host"), Location::new(1.0, 1.0, 10.0, 10.0)),
            pasted_block("b", Some("gone"), Location::new(1.0, 1.0, 10.0, 10.0)),
        ],
        ..PastePayload::default()
    };

    let outcome = engine.paste_data(payload).unwrap();
    assert_eq!(engine.board().blocks[&outcome.block_ids["a"]].parent_block_id.as_deref(), Some("host"));
    assert_eq!(engine.board().blocks[&outcome.block_ids["b"]].parent_block_id, None);
}

#[test]
fn malformed_block_payloads_change_nothing() {
    let mut engine = status_board();
    let before = engine.board().clone();

    let cyclic = PastePayload {
        blocks: vec![
            pasted_block("a", Some("b"), Location::default()),
            pasted_block("b", Some("a"), Location::default()),
        ],
        ..status_payload(FieldType::Dropdown)
    };
    assert!(matches!(engine.paste_data(cyclic), Err(EngineError::CircularDependency { .. })));

    let duplicated = PastePayload {
        blocks: vec![pasted_block("a", None, Location::default()), pasted_block("a", None, Location::default())],
        ..PastePayload::default()
    };
    assert!(matches!(engine.paste_data(duplicated), Err(EngineError::InvalidArgument(_))));

    assert_eq!(engine.board(), &before);
}
