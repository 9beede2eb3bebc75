use super::*;
use crate::model::Board;
use serde_json::json;

fn payload(value: serde_json::Value) -> Data {
    serde_json::from_value(value).expect("payload must be an object")
}

fn decode(name: &str, value: serde_json::Value) -> Mutation {
    Mutation::from_request(name, &payload(value)).expect("mutation should decode")
}

fn engine_with_blocks(ids: &[&str]) -> BoardEngine {
    let mut engine = BoardEngine::new(Board::default());
    for id in ids {
        engine
            .create_block((*id).to_owned(), Location::new(0.0, 0.0, 100.0, 100.0), None)
            .unwrap();
    }
    engine
}

#[test]
fn decodes_every_operation_name() {
    let cases = [
        ("createBlock", json!({"location": {"x": 0, "y": 0, "width": 1, "height": 1}})),
        ("setBlockPositions", json!({"blocksAndPositions": []})),
        ("deleteBlocks", json!({"blockIds": ["a"]})),
        ("setBlockParent", json!({"blockId": "a"})),
        ("setBlockContent", json!({"blockId": "a", "content": {"type": "text", "text": ""}})),
        ("setClassificationDefinitions", json!({"classificationIds": []})),
        ("setClassificationOnBlocks", json!({"blockIds": [], "classificationId": "c", "isActive": true})),
        ("setFieldDefinitions", json!({"blockIds": []})),
        ("setFieldOnBlocks", json!({"fieldId": "f", "blockIdToFieldValue": {}})),
        ("setBlockPriority", json!({"blockId": ["a"]})),
        ("saveView", json!({"viewConfig": {}})),
        ("deleteView", json!({"viewId": "v"})),
        ("loadView", json!({"viewId": "v"})),
        ("pasteData", json!({})),
    ];
    for (name, body) in cases {
        let mutation = decode(name, body);
        assert_eq!(mutation.name(), name);
    }
}

#[test]
fn unknown_name_and_bad_payload_fail_to_decode() {
    assert!(Mutation::from_request("launchRockets", &Data::new()).is_err());
    assert!(Mutation::from_request("deleteBlocks", &payload(json!({"blockIds": "a"}))).is_err());
}

#[test]
fn scopes_follow_optimistic_rules() {
    assert_eq!(decode("setBlockPositions", json!({"blocksAndPositions": []})).scope(), Scope::Others);
    assert_eq!(decode("loadView", json!({"viewId": "v"})).scope(), Scope::Caller);
    assert_eq!(decode("deleteBlocks", json!({"blockIds": []})).scope(), Scope::Everyone);
}

#[test]
fn error_codes_are_per_operation() {
    let create = decode("createBlock", json!({"location": {"x": 0, "y": 0, "width": 1, "height": 1}}));
    let parent = decode("setBlockParent", json!({"blockId": "a"}));

    let not_found = EngineError::not_found(crate::services::engine::Entity::Block, "a");
    let invalid = EngineError::invalid("x");
    assert_eq!(error_code(create.error_kinds(), &not_found), 3);
    assert_eq!(error_code(create.error_kinds(), &EngineError::Conflict("a".into())), 4);
    assert_eq!(error_code(parent.error_kinds(), &invalid), 3);
    assert_eq!(error_code(parent.error_kinds(), &not_found), 4);
    assert_eq!(error_code(parent.error_kinds(), &EngineError::Internal("boom".into())), CODE_INTERNAL);
}

#[test]
fn create_block_mints_id_unless_supplied() {
    let mut engine = engine_with_blocks(&[]);
    let applied = apply(
        &mut engine,
        decode("createBlock", json!({"location": {"x": 1, "y": 2, "width": 3, "height": 4}})),
    )
    .unwrap();
    let minted = applied.data["block"]["id"].as_str().unwrap().to_owned();
    assert!(!minted.is_empty());
    assert!(engine.board().blocks.contains_key(&minted));
    assert_eq!(applied.scope, Scope::Everyone);

    let applied = apply(
        &mut engine,
        decode(
            "createBlock",
            json!({"id": "mine", "location": {"x": 0, "y": 0, "width": 1, "height": 1}, "parentBlockId": minted}),
        ),
    )
    .unwrap();
    assert_eq!(applied.data["block"]["id"], json!("mine"));
    assert_eq!(applied.data["block"]["parentBlockId"], json!(minted));
}

#[test]
fn results_echo_wire_shapes() {
    let mut engine = engine_with_blocks(&["a", "b", "c"]);

    let applied = apply(&mut engine, decode("setBlockPriority", json!({"blockId": ["c"], "beforeId": "a"}))).unwrap();
    assert_eq!(applied.data["blockId"], json!(["c"]));
    assert_eq!(applied.data["beforeId"], json!("a"));
    assert_eq!(engine.board().block_priorities, vec!["c".to_owned(), "a".to_owned(), "b".to_owned()]);

    let applied = apply(&mut engine, decode("setBlockParent", json!({"blockId": "b", "parentBlockId": "a"}))).unwrap();
    assert_eq!(applied.data["blockId"], json!("b"));
    assert_eq!(applied.data["parentBlockId"], json!("a"));

    let applied = apply(
        &mut engine,
        decode("setBlockContent", json!({"blockId": "a", "content": {"type": "text", "text": "hi"}})),
    )
    .unwrap();
    assert_eq!(applied.data["content"], json!({"type": "text", "text": "hi"}));

    let applied = apply(&mut engine, decode("deleteBlocks", json!({"blockIds": ["c"]}))).unwrap();
    assert_eq!(applied.data["blockIds"], json!(["c"]));
}

#[test]
fn views_round_trip_through_dispatch() {
    let mut engine = engine_with_blocks(&[]);
    let saved = apply(
        &mut engine,
        decode(
            "saveView",
            json!({"viewConfig": {"id": "v1", "name": "Board", "type": "table", "columnFieldIds": [], "filters": []}}),
        ),
    )
    .unwrap();
    assert_eq!(saved.data["viewConfig"], json!({"id": "v1", "name": "Board", "type": "table", "columnFieldIds": []}));

    let loaded = apply(&mut engine, decode("loadView", json!({"viewId": "v1"}))).unwrap();
    assert_eq!(loaded.scope, Scope::Caller);
    assert_eq!(loaded.data["viewConfig"]["filters"], json!([]));

    let err = apply(&mut engine, decode("loadView", json!({"viewId": "nope"}))).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[test]
fn field_on_blocks_null_clears() {
    let mut engine = engine_with_blocks(&["a"]);
    engine.board.fields.insert(
        "f".into(),
        FieldDefinition {
            id: "f".into(),
            name: "Note".into(),
            field_type: crate::model::FieldType::Textbox,
            possible_value_ids: vec![],
            source_type: crate::model::FieldSourceType::Block,
        },
    );

    apply(&mut engine, decode("setFieldOnBlocks", json!({"fieldId": "f", "blockIdToFieldValue": {"a": "x"}}))).unwrap();
    assert_eq!(engine.board().blocks["a"].field_values["f"], FieldValue::Single("x".into()));

    let applied =
        apply(&mut engine, decode("setFieldOnBlocks", json!({"fieldId": "f", "blockIdToFieldValue": {"a": null}})))
            .unwrap();
    assert_eq!(applied.data["blockIdToFieldValue"], json!({"a": null}));
    assert!(engine.board().blocks["a"].field_values.is_empty());
}
