#![forbid(unsafe_code)]

use std::sync::Arc;

use fleet_api::{FleetApi, MockApi};
use fleet_core::selection::{ReferenceKind, Selection};
use fleet_core::{Collection, Row};
use fleet_picker::{spawn_picker, Picker, PickerConfig, PickerState};
use serde_json::json;
use tokio::sync::mpsc;

#[test]
fn exact_label_commits_and_unknown_text_clears() {
    let mut p = Picker::new(ReferenceKind::COORDINATES, true);
    let req = p.mount();
    assert_eq!(req.query, "");
    p.apply_suggestions(req.seq, vec![Row::from(json!({"id": 1, "x": 10, "y": 20}))]);

    p.input("10, 20");
    let sel = p.blur();
    assert_eq!(serde_json::to_value(&sel).unwrap(), json!({"id": 1, "x": 10, "y": 20}));
    assert_eq!(p.state(), PickerState::Matched);
    assert!(!p.is_invalid());

    p.input("99, 99");
    let sel = p.blur();
    assert_eq!(serde_json::to_value(&sel).unwrap(), json!({"id": null, "x": null, "y": null}));
    assert_eq!(p.state(), PickerState::Unmatched);
    assert!(p.is_invalid());
}

#[test]
fn untouched_required_field_is_not_invalid() {
    let mut p = Picker::new(ReferenceKind::COORDINATES, true);
    p.input("99, 99");
    assert!(!p.is_invalid());
    p.blur();
    assert!(p.is_invalid());
    let mut optional = Picker::new(ReferenceKind::COORDINATES, false);
    optional.input("99, 99");
    optional.blur();
    assert!(!optional.is_invalid());
}

#[test]
fn person_labels_use_full_name() {
    let mut p = Picker::new(ReferenceKind::PERSON, false);
    let req = p.mount();
    p.apply_suggestions(req.seq, vec![Row::from(json!({"id": 4, "fullName": "Ada Lovelace", "vehiclesCount": 2}))]);
    p.input("Ada Lovelace");
    let sel = p.blur();
    assert_eq!(sel.id, Some(4));
    assert_eq!(sel.fields.get("fullName"), Some(&json!("Ada Lovelace")));
    assert!(sel.fields.get("vehiclesCount").is_none());
}

#[tokio::test(start_paused = true)]
async fn blur_sends_selection_to_change_sink() {
    let api = Arc::new(MockApi::new().with_rows(
        Collection::Coordinates,
        vec![Row::from(json!({"id": 1, "x": 10, "y": 20})), Row::from(json!({"id": 2, "x": 11, "y": 20}))],
    ));
    let (tx, mut changes) = mpsc::unbounded_channel();
    let (handle, reader) = spawn_picker(
        api.clone() as Arc<dyn FleetApi>,
        Picker::new(ReferenceKind::COORDINATES, true),
        PickerConfig::default(),
        Some(tx),
    );
    reader.wait_until(|v| !v.loading && v.suggestions.len() == 2).await.unwrap();
    assert_eq!(api.searches(), vec![(Collection::Coordinates, String::new(), 20)]);

    handle.input("10, 20");
    handle.blur();
    let sel = changes.recv().await.unwrap();
    assert_eq!(sel.id, Some(1));
    let view = reader.wait_until(|v| v.state == PickerState::Matched).await.unwrap();
    assert_eq!(view.description, "selected id = 1");

    handle.set_value(Selection::cleared(&ReferenceKind::COORDINATES));
    let view = reader.wait_until(|v| v.state == PickerState::Unset).await.unwrap();
    assert_eq!(view.text, "");
    assert!(view.invalid);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failed_search_degrades_to_no_suggestions() {
    let api = Arc::new(MockApi::new().with_coordinates(5));
    api.fail_search(true);
    let (handle, reader) = spawn_picker(
        api as Arc<dyn FleetApi>,
        Picker::new(ReferenceKind::COORDINATES, false),
        PickerConfig::default(),
        None,
    );
    let view = reader.wait_until(|v| !v.loading).await.unwrap();
    assert!(view.suggestions.is_empty());

    handle.input("1, 10");
    handle.blur();
    let view = reader.wait_until(|v| v.state == PickerState::Unmatched).await.unwrap();
    assert_eq!(view.selection.id, None);
    handle.shutdown();
}
