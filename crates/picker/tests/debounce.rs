#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use fleet_api::{FleetApi, MockApi};
use fleet_core::selection::ReferenceKind;
use fleet_picker::{spawn_picker, Picker, PickerConfig};
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn quick_edits_coalesce_into_one_fetch_with_last_text() {
    let api = Arc::new(MockApi::new().with_coordinates(30));
    let (handle, reader) = spawn_picker(
        api.clone() as Arc<dyn FleetApi>,
        Picker::new(ReferenceKind::COORDINATES, false),
        PickerConfig::default(),
        None,
    );
    reader.wait_until(|v| !v.loading).await.unwrap();
    assert_eq!(api.searches().len(), 1);

    handle.input("1");
    sleep(Duration::from_millis(100)).await;
    handle.input("12");
    sleep(Duration::from_millis(100)).await;
    handle.input("  12, 1 ");
    sleep(Duration::from_millis(299)).await;
    assert_eq!(api.searches().len(), 1);

    sleep(Duration::from_millis(2)).await;
    let searches = api.searches();
    assert_eq!(searches.len(), 2);
    assert_eq!(searches[1].1, "12, 1");
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn spaced_edits_each_fetch() {
    let api = Arc::new(MockApi::new().with_coordinates(30));
    let cfg = PickerConfig { debounce: Duration::from_millis(300), limit: 5 };
    let (handle, reader) = spawn_picker(
        api.clone() as Arc<dyn FleetApi>,
        Picker::new(ReferenceKind::COORDINATES, false),
        cfg,
        None,
    );
    reader.wait_until(|v| !v.loading).await.unwrap();

    handle.input("2");
    sleep(Duration::from_millis(350)).await;
    handle.input("3");
    sleep(Duration::from_millis(350)).await;

    let queries: Vec<_> = api.searches().into_iter().map(|(_, q, limit)| (q, limit)).collect();
    assert_eq!(queries, vec![(String::new(), 5), ("2".to_string(), 5), ("3".to_string(), 5)]);
    let view = reader.wait_until(|v| !v.loading).await.unwrap();
    assert!(view.suggestions.len() <= 5);
    handle.shutdown();
}
