//! The ambient default store.
//!
//! Kept in its own test binary: the default store is process-wide and the
//! other suites rely on it being absent.

use livebind::{
    clear_default, connect, default_store, initialize_default, ConnectError, Context, MemoryStore,
    MemoryStoreConfig, Prop, Projection, Props, StoreHandle, STORE_PROP,
};
use serde_json::json;

#[test]
fn test_default_store_lifecycle() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let ambient = MemoryStore::with_data(
        MemoryStoreConfig {
            name: "ambient".into(),
            immediate_delivery: true,
        },
        json!({"greeting": "hello"}),
    );
    let handle = StoreHandle::new(ambient.clone());
    assert!(initialize_default(handle.clone()).is_none());
    assert!(default_store().unwrap().same_store(&handle));

    let connector = connect(Projection::fixed(json!({"greeting": "greeting"})));

    // Falls back to the ambient store.
    let mut connected = connector.bind(Props::new(), &Context::new()).unwrap();
    assert!(connected.store().same_store(&handle));
    connected.on_mount().unwrap();
    assert_eq!(connected.render().unwrap()["greeting"], Prop::from("hello"));
    assert_eq!(ambient.listener_count(), 1);
    connected.on_unmount();
    assert_eq!(ambient.listener_count(), 0);

    // Context and props still take precedence.
    let from_context = StoreHandle::new(MemoryStore::new(MemoryStoreConfig::default()));
    let connected = connector
        .bind(Props::new(), &Context::with_store(from_context.clone()))
        .unwrap();
    assert!(connected.store().same_store(&from_context));

    let from_prop = StoreHandle::new(MemoryStore::new(MemoryStoreConfig::default()));
    let mut props = Props::new();
    props.insert(STORE_PROP.into(), Prop::Store(from_prop.clone()));
    let connected = connector
        .bind(props, &Context::with_store(from_context))
        .unwrap();
    assert!(connected.store().same_store(&from_prop));

    // Replacing returns the previous store; clearing leaves nothing behind.
    let replacement = StoreHandle::new(MemoryStore::new(MemoryStoreConfig::default()));
    assert!(initialize_default(replacement.clone())
        .unwrap()
        .same_store(&handle));
    assert!(clear_default().unwrap().same_store(&replacement));
    assert!(default_store().is_none());
    assert!(matches!(
        connector.bind(Props::new(), &Context::new()),
        Err(ConnectError::NoStore)
    ));
}
