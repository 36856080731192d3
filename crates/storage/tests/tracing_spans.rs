//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on `MemoryBackend` and tenant storage operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use sessionkit_storage::{
    KvMultitenancyStorage, MemoryBackend, MultitenancyStorage, StorageBackend, TenantConfig,
    TenantIdentifier,
};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.set(b"key-1".to_vec(), b"value-1".to_vec()).await.expect("set should succeed");
    let _ = backend.get(b"key-1").await;
    backend
        .compare_and_set(b"key-1", Some(b"value-1"), b"value-2".to_vec())
        .await
        .expect("cas should succeed");
    backend.delete(b"key-1").await.expect("delete should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["set", "get", "compare_and_set", "delete"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn tenant_writes_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let storage = KvMultitenancyStorage::new(MemoryBackend::new());
    let config = TenantConfig::new(TenantIdentifier::new(None, Some("a1"), None));
    storage.create_tenant(&config).await.expect("create should succeed");
    storage.overwrite_tenant_config(&config).await.expect("overwrite should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["create_tenant", "overwrite_tenant_config"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}
