use oxide_relay::bot::views::{render_status, DefaultRelayView};
use oxide_relay::testing::{media, FakeGateway, MemoryStore};
use oxide_relay::transfer::{
    PublishedViews, StatusView, Transfer, TransferContext, TransferId, TransferOutcome,
    TransferRegistry, TransferSupervisor, TransferWorker,
};
use std::sync::Arc;
use std::time::Duration;

const MIB: usize = 1024 * 1024;
const BASE: &str = "https://files.example.com";

fn context(store: Arc<MemoryStore>, registry: Arc<TransferRegistry>) -> TransferContext {
    TransferContext::new(store, registry, PublishedViews::new(60, 100), BASE)
}

fn ten_mib_in_chunks() -> Vec<Vec<u8>> {
    (0u8..10).map(|i| vec![i; MIB]).collect()
}

#[tokio::test]
async fn ten_megabyte_file_is_published_with_encoded_link() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(TransferRegistry::new());
    let ctx = context(store.clone(), registry.clone());
    let gateway = Arc::new(FakeGateway::with_chunks(ten_mib_in_chunks()));

    let transfer = Transfer::new(
        TransferId(100),
        media("holiday video #1.mp4", 10_485_760),
        dir.path(),
        0,
    );
    let staging = transfer.staging_path.clone();
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(transfer, ctx.clone(), gateway.clone(), token)
        .run()
        .await;

    let TransferOutcome::Published(artifact) = outcome else {
        panic!("expected publish, got {outcome:?}");
    };
    assert_eq!(artifact.size, 10_485_760);
    assert_eq!(
        artifact.url,
        "https://files.example.com/holiday%20video%20%231.mp4"
    );
    assert_eq!(store.object_size("holiday video #1.mp4"), Some(10_485_760));

    let last = gateway.last_view().expect("terminal view");
    let (text, _) = render_status::<DefaultRelayView>(TransferId(100), &last);
    assert!(text.contains("10.0 MB"), "unexpected text: {text}");
    assert!(text.contains("holiday%20video%20%231.mp4"));

    let samples = gateway.progress_samples();
    assert_eq!(samples.len(), 10);
    assert_eq!(samples.last().copied(), Some(10_485_760));
    assert!(gateway.views().contains(&StatusView::Uploading));

    assert!(!staging.exists());
    assert!(!registry.is_cancelled(&TransferId(100)).await);
    assert!(!registry.contains(&TransferId(100)).await);
    assert!(ctx.published.get(&TransferId(100)).await.is_some());
}

#[tokio::test]
async fn cancel_after_three_chunks_stops_before_the_fourth() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(TransferRegistry::new());
    let gateway = Arc::new(
        FakeGateway::with_chunks(ten_mib_in_chunks()).cancel_after(
            registry.clone(),
            TransferId(7),
            3 * MIB as u64,
        ),
    );

    let transfer = Transfer::new(TransferId(7), media("big.iso", 10_485_760), dir.path(), 0);
    let staging = transfer.staging_path.clone();
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(
        transfer,
        context(store.clone(), registry.clone()),
        gateway.clone(),
        token,
    )
    .run()
    .await;

    assert_eq!(outcome, TransferOutcome::Cancelled);
    assert_eq!(
        gateway.progress_samples(),
        vec![MIB as u64, 2 * MIB as u64, 3 * MIB as u64]
    );
    assert!(gateway.delivered() <= 4, "stream was drained after cancel");
    assert_eq!(store.put_calls(), 0);
    assert_eq!(store.delete_calls(), 1);
    assert!(store.keys().is_empty());
    assert!(!staging.exists());
    assert_eq!(gateway.last_view(), Some(StatusView::Cancelled));
    assert!(!registry.contains(&TransferId(7)).await);
}

#[tokio::test]
async fn resolution_failure_ends_failed_without_staging_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(TransferRegistry::new());
    let gateway = Arc::new(
        FakeGateway::with_chunks(ten_mib_in_chunks()).failing_resolve("file is too big"),
    );

    let transfer = Transfer::new(TransferId(8), media("big.iso", 10_485_760), dir.path(), 0);
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(
        transfer,
        context(store.clone(), registry.clone()),
        gateway.clone(),
        token,
    )
    .run()
    .await;

    assert!(matches!(outcome, TransferOutcome::Failed(ref r) if r.contains("file is too big")));
    assert_eq!(gateway.delivered(), 0);
    let staged: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read staging dir")
        .collect();
    assert!(staged.is_empty());
    assert!(matches!(gateway.last_view(), Some(StatusView::Failed(_))));
    assert!(!registry.is_cancelled(&TransferId(8)).await);
}

#[tokio::test]
async fn connection_drop_mid_download_cleans_up_partial_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(TransferRegistry::new());
    let gateway = Arc::new(
        FakeGateway::with_chunks(ten_mib_in_chunks()).failing_after(2, "connection reset"),
    );

    let transfer = Transfer::new(TransferId(12), media("big.iso", 10_485_760), dir.path(), 0);
    let staging = transfer.staging_path.clone();
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(
        transfer,
        context(store.clone(), registry.clone()),
        gateway.clone(),
        token,
    )
    .run()
    .await;

    assert!(
        matches!(outcome, TransferOutcome::Failed(ref r) if r.contains("connection reset")),
        "unexpected outcome: {outcome:?}"
    );
    assert_eq!(
        gateway.progress_samples(),
        vec![MIB as u64, 2 * MIB as u64]
    );
    assert!(!staging.exists());
    assert!(!registry.contains(&TransferId(12)).await);
    assert_eq!(store.put_calls(), 0);
    assert_eq!(store.delete_calls(), 1);
    assert!(matches!(gateway.last_view(), Some(StatusView::Failed(_))));
}

#[tokio::test]
async fn unwritable_staging_dir_fails_and_clears_registry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("gone");
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(TransferRegistry::new());
    let gateway = Arc::new(FakeGateway::with_chunks(ten_mib_in_chunks()));

    let transfer = Transfer::new(TransferId(13), media("big.iso", 10_485_760), &missing, 0);
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(
        transfer,
        context(store.clone(), registry.clone()),
        gateway.clone(),
        token,
    )
    .run()
    .await;

    assert!(matches!(outcome, TransferOutcome::Failed(_)));
    assert!(!missing.exists());
    assert!(!registry.contains(&TransferId(13)).await);
    assert_eq!(store.delete_calls(), 1);
    assert!(matches!(gateway.last_view(), Some(StatusView::Failed(_))));
}

#[tokio::test]
async fn upload_failure_cleans_up_and_reports() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default().failing_puts("bucket is read-only"));
    let registry = Arc::new(TransferRegistry::new());
    let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![1u8; 100]]));

    let transfer = Transfer::new(TransferId(9), media("notes.txt", 100), dir.path(), 0);
    let staging = transfer.staging_path.clone();
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(
        transfer,
        context(store.clone(), registry.clone()),
        gateway.clone(),
        token,
    )
    .run()
    .await;

    assert!(matches!(outcome, TransferOutcome::Failed(_)));
    assert_eq!(store.delete_calls(), 1);
    assert!(!staging.exists());
    assert!(!registry.contains(&TransferId(9)).await);
}

#[tokio::test]
async fn cancel_during_multipart_upload_stops_before_next_part() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = Arc::new(TransferRegistry::new());
    let store = Arc::new(
        MemoryStore::default()
            .multipart(MIB)
            .cancel_on_put(registry.clone(), TransferId(14)),
    );
    let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![3u8; MIB]; 3]));

    let transfer = Transfer::new(
        TransferId(14),
        media("parts.bin", 3 * MIB as u64),
        dir.path(),
        0,
    );
    let staging = transfer.staging_path.clone();
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(
        transfer,
        context(store.clone(), registry.clone()),
        gateway.clone(),
        token,
    )
    .run()
    .await;

    assert_eq!(outcome, TransferOutcome::Cancelled);
    assert_eq!(store.put_calls(), 1);
    assert_eq!(store.part_calls(), 1);
    assert_eq!(store.abort_calls(), 1);
    assert_eq!(store.delete_calls(), 1);
    assert!(store.keys().is_empty());
    assert!(!staging.exists());
    assert!(!registry.contains(&TransferId(14)).await);
    assert_eq!(gateway.last_view(), Some(StatusView::Cancelled));
}

#[tokio::test]
async fn multipart_upload_publishes_whole_object() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = Arc::new(TransferRegistry::new());
    let store = Arc::new(MemoryStore::default().multipart(MIB));
    let gateway = Arc::new(FakeGateway::with_chunks(ten_mib_in_chunks()));

    let transfer = Transfer::new(TransferId(15), media("big.iso", 10_485_760), dir.path(), 0);
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(transfer, context(store.clone(), registry), gateway, token)
        .run()
        .await;

    assert!(matches!(outcome, TransferOutcome::Published(ref a) if a.size == 10_485_760));
    assert_eq!(store.part_calls(), 10);
    assert_eq!(store.abort_calls(), 0);
    assert_eq!(store.object_size("big.iso"), Some(10_485_760));
}

#[tokio::test]
async fn unknown_declared_size_reports_zero_percent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(TransferRegistry::new());
    let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![5u8; MIB], vec![6u8; 10]]));

    let transfer = Transfer::new(TransferId(11), media("stream.bin", 0), dir.path(), 0);
    let token = registry.register(transfer.id).await;

    let outcome = TransferWorker::new(
        transfer,
        context(store.clone(), registry.clone()),
        gateway.clone(),
        token,
    )
    .run()
    .await;

    assert!(matches!(outcome, TransferOutcome::Published(ref a) if a.size == (MIB + 10) as u64));
    for view in gateway.views() {
        if let StatusView::Downloading {
            progress: Some(p), ..
        } = view
        {
            assert!(p.percent.abs() < f64::EPSILON);
            assert_eq!(p.eta_secs, 0);
        }
    }
}

#[tokio::test]
async fn concurrent_transfers_with_equal_names_do_not_collide() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default());
    let supervisor = TransferSupervisor::new(context(
        store.clone(),
        Arc::new(TransferRegistry::new()),
    ));

    let mut handles = Vec::new();
    for id in 1..=4 {
        let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![1u8; 64 * 1024]; 3]));
        let transfer = Transfer::new(TransferId(id), media("same.bin", 3 * 64 * 1024), dir.path(), 0);
        let handle = supervisor.spawn(transfer, gateway).await;
        handles.push(handle.expect("accepting transfers"));
    }

    for handle in handles {
        let outcome = handle.await.expect("worker panicked");
        assert!(matches!(outcome, TransferOutcome::Published(_)));
    }
    assert_eq!(store.object_size("same.bin"), Some(3 * 64 * 1024));
    assert_eq!(supervisor.registry().active_count().await, 0);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_transfers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::default());
    let supervisor = TransferSupervisor::new(context(
        store.clone(),
        Arc::new(TransferRegistry::new()),
    ));

    let gateway = Arc::new(FakeGateway::with_chunks(ten_mib_in_chunks()).paused());
    let transfer = Transfer::new(TransferId(42), media("late.bin", 10_485_760), dir.path(), 0);
    let handle = supervisor
        .spawn(transfer, gateway.clone())
        .await
        .expect("accepting transfers");

    let shutdown = supervisor.shutdown(Duration::from_secs(5));
    gateway.resume();
    assert!(shutdown.await);

    assert_eq!(handle.await.ok(), Some(TransferOutcome::Cancelled));
    assert_eq!(gateway.last_view(), Some(StatusView::Cancelled));
    assert!(store.keys().is_empty());
}
