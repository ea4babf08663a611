//! Debounce-timing behaviour of the coalescer task, under paused tokio
//! time so the tests are deterministic.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use hotsync::watch::event::{CoalescedEvent, EventKind, PathEvent};
use hotsync::watch::spawn_coalescer;

struct Harness {
    tx: mpsc::Sender<PathEvent>,
    batch_rx: mpsc::Receiver<Vec<CoalescedEvent>>,
    // Kept alive so the coalescer does not see a shutdown signal.
    _stop_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

fn harness(window: Duration) -> Harness {
    let (tx, rx) = mpsc::channel(64);
    let (batch_tx, batch_rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = spawn_coalescer(rx, batch_tx, window, stop_rx);
    Harness {
        tx,
        batch_rx,
        _stop_tx: stop_tx,
        task,
    }
}

#[tokio::test(start_paused = true)]
async fn burst_flushes_once_as_the_folded_event() {
    let mut h = harness(Duration::from_millis(300));

    h.tx.send(PathEvent::new("/a/x", EventKind::Create))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.tx.send(PathEvent::new("/a/x", EventKind::Modify))
        .await
        .unwrap();
    h.tx.send(PathEvent::new("/a/x", EventKind::Modify))
        .await
        .unwrap();

    let batch = h.batch_rx.recv().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].path, std::path::PathBuf::from("/a/x"));
    assert_eq!(batch[0].kind, Some(EventKind::Create));

    // Nothing else pending: a generous wait yields no second flush.
    let next = tokio::time::timeout(Duration::from_secs(2), h.batch_rx.recv()).await;
    assert!(next.is_err());
}

#[tokio::test(start_paused = true)]
async fn every_event_resets_the_quiet_period() {
    let mut h = harness(Duration::from_millis(300));
    let started = tokio::time::Instant::now();

    h.tx.send(PathEvent::new("/a/x", EventKind::Create))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.tx.send(PathEvent::new("/a/y", EventKind::Create))
        .await
        .unwrap();

    let batch = h.batch_rx.recv().await.unwrap();
    // The second event re-armed the window, so the flush happens no
    // earlier than 200ms + 300ms after the first send.
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(batch.len(), 1);

    // Both paths come out, in submission order, one group each.
    let second = h.batch_rx.recv().await.unwrap();
    assert_eq!(batch[0].path, std::path::PathBuf::from("/a/x"));
    assert_eq!(second[0].path, std::path::PathBuf::from("/a/y"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_events_never_reach_the_processor() {
    let mut h = harness(Duration::from_millis(100));

    h.tx.send(PathEvent::new("/a/tmp", EventKind::Create))
        .await
        .unwrap();
    h.tx.send(PathEvent::new("/a/tmp", EventKind::Delete))
        .await
        .unwrap();
    h.tx.send(PathEvent::new("/a/kept", EventKind::Modify))
        .await
        .unwrap();

    let batch = h.batch_rx.recv().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].path, std::path::PathBuf::from("/a/kept"));
}

#[tokio::test(start_paused = true)]
async fn closing_the_producer_flushes_the_tail() {
    let h = harness(Duration::from_millis(300));
    let Harness {
        tx,
        mut batch_rx,
        _stop_tx,
        task,
    } = h;

    tx.send(PathEvent::new("/a/x", EventKind::Create))
        .await
        .unwrap();
    drop(tx);

    let batch = batch_rx.recv().await.unwrap();
    assert_eq!(batch[0].kind, Some(EventKind::Create));
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn ancestor_delete_is_emitted_once_for_many_descendants() {
    let mut h = harness(Duration::from_millis(100));

    for name in ["a.txt", "b.txt", "c.txt"] {
        h.tx.send(PathEvent::new(
            format!("/root/dir/{name}"),
            EventKind::Modify,
        ))
        .await
        .unwrap();
    }
    h.tx.send(PathEvent::new("/root/dir", EventKind::Delete))
        .await
        .unwrap();

    let batch = h.batch_rx.recv().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].path, std::path::PathBuf::from("/root/dir"));
    assert_eq!(batch[0].kind, Some(EventKind::Delete));

    let next = tokio::time::timeout(Duration::from_secs(2), h.batch_rx.recv()).await;
    assert!(next.is_err());
}
