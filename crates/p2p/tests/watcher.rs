use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use peershare_p2p::{ChangeWatcher, ReannounceHook};
use tokio::time::sleep;

#[derive(Default)]
struct CountingHook {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ReannounceHook for CountingHook {
    async fn reannounce(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("tracker unreachable");
        }
        Ok(())
    }
}

#[tokio::test]
async fn burst_of_changes_triggers_one_reannounce() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hook = Arc::new(CountingHook::default());
    let watcher = ChangeWatcher::start(dir.path(), Duration::from_secs(1), hook.clone())
        .expect("watcher starts");

    for i in 0..10 {
        std::fs::write(dir.path().join(format!("file-{i}.txt")), b"data").expect("write file");
    }
    sleep(Duration::from_millis(500)).await;
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(800)).await;
    std::fs::remove_file(dir.path().join("file-0.txt")).expect("remove file");
    sleep(Duration::from_millis(500)).await;
    assert_eq!(hook.calls.load(Ordering::SeqCst), 2);

    watcher.stop().await;
}

#[tokio::test]
async fn hook_errors_do_not_stop_the_watcher() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hook = Arc::new(CountingHook {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let watcher = ChangeWatcher::start(dir.path(), Duration::from_millis(100), hook.clone())
        .expect("watcher starts");

    std::fs::write(dir.path().join("a.txt"), b"a").expect("write file");
    sleep(Duration::from_millis(400)).await;
    std::fs::write(dir.path().join("b.txt"), b"b").expect("write file");
    sleep(Duration::from_millis(400)).await;

    assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
    watcher.stop().await;
}

#[tokio::test]
async fn stopped_watcher_ignores_changes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hook = Arc::new(CountingHook::default());
    let watcher = ChangeWatcher::start(dir.path(), Duration::from_millis(100), hook.clone())
        .expect("watcher starts");
    watcher.stop().await;
    drop(watcher);

    std::fs::write(dir.path().join("late.txt"), b"late").expect("write file");
    sleep(Duration::from_millis(300)).await;
    assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
}
