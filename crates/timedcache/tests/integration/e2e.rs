use std::sync::Arc;
use std::time::Duration;

use timedcache::config::Config;
use timedcache::{ReadType, TimedCache};
use tokio::time::{self, Instant};

use crate::{Counter, setup, vm_loader};

#[tokio::test(start_paused = true)]
async fn test_ttl_scenario() {
    setup();
    let counter = Counter::default();
    let cache = TimedCache::new(
        "vms",
        Duration::from_millis(100),
        vm_loader(&counter, Duration::ZERO),
        false,
    )
    .unwrap();
    let start = Instant::now();

    cache.get("vm1", ReadType::Default).await.unwrap();
    time::sleep_until(start + Duration::from_millis(50)).await;
    cache.get("vm1", ReadType::Default).await.unwrap();
    assert_eq!(counter.get(), 1);

    time::sleep_until(start + Duration::from_millis(150)).await;
    let vm = cache.get("vm1", ReadType::Default).await.unwrap().unwrap();
    assert_eq!(counter.get(), 2);
    assert_eq!(vm.tags[0].1, "vm1-team");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stampede_across_threads() {
    setup();
    let counter = Counter::default();
    let cache = TimedCache::new(
        "vms",
        Duration::from_secs(60),
        vm_loader(&counter, Duration::from_millis(200)),
        false,
    )
    .unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(64));
    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                cache.get("vm1", ReadType::Default).await
            })
        })
        .collect();

    let vms: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|task| task.unwrap().unwrap().unwrap())
        .collect();
    assert_eq!(counter.get(), 1);
    assert!(vms.iter().all(|vm| Arc::ptr_eq(vm, &vms[0])));
}

#[tokio::test(start_paused = true)]
async fn test_configured_caches() {
    setup();
    let dir = std::env::temp_dir().join(format!("timedcache-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.yml");
    std::fs::write(
        &path,
        r#"
caches:
  vms:
    ttl: 1s
  disks:
    disabled: true
"#,
    )
    .unwrap();
    let config = Config::get(Some(path.as_path())).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    let counter = Counter::default();
    let vms =
        TimedCache::from_config("vms", &config.cache("vms"), vm_loader(&counter, Duration::ZERO))
            .unwrap();
    let disks = TimedCache::from_config(
        "disks",
        &config.cache("disks"),
        vm_loader(&counter, Duration::ZERO),
    )
    .unwrap();

    vms.get("vm1", ReadType::Default).await.unwrap();
    vms.get("vm1", ReadType::Default).await.unwrap();
    assert_eq!(counter.get(), 1);
    assert!(disks.is_disabled());
    disks.get("disk1", ReadType::Default).await.unwrap();
    disks.get("disk1", ReadType::Default).await.unwrap();
    assert_eq!(counter.get(), 3);

    time::advance(Duration::from_secs(1)).await;
    vms.get("vm1", ReadType::Default).await.unwrap();
    assert_eq!(counter.get(), 4);
}
