use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use timedcache::{Loader, loader_fn};

pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter("timedcache=trace")
        .with_test_writer()
        .try_init()
        .ok();
}

/// A virtual machine as the remote API describes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualMachine {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

/// Counts calls to the remote side.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A loader for [`VirtualMachine`]s that takes `latency` per call.
pub fn vm_loader(
    counter: &Counter,
    latency: Duration,
) -> impl Loader<Value = VirtualMachine> + use<> {
    let counter = counter.clone();
    loader_fn(move |name: String| {
        let counter = counter.clone();
        async move {
            counter.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            anyhow::Ok(Some(VirtualMachine {
                tags: vec![("owner".into(), format!("{name}-team"))],
                name,
            }))
        }
    })
}
