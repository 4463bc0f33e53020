use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Deserialize;
use timedcache::registry::Registry;
use timedcache::{Loader, ReadType, loader_fn};

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The number of distinct keys read by the workload.
    pub keys: usize,
    /// How long a single loader call takes.
    #[serde(with = "humantime_serde", default)]
    pub latency: Duration,
    /// The share of loader calls that fail, between `0` and `1`.
    #[serde(default)]
    pub error_rate: f64,
    /// The name of a registered loader, see [`default_loaders`].
    pub loader: String,
    #[serde(default)]
    pub read_type: ReadType,
    /// The name of the cache settings to use from the configuration file.
    #[serde(default = "default_cache")]
    pub cache: String,
}

fn default_cache() -> String {
    "stress".into()
}

/// The value produced by the stress loaders.
#[derive(Clone, Debug)]
pub struct Payload {
    pub key: String,
    pub body: Vec<u8>,
}

pub type StressLoader = Box<dyn Loader<Value = Payload>>;

/// Parameters shared by all loaders of one workload.
#[derive(Clone, Debug, Default)]
pub struct LoaderParams {
    pub latency: Duration,
    pub error_rate: f64,
    pub calls: Arc<AtomicUsize>,
}

impl LoaderParams {
    pub fn new(workload: &Workload) -> Self {
        Self {
            latency: workload.latency,
            error_rate: workload.error_rate,
            calls: Default::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

pub type LoaderFactory = Arc<dyn Fn(&LoaderParams) -> StressLoader + Send + Sync>;

/// Creates the registry of all loaders a workload can refer to.
///
/// - `static`: always finds a value.
/// - `absent`: never finds a value.
/// - `flaky`: like `static`, but fails with the workload's `error_rate`.
pub fn default_loaders() -> Registry<LoaderFactory> {
    let registry = Registry::<LoaderFactory>::new();
    registry.register("static", Arc::new(|params: &LoaderParams| remote(params, true, 0.0)));
    registry.register("absent", Arc::new(|params: &LoaderParams| remote(params, false, 0.0)));
    registry.register(
        "flaky",
        Arc::new(|params: &LoaderParams| remote(params, true, params.error_rate)),
    );
    registry
}

/// Simulates a remote API call.
fn remote(params: &LoaderParams, exists: bool, error_rate: f64) -> StressLoader {
    let params = params.clone();
    Box::new(loader_fn(move |key: String| {
        let params = params.clone();
        async move {
            params.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(params.latency).await;

            if error_rate > 0.0 && rand::random::<f64>() < error_rate {
                anyhow::bail!("remote call for {key} failed");
            }
            if !exists {
                return Ok(None);
            }
            let body = key.as_bytes().repeat(16);
            Ok(Some(Payload { key, body }))
        }
    }))
}
