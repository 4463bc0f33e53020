use std::sync::Arc;
use std::time::Duration;

use timedcache::credentials::{CredentialCache, CredentialKey, CredentialType};
use timedcache::registry::Registry;
use timedcache::{Loader, ReadType, TimedCache};

use crate::{Counter, VirtualMachine, setup, vm_loader};

type VmLoader = Box<dyn Loader<Value = VirtualMachine>>;
type CacheFactory = Arc<dyn Fn(&Counter) -> TimedCache<VmLoader> + Send + Sync>;

#[tokio::test(start_paused = true)]
async fn test_injected_registry() {
    setup();
    let registry = Registry::<CacheFactory>::new();
    registry.register(
        "vms",
        Arc::new(|counter: &Counter| {
            let loader: VmLoader = Box::new(vm_loader(counter, Duration::ZERO));
            TimedCache::new("vms", Duration::from_secs(5), loader, false).unwrap()
        }),
    );

    let counter = Counter::default();
    let factory = registry.get("vms").unwrap();
    let cache = factory(&counter);
    cache.get("vm1", ReadType::Default).await.unwrap();
    cache.get("vm1", ReadType::Default).await.unwrap();
    assert_eq!(counter.get(), 1);
    assert!(registry.get("disks").is_none());
}

#[test]
fn test_credentials_per_tenant() {
    let credentials = CredentialCache::new();
    let key = |tenant: &str| {
        CredentialKey::builder("https://login.example.com/", CredentialType::ClientSecret)
            .tenant_id(tenant)
            .client_id("cloud-controller")
            .secret("s3cr3t")
            .build()
    };

    let a = credentials
        .get_or_store(&key("tenant-a"), || Ok::<_, ()>("token-a".to_owned()))
        .unwrap();
    let b = credentials
        .get_or_store(&key("tenant-b"), || Ok::<_, ()>("token-b".to_owned()))
        .unwrap();
    let a_again = credentials
        .get_or_store(&key("tenant-a"), || Ok::<_, ()>("unused".to_owned()))
        .unwrap();

    assert_eq!(*a, "token-a");
    assert_eq!(*b, "token-b");
    assert!(Arc::ptr_eq(&a, &a_again));
    assert_eq!(credentials.len(), 2);
}
