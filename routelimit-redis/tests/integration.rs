use routelimit::request::RequestInfo;
use routelimit::{LimitSpec, RateLimiter, TatStore};
use routelimit_redis::{RedisStore, RedisStoreConfig};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Requires a Redis or Valkey server. If ROUTELIMIT_TEST_REDIS_URL is unset, the tests skip.
fn server_url() -> Option<String> {
    match std::env::var("ROUTELIMIT_TEST_REDIS_URL") {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("skipping: set ROUTELIMIT_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379/0)");
            None
        }
    }
}

fn unique_prefix() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("routelimit-test:{nanos}:")
}

#[tokio::test]
async fn get_set_round_trip() {
    let Some(url) = server_url() else { return };
    let store = RedisStore::with_config(
        url,
        RedisStoreConfig { key_prefix: unique_prefix(), expire_after_drain: true },
    );
    store.open().await.unwrap_or_else(|e| panic!("failed to connect: {e}"));

    let now = SystemTime::now();
    assert_eq!(store.get("missing", now).await.expect("get"), now);

    let tat = now + Duration::from_secs(5);
    store.set("k", tat).await.expect("set");
    let read = store.get("k", now).await.expect("get");
    let drift = read.duration_since(tat).unwrap_or_else(|e| e.duration());
    assert!(drift < Duration::from_millis(1));

    store.close().await.expect("close");
    assert!(!store.is_open());
}

#[tokio::test]
async fn limiter_over_shared_store() {
    let Some(url) = server_url() else { return };
    let store = Arc::new(RedisStore::with_config(
        url,
        RedisStoreConfig { key_prefix: unique_prefix(), ..RedisStoreConfig::default() },
    ));
    let limiter = RateLimiter::builder().shared_store(store.clone()).build();
    limiter.registry().attach("index", LimitSpec::single(1, Duration::from_secs(30))).unwrap();
    limiter.open().await.expect("open");

    let req = Arc::new(RequestInfo::for_endpoint("index"));
    limiter.before_request(&req).await.expect("first request admitted");
    let err = limiter.before_request(&req).await.expect_err("second request rejected");
    assert!(err.retry_after().unwrap() >= 1);

    limiter.close().await.expect("close");
}

#[tokio::test]
async fn overlapping_opens_keep_one_connection() {
    let Some(url) = server_url() else { return };
    let store = Arc::new(RedisStore::with_config(
        url,
        RedisStoreConfig { key_prefix: unique_prefix(), ..RedisStoreConfig::default() },
    ));
    let (a, b) = tokio::join!(store.open(), store.open());
    a.expect("first open");
    b.expect("second open");
    assert!(store.is_open());

    let now = SystemTime::now();
    store.set("k", now + Duration::from_secs(1)).await.expect("set");
    store.close().await.expect("close");
    assert!(!store.is_open());
}
