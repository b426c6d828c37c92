//! Redis cache backend tests against a real server.

use pollwatch::cache::{CacheBackend, CacheService, RedisCache};
use pollwatch::config::CacheConfig;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage};

async fn start_redis() -> (ContainerAsync<GenericImage>, String) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.into())
        .start()
        .await
        .expect("Failed to start Redis container");
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    (container, format!("redis://127.0.0.1:{}", port))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redis_set_get_delete() {
    let (_container, url) = start_redis().await;
    let cache = RedisCache::connect(&url).await.unwrap();

    assert_eq!(cache.get("missing").await.unwrap(), None);

    cache
        .set("k1", "v1".to_string(), Duration::from_secs(60))
        .await
        .unwrap();
    cache.set("k2", "v2".to_string(), Duration::ZERO).await.unwrap();
    assert_eq!(cache.get("k1").await.unwrap().as_deref(), Some("v1"));
    assert_eq!(cache.get("k2").await.unwrap().as_deref(), Some("v2"));

    cache.delete("k1").await.unwrap();
    assert_eq!(cache.get("k1").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redis_delete_prefix_only_touches_namespace() {
    let (_container, url) = start_redis().await;
    let cache = RedisCache::connect(&url).await.unwrap();

    for i in 0..250 {
        cache
            .set(&format!("pollwatch:key-{}", i), "x".to_string(), Duration::ZERO)
            .await
            .unwrap();
    }
    cache
        .set("other:key", "y".to_string(), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(cache.delete_prefix("pollwatch:").await.unwrap(), 250);
    assert_eq!(cache.get("pollwatch:key-0").await.unwrap(), None);
    assert_eq!(cache.get("other:key").await.unwrap().as_deref(), Some("y"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cache_service_over_redis() {
    let (_container, url) = start_redis().await;
    let config = CacheConfig {
        redis_url: Some(url.clone()),
        ..CacheConfig::default()
    };
    let cache = CacheService::from_config(&config).await.unwrap();

    let first: Vec<i32> = cache
        .get_or_compute("polling-station-5-1", || async { Ok::<_, anyhow::Error>(vec![17]) })
        .await
        .unwrap();
    let second: Vec<i32> = cache
        .get_or_compute("polling-station-5-1", || async { Ok::<_, anyhow::Error>(vec![99]) })
        .await
        .unwrap();
    assert_eq!(first, vec![17]);
    assert_eq!(second, vec![17]);

    let raw = RedisCache::connect(&url).await.unwrap();
    assert!(raw
        .get("pollwatch:polling-station-5-1")
        .await
        .unwrap()
        .is_some());

    assert_eq!(cache.invalidate_all().await.unwrap(), 1);
    assert!(raw
        .get("pollwatch:polling-station-5-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redis_delete_prefix_fails_when_keys_survive() {
    let (_container, url) = start_redis().await;
    let cache = RedisCache::connect(&url).await.unwrap();
    for i in 0..3 {
        cache
            .set(&format!("pollwatch:key-{}", i), "x".to_string(), Duration::ZERO)
            .await
            .unwrap();
    }

    // A user that may SCAN but not DEL
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("ACL")
        .arg("SETUSER")
        .arg("no-del")
        .arg("on")
        .arg(">secret")
        .arg("~*")
        .arg("+@all")
        .arg("-del")
        .query_async(&mut conn)
        .await
        .unwrap();

    let restricted_url = url.replacen("redis://", "redis://no-del:secret@", 1);
    let restricted = RedisCache::connect(&restricted_url).await.unwrap();

    let err = restricted.delete_prefix("pollwatch:").await.unwrap_err();
    assert!(err.to_string().contains("3 keys"));
    assert!(cache.get("pollwatch:key-0").await.unwrap().is_some());
}
