use testcontainers::{clients, core::WaitFor, GenericImage};
use yieldline_ingest::{
    cursor::{PersistenceClient, PersistenceClientTrait, RedisPersistence},
    Checkpoint, CursorStore,
};

pub fn new_redis_image() -> GenericImage {
    GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout(
            "Ready to accept connections tcp",
        ))
}

#[tokio::test]
#[ignore]
async fn test_single_source() {
    let docker = clients::Cli::default();
    let redis = docker.run(new_redis_image());
    let redis_port = redis.get_host_port_ipv4(6379);
    let redis_url = format!("redis://localhost:{}", redis_port);

    let persistence = RedisPersistence::connect(&redis_url, "test")
        .await
        .unwrap();

    assert!(persistence.get_checkpoint("lido").await.unwrap().is_none());

    persistence
        .put_checkpoint(&Checkpoint::new("lido", 1_700_000_000))
        .await
        .unwrap();
    assert_eq!(
        persistence.get_checkpoint("lido").await.unwrap(),
        Some(1_700_000_000)
    );

    persistence.delete_checkpoint("lido").await.unwrap();
    assert!(persistence.get_checkpoint("lido").await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_prefixes_and_sources_are_independent() {
    let docker = clients::Cli::default();
    let redis = docker.run(new_redis_image());
    let redis_port = redis.get_host_port_ipv4(6379);
    let redis_url = format!("redis://localhost:{}", redis_port);

    let first = RedisPersistence::connect(&redis_url, "first")
        .await
        .unwrap();
    let second = RedisPersistence::connect(&redis_url, "second")
        .await
        .unwrap();

    first
        .put_checkpoint(&Checkpoint::new("aave", 100))
        .await
        .unwrap();
    assert!(second.get_checkpoint("aave").await.unwrap().is_none());

    second
        .put_checkpoint(&Checkpoint::new("aave", 200))
        .await
        .unwrap();
    first
        .put_checkpoint(&Checkpoint::new("lido", 300))
        .await
        .unwrap();

    let store = CursorStore::new(PersistenceClient::Redis(first)).with_genesis("curve", 42);
    assert_eq!(store.get("aave").await.unwrap(), 100);
    assert_eq!(store.get("lido").await.unwrap(), 300);
    assert_eq!(store.get("curve").await.unwrap(), 42);
    assert_eq!(second.get_checkpoint("aave").await.unwrap(), Some(200));
}
