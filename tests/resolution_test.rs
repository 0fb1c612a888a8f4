// Resolution against a mock hub (mockito)

use chrono::Utc;
use matrix::config::MatrixConfig;
use matrix::resolution::{HubClient, ManualClock, ResolutionCache, Resolver};
use matrix::runtime::{FsStateStore, RunnerDescriptor, RuntimeKind};
use matrix::{Matrix, MatrixError};
use mockito::Matcher;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const UNREACHABLE_HUB: &str = "http://127.0.0.1:1";

fn resolver(dir: &TempDir, local_hub: &str) -> (Resolver, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = ResolutionCache::new(
        Arc::new(FsStateStore::new(dir.path().join("cache")).unwrap()),
        clock.clone(),
        Duration::from_secs(300),
        Duration::from_secs(60),
    );
    let catalog = Arc::new(HubClient::new(None, Duration::from_secs(5)));
    (Resolver::new(catalog, cache, local_hub), clock)
}

fn items(ids: &[&str]) -> String {
    let items: Vec<_> = ids.iter().map(|id| serde_json::json!({ "id": id })).collect();
    serde_json::json!({ "items": items }).to_string()
}

#[tokio::test]
async fn test_cached_within_ttl_then_refreshed() {
    let mut server = mockito::Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let (resolver, clock) = resolver(&dir, UNREACHABLE_HUB);

    let search = server
        .mock("GET", "/catalog/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "hello".into()),
            Matcher::UrlEncoded("type".into(), "mcp_server".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(items(&["mcp_server:hello@0.1.0"]))
        .expect(1)
        .create_async()
        .await;

    let first = resolver.resolve(&server.url(), "hello", false).await.unwrap();
    let second = resolver.resolve(&server.url(), "hello", false).await.unwrap();
    assert_eq!(first.fqid, "mcp_server:hello@0.1.0");
    assert!(!first.from_cache);
    assert!(second.from_cache);
    search.assert_async().await;
    search.remove_async().await;

    let refreshed = server
        .mock("GET", "/catalog/search")
        .match_query(Matcher::UrlEncoded("q".into(), "hello".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(items(&["mcp_server:hello@0.1.1"]))
        .expect(1)
        .create_async()
        .await;

    clock.advance(Duration::from_secs(301));
    let third = resolver.resolve(&server.url(), "hello", false).await.unwrap();
    assert_eq!(third.fqid, "mcp_server:hello@0.1.1");
    refreshed.assert_async().await;
}

#[tokio::test]
async fn test_prefers_stable_over_prerelease() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/catalog/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(items(&["mcp_server:hello@0.2.0-rc1", "mcp_server:hello@0.1.0"]))
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let (resolver, _) = resolver(&dir, UNREACHABLE_HUB);
    let res = resolver.resolve(&server.url(), "hello", false).await.unwrap();
    assert_eq!(res.fqid, "mcp_server:hello@0.1.0");
}

#[tokio::test]
async fn test_unreachable_primary_uses_local_hub() {
    let mut local = mockito::Server::new_async().await;
    let search = local
        .mock("GET", "/catalog/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(items(&["mcp_server:hello@1.0.0"]))
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let (resolver, _) = resolver(&dir, &local.url());
    let res = resolver.resolve(UNREACHABLE_HUB, "hello", false).await.unwrap();

    assert!(res.used_local_fallback);
    assert_eq!(res.source_hub, local.url());
    assert_eq!(res.fqid, "mcp_server:hello@1.0.0");
    search.assert_async().await;
}

#[tokio::test]
async fn test_both_hubs_unreachable() {
    let dir = TempDir::new().unwrap();
    let (resolver, _) = resolver(&dir, "http://127.0.0.1:2");
    assert!(matches!(
        resolver.resolve(UNREACHABLE_HUB, "hello", false).await,
        Err(MatrixError::HubUnreachable { .. })
    ));
}

#[tokio::test]
async fn test_negative_entry_short_circuits_until_expiry() {
    let mut server = mockito::Server::new_async().await;
    // Typed search plus the broadened retry
    let search = server
        .mock("GET", "/catalog/search")
        .match_query(Matcher::UrlEncoded("q".into(), "ghost".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(items(&[]))
        .expect(2)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let (resolver, clock) = resolver(&dir, UNREACHABLE_HUB);

    for _ in 0..2 {
        assert!(matches!(
            resolver.resolve(&server.url(), "ghost", false).await,
            Err(MatrixError::NotFound { .. })
        ));
    }
    search.assert_async().await;
    search.remove_async().await;

    let retry = server
        .mock("GET", "/catalog/search")
        .match_query(Matcher::UrlEncoded("q".into(), "ghost".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(items(&["mcp_server:ghost@0.1.0"]))
        .expect(1)
        .create_async()
        .await;

    // Still inside the positive TTL, past the negative one
    clock.advance(Duration::from_secs(61));
    let res = resolver.resolve(&server.url(), "ghost", false).await.unwrap();
    assert_eq!(res.fqid, "mcp_server:ghost@0.1.0");
    retry.assert_async().await;
}

#[tokio::test]
async fn test_install_writes_runner_and_alias() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/catalog/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(items(&["mcp_server:hello-sse@1.0.0"]))
        .create_async()
        .await;
    let install = server
        .mock("POST", "/catalog/install")
        .match_body(Matcher::PartialJson(serde_json::json!({"id": "mcp_server:hello-sse@1.0.0"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "plan": {"runner": {"type": "connector", "url": "http://127.0.0.1:6289/sse"}}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let home = TempDir::new().unwrap();
    let mut config = MatrixConfig::new(home.path());
    config.hub.base_url = server.url();
    let matrix = Matrix::from_config(config).unwrap();

    let report = matrix.install("hello-sse", None, None, false).await.unwrap();
    install.assert_async().await;

    assert_eq!(report.alias, "hello-sse");
    assert_eq!(report.target, home.path().join("runners").join("hello-sse"));
    let descriptor = RunnerDescriptor::load(&report.target).unwrap();
    assert_eq!(descriptor.kind, RuntimeKind::Connector);
    assert_eq!(matrix.alias_show("hello-sse").unwrap().id, "mcp_server:hello-sse@1.0.0");
}
