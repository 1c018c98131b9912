use std::path::Path;
use std::sync::Arc;

use secrecy::Secret;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hiro_schema::SchemaService;
use hiro_types::{Config, OAuthConfig};

fn test_config(server_uri: &str, cache_path: &Path) -> Arc<Config> {
    Arc::new(Config {
        schema_url: format!("{server_uri}/schema"),
        api_base_url: server_uri.to_string(),
        docs_url: format!("{server_uri}/docs"),
        accept_header: "application/vnd.heroku+json; version=3".into(),
        schema_refresh_interval_ms: 3_600_000,
        catalog_cache_path: cache_path.to_path_buf(),
        allow_writes: false,
        request_timeout_ms: 5_000,
        max_retries: 0,
        read_cache_ttl_ms: 0,
        execute_max_body_bytes: 50_000,
        execute_body_preview_chars: 200,
        user_id_header: "x-user-id".into(),
        write_confirmation_secret: Secret::new("secret".into()),
        token_store_path: cache_path.with_file_name("tokens.json"),
        token_encryption_key: Secret::new(String::new()),
        oauth: OAuthConfig {
            client_id: "client".into(),
            client_secret: Secret::new("client-secret".into()),
            scope: "global".into(),
            authorize_url: format!("{server_uri}/oauth/authorize"),
            token_url: format!("{server_uri}/oauth/token"),
            redirect_uri: "http://localhost:8787/oauth/callback".into(),
        },
    })
}

fn sample_schema() -> serde_json::Value {
    json!({
        "definitions": {
            "app": {
                "links": [
                    {"href": "/apps", "method": "GET", "title": "List", "description": "List apps."},
                    {
                        "href": "/apps/{(%23%2Fdefinitions%2Fapp%2Fdefinitions%2Fidentity)}",
                        "method": "GET",
                        "title": "Info"
                    }
                ]
            }
        }
    })
}

#[tokio::test]
async fn forced_refresh_populates_and_persists_the_catalog() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("catalog-cache.json");

    Mock::given(method("GET"))
        .and(path("/schema"))
        .and(header("accept", "application/vnd.heroku+json; version=3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_json(sample_schema()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"docs-v1\"")
                .set_body_string("<html><body><h1>Platform API</h1></body></html>"),
        )
        .mount(&server)
        .await;

    let service = SchemaService::bootstrap(test_config(&server.uri(), &cache_path))
        .await
        .unwrap();
    service.ensure_ready().await.unwrap();

    let operations = service.operations().await;
    assert_eq!(operations.len(), 2);
    assert!(service.resolve("GET /apps").await.is_some());
    assert!(service.resolve("GET /apps/{app_identity}").await.is_some());
    assert_eq!(service.docs_context().await.as_deref(), Some("Platform API"));

    // The refresh persisted a version-1 cache snapshot.
    let cached: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&cache_path).unwrap()).unwrap();
    assert_eq!(cached["version"], 1);
    assert_eq!(cached["schema_etag"], "\"v1\"");
    assert_eq!(cached["operations"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cold_boot_from_cache_skips_the_upstream() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("catalog-cache.json");

    // Seed the cache through one real refresh.
    Mock::given(method("GET"))
        .and(path("/schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_schema()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>docs</p>"))
        .mount(&server)
        .await;
    let seeder = SchemaService::bootstrap(test_config(&server.uri(), &cache_path))
        .await
        .unwrap();
    seeder.ensure_ready().await.unwrap();
    server.reset().await;

    // A fresh service boots warm; ensure_ready never touches the upstream.
    let service = SchemaService::bootstrap(test_config(&server.uri(), &cache_path))
        .await
        .unwrap();
    service.ensure_ready().await.unwrap();
    assert_eq!(service.operations().await.len(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn not_modified_keeps_the_catalog_and_skips_persistence() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("catalog-cache.json");

    Mock::given(method("GET"))
        .and(path("/schema"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_json(sample_schema()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>docs</p>"))
        .mount(&server)
        .await;

    let service = SchemaService::bootstrap(test_config(&server.uri(), &cache_path))
        .await
        .unwrap();
    service.ensure_ready().await.unwrap();
    let generation = service.catalog_generation().await;

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/schema"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    service.refresh(false).await.unwrap();
    assert_eq!(service.operations().await.len(), 2);
    assert_eq!(service.catalog_generation().await, generation);
}

#[tokio::test]
async fn upstream_failure_surfaces_an_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("catalog-cache.json");

    Mock::given(method("GET"))
        .and(path("/schema"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let service = SchemaService::bootstrap(test_config(&server.uri(), &cache_path))
        .await
        .unwrap();
    let err = service.ensure_ready().await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn docs_failure_does_not_fail_the_refresh() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("catalog-cache.json");

    Mock::given(method("GET"))
        .and(path("/schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_schema()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let service = SchemaService::bootstrap(test_config(&server.uri(), &cache_path))
        .await
        .unwrap();
    service.ensure_ready().await.unwrap();
    assert_eq!(service.operations().await.len(), 2);
    assert!(service.docs_context().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_are_single_flight() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("catalog-cache.json");

    Mock::given(method("GET"))
        .and(path("/schema"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(sample_schema())
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let service = SchemaService::bootstrap(test_config(&server.uri(), &cache_path))
        .await
        .unwrap();
    let results = spawn_refreshers(service.clone()).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(service.operations().await.len(), 2);
}

async fn spawn_refreshers(service: Arc<SchemaService>) -> Vec<anyhow::Result<()>> {
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.refresh(true).await })
        })
        .collect();
    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }
    results
}
