use std::collections::BTreeMap;
use tabsync_remote::{DocumentStore, GistStore, StoreConfig, StoreError};
use tabsync_types::{DocumentId, SecretString};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_store(server: &MockServer) -> GistStore {
    GistStore::new(StoreConfig {
        base_url: server.uri(),
        ..Default::default()
    })
}

async fn authed_store(server: &MockServer) -> GistStore {
    let store = mock_store(server);
    store.set_token(Some(SecretString::from("tok-1"))).await;
    store
}

fn sync_doc_json(id: &str, revision: &str, content: &str) -> serde_json::Value {
    let defaults = StoreConfig::default();
    serde_json::json!({
        "id": id,
        "description": defaults.description,
        "files": {
            defaults.filename.clone(): {
                "content": content,
                "raw_url": format!("https://example.invalid/raw/{id}"),
                "truncated": false,
                "size": content.len()
            }
        },
        "history": [{"version": revision}]
    })
}

// ── Config defaults ─────────────────────────────────────────────

#[test]
fn store_config_default() {
    let cfg = StoreConfig::default();
    assert_eq!(cfg.base_url, "https://api.github.com");
    assert_eq!(cfg.filename, "tabsync.sync.json");
    assert!(cfg.description.contains("TabSync"));
}

#[test]
fn store_config_clone() {
    let cfg = StoreConfig {
        filename: "custom.json".to_string(),
        ..Default::default()
    };
    let cloned = cfg.clone();
    assert_eq!(cloned.filename, "custom.json");
    assert_eq!(cloned.base_url, cfg.base_url);
}

// ── Credential validation ───────────────────────────────────────

#[tokio::test]
async fn validate_credential_ok() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "login": "octocat"
        })))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let identity = store.validate_credential().await.unwrap();
    assert_eq!(identity.login, "octocat");
}

#[tokio::test]
async fn validate_credential_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "Bad credentials"
        })))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let err = store.validate_credential().await.unwrap_err();
    assert!(matches!(err, StoreError::TokenInvalid));
}

#[tokio::test]
async fn validate_without_token_fails() {
    let store = GistStore::new(StoreConfig::default());
    let err = store.validate_credential().await.unwrap_err();
    assert!(matches!(err, StoreError::NoToken));
}

#[tokio::test]
async fn clearing_token_forgets_credential() {
    let store = GistStore::new(StoreConfig::default());
    store.set_token(Some(SecretString::from("tok-1"))).await;
    store.set_token(None).await;

    let err = store.validate_credential().await.unwrap_err();
    assert!(matches!(err, StoreError::NoToken));
}

#[tokio::test]
async fn exhausted_rate_limit_maps_to_rate_limited() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("retry-after", "30"),
        )
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let err = store.validate_credential().await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(30));
}

#[tokio::test]
async fn forbidden_without_rate_limit_is_token_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(403).set_body_string("scope missing"))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let err = store.validate_credential().await.unwrap_err();
    assert!(matches!(err, StoreError::TokenInvalid));
}

// ── Finding the sync document ───────────────────────────────────

#[tokio::test]
async fn find_document_matches_description_and_filename() {
    let server = MockServer::start().await;
    let defaults = StoreConfig::default();

    Mock::given(method("GET"))
        .and(path("/gists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "unrelated",
                "description": "my notes",
                "files": {"notes.md": {"size": 10}}
            },
            {
                "id": "right-description-wrong-file",
                "description": defaults.description,
                "files": {"other.json": {"size": 10}}
            },
            {
                "id": "the-one",
                "description": defaults.description,
                "files": {defaults.filename.clone(): {"size": 10}}
            }
        ])))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let found = store.find_document().await.unwrap();
    assert_eq!(found, Some(DocumentId::from("the-one")));
}

#[tokio::test]
async fn find_document_none_when_absent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    assert!(store.find_document().await.unwrap().is_none());
}

#[tokio::test]
async fn find_document_follows_pagination() {
    let server = MockServer::start().await;
    let defaults = StoreConfig::default();

    // A full first page of decoys forces a second request.
    let decoys: Vec<serde_json::Value> = (0..100)
        .map(|i| {
            serde_json::json!({
                "id": format!("decoy-{i}"),
                "description": "something else",
                "files": {"a.txt": {"size": 1}}
            })
        })
        .collect();

    Mock::given(method("GET"))
        .and(path("/gists"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&decoys))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gists"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "on-page-two",
                "description": defaults.description,
                "files": {defaults.filename.clone(): {"size": 10}}
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let found = store.find_document().await.unwrap();
    assert_eq!(found, Some(DocumentId::from("on-page-two")));
}

// ── Reading ─────────────────────────────────────────────────────

#[tokio::test]
async fn read_document_inline_content() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gists/g1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(sync_doc_json("g1", "rev-7", "payload")),
        )
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let doc = store.read_document(&DocumentId::from("g1")).await.unwrap();
    assert_eq!(doc.revision.as_str(), "rev-7");
    assert_eq!(doc.content.as_deref(), Some("payload"));
}

#[tokio::test]
async fn read_document_fetches_truncated_content() {
    let server = MockServer::start().await;
    let defaults = StoreConfig::default();

    Mock::given(method("GET"))
        .and(path("/gists/big"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "big",
            "description": defaults.description,
            "files": {
                defaults.filename.clone(): {
                    "content": "partial...",
                    "raw_url": format!("{}/raw/big", server.uri()),
                    "truncated": true,
                    "size": 2_000_000
                }
            },
            "history": [{"version": "rev-big"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/raw/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string("the full payload"))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let doc = store.read_document(&DocumentId::from("big")).await.unwrap();
    assert_eq!(doc.content.as_deref(), Some("the full payload"));
}

#[tokio::test]
async fn read_document_missing_file_yields_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gists/hollow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "hollow",
            "description": "TabSync encrypted snapshot (do not edit)",
            "files": {"somebody-renamed-it.json": {"content": "x", "size": 1}},
            "history": [{"version": "rev-3"}]
        })))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let doc = store
        .read_document(&DocumentId::from("hollow"))
        .await
        .unwrap();
    assert!(doc.content.is_none());
    assert_eq!(doc.revision.as_str(), "rev-3");
}

#[tokio::test]
async fn read_document_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gists/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let err = store
        .read_document(&DocumentId::from("gone"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn read_document_without_history_is_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gists/odd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "odd",
            "description": "x",
            "files": {}
        })))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let err = store
        .read_document(&DocumentId::from("odd"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Parse(_)));
}

// ── Creating and updating ───────────────────────────────────────

#[tokio::test]
async fn create_document_is_private_and_returns_revision() {
    let server = MockServer::start().await;
    let defaults = StoreConfig::default();

    Mock::given(method("POST"))
        .and(path("/gists"))
        .and(body_partial_json(serde_json::json!({
            "public": false,
            "description": defaults.description,
            "files": {defaults.filename.clone(): {"content": "sealed-bytes"}}
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(sync_doc_json("fresh", "rev-1", "sealed-bytes")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let created = store.create_document("sealed-bytes").await.unwrap();
    assert_eq!(created.id, DocumentId::from("fresh"));
    assert_eq!(created.revision.as_str(), "rev-1");
}

#[tokio::test]
async fn update_document_returns_new_revision() {
    let server = MockServer::start().await;
    let defaults = StoreConfig::default();

    Mock::given(method("PATCH"))
        .and(path("/gists/g1"))
        .and(body_partial_json(serde_json::json!({
            "files": {defaults.filename.clone(): {"content": "v2"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync_doc_json("g1", "rev-8", "v2")))
        .expect(1)
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let files = BTreeMap::from([(defaults.filename.clone(), "v2".to_string())]);
    let revision = store
        .update_document(&DocumentId::from("g1"), &files)
        .await
        .unwrap();
    assert_eq!(revision.as_str(), "rev-8");
}

#[tokio::test]
async fn update_document_can_add_extra_files() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/gists/g1"))
        .and(body_partial_json(serde_json::json!({
            "files": {"conflict-device-20240101.json": {"content": "side copy"}}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(sync_doc_json("g1", "rev-9", "unchanged")),
        )
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let files = BTreeMap::from([(
        "conflict-device-20240101.json".to_string(),
        "side copy".to_string(),
    )]);
    let revision = store
        .update_document(&DocumentId::from("g1"), &files)
        .await
        .unwrap();
    assert_eq!(revision.as_str(), "rev-9");
}

#[tokio::test]
async fn update_document_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/gists/g1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("server error"))
        .mount(&server)
        .await;

    let store = authed_store(&server).await;
    let files = BTreeMap::from([("f".to_string(), "c".to_string())]);
    let err = store
        .update_document(&DocumentId::from("g1"), &files)
        .await
        .unwrap_err();
    match err {
        StoreError::Api { status, .. } => assert_eq!(status, 500),
        other => panic!("expected Api error, got {other:?}"),
    }
}
