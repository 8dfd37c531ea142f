use launchpad_agents_core::agent::Services;
use launchpad_agents_core::config::AgentSettings;
use launchpad_agents_core::storage::{KeyValueStore, R2Store};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OBJECT_PATH: &str = "/state/agents/quota/market/alice/2026-03-14.json";
const KEY: &str = "quota/market/alice/2026-03-14";

const ACCESS_DENIED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message><RequestId>r1</RequestId></Error>"#;

const NO_SUCH_KEY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message><RequestId>r2</RequestId></Error>"#;

const BUCKETS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Owner><ID>o</ID><DisplayName>o</DisplayName></Owner><Buckets><Bucket><Name>state</Name><CreationDate>2026-01-01T00:00:00.000Z</CreationDate></Bucket></Buckets></ListAllMyBucketsResult>"#;

fn settings(server: &MockServer) -> AgentSettings {
    AgentSettings {
        r2_endpoint_url: Some(server.uri()),
        r2_access_key_id: Some("test-key".to_string()),
        r2_secret_access_key: Some("test-secret".to_string()),
        r2_bucket_name: Some("state".to_string()),
        ..AgentSettings::default()
    }
}

#[tokio::test]
async fn failed_put_is_not_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(OBJECT_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_raw(ACCESS_DENIED, "application/xml"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(OBJECT_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_raw(NO_SUCH_KEY, "application/xml"))
        .expect(1)
        .mount(&server)
        .await;

    let store = R2Store::new(&settings(&server)).await.expect("store");
    assert!(store.set_json(KEY, json!(3)).await.is_err());
    assert_eq!(store.get_json(KEY).await.expect("get"), None);
}

#[tokio::test]
async fn stored_value_is_read_back_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(OBJECT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(OBJECT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = R2Store::new(&settings(&server)).await.expect("store");
    store.set_json(KEY, json!(3)).await.expect("put");
    assert_eq!(store.get_json(KEY).await.expect("get"), Some(json!(3)));
}

#[tokio::test]
async fn connect_checks_storage_reachability() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(BUCKETS, "application/xml"))
        .expect(1)
        .mount(&server)
        .await;

    Services::connect(settings(&server)).await.expect("connect");
}
