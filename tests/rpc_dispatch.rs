//! End-to-end dispatch over the in-memory broker: request in, correlated
//! reply out, acknowledgment after the reply.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rpcamqp_lite::RetryPolicy;
use rpcamqp_lite::client::{RpcClient, RpcClientConfig};
use rpcamqp_lite::server::{RpcDispatcher, RpcDispatcherConfig};
use rpcamqp_lite::transport::memory::{BrokerEvent, MemoryBroker, MemoryChannel};
use rpcamqp_lite::transport::{BrokerConnector, OutboundMessage};
use serde_json::{Value, json};
use vcs_rpc::adapter::{
    AdapterError, AdapterFactory, BranchRecord, CommitRecord, ContributorRecord, DataSource,
    RepoRecord, RepoTarget,
};
use vcs_rpc::service::VcsService;

/// Adapter with canned data that counts how often it is opened and called.
#[derive(Clone, Default)]
struct CannedFactory {
    opened: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

struct CannedAdapter {
    calls: Arc<AtomicUsize>,
}

impl AdapterFactory for CannedFactory {
    type Adapter = CannedAdapter;

    fn open(&self, _target: &RepoTarget) -> Result<CannedAdapter, AdapterError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(CannedAdapter {
            calls: Arc::clone(&self.calls),
        })
    }
}

impl CannedAdapter {
    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl DataSource for CannedAdapter {
    async fn get_repo(&self) -> Result<Option<RepoRecord>, AdapterError> {
        self.count();
        Ok(Some(RepoRecord {
            id: 1296269,
            repo_name: "hello".to_owned(),
            creation_date: 1_296_068_472,
            owner: "octo".to_owned(),
            url: "https://api.github.com/repos/octo/hello".to_owned(),
        }))
    }

    async fn get_branches(&self) -> Result<Option<Vec<BranchRecord>>, AdapterError> {
        self.count();
        Ok(Some(vec![BranchRecord::new("main"), BranchRecord::new("dev")]))
    }

    async fn get_commits(&self) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        self.count();
        Ok(Some(Vec::new()))
    }

    async fn get_commits_by_branch(
        &self,
        _branch: &str,
    ) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
        self.count();
        Ok(Some(Vec::new()))
    }

    async fn get_commit_by_hash(&self, _hash: &str) -> Result<Option<CommitRecord>, AdapterError> {
        self.count();
        Ok(None)
    }

    async fn get_contributors(&self) -> Result<Option<Vec<ContributorRecord>>, AdapterError> {
        self.count();
        Ok(Some(Vec::new()))
    }
}

fn config() -> RpcDispatcherConfig {
    RpcDispatcherConfig::builder()
        .retry(RetryPolicy::builder().backoff(Duration::ZERO).build())
        .build()
}

async fn dispatcher(
    broker: &MemoryBroker,
    factory: CannedFactory,
) -> RpcDispatcher<MemoryChannel, VcsService<CannedFactory>> {
    RpcDispatcher::connect(&broker.connector(), VcsService::new(factory), config())
        .await
        .unwrap()
}

fn payload(message: &OutboundMessage) -> Value {
    serde_json::from_slice(&message.payload).unwrap()
}

fn request(body: Value) -> Vec<u8> {
    serde_json::to_vec(&body).unwrap()
}

#[tokio::test]
async fn test_branches_reply_carries_correlation_id() {
    let broker = MemoryBroker::new();
    let dispatcher = dispatcher(&broker, CannedFactory::default()).await;

    let tag = broker.send(
        "request",
        request(json!({"action": "get_branches", "owner": "octo", "repo": "hello"})),
        Some("caller"),
        Some("corr-branches"),
    );
    broker.close();
    dispatcher.run().await.unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key, "caller");
    assert_eq!(published[0].correlation_id.as_deref(), Some("corr-branches"));
    assert_eq!(
        payload(&published[0]),
        json!([{"name": "main"}, {"name": "dev"}])
    );
    assert_eq!(broker.acked(), vec![tag]);
}

#[tokio::test]
async fn test_commit_not_found_replies_null() {
    let broker = MemoryBroker::new();
    let dispatcher = dispatcher(&broker, CannedFactory::default()).await;

    broker.send(
        "request",
        request(json!({
            "action": "get_commit_by_hash", "hash": "abc123", "owner": "octo", "repo": "hello"
        })),
        Some("caller"),
        Some("corr-null"),
    );
    broker.close();
    dispatcher.run().await.unwrap();

    let published = broker.published();
    assert_eq!(&published[0].payload[..], b"null");
}

#[tokio::test]
async fn test_unknown_operation_is_replied_and_acked() {
    let broker = MemoryBroker::new();
    let dispatcher = dispatcher(&broker, CannedFactory::default()).await;

    let tag = broker.send(
        "request",
        request(json!({"action": "unknown_op"})),
        Some("caller"),
        Some("corr-unknown"),
    );
    broker.close();
    dispatcher.run().await.unwrap();

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(
        payload(&published[0]),
        json!({"error": {
            "kind": "unknown_operation",
            "message": "unknown operation 'unknown_op'"
        }})
    );
    assert_eq!(broker.acked(), vec![tag]);
}

#[tokio::test]
async fn test_missing_hash_never_reaches_adapter() {
    let broker = MemoryBroker::new();
    let factory = CannedFactory::default();
    let dispatcher = dispatcher(&broker, factory.clone()).await;

    broker.send(
        "request",
        request(json!({"action": "get_commit_by_hash", "owner": "octo", "repo": "hello"})),
        Some("caller"),
        Some("corr-missing"),
    );
    broker.close();
    dispatcher.run().await.unwrap();

    let published = broker.published();
    assert_eq!(payload(&published[0])["error"]["kind"], json!("missing_parameter"));
    assert_eq!(factory.opened.load(Ordering::SeqCst), 0);
    assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_body_is_replied_and_acked() {
    let broker = MemoryBroker::new();
    let dispatcher = dispatcher(&broker, CannedFactory::default()).await;

    let tag = broker.send(
        "request",
        "{'action': 'get_repo'}",
        Some("caller"),
        Some("corr-bad"),
    );
    broker.close();
    dispatcher.run().await.unwrap();

    let events: Vec<_> = broker
        .events()
        .into_iter()
        .filter(|event| !matches!(event, BrokerEvent::Declared(_)))
        .collect();
    assert_eq!(events.len(), 2);
    match &events[0] {
        BrokerEvent::Published(message) => {
            assert_eq!(payload(message)["error"]["kind"], json!("decode"));
        }
        other => panic!("expected a reply first, got {other:?}"),
    }
    assert_eq!(events[1], BrokerEvent::Acked(tag));
}

#[tokio::test]
async fn test_each_request_opens_its_own_adapter() {
    let broker = MemoryBroker::new();
    let factory = CannedFactory::default();
    let dispatcher = dispatcher(&broker, factory.clone()).await;

    for i in 0..3 {
        broker.send(
            "request",
            request(json!({"action": "get_repo", "owner": "octo", "repo": "hello"})),
            Some("caller"),
            Some(&format!("corr-{i}")),
        );
    }
    broker.close();
    dispatcher.run().await.unwrap();

    assert_eq!(factory.opened.load(Ordering::SeqCst), 3);
    let correlations: Vec<_> = broker
        .published()
        .into_iter()
        .filter_map(|message| message.correlation_id)
        .collect();
    assert_eq!(correlations, vec!["corr-0", "corr-1", "corr-2"]);
}

#[tokio::test]
async fn test_client_round_trip() {
    let broker = MemoryBroker::new();
    let dispatcher = dispatcher(&broker, CannedFactory::default()).await;

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(dispatcher.run_until(async move {
        let _ = stopped.await;
    }));

    let channel = broker.connector().connect().await.unwrap();
    let client_config = RpcClientConfig::new("request").with_timeout(Duration::from_secs(5));
    let mut client = RpcClient::new(channel, client_config).await.unwrap();

    let reply = client
        .call(request(json!({"action": "get_repo", "owner": "octo", "repo": "hello"})))
        .await
        .unwrap();
    let reply: Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(reply["repo_name"], json!("hello"));
    assert_eq!(reply["creation_date"], json!(1_296_068_472));

    let _ = stop.send(());
    server.await.unwrap().unwrap();
}
