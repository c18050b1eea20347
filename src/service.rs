use bytes::Bytes;
use rpcamqp_lite::server::RequestHandler;
use rpcamqp_lite::{HandlerOutcome, RpcFailure};
use tracing::{Instrument, debug, info_span};

use crate::adapter::AdapterFactory;
use crate::registry::{DispatchError, OperationRegistry};
use crate::request::Request;

/// The request handler served by the consumer: decode the body, route it
/// through the [`OperationRegistry`] and hand back the value or failure.
#[derive(Debug, Clone)]
pub struct VcsService<F> {
    registry: OperationRegistry<F>,
}

impl<F: AdapterFactory> VcsService<F> {
    pub fn new(factory: F) -> Self {
        Self {
            registry: OperationRegistry::new(factory),
        }
    }

    async fn serve(&self, body: &[u8]) -> Result<serde_json::Value, DispatchError> {
        let request = Request::decode(body)?;
        let span = info_span!("request", action = %request.action);

        async {
            let result = self.registry.dispatch(&request).await;
            if result.is_ok() {
                debug!("Operation completed");
            }
            result
        }
        .instrument(span)
        .await
    }
}

impl<F: AdapterFactory> RequestHandler for VcsService<F> {
    async fn handle(&self, body: Bytes) -> HandlerOutcome {
        self.serve(&body).await.map_err(RpcFailure::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{
        AdapterError, BranchRecord, CommitRecord, ContributorRecord, DataSource, RepoRecord,
        RepoTarget,
    };
    use rpcamqp_lite::FailureKind;
    use serde_json::json;

    struct Empty;

    impl DataSource for Empty {
        async fn get_repo(&self) -> Result<Option<RepoRecord>, AdapterError> {
            Ok(None)
        }

        async fn get_branches(&self) -> Result<Option<Vec<BranchRecord>>, AdapterError> {
            Ok(Some(Vec::new()))
        }

        async fn get_commits(&self) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
            Ok(None)
        }

        async fn get_commits_by_branch(
            &self,
            _branch: &str,
        ) -> Result<Option<Vec<CommitRecord>>, AdapterError> {
            Ok(None)
        }

        async fn get_commit_by_hash(
            &self,
            _hash: &str,
        ) -> Result<Option<CommitRecord>, AdapterError> {
            Ok(None)
        }

        async fn get_contributors(&self) -> Result<Option<Vec<ContributorRecord>>, AdapterError> {
            Ok(None)
        }
    }

    struct EmptyFactory;

    impl AdapterFactory for EmptyFactory {
        type Adapter = Empty;

        fn open(&self, _target: &RepoTarget) -> Result<Empty, AdapterError> {
            Ok(Empty)
        }
    }

    #[tokio::test]
    async fn test_empty_collection_stays_empty() {
        let service = VcsService::new(EmptyFactory);
        let body = Bytes::from_static(br#"{"action": "get_branches", "owner": "o", "repo": "r"}"#);

        assert_eq!(service.handle(body).await, Ok(json!([])));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_failure() {
        let service = VcsService::new(EmptyFactory);
        let failure = service
            .handle(Bytes::from_static(b"{'action': 'get_repo'}"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Decode);
        assert!(failure.message.starts_with("malformed request body"));
    }

    #[tokio::test]
    async fn test_empty_body_is_decode_failure() {
        let service = VcsService::new(EmptyFactory);
        let failure = service.handle(Bytes::new()).await.unwrap_err();

        assert_eq!(failure, RpcFailure::new(FailureKind::Decode, "request body is empty"));
    }
}
