/// API Context - shared state for all API handlers
use crate::error::ApiError;
use axum::http::HeaderMap;
use mailgraph_core::credentials::{CredentialStore, HttpTokenRefresher, TokenCipher};
use mailgraph_core::error::MailgraphError;
use mailgraph_core::extract::{ExtractorRouter, HttpLlmClient, LlmGovernor};
use mailgraph_core::models::MailgraphConfig;
use mailgraph_core::providers::{RateLimiterRegistry, StaticProviderRegistry};
use mailgraph_core::qualify::QualificationEngine;
use mailgraph_core::queue::JobQueue;
use mailgraph_core::store::GraphStore;
use mailgraph_core::sync::SyncCoordinator;
use std::sync::Arc;

/// API Context contains shared resources for API handlers
pub struct ApiContext {
    pub store: GraphStore,
    pub queue: JobQueue,
    pub coordinator: Arc<SyncCoordinator>,
    pub config: MailgraphConfig,
}

impl ApiContext {
    pub async fn new(config: MailgraphConfig) -> Result<Arc<Self>, MailgraphError> {
        config.validate()?;

        let store = GraphStore::connect(&config.database_url).await?;
        let limiter = Arc::new(RateLimiterRegistry::new(config.rate_limit_burst));

        let cipher = TokenCipher::from_hex_key(&config.credential_key)?;
        let refresher = Arc::new(HttpTokenRefresher::new(
            reqwest::Client::new(),
            config.oauth.clone(),
        ));
        let credentials = Arc::new(CredentialStore::new(store.clone(), cipher, refresher));

        let llm_client = Arc::new(HttpLlmClient::new(&config.llm));
        let governor = Arc::new(LlmGovernor::new(llm_client, config.llm.clone()));
        let router = Arc::new(ExtractorRouter::new(governor, config.cost_policy));
        let qualifier = Arc::new(QualificationEngine::new(store.clone(), router));

        let providers = Arc::new(StaticProviderRegistry::new(limiter, store.clone(), None));
        let queue = JobQueue::new(store.clone());

        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            credentials,
            providers,
            qualifier,
            queue.clone(),
            config.clone(),
        ));

        Ok(Arc::new(Self {
            store,
            queue,
            coordinator,
            config,
        }))
    }
}

/// The gateway in front of this service owns authentication and injects the
/// authenticated tenant. Requests without the header are rejected.
pub fn user_id_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| ApiError::Unauthorized("missing x-user-id header".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_extraction() {
        let mut headers = HeaderMap::new();
        assert!(user_id_from_headers(&headers).is_err());

        headers.insert("x-user-id", "user-1".parse().unwrap());
        assert_eq!(user_id_from_headers(&headers).unwrap(), "user-1");
    }
}
