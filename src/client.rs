use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Credentials;
use crate::models::*;
use crate::transport::{EngineRequest, EngineResponse, SignAndSend};

const TARGET_PREFIX: &str = "AmazonAthena";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Low-level Athena client: one method per engine action, no retries.
#[derive(Debug, Clone)]
pub struct AthenaClient<T> {
    endpoint: String,
    credentials: Credentials,
    transport: T,
}

impl<T: SignAndSend> AthenaClient<T> {
    /// Example `endpoint`: `https://athena.us-east-1.amazonaws.com/`
    pub fn new(endpoint: &str, credentials: Credentials, transport: T) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            credentials,
            transport,
        }
    }

    /// StartQueryExecution
    /// Submit SQL text and receive the id of the new execution.
    pub async fn start_query_execution(
        &self,
        request: &StartQueryExecutionRequest,
    ) -> Result<StartQueryExecutionResponse> {
        self.call("StartQueryExecution", request).await
    }

    /// GetQueryExecution
    /// Poll for the execution's status and result location.
    pub async fn get_query_execution(&self, execution_id: &str) -> Result<QueryExecution> {
        let request = QueryExecutionIdRequest {
            query_execution_id: execution_id.to_string(),
        };
        let resp: GetQueryExecutionResponse = self.call("GetQueryExecution", &request).await?;
        Ok(resp.query_execution)
    }

    /// GetQueryResults
    /// Fetch one page of results for a completed execution.
    pub async fn get_query_results(
        &self,
        execution_id: &str,
        next_token: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<GetQueryResultsResponse> {
        let request = GetQueryResultsRequest {
            query_execution_id: execution_id.to_string(),
            next_token: next_token.map(str::to_string),
            max_results,
        };
        self.call("GetQueryResults", &request).await
    }

    /// StopQueryExecution
    /// Request that a queued or running execution be cancelled.
    pub async fn stop_query_execution(&self, execution_id: &str) -> Result<()> {
        let request = QueryExecutionIdRequest {
            query_execution_id: execution_id.to_string(),
        };
        self.send("StopQueryExecution", &request)
            .await?
            .error_for_status()?;
        // Empty body. Success means the request was accepted.
        Ok(())
    }

    async fn call<B: Serialize, R: DeserializeOwned>(&self, action: &str, body: &B) -> Result<R> {
        let resp = self.send(action, body).await?;
        self.handle_response(action, resp)
    }

    async fn send<B: Serialize>(&self, action: &str, body: &B) -> Result<EngineResponse> {
        let mut request = EngineRequest::post(&self.endpoint, serde_json::to_vec(body)?)
            .with_header("x-amz-target", &format!("{}.{}", TARGET_PREFIX, action))?
            .with_header("content-type", CONTENT_TYPE)?;
        if let Some(token) = &self.credentials.session_token {
            request = request.with_header("x-amz-security-token", token)?;
        }

        log::debug!("[{}] POST {}", action, self.endpoint);
        self.transport.sign_and_send(request, &self.credentials).await
    }

    /// Helper to decode an action's response or surface its error.
    fn handle_response<R: DeserializeOwned>(&self, action: &str, resp: EngineResponse) -> Result<R> {
        let resp = resp.error_for_status().inspect_err(|e| {
            log::debug!("[{}] failed: {}", action, e);
        })?;
        let parsed = serde_json::from_slice(&resp.body)?;
        Ok(parsed)
    }
}
