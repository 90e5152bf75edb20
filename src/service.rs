use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::client::AthenaClient;
use crate::config::{resolve_credentials, CredentialProvider, Credentials, NoCredentials, QueryConfig, ResultFormat};
use crate::models::*;
use crate::query::Query;
use crate::results::{
    check_output_request, decode_pages, ExecutionHandle, NoPartitionReader, PartitionReader,
    QueryOutput, ResultMaterializer, ResultRows,
};
use crate::transport::{ObjectFetcher, SignAndSend};

/// Higher-level service built on top of [`AthenaClient`].
/// Drives a query from submission through polling to its results, including
/// the PREPARE/EXECUTE round trip for parameterized statements.
pub struct AthenaService<T, F, P = NoPartitionReader> {
    transport: T,
    objects: F,
    partitions: P,
    credential_provider: Box<dyn CredentialProvider>,
}

impl<T: SignAndSend, F: ObjectFetcher> AthenaService<T, F, NoPartitionReader> {
    pub fn new(transport: T, objects: F) -> Self {
        Self {
            transport,
            objects,
            partitions: NoPartitionReader,
            credential_provider: Box::new(NoCredentials),
        }
    }
}

impl<T: SignAndSend, F: ObjectFetcher, P: PartitionReader> AthenaService<T, F, P> {
    /// Enables [`ResultFormat::Columnar`] output.
    pub fn with_partition_reader<Q: PartitionReader>(self, partitions: Q) -> AthenaService<T, F, Q> {
        AthenaService {
            transport: self.transport,
            objects: self.objects,
            partitions,
            credential_provider: self.credential_provider,
        }
    }

    /// Source of credentials for fields the caller leaves unset.
    pub fn with_credential_provider(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.credential_provider = Box::new(provider);
        self
    }

    /// Runs `query` to completion and returns its results in `config.output`
    /// form.
    ///
    /// A FAILED execution is returned as [`QueryOutput::Failed`] unless
    /// `config.raise_on_failure` is set, in which case it is an
    /// [`AthenaError::QueryFailed`] carrying the engine's message.
    pub async fn execute(
        &self,
        query: &Query,
        config: &QueryConfig,
    ) -> Result<QueryOutput<P::Dataset>> {
        // Configuration problems surface before any request is made.
        config.validate()?;
        check_output_request(query, config)?;
        query.render()?;

        let credentials = self.credentials(config);
        let client = AthenaClient::new(
            &config.endpoint_url(&credentials),
            credentials.clone(),
            &self.transport,
        );

        let mut phase = query.clone();
        loop {
            let (execution_id, execution) = self.run_to_terminal(&client, &phase, config).await?;
            let mut handle = ExecutionHandle {
                execution_id,
                result_location: execution.output_location().map(str::to_string),
                column_metadata: Vec::new(),
            };

            match execution.state() {
                QueryState::Failed => return Self::failure(handle.execution_id, execution, config),
                QueryState::Succeeded if phase.requires_prepare() => {
                    self.fetch_rows(&client, &mut handle, config).await?;
                    log::debug!(
                        "[PREPARE] {} prepared by {}",
                        phase.statement_name().unwrap_or_default(),
                        handle.execution_id
                    );
                    phase = phase.execute_phase()?;
                }
                QueryState::Succeeded if config.output != ResultFormat::Inline => {
                    let materializer = ResultMaterializer::new(
                        &self.objects,
                        &self.partitions,
                        &credentials,
                        config.fetch_body,
                    );
                    return materializer.materialize(&handle, config.output).await;
                }
                QueryState::Succeeded => {
                    let rows = self.fetch_rows(&client, &mut handle, config).await?;
                    return Ok(QueryOutput::Rows(rows));
                }
                state => {
                    log::warn!(
                        "[POLL] {} ended in unexpected state {:?}; fetching results anyway",
                        handle.execution_id,
                        state
                    );
                    let rows = self.fetch_rows(&client, &mut handle, config).await?;
                    return Ok(QueryOutput::Rows(rows));
                }
            }
        }
    }

    /// Requests cancellation of a running execution.
    pub async fn stop(&self, execution_id: &str, config: &QueryConfig) -> Result<()> {
        let credentials = self.credentials(config);
        let client = AthenaClient::new(&config.endpoint_url(&credentials), credentials, &self.transport);
        client.stop_query_execution(execution_id).await
    }

    fn credentials(&self, config: &QueryConfig) -> Credentials {
        resolve_credentials(config.credentials.as_ref(), self.credential_provider.as_ref())
    }

    /// Submits one phase and polls it until it leaves QUEUED/RUNNING.
    /// Returns the id assigned at submission with the final status.
    async fn run_to_terminal<C: SignAndSend>(
        &self,
        client: &AthenaClient<C>,
        phase: &Query,
        config: &QueryConfig,
    ) -> Result<(String, QueryExecution)> {
        let request = start_request(phase, config)?;
        let started = client.start_query_execution(&request).await?;
        log::debug!("[START] {} submitted", started.query_execution_id);
        let execution = poll_until_done(client, &started.query_execution_id, config).await?;
        Ok((started.query_execution_id, execution))
    }

    async fn fetch_rows<C: SignAndSend>(
        &self,
        client: &AthenaClient<C>,
        handle: &mut ExecutionHandle,
        config: &QueryConfig,
    ) -> Result<ResultRows> {
        let mut pages = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = client
                .get_query_results(
                    &handle.execution_id,
                    next_token.as_deref(),
                    config.max_results_per_page,
                )
                .await?;
            next_token = page.next_token.clone();
            pages.push(page);
            if next_token.is_none() {
                break;
            }
        }
        log::debug!("[RESULTS] {} fetched {} page(s)", handle.execution_id, pages.len());

        let rows = decode_pages(pages)?;
        handle.column_metadata = rows.metadata.clone();
        Ok(rows)
    }

    fn failure(
        execution_id: String,
        execution: QueryExecution,
        config: &QueryConfig,
    ) -> Result<QueryOutput<P::Dataset>> {
        if !config.raise_on_failure {
            return Ok(QueryOutput::Failed(execution));
        }
        Err(AthenaError::QueryFailed {
            execution_id,
            message: execution
                .error_message()
                .unwrap_or("no error message reported")
                .to_string(),
        })
    }
}

/// Polls an execution until it is no longer QUEUED or RUNNING.
///
/// Polls are spaced by `config.poll_interval()` with no upper bound on their
/// number; transport errors end the loop immediately.
pub async fn poll_until_done<C: SignAndSend>(
    client: &AthenaClient<C>,
    execution_id: &str,
    config: &QueryConfig,
) -> Result<QueryExecution> {
    let mut polls: u32 = 0;
    loop {
        let execution = client.get_query_execution(execution_id).await?;
        match execution.state() {
            QueryState::Queued | QueryState::Running => {
                polls = polls.saturating_add(1);
                if polls == config.poll_log_threshold.saturating_add(1) {
                    log::info!(
                        "[POLL] {} still {:?} after {} polls",
                        execution_id,
                        execution.state(),
                        config.poll_log_threshold
                    );
                }
                tokio::time::sleep(config.poll_interval()).await;
            }
            _ => return Ok(execution),
        }
    }
}

/// Builds the `StartQueryExecution` body for one phase, including its
/// idempotency token.
pub fn start_request(phase: &Query, config: &QueryConfig) -> Result<StartQueryExecutionRequest> {
    let mut request = StartQueryExecutionRequest {
        query_string: phase.render()?,
        client_request_token: None,
        query_execution_context: (config.database.is_some() || config.catalog.is_some()).then(|| {
            QueryExecutionContext {
                database: config.database.clone(),
                catalog: config.catalog.clone(),
            }
        }),
        result_configuration: config.output_location.as_ref().map(|location| ResultConfiguration {
            output_location: Some(location.clone()),
        }),
        work_group: config.workgroup.clone(),
    };
    let salt = (!config.cache_query).then(monotonic_stamp);
    request.client_request_token = Some(client_request_token(&request, salt)?);
    Ok(request)
}

/// SHA-256 of the request body, optionally mixed with a timestamp so that
/// identical submissions get distinct tokens.
pub fn client_request_token(request: &StartQueryExecutionRequest, salt: Option<u64>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(request)?);
    if let Some(salt) = salt {
        hasher.update(salt.to_be_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Wall-clock nanoseconds, strictly increasing across calls in this process.
fn monotonic_stamp() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let previous = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}
