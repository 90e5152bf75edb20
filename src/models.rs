use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request body for `StartQueryExecution`
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StartQueryExecutionRequest {
    pub query_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_request_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_execution_context: Option<QueryExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_configuration: Option<ResultConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_group: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ResultConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StartQueryExecutionResponse {
    pub query_execution_id: String,
}

/// Request body shared by `GetQueryExecution` and `StopQueryExecution`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionIdRequest {
    pub query_execution_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryExecutionResponse {
    pub query_execution: QueryExecution,
}

/// Everything the engine reports about one execution.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_configuration: Option<ResultConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<QueryExecutionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_group: Option<String>,
}

impl QueryExecution {
    pub fn state(&self) -> QueryState {
        self.status
            .as_ref()
            .map(|s| QueryState::from(s.state.as_str()))
            .unwrap_or_else(|| QueryState::Unknown(String::new()))
    }

    pub fn output_location(&self) -> Option<&str> {
        self.result_configuration
            .as_ref()
            .and_then(|c| c.output_location.as_deref())
    }

    /// The engine's own error text, falling back to the state change reason.
    pub fn error_message(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        status
            .athena_error
            .as_ref()
            .and_then(|e| e.error_message.as_deref())
            .or(status.state_change_reason.as_deref())
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct QueryExecutionStatus {
    /// Examples: "QUEUED", "RUNNING", "SUCCEEDED", "FAILED", "CANCELLED"
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_change_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub athena_error: Option<EngineErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_date_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date_time: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EngineErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Execution state as reported in `QueryExecution.Status.State`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Unknown(String),
}

impl From<&str> for QueryState {
    fn from(state: &str) -> Self {
        match state {
            "QUEUED" => QueryState::Queued,
            "RUNNING" => QueryState::Running,
            "SUCCEEDED" => QueryState::Succeeded,
            "FAILED" => QueryState::Failed,
            other => QueryState::Unknown(other.to_string()),
        }
    }
}

/// Request body for `GetQueryResults`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryResultsRequest {
    pub query_execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

/// One page of `GetQueryResults`
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GetQueryResultsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_set: Option<ResultSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    /// Rows affected by DML statements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_count: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ResultSet {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_set_metadata: Option<ResultSetMetadata>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ResultSetMetadata {
    #[serde(default)]
    pub column_info: Vec<ColumnInfo>,
}

/// Per-column metadata supplied by the engine
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Row {
    #[serde(default)]
    pub data: Vec<Datum>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Datum {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub var_char_value: Option<String>,
}

/// Possible errors encountered by the Athena client
#[derive(Error, Debug)]
pub enum AthenaError {
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query {execution_id} failed: {message}")]
    QueryFailed {
        execution_id: String,
        message: String,
    },

    #[error("HTTP {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("Cannot decode {value:?} as {type_name}: {reason}")]
    Decode {
        value: String,
        type_name: String,
        reason: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AthenaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_uses_engine_field_names() {
        let request = StartQueryExecutionRequest {
            query_string: "SELECT 1".to_string(),
            client_request_token: Some("tok".to_string()),
            query_execution_context: Some(QueryExecutionContext {
                database: Some("db".to_string()),
                catalog: None,
            }),
            result_configuration: Some(ResultConfiguration {
                output_location: Some("s3://bucket/out/".to_string()),
            }),
            work_group: Some("primary".to_string()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "QueryString": "SELECT 1",
                "ClientRequestToken": "tok",
                "QueryExecutionContext": {"Database": "db"},
                "ResultConfiguration": {"OutputLocation": "s3://bucket/out/"},
                "WorkGroup": "primary"
            })
        );
    }

    #[test]
    fn test_query_execution_failure_message() {
        let body = r#"{
            "QueryExecution": {
                "QueryExecutionId": "abc",
                "Status": {
                    "State": "FAILED",
                    "StateChangeReason": "reason",
                    "AthenaError": {"ErrorCategory": 2, "ErrorMessage": "line 1:8: Column 'x' cannot be resolved"}
                }
            }
        }"#;
        let resp: GetQueryExecutionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.query_execution.state(), QueryState::Failed);
        assert_eq!(
            resp.query_execution.error_message(),
            Some("line 1:8: Column 'x' cannot be resolved")
        );
    }

    #[test]
    fn test_results_page_parses_null_cells() {
        let body = r#"{
            "ResultSet": {
                "Rows": [{"Data": [{"VarCharValue": "id"}, {"VarCharValue": "name"}]},
                         {"Data": [{"VarCharValue": "1"}, {}]}],
                "ResultSetMetadata": {"ColumnInfo": [
                    {"Name": "id", "Type": "integer", "Precision": 10},
                    {"Name": "name", "Type": "varchar"}
                ]}
            },
            "NextToken": "page2"
        }"#;
        let page: GetQueryResultsResponse = serde_json::from_str(body).unwrap();
        let set = page.result_set.unwrap();
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[1].data[1].var_char_value, None);
        assert_eq!(set.result_set_metadata.unwrap().column_info[0].type_name, "integer");
        assert_eq!(page.next_token.as_deref(), Some("page2"));
    }

    #[test]
    fn test_unknown_state_is_preserved() {
        assert_eq!(
            QueryState::from("CANCELLED"),
            QueryState::Unknown("CANCELLED".to_string())
        );
    }
}
