//! Turns a completed execution into the caller's requested result shape.

use std::collections::HashMap;

use crate::config::{Credentials, QueryConfig, ResultFormat};
use crate::decode::decode_row;
use crate::models::{AthenaError, ColumnInfo, GetQueryResultsResponse, QueryExecution, Result};
use crate::query::{OutputFormat, Query};
use crate::transport::ObjectFetcher;
use crate::value::Value;

/// What the engine reported for a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionHandle {
    pub execution_id: String,
    pub result_location: Option<String>,
    pub column_metadata: Vec<ColumnInfo>,
}

impl ExecutionHandle {
    fn require_location(&self) -> Result<&str> {
        self.result_location.as_deref().ok_or_else(|| {
            AthenaError::Other(format!(
                "execution {} reported no result location",
                self.execution_id
            ))
        })
    }
}

/// Decoded inline results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub metadata: Vec<ColumnInfo>,
    /// Rows affected, for DML statements.
    pub update_count: Option<i64>,
}

impl ResultRows {
    pub fn row_as_map(&self, row_idx: usize) -> Option<HashMap<String, Value>> {
        let row = self.rows.get(row_idx)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
        )
    }

    pub fn rows_as_maps(&self) -> Vec<HashMap<String, Value>> {
        (0..self.rows.len())
            .filter_map(|i| self.row_as_map(i))
            .collect()
    }
}

/// Result of one query call. `D` is the partition reader's dataset type.
#[derive(Debug)]
pub enum QueryOutput<D> {
    Rows(ResultRows),
    /// Bytes of the engine's CSV result file, unmodified.
    Delimited(Vec<u8>),
    /// One value per JSON line, in manifest order.
    Records(Vec<Value>),
    Dataset(D),
    /// Result file location, when fetching is disabled.
    Location(String),
    /// Manifest entries, when fetching is disabled.
    Locations(Vec<String>),
    /// The engine's status payload for a failed execution.
    Failed(QueryExecution),
}

impl<D> QueryOutput<D> {
    pub fn is_failed(&self) -> bool {
        matches!(self, QueryOutput::Failed(_))
    }

    pub fn failure(&self) -> Option<&QueryExecution> {
        match self {
            QueryOutput::Failed(execution) => Some(execution),
            _ => None,
        }
    }

    pub fn rows(&self) -> Option<&ResultRows> {
        match self {
            QueryOutput::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Builds a columnar dataset from `UNLOAD` partitions.
pub trait PartitionReader {
    type Dataset;

    /// Opens one partition lazily.
    fn scan_partition(&self, url: &str, credentials: &Credentials) -> Result<Self::Dataset>;

    /// Concatenates partitions row-wise. Row order across partitions is not
    /// guaranteed by the engine.
    fn concat_rows(&self, partitions: Vec<Self::Dataset>) -> Result<Self::Dataset>;
}

/// Rejects the columnar format.
#[derive(Debug, Clone, Default)]
pub struct NoPartitionReader;

impl PartitionReader for NoPartitionReader {
    type Dataset = ();

    fn scan_partition(&self, url: &str, _credentials: &Credentials) -> Result<()> {
        Err(AthenaError::Configuration(format!(
            "no partition reader configured to load {}",
            url
        )))
    }

    fn concat_rows(&self, _partitions: Vec<()>) -> Result<()> {
        Ok(())
    }
}

/// Checks, before any request is made, that file-backed formats have a
/// matching `UNLOAD` directive to read from.
pub fn check_output_request(query: &Query, config: &QueryConfig) -> Result<()> {
    let required = match config.output {
        ResultFormat::Records => OutputFormat::RecordJson,
        ResultFormat::Columnar => OutputFormat::Columnar,
        ResultFormat::Inline | ResultFormat::Delimited => return Ok(()),
    };
    match query.effective_materialize() {
        Some(spec) if spec.destination.is_empty() => Err(AthenaError::Configuration(
            "materialize destination is empty".to_string(),
        )),
        Some(spec) if spec.output_format == required => Ok(()),
        Some(spec) => Err(AthenaError::Configuration(format!(
            "{:?} output needs a {:?} materialize directive, got {:?}",
            config.output, required, spec.output_format
        ))),
        None => Err(AthenaError::Configuration(format!(
            "{:?} output needs a materialize directive on a SELECT statement",
            config.output
        ))),
    }
}

pub fn manifest_url(result_location: &str) -> String {
    format!("{}-manifest.csv", result_location)
}

/// One object URL per line; blank lines are skipped.
pub fn parse_manifest(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decodes every non-empty line as one JSON record.
pub fn parse_records(text: &str) -> Result<Vec<Value>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(Value::from(serde_json::from_str::<serde_json::Value>(line)?)))
        .collect()
}

/// Concatenates result pages and decodes them with the column metadata.
pub fn decode_pages(pages: Vec<GetQueryResultsResponse>) -> Result<ResultRows> {
    let mut metadata: Vec<ColumnInfo> = Vec::new();
    let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut update_count = None;

    for page in pages {
        update_count = update_count.or(page.update_count);
        let Some(set) = page.result_set else {
            continue;
        };
        if metadata.is_empty() {
            if let Some(meta) = set.result_set_metadata {
                metadata = meta.column_info;
            }
        }
        raw_rows.extend(
            set.rows
                .into_iter()
                .map(|row| row.data.into_iter().map(|d| d.var_char_value).collect()),
        );
    }

    let columns: Vec<String> = metadata.iter().map(|c| c.name.clone()).collect();
    if raw_rows.first().is_some_and(|row| is_header_row(row, &columns)) {
        raw_rows.remove(0);
    }

    let rows = raw_rows
        .iter()
        .map(|cells| decode_row(cells, &metadata))
        .collect::<Result<Vec<_>>>()?;

    Ok(ResultRows {
        columns,
        rows,
        metadata,
        update_count,
    })
}

/// Object contents as text. Invalid UTF-8 is a decode failure.
fn utf8_text(url: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| AthenaError::Decode {
        value: url.to_string(),
        type_name: "utf-8 text".to_string(),
        reason: e.to_string(),
    })
}

/// SELECT results repeat the column labels as their first row.
fn is_header_row(row: &[Option<String>], columns: &[String]) -> bool {
    !columns.is_empty()
        && row.len() == columns.len()
        && row
            .iter()
            .zip(columns)
            .all(|(cell, name)| cell.as_deref() == Some(name.as_str()))
}

/// Reads file-backed results through the object store.
pub struct ResultMaterializer<'a, F, P> {
    objects: &'a F,
    partitions: &'a P,
    credentials: &'a Credentials,
    fetch_body: bool,
}

impl<'a, F: ObjectFetcher, P: PartitionReader> ResultMaterializer<'a, F, P> {
    pub fn new(
        objects: &'a F,
        partitions: &'a P,
        credentials: &'a Credentials,
        fetch_body: bool,
    ) -> Self {
        Self {
            objects,
            partitions,
            credentials,
            fetch_body,
        }
    }

    pub async fn materialize(
        &self,
        handle: &ExecutionHandle,
        format: ResultFormat,
    ) -> Result<QueryOutput<P::Dataset>> {
        match format {
            ResultFormat::Delimited => self.delimited(handle).await,
            ResultFormat::Records => self.records(handle).await,
            ResultFormat::Columnar => self.columnar(handle).await,
            ResultFormat::Inline => Err(AthenaError::Other(
                "inline results are read from the engine, not the object store".to_string(),
            )),
        }
    }

    async fn delimited(&self, handle: &ExecutionHandle) -> Result<QueryOutput<P::Dataset>> {
        let location = handle.require_location()?;
        if !self.fetch_body {
            return Ok(QueryOutput::Location(location.to_string()));
        }
        let bytes = self.objects.fetch_object(location).await?;
        Ok(QueryOutput::Delimited(bytes))
    }

    async fn records(&self, handle: &ExecutionHandle) -> Result<QueryOutput<P::Dataset>> {
        let urls = self.manifest(handle).await?;
        if !self.fetch_body {
            return Ok(QueryOutput::Locations(urls));
        }

        let mut records = Vec::new();
        for url in &urls {
            let bytes = self.objects.fetch_object(url).await?;
            records.extend(parse_records(&utf8_text(url, bytes)?)?);
        }
        Ok(QueryOutput::Records(records))
    }

    async fn columnar(&self, handle: &ExecutionHandle) -> Result<QueryOutput<P::Dataset>> {
        let urls = self.manifest(handle).await?;
        if !self.fetch_body {
            return Ok(QueryOutput::Locations(urls));
        }

        let partitions = urls
            .iter()
            .map(|url| self.partitions.scan_partition(url, self.credentials))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryOutput::Dataset(self.partitions.concat_rows(partitions)?))
    }

    async fn manifest(&self, handle: &ExecutionHandle) -> Result<Vec<String>> {
        let url = manifest_url(handle.require_location()?);
        let bytes = self.objects.fetch_object(&url).await?;
        let urls = parse_manifest(&utf8_text(&url, bytes)?);
        log::debug!("[MANIFEST] {} lists {} objects", url, urls.len());
        Ok(urls)
    }
}
