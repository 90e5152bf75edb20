//! Query model: the SQL text sent to the engine for each protocol phase.
//!
//! A parameterized query runs in two phases. The first renders
//! `PREPARE <name> FROM <text>`; once that succeeds, [`Query::execute_phase`]
//! produces the otherwise identical query that renders
//! `EXECUTE <name> USING <literals>`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{AthenaError, Result};
use crate::value::Value;

/// File format written by an `UNLOAD` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
    /// Parquet partitions.
    Columnar,
    /// Newline-delimited JSON records.
    RecordJson,
}

impl OutputFormat {
    fn engine_name(self) -> &'static str {
        match self {
            OutputFormat::Columnar => "PARQUET",
            OutputFormat::RecordJson => "JSON",
        }
    }
}

/// Instructs the engine to write SELECT output to `destination` instead of
/// returning it inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeSpec {
    pub destination: String,
    pub output_format: OutputFormat,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub compression_level: Option<u32>,
    #[serde(default)]
    pub field_delimiter: Option<String>,
    #[serde(default)]
    pub partition_columns: Option<Vec<String>>,
}

impl MaterializeSpec {
    pub fn new(destination: impl Into<String>, output_format: OutputFormat) -> Self {
        Self {
            destination: destination.into(),
            output_format,
            compression: None,
            compression_level: None,
            field_delimiter: None,
            partition_columns: None,
        }
    }

    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level);
        self
    }

    pub fn with_field_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.field_delimiter = Some(delimiter.into());
        self
    }

    pub fn with_partition_columns(mut self, columns: Vec<String>) -> Self {
        self.partition_columns = Some(columns);
        self
    }

    /// `key = value` pairs in key order, unset options omitted.
    fn with_clause(&self) -> String {
        let mut options: BTreeMap<&str, String> = BTreeMap::new();
        options.insert("format", quote(self.output_format.engine_name()));
        if let Some(compression) = &self.compression {
            options.insert("compression", quote(compression));
        }
        if let Some(level) = self.compression_level {
            options.insert("compression_level", level.to_string());
        }
        if let Some(delimiter) = &self.field_delimiter {
            options.insert("field_delimiter", quote(delimiter));
        }
        if let Some(columns) = &self.partition_columns {
            let columns: Vec<String> = columns.iter().map(|c| quote(c)).collect();
            options.insert("partitioned_by", format!("ARRAY[{}]", columns.join(", ")));
        }
        options
            .iter()
            .map(|(key, value)| format!("{} = {}", key, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s)
}

/// One statement to run against the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    params: Vec<Value>,
    statement_name: Option<String>,
    prepared: bool,
    materialize: Option<MaterializeSpec>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
            statement_name: None,
            prepared: false,
            materialize: None,
        }
    }

    /// Positional parameters bound to `?` placeholders.
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Name under which a parameterized statement is prepared.
    pub fn with_statement_name(mut self, name: impl Into<String>) -> Self {
        self.statement_name = Some(name.into());
        self
    }

    pub fn with_materialize(mut self, spec: MaterializeSpec) -> Self {
        self.materialize = Some(spec);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn statement_name(&self) -> Option<&str> {
        self.statement_name.as_deref()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn materialize(&self) -> Option<&MaterializeSpec> {
        self.materialize.as_ref()
    }

    /// The materialize directive if it takes effect. The engine only unloads
    /// SELECT statements, so a directive on anything else is ignored.
    pub fn effective_materialize(&self) -> Option<&MaterializeSpec> {
        self.materialize.as_ref().filter(|_| self.is_select())
    }

    pub fn is_select(&self) -> bool {
        let leading: String = self
            .text
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        leading.eq_ignore_ascii_case("select")
    }

    pub fn requires_prepare(&self) -> bool {
        !self.params.is_empty() && !self.prepared
    }

    /// The query for the EXECUTE phase that follows a successful PREPARE.
    pub fn execute_phase(&self) -> Result<Query> {
        if self.params.is_empty() {
            return Err(AthenaError::Configuration(
                "only parameterized queries have an execute phase".to_string(),
            ));
        }
        self.require_statement_name()?;
        Ok(Query {
            prepared: true,
            ..self.clone()
        })
    }

    /// SQL text to submit for this phase of the query.
    pub fn render(&self) -> Result<String> {
        if self.prepared {
            let name = self.require_statement_name()?;
            let literals: Vec<String> = self.params.iter().map(Value::to_sql_literal).collect();
            return Ok(format!("EXECUTE {} USING {}", name, literals.join(", ")));
        }

        let body = self.wrapped_text();
        if self.params.is_empty() {
            return Ok(body);
        }
        let name = self.require_statement_name()?;
        Ok(format!("PREPARE {} FROM {}", name, body))
    }

    fn wrapped_text(&self) -> String {
        match self.effective_materialize() {
            Some(spec) => format!(
                "UNLOAD ({}) TO '{}' WITH ({})",
                self.text,
                spec.destination,
                spec.with_clause()
            ),
            None => self.text.clone(),
        }
    }

    fn require_statement_name(&self) -> Result<&str> {
        self.statement_name.as_deref().ok_or_else(|| {
            AthenaError::Configuration(
                "a statement name is required for parameterized queries".to_string(),
            )
        })
    }
}
