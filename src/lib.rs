//! Client for a poll-based remote SQL engine (Amazon Athena).
//!
//! Submit a [`Query`] through [`AthenaService::execute`], which polls the
//! execution to completion and returns typed rows or file-backed results
//! according to [`QueryConfig::output`].

pub mod client;
pub mod config;
pub mod decode;
pub mod models;
pub mod query;
pub mod results;
pub mod service;
pub mod transport;
pub mod value;

pub use client::AthenaClient;
pub use config::{
    CredentialProvider, Credentials, EnvCredentialProvider, NoCredentials, QueryConfig,
    ResultFormat, StaticCredentialProvider,
};
pub use decode::{decode_cell, TypeTag};
pub use models::{AthenaError, QueryExecution, QueryState, Result};
pub use query::{MaterializeSpec, OutputFormat, Query};
pub use results::{ExecutionHandle, NoPartitionReader, PartitionReader, QueryOutput, ResultRows};
pub use service::AthenaService;
pub use transport::{
    EngineRequest, EngineResponse, HttpObjectFetcher, HttpTransport, ObjectFetcher, RequestSigner,
    SignAndSend, UnsignedRequests,
};
pub use value::Value;
