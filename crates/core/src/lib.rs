//! Core domain types and shared contracts for the ferry pipeline.
//!
//! This crate defines the data model every other crate speaks:
//! - Leasable credentials and their well-known keys
//! - Extraction jobs and their lifecycle
//! - Resolved source items and candidate links
//! - Upload and balance ledger records
//! - Typed queue messages and the queue topology
//! - Application configuration

pub mod config;
pub mod credential;
pub mod error;
pub mod job;
pub mod ledger;
pub mod messages;
pub mod source;
pub mod topology;

pub use credential::{Credential, CredentialKey, CredentialStatus};
pub use error::{Error, Result};
pub use job::{ExtractionJob, ExtractionStatus};
pub use ledger::{BalanceEntry, TransactionType, UploadLedgerEntry, UploadStatus};
pub use messages::{
    CookieRevoked, ExportRequest, Message, RecheckRequest, ResolveRequest, UploadRequest,
};
pub use source::{CandidateLink, SourceItem};
pub use topology::{EXCHANGE, QueueBinding, Route};
