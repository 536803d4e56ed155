//! Repository traits for metadata operations.

pub mod balances;
pub mod credentials;
pub mod jobs;
pub mod sources;
pub mod upload_logs;

pub use balances::BalanceRepo;
pub use credentials::CredentialRepo;
pub use jobs::JobRepo;
pub use sources::SourceRepo;
pub use upload_logs::UploadLedgerRepo;
