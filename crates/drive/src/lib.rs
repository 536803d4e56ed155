//! Remote drive API client for the ferry pipeline.
//!
//! [`FolderLister`] backs the tree extractor and [`VideoInfoSource`] backs the
//! source resolver. Workers depend on the traits so tests can substitute
//! in-memory fakes for [`HttpDriveClient`].

pub mod client;
pub mod error;
pub mod types;

pub use client::{FolderLister, HttpDriveClient, SESSION_COOKIE, VideoInfoSource, listing_query};
pub use error::{DriveError, DriveResult};
pub use types::{FolderPage, VideoInfo};
