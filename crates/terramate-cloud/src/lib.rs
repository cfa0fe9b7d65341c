//! Cloud sync client and credential chain: the narrow interfaces the
//! scheduler's Cloud Sync Lifecycle observer is built against.

pub mod client;
pub mod credentials;
pub mod error;
pub mod fake;
pub mod types;

pub use client::{CloudClient, HttpCloudClient};
pub use credentials::{CredentialChain, CredentialProvider};
pub use error::{CloudError, CloudResult};
pub use fake::FakeCloudClient;
