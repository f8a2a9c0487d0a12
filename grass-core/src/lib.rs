mod auth;
mod client;
mod storage;

pub use auth::{AuthClient, AuthError, Session};
pub use client::{
    ApiErrorClass, CloudError, DatabaseClient, is_transient_status, is_transport_failure,
};
pub use storage::{ObjectMetadata, StorageClient, auth_header_value};
