pub mod cache;
pub mod chain;
pub mod error;
pub mod etag;
pub mod health;
pub mod image;
pub mod metadata;
pub mod pin;
pub mod rpc;
pub mod storage;
pub mod types;
pub mod uri;

pub use chain::{ChainId, EndpointPool};
pub use error::{ErrorKind, ResolveError};
pub use health::audit_token;
pub use metadata::MetadataResolver;
pub use pin::PinProbe;
pub use rpc::RpcResolver;
pub use types::{AuditRecord, ContractAddress, MetadataRecord, PinStatus, StorageKind, TokenId, TokenKey};
