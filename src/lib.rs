pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod manager;

pub use crate::core::{FileRecord, SyncSet, TransferFailure};
pub use config::{RemoteConfig, RemoteType, TransferConfig};
pub use error::{RemoteCallError, RemoteErrorKind, SyncError};
pub use gateway::{GatewayFactory, RemoteGateway, StoreGateway};
pub use manager::FileManager;
