//! System-wide constants for the Clearhouse settlement protocol.

/// Validity window attached to a settlement transaction, in seconds.
pub const DEFAULT_TIME_WINDOW_SECS: u64 = 60;

/// Validity window attached to a transfer-request creation, in seconds.
pub const CREATE_REQUEST_TIME_WINDOW_SECS: u64 = 30;

/// How long to wait for a counterparty reply before aborting, in milliseconds.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

/// How long to wait for the ordering authority's verdict, in milliseconds.
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 60_000;

/// Buffered messages per direction on an in-process session channel.
pub const SESSION_CHANNEL_CAPACITY: usize = 16;

/// Contract governing [`TransferRecord`](crate::TransferRecord) states.
pub const TRANSFER_CONTRACT_ID: &str = "clearhouse.contracts.AssetTransfer";

/// Contract governing security positions.
pub const ASSET_CONTRACT_ID: &str = "clearhouse.contracts.Asset";

/// Contract governing cash.
pub const CASH_CONTRACT_ID: &str = "clearhouse.contracts.Cash";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Clearhouse";
