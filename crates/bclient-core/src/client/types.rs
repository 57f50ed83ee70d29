//! Response shapes the facades decode into. Anything not listed here is
//! passed through as raw JSON.

use serde::{Deserialize, Serialize};

/// Wallet or account balance, in satoshis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
    /// Transaction count.
    #[serde(default)]
    pub tx: u64,
    /// Unspent coin count.
    #[serde(default)]
    pub coin: u64,
}

/// Fee rate estimate from `/fee`, in satoshis per kvB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub rate: u64,
}
