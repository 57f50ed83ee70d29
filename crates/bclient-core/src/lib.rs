pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod socket;

pub use client::{BlockId, NodeClient, WalletClient};
pub use config::{ClientConfig, Network, ReconnectConfig, Service};
pub use correlator::{CallHandle, Correlator};
pub use dispatcher::{Event, Listener, ListenerError, ListenerRegistry};
pub use error::ClientError;
pub use socket::{ConnectionState, SocketChannel};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, ignoring poisoning. The guarded maps stay consistent
/// across a panicking listener because no invariant spans a lock release.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
