//! Execution order for reads that touch both origins.
//!
//! Writes never consult this: they are always sequential, authoritative
//! first.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

/// How the old and new read paths are run when both are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// Start both reads and wait for both.
    #[default]
    Concurrent,
    /// Run old to completion, then new.
    SerialFixed,
    /// Flip a coin per call; run the chosen origin first, then the other.
    SerialRandom,
}

impl ExecutionOrder {
    /// Drives `old` and `new` according to this order.
    ///
    /// The returned tuple is always `(from_old, from_new)` regardless of which
    /// ran first. For the serial variants the second future is not polled
    /// until the first has completed.
    pub async fn run<T, Old, New>(self, old: Old, new: New) -> (T, T)
    where
        Old: Future<Output = T>,
        New: Future<Output = T>,
    {
        match self {
            Self::Concurrent => futures::join!(old, new),
            Self::SerialFixed => {
                let from_old = old.await;
                let from_new = new.await;
                (from_old, from_new)
            },
            Self::SerialRandom => {
                // Not for security purposes.
                if rand::random::<bool>() {
                    let from_old = old.await;
                    let from_new = new.await;
                    (from_old, from_new)
                } else {
                    let from_new = new.await;
                    let from_old = old.await;
                    (from_old, from_new)
                }
            },
        }
    }

    /// Returns the configuration name of this order.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Concurrent => "concurrent",
            Self::SerialFixed => "serial_fixed",
            Self::SerialRandom => "serial_random",
        }
    }
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
