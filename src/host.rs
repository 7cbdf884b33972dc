// Copyright 2025 - See NOTICE file for copyright holders.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Capabilities the adjudicator borrows from its host: a time source and the
//! custody ledger that pays out settled balances.

use alloy_primitives::{Address, U256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the UNIX epoch.
pub type Timestamp = u64;

/// Monotonically non-decreasing time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ledger rejected disbursement: {reason}")]
pub struct LedgerError {
    pub reason: String,
}

impl LedgerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Moves custody funds to a participant. The adjudicator calls it at most
/// once per participant per channel, after the channel is closed.
pub trait Ledger: Send + Sync {
    fn settle(&self, to: &Address, amount: U256) -> Result<(), LedgerError>;
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

impl<T: Ledger + ?Sized> Ledger for std::sync::Arc<T> {
    fn settle(&self, to: &Address, amount: U256) -> Result<(), LedgerError> {
        (**self).settle(to, amount)
    }
}

#[cfg(any(test, feature = "testutils"))]
pub use testutils::{ManualClock, RecordingLedger};

#[cfg(any(test, feature = "testutils"))]
mod testutils {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock that only moves when told to.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now: AtomicU64,
    }

    impl ManualClock {
        pub fn new(start: Timestamp) -> Self {
            Self {
                now: AtomicU64::new(start),
            }
        }

        pub fn set(&self, now: Timestamp) {
            self.now.fetch_max(now, Ordering::SeqCst);
        }

        pub fn advance(&self, secs: u64) {
            self.now.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// Records every disbursement. Recipients added with `fail_for` are
    /// refused.
    #[derive(Debug, Default)]
    pub struct RecordingLedger {
        calls: Mutex<Vec<(Address, U256)>>,
        failing: Mutex<HashSet<Address>>,
    }

    impl RecordingLedger {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_for(&self, to: Address) {
            self.failing.lock().insert(to);
        }

        /// Every attempted call, including refused ones, in order.
        pub fn calls(&self) -> Vec<(Address, U256)> {
            self.calls.lock().clone()
        }

        pub fn calls_to(&self, to: &Address) -> Vec<U256> {
            self.calls
                .lock()
                .iter()
                .filter(|(addr, _)| addr == to)
                .map(|(_, amount)| *amount)
                .collect()
        }
    }

    impl Ledger for RecordingLedger {
        fn settle(&self, to: &Address, amount: U256) -> Result<(), LedgerError> {
            self.calls.lock().push((*to, amount));
            if self.failing.lock().contains(to) {
                return Err(LedgerError::new(format!("transfer to {to} refused")));
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn manual_clock_never_goes_backwards() {
            let clock = ManualClock::new(100);
            clock.advance(5);
            assert_eq!(clock.now(), 105);
            clock.set(50);
            assert_eq!(clock.now(), 105);
            clock.set(200);
            assert_eq!(clock.now(), 200);
        }

        #[test]
        fn recording_ledger_records_refused_calls() {
            let ledger = RecordingLedger::new();
            let a = Address::repeat_byte(1);
            let b = Address::repeat_byte(2);
            ledger.fail_for(b);
            assert!(ledger.settle(&a, U256::from(3)).is_ok());
            assert!(ledger.settle(&b, U256::from(4)).is_err());
            assert_eq!(ledger.calls(), vec![(a, U256::from(3)), (b, U256::from(4))]);
            assert_eq!(ledger.calls_to(&b), vec![U256::from(4)]);
        }
    }
}
