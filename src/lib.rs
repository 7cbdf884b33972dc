// Copyright 2023 - See NOTICE file for copyright holders.
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

//! Two-party payment channel adjudicator.
//!
//! Participants exchange `(balance_a, balance_b, nonce)` states and
//! signatures off-channel and only bring them to the [`Adjudicator`] to
//! checkpoint, to close cooperatively, or to resolve a dispute once the
//! timeout window has elapsed. Time, custody and signature recovery are
//! supplied by the host through [`Clock`], [`Ledger`] and
//! [`SignatureVerifier`].

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use parking_lot::{Mutex, RwLock};

pub mod config;
pub mod host;
pub mod sig;
pub mod sol;

pub use config::Config;
#[cfg(any(test, feature = "testutils"))]
pub use host::{ManualClock, RecordingLedger};
pub use host::{Clock, Ledger, LedgerError, SystemClock, Timestamp};
pub use sig::{EcdsaVerifier, Signature, SignatureVerifier};
pub use sol::{get_channel_id, hash_state, signing_digest};

pub type ChannelId = B256;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("caller is not a participant of the channel")]
    Unauthorized,
    #[error("channel is already closed")]
    ChannelAlreadyClosed,
    #[error("invalid signature from participant A")]
    InvalidSignatureA,
    #[error("invalid signature from participant B")]
    InvalidSignatureB,
    #[error("invalid signature on disputed state")]
    InvalidSignature,
    #[error("channel timeout has not expired")]
    ChannelNotExpired,
    #[error("settlement of {amount} to {participant} failed after close: {reason}")]
    LedgerSettlementFailed {
        participant: Address,
        amount: U256,
        reason: String,
    },
    #[error("channel not found")]
    ChannelNotFound,
    #[error("channel already exists")]
    ChannelAlreadyExists,
    #[error("participants must be two distinct non-zero identities")]
    InvalidParticipants,
    #[error("timeout duration outside the accepted range")]
    InvalidTimeout,
    #[error("nonce {proposed} does not exceed current nonce {current}")]
    StaleNonce { current: U256, proposed: U256 },
    #[error("state does not preserve the channel's total balance")]
    BalanceMismatch,
}

impl Error {
    /// Stable numeric code for the error kind.
    pub fn code(&self) -> u32 {
        match self {
            Error::Unauthorized => 1,
            Error::ChannelAlreadyClosed => 2,
            Error::InvalidSignatureA => 3,
            Error::InvalidSignatureB => 4,
            Error::InvalidSignature => 5,
            Error::ChannelNotExpired => 6,
            Error::LedgerSettlementFailed { .. } => 7,
            Error::ChannelNotFound => 8,
            Error::ChannelAlreadyExists => 9,
            Error::InvalidParticipants => 10,
            Error::InvalidTimeout => 11,
            Error::StaleNonce { .. } => 12,
            Error::BalanceMismatch => 13,
        }
    }
}

/// The quantity both participants sign.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ChannelState {
    pub balance_a: U256,
    pub balance_b: U256,
    pub nonce: U256,
}

impl ChannelState {
    pub fn new(balance_a: U256, balance_b: U256, nonce: U256) -> Self {
        Self {
            balance_a,
            balance_b,
            nonce,
        }
    }

    pub fn hash(&self) -> B256 {
        hash_state(self)
    }

    /// `None` if the sum overflows.
    pub fn total(&self) -> Option<U256> {
        self.balance_a.checked_add(self.balance_b)
    }
}

/// Fixed at `open`, never mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Params {
    pub a: Address,
    pub b: Address,
    pub timeout_duration: u64,
    pub deposit: U256,
    pub open_nonce: u64,
}

impl Params {
    pub fn is_participant(&self, who: &Address) -> bool {
        *who == self.a || *who == self.b
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Control {
    pub closed: bool,
    pub expiry: Timestamp,
    pub settled_a: bool,
    pub settled_b: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub params: Params,
    pub state: ChannelState,
    pub state_hash: B256,
    pub control: Control,
}

impl Channel {
    pub fn balance_a(&self) -> U256 {
        self.state.balance_a
    }

    pub fn balance_b(&self) -> U256 {
        self.state.balance_b
    }

    pub fn closed(&self) -> bool {
        self.control.closed
    }

    pub fn expiry(&self) -> Timestamp {
        self.control.expiry
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.control.expiry
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Transition {
    Update,
    Close,
    Settle,
    ForceClose,
}

impl Transition {
    fn name(self) -> &'static str {
        match self {
            Transition::Update => "update_state",
            Transition::Close => "close_channel",
            Transition::Settle => "settle",
            Transition::ForceClose => "force_close",
        }
    }

    fn is_terminal(self) -> bool {
        !matches!(self, Transition::Update)
    }

    fn requires_expiry(self) -> bool {
        matches!(self, Transition::Settle | Transition::ForceClose)
    }

    fn extends_expiry(self) -> bool {
        matches!(self, Transition::Update | Transition::Close)
    }
}

struct ChannelSlot {
    params: Params,
    channel: Mutex<Channel>,
}

/// Owns every channel and drives their transitions.
///
/// Operations on one channel are serialized by a per-channel lock; different
/// channels proceed independently. Hashing and signature checks run outside
/// the lock.
pub struct Adjudicator<C, L, V = EcdsaVerifier> {
    config: Config,
    clock: C,
    ledger: L,
    verifier: V,
    channels: RwLock<HashMap<ChannelId, Arc<ChannelSlot>>>,
    next_open_nonce: Mutex<u64>,
}

impl<C: Clock, L: Ledger> Adjudicator<C, L, EcdsaVerifier> {
    pub fn new(clock: C, ledger: L) -> Self {
        Self::with_config(Config::default(), clock, ledger, EcdsaVerifier)
    }
}

impl<C: Clock, L: Ledger, V: SignatureVerifier> Adjudicator<C, L, V> {
    pub fn with_config(config: Config, clock: C, ledger: L, verifier: V) -> Self {
        Self {
            config,
            clock,
            ledger,
            verifier,
            channels: RwLock::new(HashMap::new()),
            next_open_nonce: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens a channel funded by `caller` with `deposit`. The caller becomes
    /// participant A.
    pub fn open(
        &self,
        caller: Address,
        counterparty: Address,
        timeout_duration: u64,
        deposit: U256,
    ) -> Result<ChannelId> {
        // checks
        if caller == counterparty || caller == Address::ZERO || counterparty == Address::ZERO {
            return Err(Error::InvalidParticipants);
        }
        if !self.config.accepts_timeout(timeout_duration) {
            return Err(Error::InvalidTimeout);
        }

        let mut open_nonce = self.next_open_nonce.lock();
        let params = Params {
            a: caller,
            b: counterparty,
            timeout_duration,
            deposit,
            open_nonce: *open_nonce,
        };
        let cid = get_channel_id(&params);
        let mut channels = self.channels.write();
        if channels.contains_key(&cid) {
            return Err(Error::ChannelAlreadyExists);
        }

        // effects
        let state = ChannelState {
            balance_a: deposit,
            balance_b: U256::ZERO,
            nonce: U256::ZERO,
        };
        let channel = Channel {
            id: cid,
            params: params.clone(),
            state_hash: hash_state(&state),
            state,
            control: Control {
                closed: false,
                expiry: self.clock.now().saturating_add(timeout_duration),
                settled_a: false,
                settled_b: false,
            },
        };
        tracing::info!(
            channel = %cid,
            a = %params.a,
            b = %params.b,
            deposit = %deposit,
            expiry = channel.control.expiry,
            "channel opened"
        );
        channels.insert(
            cid,
            Arc::new(ChannelSlot {
                params,
                channel: Mutex::new(channel),
            }),
        );
        *open_nonce += 1;
        Ok(cid)
    }

    /// Checkpoints a state signed by both participants. Extends the timeout
    /// window.
    pub fn update_state(
        &self,
        channel_id: &ChannelId,
        state: ChannelState,
        sig_a: &Signature,
        sig_b: &Signature,
        caller: &Address,
    ) -> Result<Channel> {
        let result = self.apply_dual_signed(channel_id, Transition::Update, state, sig_a, sig_b, caller);
        traced(Transition::Update, channel_id, result)
    }

    /// Closes the channel on a final state signed by both participants and
    /// pays out its balances.
    pub fn close_channel(
        &self,
        channel_id: &ChannelId,
        state: ChannelState,
        sig_a: &Signature,
        sig_b: &Signature,
        caller: &Address,
    ) -> Result<Channel> {
        let result = self.apply_dual_signed(channel_id, Transition::Close, state, sig_a, sig_b, caller);
        traced(Transition::Close, channel_id, result)
    }

    /// Closes an expired channel on the last recorded state.
    pub fn settle(&self, channel_id: &ChannelId, caller: &Address) -> Result<Channel> {
        let result = self.slot(channel_id).and_then(|slot| {
            let channel = self.commit(&slot, caller, Transition::Settle, None)?;
            self.disburse(&slot, channel)
        });
        traced(Transition::Settle, channel_id, result)
    }

    /// Closes an expired channel on a disputed state. Only participant A's
    /// signature is checked, whichever participant submits it.
    pub fn force_close(
        &self,
        channel_id: &ChannelId,
        state: ChannelState,
        sig_a: &Signature,
        caller: &Address,
    ) -> Result<Channel> {
        let result = self.slot(channel_id).and_then(|slot| {
            // checks
            self.precheck(&slot, caller, Transition::ForceClose)?;
            let digest = hash_state(&state);
            if !self.verifier.verify(&digest, sig_a, &slot.params.a) {
                return Err(Error::InvalidSignature);
            }

            // effects
            let channel = self.commit(&slot, caller, Transition::ForceClose, Some((state, digest)))?;

            // interact
            self.disburse(&slot, channel)
        });
        traced(Transition::ForceClose, channel_id, result)
    }

    pub fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel> {
        self.read(channel_id, Channel::clone)
    }

    pub fn balance_a(&self, channel_id: &ChannelId) -> Result<U256> {
        self.read(channel_id, |c| c.state.balance_a)
    }

    pub fn balance_b(&self, channel_id: &ChannelId) -> Result<U256> {
        self.read(channel_id, |c| c.state.balance_b)
    }

    pub fn nonce(&self, channel_id: &ChannelId) -> Result<U256> {
        self.read(channel_id, |c| c.state.nonce)
    }

    pub fn channel_closed(&self, channel_id: &ChannelId) -> Result<bool> {
        self.read(channel_id, |c| c.control.closed)
    }

    pub fn expiry(&self, channel_id: &ChannelId) -> Result<Timestamp> {
        self.read(channel_id, |c| c.control.expiry)
    }

    pub fn current_state_hash(&self, channel_id: &ChannelId) -> Result<B256> {
        self.read(channel_id, |c| c.state_hash)
    }

    pub fn timeout_duration(&self, channel_id: &ChannelId) -> Result<u64> {
        Ok(self.slot(channel_id)?.params.timeout_duration)
    }

    pub fn participants(&self, channel_id: &ChannelId) -> Result<(Address, Address)> {
        let slot = self.slot(channel_id)?;
        Ok((slot.params.a, slot.params.b))
    }

    fn slot(&self, channel_id: &ChannelId) -> Result<Arc<ChannelSlot>> {
        self.channels
            .read()
            .get(channel_id)
            .cloned()
            .ok_or(Error::ChannelNotFound)
    }

    fn read<T>(&self, channel_id: &ChannelId, f: impl FnOnce(&Channel) -> T) -> Result<T> {
        let slot = self.slot(channel_id)?;
        let channel = slot.channel.lock();
        Ok(f(&channel))
    }

    fn apply_dual_signed(
        &self,
        channel_id: &ChannelId,
        transition: Transition,
        state: ChannelState,
        sig_a: &Signature,
        sig_b: &Signature,
        caller: &Address,
    ) -> Result<Channel> {
        // checks
        let slot = self.slot(channel_id)?;
        self.precheck(&slot, caller, transition)?;
        let digest = hash_state(&state);
        if !self.verifier.verify(&digest, sig_a, &slot.params.a) {
            return Err(Error::InvalidSignatureA);
        }
        if !self.verifier.verify(&digest, sig_b, &slot.params.b) {
            return Err(Error::InvalidSignatureB);
        }

        // effects
        let channel = self.commit(&slot, caller, transition, Some((state, digest)))?;

        // interact
        if transition.is_terminal() {
            self.disburse(&slot, channel)
        } else {
            Ok(channel)
        }
    }

    /// Lock-protected checks run before signatures are verified, so that a
    /// closed channel or a foreign caller is reported as such.
    fn precheck(&self, slot: &ChannelSlot, caller: &Address, transition: Transition) -> Result<()> {
        let now = self.clock.now();
        let channel = slot.channel.lock();
        check_access(&channel, caller, transition, now)
    }

    /// Re-validates under the channel lock and applies the transition. A
    /// terminal transition marks the channel closed here, before any ledger
    /// call is made.
    fn commit(
        &self,
        slot: &ChannelSlot,
        caller: &Address,
        transition: Transition,
        proposed: Option<(ChannelState, B256)>,
    ) -> Result<Channel> {
        let now = self.clock.now();
        let mut channel = slot.channel.lock();

        // checks
        check_access(&channel, caller, transition, now)?;
        if let Some((state, _)) = &proposed {
            self.check_state_transition(&channel.state, state)?;
        }

        // effects
        if let Some((state, digest)) = proposed {
            channel.state = state;
            channel.state_hash = digest;
        }
        if transition.extends_expiry() {
            let expiry = now.saturating_add(slot.params.timeout_duration);
            channel.control.expiry = channel.control.expiry.max(expiry);
        }
        if transition.is_terminal() {
            channel.control.closed = true;
        }
        Ok(channel.clone())
    }

    fn check_state_transition(&self, current: &ChannelState, proposed: &ChannelState) -> Result<()> {
        if proposed.nonce <= current.nonce {
            return Err(Error::StaleNonce {
                current: current.nonce,
                proposed: proposed.nonce,
            });
        }
        if self.config.enforce_conservation {
            match (current.total(), proposed.total()) {
                (Some(old), Some(new)) if old == new => {}
                _ => return Err(Error::BalanceMismatch),
            }
        }
        Ok(())
    }

    /// Pays both participants out of a channel that is already closed. Each
    /// participant is attempted exactly once; a failure leaves the channel
    /// closed and is reported to the caller.
    fn disburse(&self, slot: &ChannelSlot, closed: Channel) -> Result<Channel> {
        let (a, b) = (slot.params.a, slot.params.b);
        let (bal_a, bal_b) = (closed.state.balance_a, closed.state.balance_b);
        let paid_a = self.ledger.settle(&a, bal_a);
        let paid_b = self.ledger.settle(&b, bal_b);

        let channel = {
            let mut channel = slot.channel.lock();
            channel.control.settled_a = paid_a.is_ok();
            channel.control.settled_b = paid_b.is_ok();
            channel.clone()
        };

        let mut failure = None;
        for (participant, amount, paid) in [(a, bal_a, paid_a), (b, bal_b, paid_b)] {
            if let Err(err) = paid {
                tracing::error!(
                    channel = %channel.id,
                    participant = %participant,
                    amount = %amount,
                    error = %err,
                    "settlement failed on closed channel"
                );
                if failure.is_none() {
                    failure = Some(Error::LedgerSettlementFailed {
                        participant,
                        amount,
                        reason: err.reason,
                    });
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(channel),
        }
    }
}

fn check_access(channel: &Channel, caller: &Address, transition: Transition, now: Timestamp) -> Result<()> {
    if channel.control.closed {
        return Err(Error::ChannelAlreadyClosed);
    }
    if !channel.params.is_participant(caller) {
        return Err(Error::Unauthorized);
    }
    if transition.requires_expiry() && !channel.is_expired(now) {
        return Err(Error::ChannelNotExpired);
    }
    Ok(())
}

fn traced(transition: Transition, channel_id: &ChannelId, result: Result<Channel>) -> Result<Channel> {
    match &result {
        Ok(channel) => tracing::info!(
            channel = %channel_id,
            op = transition.name(),
            balance_a = %channel.state.balance_a,
            balance_b = %channel.state.balance_b,
            nonce = %channel.state.nonce,
            closed = channel.control.closed,
            expiry = channel.control.expiry,
            "channel transition applied"
        ),
        Err(err) => tracing::debug!(
            channel = %channel_id,
            op = transition.name(),
            code = err.code(),
            error = %err,
            "channel transition rejected"
        ),
    }
    result
}

#[cfg(test)]
mod ethsig;
