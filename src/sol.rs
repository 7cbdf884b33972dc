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

//! Solidity ABI encodings of channel data and the digests derived from them.

use crate::{ChannelId, ChannelState, Params};
use alloy_primitives::{keccak256, B256};
use alloy_sol_macro::sol;
use alloy_sol_types::SolValue;

/// Preamble prepended to a 32 byte digest before it is signed. The trailing
/// "32" is the decimal length of the digest.
pub const SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

sol! {
    struct ChannelStateSol {
        uint256 balanceA;
        uint256 balanceB;
        uint256 nonce;
    }

    struct ParamsSol {
        address participantA;
        address participantB;
        uint64 timeoutDuration;
        uint256 deposit;
        uint64 openNonce;
    }
}

// convert_state converts a ChannelState into a ChannelStateSol
pub fn convert_state(state: &ChannelState) -> ChannelStateSol {
    ChannelStateSol {
        balanceA: state.balance_a,
        balanceB: state.balance_b,
        nonce: state.nonce,
    }
}

// convert_params converts channel Params into a ParamsSol
pub fn convert_params(params: &Params) -> ParamsSol {
    ParamsSol {
        participantA: params.a,
        participantB: params.b,
        timeoutDuration: params.timeout_duration,
        deposit: params.deposit,
        openNonce: params.open_nonce,
    }
}

/// Canonical digest of a channel state: keccak256 over the packed big-endian
/// encoding of `balanceA`, `balanceB` and `nonce`, in that order.
pub fn hash_state(state: &ChannelState) -> B256 {
    let encoded = convert_state(state).abi_encode_packed();
    keccak256(encoded)
}

/// Wraps a state digest with the signed-message preamble. This is the value
/// participants actually sign off-channel.
pub fn signing_digest(digest: &B256) -> B256 {
    // prefix || digest, packed
    let mut msg = [0u8; SIGNED_MESSAGE_PREFIX.len() + 32];
    msg[..SIGNED_MESSAGE_PREFIX.len()].copy_from_slice(SIGNED_MESSAGE_PREFIX);
    msg[SIGNED_MESSAGE_PREFIX.len()..].copy_from_slice(digest.as_slice());
    keccak256(msg)
}

pub fn get_channel_id(params: &Params) -> ChannelId {
    let encoded = convert_params(params).abi_encode();
    keccak256(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    fn state(a: u64, b: u64, nonce: u64) -> ChannelState {
        ChannelState {
            balance_a: U256::from(a),
            balance_b: U256::from(b),
            nonce: U256::from(nonce),
        }
    }

    #[test]
    fn packed_state_is_three_big_endian_words() {
        let encoded = convert_state(&state(20, 10, 1)).abi_encode_packed();
        assert_eq!(encoded.len(), 96);
        assert_eq!(encoded[31], 20);
        assert_eq!(encoded[63], 10);
        assert_eq!(encoded[95], 1);
        assert!(encoded[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn state_hash_matches_manual_keccak() {
        let mut raw = [0u8; 96];
        raw[31] = 7;
        raw[63] = 3;
        raw[95] = 2;
        assert_eq!(hash_state(&state(7, 3, 2)), keccak256(raw));
    }

    #[test]
    fn state_hash_distinguishes_every_field() {
        let base = hash_state(&state(20, 10, 1));
        assert_eq!(base, hash_state(&state(20, 10, 1)));
        assert_ne!(base, hash_state(&state(21, 10, 1)));
        assert_ne!(base, hash_state(&state(20, 11, 1)));
        assert_ne!(base, hash_state(&state(20, 10, 2)));
        // swapped balances must not collide
        assert_ne!(base, hash_state(&state(10, 20, 1)));
    }

    #[test]
    fn signing_digest_differs_from_raw_digest() {
        let digest = hash_state(&state(1, 2, 3));
        let wrapped = signing_digest(&digest);
        assert_ne!(digest, wrapped);

        let mut msg = SIGNED_MESSAGE_PREFIX.to_vec();
        msg.extend_from_slice(digest.as_slice());
        assert_eq!(wrapped, keccak256(&msg));
    }

    #[test]
    fn channel_id_depends_on_open_nonce() {
        let mut params = Params {
            a: Address::repeat_byte(0xaa),
            b: Address::repeat_byte(0xbb),
            timeout_duration: 60,
            deposit: U256::from(10),
            open_nonce: 0,
        };
        let first = get_channel_id(&params);
        params.open_nonce = 1;
        assert_ne!(first, get_channel_id(&params));
    }
}
