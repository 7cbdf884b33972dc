// Copyright 2024 - See NOTICE file for copyright holders.
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
#![cfg(test)]
//! Off-channel signer used by the tests. It deliberately hashes with `sha3`
//! instead of the crate's own helpers so that the verifier is checked against
//! an independent encoding.

use crate::sig::Signature;
use crate::{sol::hash_state, ChannelState};
use alloy_primitives::{Address, B256};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature as k256Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

pub struct EthSigner {
    skey: SigningKey,
    pubkey: VerifyingKey,
    addr: Address,
}

fn eth_address(key: &VerifyingKey) -> Address {
    // The uncompressed encoding is 65 bytes; the first is the 0x04 tag and is
    // not part of the public key.
    let point = key.to_encoded_point(false);
    let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();
    Address::from_slice(&hash[32 - 20..])
}

impl EthSigner {
    pub fn init_from_key(skey: SigningKey) -> Self {
        let pubkey = skey.verifying_key().to_owned();
        let addr = eth_address(&pubkey);
        Self { skey, pubkey, addr }
    }

    pub fn random() -> Self {
        Self::init_from_key(SigningKey::random(&mut rand::thread_rng()))
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Signs the canonical digest of `state` the way a participant would
    /// before handing it to the counterparty.
    pub fn sign_state(&self, state: &ChannelState) -> Signature {
        self.sign_state_digest(&hash_state(state))
    }

    pub fn sign_state_digest(&self, digest: &B256) -> Signature {
        let hash = hash_to_eth_signed_msg_hash(digest);
        self.sign_prehash(&B256::from(hash))
    }

    /// Signs `prehash` as is, without the signed-message preamble.
    pub fn sign_prehash(&self, prehash: &B256) -> Signature {
        // Only returns `r || s`
        let sig: k256Signature = self.skey.sign_prehash(prehash.as_slice()).unwrap();

        let mut sig_bytes: [u8; 65] = [0; 65];
        sig_bytes[..64].copy_from_slice(&sig.to_bytes());

        // `v = rec_id + 27`, recovered by trial since `sign_prehash()` does not
        // return it.
        let rec_id = self.compute_recovery_id(prehash.as_slice(), &sig);
        sig_bytes[64] = rec_id + 27;

        Signature(sig_bytes)
    }

    fn compute_recovery_id(&self, hash: &[u8], sig: &k256Signature) -> u8 {
        let rec_id_0 =
            VerifyingKey::recover_from_prehash(hash, sig, RecoveryId::new(false, false));
        let rec_id_1 =
            VerifyingKey::recover_from_prehash(hash, sig, RecoveryId::new(true, false));

        match (rec_id_0, rec_id_1) {
            (Ok(pubkey_0), _) if pubkey_0 == self.pubkey => 0,
            (_, Ok(pubkey_1)) if pubkey_1 == self.pubkey => 1,
            _ => panic!("Failed to recover public key"),
        }
    }
}

fn hash_to_eth_signed_msg_hash(hash: &B256) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.as_slice());
    hasher.finalize().into()
}
