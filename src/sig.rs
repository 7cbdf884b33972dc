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

//! Signatures over channel states and their verification.

use core::fmt;
use core::str::FromStr;

use crate::sol::signing_digest;
use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};

pub const SIGNATURE_LENGTH: usize = 65;

/// An `r || s || v` signature as exchanged between participants.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignatureParseError {
    #[error("signature is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected {SIGNATURE_LENGTH} signature bytes, got {0}")]
    Length(usize),
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    /// The recovery id encoded in `v`. Both the `27/28` and the raw `0/1`
    /// conventions are accepted.
    fn recovery_id(&self) -> Option<RecoveryId> {
        let v = match self.0[64] {
            27 | 28 => self.0[64] - 27,
            0 | 1 => self.0[64],
            _ => return None,
        };
        RecoveryId::from_byte(v)
    }
}

impl From<[u8; SIGNATURE_LENGTH]> for Signature {
    fn from(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Signature(bytes)
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = SignatureParseError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| SignatureParseError::Length(bytes.len()))?;
        Ok(Signature(bytes))
    }
}

impl FromStr for Signature {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Signature::try_from(bytes.as_slice())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

/// Decides whether a signature over a state digest was produced by a given
/// participant.
///
/// Implementations must be total: malformed signatures yield `false`.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, digest: &B256, signature: &Signature, claimed_signer: &Address) -> bool;
}

/// secp256k1 recovery against Ethereum addresses. The digest is wrapped with
/// the signed-message preamble before recovery, so a raw-digest signature
/// never verifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct EcdsaVerifier;

impl EcdsaVerifier {
    /// Recovers the address that signed `digest`, if any.
    pub fn recover(&self, digest: &B256, signature: &Signature) -> Option<Address> {
        let prehash = signing_digest(digest);
        let recovery_id = signature.recovery_id()?;
        let sig = EcdsaSignature::from_slice(&signature.0[..64]).ok()?;
        let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &sig, recovery_id).ok()?;
        Some(address_of(&key))
    }
}

impl SignatureVerifier for EcdsaVerifier {
    fn verify(&self, digest: &B256, signature: &Signature, claimed_signer: &Address) -> bool {
        match self.recover(digest, signature) {
            Some(signer) => signer == *claimed_signer,
            None => false,
        }
    }
}

/// Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the leading 0x04 tag of the uncompressed encoding.
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}
