//! Node identities and the signing capability
//!
//! An identity is an Ed25519 key pair whose public half determines the
//! node's 40-bit address. The controller signs membership certificates
//! with its own identity and binds each member's public identity on first
//! contact.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::address::Address;
use crate::error::{ControllerError, Result};

const KEY_TYPE: &str = "0";

/// Public (and optionally secret) identity of a node
///
/// Text form: `<address>:0:<public hex>[:<secret hex>]`. Equality and
/// serialization only consider the public part.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    address: Address,
    public: VerifyingKey,
    secret: Option<Zeroizing<[u8; 32]>>,
}

impl Identity {
    /// Generate a fresh identity with a non-reserved address
    pub fn generate() -> Self {
        loop {
            let signing = SigningKey::generate(&mut OsRng);
            let public = signing.verifying_key();
            let address = address_from_public_key(&public);
            if !address.is_reserved() {
                return Self {
                    address,
                    public,
                    secret: Some(Zeroizing::new(signing.to_bytes())),
                };
            }
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Copy without the secret key
    pub fn to_public(&self) -> Self {
        Self {
            address: self.address,
            public: self.public,
            secret: None,
        }
    }

    /// Text form including the secret key, if held
    pub fn to_secret_string(&self) -> String {
        match &self.secret {
            Some(secret) => format!("{}:{}", self, hex::encode(secret.as_slice())),
            None => self.to_string(),
        }
    }

    fn signing_key(&self) -> Option<SigningKey> {
        self.secret.as_ref().map(|s| SigningKey::from_bytes(s))
    }
}

fn address_from_public_key(public: &VerifyingKey) -> Address {
    let digest = Sha512::digest(public.as_bytes());
    let mut bytes = [0u8; Address::LENGTH];
    bytes.copy_from_slice(&digest[..Address::LENGTH]);
    Address::from_bytes(bytes)
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.public == other.public
    }
}

impl Eq for Identity {}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.address,
            KEY_TYPE,
            hex::encode(self.public.as_bytes())
        )
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("has_secret", &self.has_secret())
            .finish()
    }
}

impl FromStr for Identity {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| ControllerError::InvalidIdentity(reason.to_string());

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 && parts.len() != 4 {
            return Err(invalid("expected address:type:public[:secret]"));
        }
        let address: Address = parts[0].parse().map_err(|_| invalid("bad address"))?;
        if parts[1] != KEY_TYPE {
            return Err(invalid("unsupported key type"));
        }

        let mut public_bytes = [0u8; 32];
        hex::decode_to_slice(parts[2], &mut public_bytes).map_err(|_| invalid("bad public key"))?;
        let public =
            VerifyingKey::from_bytes(&public_bytes).map_err(|_| invalid("bad public key"))?;
        if address_from_public_key(&public) != address {
            return Err(invalid("address does not match public key"));
        }

        let secret = match parts.get(3) {
            Some(secret_hex) => {
                let mut secret = Zeroizing::new([0u8; 32]);
                hex::decode_to_slice(secret_hex, secret.as_mut_slice())
                    .map_err(|_| invalid("bad secret key"))?;
                if SigningKey::from_bytes(&secret).verifying_key() != public {
                    return Err(invalid("secret key does not match public key"));
                }
                Some(secret)
            }
            None => None,
        };

        Ok(Self {
            address,
            public,
            secret,
        })
    }
}

impl TryFrom<String> for Identity {
    type Error = ControllerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}

/// Detached Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

impl TryFrom<String> for Signature {
    type Error = ControllerError;

    fn try_from(s: String) -> Result<Self> {
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&s, &mut bytes)
            .map_err(|e| ControllerError::Signing(format!("bad signature encoding: {e}")))?;
        Ok(Self(bytes))
    }
}

impl From<Signature> for String {
    fn from(sig: Signature) -> Self {
        hex::encode(sig.0)
    }
}

/// Cryptographic capability consumed by the controller
pub trait Signer: Send + Sync {
    /// Sign `message`; `None` if the identity holds no secret key
    fn sign(&self, identity: &Identity, message: &[u8]) -> Option<Signature>;

    /// Check a signature made by `identity`
    fn verify(&self, identity: &Identity, message: &[u8], signature: &Signature) -> bool;

    /// Address implied by the identity's public key
    fn derive_address(&self, identity: &Identity) -> Address;

    /// Fill a buffer from a cryptographically secure source
    fn secure_random(&self, len: usize) -> Vec<u8>;

    /// Short reads are zero-padded
    fn random_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        for (dst, src) in buf.iter_mut().zip(self.secure_random(8)) {
            *dst = src;
        }
        u64::from_le_bytes(buf)
    }
}

/// Ed25519 implementation backed by the operating system RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Signer;

impl Signer for Ed25519Signer {
    fn sign(&self, identity: &Identity, message: &[u8]) -> Option<Signature> {
        let key = identity.signing_key()?;
        Some(Signature(key.sign(message).to_bytes()))
    }

    fn verify(&self, identity: &Identity, message: &[u8], signature: &Signature) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        identity.public.verify(message, &sig).is_ok()
    }

    fn derive_address(&self, identity: &Identity) -> Address {
        address_from_public_key(&identity.public)
    }

    fn secure_random(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        OsRng.fill_bytes(&mut buf);
        buf
    }
}
