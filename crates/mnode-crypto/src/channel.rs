//! Symmetric channel encryption keyed via X25519 ECDH.
//!
//! Three ciphersuites are supported. XChaCha20-Poly1305 derives its key
//! with HKDF-SHA512 over the ECDH output with both parties' pubkeys bound
//! into the info block; the AES suites hash the raw ECDH output with
//! SHA-256. AES-CBC carries no authentication tag: the surrounding onion
//! layer provides integrity at the next hop, and upgrading it would break
//! wire compatibility.

use std::fmt;
use std::str::FromStr;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};

use mnode_types::{CryptoError, X25519Pubkey, X25519Seckey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const XCHACHA_NONCE_SIZE: usize = 24;
const GCM_NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const CBC_IV_SIZE: usize = 16;
const CBC_BLOCK_SIZE: usize = 16;

/// The ciphersuite used for one onion layer or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptType {
    /// AES-256-CBC with PKCS#7 padding and no tag.
    AesCbc,
    /// AES-256-GCM.
    AesGcm,
    /// XChaCha20-Poly1305.
    XChaCha20,
}

impl EncryptType {
    /// Pick a suite uniformly at random; used for per-hop randomization.
    pub fn random() -> Self {
        use rand::Rng;
        match rand::thread_rng().gen_range(0..3) {
            0 => EncryptType::AesCbc,
            1 => EncryptType::AesGcm,
            _ => EncryptType::XChaCha20,
        }
    }
}

impl fmt::Display for EncryptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EncryptType::AesCbc => "aes-cbc",
            EncryptType::AesGcm => "aes-gcm",
            EncryptType::XChaCha20 => "xchacha20",
        })
    }
}

impl FromStr for EncryptType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-cbc" | "cbc" => Ok(EncryptType::AesCbc),
            "aes-gcm" | "gcm" => Ok(EncryptType::AesGcm),
            "xchacha20" | "xchacha20-poly1305" => Ok(EncryptType::XChaCha20),
            _ => Err(CryptoError::InvalidKey),
        }
    }
}

/// Generate a fresh X25519 keypair, e.g. one per onion hop.
pub fn generate_x25519_keypair() -> (X25519Pubkey, X25519Seckey) {
    let seckey = X25519Seckey::generate();
    let pubkey = seckey.pubkey();
    (pubkey, seckey)
}

/// Encrypts and decrypts channel payloads for a fixed local X25519
/// keypair against per-call peer pubkeys.
///
/// `server` fixes which side's pubkey is fed first into the xchacha20 key
/// derivation; both peers of a channel must agree on who the server is.
pub struct ChannelEncryption {
    seckey: X25519Seckey,
    pubkey: X25519Pubkey,
    server: bool,
}

impl ChannelEncryption {
    pub fn new(seckey: X25519Seckey, pubkey: X25519Pubkey, server: bool) -> Self {
        Self {
            seckey,
            pubkey,
            server,
        }
    }

    /// The local pubkey half.
    pub fn pubkey(&self) -> &X25519Pubkey {
        &self.pubkey
    }

    /// Encrypt a payload for `peer` under the given suite.
    pub fn encrypt(
        &self,
        enc_type: EncryptType,
        plaintext: &[u8],
        peer: &X25519Pubkey,
    ) -> Result<Vec<u8>, CryptoError> {
        match enc_type {
            EncryptType::AesCbc => self.encrypt_cbc(plaintext, peer),
            EncryptType::AesGcm => self.encrypt_gcm(plaintext, peer),
            EncryptType::XChaCha20 => self.encrypt_xchacha20(plaintext, peer),
        }
    }

    /// Decrypt a payload from `peer` under the given suite.
    pub fn decrypt(
        &self,
        enc_type: EncryptType,
        ciphertext: &[u8],
        peer: &X25519Pubkey,
    ) -> Result<Vec<u8>, CryptoError> {
        match enc_type {
            EncryptType::AesCbc => self.decrypt_cbc(ciphertext, peer),
            EncryptType::AesGcm => self.decrypt_gcm(ciphertext, peer),
            EncryptType::XChaCha20 => self.decrypt_xchacha20(ciphertext, peer),
        }
    }

    /// Raw X25519 ECDH against the peer pubkey.
    fn ecdh(&self, peer: &X25519Pubkey) -> [u8; 32] {
        let secret = x25519_dalek::StaticSecret::from(*self.seckey.as_bytes());
        let public = x25519_dalek::PublicKey::from(*peer.as_bytes());
        *secret.diffie_hellman(&public).as_bytes()
    }

    /// HKDF-SHA512 key for xchacha20, binding both pubkeys in
    /// client-then-server order.
    fn xchacha20_key(&self, peer: &X25519Pubkey) -> [u8; 32] {
        let shared = self.ecdh(peer);
        let (client, server) = if self.server {
            (peer, &self.pubkey)
        } else {
            (&self.pubkey, peer)
        };
        let mut info = [0u8; 64];
        info[..32].copy_from_slice(client.as_bytes());
        info[32..].copy_from_slice(server.as_bytes());

        let hk = Hkdf::<Sha512>::new(None, &shared);
        let mut key = [0u8; 32];
        hk.expand(&info, &mut key)
            .expect("32 bytes is a valid HKDF-SHA512 output length");
        key
    }

    /// SHA-256 key for the AES suites.
    fn aes_key(&self, peer: &X25519Pubkey) -> [u8; 32] {
        let shared = self.ecdh(peer);
        Sha256::digest(shared).into()
    }

    /// `nonce(24) || ciphertext || tag`
    fn encrypt_xchacha20(
        &self,
        plaintext: &[u8],
        peer: &X25519Pubkey,
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.xchacha20_key(peer);
        let cipher = XChaCha20Poly1305::new((&key).into());

        let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ct = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::InvalidKey)?;

        let mut out = Vec::with_capacity(XCHACHA_NONCE_SIZE + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt_xchacha20(
        &self,
        ciphertext: &[u8],
        peer: &X25519Pubkey,
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < XCHACHA_NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::AuthFailed);
        }
        let key = self.xchacha20_key(peer);
        let cipher = XChaCha20Poly1305::new((&key).into());
        let (nonce, ct) = ciphertext.split_at(XCHACHA_NONCE_SIZE);
        cipher
            .decrypt(XNonce::from_slice(nonce), ct)
            .map_err(|_| CryptoError::AuthFailed)
    }

    /// `nonce(12) || ciphertext || tag(16)`
    fn encrypt_gcm(&self, plaintext: &[u8], peer: &X25519Pubkey) -> Result<Vec<u8>, CryptoError> {
        let key = self.aes_key(peer);
        let cipher = Aes256Gcm::new((&key).into());

        let mut nonce = [0u8; GCM_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ct = cipher
            .encrypt(
                aes_gcm::Nonce::from_slice(&nonce),
                Payload::from(plaintext),
            )
            .map_err(|_| CryptoError::InvalidKey)?;

        let mut out = Vec::with_capacity(GCM_NONCE_SIZE + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt_gcm(&self, ciphertext: &[u8], peer: &X25519Pubkey) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < GCM_NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::AuthFailed);
        }
        let key = self.aes_key(peer);
        let cipher = Aes256Gcm::new((&key).into());
        let (nonce, ct) = ciphertext.split_at(GCM_NONCE_SIZE);
        cipher
            .decrypt(aes_gcm::Nonce::from_slice(nonce), Payload::from(ct))
            .map_err(|_| CryptoError::AuthFailed)
    }

    /// `iv(16) || ciphertext`, PKCS#7 padded, no tag.
    fn encrypt_cbc(&self, plaintext: &[u8], peer: &X25519Pubkey) -> Result<Vec<u8>, CryptoError> {
        let key = self.aes_key(peer);

        let mut iv = [0u8; CBC_IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ct = Aes256CbcEnc::new((&key).into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(CBC_IV_SIZE + ct.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt_cbc(&self, ciphertext: &[u8], peer: &X25519Pubkey) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < CBC_IV_SIZE + CBC_BLOCK_SIZE
            || (ciphertext.len() - CBC_IV_SIZE) % CBC_BLOCK_SIZE != 0
        {
            return Err(CryptoError::BadPadding);
        }
        let key = self.aes_key(peer);
        let (iv, ct) = ciphertext.split_at(CBC_IV_SIZE);
        let iv: [u8; CBC_IV_SIZE] = iv.try_into().expect("split at IV size");
        Aes256CbcDec::new((&key).into(), (&iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(ct)
            .map_err(|_| CryptoError::BadPadding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITES: [EncryptType; 3] = [
        EncryptType::AesCbc,
        EncryptType::AesGcm,
        EncryptType::XChaCha20,
    ];

    fn channel_pair() -> (ChannelEncryption, ChannelEncryption) {
        let (client_pub, client_sec) = generate_x25519_keypair();
        let (server_pub, server_sec) = generate_x25519_keypair();
        (
            ChannelEncryption::new(client_sec, client_pub, false),
            ChannelEncryption::new(server_sec, server_pub, true),
        )
    }

    #[test]
    fn roundtrip_every_suite_both_directions() {
        let (client, server) = channel_pair();
        let msg = b"the quick brown fox jumps over the lazy dog";

        for suite in SUITES {
            let ct = client.encrypt(suite, msg, server.pubkey()).unwrap();
            assert_ne!(&ct[..], &msg[..]);
            let pt = server.decrypt(suite, &ct, client.pubkey()).unwrap();
            assert_eq!(pt, msg);

            let ct = server.encrypt(suite, msg, client.pubkey()).unwrap();
            let pt = client.decrypt(suite, &ct, server.pubkey()).unwrap();
            assert_eq!(pt, msg);
        }
    }

    #[test]
    fn empty_and_block_aligned_payloads() {
        let (client, server) = channel_pair();
        for suite in SUITES {
            for msg in [&b""[..], &[0u8; 16][..], &[7u8; 4096][..]] {
                let ct = client.encrypt(suite, msg, server.pubkey()).unwrap();
                assert_eq!(server.decrypt(suite, &ct, client.pubkey()).unwrap(), msg);
            }
        }
    }

    #[test]
    fn ciphertext_layout() {
        let (client, server) = channel_pair();
        let msg = [1u8; 10];

        let ct = client
            .encrypt(EncryptType::XChaCha20, &msg, server.pubkey())
            .unwrap();
        assert_eq!(ct.len(), 24 + msg.len() + 16);

        let ct = client
            .encrypt(EncryptType::AesGcm, &msg, server.pubkey())
            .unwrap();
        assert_eq!(ct.len(), 12 + msg.len() + 16);

        let ct = client
            .encrypt(EncryptType::AesCbc, &msg, server.pubkey())
            .unwrap();
        // 10 bytes pad to one block
        assert_eq!(ct.len(), 16 + 16);
    }

    #[test]
    fn aead_tamper_fails_authentication() {
        let (client, server) = channel_pair();
        let msg = b"tamper target";

        for suite in [EncryptType::AesGcm, EncryptType::XChaCha20] {
            let ct = client.encrypt(suite, msg, server.pubkey()).unwrap();
            for pos in 0..ct.len() {
                let mut bad = ct.clone();
                bad[pos] ^= 0x01;
                assert_eq!(
                    server.decrypt(suite, &bad, client.pubkey()),
                    Err(CryptoError::AuthFailed),
                    "bit flip at {pos} must fail"
                );
            }
        }
    }

    #[test]
    fn cbc_tamper_never_roundtrips() {
        let (client, server) = channel_pair();
        let msg = b"cbc has no tag but padding usually breaks";
        let ct = client
            .encrypt(EncryptType::AesCbc, msg, server.pubkey())
            .unwrap();

        let mut bad = ct.clone();
        *bad.last_mut().unwrap() ^= 0x01;
        match server.decrypt(EncryptType::AesCbc, &bad, client.pubkey()) {
            Err(CryptoError::BadPadding) => {}
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(pt) => assert_ne!(pt, msg),
        }
    }

    #[test]
    fn truncated_inputs_are_rejected() {
        let (client, server) = channel_pair();
        assert_eq!(
            server.decrypt(EncryptType::XChaCha20, &[0u8; 39], client.pubkey()),
            Err(CryptoError::AuthFailed)
        );
        assert_eq!(
            server.decrypt(EncryptType::AesGcm, &[0u8; 27], client.pubkey()),
            Err(CryptoError::AuthFailed)
        );
        assert_eq!(
            server.decrypt(EncryptType::AesCbc, &[0u8; 17], client.pubkey()),
            Err(CryptoError::BadPadding)
        );
    }

    #[test]
    fn wrong_peer_key_fails() {
        let (client, server) = channel_pair();
        let (eve_pub, eve_sec) = generate_x25519_keypair();
        let eve = ChannelEncryption::new(eve_sec, eve_pub, true);

        let msg = b"not for eve";
        for suite in [EncryptType::AesGcm, EncryptType::XChaCha20] {
            let ct = client.encrypt(suite, msg, server.pubkey()).unwrap();
            assert!(eve.decrypt(suite, &ct, client.pubkey()).is_err());
        }
    }

    #[test]
    fn fresh_nonce_every_call() {
        let (client, server) = channel_pair();
        let msg = b"same plaintext";
        for suite in SUITES {
            let a = client.encrypt(suite, msg, server.pubkey()).unwrap();
            let b = client.encrypt(suite, msg, server.pubkey()).unwrap();
            assert_ne!(a, b);
        }
    }

    #[test]
    fn enc_type_names_roundtrip() {
        for suite in SUITES {
            assert_eq!(suite.to_string().parse::<EncryptType>().unwrap(), suite);
        }
        assert_eq!("gcm".parse::<EncryptType>().unwrap(), EncryptType::AesGcm);
        assert_eq!("cbc".parse::<EncryptType>().unwrap(), EncryptType::AesCbc);
        assert_eq!(
            "xchacha20-poly1305".parse::<EncryptType>().unwrap(),
            EncryptType::XChaCha20
        );
        assert!("rot13".parse::<EncryptType>().is_err());
    }
}
