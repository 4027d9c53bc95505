//! Session security: RSA key exchange and the AES session cipher.
//!
//! The client draws a fresh AES-256 key and IV for every connection attempt,
//! encrypts them (and the password) with the server's RSA public key using
//! PKCS#1 v1.5, and ships them in the handshake. Once the server accepts,
//! both sides seal every connected frame with AES-256-CBC and PKCS#7
//! padding. Unconnected frames stay plaintext.

use crate::error::CryptoError;
use crate::packets::PublicKeyResponse;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// AES block (and IV) length in bytes.
pub const SESSION_IV_LEN: usize = 16;

/// Default RSA modulus size.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// An RSA public key as exchanged on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Big-endian modulus.
    pub modulus: Vec<u8>,
    /// Big-endian public exponent.
    pub exponent: Vec<u8>,
}

impl PublicKey {
    /// Short hex fingerprint for display: the first 8 bytes of
    /// `blake3(modulus ‖ exponent)`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.modulus);
        hasher.update(&self.exponent);
        hasher.finalize().as_bytes()[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn to_rsa(&self) -> Result<RsaPublicKey, CryptoError> {
        Ok(RsaPublicKey::new(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.exponent),
        )?)
    }

    fn from_rsa(key: &RsaPublicKey) -> Self {
        Self {
            modulus: key.n().to_bytes_be(),
            exponent: key.e().to_bytes_be(),
        }
    }
}

impl From<PublicKeyResponse> for PublicKey {
    fn from(response: PublicKeyResponse) -> Self {
        Self {
            modulus: response.modulus,
            exponent: response.exponent,
        }
    }
}

impl From<&PublicKey> for PublicKeyResponse {
    fn from(key: &PublicKey) -> Self {
        Self {
            modulus: key.modulus.clone(),
            exponent: key.exponent.clone(),
        }
    }
}

/// Client side of a session.
///
/// Key material is regenerated for every connection attempt and never reused
/// across attempts.
pub struct Session {
    key: [u8; SESSION_KEY_LEN],
    iv: [u8; SESSION_IV_LEN],
    server_key: Option<RsaPublicKey>,
    ready: bool,
}

impl Session {
    /// Create a session with fresh key material.
    pub fn new() -> Self {
        let mut session = Self {
            key: [0; SESSION_KEY_LEN],
            iv: [0; SESSION_IV_LEN],
            server_key: None,
            ready: false,
        };
        session.regenerate();
        session
    }

    /// Draw a new AES key and IV from OS entropy and forget the server key.
    pub fn regenerate(&mut self) {
        OsRng.fill_bytes(&mut self.key);
        OsRng.fill_bytes(&mut self.iv);
        self.server_key = None;
        self.ready = false;
        debug!("Regenerated session key material");
    }

    /// Set the server's public key.
    pub fn set_server_public_key(&mut self, key: &PublicKey) -> Result<(), CryptoError> {
        self.server_key = Some(key.to_rsa()?);
        Ok(())
    }

    /// Whether the server's public key is known.
    pub fn has_server_public_key(&self) -> bool {
        self.server_key.is_some()
    }

    /// Encrypt `plaintext` with the server's public key.
    pub fn encrypt_asymmetric(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self
            .server_key
            .as_ref()
            .ok_or(CryptoError::MissingPublicKey)?;
        Ok(key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)?)
    }

    /// The AES key and IV, each encrypted with the server's public key.
    pub fn crypted_session_key(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        Ok((
            self.encrypt_asymmetric(&self.key)?,
            self.encrypt_asymmetric(&self.iv)?,
        ))
    }

    /// Cipher that seals and opens frames with this session's key.
    pub fn cipher(&self) -> SessionCipher {
        SessionCipher {
            key: self.key,
            iv: self.iv,
        }
    }

    /// Mark the session established.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Whether the server accepted this session.
    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_key", &self.server_key.is_some())
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

/// The server's long-lived RSA key pair.
pub struct ServerKeys {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl ServerKeys {
    /// Generate a key pair with a `bits`-bit modulus.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        info!(bits, "Generating server RSA key pair");
        let private = RsaPrivateKey::new(&mut OsRng, bits)?;
        let public = PublicKey::from_rsa(&RsaPublicKey::from(&private));
        info!(fingerprint = %public.fingerprint(), "Server key ready");
        Ok(Self { private, public })
    }

    /// The public half, for distribution to clients.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Decrypt data a client encrypted with the public key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.private.decrypt(Pkcs1v15Encrypt, ciphertext)?)
    }

    /// Recover a client's session cipher from its handshake fields.
    pub fn accept_session(
        &self,
        key_crypted: &[u8],
        iv_crypted: &[u8],
    ) -> Result<SessionCipher, CryptoError> {
        let key = self.decrypt(key_crypted)?;
        let iv = self.decrypt(iv_crypted)?;
        SessionCipher::from_slices(&key, &iv)
    }
}

impl std::fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKeys")
            .field("fingerprint", &self.public.fingerprint())
            .finish_non_exhaustive()
    }
}

/// AES-256-CBC cipher bound to one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCipher {
    key: [u8; SESSION_KEY_LEN],
    iv: [u8; SESSION_IV_LEN],
}

impl SessionCipher {
    /// Build a cipher from raw key and IV bytes.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SESSION_KEY_LEN] =
            key.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        let iv: [u8; SESSION_IV_LEN] = iv.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self { key, iv })
    }

    /// Encrypt a frame.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt a frame sealed by the peer.
    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::BadCiphertext)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small keys keep unit tests fast; the end-to-end tests use full size.
    const TEST_BITS: usize = 1024;

    #[test]
    fn session_key_exchange() {
        let server = ServerKeys::generate(TEST_BITS).unwrap();
        let mut session = Session::new();
        assert!(matches!(
            session.crypted_session_key(),
            Err(CryptoError::MissingPublicKey)
        ));

        session.set_server_public_key(server.public_key()).unwrap();
        let (key, iv) = session.crypted_session_key().unwrap();
        let accepted = server.accept_session(&key, &iv).unwrap();
        assert_eq!(accepted, session.cipher());
    }

    #[test]
    fn sealed_frames_open_on_the_other_side() {
        let session = Session::new();
        let client = session.cipher();
        let server = client.clone();

        let frame = b"\x0b\x00hello".to_vec();
        let sealed = client.seal(&frame);
        assert_ne!(sealed, frame);
        assert_eq!(sealed.len() % 16, 0);
        assert_eq!(server.open(&sealed).unwrap(), frame);
    }

    #[test]
    fn empty_frame_seals_to_one_block() {
        let cipher = Session::new().cipher();
        assert_eq!(cipher.seal(&[]).len(), 16);
    }

    #[test]
    fn wrong_key_does_not_open() {
        let a = Session::new().cipher();
        let b = Session::new().cipher();
        let sealed = a.seal(b"some plaintext frame");
        // A wrong key almost always yields invalid padding; when it does not,
        // the plaintext is still garbage.
        match b.open(&sealed) {
            Err(CryptoError::BadCiphertext) => {}
            Ok(plain) => assert_ne!(plain, b"some plaintext frame"),
            Err(other) => panic!("unexpected error {other}"),
        }
        assert!(a.open(&sealed[..sealed.len() - 1]).is_err());
    }

    #[test]
    fn regenerate_changes_key_material() {
        let mut session = Session::new();
        let before = session.cipher();
        session.mark_ready();
        session.regenerate();
        assert_ne!(session.cipher(), before);
        assert!(!session.is_ready());
        assert!(!session.has_server_public_key());
    }

    #[test]
    fn password_round_trip_and_fingerprint() {
        let server = ServerKeys::generate(TEST_BITS).unwrap();
        let mut session = Session::new();
        let wire: PublicKeyResponse = server.public_key().into();
        session.set_server_public_key(&wire.into()).unwrap();

        let encrypted = session.encrypt_asymmetric(b"hunter2").unwrap();
        assert_eq!(server.decrypt(&encrypted).unwrap(), b"hunter2");

        let fingerprint = server.public_key().fingerprint();
        assert_eq!(fingerprint.len(), 16);
        assert_eq!(fingerprint, server.public_key().fingerprint());
    }

    #[test]
    fn invalid_key_lengths() {
        assert!(matches!(
            SessionCipher::from_slices(&[0; 16], &[0; 16]),
            Err(CryptoError::InvalidKeyLength)
        ));
    }
}
