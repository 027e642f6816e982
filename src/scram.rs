//! SCRAM-SHA-256 authentication.
//!
//! Implements RFC 5802 (SCRAM) and RFC 7677 (SCRAM-SHA-256) as PostgreSQL
//! speaks them, without channel binding.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// SCRAM authentication errors.
#[derive(Error, Debug, Clone)]
pub enum ScramError {
    #[error("invalid server message")]
    InvalidServerMessage,
    #[error("invalid salt encoding")]
    InvalidSalt,
    #[error("invalid iteration count")]
    InvalidIterations,
    #[error("missing nonce in server message")]
    MissingNonce,
    #[error("missing salt in server message")]
    MissingSalt,
    #[error("missing iterations in server message")]
    MissingIterations,
    #[error("server nonce does not extend the client nonce")]
    NonceVerificationFailed,
    #[error("invalid server signature")]
    InvalidServerSignature,
    #[error("server signature verification failed")]
    ServerSignatureVerificationFailed,
    #[error("exchange is not at the expected step")]
    InvalidState,
}

/// SCRAM-SHA-256 client state machine: client-first, server-first,
/// client-final, server-final.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    /// Auth message retained for the final server-signature check
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        // 18 random bytes base64-encode to a 24 character nonce
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        let client_nonce = BASE64.encode(nonce_bytes);
        Self::with_nonce(username, password, client_nonce)
    }

    /// Deterministic nonce constructor for tests.
    pub(crate) fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            auth_message: None,
            salted_password: None,
        }
    }

    /// client-first-message: `n,,n=<user>,r=<client-nonce>`
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", sasl_prep(&self.username), self.client_nonce)
    }

    /// Process `r=<nonce>,s=<salt>,i=<iterations>` and produce the
    /// client-final-message with the proof.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>, ScramError> {
        let server_first =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| ScramError::InvalidSalt)?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| ScramError::InvalidIterations)?,
                );
            }
        }

        let combined_nonce = nonce.ok_or(ScramError::MissingNonce)?;
        let salt = salt.ok_or(ScramError::MissingSalt)?;
        let iterations = iterations.ok_or(ScramError::MissingIterations)?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceVerificationFailed);
        }

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        let client_final_without_proof = format!("c=biws,r={}", combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof = xor_bytes(&client_key, &client_signature);

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);

        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        );
        Ok(client_final.into_bytes())
    }

    /// Verify the server's `v=<verifier>` final message.
    pub fn verify_server_final(&self, server_msg: &[u8]) -> Result<(), ScramError> {
        let server_final =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        let verifier_b64 = server_final
            .strip_prefix("v=")
            .ok_or(ScramError::InvalidServerSignature)?;
        let server_signature = BASE64
            .decode(verifier_b64)
            .map_err(|_| ScramError::InvalidServerSignature)?;

        let salted_password = self.salted_password.ok_or(ScramError::InvalidState)?;
        let auth_message = self.auth_message.as_ref().ok_or(ScramError::InvalidState)?;

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let expected_signature = hmac_sha256(&server_key, auth_message.as_bytes());

        if server_signature != expected_signature {
            return Err(ScramError::ServerSignatureVerificationFailed);
        }

        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Hi() - PBKDF2 with HMAC-SHA-256
fn hi(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut output)
        .expect("valid output length");
    output
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn xor_bytes(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut result = [0u8; 32];
    for i in 0..32 {
        result[i] = a[i] ^ b[i];
    }
    result
}

/// SASLprep normalization (RFC 4013), minimal form.
///
/// PostgreSQL is lenient with usernames; the username is also fixed by the
/// startup message, so servers ignore mismatches here.
fn sasl_prep(s: &str) -> String {
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_first_message_shape() {
        let client = ScramClient::new("user", "pencil");
        let first = String::from_utf8(client.client_first_message()).unwrap();
        assert!(first.starts_with("n,,n=user,r="));
        // 24 base64 chars of nonce
        assert_eq!(first.len(), "n,,n=user,r=".len() + 24);
    }

    #[test]
    fn rfc7677_example_exchange() {
        // Test vector from RFC 7677 section 3
        let mut client = ScramClient::with_nonce(
            "user",
            "pencil",
            "rOprNGfwEbeRWgbNEkqO".to_string(),
        );
        assert_eq!(
            client.client_first_message(),
            b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO".to_vec()
        );

        let server_first = b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let client_final = client.process_server_first(server_first).unwrap();
        assert_eq!(
            String::from_utf8(client_final).unwrap(),
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        client
            .verify_server_final(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn tampered_server_signature_rejected() {
        let mut client = ScramClient::with_nonce(
            "user",
            "pencil",
            "rOprNGfwEbeRWgbNEkqO".to_string(),
        );
        let server_first = b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        client.process_server_first(server_first).unwrap();

        assert!(matches!(
            client.verify_server_final(b"v=AAAATRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4="),
            Err(ScramError::ServerSignatureVerificationFailed)
        ));
    }

    #[test]
    fn foreign_nonce_rejected() {
        let mut client =
            ScramClient::with_nonce("user", "pencil", "clientnonce".to_string());
        let server_first = b"r=othernonce,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        assert!(matches!(
            client.process_server_first(server_first),
            Err(ScramError::NonceVerificationFailed)
        ));
    }

    #[test]
    fn verify_before_exchange_is_invalid_state() {
        let client = ScramClient::with_nonce("user", "pencil", "nonce".to_string());
        assert!(matches!(
            client.verify_server_final(b"v=YQ=="),
            Err(ScramError::InvalidState)
        ));
    }
}
