//! Password and SASL messages, plus the MD5 and SCRAM-SHA-256 computations.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// SASL mechanism implemented by [`ScramClient`].
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header: no channel binding.
const GS2_HEADER: &str = "n,,";

/// Write a PasswordMessage (cleartext or MD5-hashed).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Write a SASLInitialResponse.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

/// `"md5" + md5(md5(password + user) + salt)`, hex encoded.
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let inner = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(user.as_bytes())
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{:x}", inner).as_bytes())
        .chain_update(salt)
        .finalize();
    format!("md5{:x}", outer)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC error: {}", e)))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Client side of a SCRAM-SHA-256 exchange (RFC 5802 / RFC 7677).
///
/// The user name is sent empty; PostgreSQL takes it from the startup packet.
pub struct ScramClient {
    password: String,
    nonce: String,
    /// `AuthMessage` and `SaltedPassword`, known after the server-first-message
    proof_state: Option<(String, [u8; 32])>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(password: &str, nonce: String) -> Self {
        Self {
            password: password.to_string(),
            nonce,
            proof_state: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// The client-first-message.
    pub fn client_first_message(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Consume the server-first-message and produce the client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = v.parse::<u32>().ok(),
                _ => {}
            }
        }

        let nonce =
            nonce.ok_or_else(|| Error::Auth("server-first-message without nonce".into()))?;
        let salt = salt.ok_or_else(|| Error::Auth("server-first-message without salt".into()))?;
        let iterations = iterations
            .ok_or_else(|| Error::Auth("server-first-message without iteration count".into()))?;

        if !nonce.starts_with(&self.nonce) {
            return Err(Error::Auth(
                "server nonce does not extend the client nonce".into(),
            ));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|e| Error::Auth(format!("invalid salt: {}", e)))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.proof_state = Some((auth_message, salted_password));
        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)))
    }

    /// Check the server-final-message signature.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::Auth(format!("server rejected SCRAM exchange: {}", err)));
        }
        let signature = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("malformed server-final-message".into()))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|e| Error::Auth(format!("invalid server signature: {}", e)))?;

        let (auth_message, salted_password) = self
            .proof_state
            .as_ref()
            .ok_or_else(|| Error::Auth("server-final-message before server-first".into()))?;

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;
        if signature.as_slice() != expected.as_slice() {
            return Err(Error::Auth("server signature mismatch".into()));
        }
        Ok(())
    }
}
