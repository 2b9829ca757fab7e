use n0_error::{ensure_any, Result, StackResultExt, StdResultExt};
use stun_rs::{
    attributes::stun::{MessageIntegrity, Nonce, Realm, UserName},
    get_input_text, Algorithm, AlgorithmId, HMACKey, StunMessage,
};

use crate::{COMMAND_PREFIX, PASSWORD, REALM};

/// Outcome of a successful long-term credential check.
#[derive(Debug)]
pub struct Verified {
    /// Full USERNAME value, prefix included.
    pub username: String,
    /// NONCE bytes the client echoed.
    pub nonce: Vec<u8>,
    /// The long-term key, reused to sign the response.
    pub key: HMACKey,
}

impl Verified {
    /// The tunnel command carried after the username prefix.
    pub fn command(&self) -> &str {
        &self.username[COMMAND_PREFIX.len()..]
    }
}

/// Validates the long-term credentials of an authenticated request.
///
/// `datagram` must be the raw bytes `msg` was decoded from; MESSAGE-INTEGRITY
/// covers the wire encoding, not the parsed form. Requires USERNAME, NONCE,
/// REALM, and MESSAGE-INTEGRITY to be present, the username to start with
/// the tunnel prefix, and the HMAC to verify under
/// MD5(username:realm:password).
pub fn authenticate(msg: &StunMessage, datagram: &[u8]) -> Result<Verified> {
    let username = msg
        .get::<UserName>()
        .context("No authentication factor USERNAME")?;
    let nonce = msg.get::<Nonce>().context("No authentication factor NONCE")?;
    msg.get::<Realm>().context("No authentication factor REALM")?;
    let integrity = msg
        .get::<MessageIntegrity>()
        .context("No authentication factor MESSAGE-INTEGRITY")?;

    let username = username.expect_user_name().as_str().to_string();
    ensure_any!(username.starts_with(COMMAND_PREFIX), "Invalid username");
    let nonce = nonce.expect_nonce().as_str().as_bytes().to_vec();

    let key = HMACKey::new_long_term(&username, REALM, PASSWORD, Algorithm::from(AlgorithmId::MD5))
        .std_context("failed to derive long-term key")?;
    let input =
        get_input_text::<MessageIntegrity>(datagram).context("No MESSAGE-INTEGRITY coverage")?;
    ensure_any!(
        integrity.expect_message_integrity().validate(&input, &key),
        "Integrity check failed"
    );

    Ok(Verified {
        username,
        nonce,
        key,
    })
}

#[cfg(test)]
mod tests {
    use stun_rs::{
        methods::ALLOCATE, MessageClass, MessageDecoderBuilder, MessageEncoderBuilder,
        StunMessageBuilder,
    };

    use super::*;

    fn long_term_key(username: &str) -> HMACKey {
        HMACKey::new_long_term(username, REALM, PASSWORD, Algorithm::from(AlgorithmId::MD5))
            .unwrap()
    }

    fn encode(msg: &stun_rs::StunMessage) -> Vec<u8> {
        let mut buffer = [0u8; 1280];
        let encoder = MessageEncoderBuilder::default().build();
        let len = encoder.encode(&mut buffer, msg).unwrap();
        buffer[..len].to_vec()
    }

    fn signed_allocate(username: &str, key: HMACKey) -> Vec<u8> {
        let msg = StunMessageBuilder::new(ALLOCATE, MessageClass::Request)
            .with_attribute(UserName::new(username).unwrap())
            .with_attribute(Nonce::new("0011223344556677889900aa").unwrap())
            .with_attribute(Realm::new(REALM).unwrap())
            .with_attribute(MessageIntegrity::new(key))
            .build();
        encode(&msg)
    }

    fn decode(datagram: &[u8]) -> StunMessage {
        let decoder = MessageDecoderBuilder::default().build();
        decoder.decode(datagram).unwrap().0
    }

    #[test]
    fn accepts_valid_credentials() {
        let username = "turnrpc:s:128";
        let datagram = signed_allocate(username, long_term_key(username));
        let msg = decode(&datagram);
        let verified = authenticate(&msg, &datagram).unwrap();
        assert_eq!(verified.username, username);
        assert_eq!(verified.command(), "s:128");
        assert_eq!(verified.nonce, b"0011223344556677889900aa");
    }

    #[test]
    fn rejects_missing_attributes() {
        let msg = StunMessageBuilder::new(ALLOCATE, MessageClass::Request)
            .with_attribute(UserName::new("turnrpc:s:0").unwrap())
            .build();
        let datagram = encode(&msg);
        let msg = decode(&datagram);
        let err = authenticate(&msg, &datagram).unwrap_err();
        assert!(err.to_string().contains("No authentication factor NONCE"));
    }

    #[test]
    fn rejects_foreign_username() {
        let username = "someone-else";
        let datagram = signed_allocate(username, long_term_key(username));
        let msg = decode(&datagram);
        let err = authenticate(&msg, &datagram).unwrap_err();
        assert!(err.to_string().contains("Invalid username"));
    }

    #[test]
    fn rejects_wrong_password() {
        let username = "turnrpc:s:0";
        let wrong =
            HMACKey::new_long_term(username, REALM, "guess", Algorithm::from(AlgorithmId::MD5))
                .unwrap();
        let datagram = signed_allocate(username, wrong);
        let msg = decode(&datagram);
        assert!(authenticate(&msg, &datagram).is_err());
    }

    #[test]
    fn rejects_tampered_datagram() {
        let username = "turnrpc:r:AAAA:0";
        let mut datagram = signed_allocate(username, long_term_key(username));
        // Flip a transaction id bit after signing.
        datagram[8] ^= 0x01;
        let msg = decode(&datagram);
        assert!(authenticate(&msg, &datagram).is_err());
    }
}
