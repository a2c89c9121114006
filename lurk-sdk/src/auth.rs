//! SASL authentication during registration.
//!
//! An [`Authenticator`] names its mechanism, says whether its first response
//! can be sent before the server asks for it, and turns server challenges
//! into responses. The session handles the AUTHENTICATE plumbing.

use base64::Engine;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unexpected SASL challenge: {0}")]
    UnexpectedChallenge(String),
}

pub trait Authenticator: Send {
    /// SASL mechanism name, e.g. `PLAIN`.
    fn mechanism(&self) -> &str;

    /// Whether the handshake and first response (to the empty challenge `+`)
    /// may be pipelined right after NICK/USER.
    fn eager(&self) -> bool;

    /// Base64 response to a base64 challenge (`+` meaning empty).
    fn respond(&mut self, challenge: &str) -> Result<String, AuthError>;
}

/// SASL PLAIN with the same authorization and authentication identity.
#[derive(Debug, Clone)]
pub struct SaslPlain {
    pub username: String,
    pub password: String,
}

impl SaslPlain {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Authenticator for SaslPlain {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn eager(&self) -> bool {
        true
    }

    fn respond(&mut self, challenge: &str) -> Result<String, AuthError> {
        if challenge != "+" {
            return Err(AuthError::UnexpectedChallenge(challenge.to_string()));
        }
        let payload = format!("{0}\0{0}\0{1}", self.username, self.password);
        Ok(base64::engine::general_purpose::STANDARD.encode(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_response() {
        let mut auth = SaslPlain::new("jilles", "sesame");
        assert_eq!(auth.mechanism(), "PLAIN");
        assert!(auth.eager());
        let res = auth.respond("+").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(res).unwrap();
        assert_eq!(decoded, b"jilles\0jilles\0sesame");
    }

    #[test]
    fn plain_rejects_challenges() {
        let mut auth = SaslPlain::new("u", "p");
        assert_eq!(
            auth.respond("Zm9v"),
            Err(AuthError::UnexpectedChallenge("Zm9v".into()))
        );
    }
}
