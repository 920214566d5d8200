//! Credential check for administrative actions.

use std::fmt;

/// Opaque pass/fail predicate over a supplied secret.
pub trait CredentialCheck: Send + Sync {
    fn verify(&self, secret: &str) -> bool;
}

impl<F> CredentialCheck for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn verify(&self, secret: &str) -> bool {
        self(secret)
    }
}

/// A fixed administrator PIN.
pub struct AdminPin(String);

impl AdminPin {
    pub fn new(pin: impl Into<String>) -> Self {
        AdminPin(pin.into())
    }
}

impl fmt::Debug for AdminPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminPin(****)")
    }
}

impl CredentialCheck for AdminPin {
    fn verify(&self, secret: &str) -> bool {
        let expected = self.0.as_bytes();
        let supplied = secret.as_bytes();
        // compare every byte so timing does not depend on the first mismatch
        let diff = expected
            .iter()
            .zip(supplied)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0 && expected.len() == supplied.len()
    }
}
