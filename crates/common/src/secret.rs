//! Secret wrapper for sensitive values
//!
//! Client secrets, JWT signing keys and refresh tokens travel through config
//! structs that derive `Debug`. Wrapping them keeps them out of logs and
//! scrubs the memory when the owning config is dropped.

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Wrap a string, treating empty or whitespace-only input as absent.
    ///
    /// Environment variables are frequently set to `""` to "unset" them in
    /// compose files; those must not become an empty signing key.
    pub fn non_empty(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Raw bytes of the secret, for key derivation (HMAC keys, form bodies).
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("jwt-signing-key"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn secret_exposes_value() {
        let secret = Secret::new(String::from("client-secret"));
        assert_eq!(secret.expose(), "client-secret");
        assert_eq!(secret.as_bytes(), b"client-secret");
    }

    #[test]
    fn non_empty_rejects_blank_values() {
        assert!(Secret::non_empty("").is_none());
        assert!(Secret::non_empty("   \n").is_none());
        let secret = Secret::non_empty("value").unwrap();
        assert_eq!(secret.expose(), "value");
    }

    #[test]
    fn redaction_survives_inside_derived_debug() {
        #[derive(Debug)]
        struct Holder {
            #[allow(dead_code)]
            key: Secret<String>,
        }
        let holder = Holder {
            key: Secret::new("super-secret".into()),
        };
        let debug = format!("{holder:?}");
        assert!(!debug.contains("super-secret"), "got: {debug}");
    }
}
