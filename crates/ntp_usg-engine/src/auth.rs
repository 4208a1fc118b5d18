// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Symmetric-key authentication seam.
//!
//! The engine never computes a digest itself. It hands the authenticated
//! octets of a datagram and the received digest to an [`Authenticator`] and
//! acts on the verdict; outbound packets of keyed associations are signed
//! the same way.

use ntp_proto::protocol::Mac;

/// Result of verifying a MAC.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthStatus {
    /// The digest matches.
    Ok,
    /// The digest does not match.
    Failed,
    /// The key is unknown or not trusted.
    NoSuchKey,
}

/// Message authentication provider.
pub trait Authenticator {
    /// Check `digest` over `data` with key `key_id`.
    fn verify(&self, key_id: u32, data: &[u8], digest: &[u8]) -> AuthStatus;

    /// Compute the MAC over `data` with key `key_id`, or `None` if the key
    /// is unavailable.
    fn sign(&self, key_id: u32, data: &[u8]) -> Option<Mac>;
}

/// An authenticator with no keys: every MAC fails with
/// [`AuthStatus::NoSuchKey`] and nothing can be signed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAuthenticator;

impl Authenticator for NullAuthenticator {
    fn verify(&self, _key_id: u32, _data: &[u8], _digest: &[u8]) -> AuthStatus {
        AuthStatus::NoSuchKey
    }

    fn sign(&self, _key_id: u32, _data: &[u8]) -> Option<Mac> {
        None
    }
}

/// Verdict on an inbound datagram's authenticator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AuthVerdict {
    /// No MAC present.
    None,
    /// A bare key id: the sender could not authenticate us.
    CryptoNak,
    /// MAC present and valid.
    Ok,
    /// MAC present and invalid, unknown key, or excessive skew.
    Error,
}

impl AuthVerdict {
    /// Whether the verdict satisfies a policy that requires authentication
    /// when `required`, and otherwise accepts unauthenticated packets.
    pub(crate) fn permits(self, required: bool) -> bool {
        if required {
            self == AuthVerdict::Ok
        } else {
            matches!(self, AuthVerdict::Ok | AuthVerdict::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_authenticator() {
        let auth = NullAuthenticator;
        assert_eq!(auth.verify(1, b"data", &[0; 16]), AuthStatus::NoSuchKey);
        assert!(auth.sign(1, b"data").is_none());
    }

    #[test]
    fn test_verdict_policy() {
        assert!(AuthVerdict::None.permits(false));
        assert!(AuthVerdict::Ok.permits(false));
        assert!(!AuthVerdict::Error.permits(false));
        assert!(!AuthVerdict::CryptoNak.permits(false));

        assert!(!AuthVerdict::None.permits(true));
        assert!(AuthVerdict::Ok.permits(true));
    }
}
