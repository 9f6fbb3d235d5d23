//! Per-lab boot token: a secret passed to the microVM via kernel cmdline
//! and checked by the guest agent on every vsock request. Generated fresh
//! per lab, never persisted in logs or `runtime_meta`.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// A 32-byte random token, hex-encoded for transport over cmdline/vsock.
#[derive(Clone)]
pub struct BootToken(Zeroizing<String>);

impl BootToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        BootToken(Zeroizing::new(hex_encode(&bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a token value that already exists — e.g. one the guest agent
    /// parsed off the kernel cmdline rather than generated itself.
    pub fn from_existing(token: String) -> Self {
        BootToken(Zeroizing::new(token))
    }

    /// Constant-time-ish comparison against a value presented by a caller.
    /// Uses an HMAC over both sides with a random per-call key so timing
    /// differences leak nothing about the token's actual bytes.
    pub fn matches(&self, presented: &str) -> bool {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);

        let expected = mac_of(&key, self.0.as_bytes());
        let actual = mac_of(&key, presented.as_bytes());
        expected == actual
    }
}

impl std::fmt::Debug for BootToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BootToken(<redacted>)")
    }
}

fn mac_of(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Read a boot token out of a kernel cmdline fragment of the form
/// `octolab.token=<hex>`.
pub fn parse_from_cmdline(cmdline: &str) -> Result<String> {
    cmdline
        .split_whitespace()
        .find_map(|tok| tok.strip_prefix("octolab.token="))
        .map(|s| s.to_string())
        .context("cmdline has no octolab.token= fragment")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches_itself() {
        let token = BootToken::generate();
        let presented = token.as_str().to_string();
        assert!(token.matches(&presented));
    }

    #[test]
    fn test_token_rejects_wrong_value() {
        let token = BootToken::generate();
        assert!(!token.matches("not-the-token"));
    }

    #[test]
    fn test_token_rejects_empty() {
        let token = BootToken::generate();
        assert!(!token.matches(""));
    }

    #[test]
    fn test_from_existing_matches_its_own_value() {
        let token = BootToken::from_existing("abc123".to_string());
        assert!(token.matches("abc123"));
        assert!(!token.matches("abc124"));
    }

    #[test]
    fn test_two_tokens_differ() {
        let a = BootToken::generate();
        let b = BootToken::generate();
        assert!(!a.matches(b.as_str()));
    }

    #[test]
    fn test_debug_redacts() {
        let token = BootToken::generate();
        let debug = format!("{:?}", token);
        assert_eq!(debug, "BootToken(<redacted>)");
        assert!(!debug.contains(token.as_str()));
    }

    #[test]
    fn test_parse_from_cmdline() {
        let cmdline = "console=ttyS0 octolab.token=abc123 reboot=k";
        assert_eq!(parse_from_cmdline(cmdline).unwrap(), "abc123");
    }

    #[test]
    fn test_parse_from_cmdline_missing() {
        assert!(parse_from_cmdline("console=ttyS0").is_err());
    }
}
