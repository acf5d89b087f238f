//! Transport policy for RPC plugins.
//!
//! Plaintext connections are acceptable to loopback addresses only, unless a
//! declaration explicitly opts in for a remote one.

use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    Plaintext,
    Tls,
}

#[derive(Debug, thiserror::Error)]
pub enum TlsPolicyError {
    #[error("insecure connection to non-local address '{address}' requires allow_insecure_remote")]
    InsecureRemote { address: String },

    #[error("both cert_file and key_file must be set for client authentication (only {present} given)")]
    PartialKeyPair { present: &'static str },

    #[error("{field} '{path}' is not readable: {reason}")]
    UnreadableFile {
        field: &'static str,
        path: String,
        reason: String,
    },
}

/// Extract the host part of `host:port`, `[v6]:port`, or a bare host.
pub fn host_of(address: &str) -> &str {
    let address = address
        .strip_prefix("tcp://")
        .or_else(|| address.strip_prefix("http://"))
        .or_else(|| address.strip_prefix("https://"))
        .unwrap_or(address);

    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    // A bare IPv6 literal has more than one colon and no port.
    if address.matches(':').count() > 1 {
        return address;
    }
    address.split(':').next().unwrap_or(address)
}

/// Check if an address targets the local machine.
pub fn is_local_address(address: &str) -> bool {
    let host = host_of(address).to_lowercase();

    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => false,
    }
}

/// Decide whether a connection to `address` must use TLS.
///
/// - `enabled = Some(true)` always uses TLS
/// - `enabled = Some(false)` is plaintext, rejected for remote addresses without opt-in
/// - unset: plaintext for local addresses, TLS otherwise
pub fn resolve_transport_security(
    address: &str,
    enabled: Option<bool>,
    allow_insecure_remote: bool,
) -> Result<TransportSecurity, TlsPolicyError> {
    let local = is_local_address(address);
    match enabled {
        Some(true) => Ok(TransportSecurity::Tls),
        Some(false) if local || allow_insecure_remote => Ok(TransportSecurity::Plaintext),
        Some(false) => Err(TlsPolicyError::InsecureRemote {
            address: address.into(),
        }),
        None if local || allow_insecure_remote => Ok(TransportSecurity::Plaintext),
        None => Ok(TransportSecurity::Tls),
    }
}

/// Check that configured TLS files exist and that cert/key come as a pair.
pub fn validate_tls_files(
    ca_file: Option<&str>,
    cert_file: Option<&str>,
    key_file: Option<&str>,
) -> Result<(), TlsPolicyError> {
    match (cert_file, key_file) {
        (Some(_), None) => return Err(TlsPolicyError::PartialKeyPair { present: "cert_file" }),
        (None, Some(_)) => return Err(TlsPolicyError::PartialKeyPair { present: "key_file" }),
        _ => {}
    }

    for (field, path) in [("ca_file", ca_file), ("cert_file", cert_file), ("key_file", key_file)] {
        let Some(path) = path else { continue };
        if let Err(e) = std::fs::metadata(Path::new(path)).and_then(|m| {
            if m.is_file() {
                Ok(())
            } else {
                Err(std::io::Error::other("not a regular file"))
            }
        }) {
            return Err(TlsPolicyError::UnreadableFile {
                field,
                path: path.into(),
                reason: e.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("localhost:7000"), "localhost");
        assert_eq!(host_of("[::1]:7000"), "::1");
        assert_eq!(host_of("::1"), "::1");
        assert_eq!(host_of("tcp://10.0.0.1:80"), "10.0.0.1");
        assert_eq!(host_of("plugins.example.com"), "plugins.example.com");
    }

    #[test]
    fn local_address_detection() {
        assert!(is_local_address("localhost:3000"));
        assert!(is_local_address("LOCALHOST:3000"));
        assert!(is_local_address("127.0.0.1:50051"));
        assert!(is_local_address("127.5.5.5:1"));
        assert!(is_local_address("[::1]:50051"));
        assert!(is_local_address("plugin.localhost:9"));
        assert!(!is_local_address("10.0.0.1:50051"));
        assert!(!is_local_address("plugins.example.com:443"));
        assert!(!is_local_address("localhost.example.com:443"));
    }

    #[test]
    fn local_defaults_to_plaintext() {
        assert_eq!(
            resolve_transport_security("127.0.0.1:9000", None, false).unwrap(),
            TransportSecurity::Plaintext
        );
    }

    #[test]
    fn remote_defaults_to_tls() {
        assert_eq!(
            resolve_transport_security("plugins.example.com:443", None, false).unwrap(),
            TransportSecurity::Tls
        );
    }

    #[test]
    fn remote_plaintext_requires_opt_in() {
        match resolve_transport_security("10.1.2.3:9000", Some(false), false) {
            Err(TlsPolicyError::InsecureRemote { .. }) => {}
            other => panic!("expected insecure remote rejection, got {other:?}"),
        }
        assert_eq!(
            resolve_transport_security("10.1.2.3:9000", Some(false), true).unwrap(),
            TransportSecurity::Plaintext
        );
    }

    #[test]
    fn explicit_tls_for_local() {
        assert_eq!(
            resolve_transport_security("localhost:9000", Some(true), false).unwrap(),
            TransportSecurity::Tls
        );
    }

    #[test]
    fn half_key_pair_rejected() {
        match validate_tls_files(None, Some("/tmp/cert.pem"), None) {
            Err(TlsPolicyError::PartialKeyPair { present }) => assert_eq!(present, "cert_file"),
            other => panic!("expected partial pair error, got {other:?}"),
        }
        assert!(matches!(
            validate_tls_files(None, None, Some("/tmp/key.pem")),
            Err(TlsPolicyError::PartialKeyPair { .. })
        ));
    }

    #[test]
    fn missing_files_rejected() {
        assert!(matches!(
            validate_tls_files(Some("/nonexistent/ca.pem"), None, None),
            Err(TlsPolicyError::UnreadableFile { field: "ca_file", .. })
        ));
    }

    #[test]
    fn existing_files_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        for f in [&ca, &cert, &key] {
            std::fs::write(f, "pem").unwrap();
        }
        assert!(
            validate_tls_files(ca.to_str(), cert.to_str(), key.to_str()).is_ok()
        );
        assert!(validate_tls_files(None, None, None).is_ok());
    }
}
