//! # Configuration
//!
//! The recognized options of a proto target, and the [`TargetEndpoint`] they produce
//! for a given server address.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_RETRY: u32 = 1;

/// Paths to the PEM material used for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslConfig {
    pub ca: PathBuf,
    pub key: PathBuf,
    pub cert: PathBuf,
}

/// Options for one configured proto target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    /// Root `.proto` file. An empty path means no local schema (reflection only).
    pub proto: PathBuf,
    /// Additional import search directories, probed in order after the root's own directory.
    pub include_dirs: Vec<PathBuf>,
    /// Extra attempts for failed unary calls.
    pub retry: u32,
    /// Mutual TLS material. Takes precedence over `tls`.
    pub ssl: Option<SslConfig>,
    /// Server-only TLS, used when `ssl` is absent.
    pub tls: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            proto: PathBuf::new(),
            include_dirs: Vec::new(),
            retry: DEFAULT_RETRY,
            ssl: None,
            tls: false,
        }
    }
}

impl ProbeConfig {
    pub fn new(proto: impl Into<PathBuf>) -> Self {
        Self {
            proto: proto.into(),
            ..Default::default()
        }
    }

    /// Builds the endpoint description for `address` using this target's credentials.
    pub fn target(&self, address: impl Into<String>) -> TargetEndpoint {
        let credentials = match (&self.ssl, self.tls) {
            (Some(ssl), _) => CredentialMode::MutualTls(ssl.clone()),
            (None, true) => CredentialMode::ServerTls,
            (None, false) => CredentialMode::Insecure,
        };

        TargetEndpoint {
            address: address.into(),
            credentials,
            retry: self.retry,
        }
    }
}

/// How the connection to a target is secured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialMode {
    Insecure,
    ServerTls,
    MutualTls(SslConfig),
}

impl CredentialMode {
    pub fn is_tls(&self) -> bool {
        !matches!(self, CredentialMode::Insecure)
    }
}

/// A server to call, how to reach it, and how often to retry unary calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEndpoint {
    pub address: String,
    pub credentials: CredentialMode,
    pub retry: u32,
}

impl TargetEndpoint {
    pub fn insecure(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: CredentialMode::Insecure,
            retry: DEFAULT_RETRY,
        }
    }

    /// The address as a URI. Bare `host:port` addresses get a scheme matching
    /// the credential mode.
    pub fn uri(&self) -> String {
        if self.address.contains("://") {
            return self.address.clone();
        }

        let scheme = if self.credentials.is_tls() {
            "https"
        } else {
            "http"
        };

        format!("{scheme}://{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config: ProbeConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.proto, PathBuf::new());
        assert_eq!(config.retry, 1);
        assert!(config.ssl.is_none());
        assert!(!config.tls);
    }

    #[test]
    fn include_dirs_keep_their_order() {
        let config: ProbeConfig = serde_json::from_value(serde_json::json!({
            "proto": "/srv/protos/api/service.proto",
            "includeDirs": ["/srv/vendor", "/srv/third_party"],
        }))
        .unwrap();

        assert_eq!(
            config.include_dirs,
            vec![PathBuf::from("/srv/vendor"), PathBuf::from("/srv/third_party")]
        );
    }

    #[test]
    fn ssl_takes_precedence_over_tls() {
        let ssl = SslConfig {
            ca: "ca.pem".into(),
            key: "client.key".into(),
            cert: "client.pem".into(),
        };
        let config = ProbeConfig {
            ssl: Some(ssl.clone()),
            tls: true,
            ..Default::default()
        };

        let target = config.target("localhost:50051");

        assert_eq!(target.credentials, CredentialMode::MutualTls(ssl));
        assert_eq!(target.uri(), "https://localhost:50051");
    }

    #[test]
    fn tls_flag_selects_server_tls() {
        let config = ProbeConfig {
            tls: true,
            ..Default::default()
        };

        assert_eq!(config.target("x:1").credentials, CredentialMode::ServerTls);
    }

    #[test]
    fn plaintext_addresses_get_an_http_scheme() {
        let target = ProbeConfig::default().target("127.0.0.1:50051");

        assert_eq!(target.credentials, CredentialMode::Insecure);
        assert_eq!(target.uri(), "http://127.0.0.1:50051");
        assert_eq!(
            TargetEndpoint::insecure("http://already:1").uri(),
            "http://already:1"
        );
    }
}
