//! # CLI
//!
//! The command-line interface of `protoprobe`, defined with `clap`.
//!
//! Global options describe the proto target (root file, include directories, retries and
//! credentials) and map one to one onto [`ProbeConfig`].
use clap::{Args, Parser, Subcommand};
use protoprobe_core::config::{ProbeConfig, SslConfig};
use protoprobe_core::invoker::RequestHeader;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "protoprobe",
    version,
    about = "Discover, mock and call gRPC services"
)]
pub struct Cli {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct TargetArgs {
    /// Root .proto file. Omit it to work from server reflection only
    #[arg(long, global = true)]
    pub proto: Option<PathBuf>,

    /// Additional import directory, searched in order after the root file's directory
    #[arg(short = 'I', long = "include", global = true)]
    pub include_dirs: Vec<PathBuf>,

    /// Extra attempts for failed unary calls
    #[arg(long, global = true, default_value_t = 1)]
    pub retry: u32,

    /// Use TLS with the system trust roots
    #[arg(long, global = true)]
    pub tls: bool,

    /// CA certificate (PEM) for mutual TLS
    #[arg(long, global = true, requires_all = ["key", "cert"])]
    pub ca: Option<PathBuf>,

    /// Client private key (PEM) for mutual TLS
    #[arg(long, global = true, requires_all = ["ca", "cert"])]
    pub key: Option<PathBuf>,

    /// Client certificate (PEM) for mutual TLS
    #[arg(long, global = true, requires_all = ["ca", "key"])]
    pub cert: Option<PathBuf>,
}

impl From<TargetArgs> for ProbeConfig {
    fn from(args: TargetArgs) -> Self {
        let ssl = match (args.ca, args.key, args.cert) {
            (Some(ca), Some(key), Some(cert)) => Some(SslConfig { ca, key, cert }),
            _ => None,
        };

        ProbeConfig {
            proto: args.proto.unwrap_or_default(),
            include_dirs: args.include_dirs,
            retry: args.retry,
            ssl,
            tls: args.tls,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the services of the local schema
    Services,

    /// Describe the methods of one service, or of every service
    Methods {
        /// Fully qualified service name (e.g. my.package.Service)
        service: Option<String>,

        /// Print JSON instead of a proto-like listing
        #[arg(long)]
        json: bool,
    },

    /// Print an example request body for a method
    ///
    /// The local schema is used unless `--address` is given, in which case the server's
    /// reflection service provides it.
    Mock {
        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),

        /// Server to query through reflection (e.g. localhost:50051)
        #[arg(long)]
        address: Option<String>,
    },

    /// Perform a gRPC call
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// protoprobe --proto api.proto call localhost:50051 my.pkg.Service/Method --body '{"key": "value"}'
    /// ```
    Call {
        /// Server address (e.g. localhost:50051 or https://api.example.com)
        address: String,

        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),

        /// JSON body. Object for single requests, array for request streams.
        /// Defaults to a synthesized example
        #[arg(long, value_parser = parse_body)]
        body: Option<serde_json::Value>,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<RequestHeader>,
    },

    /// Discover every service of a server through reflection and save its schema
    Discover {
        /// Server address (e.g. localhost:50051)
        address: String,

        /// Session id naming the output directory. A random one is used when omitted
        #[arg(long, default_value = "")]
        session: String,

        /// Print the full discovery result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<RequestHeader, String> {
    s.split_once(':')
        .map(|(k, v)| RequestHeader::new(k, v))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_need_service_and_method() {
        assert_eq!(
            parse_endpoint("shop.v1.Catalog/GetItem").unwrap(),
            ("shop.v1.Catalog".to_string(), "GetItem".to_string())
        );
        assert!(parse_endpoint("shop.v1.Catalog").is_err());
        assert!(parse_endpoint("/GetItem").is_err());
    }

    #[test]
    fn mutual_tls_flags_become_an_ssl_config() {
        let cli = Cli::parse_from([
            "protoprobe",
            "--proto",
            "api.proto",
            "--ca",
            "ca.pem",
            "--key",
            "key.pem",
            "--cert",
            "cert.pem",
            "services",
        ]);

        let config = ProbeConfig::from(cli.target);

        assert_eq!(config.proto, PathBuf::from("api.proto"));
        assert_eq!(config.retry, 1);
        assert_eq!(
            config.ssl.map(|ssl| ssl.ca),
            Some(PathBuf::from("ca.pem"))
        );
    }

    #[test]
    fn proto_is_optional_and_accepted_after_the_command() {
        let bare = Cli::try_parse_from(["protoprobe", "services"]).unwrap();
        assert_eq!(ProbeConfig::from(bare.target).proto, PathBuf::new());

        let trailing =
            Cli::try_parse_from(["protoprobe", "services", "--proto", "api.proto"]).unwrap();
        assert!(matches!(trailing.command, Commands::Services));
        assert_eq!(
            ProbeConfig::from(trailing.target).proto,
            PathBuf::from("api.proto")
        );
    }

    #[test]
    fn partial_mutual_tls_is_rejected() {
        assert!(Cli::try_parse_from(["protoprobe", "--ca", "ca.pem", "services"]).is_err());
    }
}
