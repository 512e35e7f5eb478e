//! # Protoprobe CLI Entry Point
//!
//! The main executable for the Protoprobe tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    `tracing` subscriber (controlled by `RUST_LOG`, written to standard error).
//! 2. **Execution**: Delegates the command to a [`ProtoProbe`] built from the global options.
//! 3. **Presentation**: Formats and prints results to standard output, errors to standard error.

mod cli;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use formatter::{FormattedString, ServiceList};
use futures_util::StreamExt;
use protoprobe_core::client::ProtoProbe;
use protoprobe_core::invoker::{CallOutcome, RequestHeader, StreamHandle};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let probe = ProtoProbe::new(args.target.into());

    if let Err(err) = run(&probe, args.command).await {
        eprintln!("{}", FormattedString::from(err));
        process::exit(1);
    }
}

async fn run(probe: &ProtoProbe, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Services => {
            println!("{}", FormattedString::from(ServiceList(probe.services())));
        }
        Commands::Methods { service, json } => match service {
            Some(service) => {
                let methods = probe.methods(&service)?;
                if json {
                    println!("{}", FormattedString::from(serde_json::to_value(&methods)?));
                } else {
                    println!("{}", FormattedString::from(&methods));
                }
            }
            None => {
                let all = probe.all_methods();
                if json {
                    println!("{}", FormattedString::from(serde_json::to_value(&all)?));
                } else {
                    println!("{}", FormattedString::from(&all));
                }
            }
        },
        Commands::Mock { endpoint, address } => {
            let (service, method) = endpoint;
            let body = match address {
                Some(address) => {
                    probe
                        .mock_request_by_reflection(&address, &service, &method)
                        .await?
                }
                None => probe.mock_request(&service, &method)?,
            };
            println!("{}", FormattedString::from(body));
        }
        Commands::Call {
            address,
            endpoint,
            body,
            headers,
        } => {
            let (service, method) = endpoint;
            run_call(probe, &address, &service, &method, body, &headers).await?;
        }
        Commands::Discover {
            address,
            session,
            json,
        } => {
            let discovery = probe
                .discover(&address, &session)
                .await
                .with_context(|| format!("Discovery against '{address}' failed"))?;

            if json {
                println!("{}", FormattedString::from(serde_json::to_value(&discovery)?));
            } else {
                println!("{}", FormattedString::from(&discovery));
            }
        }
    }

    Ok(())
}

async fn run_call(
    probe: &ProtoProbe,
    address: &str,
    service: &str,
    method: &str,
    body: Option<serde_json::Value>,
    headers: &[RequestHeader],
) -> anyhow::Result<()> {
    let body = match body {
        Some(body) => body,
        None => {
            let body = probe.mock_request(service, method)?;
            tracing::info!(%body, "no body given, sending a synthesized example");
            body
        }
    };

    match probe.invoke(address, service, method, headers, body).await? {
        CallOutcome::Unary(result) => println!("{}", FormattedString::from(result)),
        CallOutcome::Streaming(handle) => print_stream(handle).await,
    }

    Ok(())
}

/// Prints responses as they arrive. The request side is closed right away, so only the
/// messages seeded from the body are sent.
async fn print_stream(mut handle: StreamHandle) {
    handle.close_send();

    while let Some(item) = handle.next().await {
        match item {
            Ok(value) => println!("{}", FormattedString::from(value)),
            Err(status) => println!("{}", FormattedString::from(status)),
        }
    }
}
