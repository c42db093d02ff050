//! OCSP chain checker
//!
//! Reads a PEM certificate chain (leaf first) and reports its revocation
//! status.
//!
//! Usage:
//!   cargo run -p ocsp-client --example ocsp_check -- \
//!     chain.pem \
//!     --fail-closed \
//!     --server http://ocsp.example.test/

use clap::Parser;
use ocsp_client::{ClientConfig, FailureMode, OcspClient, VerifyConfig};
use ocsp_proto::Certificate;
use pki_types::pem::PemObject;
use pki_types::CertificateDer;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ocsp_check")]
#[command(about = "Check the OCSP revocation status of a certificate chain", long_about = None)]
struct Args {
    /// PEM file holding the chain, leaf first
    #[arg(value_name = "CHAIN")]
    chain: String,

    /// Client configuration (JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Reject the chain when its status cannot be determined
    #[arg(long)]
    fail_closed: bool,

    /// Responder URL replacing the certificates' AIA entries (repeatable)
    #[arg(short, long)]
    server: Vec<String>,

    /// Query every responder instead of stopping at the first answer
    #[arg(long)]
    query_all: bool,

    /// Retries per responder exchange (default: bounded by time only)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Extra trust anchor for chains that stop below the root (PEM)
    #[arg(long)]
    ca: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn load_pem(path: &str) -> Result<Vec<Certificate>, String> {
    CertificateDer::pem_file_iter(path)
        .map_err(|e| format!("{path}: {e}"))?
        .map(|der| {
            let der = der.map_err(|e| format!("{path}: {e}"))?;
            Certificate::from_der(der.as_ref()).map_err(|e| format!("{path}: {e}"))
        })
        .collect()
}

fn load_config(path: Option<&str>) -> Result<ClientConfig, String> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
            serde_json::from_str(&text).map_err(|e| format!("{path}: {e}"))
        }
        None => Ok(ClientConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(args.config.as_deref()).unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        process::exit(2);
    });
    let chain = load_pem(&args.chain).unwrap_or_else(|e| {
        error!("Failed to load chain: {e}");
        process::exit(2);
    });
    if chain.is_empty() {
        error!("No certificates found in {}", args.chain);
        process::exit(2);
    }
    let extra_cas = match args.ca.as_deref() {
        Some(path) => load_pem(path).unwrap_or_else(|e| {
            error!("Failed to load CA: {e}");
            process::exit(2);
        }),
        None => Vec::new(),
    };

    let client = OcspClient::new(config).unwrap_or_else(|e| {
        error!("Failed to create OCSP client: {e}");
        process::exit(2);
    });

    let conf = VerifyConfig {
        failure_mode: if args.fail_closed {
            FailureMode::FailClosed
        } else {
            FailureMode::FailOpen
        },
        query_all_servers: args.query_all,
        max_retries: args.max_retries,
        ..VerifyConfig::default()
    }
    .with_servers(args.server)
    .with_extra_cas(extra_cas);

    for cert in &chain {
        info!(subject = cert.subject(), serial = %cert.serial_hex(), "loaded certificate");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match client.verify_peer_certificate(&[chain], &conf, &cancel).await {
        Ok(()) => {
            println!("OK: {} OCSP responses cached", client.cache_len().await);
        }
        Err(e) => {
            println!("REJECTED: {e}");
            process::exit(1);
        }
    }
}
