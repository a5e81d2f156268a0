//! Kubetrust - control-plane PKI and secure bootstrap discovery

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use kubetrust::config::KubetrustConfig;
use kubetrust::discovery::{
    discover_cluster_trust, pin_for_certificate, BootstrapToken, HttpTrustObjectSource,
    TrustObject,
};
use kubetrust::pki::{
    check_expiration, default_registry, ensure_service_account_key, materialize, store,
    CertificateTree, ExpirationStatus,
};

/// Kubetrust - certificate authority tree and bootstrap trust discovery
#[derive(Parser, Debug)]
#[command(name = "kubetrust", version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short = 'c',
        long = "config",
        env = "KUBETRUST_CONFIG",
        default_value = "/etc/kubetrust/config.yaml"
    )]
    config_file: PathBuf,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or validate the control-plane certificate tree
    ///
    /// Missing certificates are generated; existing ones are checked against
    /// the current cluster settings and never overwritten.
    Certs(CertsArgs),

    /// Discover the cluster root of trust as a joining node
    Discover(DiscoverArgs),

    /// Generate a bootstrap token, optionally with a signed trust object
    Token(TokenArgs),

    /// Print the pin of a root certificate
    Pin(PinArgs),
}

/// Certificate tree arguments
#[derive(Parser, Debug)]
struct CertsArgs {
    /// PKI directory
    #[arg(long, env = "KUBETRUST_PKI_DIR")]
    pki_dir: Option<PathBuf>,

    /// Node name used in SANs
    #[arg(long)]
    node_name: Option<String>,

    /// Advertised API server address
    #[arg(long)]
    advertise_address: Option<IpAddr>,

    /// Only report certificate expiry
    #[arg(long)]
    check_expiration: bool,
}

/// Discovery arguments
#[derive(Parser, Debug)]
struct DiscoverArgs {
    /// Candidate API server endpoints
    endpoints: Vec<String>,

    /// Bootstrap token `<id>.<secret>`
    #[arg(long, env = "KUBETRUST_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Allowed root key pin (repeatable)
    #[arg(long = "pin")]
    pins: Vec<String>,

    /// Global timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Write the discovered root certificate here
    #[arg(long)]
    write_ca: Option<PathBuf>,
}

/// Token arguments
#[derive(Parser, Debug)]
struct TokenArgs {
    /// Print the trust object for this API server URL, signed with the new token
    #[arg(long)]
    publish: Option<String>,

    /// PKI directory holding `ca.crt`
    #[arg(long, env = "KUBETRUST_PKI_DIR")]
    pki_dir: Option<PathBuf>,
}

/// Pin arguments
#[derive(Parser, Debug)]
struct PinArgs {
    /// Certificate to pin; defaults to `ca.crt` in the PKI directory
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PKI directory
    #[arg(long, env = "KUBETRUST_PKI_DIR")]
    pki_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = KubetrustConfig::load(&cli.config_file)?;
    config.telemetry.json |= cli.json;
    kubetrust::init_tracing(&config.telemetry)?;

    match cli.command {
        Commands::Certs(args) => run_certs(config, args),
        Commands::Discover(args) => run_discover(config, args).await,
        Commands::Token(args) => run_token(config, args),
        Commands::Pin(args) => run_pin(config, args),
    }
}

/// Materialize the certificate tree, or report expiry
fn run_certs(mut config: KubetrustConfig, args: CertsArgs) -> anyhow::Result<()> {
    if let Some(dir) = args.pki_dir {
        config.pki.pki_dir = dir;
    }
    if let Some(node_name) = args.node_name {
        config.cluster.node_name = node_name;
    }
    if let Some(address) = args.advertise_address {
        config.cluster.advertise_address = Some(address);
    }

    let tree = CertificateTree::build(default_registry())?;
    let pki_dir = config.pki.pki_dir.as_path();

    if args.check_expiration {
        print_expiration(&tree, pki_dir)?;
        return Ok(());
    }

    let report = materialize(&tree, pki_dir, &config.cluster)?;
    ensure_service_account_key(pki_dir)?;
    info!(
        pki_dir = %pki_dir.display(),
        certs = report.certs.len(),
        generated = report.generated().len(),
        "certificate tree is up to date"
    );
    Ok(())
}

fn print_expiration(tree: &CertificateTree, pki_dir: &Path) -> anyhow::Result<()> {
    println!("{:<28} {:<16} {:>14}", "CERTIFICATE", "AUTHORITY", "RESIDUAL DAYS");
    for entry in check_expiration(tree, pki_dir)? {
        let residual = match &entry.status {
            ExpirationStatus::Absent => "absent".to_string(),
            ExpirationStatus::Unreadable(_) => "unreadable".to_string(),
            ExpirationStatus::Present { remaining_secs, .. } => {
                format!("{}", remaining_secs / (24 * 60 * 60))
            }
        };
        println!(
            "{:<28} {:<16} {:>14}",
            entry.base_name,
            entry.authority.as_deref().unwrap_or("-"),
            residual
        );
    }
    Ok(())
}

/// Discover the cluster root of trust over HTTPS
async fn run_discover(mut config: KubetrustConfig, args: DiscoverArgs) -> anyhow::Result<()> {
    let settings = &mut config.discovery;
    if !args.endpoints.is_empty() {
        settings.endpoints = args.endpoints;
    }
    if args.token.is_some() {
        settings.token = args.token;
    }
    if !args.pins.is_empty() {
        settings.pins = args.pins;
    }
    if let Some(timeout) = args.timeout_secs {
        settings.timeout_secs = timeout;
    }

    let discovery = settings.to_discovery_config()?;
    if discovery.pins.is_empty() {
        tracing::warn!("no root key pins given; the root is trusted on the token signature alone");
    }

    let outcome =
        discover_cluster_trust(&discovery, Arc::new(HttpTrustObjectSource::new()?)).await?;

    if let Some(path) = args.write_ca {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &outcome.trust.root_ca_pem)?;
        info!(path = %path.display(), "wrote discovered root certificate");
    }
    println!("{}", outcome.trust.server_url);
    Ok(())
}

/// Generate a token and optionally the trust object it signs
fn run_token(config: KubetrustConfig, args: TokenArgs) -> anyhow::Result<()> {
    let token = BootstrapToken::generate()?;

    let Some(server_url) = args.publish else {
        println!("{}", token);
        return Ok(());
    };

    let pki_dir = args.pki_dir.unwrap_or(config.pki.pki_dir);
    let ca_pem = store::load_cert(&pki_dir, "ca")?.ok_or_else(|| {
        anyhow::anyhow!("no ca.crt in {}; run `kubetrust certs` first", pki_dir.display())
    })?;

    let mut trust = TrustObject::from_parts(&server_url, &ca_pem)?;
    trust.sign(&token)?;
    info!(token_id = %token.id(), "signed trust object");

    eprintln!("token: {}", token);
    eprintln!("pin:   {}", pin_for_certificate(&ca_pem)?);
    println!("{}", String::from_utf8(trust.to_json()?)?);
    Ok(())
}

/// Print the pin of a certificate
fn run_pin(config: KubetrustConfig, args: PinArgs) -> anyhow::Result<()> {
    let path = match args.cert {
        Some(path) => path,
        None => store::cert_path(&args.pki_dir.unwrap_or(config.pki.pki_dir), "ca"),
    };
    let pem = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    println!("{}", pin_for_certificate(&pem)?);
    Ok(())
}
