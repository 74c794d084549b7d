use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trustwipe::backup::BackupEncryptor;
use trustwipe::certificate::{CertificateIssuer, CertificateStore, CertificateVerifier};
use trustwipe::config::AppConfig;
use trustwipe::devices::{DeviceRegistry, SimulatedProbe, SysBlockProbe};
use trustwipe::engine::{
    FileMediumProvider, MediumProvider, SanitizationEngine, SimulatedMedium,
    SimulatedMediumProvider,
};
use trustwipe::session::{ConfirmationToken, SessionPhase, SessionResult, WipeSessionController};
use trustwipe::{Device, DeviceStatus, Operator, OperatorRole, WipeMode};

#[derive(Parser)]
#[command(name = "trustwipe")]
#[command(about = "Secure-erase orchestration with signed sanitization certificates")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Operator name recorded on certificates
    #[arg(long, global = true, default_value = "Security Administrator")]
    operator: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for connected devices and list them
    Devices {
        /// Use the simulated device catalog instead of scanning hardware
        #[arg(long)]
        simulate: bool,

        /// Show serials and detected file counts
        #[arg(short, long)]
        detailed: bool,
    },

    /// Run a wipe session against a device
    Wipe {
        /// Device serial, id, or name fragment
        device: String,

        /// Wipe mode (complete, selective)
        #[arg(short, long, default_value = "complete")]
        mode: String,

        /// Items to wipe in selective mode (repeatable)
        #[arg(short, long)]
        select: Vec<String>,

        /// Create an encrypted backup before wiping
        #[arg(long)]
        backup: bool,

        /// Overwrite passes (defaults to configuration)
        #[arg(long)]
        passes: Option<u32>,

        /// Skip the read-back verification pass
        #[arg(long)]
        no_verify: bool,

        /// Use the simulated catalog and an in-memory medium
        #[arg(long)]
        simulate: bool,

        /// Image file backing the device (real runs)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Directory of selectable items (real runs)
        #[arg(long)]
        items_root: Option<PathBuf>,

        /// Confirmation acknowledgement (prompted for when omitted)
        #[arg(long)]
        acknowledge: Option<String>,
    },

    /// Inspect and verify issued certificates
    Certs {
        #[command(subcommand)]
        command: CertCommands,
    },

    /// Manage signing keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
enum CertCommands {
    /// List stored certificates, newest first
    List,

    /// Print one certificate
    Show {
        certificate_id: String,

        /// Structured JSON instead of the readable form
        #[arg(long)]
        json: bool,
    },

    /// Re-validate a certificate's signature
    Verify { certificate_id: String },

    /// Write a certificate export to a file
    Export {
        certificate_id: String,

        /// Output path
        #[arg(short, long)]
        out: PathBuf,

        /// Export format (json, text)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Print the compact verification payload (QR/link document)
    Payload { certificate_id: String },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate (or load) the signing key and print the public key
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Devices { simulate, detailed } => cmd_devices(simulate, detailed),
        Commands::Wipe {
            device,
            mode,
            select,
            backup,
            passes,
            no_verify,
            simulate,
            image,
            items_root,
            acknowledge,
        } => {
            cmd_wipe(
                &config,
                &cli.operator,
                WipeArgs {
                    device,
                    mode,
                    select,
                    backup,
                    passes,
                    no_verify,
                    simulate,
                    image,
                    items_root,
                    acknowledge,
                },
            )
            .await
        }
        Commands::Certs { command } => cmd_certs(&config, command),
        Commands::Keys { command } => cmd_keys(&config, command),
    }
}

fn build_registry(simulate: bool) -> DeviceRegistry {
    if simulate {
        DeviceRegistry::new(Box::new(SimulatedProbe::demo()))
    } else {
        DeviceRegistry::new(Box::new(SysBlockProbe::default()))
    }
}

fn status_label(status: DeviceStatus) -> colored::ColoredString {
    match status {
        DeviceStatus::Connected => "connected".green(),
        DeviceStatus::Ready => "ready".cyan(),
        DeviceStatus::Wiping => "wiping".yellow(),
        DeviceStatus::Completed => "completed".green(),
        DeviceStatus::Error => "error".red(),
    }
}

fn human_capacity(bytes: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < units.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.0} {}", value, units[unit])
}

fn cmd_devices(simulate: bool, detailed: bool) -> Result<()> {
    let registry = build_registry(simulate);
    let devices = registry.discover()?;

    if devices.is_empty() {
        println!("No devices detected.");
        return Ok(());
    }

    println!("Detected devices ({}):", devices.len());
    for device in &devices {
        println!(
            "  {}  {}  {}  [{}]",
            device.name.bold(),
            device.device_type,
            human_capacity(device.capacity_bytes),
            status_label(device.status),
        );
        if detailed {
            println!("      serial: {}", device.serial);
            println!("      id:     {}", device.id);
            println!("      files:  {}", device.files_detected);
        }
    }
    Ok(())
}

struct WipeArgs {
    device: String,
    mode: String,
    select: Vec<String>,
    backup: bool,
    passes: Option<u32>,
    no_verify: bool,
    simulate: bool,
    image: Option<PathBuf>,
    items_root: Option<PathBuf>,
    acknowledge: Option<String>,
}

fn find_device(devices: &[Device], needle: &str) -> Option<Device> {
    devices
        .iter()
        .find(|d| d.serial == needle || d.id == needle)
        .or_else(|| {
            devices
                .iter()
                .find(|d| d.name.to_lowercase().contains(&needle.to_lowercase()))
        })
        .cloned()
}

/// Demo items for simulated media, matching the catalog the original
/// presentation shows.
fn demo_items() -> Vec<(String, Vec<u8>)> {
    [
        "Documents/Personal/notes.txt",
        "Photos/Camera/img_0001.jpg",
        "Downloads/setup.bin",
        "Applications/Games/save.dat",
        "System/Cache/index.db",
        "User Data/Browser/history.db",
    ]
    .iter()
    .enumerate()
    .map(|(i, path)| (path.to_string(), vec![0xA5u8 ^ i as u8; 4096]))
    .collect()
}

async fn cmd_wipe(config: &AppConfig, operator_name: &str, args: WipeArgs) -> Result<()> {
    let mode = match args.mode.to_lowercase().as_str() {
        "complete" => WipeMode::Complete,
        "selective" => WipeMode::Selective,
        other => bail!("unknown wipe mode: {}", other),
    };

    let registry = Arc::new(build_registry(args.simulate));
    let devices = registry.discover()?;
    let device = find_device(&devices, &args.device)
        .ok_or_else(|| anyhow!("no device matches {:?}", args.device))?;

    let media: Arc<dyn MediumProvider> = if args.simulate {
        let provider = SimulatedMediumProvider::new(8 * 1024 * 1024);
        let mut medium = SimulatedMedium::new(8 * 1024 * 1024);
        for (path, contents) in demo_items() {
            medium = medium.with_item(path, contents);
        }
        provider.insert(&device.serial, medium);
        Arc::new(provider)
    } else {
        let image = args
            .image
            .context("--image is required for non-simulated runs")?;
        let mut provider = FileMediumProvider::new(image);
        if let Some(root) = &args.items_root {
            provider = provider.with_items_root(root);
        }
        Arc::new(provider)
    };

    let issuer = Arc::new(CertificateIssuer::from_key_file(
        config.signing.algorithm,
        &config.signing_key_path(),
    )?);
    let verifier = CertificateVerifier::new()
        .with_trusted_key(issuer.algorithm(), issuer.public_key())
        .with_url_base(config.verification_url_base.clone());
    let store = Arc::new(CertificateStore::open(&config.certificate_db_path())?);
    let backup = Arc::new(BackupEncryptor::with_generated_key(
        config.backup_staging_dir(),
    )?);

    let operator = Operator::new(operator_name, OperatorRole::Admin);
    let controller = WipeSessionController::new(
        registry.clone(),
        media,
        backup,
        issuer,
        store.clone(),
        operator,
    )
    .with_engine(SanitizationEngine::new())
    .with_pass_count(args.passes.unwrap_or(config.engine.pass_count))
    .with_verify(!args.no_verify && config.engine.verify);

    controller.start_setup(&device.id)?;
    controller.update_setup(mode, args.select.clone(), args.backup)?;

    println!("{}", "Confirm Destructive Operation".yellow().bold());
    println!("  Device: {} (serial {})", device.name, device.serial);
    println!("  Mode:   {}", mode);
    println!(
        "  Backup: {}",
        if args.backup { "Yes (AES-256 encrypted)" } else { "No" }
    );
    if mode == WipeMode::Selective {
        println!("  Items:  {}", args.select.len());
    }

    let token = match args.acknowledge {
        Some(token) => ConfirmationToken::new(token),
        None => {
            print!("Type 'confirm' to proceed: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            ConfirmationToken::new(line.trim())
        }
    };
    controller.confirm(&token)?;

    // Ctrl+C requests cancellation at the next safe checkpoint.
    signal_hook::flag::register(
        signal_hook::consts::SIGINT,
        controller.cancel_flag().as_atomic(),
    )?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:48.green/240} {pos:>3}%  {msg}")
            .expect("static progress template"),
    );

    let started = Instant::now();
    let certificate = loop {
        let progress = controller.progress();
        bar.set_position(progress.percent as u64);
        bar.set_message(progress.phase.to_string());

        match controller.result() {
            SessionResult::InProgress => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            SessionResult::Completed(certificate) => {
                bar.finish_with_message(SessionPhase::Completed.to_string());
                break certificate;
            }
            SessionResult::Failed(reason) => {
                bar.abandon_with_message(SessionPhase::Failed.to_string());
                bail!("wipe failed: {}", reason);
            }
        }
    };

    let elapsed = humantime::format_duration(Duration::from_secs(started.elapsed().as_secs()));
    println!();
    println!(
        "{} sanitization finished in {}",
        "OK".green().bold(),
        elapsed
    );
    if let Some(record) = controller.backup_record() {
        println!(
            "Backup: {} archive at {}",
            record.algorithm,
            record.location.display()
        );
    }
    println!();
    println!("{}", certificate.to_text());

    let payload = verifier.verification_payload(&certificate);
    println!(
        "Signature check: {}",
        if payload.verified {
            "valid".green()
        } else {
            "INVALID".red()
        }
    );
    println!("Verification URL: {}", payload.verification_url);
    println!("Verification payload: {}", payload.encode()?);

    Ok(())
}

fn open_verifier(config: &AppConfig) -> Result<CertificateVerifier> {
    let issuer =
        CertificateIssuer::from_key_file(config.signing.algorithm, &config.signing_key_path())?;
    Ok(CertificateVerifier::new()
        .with_trusted_key(issuer.algorithm(), issuer.public_key())
        .with_url_base(config.verification_url_base.clone()))
}

fn cmd_certs(config: &AppConfig, command: CertCommands) -> Result<()> {
    let store = CertificateStore::open(&config.certificate_db_path())?;

    match command {
        CertCommands::List => {
            let certificates = store.list()?;
            if certificates.is_empty() {
                println!("No certificates issued yet.");
                return Ok(());
            }
            println!("Certificates ({} total):", certificates.len());
            for cert in certificates {
                println!(
                    "  {}  {}  {}  {}  {}",
                    cert.certificate_id,
                    cert.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    cert.device_name.bold(),
                    cert.device_serial,
                    cert.wipe_mode,
                );
            }
        }
        CertCommands::Show {
            certificate_id,
            json,
        } => {
            let cert = store
                .get(&certificate_id)?
                .ok_or_else(|| anyhow!("no certificate {}", certificate_id))?;
            if json {
                println!("{}", cert.to_json()?);
            } else {
                println!("{}", cert.to_text());
            }
        }
        CertCommands::Verify { certificate_id } => {
            let cert = store
                .get(&certificate_id)?
                .ok_or_else(|| anyhow!("no certificate {}", certificate_id))?;
            let verifier = open_verifier(config)?;
            if verifier.verify(&cert) {
                println!("{} signature is valid", "OK".green().bold());
            } else {
                bail!("certificate {} failed signature validation", certificate_id);
            }
        }
        CertCommands::Export {
            certificate_id,
            out,
            format,
        } => {
            let cert = store
                .get(&certificate_id)?
                .ok_or_else(|| anyhow!("no certificate {}", certificate_id))?;
            let contents = match format.as_str() {
                "json" => cert.to_json()?,
                "text" => cert.to_text(),
                other => bail!("unknown export format: {}", other),
            };
            std::fs::write(&out, contents)?;
            println!("Exported {} to {}", certificate_id, out.display());
        }
        CertCommands::Payload { certificate_id } => {
            let cert = store
                .get(&certificate_id)?
                .ok_or_else(|| anyhow!("no certificate {}", certificate_id))?;
            let verifier = open_verifier(config)?;
            let payload = verifier.verification_payload(&cert);
            println!("{}", serde_json::to_string_pretty(&payload)?);
            println!();
            println!("encoded: {}", payload.encode()?);
        }
    }
    Ok(())
}

fn cmd_keys(config: &AppConfig, command: KeyCommands) -> Result<()> {
    match command {
        KeyCommands::Init => {
            let path = config.signing_key_path();
            let issuer = CertificateIssuer::from_key_file(config.signing.algorithm, &path)?;
            println!("Signing algorithm: {}", issuer.algorithm());
            println!("Key file:          {}", path.display());
            println!("Public key:        {}", hex::encode(issuer.public_key()));
        }
    }
    Ok(())
}
