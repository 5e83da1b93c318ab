//! Command line front end over a local data directory.
//!
//! Layout of the data directory:
//!
//! ```text
//! <data>/blobs/          blob store (certificates, keys, documents, signatures)
//! <data>/state.json      record store snapshot
//! <data>/directory.json  known signers
//! ```

use clap::{Parser, Subcommand};
use serde::Serialize;
use signflow::{
    EngineConfig, Repository, SignRequest, Signer, SignerSpec, Signflow, SigningMode,
    StaticDirectory, TenantContext, Upload,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "signflow",
    about = "Document signing with an in-tenant certificate authority",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory
    #[arg(long, env = "SIGNFLOW_DATA", default_value = "signflow-data", global = true)]
    data: PathBuf,

    /// Tenant id
    #[arg(long, env = "SIGNFLOW_TENANT", default_value = "default", global = true)]
    tenant: String,

    /// Tenant secret used to derive certificate passphrases
    #[arg(long, env = "SIGNFLOW_SECRET", hide_env_values = true, global = true)]
    secret: Option<String>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (sets RUST_LOG=debug if not already set)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the tenant's root certificate authority
    InitCa {
        /// Organization (O)
        #[arg(long)]
        organization: String,
        /// Common name (CN)
        #[arg(long)]
        common_name: String,
        /// Validity in days (default from configuration)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Issue a signing certificate to a user
    IssueCert {
        /// User id
        #[arg(long)]
        user: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// E-mail address
        #[arg(long)]
        email: String,
        /// Label distinguishing several certificates of one user
        #[arg(long, default_value = "default")]
        label: String,
    },

    /// Upload a PDF and open a signing session
    CreateSession {
        /// PDF to sign
        input: PathBuf,
        /// Session title (default: file name)
        #[arg(long)]
        title: Option<String>,
        /// Creator
        #[arg(long)]
        owner: String,
        /// sequential, parallel or hybrid
        #[arg(long, default_value = "sequential")]
        mode: String,
        /// Signer user ids in order (repeat the flag)
        #[arg(long = "signer", required = true)]
        signers: Vec<String>,
    },

    /// Sign a pending signature slot
    Sign {
        /// Signature slot id
        #[arg(long)]
        signature: Uuid,
        /// Certificate id
        #[arg(long)]
        certificate: Uuid,
        /// Signing user
        #[arg(long)]
        user: String,
        /// Client address recorded with the signature
        #[arg(long)]
        ip: Option<String>,
        /// Copy the signed PDF here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify a file against the signing records
    Verify {
        /// File to verify
        input: PathBuf,
    },

    /// Show the progress of a session
    Status {
        /// Session id
        session: Uuid,
    },

    /// Re-check a stored signature cryptographically
    VerifySignature {
        /// Signature slot id
        signature: Uuid,
    },
}

struct Workspace {
    root: PathBuf,
    directory: StaticDirectory,
    engine: Signflow,
}

fn cli_error(msg: impl Into<String>) -> signflow::Error {
    signflow::Error::InvalidRequest(msg.into())
}

fn load_directory(path: &Path) -> signflow::Result<StaticDirectory> {
    let mut directory = StaticDirectory::new();
    if path.exists() {
        let signers: Vec<Signer> = serde_json::from_slice(&std::fs::read(path)?)?;
        for signer in signers {
            directory.insert(signer);
        }
    }
    Ok(directory)
}

impl Workspace {
    fn open(cli: &Cli) -> signflow::Result<Self> {
        let secret = cli
            .secret
            .clone()
            .ok_or_else(|| cli_error("a tenant secret is required (--secret or SIGNFLOW_SECRET)"))?;
        let config = match &cli.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        std::fs::create_dir_all(&cli.data)?;
        let directory = load_directory(&cli.data.join("directory.json"))?;
        let repo = Arc::new(Repository::load_json(cli.data.join("state.json"))?);
        let blobs = Arc::new(signflow::FsBlobStore::new(cli.data.join("blobs"))?);
        let engine = Signflow::new(
            TenantContext::new(cli.tenant.clone(), secret)?,
            blobs,
            repo,
            config,
            Arc::new(directory.clone()),
        )?;
        Ok(Self {
            root: cli.data.clone(),
            directory,
            engine,
        })
    }

    fn save(&self) -> signflow::Result<()> {
        self.engine.repository().save_json(self.root.join("state.json"))?;
        let mut signers: Vec<&Signer> = self.directory.signers().collect();
        signers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        std::fs::write(
            self.root.join("directory.json"),
            serde_json::to_vec_pretty(&signers)?,
        )?;
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> signflow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> signflow::Result<()> {
    let mut ws = Workspace::open(&cli)?;
    match cli.command {
        Commands::InitCa {
            organization,
            common_name,
            days,
        } => {
            let ca = ws.engine.certificates().create_ca(&organization, &common_name, days)?;
            ws.save()?;
            print_json(&ca)
        },
        Commands::IssueCert {
            user,
            name,
            email,
            label,
        } => {
            let signer = Signer {
                user_id: user,
                name,
                email,
            };
            let cert = ws.engine.certificates().issue_certificate(&signer, &label)?;
            ws.directory.insert(signer);
            ws.save()?;
            // The working secret stays out of the output.
            print_json(&serde_json::json!({
                "id": cert.id,
                "user_id": cert.user_id,
                "label": cert.label,
                "serial": cert.serial,
                "valid_from": cert.valid_from,
                "valid_to": cert.valid_to,
            }))
        },
        Commands::CreateSession {
            input,
            title,
            owner,
            mode,
            signers,
        } => {
            let mode: SigningMode = mode.parse().map_err(cli_error)?;
            let content = std::fs::read(&input)?;
            let filename = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document.pdf".to_string());
            let title = title.unwrap_or_else(|| filename.clone());
            let specs: Vec<SignerSpec> = signers.into_iter().map(SignerSpec::new).collect();
            let session = ws.engine.sessions().create_session(
                &owner,
                Upload::pdf(filename, content),
                &title,
                mode,
                &specs,
            )?;
            ws.save()?;
            print_json(&ws.engine.sessions().session_status(session.id)?)
        },
        Commands::Sign {
            signature,
            certificate,
            user,
            ip,
            output,
        } => {
            let mut request = SignRequest::new(signature, certificate, user);
            request.ip_address = ip;
            request.user_agent = Some(format!("{}/{}", signflow::NAME, signflow::VERSION));
            let outcome = ws.engine.sessions().sign(&request)?;
            ws.save()?;
            if let Some(output) = output {
                let bytes = ws.engine.blobs().get(&outcome.signed_file_path)?;
                std::fs::write(&output, bytes)?;
            }
            print_json(&serde_json::json!({
                "signature": outcome.signature,
                "signed_digest": outcome.signed_digest,
                "current_hash": outcome.current_hash,
                "document_status": outcome.document_status,
                "session_status": outcome.session_status,
            }))
        },
        Commands::Verify { input } => {
            let bytes = std::fs::read(&input)?;
            print_json(&ws.engine.verification().verify_uploaded_file(&bytes)?)
        },
        Commands::Status { session } => print_json(&ws.engine.sessions().session_status(session)?),
        Commands::VerifySignature { signature } => {
            print_json(&ws.engine.verification().verify_signature_record(signature)?)
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        },
    }
}
