use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod model;
pub mod patients;
pub mod pharmacy;
pub mod prescriptions;
pub mod reference;
pub mod store;

use auth::{AuthService, TokenSigner};
use config::{AuthConfig, Config};
use crypto::{CodeCipher, Crypto};
use model::{Role, User};
use patients::PatientService;
use pharmacy::RedemptionService;
use prescriptions::PrescriptionService;
use reference::ReferenceGenerator;
use store::Store;

#[derive(Parser)]
#[command(name = "medconnect")]
#[command(about = "MedConnect - Digital prescription and patient records service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server (default)
    Start {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
        /// Path to a TOML or JSON config file
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "medconnect.toml")]
        output: String,
    },
    /// Generate a JWT token for API access
    Token {
        /// Email/subject for the token
        #[arg(short, long, default_value = "admin@medconnect.example")]
        email: String,
        /// Role claim (patient|doctor|pharmacist|admin)
        #[arg(short, long, default_value = "admin")]
        role: String,
        /// Token expiry in hours
        #[arg(long, default_value = "24")]
        expiry_hours: i64,
    },
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Start { port, config }) => {
            let mut config = match config {
                Some(path) => Config::load(&path).await?,
                None => Config::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate().map_err(|errors| errors.join("; "))?;
            init_tracing(&config.logging.level);
            start_server(config).await?;
        }
        Some(Commands::Init { output }) => {
            let toml = Config::default().export_toml()?;
            tokio::fs::write(&output, toml).await?;
            println!("Wrote default configuration to {}", output);
        }
        Some(Commands::Token {
            email,
            role,
            expiry_hours,
        }) => {
            let role = Role::parse(&role).ok_or("Unknown role")?;
            let config = Config::default();
            let signer = TokenSigner::new(config.auth.secret(), expiry_hours);
            let now = chrono::Utc::now();
            let user = User {
                id: uuid::Uuid::new_v4(),
                email,
                password_hash: String::new(),
                role,
                full_name: "CLI Token".to_string(),
                phone: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            println!("{}", signer.issue(&user)?);
        }
        None => {
            let config = Config::default();
            init_tracing(&config.logging.level);
            start_server(config).await?;
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    // Ignored when a subscriber is already installed (tests).
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Wire the services onto a shared store and build the router.
pub fn build_router(config: &Config, store: Arc<Store>) -> Result<axum::Router, String> {
    let signer = TokenSigner::new(config.auth.secret(), config.auth.token_ttl_hours);
    let references = ReferenceGenerator::new(config.redemption.reference_max_attempts);
    let cipher = CodeCipher::from_hex(&config.redemption.encryption_key)?;

    let auth_service = Arc::new(AuthService::new(store.clone(), signer.clone()));
    let patient_service = Arc::new(PatientService::new(store.clone(), references.clone()));
    let prescription_service = Arc::new(PrescriptionService::new(
        store.clone(),
        references,
        cipher.clone(),
        config.redemption.code_ttl_days,
    ));
    let redemption_service = Arc::new(RedemptionService::new(store, cipher));

    Ok(api::router(
        auth_service,
        patient_service,
        prescription_service,
        redemption_service,
        signer,
    ))
}

/// Seed the initial admin account when none exists yet.
pub async fn seed_admin(store: &Store, auth: &AuthConfig) -> Result<(), Box<dyn std::error::Error>> {
    if store.any_admin().await {
        return Ok(());
    }
    let now = chrono::Utc::now();
    let admin = User {
        id: uuid::Uuid::new_v4(),
        email: auth.admin_email.clone(),
        password_hash: Crypto::hash_password(&auth.admin_password),
        role: Role::Admin,
        full_name: auth.admin_full_name.clone(),
        phone: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    store.insert_user(admin).await?;
    info!(email = %auth.admin_email, "Seeded initial admin account");
    Ok(())
}

async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting MedConnect prescription service...");

    let store = Arc::new(Store::new());
    seed_admin(&store, &config.auth).await?;
    let app = build_router(&config, store)?;

    let addr = std::net::SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    info!("MedConnect listening on {}", addr);
    info!("API Endpoints:");
    info!("  - Auth:     http://{}/api/auth/", addr);
    info!("  - Patients: http://{}/api/patients/", addr);
    info!("  - Pharmacy: http://{}/api/pharmacy/", addr);
    info!("  - Health:   http://{}/health", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
