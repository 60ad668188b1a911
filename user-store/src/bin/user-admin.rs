//! CLI tool for managing user accounts and quotas
//!
//! # Usage
//!
//! ```bash
//! # Create the table
//! user-admin --db sqlite://users.db init
//!
//! # Add a user with a 10MB quota
//! user-admin --db sqlite://users.db add 2 alice password123 --space-limit 10485760
//!
//! # Record 4KB of usage
//! user-admin --db sqlite://users.db adjust 2 increase 4096
//!
//! # List all users
//! user-admin --db sqlite://users.db list
//! ```

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use user_store::config::LoggingConfig;
use user_store::{Config, OpContext, UsageDirection, User, UserStore};

#[derive(Parser)]
#[command(name = "user-admin")]
#[command(about = "Manage user accounts, quotas and used space", long_about = None)]
struct Cli {
    /// TOML config file; USER_STORE__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL (e.g., sqlite://users.db), overrides the config
    #[arg(short, long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the user table
    Init,
    /// Add a new user
    Add {
        id: u64,
        name: String,
        /// Plain password, hashed with Argon2 before storage
        password: String,
        #[arg(long, default_value = user_store::USER_ROLE)]
        role: String,
        /// Space limit in bytes (defaults to the configured quota)
        #[arg(long)]
        space_limit: Option<i64>,
    },
    /// Show a user by id or name
    Get { user: String },
    /// List all users
    List,
    /// Delete a user
    Delete { id: u64 },
    /// Replace a user's password
    SetPassword { id: u64, password: String },
    /// Change a user's role
    SetRole { id: u64, role: String },
    /// Change a user's quota
    SetQuota {
        id: u64,
        space_limit: i64,
        #[arg(long)]
        upload_speed_limit: Option<i32>,
        #[arg(long)]
        download_speed_limit: Option<i32>,
    },
    /// Increase or decrease used space
    Adjust {
        id: u64,
        /// "increase" or "decrease"
        direction: UsageDirection,
        amount: i64,
    },
    /// Overwrite used space without quota checks
    ResetUsed { id: u64, used: i64 },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.database_url = db;
    }
    config.validate()?;

    init_logging(&config.logging);

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    debug!("Opening {}", config.store.database_url);
    let store = UserStore::connect(&config.store).await?;

    let ctx = match config.store.operation_timeout() {
        Some(timeout) => OpContext::background().with_timeout(timeout),
        None => OpContext::background(),
    };

    match cli.command {
        Commands::Init => {
            // connect() already created the table
            println!("✓ Store initialized at {}", config.store.database_url);
        }
        Commands::Add {
            id,
            name,
            password,
            role,
            space_limit,
        } => {
            let mut user = User::new(id, &name, &hash_password(&password)?, &role);
            user.quota = config.quota.to_quota();
            if let Some(limit) = space_limit {
                user.quota.space_limit = limit;
            }

            store.add_user(&ctx, &user).await?;
            println!("✓ User {} added with id {}", name, id);
        }
        Commands::Get { user } => {
            let found = match user.parse::<u64>() {
                Ok(id) => store.get_user(&ctx, id).await?,
                Err(_) => store.get_user_by_name(&ctx, &user).await?,
            };
            print_user_header();
            print_user(&found);
        }
        Commands::List => {
            let mut users = store.list_users(&ctx).await?;

            if users.is_empty() {
                println!("No users found.");
            } else {
                users.sort_by_key(|u| u.id);
                print_user_header();
                for user in &users {
                    print_user(user);
                }
                println!("\nTotal: {} user(s)", users.len());
            }
        }
        Commands::Delete { id } => {
            store.del_user(&ctx, id).await?;
            println!("✓ User {} deleted", id);
        }
        Commands::SetPassword { id, password } => {
            store.set_pwd(&ctx, id, &hash_password(&password)?).await?;
            println!("✓ Password updated for user {}", id);
        }
        Commands::SetRole { id, role } => {
            store
                .modify_info(&ctx, id, |current, _| *current = role.clone())
                .await?;
            println!("✓ User {} is now {}", id, role);
        }
        Commands::SetQuota {
            id,
            space_limit,
            upload_speed_limit,
            download_speed_limit,
        } => {
            store
                .modify_info(&ctx, id, |_, quota| {
                    quota.space_limit = space_limit;
                    if let Some(limit) = upload_speed_limit {
                        quota.upload_speed_limit = limit;
                    }
                    if let Some(limit) = download_speed_limit {
                        quota.download_speed_limit = limit;
                    }
                })
                .await?;
            println!("✓ Quota updated for user {}", id);
        }
        Commands::Adjust {
            id,
            direction,
            amount,
        } => {
            let used = store.adjust_used(&ctx, id, direction, amount).await?;
            println!("✓ User {} now uses {} bytes", id, used);
        }
        Commands::ResetUsed { id, used } => {
            store.reset_used(&ctx, id, used).await?;
            println!("✓ User {} used space reset to {} bytes", id, used);
        }
        Commands::Config => unreachable!("handled before connecting"),
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("user_store={}", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    if password.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;

    Ok(hash.to_string())
}

fn print_user_header() {
    println!(
        "{:<8} {:<24} {:<8} {:>16} {:>16}",
        "ID", "Name", "Role", "Used", "Limit"
    );
    println!("{:-<76}", "");
}

fn print_user(user: &User) {
    println!(
        "{:<8} {:<24} {:<8} {:>16} {:>16}",
        user.id, user.name, user.role, user.used_space, user.quota.space_limit
    );
}
