//! Avocavo CLI
//!
//! Command-line interface for the Avocavo nutrition API.
//!
//! # Usage
//!
//! ```bash
//! # Log in once; the API key is kept in the OS keyring
//! avocavo login --email cook@example.com
//!
//! # Analyze a single ingredient
//! avocavo analyze "1 cup cooked rice"
//!
//! # Analyze a recipe for 8 servings
//! avocavo recipe --servings 8 "2 cups flour" "1 cup milk" "2 large eggs"
//!
//! # Analyze a shopping list, one ingredient per line
//! avocavo batch --file groceries.txt
//! ```

use anyhow::{Context, Result, bail};
use avocavo_core::{
    ApiKeyUpdate, ClientOptions, DeviceCodeLogin, NutritionClient, OAuthEndpoints,
    load_config, load_config_from_path,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

mod output;

#[derive(Parser)]
#[command(name = "avocavo")]
#[command(about = "Nutrition analysis from the command line")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// API key to use instead of the stored login
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the API key
    Login {
        /// Account email
        #[arg(short, long, conflicts_with = "oauth")]
        email: Option<String>,

        /// Use the device-code OAuth flow instead of a password
        #[arg(long)]
        oauth: bool,
    },

    /// Remove the stored login
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Analyze a single ingredient
    Analyze {
        /// Ingredient with quantity, e.g. "2 cups flour"
        ingredient: String,
    },

    /// Analyze a recipe
    Recipe {
        /// Ingredients with quantities
        #[arg(required = true)]
        ingredients: Vec<String>,

        /// Number of servings
        #[arg(short, long, default_value_t = 1)]
        servings: u32,
    },

    /// Analyze many ingredients at once
    Batch {
        /// Ingredients with quantities
        ingredients: Vec<String>,

        /// Read ingredients from a file, one per line ("-" for stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Items per request
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Requests in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show account usage for the current month
    Usage,

    /// Manage API keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Look up a USDA FoodData Central entry
    Verify {
        /// FDC id
        fdc_id: u64,
    },

    /// Check API health (no login required)
    Health,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// List API keys
    List,

    /// Create an API key
    Create {
        name: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        environment: Option<String>,
    },

    /// Change a key's metadata
    Update {
        id: u64,

        #[arg(long)]
        name: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        environment: Option<String>,
    },

    /// Deactivate a key
    Delete { id: u64 },

    /// Issue a new value for a key
    Regenerate { id: u64 },

    /// Usage across all keys
    Usage,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (chunk_size, concurrency) = match &cli.command {
        Commands::Batch {
            chunk_size,
            concurrency,
            ..
        } => (*chunk_size, *concurrency),
        _ => (None, None),
    };
    let client = build_client(&cli, chunk_size, concurrency)?;
    let json = cli.json;

    match cli.command {
        Commands::Login { email, oauth } => login(&client, email, oauth).await,
        Commands::Logout => {
            client.logout().await.context("failed to log out")?;
            println!("✓ Logged out");
            Ok(())
        }
        Commands::Whoami => whoami(&client).await,
        Commands::Analyze { ingredient } => {
            let result = client.analyze_ingredient(&ingredient, None).await?;
            print_result(json, result.to_value(), || output::item(&result));
            Ok(())
        }
        Commands::Recipe {
            ingredients,
            servings,
        } => {
            let result = client.analyze_recipe(&ingredients, servings).await?;
            print_result(json, result.to_value(), || output::recipe(&result));
            Ok(())
        }
        Commands::Batch {
            ingredients, file, ..
        } => {
            let ingredients = collect_ingredients(ingredients, file.as_deref())?;
            let result = client.analyze_batch(&ingredients).await?;
            print_result(json, result.to_value(), || output::batch(&result));
            Ok(())
        }
        Commands::Usage => {
            let account = client.get_account_usage().await?;
            print_result(json, account.to_value(), || output::usage(&account));
            Ok(())
        }
        Commands::Keys { command } => keys(&client, command).await,
        Commands::Verify { fdc_id } => {
            print_json(&client.verify_fdc_id(fdc_id).await?);
            Ok(())
        }
        Commands::Health => {
            let health = client.health_check().await?;
            print_result(json, health.0.clone(), || {
                format!("API status: {}", health.status().unwrap_or("unknown"))
            });
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(
    cli: &Cli,
    chunk_size: Option<usize>,
    concurrency: Option<usize>,
) -> Result<NutritionClient> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    }
    .context("failed to load configuration")?;

    config.apply(ClientOptions {
        base_url: cli.base_url.clone(),
        timeout: cli.timeout,
        chunk_size,
        concurrency,
        ..ClientOptions::default()
    });
    tracing::debug!(base_url = %config.base_url, "Using API endpoint");

    let login = DeviceCodeLogin::new(OAuthEndpoints::for_base_url(&config.base_url), |auth| {
        eprintln!();
        eprintln!("To log in, visit: {}", auth.verification_uri);
        eprintln!("and enter the code: {}", auth.user_code);
        if let Some(complete) = &auth.verification_uri_complete {
            eprintln!("(or open {})", complete);
        }
        eprintln!();
    });

    let mut builder = NutritionClient::builder()
        .config(config)
        .interactive_login(Arc::new(login));
    if let Some(key) = &cli.api_key {
        builder = builder.api_key(key.clone());
    }
    builder.build().context("failed to create client")
}

async fn login(client: &NutritionClient, email: Option<String>, oauth: bool) -> Result<()> {
    if oauth {
        let credential = client
            .login_interactive()
            .await
            .context("OAuth login failed")?;
        println!("✓ Logged in via OAuth ({} credential)", credential.source);
        return Ok(());
    }

    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = prompt("Password: ")?;

    let summary = client.login(&email, &password).await?;
    println!("{}", output::login(&summary));
    Ok(())
}

async fn whoami(client: &NutritionClient) -> Result<()> {
    match client.current_user().await {
        Some(user) => println!("{}", output::whoami(&user)),
        None => println!("Not logged in. Run `avocavo login` or set AVOCAVO_API_KEY."),
    }
    Ok(())
}

async fn keys(client: &NutritionClient, command: KeyCommands) -> Result<()> {
    let response = match command {
        KeyCommands::List => client.list_api_keys().await?,
        KeyCommands::Create {
            name,
            description,
            environment,
        } => {
            let created = client
                .create_api_key(&name, description.as_deref(), environment.as_deref())
                .await?;
            eprintln!("Store the new key now; it will not be shown again.");
            created
        }
        KeyCommands::Update {
            id,
            name,
            description,
            environment,
        } => {
            let update = ApiKeyUpdate {
                name,
                description,
                environment,
            };
            if update == ApiKeyUpdate::default() {
                bail!("nothing to update; pass --name, --description or --environment");
            }
            client.update_api_key(id, &update).await?
        }
        KeyCommands::Delete { id } => client.delete_api_key(id).await?,
        KeyCommands::Regenerate { id } => client.regenerate_api_key(id).await?,
        KeyCommands::Usage => client.get_usage_summary().await?,
    };
    print_json(&response);
    Ok(())
}

/// Ingredients from arguments, plus a file (or stdin for `-`), blank lines dropped.
fn collect_ingredients(mut ingredients: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let lines = if path == Path::new("-") {
            read_lines(std::io::stdin().lock())?
        } else {
            let handle = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            read_lines(std::io::BufReader::new(handle))?
        };
        ingredients.extend(lines);
    }

    if ingredients.is_empty() {
        bail!("no ingredients given; pass them as arguments or with --file");
    }
    Ok(ingredients)
}

fn read_lines(reader: impl BufRead) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read ingredient list")?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

fn prompt(label: &str) -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("{}", label);
        std::io::stderr().flush().ok();
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("failed to read input")?;
    let value = line.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        bail!("{} is required", label.trim_end_matches(": "));
    }
    Ok(value)
}

fn print_result(json: bool, value: Value, text: impl FnOnce() -> String) {
    if json {
        print_json(&value);
    } else {
        println!("{}", text());
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", value),
    }
}
