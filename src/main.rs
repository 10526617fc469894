use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;

use enki_core::catalog::{CatalogEntry, ModelCatalog};
use enki_core::config::{self, Config};
use enki_core::error::{ChatError, EnkiError};
use enki_core::gate::{GateEvent, Phase, SessionGate, Transition};
use enki_core::provider::{LlmProvider, ProviderRegistry};
use enki_core::session::send_to_provider;
use enki_core::store::{CredentialStore, Registration};
use enki_core::types::Provider;
use enki_core::util::mask_secret;
use enki_core::vault::Vault;

const CATEGORY_WARNING: &str = "Please select a specific model, not just a category.";

#[derive(Parser)]
#[command(
    name = "enki",
    about = format!("{} enki - Multi-user LLM chat", enki_core::LOGO),
    version = enki_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web interface
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the config file and an empty credential store
    Onboard,
    /// Show configuration and store status
    Status,
    /// Register a user without going through the web form
    AddUser {
        username: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        email: String,
        /// Password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Store an API key for a user
    SetKey {
        username: String,
        /// openai or anthropic
        provider: Provider,
        key: String,
    },
    /// List the model catalog
    Models {
        /// Only this provider's models
        #[arg(short, long)]
        provider: Option<Provider>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log in and chat in the terminal
    Chat {
        /// Username to log in as (prompted when omitted)
        #[arg(short, long)]
        user: Option<String>,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("enki=info".parse()?)
                .add_directive("enki_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(host, port).await?,
        Commands::Onboard => cmd_onboard()?,
        Commands::Status => cmd_status()?,
        Commands::AddUser {
            username,
            name,
            email,
            password,
        } => cmd_add_user(username, name, email, password)?,
        Commands::SetKey { username, provider, key } => cmd_set_key(username, provider, key)?,
        Commands::Models { provider, json } => cmd_models(provider, json)?,
        Commands::Chat { user, no_stream } => cmd_chat(user, !no_stream).await?,
    }

    Ok(())
}

// ====== Commands ======

fn open_store(cfg: &Config) -> Result<CredentialStore> {
    let store = CredentialStore::open(cfg.store_path())?;
    Ok(store)
}

fn apply_server_overrides(cfg: &mut Config, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        cfg.server.host = host;
    }
    if let Some(port) = port {
        cfg.server.port = port;
    }
}

#[cfg(feature = "http-api")]
async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    use enki_core::service::http::{serve, AppState};

    let mut cfg = config::load_config_from_env();
    apply_server_overrides(&mut cfg, host, port);

    let mut store = open_store(&cfg)?;
    // Keep the generated cookie key stable across restarts.
    if store.is_fresh() {
        store.persist()?;
        println!("{} Created credential store at {}", enki_core::LOGO, store.location().display());
    }
    let vault = Vault::from_env()?;
    if !vault.is_sealed() {
        tracing::warn!("ENKI_VAULT_MASTER_KEY not set, API keys are stored unencrypted");
    }

    let providers = ProviderRegistry::from_config(&cfg);
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let state = Arc::new(AppState::new(cfg, store, vault, providers));

    println!("{} Starting enki on http://{}", enki_core::LOGO, addr);
    serve(&addr, state).await?;
    Ok(())
}

#[cfg(not(feature = "http-api"))]
async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut cfg = config::load_config_from_env();
    apply_server_overrides(&mut cfg, host, port);
    bail!(
        "Web interface not available (wanted {}:{}). Rebuild with: cargo build --features http-api",
        cfg.server.host,
        cfg.server.port
    )
}

fn cmd_onboard() -> Result<()> {
    let config_path = config::get_config_path();
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        config::save_config(&Config::default(), None)?;
        println!("{} Created config at {}", enki_core::LOGO, config_path.display());
    }

    let cfg = config::load_config(None);
    let mut store = open_store(&cfg)?;
    if store.is_fresh() {
        store.persist()?;
        println!("{} Created credential store at {}", enki_core::LOGO, store.location().display());
    } else {
        println!("Credential store already exists at {}", store.location().display());
    }

    println!("\n{} enki is ready!", enki_core::LOGO);
    println!("\nNext steps:");
    println!("  1. Optionally set ENKI_VAULT_MASTER_KEY (64 hex chars) to encrypt API keys");
    println!("  2. Start the web interface: enki serve");
    println!("  3. Or add a user and chat here: enki add-user alice --name Alice && enki chat -u alice");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config_path = config::get_config_path();
    let cfg = config::load_config_from_env();

    println!("{} enki Status ({})\n", enki_core::LOGO, enki_core::GIT_HASH);

    println!(
        "Config: {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗" }
    );

    let store_path = cfg.store_path();
    print!("Store: {} ", store_path.display());
    match CredentialStore::open(&store_path) {
        Ok(store) if store.is_fresh() => println!("✗ (not created yet)"),
        Ok(store) => println!("✓ ({} user(s))", store.len()),
        Err(e) => println!("✗ ({})", e),
    }

    let vault = match Vault::from_env() {
        Ok(v) if v.is_sealed() => "encrypted",
        Ok(_) => "plaintext",
        Err(_) => "invalid master key",
    };
    println!("Vault: {}", vault);
    println!("Default model: {} ({})", cfg.chat.default_model, cfg.chat.default_provider);
    match cfg.chat.history.limit {
        Some(limit) => println!("History limit: {} message(s)", limit),
        None => println!("History limit: none"),
    }
    for provider in Provider::ALL {
        println!(
            "{} API base: {}",
            provider.display_name(),
            cfg.api_base(provider).unwrap_or("default")
        );
    }
    println!("Web: http://{}:{}", cfg.server.host, cfg.server.port);
    Ok(())
}

fn cmd_add_user(username: String, name: String, email: String, password: Option<String>) -> Result<()> {
    let cfg = config::load_config_from_env();
    let mut store = open_store(&cfg)?;

    let registration = match password {
        Some(password) => Registration::new(username, name, email, password),
        None => {
            let password = prompt("Password: ")?.unwrap_or_default();
            let confirm = prompt("Confirm password: ")?.unwrap_or_default();
            Registration::new(username, name, email, password).confirmed(confirm)
        }
    };

    let record = store.register(&registration, cfg.auth.min_password_length)?;
    println!(
        "{} Registered {} ({}) in {}",
        enki_core::LOGO,
        registration.username.trim(),
        record.name,
        store.location().display()
    );
    Ok(())
}

fn cmd_set_key(username: String, provider: Provider, key: String) -> Result<()> {
    let cfg = config::load_config_from_env();
    let mut store = open_store(&cfg)?;
    let vault = Vault::from_env()?;
    vault.set(&mut store, &username, provider, key.trim())?;
    println!("Saved {} key {} for {}", provider.display_name(), mask_secret(key.trim()), username);
    Ok(())
}

fn cmd_models(provider: Option<Provider>, json: bool) -> Result<()> {
    let catalog = ModelCatalog::builtin();
    let entries = match provider {
        Some(p) => catalog.flatten_for(p),
        None => catalog.flatten(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        println!("{}", entry);
    }
    Ok(())
}

// ====== Interactive chat ======

/// Read one line from stdin. `None` on end of input.
fn prompt(label: &str) -> Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim_end_matches(['\r', '\n']).to_string()))
}

/// Feed one event to the gate, printing recoverable errors.
fn apply(gate: &mut SessionGate, store: &mut CredentialStore, event: GateEvent) -> Result<Option<Transition>> {
    match gate.handle(event, store) {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.is_recoverable() => {
            eprintln!("{}", e.user_message());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

struct ChatContext {
    store: CredentialStore,
    vault: Vault,
    providers: ProviderRegistry,
    catalog: Arc<ModelCatalog>,
    stream: bool,
}

async fn cmd_chat(user: Option<String>, stream: bool) -> Result<()> {
    let cfg = config::load_config_from_env();
    let catalog = Arc::new(ModelCatalog::builtin());
    let mut gate = SessionGate::new(&cfg, catalog.clone());
    let mut ctx = ChatContext {
        store: open_store(&cfg)?,
        vault: Vault::from_env()?,
        providers: ProviderRegistry::from_config(&cfg),
        catalog,
        stream,
    };

    println!("{} enki chat (/help for commands, /quit to exit)\n", enki_core::LOGO);
    let mut preset_user = user;

    loop {
        let keep_going = match gate.phase() {
            Phase::Anonymous | Phase::Rejected => login_step(&mut gate, &mut ctx, preset_user.take())?,
            Phase::Registering => register_step(&mut gate, &mut ctx)?,
            Phase::Authenticated => chat_step(&mut gate, &mut ctx).await?,
        };
        if !keep_going {
            break;
        }
    }
    Ok(())
}

fn login_step(gate: &mut SessionGate, ctx: &mut ChatContext, preset: Option<String>) -> Result<bool> {
    if gate.phase() == Phase::Rejected {
        eprintln!("Username or password is incorrect");
        apply(gate, &mut ctx.store, GateEvent::InputChanged)?;
    }

    let username = match preset {
        Some(u) => u,
        None => {
            let Some(u) = prompt("Username (or 'register'): ")? else {
                return Ok(false);
            };
            u
        }
    };
    match username.trim() {
        "/quit" | "quit" => return Ok(false),
        "register" | "/register" => {
            apply(gate, &mut ctx.store, GateEvent::ClickRegister)?;
            return Ok(true);
        }
        _ => {}
    }

    let Some(password) = prompt("Password: ")? else {
        return Ok(false);
    };
    if let Err(e) = ctx.store.reload() {
        tracing::warn!("Could not reload credential store: {}", e);
    }
    if let Some(Transition::LoggedIn) = apply(gate, &mut ctx.store, GateEvent::login(username, password))? {
        let chat = gate.chat();
        println!(
            "\nWelcome, {}! Using {} {}\n",
            gate.display_name().unwrap_or_default(),
            chat.map(|c| c.provider().display_name()).unwrap_or_default(),
            chat.and_then(|c| c.model()).map(|m| m.id.as_str()).unwrap_or("(no model)"),
        );
    }
    Ok(true)
}

fn register_step(gate: &mut SessionGate, ctx: &mut ChatContext) -> Result<bool> {
    println!("Register a new account (leave username empty to go back)");
    let Some(username) = prompt("Username: ")? else {
        return Ok(false);
    };
    if username.trim().is_empty() {
        apply(gate, &mut ctx.store, GateEvent::ClickBack)?;
        return Ok(true);
    }
    let name = prompt("Name: ")?.unwrap_or_default();
    let email = prompt("Email: ")?.unwrap_or_default();
    let password = prompt("Password: ")?.unwrap_or_default();
    let confirm = prompt("Confirm password: ")?.unwrap_or_default();

    let registration = Registration::new(username, name, email, password).confirmed(confirm);
    match apply(gate, &mut ctx.store, GateEvent::SubmitRegistration(registration))? {
        Some(Transition::Registered { auto_login: true }) => println!("Account created, you are logged in.\n"),
        Some(Transition::Registered { auto_login: false }) => println!("Account created. Please log in.\n"),
        _ => {}
    }
    Ok(true)
}

async fn chat_step(gate: &mut SessionGate, ctx: &mut ChatContext) -> Result<bool> {
    let Some(line) = prompt("You: ")? else {
        return Ok(false);
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(true);
    }
    if let Some(command) = line.strip_prefix('/') {
        return slash_command(gate, ctx, command);
    }
    send_message(gate, ctx, line).await?;
    Ok(true)
}

fn slash_command(gate: &mut SessionGate, ctx: &mut ChatContext, command: &str) -> Result<bool> {
    let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
    let arg = arg.trim();
    let username = gate.username().unwrap_or_default().to_string();

    match name {
        "quit" | "exit" => return Ok(false),
        "help" => {
            println!("  /provider <openai|anthropic>  switch provider");
            println!("  /model [number|id]            list or choose a model");
            println!("  /key <secret>                 store the API key for the current provider");
            println!("  /clear                        clear the conversation");
            println!("  /logout                       log out");
            println!("  /quit                         exit");
        }
        "logout" => {
            apply(gate, &mut ctx.store, GateEvent::Logout)?;
            println!("Logged out.\n");
        }
        "clear" => {
            if let Some(chat) = gate.chat_mut() {
                chat.clear();
            }
            println!("Conversation cleared.");
        }
        "provider" => match arg.parse::<Provider>() {
            Ok(provider) => {
                if let Some(chat) = gate.chat_mut() {
                    chat.select_provider(provider, &ctx.catalog);
                    println!(
                        "Provider: {} ({})",
                        provider.display_name(),
                        chat.model().map(|m| m.id.as_str()).unwrap_or("no model")
                    );
                }
            }
            Err(e) => eprintln!("{}", e),
        },
        "model" => {
            let Some(chat) = gate.chat_mut() else {
                return Ok(true);
            };
            let entries = ctx.catalog.flatten_for(chat.provider());
            if arg.is_empty() {
                let current = chat.model().map(|m| m.id.clone());
                for (i, entry) in entries.iter().enumerate() {
                    let marker = match entry {
                        CatalogEntry::Model(id) if Some(id) == current.as_ref() => "*",
                        _ => " ",
                    };
                    println!("{:>3}{} {}", i, marker, entry);
                }
                return Ok(true);
            }
            let result = match arg.parse::<usize>() {
                Ok(index) => match entries.get(index) {
                    Some(entry) => chat.select_model(&ctx.catalog, entry).map(|m| m.id.clone()),
                    None => Err(ChatError::UnknownModel(format!("#{index}"))),
                },
                Err(_) => chat.select_model_id(&ctx.catalog, arg).map(|m| m.id.clone()),
            };
            match result {
                Ok(id) => println!("Model: {}", id),
                Err(ChatError::CategorySelected(_)) => eprintln!("{}", CATEGORY_WARNING),
                Err(e) => eprintln!("{}", e.user_message()),
            }
        }
        "key" => {
            let Some(chat) = gate.chat() else {
                return Ok(true);
            };
            if arg.is_empty() {
                eprintln!("Usage: /key <secret>");
                return Ok(true);
            }
            let provider = chat.provider();
            match ctx.vault.set(&mut ctx.store, &username, provider, arg) {
                Ok(()) => println!("Saved {} key {}", provider.display_name(), mask_secret(arg)),
                Err(e) => eprintln!("{}", e.user_message()),
            }
        }
        other => eprintln!("Unknown command: /{} (try /help)", other),
    }
    Ok(true)
}

async fn send_message(gate: &mut SessionGate, ctx: &mut ChatContext, text: &str) -> Result<()> {
    let Some(username) = gate.username().map(str::to_string) else {
        bail!("not logged in");
    };
    let Some(chat) = gate.chat_mut() else {
        bail!("not logged in");
    };

    let kind = chat.provider();
    let api_key = match ctx.vault.get(&ctx.store, &username, kind) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("{}", EnkiError::from(e).user_message());
            return Ok(());
        }
    };
    let Some(provider) = ctx.providers.get(kind) else {
        eprintln!("{} is not available", kind.display_name());
        return Ok(());
    };
    let request = match chat.submit(text, None, &api_key) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Ok(());
        }
    };
    let timeout = chat.settings().request_timeout;

    if !ctx.stream {
        match tokio::time::timeout(timeout, provider.chat(&request)).await {
            Ok(Ok(response)) => {
                println!("\n{}\n", response.content);
                chat.commit_reply(response.content);
            }
            Ok(Err(e)) => eprintln!("{}", EnkiError::from(e).user_message()),
            Err(_) => eprintln!("The provider did not respond within {}s.", timeout.as_secs()),
        }
        return Ok(());
    }

    println!();
    let mut reply = send_to_provider(&mut *chat, provider, request, timeout);
    loop {
        tokio::select! {
            item = reply.next() => match item {
                Some(Ok(text)) => {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                }
                Some(Err(e)) => {
                    eprintln!("\n{}", e.user_message());
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[cancelled]");
                break;
            }
        }
    }
    println!("\n");
    Ok(())
}
