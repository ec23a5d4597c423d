//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments, wires the services together
//! and executes the selected command.

pub mod chat;
pub mod settings;

#[cfg(test)]
mod tests;

use std::error::Error;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::chat::run_chat;
use crate::cli::settings::{SetContext, SettingError, SettingRegistry};
use crate::core::config::{Config, ConfigStore, RemoteServerConfig, RemoteServerList};
use crate::core::credentials::CredentialStore;
use crate::core::orchestrator::Orchestrator;
use crate::llm::{LlmService, ProviderRegistry, MODELS};
use crate::mcp::local::LocalServices;
use crate::mcp::manager::{ConnectionError, DefaultConnector, Endpoint};
use crate::mcp::{McpConnectionManager, PermissionGate};

#[derive(Parser)]
#[command(name = "mcp-assistant")]
#[command(about = "A personal assistant that lets LLMs call MCP tools")]
#[command(
    long_about = "mcp-assistant chats with Claude, OpenAI or Gemini models and lets them call tools \
served over the Model Context Protocol: a built-in local server (contacts, phone, notifications, \
memory) plus any remote SSE servers you add.\n\n\
Authentication:\n\
  Use 'mcp-assistant auth <provider>' to store an API key in your system keyring.\n\n\
Environment Variables (fallback if no key is stored):\n\
  ANTHROPIC_API_KEY, OPENAI_API_KEY, GEMINI_API_KEY\n\
  RUST_LOG          Log filter (default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Write logs to the specified file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Use an alternative config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Manage remote MCP servers
    Servers {
        #[command(subcommand)]
        command: ServerCommand,
    },
    /// Connect every server and list the tools it offers
    Tools,
    /// List available models
    Models,
    /// Set configuration values, or show them all when no key is given
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set for the key (can be multiple words)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Option<Vec<String>>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Store an API key for a provider (read from stdin)
    Auth {
        /// claude, openai or gemini
        provider: String,
    },
    /// Remove the stored API key for a provider
    Deauth {
        /// claude, openai or gemini
        provider: String,
    },
}

#[derive(Subcommand)]
pub enum ServerCommand {
    /// List all connections
    List,
    /// Add a remote server
    Add {
        name: String,
        url: String,
        /// Static request header, e.g. --header "Authorization: Bearer TOKEN"
        #[arg(long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,
    },
    /// Change a remote server
    Edit {
        name: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        rename: Option<String>,
        /// Header to add or replace
        #[arg(long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,
        /// Drop all existing headers first
        #[arg(long)]
        clear_headers: bool,
    },
    /// Remove a remote server
    Remove { name: String },
    /// Print the remote server list as JSON
    Export,
    /// Import a JSON remote server list from a file, or stdin when omitted
    Import { path: Option<PathBuf> },
}

/// The long-lived services behind every command.
pub struct Services {
    pub config: Arc<ConfigStore>,
    pub gate: Arc<PermissionGate>,
    pub manager: Arc<McpConnectionManager>,
    pub providers: Arc<ProviderRegistry>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Services {
    pub fn new(config: Arc<ConfigStore>, credentials: Arc<CredentialStore>) -> Self {
        let http = reqwest::Client::new();
        let gate = Arc::new(PermissionGate::new());
        let connector = Arc::new(DefaultConnector::new(
            http.clone(),
            LocalServices::in_memory(),
            gate.clone(),
        ));
        let manager = Arc::new(McpConnectionManager::new(config.clone(), connector));
        let providers = Arc::new(ProviderRegistry::new(http, credentials));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            providers.clone(),
            manager.clone(),
        ));

        Self {
            config,
            gate,
            manager,
            providers,
            orchestrator,
        }
    }
}

/// Parses `Name: value` into a trimmed header pair.
pub fn parse_header(raw: &str) -> Result<(String, String), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("Invalid header '{raw}'. Expected 'Name: value'."));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Invalid header '{raw}'. Header name is empty."));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn apply_headers(
    mut remote: RemoteServerConfig,
    headers: &[String],
) -> Result<RemoteServerConfig, String> {
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        remote = remote.with_header(name, value);
    }
    Ok(remote)
}

/// Applies `mcp-assistant set`. With no key, returns every current value.
pub fn handle_set(
    store: &ConfigStore,
    key: Option<&str>,
    value: &[String],
) -> Result<String, SettingError> {
    let registry = SettingRegistry::new();
    let Some(key) = key else {
        let config = store
            .load()
            .map_err(|e| SettingError::Save(e.to_string()))?;
        return Ok(format_all(&registry, &config));
    };
    let handler = registry
        .get(key)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?;
    handler.set(value, &SetContext { store })
}

pub fn handle_unset(store: &ConfigStore, key: &str) -> Result<String, SettingError> {
    let registry = SettingRegistry::new();
    let handler = registry
        .get(key)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?;
    handler.unset(&SetContext { store })
}

fn format_all(registry: &SettingRegistry, config: &Config) -> String {
    let mut output = String::from("Current configuration:");
    for handler in registry.handlers() {
        output.push('\n');
        output.push_str(&handler.format(config));
    }
    output
}

pub fn format_model_list(selected: Option<&str>) -> String {
    let current = crate::llm::resolve_model(selected);
    let mut output = String::from("Available models:");
    for model in MODELS {
        let marker = if model.id == current.id { "*" } else { " " };
        output.push_str(&format!(
            "\n  {marker} {:<28} {} ({})",
            model.id,
            model.name,
            model.service.display_name()
        ));
    }
    output
}

fn print_servers(manager: &McpConnectionManager) {
    println!("MCP servers:");
    for connection in manager.connections().iter() {
        match connection.url() {
            Some(url) => println!("  {}  {url}", connection.name),
            None => println!("  {}  (built-in)", connection.name),
        }
        if let Some(remote) = manager_remote(manager, &connection.name) {
            for name in remote.headers.keys() {
                println!("      header: {name}");
            }
        }
    }
}

fn manager_remote(manager: &McpConnectionManager, name: &str) -> Option<RemoteServerConfig> {
    let connection = manager.connection(name)?;
    match connection.endpoint {
        Endpoint::Remote { url, headers } => Some(RemoteServerConfig {
            connection_name: connection.name,
            url,
            headers,
        }),
        Endpoint::Local => None,
    }
}

/// Adds each imported server, replacing any remote with the same name.
async fn import_servers(
    manager: &McpConnectionManager,
    list: RemoteServerList,
) -> Result<usize, ConnectionError> {
    let mut imported = 0;
    for remote in list.into_configs() {
        let name = remote.connection_name.clone();
        if manager_remote(manager, &name).is_some() {
            manager.edit_remote(&name, remote).await?;
        } else {
            manager.add_remote(remote).await?;
        }
        imported += 1;
    }
    Ok(imported)
}

async fn run_servers(command: ServerCommand, services: &Services) -> Result<(), Box<dyn Error>> {
    let manager = &services.manager;
    match command {
        ServerCommand::List => print_servers(manager),
        ServerCommand::Add { name, url, headers } => {
            let remote = apply_headers(RemoteServerConfig::new(name.clone(), url), &headers)?;
            manager.add_remote(remote).await?;
            println!("✅ Added server: {name}");
        }
        ServerCommand::Edit {
            name,
            url,
            rename,
            headers,
            clear_headers,
        } => {
            let Some(mut remote) = manager_remote(manager, &name) else {
                return Err(ConnectionError::Unknown(name).into());
            };
            if let Some(url) = url {
                remote.url = url;
            }
            if let Some(rename) = rename {
                remote.connection_name = rename;
            }
            if clear_headers {
                remote.headers.clear();
            }
            let remote = apply_headers(remote, &headers)?;
            let updated = remote.connection_name.clone();
            manager.edit_remote(&name, remote).await?;
            println!("✅ Updated server: {updated}");
        }
        ServerCommand::Remove { name } => {
            manager.remove_remote(&name).await?;
            println!("✅ Removed server: {name}");
        }
        ServerCommand::Export => {
            let config = services.config.load()?;
            println!(
                "{}",
                RemoteServerList::from_configs(&config.remote_servers).to_json()?
            );
        }
        ServerCommand::Import { path } => {
            let raw = match path {
                Some(path) => std::fs::read_to_string(path)?,
                None => {
                    let mut raw = String::new();
                    io::stdin().read_to_string(&mut raw)?;
                    raw
                }
            };
            let list = RemoteServerList::from_json(&raw)?;
            let imported = import_servers(manager, list).await?;
            println!("✅ Imported {imported} server(s)");
        }
    }
    Ok(())
}

async fn list_tools(services: &Services) {
    let names: Vec<String> = services
        .manager
        .connections()
        .iter()
        .map(|connection| connection.name.clone())
        .collect();

    for name in names {
        if !services.manager.connect(&name).await {
            let reason = services
                .manager
                .connection(&name)
                .and_then(|connection| connection.last_error)
                .unwrap_or_else(|| "unknown error".to_string());
            println!("{name}: not connected ({reason})");
            continue;
        }
        let Some(connection) = services.manager.connection(&name) else {
            continue;
        };
        println!("{name}:");
        for tool in connection.tools() {
            match &tool.description {
                Some(description) => println!("  {}  {description}", tool.name),
                None => println!("  {}", tool.name),
            }
        }
    }
    services.manager.shutdown().await;
}

fn read_secret(service: LlmService) -> Result<String, Box<dyn Error>> {
    eprint!("Enter API key for {}: ", service.display_name());
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let key = line.trim().to_string();
    if key.is_empty() {
        return Err("No API key entered".into());
    }
    Ok(key)
}

fn open_config(path: Option<&Path>) -> Result<Arc<ConfigStore>, Box<dyn Error>> {
    let store = match path {
        Some(path) => ConfigStore::new(path.to_path_buf()),
        None => ConfigStore::open_default()?,
    };
    Ok(Arc::new(store))
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    crate::logging::init(args.log.as_deref())?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config = open_config(args.config.as_deref())?;

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let services = Services::new(config, Arc::new(CredentialStore::new()));
            run_chat(services).await
        }
        Commands::Servers { command } => {
            let services = Services::new(config, Arc::new(CredentialStore::new()));
            if let Err(e) = run_servers(command, &services).await {
                eprintln!("❌ {e}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Tools => {
            let services = Services::new(config, Arc::new(CredentialStore::new()));
            list_tools(&services).await;
            Ok(())
        }
        Commands::Models => {
            let selected = config.load()?.selected_model;
            println!("{}", format_model_list(selected.as_deref()));
            Ok(())
        }
        Commands::Set { key, value } => {
            match handle_set(&config, key.as_deref(), &value.unwrap_or_default()) {
                Ok(message) => println!("{message}"),
                Err(e) => {
                    e.print();
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Commands::Unset { key } => {
            match handle_unset(&config, &key) {
                Ok(message) => println!("{message}"),
                Err(e) => {
                    e.print();
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Commands::Auth { provider } => {
            let service: LlmService = provider.parse()?;
            let key = read_secret(service)?;
            CredentialStore::new().set(service.id(), &key)?;
            println!("✅ Stored API key for {}", service.display_name());
            Ok(())
        }
        Commands::Deauth { provider } => {
            let service: LlmService = provider.parse()?;
            if CredentialStore::new().remove(service.id())? {
                println!("✅ Removed API key for {}", service.display_name());
            } else {
                println!("No stored API key for {}", service.display_name());
            }
            Ok(())
        }
    }
}
