use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use opsdash::resources::{self, NewTicket, Resource};
use opsdash::{Config, OpsApi};

#[derive(Parser, Debug)]
#[command(name = "opsdash")]
#[command(about = "Command-line client for the operations dashboard backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./opsdash.yaml, then $XDG_CONFIG_HOME/opsdash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List a resource (name, alias or prefix, e.g. "tix")
  List {
    resource: String,
    /// Fetch one page instead of the full list
    #[arg(long)]
    page: Option<u32>,
  },
  /// Show one item of a resource
  Show { resource: String, id: String },
  /// Open a support ticket
  CreateTicket {
    subject: String,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    body: Option<String>,
  },
  /// Delete a support ticket
  DeleteTicket { id: String },
  /// Move an alliance or corporation to a new position
  Reorder {
    resource: String,
    id: u64,
    position: usize,
  },
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Drop every cached result, including the on-disk copy
  Clear,
}

fn resolve(name: &str) -> Result<Resource> {
  resources::lookup(name).ok_or_else(|| {
    let hints: Vec<&str> = resources::get_suggestions(name)
      .iter()
      .map(|r| r.name)
      .collect();
    if hints.is_empty() {
      eyre!("Unknown resource '{}'", name)
    } else {
      eyre!("Unknown resource '{}', did you mean: {}", name, hints.join(", "))
    }
  })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn run(api: &OpsApi, command: Command) -> Result<()> {
  match command {
    Command::List { resource, page } => {
      let resource = resolve(&resource)?;
      let items: Vec<Value> = match page {
        Some(page) => api.page(resource, page).await?,
        None => api.list(resource).await?,
      };
      print_json(&items)
    }
    Command::Show { resource, id } => {
      let item: Value = api.detail(resolve(&resource)?, &id).await?;
      print_json(&item)
    }
    Command::CreateTicket {
      subject,
      priority,
      body,
    } => {
      let ticket = api
        .create_ticket(NewTicket {
          subject,
          priority,
          body,
        })
        .await?;
      print_json(&ticket)
    }
    Command::DeleteTicket { id } => {
      let response = api.delete_ticket(&id).await?;
      print_json(&response)
    }
    Command::Reorder {
      resource,
      id,
      position,
    } => match resolve(&resource)? {
      Resource::Alliances => print_json(&api.move_alliance(id, position).await?),
      Resource::Corporations => print_json(&api.move_corporation(id, position).await?),
      other => Err(eyre!("{} cannot be reordered", other.namespace())),
    },
    Command::Cache {
      action: CacheAction::Clear,
    } => {
      api.cache().clear();
      println!("cache cleared");
      Ok(())
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = opsdash::logging::init(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let api = OpsApi::from_config(&config)?;

  let result = run(&api, args.command).await;
  api.cache().dispose();
  result
}
