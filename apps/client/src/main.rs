use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gtm_client::auth::UserInfo;
use gtm_client::config::Config;
use gtm_client::models::EntityKind;
use gtm_client::page::{EntityPage, EntityPageConfig};
use gtm_client::state::ClientState;

/// Operator CLI for the GTM entity sync core.
#[derive(Parser)]
#[command(name = "gtm-client", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an entity with AI and optionally save it
    Generate {
        kind: EntityKind,
        /// Generation request as JSON, e.g. '{"website_url": "https://acme.dev"}'
        #[arg(long)]
        input: String,
        /// Parent id (company for accounts, account for personas)
        #[arg(long)]
        parent: Option<String>,
        /// Save the result (remote when signed in, local draft otherwise)
        #[arg(long)]
        save: bool,
    },
    /// List local drafts of a kind
    Drafts { kind: EntityKind },
    /// Show one entity by id or draft temp id
    Show {
        kind: EntityKind,
        id: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// List entities of a kind
    List {
        kind: EntityKind,
        #[arg(long)]
        parent: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting gtm-client v{}", env!("CARGO_PKG_VERSION"));

    let (state, mut controller) =
        ClientState::from_config(config.clone()).context("failed to initialize client state")?;

    let user = config
        .user_id
        .clone()
        .or_else(|| config.api_token.as_ref().map(|_| "cli".to_string()))
        .map(UserInfo::new);
    let auth = controller.refresh(user).await;
    info!("Auth status: {:?}", auth.status);

    match cli.command {
        Command::Generate {
            kind,
            input,
            parent,
            save,
        } => {
            let input: Value =
                serde_json::from_str(&input).context("--input must be valid JSON")?;
            let mut page = EntityPage::new(page_config(kind, parent), None, state);
            page.generate_entity(&input).await?;
            let entity = if save {
                page.save().await?
            } else {
                page.display_entity()
                    .await
                    .context("generation produced no entity")?
                    .into_entity()
            };
            print_json(&entity)?;
        }
        Command::Drafts { kind } => {
            let drafts = state.drafts.get_drafts(kind).await;
            print_json(&drafts)?;
        }
        Command::Show { kind, id, parent } => {
            let mut page = EntityPage::new(page_config(kind, parent), Some(&id), state);
            let entity = page
                .load()
                .await?
                .with_context(|| format!("{kind} {id} not found"))?;
            print_json(&entity.into_entity())?;
        }
        Command::List { kind, parent } => {
            let page = EntityPage::new(page_config(kind, parent), None, state);
            print_json(&page.load_list().await?)?;
        }
    }

    Ok(())
}

fn page_config(kind: EntityKind, parent: Option<String>) -> EntityPageConfig {
    EntityPageConfig {
        kind,
        parent_id: parent,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
