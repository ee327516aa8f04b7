use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_stream::StreamExt;

use inventory_sync::auth::SessionIdentity;
use inventory_sync::config::Config;
use inventory_sync::db::ItemStore;
use inventory_sync::http_client::HttpItemApi;
use inventory_sync::models::{Item, OperationResult};
use inventory_sync::services::{
    ActionStatus, FeedStream, ItemActions, ItemFeed, ItemSyncRepository,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: inventory-sync <refresh | list | search <query> | add <name> [quantity] [description] | remove <id> | clear>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inventory_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        bail!(USAGE);
    };

    // Load configuration
    let config = Config::from_env().context("ITEMS_API_BASE_URL must be set")?;

    tracing::debug!("Opening item cache at {}", config.database_url);
    let store = ItemStore::open(&config.database_url).await?;
    let api = HttpItemApi::new(&config.api_base_url, config.http_timeout())?;

    let identity = SessionIdentity::new();
    if let (Some(user_id), Some(token)) = (&config.user_id, &config.token) {
        identity.sign_in(user_id.clone(), token.clone());
    } else {
        tracing::warn!("ITEMS_USER_ID or ITEMS_TOKEN not set, running signed out");
    }

    let identity = Arc::new(identity);
    let repo = Arc::new(ItemSyncRepository::new(
        store.clone(),
        Arc::new(api),
        identity.clone(),
    ));
    let feed = ItemFeed::new(store, identity);
    let actions = ItemActions::new(repo);

    match command {
        "refresh" => {
            let outcome = actions.refresh().await;
            println!("{:?}", outcome);
        }
        "list" => print_items(first(feed.items()).await),
        "search" => {
            let query = args.get(1).map(String::as_str).unwrap_or_default();
            print_items(first(feed.search(query)).await);
        }
        "add" => {
            let Some(name) = args.get(1) else {
                bail!(USAGE);
            };
            let quantity = match args.get(2) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid quantity: {}", raw))?,
                None => 0,
            };
            let description = args.get(3).cloned();
            actions.create(name, description, quantity).await;
            report(&actions)?;
        }
        "remove" => {
            let raw = args.get(1).context(USAGE)?;
            let id: i64 = raw.parse().with_context(|| format!("invalid id: {}", raw))?;
            let Some(item) = first(feed.item(id)).await else {
                bail!("item {} is not in the local cache", id);
            };
            actions.delete(&item).await;
            report(&actions)?;
        }
        "clear" => {
            actions.clear_all().await;
            report(&actions)?;
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}

async fn first<T: Default + Clone + Send + Sync + 'static>(mut stream: FeedStream<T>) -> T {
    stream.next().await.unwrap_or_default()
}

fn print_items(items: Vec<Item>) {
    for item in items {
        println!(
            "{}\t{}\t{}\t{}",
            item.id,
            item.name,
            item.quantity,
            item.description.unwrap_or_default()
        );
    }
}

fn report(actions: &ItemActions) -> anyhow::Result<()> {
    let status = actions.status();
    let status = status.borrow();
    match status.as_ref() {
        Some(ActionStatus::Create(OperationResult::Success(item))) => {
            println!("created {} ({})", item.id, item.name)
        }
        Some(ActionStatus::Delete(OperationResult::Success(id))) => println!("removed {}", id),
        Some(ActionStatus::ClearAll(OperationResult::Success(count))) => {
            println!("cleared {} cached items", count)
        }
        Some(other) => {
            if let Some(e) = other.error() {
                bail!("{}", e);
            }
        }
        None => {}
    }
    Ok(())
}
