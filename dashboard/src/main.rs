//! Live poll dashboard demo - wires the engine to the in-memory service

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use poll_core::{MemoryPollService, NewPoll, PollApi, PushChannel, VoteFilter};
use poll_dashboard::config::DashboardConfig;
use poll_dashboard::error::{DashboardError, Result};
use poll_dashboard::merger::UpdateMerger;
use poll_dashboard::view;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting live poll dashboard demo");

    let config_path =
        std::env::var("DASHBOARD_CONFIG").unwrap_or_else(|_| "dashboard.toml".to_string());
    let config = DashboardConfig::load(Path::new(&config_path)).map_err(DashboardError::Internal)?;

    // In-memory backend standing in for the real transport; an admin
    // seeds the polls the local user will see
    let service = MemoryPollService::new();
    let admin = service.for_user("admin");
    let dining = admin
        .create_poll(NewPoll {
            question: "Favorite dining court?".to_string(),
            options: vec!["North".to_string(), "South".to_string(), "East".to_string()],
        })
        .await?;
    let lunch = admin
        .create_poll(NewPoll {
            question: "Best lunch option?".to_string(),
            options: vec!["Pizza".to_string(), "Tacos".to_string()],
        })
        .await?;

    let api: Arc<dyn PollApi> = Arc::new(service.clone());
    let channel: Arc<dyn PushChannel> = Arc::new(service.clone());
    let merger = Arc::new(UpdateMerger::new(api, channel, config));

    let pump = merger.clone().spawn_push_pump();
    merger.load_polls().await?;

    // The local user votes; the confirmed snapshot lands in the store
    let choice = dining.options[0].id;
    let confirmed = merger.submit_vote(dining.id, choice).await?;
    info!("Local vote confirmed, {} now at {} votes", dining.id, confirmed.total_votes);

    // Someone else votes; the update reaches us through the push channel
    let bob = service.for_user("bob");
    bob.submit_vote(lunch.id, lunch.options[1].id).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let projection = view::project(merger.store(), merger.ledger(), VoteFilter::All);
    let rendered = serde_json::to_string_pretty(&projection)
        .map_err(|e| DashboardError::Internal(e.to_string()))?;
    println!("{}", rendered);

    merger.end_session().await;
    pump.abort();

    Ok(())
}
