use league_sync::{cli, EntityKind};

/// Sync league teams from the external source into the store
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    cli::run_script(EntityKind::Teams).await
}
