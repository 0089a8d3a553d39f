use league_sync::{cli, EntityKind};

/// Update player statistics from the external source
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    cli::run_script(EntityKind::PlayerStats).await
}
