use tracing_subscriber::fmt::init;

use quizai_api::{
    config::Config,
    models::Achievement,
    storage::{self, AchievementStore, MongoAchievementStore},
};

/// Seeds or refreshes the standard badge catalog. The server does the same
/// at startup; this exists for migrations and fresh environments.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().expect("Failed to load configuration");

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to MongoDB");
    let mongo = mongo_client.database(&config.mongo_database);

    storage::ensure_indexes(&mongo).await?;

    let achievements = MongoAchievementStore::new(&mongo);
    let catalog = Achievement::standard_catalog();
    let count = catalog.len();

    for achievement in catalog {
        achievements.upsert_by_title(&achievement).await?;
        tracing::info!("Seeded achievement: {}", achievement.title);
    }

    tracing::info!("Achievement catalog seeded: {} badges", count);
    Ok(())
}
