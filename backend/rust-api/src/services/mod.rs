use std::sync::Arc;

use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::middlewares::auth::JwtService;
use crate::storage::{
    AchievementStore, AttemptStore, MemoryAchievementStore, MemoryAttemptStore,
    MemoryProfileStore, MemoryQuizStore, MongoAchievementStore, MongoAttemptStore,
    MongoProfileStore, MongoQuizStore, ProfileStore, QuizStore,
};

pub struct AppState {
    pub config: Config,
    pub profiles: Arc<dyn ProfileStore>,
    pub quizzes: Arc<dyn QuizStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub achievements: Arc<dyn AchievementStore>,
    /// Held for the health endpoint; stores own their collections.
    pub mongo: Option<Database>,
    /// Leaderboard cache. None runs the API cache-less.
    pub redis: Option<ConnectionManager>,
    pub jwt: JwtService,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: Option<redis::Client>,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        let redis = match redis_client {
            Some(client) => connect_redis(client).await,
            None => {
                tracing::info!("No Redis configured; leaderboard cache disabled");
                None
            }
        };

        let jwt = JwtService::new(&config.jwt_secret);

        Ok(Self {
            config,
            profiles: Arc::new(MongoProfileStore::new(&mongo)),
            quizzes: Arc::new(MongoQuizStore::new(&mongo)),
            attempts: Arc::new(MongoAttemptStore::new(&mongo)),
            achievements: Arc::new(MongoAchievementStore::new(&mongo)),
            mongo: Some(mongo),
            redis,
            jwt,
        })
    }

    /// State over in-memory stores: integration tests and infrastructure-free
    /// local runs.
    pub fn in_memory(config: Config) -> Self {
        let jwt = JwtService::new(&config.jwt_secret);
        Self {
            config,
            profiles: Arc::new(MemoryProfileStore::new()),
            quizzes: Arc::new(MemoryQuizStore::new()),
            attempts: Arc::new(MemoryAttemptStore::new()),
            achievements: Arc::new(MemoryAchievementStore::new()),
            mongo: None,
            redis: None,
            jwt,
        }
    }
}

/// A configured-but-unreachable Redis degrades to cache-less operation
/// instead of failing startup; the health endpoint reports it.
async fn connect_redis(client: redis::Client) -> Option<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let manager = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await;

    let redis = match manager {
        Ok(Ok(redis)) => redis,
        Ok(Err(e)) => {
            tracing::warn!("Redis connection failed, running cache-less: {}", e);
            return None;
        }
        Err(_) => {
            tracing::warn!("Redis connection timeout after 30s, running cache-less");
            return None;
        }
    };

    tracing::info!("Redis ConnectionManager created, testing with PING...");

    let mut conn = redis.clone();
    let ping = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await;

    match ping {
        Ok(Ok(_)) => {
            tracing::info!("Redis connection established successfully");
            Some(redis)
        }
        Ok(Err(e)) => {
            tracing::warn!("Redis PING failed, running cache-less: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!("Redis PING timeout after 5s, running cache-less");
            None
        }
    }
}

pub mod achievement_service;
pub mod attempt_service;
pub mod gamification_service;
pub mod generation_service;
pub mod profile_service;
pub mod quiz_service;
