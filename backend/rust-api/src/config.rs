use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Optional: without Redis the leaderboard cache degrades to straight
    /// store reads.
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub generation: GenerationConfig,
}

/// Question generation settings. Provider selection is explicit
/// configuration handed to the generation service at construction time,
/// never read from ambient globals per call.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// "auto" walks the provider chain in priority order; a concrete
    /// provider name is tried first, with the rest of the chain as fallback.
    pub provider: String,
    pub request_timeout: Duration,
    pub ollama_url: String,
    pub ollama_model: String,
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            provider: "auto".to_string(),
            request_timeout: Duration::from_secs(30),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3".to_string(),
            groq_api_key: None,
            groq_model: "llama3-70b-8192".to_string(),
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "quizai".to_string(),
            redis_uri: None,
            jwt_secret: "dev-secret-only-for-local-testing".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        // Extract values with fallbacks to ENV or defaults
        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "quizai".to_string());

        // A missing Redis URI is a supported cache-less deployment, not an
        // error.
        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|v| !v.is_empty());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: JWT_SECRET must be set in production!");
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            });

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let generation = Self::load_generation(&settings);

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            bind_addr,
            generation,
        })
    }

    fn load_generation(settings: &config::Config) -> GenerationConfig {
        let defaults = GenerationConfig::default();

        let string_or = |key: &str, env_key: &str, fallback: String| {
            settings
                .get_string(key)
                .or_else(|_| env::var(env_key))
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
        };
        let optional = |key: &str, env_key: &str| {
            settings
                .get_string(key)
                .or_else(|_| env::var(env_key))
                .ok()
                .filter(|v| !v.is_empty())
        };

        let provider = string_or("generation.provider", "LLM_PROVIDER", defaults.provider)
            .to_lowercase();

        let request_timeout = settings
            .get_int("generation.request_timeout_seconds")
            .ok()
            .map(|v| v as u64)
            .or_else(|| {
                env::var("GENERATION_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        GenerationConfig {
            provider,
            request_timeout,
            ollama_url: string_or("generation.ollama_url", "OLLAMA_URL", defaults.ollama_url),
            ollama_model: string_or(
                "generation.ollama_model",
                "OLLAMA_MODEL",
                defaults.ollama_model,
            ),
            groq_api_key: optional("generation.groq_api_key", "GROQ_API_KEY"),
            groq_model: string_or("generation.groq_model", "GROQ_MODEL", defaults.groq_model),
            gemini_api_key: optional("generation.gemini_api_key", "GEMINI_API_KEY"),
            gemini_model: string_or(
                "generation.gemini_model",
                "GEMINI_MODEL",
                defaults.gemini_model,
            ),
            openai_api_key: optional("generation.openai_api_key", "OPENAI_API_KEY"),
            openai_model: string_or(
                "generation.openai_model",
                "OPENAI_MODEL",
                defaults.openai_model,
            ),
        }
    }
}
