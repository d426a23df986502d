use std::env;

/// Match scorer weights. The linear combination is clamped to [0, 1] after
/// summing, so the weights need not sum to exactly 1.
#[derive(Debug, Clone, Copy)]
pub struct MatchWeights {
    pub cos_sim: f64,
    pub freshness: f64,
    pub priority: f64,
    pub must: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            cos_sim: 0.55,
            freshness: 0.15,
            priority: 0.15,
            must: 0.15,
        }
    }
}

/// Decision bucket thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// score >= immediate → IMMEDIATE
    pub immediate: f64,
    /// boundary_low <= score < immediate → BOUNDARY
    pub boundary_low: f64,
    /// batch <= score < boundary_low → BATCH; below → IGNORE
    pub batch: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            immediate: 0.93,
            boundary_low: 0.88,
            batch: 0.75,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // OpenAI-compatible provider (embeddings + judge LLM)
    pub ai_api_key: String,
    pub ai_base_url: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub judge_model: String,

    // SMTP (empty host → Noop backend)
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub email_from: String,

    /// Base URL for click-redirector links in rendered emails.
    pub public_base_url: String,

    // Scheduler / ingest
    pub sources_per_sweep: usize,
    pub items_per_fetch: usize,
    pub empty_streak_threshold: u32,
    pub empty_cooldown_factor: u32,

    // Embedding worker
    pub embed_batch_size: usize,

    // Match & decision
    pub weights: MatchWeights,
    pub thresholds: Thresholds,
    pub judge_enabled: bool,

    // Budget
    pub daily_budget_usd: f64,
    pub budget_soft_factor: f64,
    pub usd_per_mtok_embedding: f64,
    pub usd_per_mtok_judge: f64,

    // Delivery
    pub digest_top_n: usize,

    // NewsNow catalog
    pub newsnow_catalog_url: String,
    pub newsnow_snapshot_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ai_api_key: String::new(),
            ai_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 1536,
            judge_model: "gpt-4o-mini".to_string(),
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            email_from: "SentryCore <noreply@sentrycore.local>".to_string(),
            public_base_url: "http://localhost:8000".to_string(),
            sources_per_sweep: 10,
            items_per_fetch: 20,
            empty_streak_threshold: 5,
            empty_cooldown_factor: 4,
            embed_batch_size: 50,
            weights: MatchWeights::default(),
            thresholds: Thresholds::default(),
            judge_enabled: true,
            daily_budget_usd: 1.0,
            budget_soft_factor: 0.8,
            usd_per_mtok_embedding: 0.02,
            usd_per_mtok_judge: 0.60,
            digest_top_n: 10,
            newsnow_catalog_url: String::new(),
            newsnow_snapshot_path: String::new(),
        }
    }
}

impl Config {
    /// Load config for the engine process.
    /// Panics with a clear message if required vars are missing.
    pub fn engine_from_env() -> Self {
        let defaults = Self::default();
        Self {
            ai_api_key: required_env("AI_API_KEY"),
            ai_base_url: env_or("AI_BASE_URL", &defaults.ai_base_url),
            embedding_model: env_or("EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_dim: env_parsed("EMBEDDING_DIM", defaults.embedding_dim),
            judge_model: env_or("JUDGE_MODEL", &defaults.judge_model),
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: env_parsed("SMTP_PORT", defaults.smtp_port),
            smtp_username: env::var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            email_from: env_or("EMAIL_FROM", &defaults.email_from),
            public_base_url: env_or("PUBLIC_BASE_URL", &defaults.public_base_url),
            sources_per_sweep: env_parsed("SOURCES_PER_SWEEP", defaults.sources_per_sweep),
            items_per_fetch: env_parsed("ITEMS_PER_FETCH", defaults.items_per_fetch),
            empty_streak_threshold: env_parsed(
                "EMPTY_STREAK_THRESHOLD",
                defaults.empty_streak_threshold,
            ),
            empty_cooldown_factor: env_parsed(
                "EMPTY_COOLDOWN_FACTOR",
                defaults.empty_cooldown_factor,
            ),
            embed_batch_size: env_parsed("EMBED_BATCH_SIZE", defaults.embed_batch_size),
            weights: MatchWeights {
                cos_sim: env_parsed("WEIGHT_COS_SIM", defaults.weights.cos_sim),
                freshness: env_parsed("WEIGHT_FRESHNESS", defaults.weights.freshness),
                priority: env_parsed("WEIGHT_PRIORITY", defaults.weights.priority),
                must: env_parsed("WEIGHT_MUST", defaults.weights.must),
            },
            thresholds: Thresholds {
                immediate: env_parsed("IMMEDIATE_THRESHOLD", defaults.thresholds.immediate),
                boundary_low: env_parsed("BOUNDARY_LOW", defaults.thresholds.boundary_low),
                batch: env_parsed("BATCH_THRESHOLD", defaults.thresholds.batch),
            },
            judge_enabled: env_parsed("JUDGE_ENABLED", defaults.judge_enabled),
            daily_budget_usd: env_parsed("DAILY_BUDGET_USD", defaults.daily_budget_usd),
            budget_soft_factor: env_parsed("BUDGET_SOFT_FACTOR", defaults.budget_soft_factor),
            usd_per_mtok_embedding: env_parsed(
                "USD_PER_MTOK_EMBEDDING",
                defaults.usd_per_mtok_embedding,
            ),
            usd_per_mtok_judge: env_parsed("USD_PER_MTOK_JUDGE", defaults.usd_per_mtok_judge),
            digest_top_n: env_parsed("DIGEST_TOP_N", defaults.digest_top_n),
            newsnow_catalog_url: env::var("NEWSNOW_CATALOG_URL").unwrap_or_default(),
            newsnow_snapshot_path: env::var("NEWSNOW_SNAPSHOT_PATH").unwrap_or_default(),
        }
    }

    /// Log the presence of each sensitive env var without leaking values.
    pub fn log_redacted(&self) {
        let vars = [
            ("AI_API_KEY", &self.ai_api_key),
            ("SMTP_HOST", &self.smtp_host),
            ("SMTP_PASSWORD", &self.smtp_password),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
