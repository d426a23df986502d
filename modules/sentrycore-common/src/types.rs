//! Domain entities for the ingest → embed → match → decide → deliver pipeline.
//!
//! All entities carry `id`, `created_at`, `updated_at`, `is_deleted`;
//! timestamps are UTC. Lifecycle mutations go through methods so the
//! bookkeeping (streaks, status transitions, `updated_at`) stays in one place.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard ceiling on any scheduling delay: 4 hours.
pub const MAX_FETCH_DELAY_SECS: u32 = 14_400;

/// Default fetch interval for new sources.
pub const DEFAULT_FETCH_INTERVAL_SECS: u32 = 1_800;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Newsnow,
    Rss,
    Site,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Newsnow => write!(f, "NEWSNOW"),
            SourceType::Rss => write!(f, "RSS"),
            SourceType::Site => write!(f, "SITE"),
        }
    }
}

/// CSS selectors for scraping a SITE list page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSelectors {
    pub item: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Per-type source configuration. The variant set is closed; there is no
/// open plugin surface for new source kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceConfig {
    Newsnow { base_url: String, source_id: String },
    Rss { feed_url: String },
    Site { list_url: String, selectors: SiteSelectors },
}

impl SourceConfig {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceConfig::Newsnow { .. } => SourceType::Newsnow,
            SourceConfig::Rss { .. } => SourceType::Rss,
            SourceConfig::Site { .. } => SourceType::Site,
        }
    }
}

/// A watched information source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    /// Globally unique display name.
    pub name: String,
    pub config: SourceConfig,
    /// Owning user for private sources; None for shared catalog sources.
    pub owner_id: Option<Uuid>,
    pub is_private: bool,
    pub enabled: bool,
    pub fetch_interval_sec: u32,
    pub next_fetch_at: Option<DateTime<Utc>>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub error_streak: u32,
    pub empty_streak: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Source {
    pub fn new(name: impl Into<String>, config: SourceConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            config,
            owner_id: None,
            is_private: false,
            enabled: true,
            fetch_interval_sec: DEFAULT_FETCH_INTERVAL_SECS,
            next_fetch_at: None,
            last_fetch_at: None,
            error_streak: 0,
            empty_streak: 0,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.config.source_type()
    }

    /// Record a successful fetch that yielded `items_count` items and
    /// schedule the next one. Empty results build an empty streak; once the
    /// streak reaches `empty_streak_threshold` the interval is stretched by
    /// `cooldown_factor`, still capped at 4 h.
    pub fn mark_fetch_success(
        &mut self,
        items_count: usize,
        now: DateTime<Utc>,
        empty_streak_threshold: u32,
        cooldown_factor: u32,
    ) {
        self.last_fetch_at = Some(now);
        self.error_streak = 0;
        if items_count == 0 {
            self.empty_streak += 1;
        } else {
            self.empty_streak = 0;
        }

        let mut delay = self.fetch_interval_sec;
        if self.empty_streak >= empty_streak_threshold {
            delay = delay.saturating_mul(cooldown_factor.max(1));
        }
        self.schedule_next(now, delay.min(MAX_FETCH_DELAY_SECS));
    }

    /// Record a failed fetch and schedule the next attempt with exponential
    /// backoff: `interval * min(2^error_streak, 8)`, capped at 4 h.
    pub fn mark_fetch_error(&mut self, now: DateTime<Utc>) {
        self.last_fetch_at = Some(now);
        self.error_streak += 1;
        let multiplier = 2u32.saturating_pow(self.error_streak).min(8);
        let delay = self
            .fetch_interval_sec
            .saturating_mul(multiplier)
            .min(MAX_FETCH_DELAY_SECS);
        self.schedule_next(now, delay);
    }

    fn schedule_next(&mut self, now: DateTime<Utc>, delay_secs: u32) {
        self.next_fetch_at = Some(now + chrono::Duration::seconds(delay_secs as i64));
        self.updated_at = now;
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            self.enabled = true;
            self.updated_at = Utc::now();
        }
    }

    pub fn disable(&mut self) {
        if self.enabled {
            self.enabled = false;
            self.updated_at = Utc::now();
        }
    }

    pub fn update_config(&mut self, config: SourceConfig) {
        self.config = config;
        self.updated_at = Utc::now();
    }
}

/// Opt-in fan-out: which users a shared source's items can target.
/// Unique on (user_id, source_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_id: Uuid,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl SourceSubscription {
    pub fn new(user_id: Uuid, source_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            source_id,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Done,
    SkippedBudget,
    Failed,
}

/// A normalised posting fetched from a source.
///
/// Invariant: `embedding_status == Done` iff `embedding` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    /// sha256 hex of the canonical URL; unique across all sources.
    pub url_hash: String,
    /// 32-hex-char digest used for cross-source topic dedupe.
    pub topic_key: String,
    pub title: String,
    pub snippet: Option<String>,
    /// AI-generated summary; the only field mutable after embedding.
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_status: EmbeddingStatus,
    pub embedding_model: Option<String>,
    pub raw_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Item {
    pub fn new(
        source_id: Uuid,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id,
            url_hash: crate::url_topic::url_hash(&url),
            topic_key: crate::url_topic::build_topic_key(&url),
            url,
            title: title.into(),
            snippet: None,
            summary: None,
            published_at: None,
            ingested_at: now,
            embedding: None,
            embedding_status: EmbeddingStatus::Pending,
            embedding_model: None,
            raw_data: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    pub fn mark_embedding_done(&mut self, embedding: Vec<f32>, model: impl Into<String>) {
        self.embedding = Some(embedding);
        self.embedding_status = EmbeddingStatus::Done;
        self.embedding_model = Some(model.into());
        self.updated_at = Utc::now();
    }

    pub fn mark_embedding_failed(&mut self) {
        self.embedding_status = EmbeddingStatus::Failed;
        self.updated_at = Utc::now();
    }

    pub fn mark_embedding_skipped_budget(&mut self) {
        self.embedding_status = EmbeddingStatus::SkippedBudget;
        self.updated_at = Utc::now();
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
        self.updated_at = Utc::now();
    }

    /// Text submitted to the embedding provider and scanned for terms.
    pub fn embed_text(&self) -> String {
        match &self.snippet {
            Some(snippet) => format!("{} {}", self.title, snippet),
            None => format!("{} ", self.title),
        }
    }

    /// Effective timestamp for ordering and time-window filtering.
    pub fn item_time(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.ingested_at)
    }
}

// ---------------------------------------------------------------------------
// Goals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalStatus {
    Active,
    Paused,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityMode {
    /// MUST terms raise the score but their absence does not veto.
    Soft,
    /// A missing MUST term zeroes the score outright.
    Hard,
}

/// A user-defined interest matched against incoming items.
/// Only ACTIVE goals participate in matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: GoalStatus,
    pub priority_mode: PriorityMode,
    pub time_window_days: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Goal {
    pub fn new(user_id: Uuid, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: description.into(),
            status: GoalStatus::Active,
            priority_mode: PriorityMode::Soft,
            time_window_days: 7,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// Text embedded as the goal's descriptor vector.
    pub fn descriptor_text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TermType {
    Must,
    Priority,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalPriorityTerm {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub term: String,
    pub term_type: TermType,
}

impl GoalPriorityTerm {
    pub fn new(goal_id: Uuid, term: impl Into<String>, term_type: TermType) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id,
            term: term.into(),
            term_type,
        }
    }
}

/// Per-goal delivery schedule. Unique on goal_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalPushConfig {
    pub id: Uuid,
    pub goal_id: Uuid,
    /// "HH:MM" local-to-UTC window times, at most 3.
    pub batch_windows: Vec<String>,
    pub digest_send_time: String,
    pub immediate_enabled: bool,
    pub batch_enabled: bool,
    pub digest_enabled: bool,
}

impl GoalPushConfig {
    pub fn new(goal_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id,
            batch_windows: vec!["12:30".to_string(), "18:30".to_string()],
            digest_send_time: "09:00".to_string(),
            immediate_enabled: true,
            batch_enabled: true,
            digest_enabled: true,
        }
    }

    pub fn parsed_batch_windows(&self) -> Vec<NaiveTime> {
        self.batch_windows
            .iter()
            .filter_map(|w| NaiveTime::parse_from_str(w, "%H:%M").ok())
            .take(3)
            .collect()
    }

    pub fn parsed_digest_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.digest_send_time, "%H:%M").ok()
    }
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

/// Per-feature values backing a match score; kept for auditability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchFeatures {
    pub cos_sim: f64,
    pub must_hit: u8,
    pub priority_hit_count: u32,
    pub negative_hit: u8,
    pub freshness: f64,
    pub source_affinity: f64,
}

/// Human-readable evidence for a match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchReasons {
    pub matched_terms: Vec<String>,
    pub contributions: Vec<(String, f64)>,
    pub source_name: String,
}

/// A scored (goal, item) pair. Unique on (goal_id, item_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalItemMatch {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub item_id: Uuid,
    pub match_score: f64,
    pub features: MatchFeatures,
    pub reasons: MatchReasons,
    pub topic_key: String,
    pub item_time: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Push decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushDecision {
    Immediate,
    Batch,
    Digest,
    Ignore,
}

impl std::fmt::Display for PushDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushDecision::Immediate => write!(f, "IMMEDIATE"),
            PushDecision::Batch => write!(f, "BATCH"),
            PushDecision::Digest => write!(f, "DIGEST"),
            PushDecision::Ignore => write!(f, "IGNORE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushChannel {
    Email,
    InApp,
}

impl std::fmt::Display for PushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushChannel::Email => write!(f, "EMAIL"),
            PushChannel::InApp => write!(f, "IN_APP"),
        }
    }
}

/// Append-only decision row; only `status`/`sent_at` transition afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushDecisionRecord {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub item_id: Uuid,
    pub decision: PushDecision,
    pub status: PushStatus,
    pub channel: PushChannel,
    /// Evidence: block reasons, judge output, feature contributions.
    pub reason_json: serde_json::Value,
    pub decided_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// sha256(goal_id|topic_key|decision|coalesce_bucket); unique when set.
    pub dedupe_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PushDecisionRecord {
    pub fn new(goal_id: Uuid, item_id: Uuid, decision: PushDecision) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal_id,
            item_id,
            decision,
            status: PushStatus::Pending,
            channel: PushChannel::Email,
            reason_json: serde_json::Value::Null,
            decided_at: now,
            sent_at: None,
            dedupe_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_sent(&mut self) {
        self.status = PushStatus::Sent;
        self.sent_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self) {
        self.status = PushStatus::Failed;
        self.updated_at = Utc::now();
    }

    pub fn mark_skipped(&mut self) {
        self.status = PushStatus::Skipped;
        self.updated_at = Utc::now();
    }

    pub fn mark_read(&mut self) {
        self.status = PushStatus::Read;
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Feedback & blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackType {
    Like,
    Dislike,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFeedback {
    pub id: Uuid,
    pub item_id: Uuid,
    pub goal_id: Uuid,
    pub user_id: Uuid,
    pub feedback: FeedbackType,
    pub created_at: DateTime<Utc>,
}

/// A user's block of a source, optionally scoped to one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedSource {
    pub id: Uuid,
    pub user_id: Uuid,
    /// None blocks the source for every goal of the user.
    pub goal_id: Option<Uuid>,
    pub source_id: Uuid,
    pub blocked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Per-(user, date) spend counters. Unique on (user_id, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDaily {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub embedding_tokens_est: u64,
    pub judge_tokens_est: u64,
    pub usd_est: f64,
    pub updated_at: DateTime<Utc>,
}

impl BudgetDaily {
    pub fn new(user_id: Uuid, date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            date,
            embedding_tokens_est: 0,
            judge_tokens_est: 0,
            usd_est: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// Cutoff flags derived from a user's daily spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetFlags {
    /// Hard cutoff: no further embedding calls for the user today.
    pub embedding_disabled: bool,
    /// Soft cutoff: judge LLM calls fall back to deterministic rules.
    pub judge_disabled: bool,
}

// ---------------------------------------------------------------------------
// Ingest log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Partial,
    Failed,
}

/// One row per fetch attempt, opened at fetch start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestLog {
    pub id: Uuid,
    pub source_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: IngestStatus,
    pub items_fetched: usize,
    pub items_new: usize,
    pub items_duplicate: usize,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
}

impl IngestLog {
    pub fn start(source_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            started_at: now,
            completed_at: None,
            status: IngestStatus::Failed,
            items_fetched: 0,
            items_new: 0,
            items_duplicate: 0,
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn complete(
        &mut self,
        status: IngestStatus,
        fetched: usize,
        new: usize,
        duplicate: usize,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.items_fetched = fetched;
        self.items_new = new;
        self.items_duplicate = duplicate;
        self.error_message = error;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

/// Ceiling on outbox retry backoff: 1 hour.
pub const MAX_OUTBOX_RETRY_SECS: u32 = 3_600;

/// Maximum delivery attempts before an outbox row is marked FAILED.
pub const MAX_OUTBOX_ATTEMPTS: u32 = 5;

/// A rendered email waiting for (or through) SMTP delivery. Written in the
/// same transaction as the decision status transition, drained by the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEmail {
    pub id: Uuid,
    /// Decision rows covered by this email; marked FAILED if delivery gives up.
    pub decision_ids: Vec<Uuid>,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxEmail {
    pub fn new(
        decision_ids: Vec<Uuid>,
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            decision_ids,
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: text_body.into(),
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            sent_at: None,
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Sent;
        self.sent_at = Some(now);
    }

    /// Record a delivery failure. Schedules an exponential-backoff retry
    /// (60s · 2^attempts, capped at 1 h) until the attempt limit, then FAILED.
    pub fn mark_attempt_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        if self.attempts >= MAX_OUTBOX_ATTEMPTS {
            self.status = OutboxStatus::Failed;
        } else {
            let delay = 60u32
                .saturating_mul(2u32.saturating_pow(self.attempts))
                .min(MAX_OUTBOX_RETRY_SECS);
            self.next_attempt_at = now + chrono::Duration::seconds(delay as i64);
        }
    }
}

// ---------------------------------------------------------------------------
// Agent runs (decision pipeline observability)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRunStatus {
    Completed,
    Error,
}

/// One row per decision-pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub trigger: String,
    pub goal_id: Option<Uuid>,
    pub status: AgentRunStatus,
    pub llm_used: bool,
    pub model_name: Option<String>,
    pub latency_ms: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
