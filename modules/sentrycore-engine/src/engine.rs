//! Engine facade: owns every component and exposes one method per timer job.
//! The components are queue-separable; co-locating them here makes the
//! single-binary deployment chain embed → match → decide → coalesce directly.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use ai_client::EmbedProvider;
use sentrycore_common::Config;
use sentrycore_fetch::FetcherFactory;
use sentrycore_store::GoalRepo;

use crate::budget::{BudgetGovernor, SYSTEM_USER};
use crate::coalescer::Coalescer;
use crate::deps::Deps;
use crate::embed::EmbedWorker;
use crate::ingest::IngestCoordinator;
use crate::judge::JudgeProvider;
use crate::outbox::{EmailBackend, EmailSender};
use crate::pipeline::DecisionEngine;
use crate::render::EmailRenderer;
use crate::scheduler::FetchScheduler;

pub struct Engine {
    pub deps: Deps,
    pub governor: Arc<BudgetGovernor>,
    scheduler: FetchScheduler,
    embed: EmbedWorker,
    matcher: crate::matcher::MatchEngine,
    decisions: DecisionEngine,
    coalescer: Coalescer,
    sender: EmailSender,
    last_batch_tick: Mutex<DateTime<Utc>>,
    last_digest_tick: Mutex<DateTime<Utc>>,
}

impl Engine {
    pub fn new(
        config: &Config,
        deps: Deps,
        embedder: Arc<dyn EmbedProvider>,
        judge: Arc<dyn JudgeProvider>,
        email_backend: Arc<dyn EmailBackend>,
    ) -> Self {
        let governor = Arc::new(BudgetGovernor::new(
            deps.budgets.clone(),
            config.daily_budget_usd,
            config.budget_soft_factor,
            config.usd_per_mtok_embedding,
            config.usd_per_mtok_judge,
        ));

        let ingest = Arc::new(IngestCoordinator::new(deps.clone()));
        let scheduler = FetchScheduler::new(
            deps.clone(),
            Arc::new(FetcherFactory::new()),
            ingest,
            config.sources_per_sweep,
            config.items_per_fetch,
            config.empty_streak_threshold,
            config.empty_cooldown_factor,
        );
        let embed = EmbedWorker::new(
            deps.clone(),
            governor.clone(),
            embedder.clone(),
            config.embed_batch_size,
        )
        .with_expected_dim(config.embedding_dim);
        let matcher = crate::matcher::MatchEngine::new(deps.clone(), embedder, config.weights);
        let decisions = DecisionEngine::new(
            deps.clone(),
            judge,
            governor.clone(),
            config.thresholds,
            config.judge_enabled,
        );
        let coalescer = Coalescer::new(
            deps.clone(),
            EmailRenderer::new(&config.public_base_url),
            config.digest_top_n,
        );
        let sender = EmailSender::new(deps.clone(), email_backend);

        let now = Utc::now();
        Self {
            deps,
            governor,
            scheduler,
            embed,
            matcher,
            decisions,
            coalescer,
            sender,
            last_batch_tick: Mutex::new(now),
            last_digest_tick: Mutex::new(now),
        }
    }

    /// C2: sweep due sources and run their fetch + ingest jobs.
    pub async fn scheduler_tick(&self) -> Result<()> {
        self.scheduler.sweep(Utc::now()).await?;
        Ok(())
    }

    /// C5 → C6 → C7 → C8: embed pending items, then drive each embedded item
    /// through matching, decisioning and coalescing. A failure on one item
    /// never blocks the others.
    pub async fn embed_tick(&self) -> Result<()> {
        let embedded = self.embed.run_once().await?;
        for item_id in embedded {
            let matches = match self.matcher.process_item(item_id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(item = %item_id, error = %e, "match computation failed");
                    continue;
                }
            };
            for event in matches {
                let proposals = self.decisions.on_match_computed(event).await?;
                for proposal in &proposals {
                    self.coalescer.accept(proposal).await?;
                }
            }
        }
        Ok(())
    }

    /// C8: seal and send elapsed immediate buffers.
    pub async fn immediate_tick(&self) -> Result<()> {
        let sent = self.coalescer.flush_immediate(Utc::now()).await?;
        if sent > 0 {
            info!(sent, "immediate flush queued emails");
        }
        Ok(())
    }

    /// C8: fire batch windows that elapsed since the last tick.
    pub async fn batch_tick(&self) -> Result<()> {
        let now = Utc::now();
        let mut last = self.last_batch_tick.lock().await;
        let sent = self.coalescer.run_batch_windows(*last, now).await?;
        *last = now;
        if sent > 0 {
            info!(sent, "batch windows queued emails");
        }
        Ok(())
    }

    /// C8: fire digests that elapsed since the last tick.
    pub async fn digest_tick(&self) -> Result<()> {
        let now = Utc::now();
        let mut last = self.last_digest_tick.lock().await;
        let sent = self.coalescer.run_digest(*last, now).await?;
        *last = now;
        if sent > 0 {
            info!(sent, "digest queued emails");
        }
        Ok(())
    }

    /// Email sender: drain due outbox rows.
    pub async fn email_tick(&self) -> Result<()> {
        let stats = self.sender.run_once(Utc::now()).await?;
        if stats.sent + stats.retried + stats.failed > 0 {
            info!(
                sent = stats.sent,
                retried = stats.retried,
                failed = stats.failed,
                "outbox drained"
            );
        }
        Ok(())
    }

    /// C9: idempotent budget rollover for every known budget user.
    pub async fn budget_tick(&self) -> Result<()> {
        let mut users: Vec<uuid::Uuid> = self
            .deps
            .goals
            .active_goals()
            .await?
            .into_iter()
            .map(|g| g.user_id)
            .collect();
        users.push(SYSTEM_USER);
        users.sort();
        users.dedup();
        self.governor.rollover(&users, Utc::now().date_naive()).await
    }

    /// Liveness logging; a missed tick is benign.
    pub async fn health_tick(&self) -> Result<()> {
        info!(
            embed_errors = self.embed.error_count(),
            "health check: engine alive"
        );
        Ok(())
    }
}
