//! Match engine: scores each embedded item against the active goals that can
//! see its source, and upserts one GoalItemMatch row per goal.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use ai_client::EmbedProvider;
use sentrycore_common::events::MatchComputed;
use sentrycore_common::types::*;
use sentrycore_common::MatchWeights;
use sentrycore_store::{FeedbackRepo, GoalRepo, ItemRepo, MatchRepo, SourceRepo, SubscriptionRepo};

use crate::deps::Deps;

/// Freshness decay time constant: 24 hours.
const FRESHNESS_TAU_HOURS: f64 = 24.0;

pub struct MatchEngine {
    deps: Deps,
    embedder: Arc<dyn EmbedProvider>,
    weights: MatchWeights,
    /// Goal descriptor vectors, embedded once per process per goal.
    descriptors: Mutex<HashMap<Uuid, Vec<f32>>>,
}

impl MatchEngine {
    pub fn new(deps: Deps, embedder: Arc<dyn EmbedProvider>, weights: MatchWeights) -> Self {
        Self {
            deps,
            embedder,
            weights,
            descriptors: Mutex::new(HashMap::new()),
        }
    }

    /// Recompute matches for one embedded item. Emits one MatchComputed per
    /// visible active goal; zero-score rows are still upserted so the rule
    /// gate's vetoes stay auditable.
    pub async fn process_item(&self, item_id: Uuid) -> Result<Vec<MatchComputed>> {
        let item = self
            .deps
            .items
            .get_item(item_id)
            .await?
            .ok_or_else(|| anyhow!("item {item_id} not found"))?;
        let embedding = match (&item.embedding_status, &item.embedding) {
            (EmbeddingStatus::Done, Some(v)) => v.clone(),
            _ => return Ok(Vec::new()),
        };

        let source = self
            .deps
            .sources
            .get_source(item.source_id)
            .await?
            .ok_or_else(|| anyhow!("source {} not found", item.source_id))?;

        let visible_users = self.visible_users(&source).await?;
        let goals: Vec<Goal> = self
            .deps
            .goals
            .active_goals()
            .await?
            .into_iter()
            .filter(|g| visible_users.contains(&g.user_id))
            .collect();

        let now = Utc::now();
        let mut computed = Vec::new();
        for goal in goals {
            let terms = self.deps.goals.terms_for(goal.id).await?;
            let descriptor = self.descriptor_for(&goal).await?;

            let affinity = self
                .source_affinity(goal.user_id, goal.id, &source)
                .await?;
            let (features, reasons) = extract_features(
                &terms, &item, &embedding, &descriptor, &source.name, affinity, now,
            );
            let score = score_match(&features, &self.weights, goal.priority_mode);

            let row = GoalItemMatch {
                id: Uuid::new_v4(),
                goal_id: goal.id,
                item_id: item.id,
                match_score: score,
                features,
                reasons,
                topic_key: item.topic_key.clone(),
                item_time: item.item_time(),
                computed_at: now,
            };
            let row = self.deps.matches.upsert_match(row).await?;
            debug!(goal = %goal.name, score, "match computed");
            computed.push(MatchComputed {
                goal_id: row.goal_id,
                item_id: row.item_id,
                score,
            });
        }

        if !computed.is_empty() {
            info!(item = %item.title, matches = computed.len(), "item matched");
        }
        Ok(computed)
    }

    /// A goal sees a source's items iff its user owns the source or is
    /// subscribed to it. `is_private` affects budget attribution, not
    /// visibility.
    async fn visible_users(&self, source: &Source) -> Result<Vec<Uuid>> {
        let mut users = self.deps.subscriptions.subscribers_of(source.id).await?;
        if let Some(owner) = source.owner_id {
            if !users.contains(&owner) {
                users.push(owner);
            }
        }
        Ok(users)
    }

    /// User-specific multiplier in [0, 1]: zero when the source is blocked,
    /// otherwise reduced by past dislikes.
    async fn source_affinity(&self, user_id: Uuid, goal_id: Uuid, source: &Source) -> Result<f64> {
        if self
            .deps
            .feedback
            .is_blocked(user_id, goal_id, source.id)
            .await?
        {
            return Ok(0.0);
        }
        let dislikes = self.deps.feedback.dislike_count(user_id, source.id).await?;
        Ok((1.0 - 0.25 * dislikes as f64).max(0.0))
    }

    async fn descriptor_for(&self, goal: &Goal) -> Result<Vec<f32>> {
        let mut cache = self.descriptors.lock().await;
        if let Some(v) = cache.get(&goal.id) {
            return Ok(v.clone());
        }
        let vectors = self
            .embedder
            .embed_batch(&[goal.descriptor_text()])
            .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty descriptor embedding for goal {}", goal.id))?;
        cache.insert(goal.id, vector.clone());
        Ok(vector)
    }

    /// Drop a cached descriptor (after a goal edit).
    pub async fn invalidate_descriptor(&self, goal_id: Uuid) {
        self.descriptors.lock().await.remove(&goal_id);
    }
}

/// Cosine similarity; zero when either vector has zero norm.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[allow(clippy::too_many_arguments)]
pub fn extract_features(
    terms: &[GoalPriorityTerm],
    item: &Item,
    item_embedding: &[f32],
    descriptor: &[f32],
    source_name: &str,
    source_affinity: f64,
    now: DateTime<Utc>,
) -> (MatchFeatures, MatchReasons) {
    let haystack = format!(
        "{} {} {}",
        item.title,
        item.snippet.as_deref().unwrap_or(""),
        item.summary.as_deref().unwrap_or("")
    )
    .to_lowercase();
    let contains = |term: &str| haystack.contains(&term.to_lowercase());

    let mut matched_terms = Vec::new();

    let must_terms: Vec<&GoalPriorityTerm> =
        terms.iter().filter(|t| t.term_type == TermType::Must).collect();
    let must_hit = must_terms.iter().all(|t| {
        let hit = contains(&t.term);
        if hit {
            matched_terms.push(t.term.clone());
        }
        hit
    });

    let mut priority_hit_count = 0u32;
    for term in terms.iter().filter(|t| t.term_type == TermType::Priority) {
        if contains(&term.term) {
            priority_hit_count += 1;
            matched_terms.push(term.term.clone());
        }
    }

    let negative_hit = terms
        .iter()
        .filter(|t| t.term_type == TermType::Negative)
        .any(|t| {
            let hit = contains(&t.term);
            if hit {
                matched_terms.push(t.term.clone());
            }
            hit
        });

    let age_hours = ((now - item.item_time()).num_minutes() as f64 / 60.0).max(0.0);
    let freshness = (-age_hours / FRESHNESS_TAU_HOURS).exp();

    let raw_cos = cosine(item_embedding, descriptor);
    let cos_sim = ((raw_cos + 1.0) / 2.0).clamp(0.0, 1.0);

    let features = MatchFeatures {
        cos_sim,
        must_hit: must_hit as u8,
        priority_hit_count,
        negative_hit: negative_hit as u8,
        freshness,
        source_affinity,
    };
    let reasons = MatchReasons {
        matched_terms,
        contributions: vec![
            ("cos_sim".to_string(), cos_sim),
            ("freshness".to_string(), freshness),
            (
                "priority_hits".to_string(),
                (priority_hit_count.min(3) as f64) / 3.0,
            ),
            ("must_hit".to_string(), features.must_hit as f64),
        ],
        source_name: source_name.to_string(),
    };
    (features, reasons)
}

/// The hybrid score: a weighted linear combination, clamped to [0, 1],
/// multiplied by source affinity, with two absolute vetoes.
pub fn score_match(features: &MatchFeatures, weights: &MatchWeights, mode: PriorityMode) -> f64 {
    if features.negative_hit == 1 {
        return 0.0;
    }
    if mode == PriorityMode::Hard && features.must_hit == 0 {
        return 0.0;
    }

    let combined = weights.cos_sim * features.cos_sim
        + weights.freshness * features.freshness
        + weights.priority * (features.priority_hit_count.min(3) as f64) / 3.0
        + weights.must * features.must_hit as f64;

    combined.clamp(0.0, 1.0) * features.source_affinity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(cos: f64, must: u8, prio: u32, neg: u8, fresh: f64, affinity: f64) -> MatchFeatures {
        MatchFeatures {
            cos_sim: cos,
            must_hit: must,
            priority_hit_count: prio,
            negative_hit: neg,
            freshness: fresh,
            source_affinity: affinity,
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!((cosine(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-9);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[0.0], &[0.0]), 0.0);
    }

    #[test]
    fn negative_hit_vetoes_score() {
        let f = features(1.0, 1, 3, 1, 1.0, 1.0);
        assert_eq!(score_match(&f, &MatchWeights::default(), PriorityMode::Soft), 0.0);
    }

    #[test]
    fn hard_mode_missing_must_vetoes() {
        let f = features(1.0, 0, 3, 0, 1.0, 1.0);
        assert_eq!(score_match(&f, &MatchWeights::default(), PriorityMode::Hard), 0.0);
        // Soft mode only loses the must contribution.
        let soft = score_match(&f, &MatchWeights::default(), PriorityMode::Soft);
        assert!(soft > 0.8);
    }

    #[test]
    fn perfect_features_score_one() {
        let f = features(1.0, 1, 3, 0, 1.0, 1.0);
        let score = score_match(&f, &MatchWeights::default(), PriorityMode::Soft);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn priority_hits_saturate_at_three() {
        let three = features(0.5, 1, 3, 0, 0.5, 1.0);
        let ten = features(0.5, 1, 10, 0, 0.5, 1.0);
        let w = MatchWeights::default();
        assert_eq!(
            score_match(&three, &w, PriorityMode::Soft),
            score_match(&ten, &w, PriorityMode::Soft)
        );
    }

    #[test]
    fn affinity_scales_and_zero_blocks() {
        let full = features(1.0, 1, 3, 0, 1.0, 1.0);
        let half = features(1.0, 1, 3, 0, 1.0, 0.5);
        let blocked = features(1.0, 1, 3, 0, 1.0, 0.0);
        let w = MatchWeights::default();
        let full_score = score_match(&full, &w, PriorityMode::Soft);
        assert!((score_match(&half, &w, PriorityMode::Soft) - full_score * 0.5).abs() < 1e-9);
        assert_eq!(score_match(&blocked, &w, PriorityMode::Soft), 0.0);
    }

    fn item_with_text(title: &str, snippet: Option<&str>) -> Item {
        let mut item = Item::new(Uuid::new_v4(), "https://example.com/x", title);
        item.snippet = snippet.map(String::from);
        item
    }

    fn term(goal_id: Uuid, t: &str, kind: TermType) -> GoalPriorityTerm {
        GoalPriorityTerm::new(goal_id, t, kind)
    }

    #[test]
    fn term_matching_is_case_insensitive_substring() {
        let goal = Goal::new(Uuid::new_v4(), "rust", "rust news");
        let terms = vec![
            term(goal.id, "Rust", TermType::Must),
            term(goal.id, "ASYNC", TermType::Priority),
            term(goal.id, "crypto", TermType::Negative),
        ];
        let item = item_with_text("Rust async runtime released", None);
        let (f, r) = extract_features(
            &terms,
            &item,
            &[1.0, 0.1],
            &[1.0, 0.1],
            "src",
            1.0,
            Utc::now(),
        );
        assert_eq!(f.must_hit, 1);
        assert_eq!(f.priority_hit_count, 1);
        assert_eq!(f.negative_hit, 0);
        assert!(r.matched_terms.contains(&"Rust".to_string()));
        assert!(r.matched_terms.contains(&"ASYNC".to_string()));
    }

    #[test]
    fn must_hit_is_vacuously_true_without_must_terms() {
        let item = item_with_text("anything", None);
        let (f, _) = extract_features(
            &[],
            &item,
            &[1.0, 0.1],
            &[1.0, 0.1],
            "src",
            1.0,
            Utc::now(),
        );
        assert_eq!(f.must_hit, 1);
    }

    #[test]
    fn snippet_and_summary_are_searched() {
        let goal = Goal::new(Uuid::new_v4(), "g", "d");
        let terms = vec![term(goal.id, "postgres", TermType::Priority)];
        let mut item = item_with_text("Title only", Some("uses PostgreSQL"));
        item.set_summary("a database story");
        let (f, _) = extract_features(
            &terms,
            &item,
            &[1.0, 0.1],
            &[1.0, 0.1],
            "src",
            1.0,
            Utc::now(),
        );
        assert_eq!(f.priority_hit_count, 1);
    }

    #[test]
    fn freshness_decays_with_age() {
        let now = Utc::now();
        let mut fresh_item = item_with_text("a", None);
        fresh_item.published_at = Some(now);
        let mut day_old = item_with_text("b", None);
        day_old.published_at = Some(now - chrono::Duration::hours(24));

        let (f_fresh, _) = extract_features(
            &[], &fresh_item, &[1.0, 0.1], &[1.0, 0.1], "src", 1.0, now,
        );
        let (f_old, _) = extract_features(
            &[], &day_old, &[1.0, 0.1], &[1.0, 0.1], "src", 1.0, now,
        );
        assert!((f_fresh.freshness - 1.0).abs() < 1e-6);
        assert!((f_old.freshness - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn cos_sim_is_rescaled_to_unit_interval() {
        let item = item_with_text("a", None);
        let (f, _) = extract_features(
            &[],
            &item,
            &[1.0, 0.0],
            &[-1.0, 0.0],
            "src",
            1.0,
            Utc::now(),
        );
        assert!(f.cos_sim.abs() < 1e-9, "opposite vectors rescale to 0");
    }
}
