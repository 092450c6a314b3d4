//! Snipe orchestrator (C9): matches a fresh [`Migration`] against every
//! active sniper, applies each sniper's filter predicate, acquires a
//! per-(sniper,mint) dedup lock, and enqueues a prioritized job.
//!
//! The message-channel-plus-priority-sort shape follows `bot_coordinator.rs`
//! (`CoordinatorMessage` queue sorted by priority); here the channel
//! receives migrations instead of execution requests and the "sort" is a
//! Redis sorted-set `ZADD` rather than an in-process `Vec::sort_by`, since
//! jobs must survive a worker restart.

use crate::constants::{MAX_MIGRATION_AGE_ORCHESTRATION, SNIPE_LOCK_TTL};
use crate::errors::CoreResult;
use crate::events::EventBus;
use crate::external_adapter::ExternalAdapter;
use crate::kv_store::KvStore;
use crate::persistence::Persistence;
use crate::types::{EnrichmentData, Migration, SniperConfig, SniperFilters, SnipeJob};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Orchestrator {
    persistence: Persistence,
    kv: KvStore,
    events: EventBus,
    adapter: Arc<ExternalAdapter>,
    enrichment_endpoint_url: Option<String>,
}

impl Orchestrator {
    pub fn new(
        persistence: Persistence,
        kv: KvStore,
        events: EventBus,
        adapter: Arc<ExternalAdapter>,
        enrichment_endpoint_url: Option<String>,
    ) -> Self {
        Self { persistence, kv, events, adapter, enrichment_endpoint_url }
    }

    /// Entry point for every migration the detector hands off, whether
    /// from the local broadcast channel or the cross-process pub/sub
    /// relay. Never propagates a per-sniper failure to the caller; a
    /// rejected or duplicate match for one sniper must not block others.
    pub async fn handle_migration(&self, migration: &Migration) -> CoreResult<usize> {
        if migration.age() > chrono::Duration::from_std(MAX_MIGRATION_AGE_ORCHESTRATION).unwrap() {
            debug!(mint = %migration.mint, "migration dropped as stale at orchestration");
            return Ok(0);
        }

        self.persistence.record_migration(migration)?;

        let snipers = self.persistence.load_active_snipers()?;
        let mut enqueued = 0;

        // Fetch enrichment once per migration, not once per sniper, and only
        // if some active sniper's filters actually need it (§4.2).
        let needs_enrichment = snipers.iter().any(|s| s.active && s.filters.needs_enrichment());
        let enrichment = if needs_enrichment {
            self.fetch_enrichment(migration).await
        } else {
            None
        };

        for sniper in &snipers {
            if !sniper.active {
                continue;
            }

            if !matches_filters(&sniper.filters, migration, enrichment.as_ref()) {
                self.persistence.increment_tokens_filtered(&sniper.id)?;
                continue;
            }

            match self.try_enqueue(sniper, migration).await {
                Ok(true) => enqueued += 1,
                Ok(false) => {
                    info!(sniper_id = %sniper.id, mint = %migration.mint, "🔁 Duplicate snipe blocked");
                }
                Err(e) => {
                    warn!(sniper_id = %sniper.id, mint = %migration.mint, error = %e, "failed to enqueue snipe job");
                }
            }
        }

        Ok(enqueued)
    }

    /// Best-effort: a slow or unreachable enrichment service must not block
    /// matching on snipers whose filters don't need it, so failures here
    /// only cost enrichment-dependent filters a fail-closed rejection below.
    async fn fetch_enrichment(&self, migration: &Migration) -> Option<EnrichmentData> {
        let url = self.enrichment_endpoint_url.as_ref()?;
        match self.adapter.fetch_enrichment(url, &migration.mint.to_string()).await {
            Ok(body) => match serde_json::from_value(body) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(mint = %migration.mint, error = %e, "enrichment response did not match expected shape");
                    None
                }
            },
            Err(e) => {
                warn!(mint = %migration.mint, error = %e, "enrichment fetch failed");
                None
            }
        }
    }

    async fn try_enqueue(&self, sniper: &SniperConfig, migration: &Migration) -> CoreResult<bool> {
        let lock_key = format!("snipe-lock:{}:{}", sniper.id, migration.mint);
        if !self.kv.set_once(&lock_key, SNIPE_LOCK_TTL).await? {
            return Ok(false);
        }

        let job = SnipeJob::new(sniper, migration);
        let payload = serde_json::to_string(&job)
            .map_err(|e| crate::errors::CoreError::fatal(format!("job serialize failed: {e}")))?;
        self.kv.queue_push("snipe-jobs", &payload, job.priority).await?;

        self.events
            .emit_migration_matched(&sniper.user, &migration.mint.to_string(), &sniper.id)
            .await;

        info!(
            sniper_id = %sniper.id,
            mint = %migration.mint,
            priority = job.priority,
            "🎯 snipe job enqueued"
        );
        Ok(true)
    }
}

/// Pure predicate over a migration plus, when the filter set requires it,
/// the enrichment fetched once per migration in `handle_migration`. A
/// filter whose data enrichment could not supply (no endpoint configured,
/// the fetch failed, or the field itself came back `None`) fails closed:
/// an unmet requirement is treated as not met rather than skipped.
fn matches_filters(filters: &SniperFilters, migration: &Migration, enrichment: Option<&EnrichmentData>) -> bool {
    if let Some(min_liquidity) = filters.min_liquidity {
        if migration.initial_liquidity < min_liquidity {
            return false;
        }
    }
    if let Some(max_mcap) = filters.max_mcap {
        if migration.initial_mcap.unwrap_or(f64::MAX) > max_mcap {
            return false;
        }
    }
    if let Some(max_age_minutes) = filters.max_migration_age_minutes {
        if migration.age().num_minutes() > max_age_minutes {
            return false;
        }
    }
    if let Some(symbol) = &migration.symbol {
        if filters.excluded_patterns.iter().any(|p| symbol.contains(p)) {
            return false;
        }
        if !filters.name_patterns.is_empty() && !filters.name_patterns.iter().any(|p| symbol.contains(p)) {
            return false;
        }
    }

    if filters.needs_enrichment() {
        let Some(e) = enrichment else { return false };

        if let Some(min_volume_usd) = filters.min_volume_usd {
            if e.volume_usd.unwrap_or(0.0) < min_volume_usd {
                return false;
            }
        }
        if let Some(min_holders) = filters.min_holders {
            if e.holders.unwrap_or(0) < min_holders {
                return false;
            }
        }
        if let Some(max_dev_pct) = filters.max_dev_pct {
            if e.dev_pct.unwrap_or(f64::MAX) > max_dev_pct {
                return false;
            }
        }
        if let Some(max_top10_pct) = filters.max_top10_pct {
            if e.top10_pct.unwrap_or(f64::MAX) > max_top10_pct {
                return false;
            }
        }
        if filters.require_twitter == Some(true) && e.has_twitter != Some(true) {
            return false;
        }
        if filters.require_telegram == Some(true) && e.has_telegram != Some(true) {
            return false;
        }
        if filters.require_website == Some(true) && e.has_website != Some(true) {
            return false;
        }
        if let Some(min_followers) = filters.min_twitter_followers {
            if e.twitter_followers.unwrap_or(0) < min_followers {
                return false;
            }
        }
        if let Some(min_score) = filters.min_creator_score {
            if e.creator_score.unwrap_or(0.0) < min_score {
                return false;
            }
        }
        if filters.require_lp_lock == Some(true) && e.lp_locked != Some(true) {
            return false;
        }
        if filters.require_dex_paid == Some(true) && e.dex_paid != Some(true) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    fn migration() -> Migration {
        Migration {
            mint: Pubkey::new_unique(),
            pool: Pubkey::new_unique(),
            coin_creator: None,
            name: Some("Test".into()),
            symbol: Some("TEST".into()),
            initial_liquidity: 85.0,
            initial_mcap: Some(69_000.0),
            source_timestamp: chrono::Utc::now(),
            detected_at: chrono::Utc::now(),
            detection_latency_ms: 50,
            signature: "sig".into(),
        }
    }

    #[test]
    fn min_liquidity_filter_rejects_below_threshold() {
        let filters = SniperFilters { min_liquidity: Some(100.0), ..Default::default() };
        assert!(!matches_filters(&filters, &migration(), None));
    }

    #[test]
    fn max_mcap_filter_allows_at_or_below_threshold() {
        let filters = SniperFilters { max_mcap: Some(70_000.0), ..Default::default() };
        assert!(matches_filters(&filters, &migration(), None));
    }

    #[test]
    fn excluded_pattern_rejects_match() {
        let filters = SniperFilters { excluded_patterns: vec!["TEST".into()], ..Default::default() };
        assert!(!matches_filters(&filters, &migration(), None));
    }

    #[test]
    fn enrichment_filter_fails_closed_without_enrichment_data() {
        let filters = SniperFilters { min_holders: Some(50), ..Default::default() };
        assert!(!matches_filters(&filters, &migration(), None));
    }

    #[test]
    fn enrichment_filter_passes_when_data_satisfies_it() {
        let filters = SniperFilters { min_holders: Some(50), require_twitter: Some(true), ..Default::default() };
        let enrichment = EnrichmentData { holders: Some(120), has_twitter: Some(true), ..Default::default() };
        assert!(matches_filters(&filters, &migration(), Some(&enrichment)));
    }

    #[test]
    fn enrichment_filter_rejects_when_data_falls_short() {
        let filters = SniperFilters { min_holders: Some(500), ..Default::default() };
        let enrichment = EnrichmentData { holders: Some(120), ..Default::default() };
        assert!(!matches_filters(&filters, &migration(), Some(&enrichment)));
    }
}
