//! Rolling token issuance: load-indexed pool sizing, pro-rata allocation,
//! tranche payouts.

use edgecoder_types::issuance::{
    IssuanceAllocation, IssuanceEpoch, IssuancePayoutEvent, PayoutTranche,
};
use edgecoder_types::time::now_ms;
use edgecoder_types::{AccountId, PeerId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Issuance tuning, populated from `ISSUANCE_*` environment configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceParams {
    pub window_ms: u64,
    pub base_daily_pool_tokens: f64,
    pub min_daily_pool_tokens: f64,
    pub max_daily_pool_tokens: f64,
    pub load_curve_slope: f64,
    pub smoothing_alpha: f64,
    pub coordinator_share: f64,
    pub reserve_share: f64,
}

impl Default for IssuanceParams {
    fn default() -> Self {
        Self {
            window_ms: 60 * 60 * 1000,
            base_daily_pool_tokens: 1_000.0,
            min_daily_pool_tokens: 250.0,
            max_daily_pool_tokens: 4_000.0,
            load_curve_slope: 0.5,
            smoothing_alpha: 0.3,
            coordinator_share: 0.05,
            reserve_share: 0.10,
        }
    }
}

/// One account's weighted contribution inside a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionWeight {
    pub account_id: AccountId,
    pub weighted_contribution: f64,
}

/// Everything one recalculation produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceEpochBundle {
    pub epoch: IssuanceEpoch,
    pub allocations: Vec<IssuanceAllocation>,
    pub payouts: Vec<IssuancePayoutEvent>,
}

/// Computes issuance epochs from smoothed load and contribution weights.
pub struct IssuanceEngine {
    params: IssuanceParams,
    coordinator_id: PeerId,
    ema_load: Mutex<Option<f64>>,
    epochs: Mutex<Vec<IssuanceEpochBundle>>,
}

impl IssuanceEngine {
    pub fn new(params: IssuanceParams, coordinator_id: impl Into<PeerId>) -> Self {
        Self {
            params,
            coordinator_id: coordinator_id.into(),
            ema_load: Mutex::new(None),
            epochs: Mutex::new(Vec::new()),
        }
    }

    pub fn params(&self) -> IssuanceParams {
        self.params
    }

    /// Smooth the raw load index with EMA `α = smoothing_alpha`.
    fn smooth(&self, raw_load_index: f64) -> f64 {
        let mut ema = self.ema_load.lock();
        let next = match *ema {
            Some(prev) => {
                self.params.smoothing_alpha * raw_load_index
                    + (1.0 - self.params.smoothing_alpha) * prev
            }
            None => raw_load_index,
        };
        *ema = Some(next);
        next
    }

    /// `dailyPool = clamp(base × (1 + max(0, loadIndex − 1) × slope), min, max)`.
    fn daily_pool(&self, load_index: f64) -> f64 {
        let p = &self.params;
        (p.base_daily_pool_tokens * (1.0 + (load_index - 1.0).max(0.0) * p.load_curve_slope))
            .clamp(p.min_daily_pool_tokens, p.max_daily_pool_tokens)
    }

    /// Recalculate one window: smooth the load, size the pool, allocate
    /// pro-rata over positive-weighted contributions, and split the tranches.
    pub fn recalc(
        &self,
        window_start_ms: u64,
        window_end_ms: u64,
        raw_load_index: f64,
        contributions: &[ContributionWeight],
    ) -> IssuanceEpochBundle {
        let load_index = self.smooth(raw_load_index);
        let daily_pool = self.daily_pool(load_index);
        let hourly_tokens = daily_pool / 24.0;

        let positive: Vec<&ContributionWeight> = contributions
            .iter()
            .filter(|c| c.weighted_contribution > 0.0)
            .collect();
        let total_weighted: f64 = positive.iter().map(|c| c.weighted_contribution).sum();

        let p = &self.params;
        let contributor_pool = hourly_tokens * (1.0 - p.coordinator_share - p.reserve_share);
        let now = now_ms();
        let epoch_id = uuid::Uuid::new_v4().to_string();

        let allocations: Vec<IssuanceAllocation> = if total_weighted > 0.0 {
            positive
                .iter()
                .map(|c| IssuanceAllocation {
                    issuance_epoch_id: epoch_id.clone(),
                    account_id: c.account_id.clone(),
                    weighted_contribution: c.weighted_contribution,
                    issued_tokens: contributor_pool * c.weighted_contribution / total_weighted,
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut payouts = Vec::new();
        let contributor_total: f64 = allocations.iter().map(|a| a.issued_tokens).sum();
        if contributor_total > 0.0 {
            payouts.push(IssuancePayoutEvent {
                issuance_epoch_id: epoch_id.clone(),
                tranche: PayoutTranche::Contributor,
                account_id: "contributors".into(),
                tokens: contributor_total,
                created_at_ms: now,
            });
            payouts.push(IssuancePayoutEvent {
                issuance_epoch_id: epoch_id.clone(),
                tranche: PayoutTranche::Coordinator,
                account_id: self.coordinator_id.clone(),
                tokens: hourly_tokens * p.coordinator_share,
                created_at_ms: now,
            });
            payouts.push(IssuancePayoutEvent {
                issuance_epoch_id: epoch_id.clone(),
                tranche: PayoutTranche::Reserve,
                account_id: "reserve".into(),
                tokens: hourly_tokens * p.reserve_share,
                created_at_ms: now,
            });
        }

        let bundle = IssuanceEpochBundle {
            epoch: IssuanceEpoch {
                issuance_epoch_id: epoch_id,
                coordinator_id: self.coordinator_id.clone(),
                window_start_ms,
                window_end_ms,
                load_index,
                daily_pool_tokens: daily_pool,
                hourly_tokens,
                total_weighted_contribution: total_weighted,
                contribution_count: positive.len() as u64,
                finalized: true,
                created_at_ms: now,
            },
            allocations,
            payouts,
        };
        info!(
            target: "economy",
            epoch = %bundle.epoch.issuance_epoch_id,
            load_index,
            daily_pool,
            contributors = bundle.epoch.contribution_count,
            "issuance epoch recalculated"
        );
        self.epochs.lock().push(bundle.clone());
        bundle
    }

    /// Most recent epoch, if any.
    pub fn current(&self) -> Option<IssuanceEpochBundle> {
        self.epochs.lock().last().cloned()
    }

    /// All epochs, oldest first.
    pub fn history(&self) -> Vec<IssuanceEpochBundle> {
        self.epochs.lock().clone()
    }

    pub fn get(&self, epoch_id: &str) -> Option<IssuanceEpochBundle> {
        self.epochs
            .lock()
            .iter()
            .find(|b| b.epoch.issuance_epoch_id == epoch_id)
            .cloned()
    }
}
