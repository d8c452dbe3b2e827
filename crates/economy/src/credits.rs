//! The credit engine: accrual, spend, balances, contribution policy.

use crate::pricing::load_multiplier;
use edgecoder_storage::RecordStore;
use edgecoder_types::credit::{
    ContributionReport, CreditTransaction, CreditTxType, LoadSnapshot,
};
use edgecoder_types::error::CreditError;
use edgecoder_types::task::ResourceClass;
use edgecoder_types::time::now_ms;
use edgecoder_types::{AccountId, TaskId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Credit-rate and policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct CreditPolicy {
    /// Credits per cpu-second-equivalent on the cpu class.
    pub base_rate_cpu: f64,
    /// Credits per cpu-second-equivalent on the gpu class.
    pub base_rate_gpu: f64,
    /// `(earned + purchased) / spent` must stay at or above this…
    pub min_contribution_ratio: f64,
    /// …unless the balance is at least this many credits.
    pub contribution_burst_credits: f64,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            base_rate_cpu: 1.0,
            base_rate_gpu: 4.0,
            min_contribution_ratio: 1.0,
            contribution_burst_credits: 25.0,
        }
    }
}

/// Injectable quality multiplier policy.
pub trait QualityPolicy: Send + Sync {
    fn multiplier(&self, report: &ContributionReport) -> f64;
}

/// The default policy: the report's own quality score, or 1.0.
pub struct FixedQuality;

impl QualityPolicy for FixedQuality {
    fn multiplier(&self, report: &ContributionReport) -> f64 {
        report.quality.unwrap_or(1.0).clamp(0.0, 1.0)
    }
}

#[derive(Default)]
struct Account {
    transactions: Vec<CreditTransaction>,
}

impl Account {
    fn balance(&self) -> f64 {
        self.transactions.iter().fold(0.0, |acc, tx| match tx.tx_type {
            CreditTxType::Earn => acc + tx.credits,
            CreditTxType::Spend => acc - tx.credits,
            CreditTxType::Adjust => acc + tx.credits,
            CreditTxType::Held => acc,
        })
    }

    fn earned(&self) -> f64 {
        self.transactions
            .iter()
            .filter(|t| t.tx_type == CreditTxType::Earn && !t.is_purchase())
            .map(|t| t.credits)
            .sum()
    }

    fn purchased(&self) -> f64 {
        self.transactions
            .iter()
            .filter(|t| t.is_purchase())
            .map(|t| t.credits)
            .sum()
    }

    fn spent(&self) -> f64 {
        self.transactions
            .iter()
            .filter(|t| t.tx_type == CreditTxType::Spend)
            .map(|t| t.credits)
            .sum()
    }
}

/// Result of an offline transaction sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Append-only, per-account credit accounting.
///
/// Accounts are serialized individually; cross-account operations take both
/// locks in sorted account-id order.
pub struct CreditEngine {
    policy: CreditPolicy,
    quality: Arc<dyn QualityPolicy>,
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Account>>>>,
    seen_reports: Mutex<HashSet<String>>,
    seen_tx_ids: Mutex<HashSet<String>>,
    /// Durable transaction archive behind the pluggable store boundary.
    archive: Option<Arc<dyn RecordStore<CreditTransaction>>>,
}

impl CreditEngine {
    pub fn new(policy: CreditPolicy, quality: Arc<dyn QualityPolicy>) -> Self {
        Self {
            policy,
            quality,
            accounts: RwLock::new(HashMap::new()),
            seen_reports: Mutex::new(HashSet::new()),
            seen_tx_ids: Mutex::new(HashSet::new()),
            archive: None,
        }
    }

    /// Attach a durable archive; every accepted transaction is mirrored into
    /// it keyed by `txId`.
    pub fn with_archive(mut self, archive: Arc<dyn RecordStore<CreditTransaction>>) -> Self {
        self.archive = Some(archive);
        self
    }

    fn archive_tx(&self, tx: &CreditTransaction) {
        if let Some(archive) = &self.archive {
            archive.put(&tx.tx_id, tx.clone());
        }
    }

    fn account(&self, id: &str) -> Arc<Mutex<Account>> {
        if let Some(a) = self.accounts.read().get(id) {
            return a.clone();
        }
        self.accounts
            .write()
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    fn make_tx(
        account_id: &str,
        tx_type: CreditTxType,
        credits: f64,
        reason: String,
        related_task_id: Option<TaskId>,
    ) -> CreditTransaction {
        CreditTransaction {
            tx_id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            tx_type,
            credits,
            reason,
            related_task_id,
            timestamp_ms: now_ms(),
        }
    }

    fn record(
        &self,
        account_id: &str,
        tx_type: CreditTxType,
        credits: f64,
        reason: String,
        related_task_id: Option<TaskId>,
    ) -> CreditTransaction {
        let tx = Self::make_tx(account_id, tx_type, credits, reason, related_task_id);
        self.seen_tx_ids.lock().insert(tx.tx_id.clone());
        self.account(account_id).lock().transactions.push(tx.clone());
        self.archive_tx(&tx);
        tx
    }

    /// Current balance; zero for unknown accounts.
    pub fn balance(&self, account_id: &str) -> f64 {
        self.accounts
            .read()
            .get(account_id)
            .map(|a| a.lock().balance())
            .unwrap_or(0.0)
    }

    /// Accrue credits for a metered contribution report.
    ///
    /// `credits = cpuSecondsEquivalent × baseRate × qualityMultiplier ×
    /// loadMultiplier`. A duplicate `reportId` is rejected and changes no
    /// balance.
    pub fn accrue(
        &self,
        report: &ContributionReport,
        load: LoadSnapshot,
    ) -> Result<CreditTransaction, CreditError> {
        if !self.seen_reports.lock().insert(report.report_id.clone()) {
            return Err(CreditError::DuplicateContributionReport(
                report.report_id.clone(),
            ));
        }
        let base_rate = match report.resource_class {
            ResourceClass::Cpu => self.policy.base_rate_cpu,
            ResourceClass::Gpu => self.policy.base_rate_gpu,
        };
        let credits = report.cpu_seconds_equivalent
            * base_rate
            * self.quality.multiplier(report)
            * load_multiplier(load.pressure());
        debug!(
            target: "economy",
            account = %report.account_id,
            report = %report.report_id,
            credits,
            "accrued contribution"
        );
        Ok(self.record(
            &report.account_id,
            CreditTxType::Earn,
            credits,
            format!("contribution:{}", report.report_id),
            report.related_task_id.clone(),
        ))
    }

    /// Write an earn transaction directly (issuance payouts, settled
    /// purchases).
    pub fn earn(
        &self,
        account_id: &str,
        credits: f64,
        reason: String,
        related_task_id: Option<TaskId>,
    ) -> CreditTransaction {
        self.record(account_id, CreditTxType::Earn, credits, reason, related_task_id)
    }

    /// Spend credits, enforcing balance sufficiency and the
    /// contribution-first policy.
    pub fn spend(
        &self,
        account_id: &str,
        credits: f64,
        reason: String,
        related_task_id: Option<TaskId>,
    ) -> Result<CreditTransaction, CreditError> {
        let account = self.account(account_id);
        let mut guard = account.lock();
        self.check_spend(account_id, &guard, credits)?;
        let tx = Self::make_tx(account_id, CreditTxType::Spend, credits, reason, related_task_id);
        guard.transactions.push(tx.clone());
        drop(guard);
        self.seen_tx_ids.lock().insert(tx.tx_id.clone());
        self.archive_tx(&tx);
        Ok(tx)
    }

    fn check_spend(
        &self,
        account_id: &str,
        account: &Account,
        credits: f64,
    ) -> Result<(), CreditError> {
        let balance = account.balance();
        if balance < credits {
            return Err(CreditError::InsufficientCredits {
                account: account_id.to_string(),
                balance,
                requested: credits,
            });
        }
        // Contribution-first: contributors and purchasers both pass; pure
        // leeching does not.
        if balance < self.policy.contribution_burst_credits {
            let spent_after = account.spent() + credits;
            let ratio = (account.earned() + account.purchased()) / spent_after;
            if ratio < self.policy.min_contribution_ratio {
                return Err(CreditError::ContributionPolicyViolation {
                    ratio,
                    minimum: self.policy.min_contribution_ratio,
                });
            }
        }
        Ok(())
    }

    /// Spend with a coordinator fee split. Both account logs are locked in
    /// sorted id order so concurrent splits cannot deadlock.
    pub fn spend_with_fee(
        &self,
        account_id: &str,
        credits: f64,
        fee_bps: u32,
        coordinator_account: &str,
        reason: String,
        related_task_id: Option<TaskId>,
    ) -> Result<CreditTransaction, CreditError> {
        if account_id == coordinator_account {
            return self.spend(account_id, credits, reason, related_task_id);
        }
        let spender = self.account(account_id);
        let coordinator = self.account(coordinator_account);

        // Deterministic lock order by sorted account id.
        let spender_first = account_id <= coordinator_account;
        let (first, second) = if spender_first {
            (&spender, &coordinator)
        } else {
            (&coordinator, &spender)
        };
        let mut first_guard = first.lock();
        let mut second_guard = second.lock();
        {
            let spender_view: &Account = if spender_first {
                &first_guard
            } else {
                &second_guard
            };
            self.check_spend(account_id, spender_view, credits)?;
        }

        let tx = Self::make_tx(account_id, CreditTxType::Spend, credits, reason, related_task_id);
        let fee = credits * (fee_bps as f64) / 10_000.0;
        let fee_tx = Self::make_tx(
            coordinator_account,
            CreditTxType::Earn,
            fee,
            format!("coordinator_fee:{}", tx.tx_id),
            None,
        );
        let (spender_guard, coordinator_guard) = if spender_first {
            (&mut first_guard, &mut second_guard)
        } else {
            (&mut second_guard, &mut first_guard)
        };
        spender_guard.transactions.push(tx.clone());
        if fee > 0.0 {
            coordinator_guard.transactions.push(fee_tx.clone());
        }
        drop(second_guard);
        drop(first_guard);

        let mut seen = self.seen_tx_ids.lock();
        seen.insert(tx.tx_id.clone());
        if fee > 0.0 {
            seen.insert(fee_tx.tx_id.clone());
        }
        drop(seen);
        self.archive_tx(&tx);
        if fee > 0.0 {
            self.archive_tx(&fee_tx);
        }
        Ok(tx)
    }

    /// Signed adjustment. Negative adjustments may not take a non-privileged
    /// account below zero.
    pub fn adjust(
        &self,
        account_id: &str,
        credits: f64,
        reason: String,
        privileged: bool,
    ) -> Result<CreditTransaction, CreditError> {
        if credits < 0.0 && !privileged {
            let balance = self.balance(account_id);
            if balance + credits < 0.0 {
                return Err(CreditError::InsufficientCredits {
                    account: account_id.to_string(),
                    balance,
                    requested: -credits,
                });
            }
        }
        Ok(self.record(account_id, CreditTxType::Adjust, credits, reason, None))
    }

    /// Record a hold annotation. Holds never move balance.
    pub fn hold(&self, account_id: &str, credits: f64, reason: String) -> CreditTransaction {
        self.record(account_id, CreditTxType::Held, credits, reason, None)
    }

    /// Idempotent ingest of device-synced transactions (`/credits/ble-sync`).
    pub fn sync_offline(&self, transactions: Vec<CreditTransaction>) -> SyncReport {
        let mut report = SyncReport::default();
        for tx in transactions {
            if !self.seen_tx_ids.lock().insert(tx.tx_id.clone()) {
                report.duplicates += 1;
                continue;
            }
            let account = self.account(&tx.account_id);
            let mut guard = account.lock();
            if tx.tx_type == CreditTxType::Spend && guard.balance() < tx.credits {
                // Applying it would break the non-negative balance invariant.
                report.rejected += 1;
                continue;
            }
            guard.transactions.push(tx.clone());
            drop(guard);
            self.archive_tx(&tx);
            report.accepted += 1;
        }
        info!(
            target: "economy",
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "offline credit sync"
        );
        report
    }

    /// Full transaction log for an account, oldest first.
    pub fn transactions(&self, account_id: &str) -> Vec<CreditTransaction> {
        self.accounts
            .read()
            .get(account_id)
            .map(|a| a.lock().transactions.clone())
            .unwrap_or_default()
    }

    /// Non-purchase earnings inside a time window, summed per account.
    /// The issuance engine uses these as contribution weights.
    pub fn earnings_in_window(&self, start_ms: u64, end_ms: u64) -> Vec<(AccountId, f64)> {
        let accounts = self.accounts.read();
        let mut out = Vec::new();
        for (id, account) in accounts.iter() {
            let sum: f64 = account
                .lock()
                .transactions
                .iter()
                .filter(|t| {
                    t.tx_type == CreditTxType::Earn
                        && !t.is_purchase()
                        && t.timestamp_ms >= start_ms
                        && t.timestamp_ms < end_ms
                })
                .map(|t| t.credits)
                .sum();
            if sum > 0.0 {
                out.push((id.clone(), sum));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Default for CreditEngine {
    fn default() -> Self {
        Self::new(CreditPolicy::default(), Arc::new(FixedQuality))
    }
}
