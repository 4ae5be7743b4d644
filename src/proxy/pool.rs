// Account pool dispatcher: round-robin selection, cooldown tracking, and
// per-error disposition. Each attempt resolves to served / retryable /
// terminal, and the loop folds the disposition table over the eligible set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::endpoints::NEAR_EXPIRY_SECS;
use crate::auth::refresher::TokenRefresher;
use crate::models::account::{next_month_start_ms, Account, AccountStatus};
use crate::proxy::config::{AppConfig, REQUEST_TIMEOUT_SECS};
use crate::proxy::mappers::claude::models::ClaudeRequest;
use crate::proxy::upstream::adapter::{ClientPool, KiroAdapter, UpstreamError, UsageLimits};
use crate::proxy::upstream::conversation::{build_kiro_payload, TranslateError};
use crate::store::AccountStore;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No healthy accounts available")]
    NoHealthyAccounts,

    #[error("{0}")]
    BadRequest(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },
}

/// A successfully opened upstream call. The response body is the raw Kiro
/// event stream; the caller owns it exclusively for the request's lifetime.
#[derive(Debug)]
pub struct Served {
    pub response: reqwest::Response,
    pub account_email: String,
}

#[derive(Default)]
struct PoolState {
    cursor: usize,
    cooldowns: HashMap<String, i64>,
}

/// The dispatcher. Cursor and cooldown map live under one mutex that is
/// never held across I/O; the account store is read as snapshots and
/// written through its interface only.
pub struct AccountPool {
    store: Arc<dyn AccountStore>,
    state: Mutex<PoolState>,
    clients: ClientPool,
    refresher: TokenRefresher,
    cooldown_ms: i64,
    refresh_before_expiry_secs: i64,
    quota_reset_utc: bool,
    usage_cache: Mutex<HashMap<String, UsageLimits>>,
}

impl AccountPool {
    pub fn new(store: Arc<dyn AccountStore>, config: &AppConfig) -> Self {
        Self {
            store,
            state: Mutex::new(PoolState::default()),
            clients: ClientPool::new(),
            refresher: TokenRefresher::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
            cooldown_ms: config.cooldown_ms,
            refresh_before_expiry_secs: config.refresh_before_expiry_secs,
            quota_reset_utc: config.quota_reset_utc,
            usage_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot the accounts eligible right now: refresh token present,
    /// cooldown expired (expired entries are removed), and quota window
    /// either absent or elapsed (elapsed windows reset the account through
    /// the store).
    fn eligible_accounts(&self, now_ms: i64) -> Vec<Account> {
        let cooled: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            state.cooldowns.retain(|_, until| *until > now_ms);
            state.cooldowns.keys().cloned().collect()
        };

        let mut eligible = Vec::new();
        for mut account in self.store.list() {
            if !account.is_usable() || cooled.contains(&account.id) {
                continue;
            }
            if account.status == AccountStatus::QuotaExhausted {
                match account.quota_exhausted_until {
                    Some(until) if until > now_ms => continue,
                    _ => {
                        account.status = AccountStatus::Active;
                        account.quota_exhausted_until = None;
                        if let Err(e) = self.store.upsert(account.clone()) {
                            warn!("failed to persist quota reset for {}: {}", account.id, e);
                        }
                        info!("quota window elapsed, account {} reactivated", account.email);
                    }
                }
            }
            eligible.push(account);
        }
        eligible
    }

    fn next_index(&self, len: usize) -> usize {
        let mut state = self.state.lock().unwrap();
        let idx = state.cursor % len;
        state.cursor = state.cursor.wrapping_add(1);
        idx
    }

    fn set_cooldown(&self, account_id: &str, now_ms: i64) {
        let until = now_ms + self.cooldown_ms;
        self.state
            .lock()
            .unwrap()
            .cooldowns
            .insert(account_id.to_string(), until);
    }

    fn mark_quota_exhausted(&self, account: &Account, message: &str) {
        let until = next_month_start_ms(self.quota_reset_utc);
        let mut updated = account.clone();
        updated.status = AccountStatus::QuotaExhausted;
        updated.quota_exhausted_until = Some(until);
        updated.last_error = Some(message.to_string());
        if let Err(e) = self.store.upsert(updated) {
            warn!("failed to persist quota exhaustion for {}: {}", account.id, e);
        }
        info!(
            "account {} quota exhausted until {} ({})",
            account.email,
            until,
            if self.quota_reset_utc { "utc" } else { "local" }
        );
    }

    fn record_error(&self, account: &Account, message: &str) {
        let mut updated = account.clone();
        updated.last_error = Some(message.to_string());
        if let Err(e) = self.store.upsert(updated) {
            warn!("failed to persist last error for {}: {}", account.id, e);
        }
    }

    /// Ensure the account's token is fresh within `threshold_secs`; persists
    /// refreshed credentials through the store and returns the updated account.
    async fn ensure_fresh(&self, mut account: Account, threshold_secs: i64) -> Result<Account, String> {
        if !account.credentials.needs_refresh(threshold_secs) {
            return Ok(account);
        }
        match self.refresher.refresh(&account.credentials).await {
            Ok(token) => {
                account.credentials.apply_refresh(&token);
                if let Err(e) = self.store.upsert(account.clone()) {
                    warn!("failed to persist refreshed token for {}: {}", account.id, e);
                }
                Ok(account)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Dispatch one translated request to the pool.
    ///
    /// Disposition per attempt: network / 400 abort the loop without
    /// penalizing anyone; 402 opens the month-long quota window and moves
    /// on; any other upstream status sets a cooldown and moves on; a
    /// refresh failure skips the account without a cooldown.
    pub async fn dispatch(
        &self,
        request: &ClaudeRequest,
        model_id: &str,
        trace_id: &str,
    ) -> Result<Served, DispatchError> {
        if request.messages.is_empty() {
            return Err(DispatchError::BadRequest("messages must not be empty".into()));
        }

        let now_ms = Utc::now().timestamp_millis();
        let eligible = self.eligible_accounts(now_ms);
        if eligible.is_empty() {
            return Err(DispatchError::NoHealthyAccounts);
        }

        let mut last_error: Option<DispatchError> = None;

        for _ in 0..eligible.len() {
            let idx = self.next_index(eligible.len());
            let account = eligible[idx].clone();

            let account = match self
                .ensure_fresh(account, self.refresh_before_expiry_secs)
                .await
            {
                Ok(acc) => acc,
                Err(msg) => {
                    warn!("[{}] refresh failed for {}: {}", trace_id, eligible[idx].email, msg);
                    // The backing credential file may have been rotated by
                    // the IDE; a reload makes the next attempt see it.
                    self.store.reload();
                    last_error = Some(DispatchError::Auth(msg));
                    continue;
                }
            };

            let conversation_id = uuid::Uuid::new_v4().to_string();
            let payload: Value = match build_kiro_payload(
                request,
                model_id,
                &conversation_id,
                account.credentials.auth_method,
                account.credentials.profile_arn.as_deref(),
            ) {
                Ok(p) => p,
                Err(TranslateError::EmptyMessages) => {
                    return Err(DispatchError::BadRequest(
                        "messages must not be empty".into(),
                    ));
                }
            };

            let adapter = KiroAdapter::for_account(&self.clients, &account);
            match adapter
                .send(&self.refresher, &account.credentials, model_id, &payload)
                .await
            {
                Ok(outcome) => {
                    let mut updated = account.clone();
                    if let Some(token) = &outcome.refreshed {
                        updated.credentials.apply_refresh(token);
                    }
                    updated.touch();
                    updated.last_error = None;
                    if let Err(e) = self.store.upsert(updated) {
                        warn!("failed to persist account state for {}: {}", account.id, e);
                    }
                    info!("[{}] serving via account {}", trace_id, account.email);
                    return Ok(Served {
                        response: outcome.response,
                        account_email: account.email,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    match err.status() {
                        None => {
                            // Local or network trouble: the account did not
                            // fail, so no cooldown and no failover.
                            warn!("[{}] local/network error: {}", trace_id, message);
                            return Err(DispatchError::Upstream {
                                status: None,
                                message,
                            });
                        }
                        Some(400) => {
                            warn!("[{}] request shape rejected upstream: {}", trace_id, message);
                            return Err(DispatchError::Upstream {
                                status: Some(400),
                                message,
                            });
                        }
                        Some(402) => {
                            self.mark_quota_exhausted(&account, &message);
                            last_error = Some(DispatchError::Upstream {
                                status: Some(402),
                                message,
                            });
                        }
                        Some(status) => {
                            warn!(
                                "[{}] upstream {} from {}, cooling down {}ms",
                                trace_id, status, account.email, self.cooldown_ms
                            );
                            self.set_cooldown(&account.id, Utc::now().timestamp_millis());
                            self.record_error(&account, &message);
                            last_error = Some(DispatchError::Upstream {
                                status: Some(status),
                                message,
                            });
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or(DispatchError::NoHealthyAccounts))
    }

    /// Refresh usage-limit snapshots for every account (admin surface).
    /// Runs with the wider background near-expiry threshold so tokens close
    /// to expiry get reconciled here rather than on the request path.
    pub async fn refresh_usage(&self) -> usize {
        let mut updated = 0;
        for account in self.store.list() {
            let account = match self.ensure_fresh(account, NEAR_EXPIRY_SECS).await {
                Ok(acc) => acc,
                Err(_) => continue,
            };
            let adapter = KiroAdapter::for_account(&self.clients, &account);
            match adapter
                .fetch_usage_limits(&account.credentials.access_token)
                .await
            {
                Ok(limits) => {
                    self.usage_cache
                        .lock()
                        .unwrap()
                        .insert(account.id.clone(), limits);
                    updated += 1;
                }
                Err(e) => warn!("usage query failed for {}: {}", account.email, e),
            }
        }
        updated
    }

    pub fn cached_usage(&self, account_id: &str) -> Option<UsageLimits> {
        self.usage_cache.lock().unwrap().get(account_id).copied()
    }

    /// Remove an account's client pool and cooldown entry (after deletion).
    pub fn forget_account(&self, account_id: &str) {
        self.clients.evict(account_id);
        self.state.lock().unwrap().cooldowns.remove(account_id);
        self.usage_cache.lock().unwrap().remove(account_id);
    }

    #[cfg(test)]
    fn cooldown_remaining(&self, account_id: &str, now_ms: i64) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .cooldowns
            .get(account_id)
            .map(|until| until - now_ms)
    }
}
