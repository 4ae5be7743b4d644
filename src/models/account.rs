use chrono::{Datelike, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::types::Credentials;

/// Pool-visible state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    QuotaExhausted,
    Error,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::QuotaExhausted => "quota_exhausted",
            AccountStatus::Error => "error",
            AccountStatus::Disabled => "disabled",
        }
    }
}

/// One pooled Kiro account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub credentials: Credentials,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Absolute milliseconds; set when upstream answers 402.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_exhausted_until: Option<i64>,
    pub created_at: i64,
    pub last_used: i64,
}

impl Account {
    pub fn new(id: String, email: String, credentials: Credentials) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id,
            email,
            credentials,
            status: AccountStatus::Active,
            last_error: None,
            quota_exhausted_until: None,
            created_at: now,
            last_used: now,
        }
    }

    /// An account can serve traffic only with a refresh token and a
    /// non-disabled status; quota windows are checked by the dispatcher.
    pub fn is_usable(&self) -> bool {
        self.credentials.is_usable() && self.status != AccountStatus::Disabled
    }

    pub fn touch(&mut self) {
        self.last_used = Utc::now().timestamp();
    }
}

fn next_year_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// First millisecond of the next calendar month, in the local zone by default
/// or UTC when `use_utc` is set. Used as the quota-exhaustion deadline after
/// an upstream 402.
pub fn next_month_start_ms(use_utc: bool) -> i64 {
    if use_utc {
        let now = Utc::now();
        let (y, m) = next_year_month(now.year(), now.month());
        Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0)
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| now.timestamp_millis())
    } else {
        let now = Local::now();
        let (y, m) = next_year_month(now.year(), now.month());
        Local
            .with_ymd_and_hms(y, m, 1, 0, 0, 0)
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| now.timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    fn account() -> Account {
        Account::new(
            "acc_1".into(),
            "user@example.com".into(),
            Credentials {
                refresh_token: "rt".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&AccountStatus::QuotaExhausted).unwrap(),
            "\"quota_exhausted\""
        );
        let s: AccountStatus = serde_json::from_str("\"disabled\"").unwrap();
        assert_eq!(s, AccountStatus::Disabled);
    }

    #[test]
    fn test_new_account_is_active_and_usable() {
        let acc = account();
        assert_eq!(acc.status, AccountStatus::Active);
        assert!(acc.is_usable());
        assert!(acc.last_error.is_none());
        assert!(acc.quota_exhausted_until.is_none());
    }

    #[test]
    fn test_disabled_account_not_usable() {
        let mut acc = account();
        acc.status = AccountStatus::Disabled;
        assert!(!acc.is_usable());
    }

    #[test]
    fn test_account_without_refresh_token_not_usable() {
        let mut acc = account();
        acc.credentials.refresh_token.clear();
        assert!(!acc.is_usable());
    }

    #[test]
    fn test_next_month_start_is_in_the_future() {
        let now_ms = Utc::now().timestamp_millis();
        assert!(next_month_start_ms(true) > now_ms);
        assert!(next_month_start_ms(false) > now_ms);
    }

    #[test]
    fn test_next_month_start_utc_is_month_boundary() {
        let ms = next_month_start_ms(true);
        let dt = Utc.timestamp_millis_opt(ms).single().unwrap();
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.hour(), 0);
        assert_eq!(dt.minute(), 0);
        // Within ~32 days of now.
        assert!(dt - Utc::now() <= Duration::days(32));
    }

    #[test]
    fn test_next_year_month_rollover() {
        assert_eq!(next_year_month(2025, 12), (2026, 1));
        assert_eq!(next_year_month(2025, 7), (2025, 8));
    }

    #[test]
    fn test_account_serde_roundtrip() {
        let mut acc = account();
        acc.status = AccountStatus::QuotaExhausted;
        acc.quota_exhausted_until = Some(1_900_000_000_000);
        let json = serde_json::to_string(&acc).unwrap();
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, AccountStatus::QuotaExhausted);
        assert_eq!(back.quota_exhausted_until, Some(1_900_000_000_000));
        assert_eq!(back.email, "user@example.com");
    }
}
