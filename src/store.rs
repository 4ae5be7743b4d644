use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::types::{ClientRegistration, Credentials};
use crate::models::account::Account;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("account not found: {0}")]
    NotFound(String),
}

/// Injected persistence boundary for the account pool. The dispatcher only
/// reads snapshots and requests updates; it never mutates records in place.
/// Updates are idempotent per account id.
pub trait AccountStore: Send + Sync {
    fn list(&self) -> Vec<Account>;
    fn get(&self, id: &str) -> Option<Account>;
    fn upsert(&self, account: Account) -> Result<(), StoreError>;
    fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Re-read any external credential source backing this store. Called by
    /// the dispatcher after a failed refresh, since the Kiro IDE may have
    /// rotated the tokens on disk independently. Default: nothing to do.
    fn reload(&self) {}
}

/// File-backed store persisting the whole pool as one JSON array.
///
/// In standalone daemon mode (no pre-existing accounts file) it seeds itself
/// from a single `kiro-auth-token.json` plus an optional client-identifier
/// JSON, the way Kiro lays credentials out under `~/.aws/sso/cache`.
pub struct JsonFileStore {
    path: PathBuf,
    accounts: RwLock<Vec<Account>>,
    standalone: RwLock<Option<StandaloneSource>>,
}

/// Where a standalone-mode account was seeded from.
struct StandaloneSource {
    account_id: String,
    token_file: PathBuf,
}

impl JsonFileStore {
    pub fn load_or_create(path: PathBuf) -> Result<Self, StoreError> {
        let accounts = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Vec<Account>>(&content) {
                Ok(list) => list,
                Err(e) => {
                    warn!("accounts file {} is unreadable: {}", path.display(), e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        info!(
            "account store at {}: {} account(s)",
            path.display(),
            accounts.len()
        );
        Ok(Self {
            path,
            accounts: RwLock::new(accounts),
            standalone: RwLock::new(None),
        })
    }

    /// Seed a single account from a Kiro token file and an optional
    /// client-identifier file. No-op when the store already has accounts.
    pub fn bootstrap_standalone(
        &self,
        token_file: &Path,
        client_file: Option<&Path>,
    ) -> Result<bool, StoreError> {
        if !self.accounts.read().unwrap().is_empty() {
            return Ok(false);
        }
        if !token_file.exists() {
            return Ok(false);
        }

        let content = std::fs::read_to_string(token_file)?;
        let raw: Value = serde_json::from_str(&content)?;
        let mut credentials: Credentials = serde_json::from_value(raw.clone())?;

        if let Some(client_path) = client_file {
            if client_path.exists() {
                let client_content = std::fs::read_to_string(client_path)?;
                match serde_json::from_str::<ClientRegistration>(&client_content) {
                    Ok(reg) => {
                        if credentials.client_id.is_none() {
                            credentials.client_id = reg.client_id;
                        }
                        if credentials.client_secret.is_none() {
                            credentials.client_secret = reg.client_secret;
                        }
                        if let Some(region) = reg.region {
                            credentials.region = region;
                        }
                    }
                    Err(e) => warn!(
                        "client-identifier file {} is unreadable: {}",
                        client_path.display(),
                        e
                    ),
                }
            }
        }

        let email = raw
            .get("email")
            .and_then(|v| v.as_str())
            .unwrap_or("local@kiro")
            .to_string();
        let account = Account::new(uuid::Uuid::new_v4().to_string(), email, credentials);

        info!(
            "bootstrapped standalone account {} from {}",
            account.email,
            token_file.display()
        );
        *self.standalone.write().unwrap() = Some(StandaloneSource {
            account_id: account.id.clone(),
            token_file: token_file.to_path_buf(),
        });
        self.upsert(account)?;
        Ok(true)
    }

    fn persist(&self, accounts: &[Account]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(accounts)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl AccountStore for JsonFileStore {
    fn list(&self) -> Vec<Account> {
        self.accounts.read().unwrap().clone()
    }

    fn get(&self, id: &str) -> Option<Account> {
        self.accounts
            .read()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    fn upsert(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().unwrap();
        match accounts.iter_mut().find(|a| a.id == account.id) {
            Some(slot) => *slot = account,
            None => accounts.push(account),
        }
        self.persist(&accounts)
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().unwrap();
        let before = accounts.len();
        accounts.retain(|a| a.id != id);
        if accounts.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.persist(&accounts)
    }

    /// Standalone mode: the IDE may rotate the token file under us, so pick
    /// up whatever refresh material it wrote since the last read.
    fn reload(&self) {
        let (account_id, token_file) = {
            let standalone = self.standalone.read().unwrap();
            let Some(source) = standalone.as_ref() else {
                return;
            };
            (source.account_id.clone(), source.token_file.clone())
        };

        let Ok(content) = std::fs::read_to_string(&token_file) else {
            return;
        };
        let Ok(fresh) = serde_json::from_str::<Credentials>(&content) else {
            warn!("token file {} no longer parses", token_file.display());
            return;
        };
        if !fresh.is_usable() {
            return;
        }

        let mut accounts = self.accounts.write().unwrap();
        if let Some(account) = accounts.iter_mut().find(|a| a.id == account_id) {
            // Preserve imported client identity; the token file only rotates
            // the token pair.
            let client_id = account.credentials.client_id.clone();
            let client_secret = account.credentials.client_secret.clone();
            account.credentials = fresh;
            if account.credentials.client_id.is_none() {
                account.credentials.client_id = client_id;
            }
            if account.credentials.client_secret.is_none() {
                account.credentials.client_secret = client_secret;
            }
            info!("reloaded standalone credentials from {}", token_file.display());
        }
        let snapshot = accounts.clone();
        drop(accounts);
        if let Err(e) = self.persist(&snapshot) {
            warn!("failed to persist reloaded credentials: {}", e);
        }
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::AccountStatus;
    use std::io::Write;

    fn temp_store() -> (tempfile::TempDir, JsonFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::load_or_create(dir.path().join("accounts.json")).unwrap();
        (dir, store)
    }

    fn sample_account(id: &str) -> Account {
        Account::new(
            id.to_string(),
            format!("{id}@example.com"),
            Credentials {
                refresh_token: "rt".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_empty_store() {
        let (_dir, store) = temp_store();
        assert!(store.list().is_empty());
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_upsert_and_get() {
        let (_dir, store) = temp_store();
        store.upsert(sample_account("a1")).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("a1").unwrap().email, "a1@example.com");
    }

    #[test]
    fn test_upsert_is_idempotent_per_id() {
        let (_dir, store) = temp_store();
        store.upsert(sample_account("a1")).unwrap();
        let mut updated = sample_account("a1");
        updated.status = AccountStatus::QuotaExhausted;
        store.upsert(updated).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("a1").unwrap().status, AccountStatus::QuotaExhausted);
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = temp_store();
        store.upsert(sample_account("a1")).unwrap();
        store.remove("a1").unwrap();
        assert!(store.list().is_empty());
        assert!(matches!(store.remove("a1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        {
            let store = JsonFileStore::load_or_create(path.clone()).unwrap();
            store.upsert(sample_account("a1")).unwrap();
            store.upsert(sample_account("a2")).unwrap();
        }
        let reloaded = JsonFileStore::load_or_create(path).unwrap();
        assert_eq!(reloaded.list().len(), 2);
        assert!(reloaded.get("a2").is_some());
    }

    #[test]
    fn test_bootstrap_standalone_with_client_file() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("kiro-auth-token.json");
        let client_path = dir.path().join("client.json");

        let mut tf = std::fs::File::create(&token_path).unwrap();
        tf.write_all(
            br#"{"accessToken":"at","refreshToken":"rt","authMethod":"IdC","email":"boot@example.com"}"#,
        )
        .unwrap();
        let mut cf = std::fs::File::create(&client_path).unwrap();
        cf.write_all(br#"{"clientId":"cid","clientSecret":"cs","region":"eu-west-1"}"#)
            .unwrap();

        let store = JsonFileStore::load_or_create(dir.path().join("accounts.json")).unwrap();
        let seeded = store
            .bootstrap_standalone(&token_path, Some(&client_path))
            .unwrap();
        assert!(seeded);

        let accounts = store.list();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].email, "boot@example.com");
        assert_eq!(accounts[0].credentials.client_id.as_deref(), Some("cid"));
        assert_eq!(accounts[0].credentials.region, "eu-west-1");
    }

    #[test]
    fn test_bootstrap_skipped_when_accounts_exist() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("kiro-auth-token.json");
        std::fs::write(&token_path, br#"{"refreshToken":"rt"}"#).unwrap();

        let store = JsonFileStore::load_or_create(dir.path().join("accounts.json")).unwrap();
        store.upsert(sample_account("a1")).unwrap();
        let seeded = store.bootstrap_standalone(&token_path, None).unwrap();
        assert!(!seeded);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_bootstrap_missing_token_file() {
        let (_dir, store) = temp_store();
        let seeded = store
            .bootstrap_standalone(Path::new("/tmp/nonexistent-kiro-token-42.json"), None)
            .unwrap();
        assert!(!seeded);
    }

    #[test]
    fn test_reload_picks_up_rotated_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("kiro-auth-token.json");
        std::fs::write(
            &token_path,
            br#"{"accessToken":"at_old","refreshToken":"rt_old","clientId":"cid"}"#,
        )
        .unwrap();

        let store = JsonFileStore::load_or_create(dir.path().join("accounts.json")).unwrap();
        assert!(store.bootstrap_standalone(&token_path, None).unwrap());

        // IDE rotates the pair; the new file drops the client identity.
        std::fs::write(
            &token_path,
            br#"{"accessToken":"at_new","refreshToken":"rt_new"}"#,
        )
        .unwrap();
        store.reload();

        let account = &store.list()[0];
        assert_eq!(account.credentials.access_token, "at_new");
        assert_eq!(account.credentials.refresh_token, "rt_new");
        // Imported client identity survives the rotation.
        assert_eq!(account.credentials.client_id.as_deref(), Some("cid"));
    }

    #[test]
    fn test_reload_is_noop_without_standalone_source() {
        let (_dir, store) = temp_store();
        store.upsert(sample_account("a1")).unwrap();
        store.reload();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("a1").unwrap().credentials.refresh_token, "rt");
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/tmp/x.json"), PathBuf::from("/tmp/x.json"));
    }

    #[test]
    fn test_expand_path_tilde() {
        let p = expand_path("~/x.json");
        assert!(!p.to_str().unwrap().starts_with('~'));
        assert!(p.to_str().unwrap().ends_with("x.json"));
    }
}
