//! Read-only account and organization directory.
//!
//! Account management lives outside the gateway; this module only loads the
//! records it needs to route a question. Accounts are indexed by email and,
//! secondarily, by organization id so per-organization lookups never scan
//! every account.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{info, warn};

use askgate_core::error::Result;
use askgate_core::types::{Account, Organization};

use crate::fs::read_json;

/// Lookups the ask pipeline needs from the account system.
#[async_trait]
pub trait AccountLookup: Send + Sync {
    /// Resolve an account by email. `Ok(None)` when it does not exist.
    async fn find_account(&self, email: &str) -> Result<Option<Account>>;

    /// The credential an organization serves retrieval requests with.
    async fn serving_credential(&self, organization_id: &str) -> Result<Option<String>>;
}

#[derive(Default)]
struct Indexes {
    by_email: HashMap<String, Account>,
    by_organization: BTreeMap<String, BTreeSet<String>>,
    organizations: HashMap<String, Organization>,
}

/// In-memory directory loaded from `accounts.json` and `organizations.json`.
#[derive(Default)]
pub struct AccountDirectory {
    inner: RwLock<Indexes>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from already-loaded records.
    pub fn from_records(accounts: Vec<Account>, organizations: Vec<Organization>) -> Self {
        let dir = Self::new();
        for org in organizations {
            dir.upsert_organization(org);
        }
        for account in accounts {
            dir.upsert_account(account);
        }
        dir
    }

    /// Load `root/accounts.json` and `root/organizations.json`.
    ///
    /// Missing files yield an empty directory; malformed files are an error.
    pub async fn load(root: &Path) -> Result<Self> {
        let accounts: Vec<Account> = read_json(&root.join("accounts.json"))
            .await?
            .unwrap_or_else(|| {
                warn!(dir = %root.display(), "No accounts.json found; directory is empty");
                Vec::new()
            });
        let organizations: Vec<Organization> = read_json(&root.join("organizations.json"))
            .await?
            .unwrap_or_default();

        info!(
            accounts = accounts.len(),
            organizations = organizations.len(),
            "Account directory loaded"
        );
        Ok(Self::from_records(accounts, organizations))
    }

    /// Insert or replace an account, keeping the organization index in step.
    pub fn upsert_account(&self, account: Account) {
        let mut idx = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let key = email_key(&account.email);

        if let Some(previous) = idx.by_email.get(&key).and_then(|a| a.organization_id.clone()) {
            if let Some(members) = idx.by_organization.get_mut(&previous) {
                members.remove(&key);
                if members.is_empty() {
                    idx.by_organization.remove(&previous);
                }
            }
        }
        if let Some(org) = &account.organization_id {
            idx.by_organization
                .entry(org.clone())
                .or_default()
                .insert(key.clone());
        }
        idx.by_email.insert(key, account);
    }

    pub fn upsert_organization(&self, organization: Organization) {
        let mut idx = self.inner.write().unwrap_or_else(|e| e.into_inner());
        idx.organizations.insert(organization.id.clone(), organization);
    }

    /// All accounts belonging to `organization_id`, ordered by email.
    pub fn accounts_for_organization(&self, organization_id: &str) -> Vec<Account> {
        let idx = self.inner.read().unwrap_or_else(|e| e.into_inner());
        idx.by_organization
            .get(organization_id)
            .map(|emails| {
                emails
                    .iter()
                    .filter_map(|e| idx.by_email.get(e).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.by_email.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountLookup for AccountDirectory {
    async fn find_account(&self, email: &str) -> Result<Option<Account>> {
        let idx = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(idx.by_email.get(&email_key(email)).cloned())
    }

    async fn serving_credential(&self, organization_id: &str) -> Result<Option<String>> {
        let idx = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(idx
            .organizations
            .get(organization_id)
            .and_then(|o| o.serving_credential.clone())
            .filter(|c| !c.trim().is_empty()))
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}
