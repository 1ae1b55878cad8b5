//! Credits, monthly free-edit quota and the gate that meters edits against them.
//!
//! Accounting follows one rule: pre-check before the operation runs, charge only after it
//! succeeds. A failed or blocked operation never changes the entitlement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::foundation::error::{StudioError, StudioResult};

pub const FREE_TIER_EDIT_LIMIT: u32 = 15;
pub const FREE_TIER_STARTING_CREDITS: u32 = 5;

const KEY_SESSION: &str = "retouch-session";
const KEY_IS_PRO: &str = "retouch-isPro";
const KEY_CREDITS: &str = "retouch-credits";
const KEY_MONTHLY_EDITS: &str = "retouch-monthlyEdits";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Entitlement {
    pub is_pro: bool,
    pub credits: u32,
    pub monthly_edits: u32,
}

/// Which budget an operation draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationValue {
    /// Counts against the monthly free-edit quota.
    Standard,
    /// Costs one credit.
    HighValue,
}

/// Shown instead of running an operation the user is not entitled to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradePrompt {
    pub title: String,
    pub message: String,
}

impl UpgradePrompt {
    pub fn out_of_credits() -> Self {
        Self {
            title: "Out of Credits".to_string(),
            message: "This is a premium feature that requires credits. Purchase a credit pack \
                      or upgrade to Pro for unlimited access."
                .to_string(),
        }
    }

    pub fn monthly_limit(limit: u32) -> Self {
        Self {
            title: "Monthly Limit Reached".to_string(),
            message: format!(
                "You've used all your {limit} free edits for this month. Upgrade to Pro for \
                 unlimited edits or purchase credits."
            ),
        }
    }
}

/// String key/value persistence for account state.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> StudioResult<()>;
    fn remove(&mut self, key: &str) -> StudioResult<()>;

    fn flush(&mut self) -> StudioResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    map: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            map: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> StudioResult<()> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> StudioResult<()> {
        self.map.remove(key);
        Ok(())
    }
}

/// A JSON object of strings on disk, rewritten on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    map: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> StudioResult<Self> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read account store {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse account store {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> StudioResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&self.map).context("serialize account store")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("write account store {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> StudioResult<()> {
        self.map.insert(key.to_string(), value.to_string());
        self.write()
    }

    fn remove(&mut self, key: &str) -> StudioResult<()> {
        if self.map.remove(key).is_some() {
            self.write()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> StudioResult<()> {
        self.write()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccountLimits {
    pub free_edit_limit: u32,
    pub starting_credits: u32,
}

impl Default for AccountLimits {
    fn default() -> Self {
        Self {
            free_edit_limit: FREE_TIER_EDIT_LIMIT,
            starting_credits: FREE_TIER_STARTING_CREDITS,
        }
    }
}

/// Signed-in state and entitlement, backed by a [`KeyValueStore`].
///
/// The store is read once in [`AccountContext::init`]; every later mutation writes through.
pub struct AccountContext {
    store: Box<dyn KeyValueStore>,
    limits: AccountLimits,
    signed_in: bool,
    entitlement: Entitlement,
}

impl std::fmt::Debug for AccountContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountContext")
            .field("limits", &self.limits)
            .field("signed_in", &self.signed_in)
            .field("entitlement", &self.entitlement)
            .finish_non_exhaustive()
    }
}

impl AccountContext {
    #[tracing::instrument(skip(store))]
    pub fn init(store: Box<dyn KeyValueStore>, limits: AccountLimits) -> StudioResult<Self> {
        let mut ctx = Self {
            store,
            limits,
            signed_in: false,
            entitlement: Entitlement::default(),
        };
        if ctx.store.get(KEY_SESSION).as_deref() == Some("true") {
            ctx.signed_in = true;
            ctx.load_entitlement();
        }
        tracing::debug!(signed_in = ctx.signed_in, entitlement = ?ctx.entitlement, "account loaded");
        Ok(ctx)
    }

    /// Flush and hand the store back.
    pub fn shutdown(mut self) -> StudioResult<Box<dyn KeyValueStore>> {
        self.store.flush()?;
        Ok(self.store)
    }

    pub fn entitlement(&self) -> Entitlement {
        self.entitlement
    }

    pub fn limits(&self) -> AccountLimits {
        self.limits
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    /// A first-ever sign-in (no credit balance stored yet) grants the starting credits.
    pub fn sign_in(&mut self) -> StudioResult<()> {
        let first = self.store.get(KEY_CREDITS).is_none();
        self.store.set(KEY_SESSION, "true")?;
        self.signed_in = true;
        self.load_entitlement();
        if first {
            self.set_credits(self.limits.starting_credits)?;
        }
        tracing::info!(first, credits = self.entitlement.credits, "signed in");
        Ok(())
    }

    /// Stored balances are kept for the next sign-in.
    pub fn sign_out(&mut self) -> StudioResult<()> {
        self.store.remove(KEY_SESSION)?;
        self.signed_in = false;
        self.entitlement = Entitlement::default();
        tracing::info!("signed out");
        Ok(())
    }

    pub fn purchase_pro(&mut self) -> StudioResult<()> {
        self.store.set(KEY_IS_PRO, "true")?;
        self.entitlement.is_pro = true;
        Ok(())
    }

    pub fn purchase_credits(&mut self, amount: u32) -> StudioResult<()> {
        if amount == 0 {
            return Err(StudioError::validation("credit purchase amount must be positive"));
        }
        self.set_credits(self.entitlement.credits.saturating_add(amount))
    }

    pub fn gate(&mut self) -> EntitlementGate<'_> {
        EntitlementGate { account: self }
    }

    fn load_entitlement(&mut self) {
        self.entitlement = Entitlement {
            is_pro: self.store.get(KEY_IS_PRO).as_deref() == Some("true"),
            credits: self.stored_count(KEY_CREDITS),
            monthly_edits: self.stored_count(KEY_MONTHLY_EDITS),
        };
    }

    fn stored_count(&self, key: &str) -> u32 {
        match self.store.get(key) {
            None => 0,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, raw = %raw, "ignoring malformed stored count");
                0
            }),
        }
    }

    fn set_credits(&mut self, credits: u32) -> StudioResult<()> {
        self.store.set(KEY_CREDITS, &credits.to_string())?;
        self.entitlement.credits = credits;
        Ok(())
    }

    fn set_monthly_edits(&mut self, edits: u32) -> StudioResult<()> {
        self.store.set(KEY_MONTHLY_EDITS, &edits.to_string())?;
        self.entitlement.monthly_edits = edits;
        Ok(())
    }
}

/// Proof that an operation passed the pre-check. Consumed by [`EntitlementGate::settle`].
#[must_use = "a passed pre-check must be settled once the operation succeeds"]
#[derive(Debug, PartialEq, Eq)]
pub struct GateTicket {
    value: OperationValue,
    metered: bool,
}

impl GateTicket {
    pub fn value(&self) -> OperationValue {
        self.value
    }
}

pub struct EntitlementGate<'a> {
    account: &'a mut AccountContext,
}

impl EntitlementGate<'_> {
    /// Refuse the operation up front when the budget it draws from is exhausted.
    pub fn precheck(&self, value: OperationValue) -> StudioResult<GateTicket> {
        let e = self.account.entitlement;
        if e.is_pro {
            return Ok(GateTicket {
                value,
                metered: false,
            });
        }
        let limit = self.account.limits.free_edit_limit;
        match value {
            OperationValue::HighValue if e.credits < 1 => {
                tracing::info!(?value, credits = e.credits, "blocked by entitlement gate");
                Err(StudioError::UpgradeRequired(UpgradePrompt::out_of_credits()))
            }
            OperationValue::Standard if e.monthly_edits >= limit => {
                tracing::info!(?value, monthly_edits = e.monthly_edits, "blocked by entitlement gate");
                Err(StudioError::UpgradeRequired(UpgradePrompt::monthly_limit(limit)))
            }
            _ => Ok(GateTicket {
                value,
                metered: true,
            }),
        }
    }

    /// Charge for a successful operation.
    pub fn settle(&mut self, ticket: GateTicket) -> StudioResult<()> {
        if !ticket.metered || self.account.entitlement.is_pro {
            return Ok(());
        }
        let e = self.account.entitlement;
        match ticket.value {
            OperationValue::HighValue => {
                self.account.set_credits(e.credits.saturating_sub(1))?;
            }
            OperationValue::Standard => {
                let limit = self.account.limits.free_edit_limit;
                self.account
                    .set_monthly_edits(e.monthly_edits.saturating_add(1).min(limit))?;
            }
        }
        tracing::debug!(value = ?ticket.value, entitlement = ?self.account.entitlement, "charged");
        Ok(())
    }

    /// Pre-check, run `op`, and charge only if it succeeded.
    pub fn run<T>(
        &mut self,
        value: OperationValue,
        op: impl FnOnce() -> StudioResult<T>,
    ) -> StudioResult<T> {
        let ticket = self.precheck(value)?;
        let out = op()?;
        self.settle(ticket)?;
        Ok(out)
    }
}
