//! Persistence store (C2): atomic read/modify/write of the four JSON
//! collections the engine owns.
//!
//! One `tokio::sync::RwLock<Vec<T>>` per collection. All mutation goes
//! through `Store::mutate_*`, which takes the write lock for the whole
//! operation (read, apply, atomically replace the file) so there is no
//! separate read step to race against. A write failure leaves the
//! in-memory collection untouched — the caller sees the error and the
//! lock content reflects the last successfully persisted state
//! (reload-on-failure discipline).
//!
//! A corrupt file at load time fails closed: `Store::load` returns
//! `CorruptStateError` rather than silently falling back to an empty
//! collection. The operator must intervene.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use ovh_schemas::{Account, HistoryStatus, PurchaseHistoryEntry, QueueTask, Subscription, HISTORY_SOFT_CAP};

/// Raised when a persisted collection file exists but fails to parse.
/// Boot must fail closed rather than silently default.
#[derive(Debug)]
pub struct CorruptStateError {
    pub path: PathBuf,
    pub source: serde_json::Error,
}

impl fmt::Display for CorruptStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "corrupt state file {}: {} (operator must restore or repair)",
            self.path.display(),
            self.source
        )
    }
}

impl std::error::Error for CorruptStateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Serialize, serde::Deserialize, Default)]
struct AccountsFile {
    accounts: Vec<Account>,
}

#[derive(Serialize, serde::Deserialize, Default)]
struct QueueFile {
    tasks: Vec<QueueTask>,
}

#[derive(Serialize, serde::Deserialize, Default)]
struct HistoryFile {
    entries: Vec<PurchaseHistoryEntry>,
}

#[derive(Serialize, serde::Deserialize, Default)]
struct SubscriptionsFile {
    subscriptions: Vec<Subscription>,
}

/// Loads a JSON file into `T`, fails closed (`CorruptStateError`) on parse
/// error, and returns `T::default()` (via an empty wrapper) if the file
/// does not exist yet.
fn load_or_init<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).map_err(|source| {
        anyhow::Error::new(CorruptStateError {
            path: path.to_path_buf(),
            source,
        })
    })
}

/// Write-temp-then-rename, UTF-8 JSON, pretty-printed (2-space indent).
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create_dir_all {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("serialize collection")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).with_context(|| format!("write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// A per-id advisory lock keyed by uuid, lazily created. Used by the
/// scheduler/monitor for non-blocking `try_lock`; distinct from the
/// collection-level `RwLock`, which guards file I/O only.
#[derive(Default)]
struct IdLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl IdLocks {
    async fn get(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

pub struct Store {
    data_dir: PathBuf,
    accounts: RwLock<Vec<Account>>,
    queue: RwLock<Vec<QueueTask>>,
    history: RwLock<Vec<PurchaseHistoryEntry>>,
    subscriptions: RwLock<Vec<Subscription>>,
    task_locks: IdLocks,
    subscription_locks: IdLocks,
}

impl Store {
    fn accounts_path(dir: &Path) -> PathBuf {
        dir.join("accounts.json")
    }
    fn queue_path(dir: &Path) -> PathBuf {
        dir.join("queue.json")
    }
    fn history_path(dir: &Path) -> PathBuf {
        dir.join("history.json")
    }
    fn subscriptions_path(dir: &Path) -> PathBuf {
        dir.join("subscriptions.json")
    }

    /// Loads every collection from `data_dir`, failing closed on a corrupt
    /// file. Missing files are treated as empty collections.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("create_dir_all {}", data_dir.display()))?;

        let accounts: AccountsFile = load_or_init(&Self::accounts_path(&data_dir))?;
        let queue: QueueFile = load_or_init(&Self::queue_path(&data_dir))?;
        let history: HistoryFile = load_or_init(&Self::history_path(&data_dir))?;
        let subscriptions: SubscriptionsFile = load_or_init(&Self::subscriptions_path(&data_dir))?;

        tracing::info!(
            accounts = accounts.accounts.len(),
            tasks = queue.tasks.len(),
            history = history.entries.len(),
            subscriptions = subscriptions.subscriptions.len(),
            "store loaded"
        );

        Ok(Self {
            data_dir,
            accounts: RwLock::new(accounts.accounts),
            queue: RwLock::new(queue.tasks),
            history: RwLock::new(history.entries),
            subscriptions: RwLock::new(subscriptions.subscriptions),
            task_locks: IdLocks::default(),
            subscription_locks: IdLocks::default(),
        })
    }

    // -- accounts -----------------------------------------------------

    pub async fn accounts_snapshot(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    pub async fn find_account(&self, id: &str) -> Option<Account> {
        self.accounts.read().await.iter().find(|a| a.id == id).cloned()
    }

    pub async fn mutate_accounts<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<Account>) -> Result<R>,
    {
        let mut guard = self.accounts.write().await;
        let mut copy = guard.clone();
        let result = f(&mut copy)?;
        atomic_write_json(&Self::accounts_path(&self.data_dir), &AccountsFile { accounts: copy.clone() })?;
        *guard = copy;
        Ok(result)
    }

    // -- queue ----------------------------------------------------------

    pub async fn queue_snapshot(&self) -> Vec<QueueTask> {
        self.queue.read().await.clone()
    }

    pub async fn find_task(&self, id: Uuid) -> Option<QueueTask> {
        self.queue.read().await.iter().find(|t| t.id == id).cloned()
    }

    pub async fn mutate_queue<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<QueueTask>) -> Result<R>,
    {
        let mut guard = self.queue.write().await;
        let mut copy = guard.clone();
        let result = f(&mut copy)?;
        atomic_write_json(&Self::queue_path(&self.data_dir), &QueueFile { tasks: copy.clone() })?;
        *guard = copy;
        Ok(result)
    }

    pub async fn task_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.task_locks.get(id).await
    }

    // -- history ----------------------------------------------------------

    pub async fn history_snapshot(&self) -> Vec<PurchaseHistoryEntry> {
        self.history.read().await.clone()
    }

    /// Appends one entry, trimming the oldest entries past `HISTORY_SOFT_CAP`.
    pub async fn append_history(&self, entry: PurchaseHistoryEntry) -> Result<()> {
        let mut guard = self.history.write().await;
        let mut copy = guard.clone();
        copy.push(entry);
        if copy.len() > HISTORY_SOFT_CAP {
            let excess = copy.len() - HISTORY_SOFT_CAP;
            copy.drain(0..excess);
        }
        atomic_write_json(&Self::history_path(&self.data_dir), &HistoryFile { entries: copy.clone() })?;
        *guard = copy;
        Ok(())
    }

    pub async fn clear_history(&self, scope: impl Fn(&PurchaseHistoryEntry) -> bool) -> Result<()> {
        let mut guard = self.history.write().await;
        let copy: Vec<PurchaseHistoryEntry> = guard.iter().filter(|e| !scope(e)).cloned().collect();
        atomic_write_json(&Self::history_path(&self.data_dir), &HistoryFile { entries: copy.clone() })?;
        *guard = copy;
        Ok(())
    }

    // -- subscriptions ----------------------------------------------------

    pub async fn subscriptions_snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.read().await.clone()
    }

    pub async fn find_subscription(&self, id: Uuid) -> Option<Subscription> {
        self.subscriptions.read().await.iter().find(|s| s.id == id).cloned()
    }

    pub async fn mutate_subscriptions<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<Subscription>) -> Result<R>,
    {
        let mut guard = self.subscriptions.write().await;
        let mut copy = guard.clone();
        let result = f(&mut copy)?;
        atomic_write_json(
            &Self::subscriptions_path(&self.data_dir),
            &SubscriptionsFile { subscriptions: copy.clone() },
        )?;
        *guard = copy;
        Ok(result)
    }

    pub async fn subscription_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.subscription_locks.get(id).await
    }
}

/// Count of history entries with `status == Success`, used by `/stats`.
pub fn count_success(history: &[PurchaseHistoryEntry]) -> usize {
    history.iter().filter(|e| e.status == HistoryStatus::Success).count()
}
