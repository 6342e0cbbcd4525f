// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Owner-scoped background work.
//!
//! Every spawned unit gets a [`CancellationToken`] derived from its owner's
//! token, which is itself a child of the registry root. Cancelling an owner
//! stops its tasks and idle timers and clears its pending-reflection counter
//! without touching other owners.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tessera_config::TasksConfig;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct OwnerTasks {
    token: CancellationToken,
    tasks: HashMap<u64, JoinHandle<()>>,
    pending_reflection: u32,
}

struct IdleTimer {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of in-flight background tasks and idle timers.
pub struct TaskRegistry {
    root: CancellationToken,
    owners: DashMap<String, OwnerTasks>,
    timers: DashMap<(String, String), IdleTimer>,
    next_id: AtomicU64,
    idle_timeout: Duration,
    reflection_threshold: u32,
}

impl TaskRegistry {
    pub fn new(config: &TasksConfig) -> Arc<Self> {
        Arc::new(Self {
            root: CancellationToken::new(),
            owners: DashMap::new(),
            timers: DashMap::new(),
            next_id: AtomicU64::new(1),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            reflection_threshold: config.reflection_threshold.max(1),
        })
    }

    fn owner_entry(&self, owner: &str) -> dashmap::mapref::one::RefMut<'_, String, OwnerTasks> {
        self.owners
            .entry(owner.to_string())
            .or_insert_with(|| OwnerTasks {
                token: self.root.child_token(),
                tasks: HashMap::new(),
                pending_reflection: 0,
            })
    }

    /// Token that is cancelled when `owner` is cancelled or the registry shuts down.
    pub fn owner_token(&self, owner: &str) -> CancellationToken {
        self.owner_entry(owner).token.clone()
    }

    /// Spawn a unit of work for `owner`.
    ///
    /// `make` receives the task's cancellation token. The task is registered
    /// before it starts and deregisters itself when it finishes.
    pub fn spawn<F, Fut>(self: &Arc<Self>, owner: &str, make: F) -> u64
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.owner_token(owner).child_token();
        let work = make(token.clone());
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let registry = Arc::downgrade(self);
        let owner_key = owner.to_string();

        let handle = tokio::spawn(async move {
            if gate_rx.await.is_err() {
                return;
            }
            tokio::select! {
                _ = token.cancelled() => debug!(owner = %owner_key, task_id = id, "task cancelled"),
                _ = work => {}
            }
            finish(&registry, &owner_key, id);
        });

        self.owner_entry(owner).tasks.insert(id, handle);
        let _ = gate_tx.send(());
        id
    }

    /// Run `f` after the idle timeout unless another call for the same
    /// `(owner, session)` replaces it first.
    pub fn schedule_idle<F, Fut>(self: &Arc<Self>, owner: &str, session: &str, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = (owner.to_string(), session.to_string());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.owner_token(owner).child_token();
        let timeout = self.idle_timeout;
        let registry = Arc::downgrade(self);
        let timer_key = key.clone();
        let timer_token = token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
            if let Some(reg) = registry.upgrade() {
                reg.timers.remove_if(&timer_key, |_, t| t.id == id);
            }
            tokio::select! {
                _ = timer_token.cancelled() => {}
                _ = f() => {}
            }
        });

        if let Some(previous) = self.timers.insert(key, IdleTimer { id, token, handle }) {
            previous.token.cancel();
            previous.handle.abort();
            debug!(owner, session, "idle timer replaced");
        }
    }

    /// Drop the idle timer of one session, if any.
    pub fn cancel_idle(&self, owner: &str, session: &str) -> bool {
        match self.timers.remove(&(owner.to_string(), session.to_string())) {
            Some((_, timer)) => {
                timer.token.cancel();
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Count `n` new memories for `owner`. Returns true once the pending count
    /// reaches the reflection threshold.
    pub fn note_new_memories(&self, owner: &str, n: u32) -> bool {
        let mut entry = self.owner_entry(owner);
        entry.pending_reflection = entry.pending_reflection.saturating_add(n);
        entry.pending_reflection >= self.reflection_threshold
    }

    /// Read and reset the pending-reflection counter.
    pub fn take_pending(&self, owner: &str) -> u32 {
        self.owners
            .get_mut(owner)
            .map(|mut e| std::mem::take(&mut e.pending_reflection))
            .unwrap_or(0)
    }

    pub fn pending(&self, owner: &str) -> u32 {
        self.owners
            .get(owner)
            .map(|e| e.pending_reflection)
            .unwrap_or(0)
    }

    pub fn reflection_due(&self, owner: &str) -> bool {
        self.pending(owner) >= self.reflection_threshold
    }

    pub fn active_tasks(&self, owner: &str) -> usize {
        self.owners.get(owner).map(|e| e.tasks.len()).unwrap_or(0)
    }

    pub fn idle_timers(&self, owner: &str) -> usize {
        self.timers.iter().filter(|t| t.key().0 == owner).count()
    }

    /// Cancel every task and idle timer of `owner` and reset its counters.
    /// Returns the number of tasks that were still registered.
    pub fn cancel_owner(&self, owner: &str) -> usize {
        let cancelled = match self.owners.remove(owner) {
            Some((_, entry)) => {
                entry.token.cancel();
                for handle in entry.tasks.values() {
                    handle.abort();
                }
                entry.tasks.len()
            }
            None => 0,
        };
        self.timers.retain(|(o, _), timer| {
            if o == owner {
                timer.token.cancel();
                timer.handle.abort();
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            info!(owner, cancelled, "owner tasks cancelled");
        }
        cancelled
    }

    /// Cancel everything.
    pub fn shutdown(&self) {
        self.root.cancel();
        for entry in self.owners.iter() {
            for handle in entry.tasks.values() {
                handle.abort();
            }
        }
        for timer in self.timers.iter() {
            timer.handle.abort();
        }
        self.owners.clear();
        self.timers.clear();
        debug!("task registry shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

fn finish(registry: &Weak<TaskRegistry>, owner: &str, id: u64) {
    if let Some(reg) = registry.upgrade()
        && let Some(mut entry) = reg.owners.get_mut(owner)
    {
        entry.tasks.remove(&id);
    }
}
