//! Per-key render coalescing.
//!
//! Concurrent misses for the same cache key share one in-flight render: the
//! first caller spawns the render as its own task and installs a shared handle
//! to its result in the map, later callers clone that handle and await the
//! same result. The task removes the entry when it finishes, so completion and
//! cleanup never depend on a caller staying alive.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tokio::sync::oneshot;

type SharedRender<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;
type Entries<T, E> = DashMap<String, (u64, SharedRender<T, E>)>;

/// Whether a caller started the render or joined one already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRole {
    Leader,
    Follower,
}

/// Tracks renders that are currently executing, keyed by cache path.
pub struct InFlightRenders<T, E> {
    entries: Arc<Entries<T, E>>,
    next_id: AtomicU64,
}

impl<T, E> Default for InFlightRenders<T, E> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

/// Drops the map entry of one render, also when its task panics.
struct EntryCleanup<T, E> {
    entries: Arc<Entries<T, E>>,
    key: String,
    id: u64,
}

impl<T, E> Drop for EntryCleanup<T, E> {
    fn drop(&mut self) {
        let id = self.id;
        self.entries
            .remove_if(&self.key, |_, (entry_id, _)| *entry_id == id);
    }
}

impl<T, E> InFlightRenders<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a render currently in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `render` for `key` unless a render for the same key is already in
    /// flight, in which case wait for that one instead. `render` is only
    /// invoked by the leader. `aborted` builds the error every waiter sees if
    /// the render task dies without producing a result.
    pub async fn run<F, Fut, A>(
        &self,
        key: &str,
        render: F,
        aborted: A,
    ) -> (Result<T, E>, RenderRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        A: FnOnce() -> E + Send + 'static,
    {
        let (shared, leader) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => (occupied.get().1.clone(), None),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                let shared = async move {
                    match rx.await {
                        Ok(output) => output,
                        Err(_) => Err(aborted()),
                    }
                }
                .boxed()
                .shared();

                vacant.insert((id, shared.clone()));
                (shared, Some((id, tx)))
            }
        };

        // Spawned only after the map entry is released.
        let role = match leader {
            Some((id, tx)) => {
                let cleanup = EntryCleanup {
                    entries: Arc::clone(&self.entries),
                    key: key.to_string(),
                    id,
                };
                let pending = render();
                tokio::spawn(async move {
                    let output = pending.await;
                    drop(cleanup);
                    let _ = tx.send(output);
                });
                RenderRole::Leader
            }
            None => RenderRole::Follower,
        };

        (shared.await, role)
    }
}
