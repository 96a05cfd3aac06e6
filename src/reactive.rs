//! Observable queries.
//!
//! A [`ReactiveSubscription`] re-evaluates a bound query whenever the
//! [`InvalidationNotifier`] reports a change to one of the tables the query
//! reads. Evaluations never overlap: signals that arrive while one is running
//! collapse into a single follow-up.

use crate::error::Result;
use crate::executor::{BoundStatement, Executor};
use crate::mapper::QueryOutput;
use crate::query::PreparedQuery;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Called with the set of tables that changed.
pub type InvalidationCallback = Arc<dyn Fn(&BTreeSet<String>) + Send + Sync>;

/// Receives every emission of a subscription, including evaluation errors.
pub type EmissionSink = Box<dyn Fn(Result<QueryOutput>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Source of table change signals.
pub trait InvalidationNotifier: Send + Sync {
    /// Registers `callback` for changes to any of `tables`.
    fn subscribe(&self, tables: &BTreeSet<String>, callback: InvalidationCallback)
        -> SubscriptionHandle;

    /// Removes a registration. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

struct Observer {
    tables: BTreeSet<String>,
    callback: InvalidationCallback,
}

/// In-memory [`InvalidationNotifier`]: writers call [`notify`](Self::notify)
/// after changing tables.
#[derive(Default)]
pub struct InvalidationTracker {
    next_id: AtomicU64,
    observers: RwLock<HashMap<u64, Observer>>,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals observers of any of `changed`. Table names compare
    /// case-insensitively. Returns how many observers were signalled.
    ///
    /// Callbacks run on the calling thread, after the registry lock is released.
    pub fn notify<I, S>(&self, changed: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let changed: BTreeSet<String> = changed.into_iter().map(Into::into).collect();
        let callbacks: Vec<InvalidationCallback> = self
            .observers
            .read()
            .values()
            .filter(|observer| overlaps(&observer.tables, &changed))
            .map(|observer| Arc::clone(&observer.callback))
            .collect();

        debug!(tables = ?changed, observers = callbacks.len(), "tables invalidated");
        for callback in &callbacks {
            callback(&changed);
        }
        callbacks.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl InvalidationNotifier for InvalidationTracker {
    fn subscribe(
        &self,
        tables: &BTreeSet<String>,
        callback: InvalidationCallback,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().insert(
            id,
            Observer {
                tables: tables.clone(),
                callback,
            },
        );
        SubscriptionHandle(id)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.observers.write().remove(&handle.0);
    }
}

impl fmt::Debug for InvalidationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationTracker")
            .field("observers", &self.observer_count())
            .finish()
    }
}

fn overlaps(observed: &BTreeSet<String>, changed: &BTreeSet<String>) -> bool {
    observed
        .iter()
        .any(|table| changed.iter().any(|c| c.eq_ignore_ascii_case(table)))
}

#[derive(Default)]
struct State {
    running: bool,
    pending: bool,
    cancelled: bool,
}

struct Shared {
    query: Arc<PreparedQuery>,
    statement: BoundStatement,
    executor: Arc<dyn Executor>,
    sink: EmissionSink,
    state: Mutex<State>,
    // held while the sink runs; reentrant so a sink may unsubscribe itself
    emit_lock: ReentrantMutex<()>,
}

impl Shared {
    fn invalidate(&self) {
        {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            if state.running {
                state.pending = true;
                return;
            }
            state.running = true;
        }

        loop {
            let result = self.query.run_observed(&*self.executor, &self.statement);
            self.emit(result);

            let mut state = self.state.lock();
            if state.pending && !state.cancelled {
                state.pending = false;
                continue;
            }
            state.running = false;
            state.pending = false;
            break;
        }
    }

    fn emit(&self, result: Result<Option<QueryOutput>>) {
        let _guard = self.emit_lock.lock();
        if self.state.lock().cancelled {
            return;
        }
        match result {
            Ok(Some(output)) => (self.sink)(Ok(output)),
            Ok(None) => debug!(method = self.query.method(), "nothing to emit"),
            Err(err) => (self.sink)(Err(err)),
        }
    }

    fn cancel(&self) {
        self.state.lock().cancelled = true;
        // wait out an emission in flight on another thread
        drop(self.emit_lock.lock());
    }
}

/// A live observation of a query.
///
/// The current value is emitted when the subscription starts, then again after
/// every relevant table change. Errors are delivered to the sink and the
/// subscription stays active. Once [`unsubscribe`](Self::unsubscribe) returns,
/// no further emission happens. Dropping the subscription unsubscribes.
pub struct ReactiveSubscription {
    shared: Arc<Shared>,
    notifier: Arc<dyn InvalidationNotifier>,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl ReactiveSubscription {
    pub(crate) fn start(
        query: Arc<PreparedQuery>,
        statement: BoundStatement,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn InvalidationNotifier>,
        sink: EmissionSink,
    ) -> Self {
        let shared = Arc::new(Shared {
            query,
            statement,
            executor,
            sink,
            state: Mutex::new(State::default()),
            emit_lock: ReentrantMutex::new(()),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let callback: InvalidationCallback = Arc::new(move |changed: &BTreeSet<String>| {
            if let Some(shared) = weak.upgrade() {
                if overlaps(shared.query.tables(), changed) {
                    shared.invalidate();
                }
            }
        });
        let handle = notifier.subscribe(shared.query.tables(), callback);
        debug!(
            method = shared.query.method(),
            tables = ?shared.query.tables(),
            "subscription started"
        );

        let subscription = Self {
            shared,
            notifier,
            handle: Mutex::new(Some(handle)),
        };
        subscription.shared.invalidate();
        subscription
    }

    /// Tables whose changes trigger re-evaluation.
    pub fn tables(&self) -> &BTreeSet<String> {
        self.shared.query.tables()
    }

    pub fn is_active(&self) -> bool {
        !self.shared.state.lock().cancelled
    }

    /// Re-evaluates immediately, as if a watched table had changed.
    pub fn refresh(&self) {
        self.shared.invalidate();
    }

    /// Stops the subscription. Idempotent.
    pub fn unsubscribe(&self) {
        self.shared.cancel();
        if let Some(handle) = self.handle.lock().take() {
            self.notifier.unsubscribe(handle);
            debug!(method = self.shared.query.method(), "subscription cancelled");
        }
    }
}

impl Drop for ReactiveSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for ReactiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveSubscription")
            .field("method", &self.shared.query.method())
            .field("tables", self.tables())
            .field("active", &self.is_active())
            .finish()
    }
}
