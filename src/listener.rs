//! Listener traits and delivery to caller-chosen execution contexts.
//!
//! Every registration pairs a listener with a [`CallbackContext`]. Delivery
//! either runs the callback inline on the manager's thread or posts it to a
//! [`Looper`], a FIFO task queue drained by whoever owns it. Posting order is
//! the ordering guarantee callers can rely on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::hal::RttControllerHandle;

pub trait InterfaceDestroyedListener: Send + Sync {
    fn on_destroyed(&self, iface_name: &str);
}

pub trait InterfaceAvailableListener: Send + Sync {
    fn on_availability_changed(&self, available: bool);
}

pub trait ManagerStatusListener: Send + Sync {
    fn on_status_changed(&self);
}

pub trait RttControllerLifecycleListener: Send + Sync {
    fn on_new_rtt_controller(&self, controller: RttControllerHandle);
    fn on_rtt_controller_destroyed(&self);
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_LOOPER_ID: AtomicU64 = AtomicU64::new(1);

/// A serialized task queue standing in for a handler thread.
#[derive(Clone)]
pub struct Looper {
    id: u64,
    tx: UnboundedSender<Task>,
    rx: Arc<Mutex<UnboundedReceiver<Task>>>,
}

impl Looper {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Looper {
            id: NEXT_LOOPER_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn post(&self, task: Task) {
        // The receiver lives as long as any clone of this looper.
        let _ = self.tx.send(task);
    }

    /// Runs queued tasks, including ones posted while draining, and returns
    /// how many ran.
    pub fn dispatch_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = match self.rx.lock() {
                Ok(mut rx) => rx.try_recv().ok(),
                Err(poisoned) => poisoned.into_inner().try_recv().ok(),
            };
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        ran
    }
}

impl Default for Looper {
    fn default() -> Self {
        Looper::new()
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper").field("id", &self.id).finish()
    }
}

/// Where a listener's callbacks run.
#[derive(Debug, Clone, Default)]
pub enum CallbackContext {
    /// On the manager's thread, at the point of delivery.
    #[default]
    Inline,
    Looper(Looper),
}

impl CallbackContext {
    fn key(&self) -> u64 {
        match self {
            CallbackContext::Inline => 0,
            CallbackContext::Looper(looper) => looper.id(),
        }
    }

    pub fn deliver(&self, task: Task) {
        match self {
            CallbackContext::Inline => task(),
            CallbackContext::Looper(looper) => looper.post(task),
        }
    }
}

impl From<Looper> for CallbackContext {
    fn from(looper: Looper) -> Self {
        CallbackContext::Looper(looper)
    }
}

pub struct Registration<L: ?Sized> {
    pub listener: Arc<L>,
    pub context: CallbackContext,
}

impl<L: ?Sized> Registration<L> {
    pub fn same_as(&self, listener: &Arc<L>, context: &CallbackContext) -> bool {
        Arc::ptr_eq(&self.listener, listener) && self.context.key() == context.key()
    }
}

/// Registrations of one listener kind. The same listener registered twice on
/// the same context is kept once.
pub struct ListenerSet<L: ?Sized> {
    entries: Vec<Registration<L>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        ListenerSet { entries: Vec::new() }
    }
}

impl<L: ?Sized + Send + Sync + 'static> ListenerSet<L> {
    pub fn new() -> Self {
        ListenerSet::default()
    }

    /// Returns false if the pair was already registered.
    pub fn register(&mut self, listener: Arc<L>, context: CallbackContext) -> bool {
        if self.entries.iter().any(|r| r.same_as(&listener, &context)) {
            return false;
        }
        self.entries.push(Registration { listener, context });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Registration<L>> {
        self.entries.last()
    }

    /// Delivers `f` to every registration, in registration order.
    pub fn deliver<F>(&self, f: F)
    where
        F: Fn(&L) + Clone + Send + 'static,
    {
        for registration in &self.entries {
            deliver_one(registration, f.clone());
        }
    }
}

pub fn deliver_one<L, F>(registration: &Registration<L>, f: F)
where
    L: ?Sized + Send + Sync + 'static,
    F: FnOnce(&L) + Send + 'static,
{
    let listener = Arc::clone(&registration.listener);
    registration.context.deliver(Box::new(move || f(&*listener)));
}
