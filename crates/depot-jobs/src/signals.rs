//! OS signal handling while a run executes.
//!
//! On unix one process-wide thread watches every signal a run ever asked
//! for. A [`SignalGuard`] subscribes the run for the duration of
//! `execute_jobs` and every delivery goes to its callback. A signal that
//! arrives while no run is subscribed gets its default action, so between
//! runs Ctrl-C terminates the process as if the job system had never
//! listened.
//!
//! Elsewhere only [`InterferingSignal::Interrupt`] is supported, through a
//! tokio `ctrl_c` listener on the run's runtime.

use crate::config::InterferingSignal;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Callback invoked for each delivered signal.
pub(crate) type SignalCallback = Arc<dyn Fn(InterferingSignal) + Send + Sync>;

/// Subscribes a run to interfering signals until dropped.
pub(crate) struct SignalGuard {
    subscriptions: Vec<Subscription>,
}

impl SignalGuard {
    /// Subscribes `on_signal` to each of `signals`.
    ///
    /// Signals that can't be listened for on this platform are logged and
    /// skipped.
    pub fn install(handle: &Handle, signals: &[InterferingSignal], on_signal: SignalCallback) -> Self {
        let mut subscriptions = Vec::with_capacity(signals.len());

        for &signal in signals {
            match subscribe(handle, signal, Arc::clone(&on_signal)) {
                Ok(subscription) => {
                    debug!(signal = %signal, "Listening for interfering signal");
                    subscriptions.push(subscription);
                }
                Err(e) => warn!(signal = %signal, error = %e, "Can't listen for signal"),
            }
        }

        Self { subscriptions }
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(unix)]
use watcher::{subscribe, Subscription};

#[cfg(unix)]
mod watcher {
    use super::SignalCallback;
    use crate::config::InterferingSignal;
    use parking_lot::Mutex;
    use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::{Handle as SignalsHandle, Signals};
    use signal_hook::low_level::emulate_default_handler;
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::os::raw::c_int;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tokio::runtime::Handle;
    use tracing::{debug, warn};

    type Subscribers = Arc<Mutex<HashMap<InterferingSignal, Vec<(u64, SignalCallback)>>>>;

    static WATCHER: Mutex<Option<Arc<Watcher>>> = parking_lot::const_mutex(None);

    /// The process-wide signal thread and the runs subscribed to it.
    pub(crate) struct Watcher {
        signals: SignalsHandle,
        watched: Mutex<HashSet<InterferingSignal>>,
        subscribers: Subscribers,
        next_id: AtomicU64,
    }

    impl Watcher {
        /// Returns the watcher, starting its thread on first use.
        pub(crate) fn get() -> io::Result<Arc<Self>> {
            let mut slot = WATCHER.lock();
            if let Some(watcher) = slot.as_ref() {
                return Ok(Arc::clone(watcher));
            }
            let watcher = Arc::new(Self::start()?);
            *slot = Some(Arc::clone(&watcher));
            Ok(watcher)
        }

        fn start() -> io::Result<Self> {
            let mut signals = Signals::new(std::iter::empty::<c_int>())?;
            let handle = signals.handle();
            let subscribers = Subscribers::default();
            let dispatch = Arc::clone(&subscribers);

            thread::Builder::new()
                .name("depot-signals".to_string())
                .spawn(move || {
                    for raw in signals.forever() {
                        deliver(&dispatch, raw);
                    }
                })?;

            Ok(Self {
                signals: handle,
                watched: Mutex::default(),
                subscribers,
                next_id: AtomicU64::new(0),
            })
        }

        fn subscribe(&self, signal: InterferingSignal, callback: SignalCallback) -> io::Result<u64> {
            {
                let mut watched = self.watched.lock();
                if !watched.contains(&signal) {
                    self.signals.add_signal(raw_signal(signal))?;
                    watched.insert(signal);
                }
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.subscribers
                .lock()
                .entry(signal)
                .or_default()
                .push((id, callback));
            Ok(id)
        }

        fn unsubscribe(&self, signal: InterferingSignal, id: u64) {
            if let Some(callbacks) = self.subscribers.lock().get_mut(&signal) {
                callbacks.retain(|(subscriber, _)| *subscriber != id);
            }
        }

        pub(crate) fn is_subscribed(&self, signal: InterferingSignal, id: u64) -> bool {
            self.subscribers
                .lock()
                .get(&signal)
                .is_some_and(|callbacks| callbacks.iter().any(|(subscriber, _)| *subscriber == id))
        }
    }

    /// A run's subscription to one signal.
    pub(crate) struct Subscription {
        watcher: Arc<Watcher>,
        pub(crate) signal: InterferingSignal,
        pub(crate) id: u64,
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            self.watcher.unsubscribe(self.signal, self.id);
        }
    }

    pub(crate) fn subscribe(
        _handle: &Handle,
        signal: InterferingSignal,
        callback: SignalCallback,
    ) -> io::Result<Subscription> {
        let watcher = Watcher::get()?;
        let id = watcher.subscribe(signal, callback)?;
        Ok(Subscription { watcher, signal, id })
    }

    fn deliver(subscribers: &Subscribers, raw: c_int) {
        let Some(signal) = from_raw(raw) else {
            return;
        };
        let callbacks: Vec<SignalCallback> = subscribers
            .lock()
            .get(&signal)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        if callbacks.is_empty() {
            debug!(signal = %signal, "No run listening, applying default action");
            if let Err(e) = emulate_default_handler(raw) {
                warn!(signal = %signal, error = %e, "Can't apply default signal action");
            }
            return;
        }
        for callback in callbacks {
            callback(signal);
        }
    }

    fn raw_signal(signal: InterferingSignal) -> c_int {
        match signal {
            InterferingSignal::Interrupt => SIGINT,
            InterferingSignal::Terminate => SIGTERM,
            InterferingSignal::Hangup => SIGHUP,
            InterferingSignal::Quit => SIGQUIT,
        }
    }

    fn from_raw(raw: c_int) -> Option<InterferingSignal> {
        match raw {
            SIGINT => Some(InterferingSignal::Interrupt),
            SIGTERM => Some(InterferingSignal::Terminate),
            SIGHUP => Some(InterferingSignal::Hangup),
            SIGQUIT => Some(InterferingSignal::Quit),
            _ => None,
        }
    }

}

#[cfg(not(unix))]
use fallback::{subscribe, Subscription};

#[cfg(not(unix))]
mod fallback {
    use super::SignalCallback;
    use crate::config::InterferingSignal;
    use std::io;
    use tokio::runtime::Handle;
    use tokio::task::JoinHandle;

    /// A `ctrl_c` listener task, aborted on drop.
    pub(crate) struct Subscription(JoinHandle<()>);

    impl Drop for Subscription {
        fn drop(&mut self) {
            self.0.abort();
        }
    }

    pub(crate) fn subscribe(
        handle: &Handle,
        signal: InterferingSignal,
        on_signal: SignalCallback,
    ) -> io::Result<Subscription> {
        if signal != InterferingSignal::Interrupt {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is only supported on unix", signal),
            ));
        }

        Ok(Subscription(handle.spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                on_signal(signal);
            }
        })))
    }
}
