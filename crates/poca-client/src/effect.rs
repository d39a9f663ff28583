//! Effect registration and dependency recording.
//!
//! [`effect`] runs a callback once while it is installed as the current effect. Any
//! [`Reactive`](crate::Reactive) read performed during that run registers the callback as
//! a dependent of the read key, and later writes to that key re-run it.
//!
//! The current effect lives on a per-thread stack. Registration is synchronous, so the
//! whole recording window always executes on one thread; nested `effect` calls push a
//! new frame and reads register only the innermost effect.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `None` frames come from [`untracked`] and suspend recording.
    static RECORDING: RefCell<Vec<Option<Effect>>> = const { RefCell::new(Vec::new()) };
}

/// A registered side-effect callback.
#[derive(Clone)]
pub struct Effect {
    id: u64,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Effect {
    fn new(callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            id: NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed),
            callback,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Invoke the callback without recording.
    pub fn run(&self) {
        untracked(|| (self.callback)())
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("id", &self.id).finish()
    }
}

/// Pops the frame pushed for the duration of a recording window, even on panic.
struct FrameGuard;

impl FrameGuard {
    fn push(frame: Option<Effect>) -> Self {
        RECORDING.with(|stack| stack.borrow_mut().push(frame));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        RECORDING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Register `callback` as an effect and run it once.
///
/// Reads of reactive values during this first run make `callback` a dependent of the
/// read keys. Re-runs triggered by later writes do not record.
pub fn effect<F>(callback: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let effect = Effect::new(Arc::new(callback));
    let _frame = FrameGuard::push(Some(effect.clone()));
    (effect.callback)();
}

/// Run `f` with recording suspended, so reads inside it register nothing.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = FrameGuard::push(None);
    f()
}

/// Whether a reactive read on this thread would register a dependent right now.
pub fn is_recording() -> bool {
    current().is_some()
}

/// The effect that a read on this thread should register, if any.
pub(crate) fn current() -> Option<Effect> {
    RECORDING.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Invoke every effect in order.
///
/// Each re-run suspends recording, so a write made during some effect's registration
/// run never registers that effect on what the dependents read.
pub(crate) fn run_all(effects: &[Effect]) {
    for effect in effects {
        effect.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_not_recording_outside_effect() {
        assert!(!is_recording());
        assert!(current().is_none());
    }

    #[test]
    fn test_effect_runs_once_while_recording() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        effect(move || {
            log.lock().unwrap().push(is_recording());
        });

        assert_eq!(*seen.lock().unwrap(), vec![true]);
        assert!(!is_recording());
    }

    #[test]
    fn test_nested_effect_records_innermost() {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let outer_ids = ids.clone();
        effect(move || {
            let outer = current().map(|e| e.id());
            let inner_ids = outer_ids.clone();
            effect(move || {
                inner_ids.lock().unwrap().push(current().map(|e| e.id()));
            });
            outer_ids.lock().unwrap().push(current().map(|e| e.id()));
            assert_eq!(current().map(|e| e.id()), outer);
        });

        let ids = ids.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].is_some());
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_untracked_suspends_recording() {
        let observed = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        effect(move || {
            let inside = untracked(is_recording);
            *slot.lock().unwrap() = Some((inside, is_recording()));
        });

        assert_eq!(*observed.lock().unwrap(), Some((false, true)));
    }

    #[test]
    fn test_frame_popped_after_panic() {
        let result = std::panic::catch_unwind(|| {
            effect(|| panic!("boom"));
        });
        assert!(result.is_err());
        assert!(!is_recording());
    }

    #[test]
    fn test_run_all_suspends_outer_recording() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let dependent = Effect::new(Arc::new(move || {
            log.lock().unwrap().push(is_recording());
        }));

        effect(move || run_all(std::slice::from_ref(&dependent)));

        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }
}
