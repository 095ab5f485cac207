//! Reactive cells on top of the [`Scheduler`].
//!
//! A [`Signal`] holds a value and a version. Writing bumps the version and
//! queues a notification; listeners run on the next tick. A [`Computed`]
//! caches a derived value and recomputes lazily, only when the version of
//! one of its own inputs moved.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::scheduler::{ListenerId, Scheduler, SourceId};

/// Anything whose changes can be detected by comparing versions.
pub trait Observable {
    fn version(&self) -> u64;
}

struct SignalInner<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    source: SourceId,
    scheduler: Scheduler,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        self.scheduler.release_source(self.source);
    }
}

pub struct Signal<T>(Rc<SignalInner<T>>);

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Signal<T> {
    pub fn new(scheduler: &Scheduler, value: T) -> Self {
        Self(Rc::new(SignalInner {
            value: RefCell::new(value),
            version: Cell::new(0),
            source: scheduler.allocate_source(),
            scheduler: scheduler.clone(),
        }))
    }

    pub fn with<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        read(&self.0.value.borrow())
    }

    /// Replaces the value and notifies.
    pub fn set(&self, value: T) {
        *self.0.value.borrow_mut() = value;
        self.trigger();
    }

    /// Mutates in place and notifies.
    pub fn update(&self, write: impl FnOnce(&mut T)) {
        write(&mut self.0.value.borrow_mut());
        self.trigger();
    }

    /// Notifies without changing the value; dependents re-read it.
    pub fn trigger(&self) {
        self.0.version.set(self.0.version.get() + 1);
        self.0.scheduler.notify(self.0.source);
    }

    pub fn source(&self) -> SourceId {
        self.0.source
    }

    pub fn subscribe(&self, listener: impl Fn() + 'static) -> Subscription {
        Subscription {
            scheduler: self.0.scheduler.clone(),
            source: self.0.source,
            listener: Some(self.0.scheduler.subscribe(self.0.source, listener)),
        }
    }
}

impl<T: Clone> Signal<T> {
    pub fn get(&self) -> T {
        self.0.value.borrow().clone()
    }
}

impl<T: PartialEq> Signal<T> {
    /// Writes only when the value differs; returns whether it did.
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.0.value.borrow() == value {
            return false;
        }
        self.set(value);
        true
    }
}

impl<T> Observable for Signal<T> {
    fn version(&self) -> u64 {
        self.0.version.get()
    }
}

/// Listener registration; unsubscribes on drop.
pub struct Subscription {
    scheduler: Scheduler,
    source: SourceId,
    listener: Option<ListenerId>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.scheduler.unsubscribe(self.source, listener);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

struct ComputedInner<T> {
    compute: Box<dyn Fn() -> T>,
    inputs: Vec<Rc<dyn Observable>>,
    cached: RefCell<Option<T>>,
    seen_versions: RefCell<Vec<u64>>,
    recomputations: Cell<usize>,
}

/// Lazily recomputed derived value with explicit inputs.
pub struct Computed<T>(Rc<ComputedInner<T>>);

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone> Computed<T> {
    pub fn new(inputs: Vec<Rc<dyn Observable>>, compute: impl Fn() -> T + 'static) -> Self {
        Self(Rc::new(ComputedInner {
            compute: Box::new(compute),
            inputs,
            cached: RefCell::new(None),
            seen_versions: RefCell::new(Vec::new()),
            recomputations: Cell::new(0),
        }))
    }

    pub fn get(&self) -> T {
        let versions: Vec<u64> = self.0.inputs.iter().map(|input| input.version()).collect();
        let fresh = self.0.cached.borrow().is_some() && *self.0.seen_versions.borrow() == versions;
        if !fresh {
            let value = (self.0.compute)();
            self.0.recomputations.set(self.0.recomputations.get() + 1);
            *self.0.cached.borrow_mut() = Some(value);
            *self.0.seen_versions.borrow_mut() = versions;
        }
        self.0
            .cached
            .borrow()
            .clone()
            .unwrap_or_else(|| (self.0.compute)())
    }

    /// How many times the value was (re)computed.
    pub fn recomputations(&self) -> usize {
        self.0.recomputations.get()
    }
}

impl<T> Observable for Computed<T> {
    /// Sum of input versions; moves whenever any input moves.
    fn version(&self) -> u64 {
        self.0.inputs.iter().map(|input| input.version()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::TestClock;

    fn scheduler() -> Scheduler {
        Scheduler::new(Rc::new(TestClock::new()))
    }

    #[test]
    fn set_notifies_on_next_tick() {
        let scheduler = scheduler();
        let signal = Signal::new(&scheduler, 1);
        let seen = Rc::new(Cell::new(0));
        let observer = seen.clone();
        let reader = signal.clone();
        let _subscription = signal.subscribe(move || observer.set(reader.get()));

        signal.set(5);
        assert_eq!(seen.get(), 0);
        scheduler.run_tick();
        assert_eq!(seen.get(), 5);
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn trigger_notifies_without_a_new_value() {
        let scheduler = scheduler();
        let signal = Signal::new(&scheduler, vec![1]);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let _subscription = signal.subscribe(move || counter.set(counter.get() + 1));

        signal.update(|items| items.push(2));
        signal.trigger();
        scheduler.run_tick();
        assert_eq!(calls.get(), 1);
        assert_eq!(signal.get(), vec![1, 2]);
        assert_eq!(signal.version(), 2);
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let scheduler = scheduler();
        let signal = Signal::new(&scheduler, 0);
        let subscription = signal.subscribe(|| {});
        assert_eq!(scheduler.listener_count(signal.source()), 1);
        drop(subscription);
        assert_eq!(scheduler.listener_count(signal.source()), 0);
    }

    #[test]
    fn set_if_changed_skips_equal_values() {
        let scheduler = scheduler();
        let signal = Signal::new(&scheduler, "a");
        assert!(!signal.set_if_changed("a"));
        assert!(signal.set_if_changed("b"));
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn computed_recomputes_only_when_its_inputs_move() {
        let scheduler = scheduler();
        let a = Signal::new(&scheduler, 2);
        let b = Signal::new(&scheduler, 10);
        let reader = a.clone();
        let doubled = Computed::new(vec![Rc::new(a.clone()) as Rc<dyn Observable>], move || {
            reader.get() * 2
        });

        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.recomputations(), 1);

        b.set(11);
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.recomputations(), 1);

        a.set(3);
        assert_eq!(doubled.get(), 6);
        assert_eq!(doubled.recomputations(), 2);
    }
}
