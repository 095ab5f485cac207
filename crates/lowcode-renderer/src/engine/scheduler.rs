//! Single-threaded tick scheduler.
//!
//! Writes to reactive cells do not call listeners directly. They queue a
//! notification for their source, deduplicated per round. `run_tick` first
//! fires due timers, then delivers notifications round by round until the
//! queue stays empty. Notifications queued by a listener land in the next
//! round of the same tick, so delivery is never re-entrant.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use tracing::{trace, warn};

use super::clock::{Clock, SystemClock};

/// Upper bound on notification rounds per tick; guards against feedback loops.
const MAX_ROUNDS_PER_TICK: usize = 10_000;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SourceId(u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerId(u64);

type Callback = Rc<dyn Fn()>;

/// Timer event waiting to fire.
#[derive(Clone, Debug)]
struct TimerEvent {
    deadline_ms: u64,
    sequence: u64,
    timer: TimerId,
}

impl PartialEq for TimerEvent {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.sequence == other.sequence
    }
}

impl Eq for TimerEvent {}

impl PartialOrd for TimerEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earlier deadlines first, then arming order
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct TimerEntry {
    callback: Callback,
    /// Sequence number of the live heap event; older events are stale.
    armed: Option<u64>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub timers_fired: usize,
    pub notifications: usize,
    pub rounds: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.timers_fired == 0 && self.notifications == 0
    }
}

struct SchedulerState {
    clock: Rc<dyn Clock>,
    current_tick: u64,
    next_id: u64,
    pending: Vec<SourceId>,
    listeners: HashMap<SourceId, Vec<(ListenerId, Callback)>>,
    timer_queue: BinaryHeap<TimerEvent>,
    timers: HashMap<TimerId, TimerEntry>,
}

impl SchedulerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Cheap-to-clone handle; all clones drive the same queue.
#[derive(Clone)]
pub struct Scheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Rc::new(SystemClock::new()))
    }
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            state: Rc::new(RefCell::new(SchedulerState {
                clock,
                current_tick: 0,
                next_id: 0,
                pending: Vec::new(),
                listeners: HashMap::new(),
                timer_queue: BinaryHeap::new(),
                timers: HashMap::new(),
            })),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().clock.now_ms()
    }

    pub fn current_tick(&self) -> u64 {
        self.state.borrow().current_tick
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub fn allocate_source(&self) -> SourceId {
        SourceId(self.state.borrow_mut().next_id())
    }

    pub fn subscribe(&self, source: SourceId, listener: impl Fn() + 'static) -> ListenerId {
        let mut state = self.state.borrow_mut();
        let id = ListenerId(state.next_id());
        state
            .listeners
            .entry(source)
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, source: SourceId, listener: ListenerId) {
        // Callbacks may own cells whose drop calls back in here, so they are
        // dropped after the borrow ends.
        let removed = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                return;
            };
            let Some(listeners) = state.listeners.get_mut(&source) else {
                return;
            };
            let removed = listeners
                .iter()
                .position(|(id, _)| *id == listener)
                .map(|position| listeners.remove(position));
            if listeners.is_empty() {
                state.listeners.remove(&source);
            }
            removed
        };
        drop(removed);
    }

    /// Drops every listener of `source`.
    pub fn release_source(&self, source: SourceId) {
        let removed = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                return;
            };
            state.pending.retain(|pending| *pending != source);
            state.listeners.remove(&source)
        };
        drop(removed);
    }

    pub fn listener_count(&self, source: SourceId) -> usize {
        self.state
            .borrow()
            .listeners
            .get(&source)
            .map_or(0, Vec::len)
    }

    /// Queues a notification for `source`.
    /// Deduplicates: a source already queued for this round is not queued again.
    pub fn notify(&self, source: SourceId) {
        let mut state = self.state.borrow_mut();
        if !state.pending.contains(&source) {
            state.pending.push(source);
        }
    }

    pub fn has_pending_notifications(&self) -> bool {
        !self.state.borrow().pending.is_empty()
    }

    pub fn create_timer(&self, callback: impl Fn() + 'static) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = TimerId(state.next_id());
        state.timers.insert(
            id,
            TimerEntry {
                callback: Rc::new(callback),
                armed: None,
            },
        );
        id
    }

    /// Arms `timer` to fire `delay_ms` from now, replacing any earlier deadline.
    pub fn arm_timer(&self, timer: TimerId, delay_ms: u64) {
        let mut state = self.state.borrow_mut();
        let deadline_ms = state.clock.now_ms() + delay_ms;
        let sequence = state.next_id();
        let Some(entry) = state.timers.get_mut(&timer) else {
            return;
        };
        entry.armed = Some(sequence);
        state.timer_queue.push(TimerEvent {
            deadline_ms,
            sequence,
            timer,
        });
    }

    pub fn cancel_timer(&self, timer: TimerId) {
        if let Some(entry) = self.state.borrow_mut().timers.get_mut(&timer) {
            entry.armed = None;
        }
    }

    pub fn drop_timer(&self, timer: TimerId) {
        let removed = match self.state.try_borrow_mut() {
            Ok(mut state) => state.timers.remove(&timer),
            Err(_) => None,
        };
        drop(removed);
    }

    pub fn is_timer_armed(&self, timer: TimerId) -> bool {
        self.state
            .borrow()
            .timers
            .get(&timer)
            .is_some_and(|entry| entry.armed.is_some())
    }

    /// Time until the next armed timer fires (if any).
    pub fn time_to_next_timer(&self) -> Option<u64> {
        let mut state = self.state.borrow_mut();
        discard_stale_timers(&mut state);
        let now = state.clock.now_ms();
        state
            .timer_queue
            .peek()
            .map(|event| event.deadline_ms.saturating_sub(now))
    }

    /// Run one tick: due timers, then notification rounds until quiescent.
    pub fn run_tick(&self) -> TickReport {
        let mut report = TickReport {
            tick: {
                let mut state = self.state.borrow_mut();
                state.current_tick += 1;
                state.current_tick
            },
            ..TickReport::default()
        };

        // Phase 1: Fire due timers
        for callback in self.take_due_timers() {
            report.timers_fired += 1;
            callback();
        }

        // Phase 2: Deliver notifications until quiescence
        loop {
            let round: Vec<(SourceId, Vec<Callback>)> = {
                let mut state = self.state.borrow_mut();
                if state.pending.is_empty() {
                    break;
                }
                let sources = std::mem::take(&mut state.pending);
                sources
                    .into_iter()
                    .map(|source| {
                        let callbacks = state
                            .listeners
                            .get(&source)
                            .map(|listeners| listeners.iter().map(|(_, callback)| callback.clone()).collect())
                            .unwrap_or_default();
                        (source, callbacks)
                    })
                    .collect()
            };

            report.rounds += 1;
            if report.rounds > MAX_ROUNDS_PER_TICK {
                warn!(tick = report.tick, "notification rounds exceeded limit, dropping the rest");
                self.state.borrow_mut().pending.clear();
                break;
            }
            for (source, callbacks) in round {
                trace!(source = source.0, listeners = callbacks.len(), "delivering notification");
                report.notifications += 1;
                for callback in callbacks {
                    callback();
                }
            }
        }

        report
    }

    /// Runs ticks until one does nothing, at most `max_ticks`.
    pub fn run_until_quiescent(&self, max_ticks: u64) -> u64 {
        let mut ticks = 0;
        while ticks < max_ticks {
            ticks += 1;
            if self.run_tick().is_idle() {
                break;
            }
        }
        ticks
    }

    fn take_due_timers(&self) -> Vec<Callback> {
        let mut state = self.state.borrow_mut();
        let now = state.clock.now_ms();
        let mut due = Vec::new();
        while let Some(event) = state.timer_queue.peek() {
            if event.deadline_ms > now {
                break;
            }
            let Some(event) = state.timer_queue.pop() else {
                break;
            };
            if let Some(entry) = state.timers.get_mut(&event.timer) {
                if entry.armed == Some(event.sequence) {
                    entry.armed = None;
                    due.push(entry.callback.clone());
                }
            }
        }
        due
    }
}

fn discard_stale_timers(state: &mut SchedulerState) {
    while let Some(event) = state.timer_queue.peek() {
        let live = state
            .timers
            .get(&event.timer)
            .is_some_and(|entry| entry.armed == Some(event.sequence));
        if live {
            break;
        }
        state.timer_queue.pop();
    }
}

/// Coalesces calls: each `call` re-arms the timer, so only the last call of
/// a burst runs the callback, `delay_ms` after it was made.
pub struct Debounced {
    scheduler: Scheduler,
    timer: TimerId,
    delay_ms: u64,
}

impl Debounced {
    pub fn new(scheduler: &Scheduler, delay_ms: u64, callback: impl Fn() + 'static) -> Self {
        Self {
            timer: scheduler.create_timer(callback),
            scheduler: scheduler.clone(),
            delay_ms,
        }
    }

    pub fn call(&self) {
        self.scheduler.arm_timer(self.timer, self.delay_ms);
    }

    pub fn cancel(&self) {
        self.scheduler.cancel_timer(self.timer);
    }

    pub fn is_pending(&self) -> bool {
        self.scheduler.is_timer_armed(self.timer)
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

impl Drop for Debounced {
    fn drop(&mut self) {
        self.scheduler.drop_timer(self.timer);
    }
}
