pub mod arena;
pub mod clock;
pub mod scheduler;
pub mod signal;

pub use arena::{Arena, SlotId};
pub use clock::{Clock, SystemClock, TestClock};
pub use scheduler::{Debounced, ListenerId, Scheduler, SourceId, TickReport, TimerId};
pub use signal::{Computed, Observable, Signal, Subscription};
