//! Pulling fresh schema snapshots from the host document.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, info};

use crate::context::GetNode;
use crate::engine::{Debounced, Scheduler, Signal};
use crate::schema::SchemaNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The host exported a new snapshot and it replaced the schema.
    Replaced,
    /// The node exists but its export was empty; the schema was kept.
    ExportEmpty,
    NodeMissing,
    /// No lookup callback, or a root without an id.
    Unresolvable,
}

/// Re-exports the root node and republishes the schema.
///
/// Dependents are notified even when nothing was replaced, since callers may
/// have mutated nested fields in place.
pub fn refresh_schema(schema: &Signal<Rc<SchemaNode>>, get_node: Option<&GetNode>) -> RefreshOutcome {
    let root_id = schema.with(|schema| schema.id.clone());
    let outcome = match (get_node, root_id) {
        (Some(get_node), Some(root_id)) => match get_node(&root_id) {
            Some(node) => match node.export_schema() {
                Some(exported) => {
                    schema.update(|schema| *schema = Rc::new(exported));
                    return RefreshOutcome::Replaced;
                }
                None => RefreshOutcome::ExportEmpty,
            },
            None => RefreshOutcome::NodeMissing,
        },
        _ => RefreshOutcome::Unresolvable,
    };
    schema.trigger();
    outcome
}

/// Debounced [`refresh_schema`] for one render root.
pub struct RerenderController {
    debounced: Debounced,
    requests: Rc<Cell<usize>>,
    refreshes: Rc<Cell<usize>>,
}

impl RerenderController {
    pub fn new(
        scheduler: &Scheduler,
        delay_ms: u64,
        schema: Signal<Rc<SchemaNode>>,
        get_node: impl Fn() -> Option<GetNode> + 'static,
    ) -> Self {
        let refreshes = Rc::new(Cell::new(0));
        let counter = refreshes.clone();
        let debounced = Debounced::new(scheduler, delay_ms, move || {
            counter.set(counter.get() + 1);
            let outcome = refresh_schema(&schema, get_node().as_ref());
            info!(?outcome, "schema refreshed from host");
        });
        Self {
            debounced,
            requests: Rc::new(Cell::new(0)),
            refreshes,
        }
    }

    /// Schedules a refresh; calls before it runs collapse into one.
    pub fn rerender(&self) {
        self.requests.set(self.requests.get() + 1);
        debug!(pending = self.debounced.is_pending(), "rerender requested");
        self.debounced.call();
    }

    pub fn is_pending(&self) -> bool {
        self.debounced.is_pending()
    }

    pub fn cancel(&self) {
        self.debounced.cancel();
    }

    pub fn requests(&self) -> usize {
        self.requests.get()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.get()
    }
}
