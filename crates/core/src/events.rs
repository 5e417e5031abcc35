//! World event notifications
//!
//! Callers subscribe with [`World::on_event`](crate::world::World::on_event)
//! and get called synchronously, in registration order, from whatever world
//! operation raised the event.

use std::sync::Arc;

use crate::geometry::Rect;
use crate::tile::{ItemId, TileId};

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type ListenerFn = Arc<dyn Fn(&WorldEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum WorldEvent {
    ItemAdded {
        item: ItemId,
        index: usize,
    },
    ItemRemoved {
        item: ItemId,
    },
    ItemIndexChanged {
        item: ItemId,
        previous: usize,
        current: usize,
    },
    /// Aggregate layout metrics changed after items moved, resized, or
    /// were added or removed.
    MetricsChanged {
        home_bounds: Rect,
        content_size: (f64, f64),
        content_factor: f64,
    },
    TileLoaded {
        tile: TileId,
    },
    /// The tile lost its drawable data, whether by explicit unload or by
    /// pool eviction.
    TileUnloaded {
        tile: TileId,
    },
}

#[derive(Default)]
pub(crate) struct Listeners {
    entries: Vec<(ListenerId, ListenerFn)>,
    next: u64,
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: ListenerFn) -> ListenerId {
        self.next += 1;
        let id = ListenerId(self.next);
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn emit(&self, event: &WorldEvent) {
        for (_, listener) in &self.entries {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_fire_in_registration_order_until_removed() {
        let mut listeners = Listeners::default();
        let counter = Arc::new(AtomicUsize::new(0));

        let seen = counter.clone();
        let first = listeners.add(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let seen = counter.clone();
        listeners.add(Arc::new(move |_| {
            seen.fetch_add(10, Ordering::SeqCst);
        }));

        listeners.emit(&WorldEvent::ItemRemoved { item: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 11);

        assert!(listeners.remove(first));
        assert!(!listeners.remove(first));
        listeners.emit(&WorldEvent::ItemRemoved { item: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 21);
    }
}
