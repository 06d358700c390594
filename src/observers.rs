//! Insertion notifications for consumers that keep derived views.
//!
//! Handlers are registered per event kind and called synchronously, in
//! registration order, after the triggering transaction has committed.
//! There is no unregistration.

use std::sync::Arc;

use parking_lot::RwLock;

type Handler = Arc<dyn Fn(u64) + Send + Sync>;

/// The kinds of insertion a consumer can subscribe to. The handler argument
/// is the id of the inserted book, group or phrase; for
/// [`Event::GroupWordInserted`] it is the id of the group that grew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    BookInserted,
    GroupInserted,
    GroupWordInserted,
    PhraseInserted,
}

#[derive(Default)]
pub struct Observers {
    book_inserted: RwLock<Vec<Handler>>,
    group_inserted: RwLock<Vec<Handler>>,
    group_word_inserted: RwLock<Vec<Handler>>,
    phrase_inserted: RwLock<Vec<Handler>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, event: Event) -> &RwLock<Vec<Handler>> {
        match event {
            Event::BookInserted => &self.book_inserted,
            Event::GroupInserted => &self.group_inserted,
            Event::GroupWordInserted => &self.group_word_inserted,
            Event::PhraseInserted => &self.phrase_inserted,
        }
    }

    pub fn subscribe<F>(&self, event: Event, handler: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.list(event).write().push(Arc::new(handler));
    }

    /// Call every handler of `event`. The handler list is copied first so a
    /// handler may itself subscribe without deadlocking.
    pub fn notify(&self, event: Event, id: u64) {
        let handlers: Vec<Handler> = self.list(event).read().clone();
        tracing::trace!(?event, id, handlers = handlers.len(), "notify");
        for handler in handlers {
            handler(id);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("book_inserted", &self.book_inserted.read().len())
            .field("group_inserted", &self.group_inserted.read().len())
            .field("group_word_inserted", &self.group_word_inserted.read().len())
            .field("phrase_inserted", &self.phrase_inserted.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let observers = Observers::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            observers.subscribe(Event::BookInserted, move |id| {
                calls.lock().unwrap().push((tag, id));
            });
        }

        observers.notify(Event::BookInserted, 7);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn events_are_independent() {
        let observers = Observers::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&calls);
        observers.subscribe(Event::GroupWordInserted, move |group| {
            c.lock().unwrap().push(group);
        });

        observers.notify(Event::GroupInserted, 1);
        observers.notify(Event::PhraseInserted, 2);
        observers.notify(Event::GroupWordInserted, 3);
        assert_eq!(*calls.lock().unwrap(), vec![3]);
    }

    #[test]
    fn handler_may_subscribe_while_notified() {
        let observers = Arc::new(Observers::new());
        let inner = Arc::clone(&observers);
        observers.subscribe(Event::PhraseInserted, move |_| {
            inner.subscribe(Event::PhraseInserted, |_| {});
        });

        observers.notify(Event::PhraseInserted, 1);
        assert_eq!(observers.phrase_inserted.read().len(), 2);
    }
}
