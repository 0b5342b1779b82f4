//! Batched "new items" streams over a forum listing.
//!
//! Each batch is one listing fetch. New items are yielded oldest first, then
//! `None` marks the end of the batch so the caller regains control instead of
//! waiting for the next item. Calling again after `None` starts a new batch.

use std::collections::{HashSet, VecDeque};

use crate::error::ForumError;
use crate::forum::ForumItem;

/// How many item ids are remembered to detect repeats across fetches.
const SEEN_CAPACITY: usize = 301;

type FetchFn<T> = Box<dyn FnMut() -> Result<Vec<T>, ForumError> + Send>;

/// Lazy, restartable stream of new forum items with an end-of-batch sentinel.
pub struct BatchStream<T> {
    fetch: FetchFn<T>,
    seen: SeenIds,
    pending: VecDeque<T>,
    batch_open: bool,
    skip_existing: bool,
}

impl<T: ForumItem> BatchStream<T> {
    /// Build a stream from a fetch function returning the newest items,
    /// newest first.
    ///
    /// The first fetch only records what already exists; nothing from it is
    /// yielded.
    pub fn new<F>(fetch: F) -> Self
    where
        F: FnMut() -> Result<Vec<T>, ForumError> + Send + 'static,
    {
        Self {
            fetch: Box::new(fetch),
            seen: SeenIds::new(SEEN_CAPACITY),
            pending: VecDeque::new(),
            batch_open: false,
            skip_existing: true,
        }
    }

    /// Next item in the current batch, or `None` at the end of the batch.
    pub fn next_item(&mut self) -> Result<Option<T>, ForumError> {
        if !self.batch_open {
            self.fill()?;
            self.batch_open = true;
        }
        match self.pending.pop_front() {
            Some(item) => Ok(Some(item)),
            None => {
                self.batch_open = false;
                Ok(None)
            }
        }
    }

    fn fill(&mut self) -> Result<(), ForumError> {
        let items = (self.fetch)()?;
        let skip = std::mem::replace(&mut self.skip_existing, false);
        for item in items.into_iter().rev() {
            if !self.seen.insert(item.item_id()) {
                continue;
            }
            if !skip {
                self.pending.push_back(item);
            }
        }
        Ok(())
    }
}

/// Insertion-ordered set that forgets its oldest entries past a capacity.
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if the id was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::forum::Submission;

    fn post(id: &str) -> Submission {
        Submission {
            id: id.to_string(),
            fullname: format!("t3_{id}"),
            title: format!("title {id}"),
            selftext: String::new(),
        }
    }

    /// Stream whose fetches return the scripted listings in order, then empty.
    fn scripted(listings: Vec<Vec<Submission>>) -> (BatchStream<Submission>, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let mut listings: VecDeque<_> = listings.into();
        let stream = BatchStream::new(move || {
            *counter.lock().unwrap() += 1;
            Ok(listings.pop_front().unwrap_or_default())
        });
        (stream, calls)
    }

    fn drain_batch(stream: &mut BatchStream<Submission>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(item) = stream.next_item().unwrap() {
            ids.push(item.id);
        }
        ids
    }

    #[test]
    fn existing_items_are_skipped() {
        let (mut stream, _) = scripted(vec![vec![post("b"), post("a")]]);
        assert!(drain_batch(&mut stream).is_empty());
    }

    #[test]
    fn new_items_come_oldest_first() {
        let (mut stream, _) = scripted(vec![
            vec![post("a")],
            vec![post("d"), post("c"), post("b"), post("a")],
        ]);
        assert!(drain_batch(&mut stream).is_empty());
        assert_eq!(drain_batch(&mut stream), vec!["b", "c", "d"]);
    }

    #[test]
    fn sentinel_after_k_items_returns_control() {
        let (mut stream, calls) = scripted(vec![vec![], vec![post("y"), post("x")]]);
        assert!(drain_batch(&mut stream).is_empty());

        assert_eq!(stream.next_item().unwrap().unwrap().id, "x");
        assert_eq!(stream.next_item().unwrap().unwrap().id, "y");
        assert!(stream.next_item().unwrap().is_none());
        // Two fetches so far: the sentinel did not trigger another one.
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn restarts_after_sentinel() {
        let (mut stream, calls) = scripted(vec![vec![], vec![post("a")], vec![post("b"), post("a")]]);
        drain_batch(&mut stream);
        assert_eq!(drain_batch(&mut stream), vec!["a"]);
        assert_eq!(drain_batch(&mut stream), vec!["b"]);
        assert!(drain_batch(&mut stream).is_empty());
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[test]
    fn fetch_error_propagates_and_stream_recovers() {
        let mut attempts = 0;
        let mut stream = BatchStream::new(move || {
            attempts += 1;
            match attempts {
                1 => Ok(vec![]),
                2 => Err(ForumError::Request("timeout".into())),
                _ => Ok(vec![post("z")]),
            }
        });
        assert!(stream.next_item().unwrap().is_none());
        assert!(stream.next_item().is_err());
        assert_eq!(stream.next_item().unwrap().unwrap().id, "z");
    }

    #[test]
    fn seen_ids_forget_oldest_past_capacity() {
        let mut seen = SeenIds::new(2);
        assert!(seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("c"));
        assert!(seen.insert("a"));
    }
}
