use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::booru::BooruClient;
use crate::cancel::CancellationToken;
use crate::error::HarvestError;

/// Lazily pages through one query's search results.
///
/// Pages are requested only when the previous one is drained, so a consumer
/// that stops early never causes the next request. The walk ends on an empty
/// page or at `max_pages`; an error is yielded once and then the walker is
/// exhausted. There is no mid-walk checkpoint: a new walk starts at page 1.
pub struct PageWalker<'a, C: BooruClient + ?Sized> {
    client: &'a C,
    query: String,
    cancel: &'a CancellationToken,
    max_pages: Option<u32>,
    next_page: u32,
    buffer: VecDeque<Value>,
    finished: bool,
}

impl<'a, C: BooruClient + ?Sized> PageWalker<'a, C> {
    pub fn new(
        client: &'a C,
        query: impl Into<String>,
        max_pages: Option<u32>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            query: query.into(),
            cancel,
            max_pages,
            next_page: 1,
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> u32 {
        self.next_page - 1
    }

    fn fill(&mut self) -> Result<bool, HarvestError> {
        if self.max_pages.is_some_and(|max| self.next_page > max) {
            return Ok(false);
        }
        if self.cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }
        let page = self.next_page;
        let items = self.client.fetch_page(&self.query, page)?;
        self.next_page += 1;
        debug!(query = %self.query, page, items = items.len(), "page fetched");
        if items.is_empty() {
            return Ok(false);
        }
        self.buffer.extend(items);
        Ok(true)
    }
}

impl<C: BooruClient + ?Sized> Iterator for PageWalker<'_, C> {
    type Item = Result<Value, HarvestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.buffer.pop_front() {
            return Some(Ok(item));
        }
        if self.finished {
            return None;
        }
        match self.fill() {
            Ok(true) => self.buffer.pop_front().map(Ok),
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::booru::AssetResponse;

    struct Pages {
        pages: Vec<Result<Vec<Value>, u16>>,
        requested: Mutex<Vec<u32>>,
    }

    impl BooruClient for Pages {
        fn fetch_page(&self, _query: &str, page: u32) -> Result<Vec<Value>, HarvestError> {
            self.requested.lock().unwrap().push(page);
            match self.pages.get(page as usize - 1) {
                Some(Ok(items)) => Ok(items.clone()),
                Some(Err(status)) => Err(HarvestError::ApiStatus {
                    status: *status,
                    message: "boom".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }

        fn fetch_asset(&self, _url: &str) -> Result<AssetResponse, HarvestError> {
            unreachable!()
        }
    }

    #[test]
    fn walks_until_empty_page() {
        let client = Pages {
            pages: vec![Ok(vec![json!(1), json!(2)]), Ok(vec![json!(3)])],
            requested: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();
        let items: Vec<_> = PageWalker::new(&client, "q", None, &cancel)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(*client.requested.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn stopping_early_skips_next_page() {
        let client = Pages {
            pages: vec![Ok(vec![json!(1), json!(2)]), Ok(vec![json!(3)])],
            requested: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();
        let taken: Vec<_> = PageWalker::new(&client, "q", None, &cancel).take(2).collect();
        assert_eq!(taken.len(), 2);
        assert_eq!(*client.requested.lock().unwrap(), vec![1]);
    }

    #[test]
    fn error_is_yielded_once() {
        let client = Pages {
            pages: vec![Ok(vec![json!(1)]), Err(502)],
            requested: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();
        let mut walker = PageWalker::new(&client, "q", None, &cancel);
        assert!(walker.next().unwrap().is_ok());
        assert_matches!(
            walker.next(),
            Some(Err(HarvestError::ApiStatus { status: 502, .. }))
        );
        assert!(walker.next().is_none());
    }

    #[test]
    fn respects_page_bound() {
        let client = Pages {
            pages: vec![Ok(vec![json!(1)]), Ok(vec![json!(2)])],
            requested: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();
        let walker = PageWalker::new(&client, "q", Some(1), &cancel);
        assert_eq!(walker.count(), 1);
        assert_eq!(*client.requested.lock().unwrap(), vec![1]);
    }
}
