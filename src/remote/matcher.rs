//! Key matching shared by the backends that enumerate stored entries
//!
//! An entry whose name equals any requested key is an exact match and ends
//! the search. Otherwise entries whose name starts with a requested key are
//! candidates, and the most recently modified candidate wins. A candidate is
//! only replaced by a strictly newer one, so ties and missing timestamps keep
//! whichever was seen first.

use crate::error::{BkStateError, BkStateResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

/// How a stored name relates to the requested keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    Exact,
    Prefix,
    None,
}

/// Requested keys, primary first
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    keys: Vec<String>,
}

impl KeyMatcher {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn classify(&self, name: &str) -> KeyMatch {
        if self.keys.iter().any(|k| k == name) {
            KeyMatch::Exact
        } else if self.keys.iter().any(|k| name.starts_with(k.as_str())) {
            KeyMatch::Prefix
        } else {
            KeyMatch::None
        }
    }
}

/// A stored entry offered for selection
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
    pub item: T,
}

/// Running best match over a sequence of candidates
#[derive(Debug)]
pub struct Selection<T> {
    best: Option<Candidate<T>>,
    exact: bool,
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self {
            best: None,
            exact: false,
        }
    }
}

impl<T> Selection<T> {
    /// Consider one candidate. Returns `true` once an exact match is held.
    pub fn offer(&mut self, matcher: &KeyMatcher, candidate: Candidate<T>) -> bool {
        if self.exact {
            return true;
        }
        match matcher.classify(&candidate.name) {
            KeyMatch::Exact => {
                self.best = Some(candidate);
                self.exact = true;
            }
            KeyMatch::Prefix => {
                let newer = match &self.best {
                    None => true,
                    Some(current) => match (current.modified, candidate.modified) {
                        (Some(old), Some(new)) => new > old,
                        _ => false,
                    },
                };
                if newer {
                    self.best = Some(candidate);
                }
            }
            KeyMatch::None => {}
        }
        self.exact
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn into_inner(self) -> Option<Candidate<T>> {
        self.best
    }
}

/// A source of entries that can be listed by name prefix
#[async_trait]
pub trait PrefixLister: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Send every entry under `prefix`, one page at a time.
    ///
    /// Stop quietly when `pages` is closed.
    async fn list_pages(
        &self,
        prefix: String,
        pages: mpsc::Sender<Vec<Candidate<Self::Item>>>,
    ) -> BkStateResult<()>;
}

/// List every key concurrently and select the best match.
///
/// The first listing error cancels the other listings and is returned.
/// An exact match cancels them too. Pages already sent are still drained.
pub async fn resolve_concurrently<L: PrefixLister>(
    lister: Arc<L>,
    keys: Vec<String>,
) -> BkStateResult<Option<Candidate<L::Item>>> {
    let matcher = KeyMatcher::new(keys.clone());
    let (tx, mut rx) = mpsc::channel(keys.len().max(1));

    let mut tasks = JoinSet::new();
    for key in keys {
        let lister = Arc::clone(&lister);
        let tx = tx.clone();
        tasks.spawn(async move { lister.list_pages(key, tx).await });
    }
    drop(tx);

    let mut selection = Selection::default();
    let mut failure: Option<BkStateError> = None;

    loop {
        tokio::select! {
            page = rx.recv() => match page {
                Some(page) => {
                    if selection.is_exact() {
                        continue;
                    }
                    for candidate in page {
                        if selection.offer(&matcher, candidate) {
                            debug!("exact match found, cancelling remaining listings");
                            tasks.abort_all();
                            break;
                        }
                    }
                }
                // Every sender is gone, so every task has finished or been aborted.
                None => break,
            },
            Some(joined) = tasks.join_next(), if failure.is_none() => {
                if let Some(err) = task_failure(joined) {
                    tasks.abort_all();
                    failure = Some(err);
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if failure.is_none() {
            failure = task_failure(joined);
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(selection.into_inner()),
    }
}

fn task_failure(
    joined: Result<BkStateResult<()>, tokio::task::JoinError>,
) -> Option<BkStateError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(join) if join.is_cancelled() => None,
        Err(join) => Some(BkStateError::Internal(format!("listing task failed: {join}"))),
    }
}
