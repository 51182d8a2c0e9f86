use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a [`CancelToken`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called on this token or an ancestor.
    Cancelled,
    /// The deadline of this token or an ancestor elapsed.
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<CancelToken>,
}

/// Cooperative cancellation signal with an optional deadline.
///
/// Clones share state. A child token fires when it, or any ancestor, is
/// cancelled or past its deadline; cancelling a child does not touch the
/// parent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Some(deadline),
                ..Inner::default()
            }),
        }
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Derive a token that also observes `deadline`.
    #[must_use]
    pub fn child(&self, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        let mut node = Some(self);
        let now = Instant::now();
        while let Some(token) = node {
            if token.inner.cancelled.load(Ordering::Acquire) {
                return Some(CancelReason::Cancelled);
            }
            if token.inner.deadline.is_some_and(|d| now >= d) {
                return Some(CancelReason::DeadlineExceeded);
            }
            node = token.inner.parent.as_ref();
        }
        None
    }

    /// Earliest deadline along the ancestor chain.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;
        let mut node = Some(self);
        while let Some(token) = node {
            if let Some(d) = token.inner.deadline {
                earliest = Some(earliest.map_or(d, |e| e.min(d)));
            }
            node = token.inner.parent.as_ref();
        }
        earliest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert_eq!(clone.reason(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn test_elapsed_deadline_fires() {
        let token = CancelToken::with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn test_child_observes_parent_but_not_vice_versa() {
        let parent = CancelToken::new();
        let child = parent.child(None);
        child.cancel();
        assert!(!parent.is_cancelled());

        let child = parent.child(None);
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_deadline_is_earliest_in_chain() {
        let now = Instant::now();
        let parent = CancelToken::with_deadline(now + Duration::from_secs(1));
        let child = parent.child(Some(now + Duration::from_secs(5)));
        assert_eq!(child.deadline(), Some(now + Duration::from_secs(1)));
    }
}
