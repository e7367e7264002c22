//! Request interceptor
//!
//! Called synchronously by the engine's network layer once per outgoing
//! request. It never performs I/O: a block bumps the shared counter and
//! posts a `TrackerBlocked` event on the broadcast channel, which does not wait
//! for receivers.

use crate::filter::{PatternMatcher, TrackerCounter};
use hixs_types::{CoreEvent, RequestInfo, Verdict};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};

/// Ad and tracker blocking hook
#[derive(Debug)]
pub struct RequestInterceptor {
    matcher: Arc<PatternMatcher>,
    counter: Arc<TrackerCounter>,
    enabled: AtomicBool,
    event_tx: broadcast::Sender<CoreEvent>,
}

impl RequestInterceptor {
    pub fn new(
        matcher: Arc<PatternMatcher>,
        counter: Arc<TrackerCounter>,
        event_tx: broadcast::Sender<CoreEvent>,
        enabled: bool,
    ) -> Self {
        Self {
            matcher,
            counter,
            enabled: AtomicBool::new(enabled),
            event_tx,
        }
    }

    /// Decide whether `request` may be sent.
    ///
    /// Fails open: if evaluation panics the request is allowed and the
    /// failure is logged, so nothing unwinds into the engine.
    pub fn intercept(&self, request: &RequestInfo) -> Verdict {
        if !self.is_enabled() {
            return Verdict::Allow;
        }

        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
            self.matcher.first_match(&request.url)
        }));

        match evaluated {
            Ok(Some(pattern)) => {
                let total = self.counter.increment();
                debug!(
                    url = %request.url,
                    resource = ?request.resource_type,
                    pattern,
                    total,
                    "Blocked request"
                );
                let _ = self.event_tx.send(CoreEvent::TrackerBlocked {
                    url: request.url.clone(),
                    total,
                });
                Verdict::Block
            }
            Ok(None) => {
                trace!(url = %request.url, "Allowed request");
                Verdict::Allow
            }
            Err(_) => {
                error!(url = %request.url, "Request evaluation failed, allowing request");
                Verdict::Allow
            }
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        debug!("Ad blocking {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Requests blocked so far, across every tab
    pub fn blocked_count(&self) -> u64 {
        self.counter.get()
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hixs_types::ResourceType;

    fn interceptor(enabled: bool) -> (RequestInterceptor, broadcast::Receiver<CoreEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let matcher = Arc::new(PatternMatcher::builtin().unwrap());
        let interceptor =
            RequestInterceptor::new(matcher, Arc::new(TrackerCounter::new()), event_tx, enabled);
        (interceptor, event_rx)
    }

    #[test]
    fn blocks_trackers_and_counts_them() {
        let (interceptor, _rx) = interceptor(true);

        let ad = RequestInfo::new("https://stats.doubleclick.net/pixel")
            .with_resource_type(ResourceType::Image);
        assert_eq!(interceptor.intercept(&ad), Verdict::Block);

        let page = RequestInfo::new("https://www.rust-lang.org/")
            .with_resource_type(ResourceType::MainFrame);
        assert_eq!(interceptor.intercept(&page), Verdict::Allow);

        assert_eq!(interceptor.blocked_count(), 1);
    }

    #[test]
    fn malformed_url_fails_open() {
        let (interceptor, _rx) = interceptor(true);
        let request = RequestInfo::new("::not a url pagead::");
        assert_eq!(interceptor.intercept(&request), Verdict::Allow);
        assert_eq!(interceptor.blocked_count(), 0);
    }

    #[test]
    fn disabled_interceptor_allows_everything() {
        let (interceptor, _rx) = interceptor(false);
        let ad = RequestInfo::new("https://stats.doubleclick.net/pixel");
        assert_eq!(interceptor.intercept(&ad), Verdict::Allow);
        assert_eq!(interceptor.blocked_count(), 0);

        interceptor.set_enabled(true);
        assert_eq!(interceptor.intercept(&ad), Verdict::Block);
    }

    #[test]
    fn block_publishes_new_total() {
        let (interceptor, mut rx) = interceptor(true);
        interceptor.intercept(&RequestInfo::new("https://static.hotjar.com/c/hotjar.js"));
        interceptor.intercept(&RequestInfo::new("https://api.segment.io/v1/t"));

        let totals: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|event| match event {
                CoreEvent::TrackerBlocked { total, .. } => Some(total),
                _ => None,
            })
            .collect();
        assert_eq!(totals, vec![1, 2]);
    }

    #[test]
    fn concurrent_blocks_are_all_counted() {
        let (interceptor, _rx) = interceptor(true);
        let request = RequestInfo::new("https://www.google-analytics.com/analytics.js");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        assert!(interceptor.intercept(&request).is_block());
                    }
                });
            }
        });

        assert_eq!(interceptor.blocked_count(), 2_000);
    }
}
