//! Boundary with the embedded browser engine
//!
//! The engine itself (rendering, tabs, the GUI loop) lives outside this crate.
//! It only has to expose three hooks: one consulted before every network
//! request, one fired when a page asks for a download, and one for tab and
//! page lifecycle notifications.

use hixs_types::{DownloadRequest, RequestInfo, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Consulted synchronously before each outgoing request. Must return quickly.
pub trait RequestHook: Send + Sync {
    fn on_network_request(&self, request: &RequestInfo) -> Verdict;
}

/// Fired when the engine wants a resource saved to disk
pub trait DownloadHook: Send + Sync {
    fn on_download_requested(&self, request: DownloadRequest);
}

pub trait PageHook: Send + Sync {
    fn on_page_event(&self, event: &PageEvent);
}

/// Tab and page lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    TabOpened { tab: u32 },
    TabClosed { tab: u32 },
    LoadStarted { tab: u32, url: String },
    LoadFinished { tab: u32, url: String, success: bool },
}

/// An embedded engine that can be wired to the core
pub trait BrowserEngine {
    fn set_request_hook(&mut self, hook: Arc<dyn RequestHook>);

    fn set_download_hook(&mut self, hook: Arc<dyn DownloadHook>);

    fn set_page_hook(&mut self, hook: Arc<dyn PageHook>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeEngine {
        request: Option<Arc<dyn RequestHook>>,
        download: Option<Arc<dyn DownloadHook>>,
        page: Option<Arc<dyn PageHook>>,
    }

    impl BrowserEngine for FakeEngine {
        fn set_request_hook(&mut self, hook: Arc<dyn RequestHook>) {
            self.request = Some(hook);
        }

        fn set_download_hook(&mut self, hook: Arc<dyn DownloadHook>) {
            self.download = Some(hook);
        }

        fn set_page_hook(&mut self, hook: Arc<dyn PageHook>) {
            self.page = Some(hook);
        }
    }

    struct BlockAll;

    impl RequestHook for BlockAll {
        fn on_network_request(&self, _request: &RequestInfo) -> Verdict {
            Verdict::Block
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl DownloadHook for Recorder {
        fn on_download_requested(&self, request: DownloadRequest) {
            self.0.lock().push(request.url);
        }
    }

    #[test]
    fn engine_calls_installed_hooks() {
        let mut engine = FakeEngine::default();
        let recorder = Arc::new(Recorder::default());
        engine.set_request_hook(Arc::new(BlockAll));
        engine.set_download_hook(recorder.clone());

        let verdict = engine
            .request
            .as_ref()
            .unwrap()
            .on_network_request(&RequestInfo::new("https://example.com/"));
        assert_eq!(verdict, Verdict::Block);

        engine
            .download
            .as_ref()
            .unwrap()
            .on_download_requested(DownloadRequest::new("https://example.com/a.zip"));
        assert_eq!(*recorder.0.lock(), vec!["https://example.com/a.zip"]);
        assert!(engine.page.is_none());
    }

    #[test]
    fn page_events_serialize_with_tag() {
        let event = PageEvent::LoadFinished {
            tab: 1,
            url: "https://example.com/".into(),
            success: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "load_finished");
        assert_eq!(json["success"], true);
    }
}
