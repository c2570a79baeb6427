//! URL fetch work items.

use shotdiff_tools::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};

use crate::engine::{Processor, WorkError, WorkItem};
use crate::runtime::LocalRuntime;

/// An HTTP request. `response` is filled in by the fetch pool.
///
/// Any HTTP status counts as success here; callers decide what a non-2xx
/// response means.
#[derive(Debug, Clone)]
pub struct FetchItem {
    pub request: FetchRequest,
    pub response: Option<FetchResponse>,
}

impl FetchItem {
    pub fn new(request: FetchRequest) -> Self {
        Self {
            request,
            response: None,
        }
    }

    pub fn response(&self) -> Result<&FetchResponse, WorkError> {
        self.response
            .as_ref()
            .ok_or_else(|| WorkError::failed(format!("No response for {}", self.request.url)))
    }
}

impl WorkItem for FetchItem {
    const KIND: &'static str = "fetch";
}

/// Fetch pool processor.
pub struct FetchProcessor<F = HttpFetcher> {
    runtime: LocalRuntime,
    fetcher: F,
}

impl<F: Fetcher + 'static> FetchProcessor<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            runtime: LocalRuntime::new(),
            fetcher,
        }
    }
}

impl Default for FetchProcessor<HttpFetcher> {
    fn default() -> Self {
        Self::new(HttpFetcher::new())
    }
}

impl<F: Fetcher + 'static> Processor for FetchProcessor<F> {
    type Item = FetchItem;

    fn process(&mut self, item: &mut FetchItem) -> Result<(), WorkError> {
        tracing::trace!(url = %item.request.url, method = ?item.request.method, "Fetching");
        let response = self.runtime.block_on(self.fetcher.fetch(&item.request))??;
        item.response = Some(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shotdiff_tools::ToolError;
    use std::collections::HashMap;

    struct StaticFetcher {
        status: u16,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ToolError> {
            if request.url.contains("down") {
                return Err(ToolError::Transient("connection refused".to_string()));
            }
            Ok(FetchResponse {
                status: self.status,
                headers: HashMap::new(),
                body: format!("{{\"url\": \"{}\"}}", request.url),
            })
        }
    }

    #[test]
    fn test_fetch_fills_response() {
        let mut processor = FetchProcessor::new(StaticFetcher { status: 200 });
        let mut item = FetchItem::new(FetchRequest::get("http://queue/health"));
        processor.process(&mut item).unwrap();

        let response = item.response().unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.contains("queue/health"));
    }

    #[test]
    fn test_fetch_error_is_typed() {
        let mut processor = FetchProcessor::new(StaticFetcher { status: 200 });
        let mut item = FetchItem::new(FetchRequest::get("http://down/"));
        let err = processor.process(&mut item).unwrap_err();
        assert!(err.is_transient());
        assert!(item.response.is_none());
    }
}
