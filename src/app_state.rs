use std::sync::Arc;

use crate::db::store::JobStore;
use crate::services::{
    host::HostController, queue::QueueClient, recognizer::Recognizer, storage::ResultSink,
};

/// External collaborators shared by the worker loop and the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueClient>,
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn ResultSink>,
    pub recognizer: Arc<dyn Recognizer>,
    pub host: Arc<dyn HostController>,
}

impl AppState {
    pub fn new(
        queue: impl QueueClient + 'static,
        jobs: impl JobStore + 'static,
        results: impl ResultSink + 'static,
        recognizer: impl Recognizer + 'static,
        host: impl HostController + 'static,
    ) -> Self {
        Self {
            queue: Arc::new(queue),
            jobs: Arc::new(jobs),
            results: Arc::new(results),
            recognizer: Arc::new(recognizer),
            host: Arc::new(host),
        }
    }
}
