use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{ AtomicU32, Ordering };
use std::sync::Mutex;

use super::{ ApiRequest, ApiResponse, ExchangeError, HttpExchange };

/// Replays canned outcomes in order and records every request it sees.
pub(crate) struct ScriptedExchange {
    script: Mutex<VecDeque<Result<ApiResponse, ExchangeError>>>,
    seen: Mutex<Vec<ApiRequest>>,
    calls: AtomicU32,
}

impl ScriptedExchange {
    pub(crate) fn new(script: Vec<Result<ApiResponse, ExchangeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpExchange for ScriptedExchange {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExchangeError::Connect("script exhausted".into())))
    }
}
