use super::VisionLanguageService;
use crate::models::{CompletionCall, CompletionOutcome};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MockVisionClient {
    outcomes: Arc<Mutex<Vec<CompletionOutcome>>>,
    calls: Arc<Mutex<Vec<CompletionCall>>>,
}

impl MockVisionClient {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, text: &str) -> Self {
        let raw = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        });
        let raw = serde_json::to_string_pretty(&raw).unwrap_or_default();
        self.with_outcome(CompletionOutcome::success(text.to_string(), raw))
    }

    pub fn with_outcome(self, outcome: CompletionOutcome) -> Self {
        self.outcomes.lock().unwrap().push(outcome);
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded_calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockVisionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionLanguageService for MockVisionClient {
    async fn complete(&self, call: &CompletionCall) -> CompletionOutcome {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call.clone());

        let outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            // Default mock response
            CompletionOutcome::success(
                format!("Mock response from {}", call.request.model),
                "{}".to_string(),
            )
        } else {
            let index = (calls.len() - 1) % outcomes.len();
            outcomes[index].clone()
        }
    }
}
