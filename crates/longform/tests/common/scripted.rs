//! Completion backend scripted per operation name.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use longform::llm::{Completion, CompletionError, CompletionRequest, TextCompletion};

type SectionFn = dyn Fn(usize) -> String + Send + Sync;

/// `n` copies of "word" joined by spaces.
pub fn filler(n: usize) -> String {
    vec!["word"; n].join(" ")
}

/// Answers `plan_structure`, `write_section`, `rewrite`, `compress`,
/// `enhance` and `style_profile` requests from scripted data.
pub struct ScriptedCompletion {
    plans: Mutex<VecDeque<String>>,
    default_plan: Mutex<String>,
    section: Box<SectionFn>,
    rewrite: Mutex<Option<String>>,
    compress: Mutex<Option<String>>,
    enhance: Mutex<Option<String>>,
    style: Mutex<Option<String>>,
    fail_from: AtomicUsize,
    section_gate: Mutex<Option<Arc<Semaphore>>>,
    calls: Mutex<HashMap<String, usize>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    /// `section(n)` produces the body for the n-th `write_section` call
    /// (zero-based, counted across retries).
    pub fn new(plan: &str, section: impl Fn(usize) -> String + Send + Sync + 'static) -> Self {
        Self {
            plans: Mutex::new(VecDeque::new()),
            default_plan: Mutex::new(plan.to_string()),
            section: Box::new(section),
            rewrite: Mutex::new(None),
            compress: Mutex::new(None),
            enhance: Mutex::new(None),
            style: Mutex::new(None),
            fail_from: AtomicUsize::new(usize::MAX),
            section_gate: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Outline with `n` top-level sections titled "Part 1".."Part n".
    pub fn outline(title: &str, n: usize) -> String {
        let mut out = format!("# {}\n", title);
        for i in 1..=n {
            out.push_str(&format!("## Part {}\n", i));
        }
        out
    }

    /// Planner answers consumed before falling back to the default plan.
    pub fn queue_plans(self, plans: &[&str]) -> Self {
        self.plans
            .lock()
            .unwrap()
            .extend(plans.iter().map(|p| p.to_string()));
        self
    }

    pub fn rewrite_with(self, text: impl Into<String>) -> Self {
        *self.rewrite.lock().unwrap() = Some(text.into());
        self
    }

    pub fn compress_with(self, text: impl Into<String>) -> Self {
        *self.compress.lock().unwrap() = Some(text.into());
        self
    }

    pub fn enhance_with(self, json: impl Into<String>) -> Self {
        *self.enhance.lock().unwrap() = Some(json.into());
        self
    }

    pub fn style_with(self, json: impl Into<String>) -> Self {
        *self.style.lock().unwrap() = Some(json.into());
        self
    }

    /// Holds every `write_section` call until the returned semaphore
    /// gets permits.
    pub fn gate_sections(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.section_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// `write_section` calls from the `call`-th on fail with a
    /// non-retryable error.
    pub fn fail_sections_from(&self, call: usize) {
        self.fail_from.store(call, Ordering::SeqCst);
    }

    pub fn stop_failing(&self) {
        self.fail_from.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn requests_for(&self, operation: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }

    fn bump(&self, operation: &str) -> usize {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(operation.to_string()).or_insert(0);
        *count += 1;
        *count - 1
    }

    fn scripted(slot: &Mutex<Option<String>>, operation: &str) -> Result<String, CompletionError> {
        slot.lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CompletionError::rejected(format!("no script for {}", operation)))
    }
}

#[async_trait]
impl TextCompletion for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let operation = request.operation.clone();
        self.requests.lock().unwrap().push(request);
        let n = self.bump(&operation);

        let text = match operation.as_str() {
            "plan_structure" => {
                let queued = self.plans.lock().unwrap().pop_front();
                Ok(queued.unwrap_or_else(|| self.default_plan.lock().unwrap().clone()))
            }
            "write_section" => {
                let gate = self.section_gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.acquire().await.unwrap().forget();
                }
                if n >= self.fail_from.load(Ordering::SeqCst) {
                    Err(CompletionError::rejected("section backend unavailable"))
                } else {
                    Ok((self.section)(n))
                }
            }
            "rewrite" => Self::scripted(&self.rewrite, "rewrite"),
            "compress" => Self::scripted(&self.compress, "compress"),
            "enhance" => Self::scripted(&self.enhance, "enhance"),
            "style_profile" => Self::scripted(&self.style, "style_profile"),
            other => Err(CompletionError::rejected(format!("unexpected operation {}", other))),
        }?;
        Ok(Completion::new(text))
    }
}
