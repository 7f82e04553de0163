//! Scripted executor shared by the swarm tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use relay_agent::{AgentExecutor, ExecutorError};

type Respond = Box<dyn Fn(&str, u32) -> relay_agent::Result<String> + Send + Sync>;

/// Answers each prompt with `respond(prompt, attempt)`, where `attempt`
/// counts how often that exact prompt has been seen (starting at 1).
pub struct ScriptedExecutor {
    respond: Respond,
    delay: Duration,
    seen: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<(String, String, bool)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(respond: impl Fn(&str, u32) -> relay_agent::Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            seen: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replies with the prompt itself.
    pub fn echo() -> Self {
        Self::new(|prompt, _| Ok(prompt.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// (prompt, agent, reset_context) for every call, in call order.
    pub fn calls(&self) -> Vec<(String, String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub fn failure(agent: &str) -> ExecutorError {
    ExecutorError::NonZeroExit {
        agent: agent.to_string(),
        code: Some(1),
        stderr: "scripted failure".into(),
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn invoke(&self, prompt: &str, agent: &str, reset_context: bool) -> relay_agent::Result<String> {
        let attempt = {
            let mut seen = self.seen.lock().unwrap();
            let n = seen.entry(prompt.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), agent.to_string(), reset_context));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.respond)(prompt, attempt)
    }
}
