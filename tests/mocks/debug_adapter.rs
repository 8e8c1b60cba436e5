/// Scriptable in-memory debug adapter
///
/// Records every command it receives and emits notifications either on
/// demand (`emit`) or as part of a scripted launch.
use async_trait::async_trait;
use dap_debugger_mcp::debug_adapter::{
    AdapterEvent, ControlAction, DebugAdapter, EvaluateContext, EvaluateOutcome, EventFanout,
    StackFrame,
};
use dap_debugger_mcp::error::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Launch,
    Control(ControlAction, Option<i64>),
    StackTrace(i64),
    Threads,
    Evaluate(String, i64),
}

pub struct MockAdapter {
    events: EventFanout,
    active: AtomicBool,
    stop_on_pause: AtomicBool,
    fail_controls: AtomicBool,
    calls: Mutex<Vec<AdapterCall>>,
    launch_script: Mutex<Vec<AdapterEvent>>,
    frames: Mutex<Vec<StackFrame>>,
    threads: Mutex<Vec<i64>>,
    evaluate_outcome: Mutex<EvaluateOutcome>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            events: EventFanout::new(),
            active: AtomicBool::new(false),
            stop_on_pause: AtomicBool::new(false),
            fail_controls: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            launch_script: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            threads: Mutex::new(vec![1]),
            evaluate_outcome: Mutex::new(EvaluateOutcome::Value(String::new())),
        }
    }

    /// Notifications emitted, in order, when `launch` is called
    pub fn on_launch(&self, events: Vec<AdapterEvent>) {
        *self.launch_script.lock().unwrap() = events;
    }

    /// Answer `pause` commands with a `stopped` notification
    pub fn stop_on_pause(&self, enabled: bool) {
        self.stop_on_pause.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_controls(&self, enabled: bool) {
        self.fail_controls.store(enabled, Ordering::SeqCst);
    }

    pub fn set_frames(&self, frames: Vec<StackFrame>) {
        *self.frames.lock().unwrap() = frames;
    }

    /// A single top frame at a 1-based `line` of `path`
    pub fn set_top_frame(&self, id: i64, path: impl Into<PathBuf>, line: u32) {
        self.set_frames(vec![StackFrame {
            id,
            name: "main".to_string(),
            source_path: Some(path.into()),
            line,
        }]);
    }

    pub fn set_threads(&self, threads: Vec<i64>) {
        *self.threads.lock().unwrap() = threads;
    }

    pub fn set_evaluate_outcome(&self, outcome: EvaluateOutcome) {
        *self.evaluate_outcome.lock().unwrap() = outcome;
    }

    pub fn emit(&self, event: AdapterEvent) {
        if matches!(event, AdapterEvent::Exited { .. } | AdapterEvent::Terminated) {
            self.active.store(false, Ordering::SeqCst);
        }
        self.events.send(event);
    }

    /// Live notification listeners
    pub fn listener_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn control_calls(&self) -> Vec<(ControlAction, Option<i64>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AdapterCall::Control(action, thread) => Some((action, thread)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DebugAdapter for MockAdapter {
    async fn launch(&self) -> Result<()> {
        self.record(AdapterCall::Launch);
        self.active.store(true, Ordering::SeqCst);
        let script = self.launch_script.lock().unwrap().clone();
        for event in script {
            self.emit(event);
        }
        Ok(())
    }

    async fn control(&self, action: ControlAction, thread_id: Option<i64>) -> Result<()> {
        self.record(AdapterCall::Control(action, thread_id));
        if self.fail_controls.load(Ordering::SeqCst) {
            return Err(Error::Adapter(format!("{} rejected", action)));
        }
        match action {
            ControlAction::Pause if self.stop_on_pause.load(Ordering::SeqCst) => {
                self.emit(AdapterEvent::Stopped {
                    thread_id: Some(thread_id.unwrap_or(1)),
                    reason: "pause".to_string(),
                });
            }
            ControlAction::Stop => self.emit(AdapterEvent::Terminated),
            _ => {}
        }
        Ok(())
    }

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrame>> {
        self.record(AdapterCall::StackTrace(thread_id));
        let frames = self.frames.lock().unwrap().clone();
        Ok(frames
            .into_iter()
            .skip(start_frame.max(0) as usize)
            .take(levels.max(0) as usize)
            .collect())
    }

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: i64,
        _context: EvaluateContext,
    ) -> Result<EvaluateOutcome> {
        self.record(AdapterCall::Evaluate(expression.to_string(), frame_id));
        Ok(self.evaluate_outcome.lock().unwrap().clone())
    }

    async fn threads(&self) -> Result<Vec<i64>> {
        self.record(AdapterCall::Threads);
        Ok(self.threads.lock().unwrap().clone())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AdapterEvent> {
        self.events.subscribe()
    }
}
