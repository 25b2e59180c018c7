//! Mocks and fixtures shared by the Switchboard test suites.
//!
//! Depends only on `switchboard-core` so every crate can use it as a
//! dev-dependency.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use switchboard_core::config::AppConfig;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::traits::{BusinessHours, CallControl, DialogBridge, SessionHooks};
use switchboard_core::types::{CallId, DialogRequest, Directive, EndReason, Outcome, SessionSummary};

/// Call control and dialog bridge in one, recording everything it is asked to do.
#[derive(Default)]
pub struct MockPlatform {
    directives: Mutex<Vec<(CallId, Directive)>>,
    dialogs: Mutex<Vec<(CallId, DialogRequest)>>,
    failing: HashSet<&'static str>,
    fail_dialogs: bool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every directive with this name (e.g. `"bridge"`).
    pub fn fail_on(mut self, directive: &'static str) -> Self {
        self.failing.insert(directive);
        self
    }

    /// Make `start_dialog` fail.
    pub fn fail_dialogs(mut self) -> Self {
        self.fail_dialogs = true;
        self
    }

    /// All directives executed through call control, in order.
    pub fn directives(&self) -> Vec<(CallId, Directive)> {
        self.directives.lock().unwrap().clone()
    }

    /// Directives executed for one call.
    pub fn directives_for(&self, call_id: &CallId) -> Vec<Directive> {
        self.directives
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == call_id)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// All dialog requests, in order.
    pub fn dialogs(&self) -> Vec<(CallId, DialogRequest)> {
        self.dialogs.lock().unwrap().clone()
    }
}

impl CallControl for MockPlatform {
    fn execute(&self, call_id: &CallId, directive: &Directive) -> BoxFuture<'_, Result<Outcome>> {
        self.directives
            .lock()
            .unwrap()
            .push((call_id.clone(), directive.clone()));
        let result = if self.failing.contains(directive.name()) {
            Err(SwitchboardError::CallControl {
                directive: directive.name().to_string(),
                message: "mock failure".into(),
            })
        } else {
            Ok(Outcome::success())
        };
        Box::pin(async move { result })
    }
}

impl DialogBridge for MockPlatform {
    fn start_dialog(&self, call_id: &CallId, request: &DialogRequest) -> BoxFuture<'_, Result<()>> {
        self.dialogs
            .lock()
            .unwrap()
            .push((call_id.clone(), request.clone()));
        let result = if self.fail_dialogs {
            Err(SwitchboardError::DialogBridge("mock failure".into()))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }
}

/// Business hours fixed at construction.
pub struct FixedHours(pub bool);

impl BusinessHours for FixedHours {
    fn is_open(&self) -> bool {
        self.0
    }
}

/// Session hooks that count calls and remember end reasons.
#[derive(Default)]
pub struct RecordingHooks {
    starts: AtomicUsize,
    ends: AtomicUsize,
    reasons: Mutex<Vec<(CallId, EndReason)>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    pub fn last_reason(&self) -> Option<EndReason> {
        self.reasons.lock().unwrap().last().map(|(_, r)| r.clone())
    }

    pub fn reason_for(&self, call_id: &CallId) -> Option<EndReason> {
        self.reasons
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == call_id)
            .map(|(_, r)| r.clone())
    }
}

impl SessionHooks for RecordingHooks {
    fn on_start<'a>(&'a self, _session: &'a SessionSummary) -> BoxFuture<'a, ()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn on_end<'a>(
        &'a self,
        session: &'a SessionSummary,
        reason: &'a EndReason,
    ) -> BoxFuture<'a, ()> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.reasons
            .lock()
            .unwrap()
            .push((session.call_id.clone(), reason.clone()));
        Box::pin(async {})
    }
}

/// Main number used by the fixture configuration.
pub const MAIN_NUMBER: &str = "+15551234567";

/// A complete configuration with a private trunk and both reference locales.
pub const FIXTURE_TOML: &str = r#"
[telephony]
main_number = "+15551234567"
trunk = "arn:aws:chime:trunk/fixture"
ringback_key = "ringing.wav"

[flow]
default_locale = "en-US"
max_hops = 32

[locales.en-US]
dialog_prompt = "How can we help you today?"
assets = { goodbye = "goodbye-en-US.wav" }
phrases = { goodbye = "Thanks for calling, goodbye." }

[locales.es-US]
dialog_prompt = "¿En qué podemos ayudarle hoy?"
assets = { goodbye = "goodbye-es-US.wav" }
phrases = { goodbye = "Gracias por llamar, adiós." }
"#;

pub fn fixture_config() -> AppConfig {
    AppConfig::from_toml(FIXTURE_TOML).unwrap()
}

/// Write config text to a temporary `.toml` file.
pub fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}
