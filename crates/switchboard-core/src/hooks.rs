use futures::future::BoxFuture;
use tracing::warn;

use crate::config::HooksConfig;
use crate::traits::SessionHooks;
use crate::types::{EndReason, SessionSummary};

/// Execute hook commands with environment variables.
/// Fire-and-forget: errors are logged, not propagated.
pub async fn run_hooks(commands: &[String], env_vars: &[(&str, &str)]) {
    for cmd in commands {
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", cmd]);
        for (key, val) in env_vars {
            command.env(key, val);
        }
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());
        match command.status().await {
            Ok(s) if !s.success() => warn!(hook = %cmd, code = s.code(), "Hook exited non-zero"),
            Err(e) => warn!(hook = %cmd, error = %e, "Hook failed to execute"),
            _ => {}
        }
    }
}

/// Session hooks backed by the `[hooks]` shell commands.
pub struct ShellHooks {
    config: HooksConfig,
}

impl ShellHooks {
    pub fn new(config: HooksConfig) -> Self {
        Self { config }
    }
}

impl SessionHooks for ShellHooks {
    fn on_start<'a>(&'a self, session: &'a SessionSummary) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let call_id = session.call_id.to_string();
            let channel = session.channel.to_string();
            run_hooks(
                &self.config.on_session_start,
                &[
                    ("SWITCHBOARD_CALL_ID", call_id.as_str()),
                    ("SWITCHBOARD_CHANNEL", channel.as_str()),
                    ("SWITCHBOARD_CALLING_NUMBER", session.calling_number.as_str()),
                    ("SWITCHBOARD_LOCALE", session.locale.as_str()),
                ],
            )
            .await;
        })
    }

    fn on_end<'a>(
        &'a self,
        session: &'a SessionSummary,
        reason: &'a EndReason,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let call_id = session.call_id.to_string();
            let channel = session.channel.to_string();
            let reason = reason.to_string();
            let hops = session.hops.to_string();
            run_hooks(
                &self.config.on_session_end,
                &[
                    ("SWITCHBOARD_CALL_ID", call_id.as_str()),
                    ("SWITCHBOARD_CHANNEL", channel.as_str()),
                    ("SWITCHBOARD_END_REASON", reason.as_str()),
                    ("SWITCHBOARD_HOPS", hops.as_str()),
                ],
            )
            .await;
        })
    }
}

/// Hooks that do nothing.
pub struct NoHooks;

impl SessionHooks for NoHooks {
    fn on_start<'a>(&'a self, _session: &'a SessionSummary) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn on_end<'a>(
        &'a self,
        _session: &'a SessionSummary,
        _reason: &'a EndReason,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}
