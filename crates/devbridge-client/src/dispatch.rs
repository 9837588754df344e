//! Agent dispatch table.
//!
//! Capability commands (`<cap>_start_task`, `<cap>_send_message`) go to the
//! [`AgentHandler`] registered under that capability. `agent_call` goes to the
//! [`AgentTarget`] named by its `method`. Every dispatch ends in a
//! [`Response`]; failures and panics inside injected back-ends are turned into
//! error responses plus an advisory, never propagated.

use crate::DispatchError;
use async_trait::async_trait;
use devbridge_core::message::AGENT_CALL_CAPABILITY;
use devbridge_core::{Action, AgentCall, Command, Message, Response};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Companion extension id of the `cline` capability.
pub const CLINE_COMPANION: &str = "saoudrizwan.claude-dev";
/// Companion extension id of the `roocode` capability.
pub const ROOCODE_COMPANION: &str = "rooveterinaryinc.roo-cline";

/// Shows user-visible advisories from failed dispatches.
pub trait Advisor: Send + Sync {
    fn advise(&self, text: &str);
}

/// Advisor that writes advisories to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAdvisor;

impl Advisor for LogAdvisor {
    fn advise(&self, text: &str) {
        tracing::warn!("{text}");
    }
}

/// An automation back-end supplied by the host environment.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The companion tool is installed.
    fn is_available(&self) -> bool;

    /// The companion tool has finished activating.
    fn is_active(&self) -> bool;

    async fn start_task(&self, message: &str, images: &[String]) -> anyhow::Result<()>;

    async fn send_message(&self, message: &str) -> anyhow::Result<()>;
}

/// Receives the combined instruction of an `agent_call`.
#[async_trait]
pub trait AgentTarget: Send + Sync {
    async fn submit(&self, instruction: &str) -> anyhow::Result<()>;
}

/// Bounded wait for a companion tool that is installed but not yet active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationWait {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for ActivationWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            poll: Duration::from_millis(50),
        }
    }
}

/// Runs the commands of one capability against its back-end.
pub struct AgentHandler {
    capability: String,
    display_name: String,
    companion_id: String,
    provider: Arc<dyn Capability>,
    activation: ActivationWait,
}

impl AgentHandler {
    pub fn new(
        capability: impl Into<String>,
        display_name: impl Into<String>,
        companion_id: impl Into<String>,
        provider: Arc<dyn Capability>,
    ) -> Self {
        Self {
            capability: capability.into(),
            display_name: display_name.into(),
            companion_id: companion_id.into(),
            provider,
            activation: ActivationWait::default(),
        }
    }

    /// The `cline` capability, driven through the Cline extension.
    pub fn cline(provider: Arc<dyn Capability>) -> Self {
        Self::new("cline", "Cline", CLINE_COMPANION, provider)
    }

    /// The `roocode` capability, driven through the RooCode extension.
    pub fn roocode(provider: Arc<dyn Capability>) -> Self {
        Self::new("roocode", "RooCode", ROOCODE_COMPANION, provider)
    }

    pub fn with_activation_wait(mut self, activation: ActivationWait) -> Self {
        self.activation = activation;
        self
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Extension id whose presence makes this capability available.
    pub fn companion_id(&self) -> &str {
        &self.companion_id
    }

    /// Carry out `action` and answer with this capability's response.
    ///
    /// A panic anywhere in resolution or invocation becomes an error response.
    pub async fn handle(&self, action: &Action, advisor: &dyn Advisor) -> Response {
        let outcome = match AssertUnwindSafe(self.run(action)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(DispatchError::Panicked(self.capability.clone())),
        };
        match outcome {
            Ok(()) => Response::success(&self.capability),
            Err(err) => {
                let advisory = match &err {
                    DispatchError::NotInstalled(name) => format!(
                        "The extension is not found. Please install {name} extension to use this feature."
                    ),
                    other => format!("{}: {other}", self.display_name),
                };
                tracing::warn!(capability = %self.capability, error = %err, "command failed");
                advisor.advise(&advisory);
                Response::error(&self.capability, err.to_string())
            }
        }
    }

    async fn run(&self, action: &Action) -> Result<(), DispatchError> {
        if !self.provider.is_available() {
            return Err(DispatchError::NotInstalled(self.display_name.clone()));
        }
        self.await_activation().await;

        let invoked = match action {
            Action::StartTask { message, images } => {
                self.provider.start_task(message, images).await
            }
            Action::SendMessage { message } => self.provider.send_message(message).await,
        };
        invoked.map_err(|err| DispatchError::Capability(format!("{err:#}")))
    }

    /// Poll until active or the wait runs out. Proceeds either way.
    async fn await_activation(&self) {
        if self.provider.is_active() {
            return;
        }
        tracing::debug!(capability = %self.capability, "waiting for companion to activate");
        let deadline = Instant::now() + self.activation.timeout;
        while Instant::now() < deadline {
            tokio::time::sleep(self.activation.poll).await;
            if self.provider.is_active() {
                return;
            }
        }
        tracing::debug!(capability = %self.capability, "companion still inactive, proceeding");
    }
}

/// Routes inbound commands to handlers. Read-only once built.
pub struct Dispatcher {
    handlers: HashMap<String, AgentHandler>,
    targets: HashMap<String, Arc<dyn AgentTarget>>,
    advisor: Arc<dyn Advisor>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Registered capability names.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Whether a handler is registered for `capability`.
    pub fn handles(&self, capability: &str) -> bool {
        self.handlers.contains_key(capability)
    }

    /// Whether `message` is something [`dispatch`](Self::dispatch) answers.
    pub fn routes(&self, message: &Message) -> bool {
        match message {
            Message::Command(cmd) => self.handles(&cmd.capability),
            Message::AgentCall(_) => true,
            _ => false,
        }
    }

    /// Answer one inbound message. `None` when it is not ours to answer.
    pub async fn dispatch(&self, message: &Message) -> Option<Response> {
        match message {
            Message::Command(Command { capability, action }) => {
                let handler = self.handlers.get(capability)?;
                Some(handler.handle(action, self.advisor.as_ref()).await)
            }
            Message::AgentCall(call) => Some(self.call_agent(call).await),
            _ => None,
        }
    }

    /// Error response for a command that failed validation.
    ///
    /// `agent_call` is always answered; capability commands only when the
    /// capability is registered.
    pub fn reject(&self, capability: &str, reason: &str) -> Option<Response> {
        if capability != AGENT_CALL_CAPABILITY && !self.handles(capability) {
            return None;
        }
        tracing::debug!(capability, reason, "rejecting malformed command");
        Some(Response::error(
            capability,
            format!("Invalid arguments: {reason}"),
        ))
    }

    async fn call_agent(&self, call: &AgentCall) -> Response {
        let outcome = match AssertUnwindSafe(self.submit(call)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(DispatchError::Panicked(call.method.clone())),
        };
        match outcome {
            Ok(()) => Response::success(AGENT_CALL_CAPABILITY),
            Err(err) => {
                tracing::warn!(method = %call.method, error = %err, "agent call failed");
                self.advisor.advise(&err.to_string());
                Response::error(AGENT_CALL_CAPABILITY, err.to_string())
            }
        }
    }

    async fn submit(&self, call: &AgentCall) -> Result<(), DispatchError> {
        let Some(target) = self.targets.get(&call.method) else {
            return Err(DispatchError::UnsupportedTarget(call.method.clone()));
        };
        target
            .submit(&call.instruction())
            .await
            .map_err(|err| DispatchError::Capability(format!("{err:#}")))
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, AgentHandler>,
    targets: HashMap<String, Arc<dyn AgentTarget>>,
    advisor: Option<Arc<dyn Advisor>>,
}

impl DispatcherBuilder {
    /// Register `handler` under its capability name, replacing any earlier one.
    pub fn capability(mut self, handler: AgentHandler) -> Self {
        self.handlers.insert(handler.capability.clone(), handler);
        self
    }

    /// The `cline` and `roocode` capabilities.
    pub fn builtins(self, cline: Arc<dyn Capability>, roocode: Arc<dyn Capability>) -> Self {
        self.capability(AgentHandler::cline(cline))
            .capability(AgentHandler::roocode(roocode))
    }

    /// Register the `agent_call` target selected by `method`.
    pub fn target(mut self, method: impl Into<String>, target: Arc<dyn AgentTarget>) -> Self {
        self.targets.insert(method.into(), target);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
            targets: self.targets,
            advisor: self.advisor.unwrap_or_else(|| Arc::new(LogAdvisor)),
        }
    }
}
