//! In-memory doubles for the external seams, used by unit and scenario tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::external::{CommandOutput, CommandRunner, NodeCommunicationError, NodeCommunicator};
use crate::node::NodeAddresses;
use crate::reports::LibraryError;

type CommandHandler = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// Command runner that answers through a closure and records every call.
pub struct ScriptedCommandRunner {
    handler: CommandHandler,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedCommandRunner {
    pub fn new(handler: impl Fn(&[String]) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Runner answering every call with the same output.
    pub fn returning(output: &str, retval: i32) -> Self {
        let output = output.to_string();
        Self::new(move |_| CommandOutput::new(output.clone(), retval))
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutput, LibraryError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(args.to_vec());
        Ok((self.handler)(args))
    }
}

/// One request seen by [`ScriptedNodeCommunicator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Host name, or the node's ring0 address for node calls.
    pub target: String,
    pub request: String,
    pub data: String,
    /// True when sent through `call_node` rather than `call_host`.
    pub via_node: bool,
}

/// Node communicator with per (host, request) scripted answers.
///
/// Unscripted requests succeed with an empty body.
#[derive(Default)]
pub struct ScriptedNodeCommunicator {
    responses: Mutex<HashMap<(String, String), Result<String, NodeCommunicationError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedNodeCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, host: &str, request: &str, body: &str) {
        self.set(host, request, Ok(body.to_string()));
    }

    pub fn fail(&self, host: &str, request: &str, error: NodeCommunicationError) {
        self.set(host, request, Err(error));
    }

    /// Makes `host` unreachable for `request`.
    pub fn fail_unreachable(&self, host: &str, request: &str) {
        self.fail(
            host,
            request,
            NodeCommunicationError::UnableToConnect {
                node: host.to_string(),
                command: request.to_string(),
                reason: "connection refused".to_string(),
            },
        );
    }

    fn set(&self, host: &str, request: &str, answer: Result<String, NodeCommunicationError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((host.to_string(), request.to_string()), answer);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, request: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.request == request)
            .collect()
    }

    fn answer(
        &self,
        target: &str,
        request: &str,
        data: &str,
        via_node: bool,
    ) -> Result<String, NodeCommunicationError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                target: target.to_string(),
                request: request.to_string(),
                data: data.to_string(),
                via_node,
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(target.to_string(), request.to_string()))
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

#[async_trait]
impl NodeCommunicator for ScriptedNodeCommunicator {
    async fn call_host(
        &self,
        host: &str,
        request: &str,
        data: &str,
    ) -> Result<String, NodeCommunicationError> {
        self.answer(host, request, data, false)
    }

    async fn call_node(
        &self,
        node: &NodeAddresses,
        request: &str,
        data: &str,
    ) -> Result<String, NodeCommunicationError> {
        self.answer(&node.ring0, request, data, true)
    }
}
