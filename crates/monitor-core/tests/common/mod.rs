//! Scripted in-memory executor shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use callwatch_monitor_core::{
    CommandOutput, MonitorError, MonitorResult, RemoteCommandExecutor, RemoteSession,
};

/// One scripted reaction, consumed in order
#[derive(Debug, Clone)]
pub enum Step {
    /// Next `connect` fails
    ConnectError(MonitorError),
    /// Next `execute` returns this output
    Output(CommandOutput),
    /// Next `execute` fails at the transport level
    ExecError(MonitorError),
    /// Next `execute` never completes
    Hang,
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Step>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    executed: AtomicUsize,
}

/// Executor whose behaviour is fully scripted
///
/// Once the script runs out every command returns an empty listing.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    shared: Arc<Shared>,
    command_timeout: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let executor = Self::default();
        executor.shared.script.lock().unwrap().extend(steps);
        executor
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.shared.executed.load(Ordering::SeqCst)
    }

    fn pop_if(&self, accept: impl Fn(&Step) -> bool) -> Option<Step> {
        let mut script = self.shared.script.lock().unwrap();
        if script.front().is_some_and(|step| accept(step)) {
            script.pop_front()
        } else {
            None
        }
    }
}

#[async_trait]
impl RemoteCommandExecutor for ScriptedExecutor {
    fn target(&self) -> String {
        "scripted@pbx:22".to_string()
    }

    fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    async fn connect(&self) -> MonitorResult<Box<dyn RemoteSession>> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(Step::ConnectError(error)) =
            self.pop_if(|step| matches!(step, Step::ConnectError(_)))
        {
            return Err(error);
        }
        Ok(Box::new(ScriptedSession {
            executor: self.clone(),
        }))
    }
}

struct ScriptedSession {
    executor: ScriptedExecutor,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn execute(&mut self, _command: &str) -> MonitorResult<CommandOutput> {
        self.executor.shared.executed.fetch_add(1, Ordering::SeqCst);
        match self
            .executor
            .pop_if(|step| !matches!(step, Step::ConnectError(_)))
        {
            Some(Step::Output(output)) => Ok(output),
            Some(Step::ExecError(error)) => Err(error),
            Some(Step::Hang) => std::future::pending().await,
            _ => Ok(CommandOutput::from_stdout(listing(&[]))),
        }
    }

    async fn close(&mut self) {
        self.executor.shared.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A `core show channels verbose` listing with one row per `(caller, state)`
///
/// `None` produces a row without any caller number.
pub fn listing(rows: &[(Option<&str>, &str)]) -> String {
    let mut out = String::from(
        "Channel              Context    Extension Prio State   Application Data     CallerID   Duration\n",
    );
    for (i, (caller, state)) in rows.iter().enumerate() {
        out.push_str(&format!(
            "SIP/trunk-{:04}       from-pstn  100       1    {:<7} Dial        SIP/100  {:<10} 00:00:{:02}\n",
            i + 1,
            state,
            caller.unwrap_or("anonymous"),
            i * 5
        ));
    }
    out.push_str(&format!("{} active channels\n", rows.len()));
    out
}

pub fn output(rows: &[(Option<&str>, &str)]) -> Step {
    Step::Output(CommandOutput::from_stdout(listing(rows)))
}

pub fn stderr(message: &str) -> Step {
    Step::Output(CommandOutput {
        stdout: Vec::new(),
        stderr: message.as_bytes().to_vec(),
        exit_code: Some(1),
    })
}

pub fn refused() -> Step {
    Step::ConnectError(MonitorError::ConnectionFailed {
        target: "scripted@pbx:22".to_string(),
        reason: "Connection refused".to_string(),
    })
}
