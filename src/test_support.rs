//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::compute::{
    ComputeApi, ComputeFuture, FirewallOutcome, FirewallRule, InstanceId, InstanceRecord,
    InstanceSpec, InstanceStatus, OperationError, OperationHandle, OperationScope,
    OperationStatus, RemoteApiError,
};
use crate::remote::{CommandOutput, CommandRunner, RemoteError, TimedCommandOutput};

/// Address handed to instances created by [`FakeCompute`].
pub const FAKE_EXTERNAL_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));

#[derive(Clone, Debug)]
enum ScriptedResponse {
    Output(CommandOutput),
    TimedOut,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<ScriptedResponse>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Time limit, when the caller ran the command with one.
    pub limit: Option<Duration>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with stdout text.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::Output(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            }));
    }

    /// Pushes a response that reports the time limit elapsing.
    pub fn push_timeout(&self) {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::TimedOut);
    }

    fn next(
        &self,
        program: &str,
        args: &[OsString],
        limit: Option<Duration>,
    ) -> Result<ScriptedResponse, RemoteError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            limit,
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        match self.next(program, args, None)? {
            ScriptedResponse::Output(output) => Ok(output),
            ScriptedResponse::TimedOut => Err(RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("scripted timeout used without a time limit"),
            }),
        }
    }

    fn run_with_timeout(
        &self,
        program: &str,
        args: &[OsString],
        limit: Duration,
    ) -> Result<TimedCommandOutput, RemoteError> {
        Ok(match self.next(program, args, Some(limit))? {
            ScriptedResponse::Output(output) => TimedCommandOutput::Finished(output),
            ScriptedResponse::TimedOut => TimedCommandOutput::TimedOut,
        })
    }
}

/// Call observed by [`FakeCompute`], in the order it was made.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ComputeCall {
    /// `get_instance` for the named instance.
    GetInstance(String),
    /// `create_instance` with the full spec.
    CreateInstance(InstanceSpec),
    /// `delete_instance` for the named instance.
    DeleteInstance(String),
    /// `create_firewall_rule` for the named rule.
    CreateFirewallRule(String),
    /// `poll_operation`; `done` reports what the poll returned.
    PollOperation {
        /// Operation name.
        name: String,
        /// Whether the returned handle was `Done`.
        done: bool,
    },
}

#[derive(Clone, Debug)]
enum PendingEffect {
    None,
    Create(InstanceRecord),
    Delete,
}

#[derive(Clone, Debug)]
struct PendingOperation {
    remaining: u32,
    effect: PendingEffect,
}

#[derive(Debug, Default)]
struct FakeState {
    instance: Option<InstanceRecord>,
    calls: Vec<ComputeCall>,
    polls_before_done: u32,
    next_operation: u32,
    operations: HashMap<String, PendingOperation>,
    started_at: BTreeSet<usize>,
    existing_rules: BTreeSet<String>,
    firewall_error: Option<RemoteApiError>,
    create_error: Option<RemoteApiError>,
    get_error: Option<RemoteApiError>,
    poll_errors: VecDeque<RemoteApiError>,
    operation_error: Option<OperationError>,
    created_address: Option<IpAddr>,
    lookups_before_vanish: Option<u32>,
}

/// Recording, in-memory stand-in for the compute facade.
///
/// Operations complete after a configurable number of polls. Creating an
/// instance only makes it visible once its operation reports `Done`.
#[derive(Clone, Debug)]
pub struct FakeCompute {
    state: Arc<std::sync::Mutex<FakeState>>,
}

impl Default for FakeCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCompute {
    /// Creates a fake with no instance and immediately completing operations.
    #[must_use]
    pub fn new() -> Self {
        let state = FakeState {
            created_address: Some(FAKE_EXTERNAL_ADDRESS),
            ..FakeState::default()
        };
        Self {
            state: Arc::new(std::sync::Mutex::new(state)),
        }
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut guard)
    }

    /// Seeds an existing instance.
    pub fn set_instance(&self, record: InstanceRecord) {
        self.with_state(|state| state.instance = Some(record));
    }

    /// Seeds a running instance named `name` at `address`.
    pub fn set_running_instance(&self, name: &str, address: Option<IpAddr>) {
        self.set_instance(InstanceRecord {
            name: name.to_owned(),
            status: InstanceStatus::Running,
            external_address: address,
            machine_type: String::from("e2-medium"),
        });
    }

    /// Number of polls returning a non-`Done` status before each operation
    /// completes.
    pub fn set_polls_before_done(&self, polls: u32) {
        self.with_state(|state| state.polls_before_done = polls);
    }

    /// Marks a firewall rule name as already present.
    pub fn add_existing_rule(&self, name: &str) {
        self.with_state(|state| {
            state.existing_rules.insert(name.to_owned());
        });
    }

    /// Makes the next firewall creation fail.
    pub fn fail_firewall(&self, error: RemoteApiError) {
        self.with_state(|state| state.firewall_error = Some(error));
    }

    /// Makes the next instance creation fail.
    pub fn fail_create(&self, error: RemoteApiError) {
        self.with_state(|state| state.create_error = Some(error));
    }

    /// Makes the next lookup fail.
    pub fn fail_get(&self, error: RemoteApiError) {
        self.with_state(|state| state.get_error = Some(error));
    }

    /// Queues an error returned by the next poll.
    pub fn push_poll_error(&self, error: RemoteApiError) {
        self.with_state(|state| state.poll_errors.push_back(error));
    }

    /// Attaches an error payload to operations when they complete.
    pub fn set_operation_error(&self, error: OperationError) {
        self.with_state(|state| state.operation_error = Some(error));
    }

    /// Sets the address assigned to created instances; `None` omits it.
    pub fn set_created_address(&self, address: Option<IpAddr>) {
        self.with_state(|state| state.created_address = address);
    }

    /// Removes the instance after `lookups` further successful lookups.
    pub fn vanish_after_lookups(&self, lookups: u32) {
        self.with_state(|state| state.lookups_before_vanish = Some(lookups));
    }

    /// Returns the current instance, if any.
    #[must_use]
    pub fn instance(&self) -> Option<InstanceRecord> {
        self.with_state(|state| state.instance.clone())
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Names of firewall rules creation was requested for, in order.
    #[must_use]
    pub fn firewall_requests(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ComputeCall::CreateFirewallRule(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Returns `true` when every started operation was polled to `Done`
    /// before any other call was made.
    #[must_use]
    pub fn mutations_awaited(&self) -> bool {
        self.with_state(|state| {
            let mut awaiting = false;
            for (index, call) in state.calls.iter().enumerate() {
                if let ComputeCall::PollOperation { done, .. } = call {
                    awaiting = awaiting && !done;
                    continue;
                }
                if awaiting {
                    return false;
                }
                awaiting = state.started_at.contains(&index);
            }
            !awaiting
        })
    }
}

impl FakeState {
    fn start_operation(
        &mut self,
        project: &str,
        scope: OperationScope,
        effect: PendingEffect,
    ) -> OperationHandle {
        self.next_operation += 1;
        self.started_at.insert(self.calls.len().saturating_sub(1));
        let name = format!("operation-{}", self.next_operation);
        let handle = OperationHandle {
            project: project.to_owned(),
            name: name.clone(),
            scope,
            status: OperationStatus::Pending,
            error: None,
        };
        self.operations.insert(
            name,
            PendingOperation {
                remaining: self.polls_before_done,
                effect,
            },
        );
        handle
    }

    fn poll(&mut self, handle: &OperationHandle) -> Result<OperationHandle, RemoteApiError> {
        if let Some(error) = self.poll_errors.pop_front() {
            return Err(error);
        }
        let Some(pending) = self.operations.get_mut(&handle.name) else {
            return Err(RemoteApiError::NotFound {
                message: format!("operation {} not found", handle.name),
            });
        };
        if pending.remaining > 0 {
            pending.remaining -= 1;
            return Ok(OperationHandle {
                status: OperationStatus::Running,
                ..handle.clone()
            });
        }

        let effect = std::mem::replace(&mut pending.effect, PendingEffect::None);
        let error = self.operation_error.clone();
        if error.is_none() {
            match effect {
                PendingEffect::Create(record) => self.instance = Some(record),
                PendingEffect::Delete => self.instance = None,
                PendingEffect::None => {}
            }
        }
        Ok(OperationHandle {
            status: OperationStatus::Done,
            error,
            ..handle.clone()
        })
    }

    fn lookup(&mut self) -> Result<Option<InstanceRecord>, RemoteApiError> {
        if let Some(error) = self.get_error.take() {
            return Err(error);
        }
        if let Some(remaining) = self.lookups_before_vanish {
            if remaining == 0 {
                self.instance = None;
                self.lookups_before_vanish = None;
            } else {
                self.lookups_before_vanish = Some(remaining - 1);
            }
        }
        Ok(self.instance.clone())
    }
}

impl ComputeApi for FakeCompute {
    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ComputeFuture<'a, Option<InstanceRecord>> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(ComputeCall::GetInstance(id.name.clone()));
                state.lookup()
            })
        })
    }

    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ComputeFuture<'a, OperationHandle> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(ComputeCall::CreateInstance(spec.clone()));
                if let Some(error) = state.create_error.take() {
                    return Err(error);
                }
                if state.instance.is_some() {
                    return Err(RemoteApiError::Conflict {
                        message: format!("instance {} already exists", spec.id.name),
                    });
                }
                let record = InstanceRecord {
                    name: spec.id.name.clone(),
                    status: InstanceStatus::Running,
                    external_address: state.created_address,
                    machine_type: spec.machine_type.clone(),
                };
                Ok(state.start_operation(
                    &spec.id.project,
                    OperationScope::Zonal(spec.id.zone.clone()),
                    PendingEffect::Create(record),
                ))
            })
        })
    }

    fn delete_instance<'a>(&'a self, id: &'a InstanceId) -> ComputeFuture<'a, OperationHandle> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(ComputeCall::DeleteInstance(id.name.clone()));
                if state.instance.is_none() {
                    return Err(RemoteApiError::NotFound {
                        message: format!("instance {} not found", id.name),
                    });
                }
                Ok(state.start_operation(
                    &id.project,
                    OperationScope::Zonal(id.zone.clone()),
                    PendingEffect::Delete,
                ))
            })
        })
    }

    fn create_firewall_rule<'a>(
        &'a self,
        project: &'a str,
        rule: &'a FirewallRule,
    ) -> ComputeFuture<'a, FirewallOutcome> {
        Box::pin(async move {
            self.with_state(|state| {
                state
                    .calls
                    .push(ComputeCall::CreateFirewallRule(rule.name.clone()));
                if let Some(error) = state.firewall_error.take() {
                    return Err(error);
                }
                if !state.existing_rules.insert(rule.name.clone()) {
                    return Ok(FirewallOutcome::AlreadyExists);
                }
                Ok(FirewallOutcome::Created(state.start_operation(
                    project,
                    OperationScope::Global,
                    PendingEffect::None,
                )))
            })
        })
    }

    fn poll_operation<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> ComputeFuture<'a, OperationHandle> {
        Box::pin(async move {
            self.with_state(|state| {
                let result = state.poll(handle);
                state.calls.push(ComputeCall::PollOperation {
                    name: handle.name.clone(),
                    done: result.as_ref().is_ok_and(OperationHandle::is_done),
                });
                result
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
