//! BDD step definitions for the deployment workflow.

use rstest_bdd_macros::{given, then, when};
use stratus::test_support::ComputeCall;
use stratus::{DeployMode, DeployOutcome, DeployPath, DeployReport};
use tokio::runtime::Runtime;

use super::test_helpers::{DeployContext, EXISTING_ADDRESS, descriptor_for};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn parse_mode(mode: &str) -> Result<DeployMode, StepError> {
    match mode.trim() {
        "auto" => Ok(DeployMode::Auto),
        "fresh" => Ok(DeployMode::Fresh),
        "existing" => Ok(DeployMode::Existing),
        other => Err(StepError::Assertion(format!("unknown mode {other}"))),
    }
}

fn verified_report(deploy_context: &DeployContext) -> Result<DeployReport, StepError> {
    match deploy_context.outcome.borrow().as_ref() {
        Some(Ok(DeployOutcome::Verified(report))) => Ok(report.clone()),
        other => Err(StepError::Assertion(format!(
            "expected a verified deployment, got {other:?}"
        ))),
    }
}

#[given("a deployment descriptor for instance \"{name}\"")]
fn descriptor_for_instance(deploy_context: &DeployContext, name: String) {
    deploy_context
        .descriptor
        .replace(Some(descriptor_for(name.trim())));
}

#[given("the provider completes operations after {polls} polls")]
fn operations_complete_after(deploy_context: &DeployContext, polls: u32) {
    deploy_context.compute.set_polls_before_done(polls);
}

#[given("instance \"{name}\" is running")]
fn instance_running(deploy_context: &DeployContext, name: String) {
    deploy_context
        .compute
        .set_running_instance(name.trim(), Some(EXISTING_ADDRESS));
}

#[given("firewall rule \"{name}\" already exists")]
fn firewall_rule_exists(deploy_context: &DeployContext, name: String) {
    deploy_context.compute.add_existing_rule(name.trim());
}

#[given("the payload transfer succeeds")]
fn transfer_succeeds(deploy_context: &DeployContext) {
    deploy_context.runner.push_success();
}

#[given("the remote payload succeeds")]
fn payload_succeeds(deploy_context: &DeployContext) {
    deploy_context.runner.push_stdout("Deployment complete\n");
}

#[given("the remote payload fails with status {code} and stderr \"{stderr}\"")]
fn payload_fails(deploy_context: &DeployContext, code: i32, stderr: String) {
    deploy_context.runner.push_failure(code, stderr);
}

#[given("the remote payload times out")]
fn payload_times_out(deploy_context: &DeployContext) {
    deploy_context.runner.push_timeout();
}

#[when("I deploy in \"{mode}\" mode")]
fn deploy_in_mode(deploy_context: &DeployContext, mode: String) -> Result<(), StepError> {
    let deploy_mode = parse_mode(&mode)?;
    let descriptor = deploy_context
        .descriptor
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("descriptor not configured")))?;
    let orchestrator = deploy_context
        .orchestrator()
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;

    let result = runtime.block_on(orchestrator.deploy(&descriptor, deploy_mode));
    deploy_context.outcome.replace(Some(result));
    Ok(())
}

#[then("the deployment is verified on the \"{path}\" path")]
fn verified_on_path(deploy_context: &DeployContext, path: String) -> Result<(), StepError> {
    let expected = match path.trim() {
        "fresh" => DeployPath::Fresh,
        "existing" => DeployPath::Existing,
        other => return Err(StepError::Assertion(format!("unknown path {other}"))),
    };
    let report = verified_report(deploy_context)?;
    if report.path == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?} path, got {:?}",
            report.path
        )))
    }
}

#[then("every mutation was awaited before the next call")]
fn mutations_awaited(deploy_context: &DeployContext) -> Result<(), StepError> {
    if deploy_context.compute.mutations_awaited() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "a call overtook a pending operation: {:?}",
            deploy_context.compute.calls()
        )))
    }
}

#[then("the firewall rules \"{names}\" were requested in order")]
fn rules_requested_in_order(deploy_context: &DeployContext, names: String) -> Result<(), StepError> {
    let expected: Vec<String> = names.split(',').map(|name| name.trim().to_owned()).collect();
    let actual = deploy_context.compute.firewall_requests();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected rule requests {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the commands \"{programs}\" were run")]
fn commands_run(deploy_context: &DeployContext, programs: String) -> Result<(), StepError> {
    let expected: Vec<String> = programs
        .split(',')
        .map(|program| program.trim().to_owned())
        .collect();
    let actual: Vec<String> = deploy_context
        .runner
        .invocations()
        .into_iter()
        .map(|invocation| invocation.program)
        .collect();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected commands {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the deployment fails at stage \"{stage}\"")]
fn fails_at_stage(deploy_context: &DeployContext, stage: String) -> Result<(), StepError> {
    match deploy_context.outcome.borrow().as_ref() {
        Some(Err(err)) if err.stage.to_string() == stage.trim() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure at {stage}, got {other:?}"
        ))),
    }
}

#[then("the failure mentions \"{text}\"")]
fn failure_mentions(deploy_context: &DeployContext, text: String) -> Result<(), StepError> {
    match deploy_context.outcome.borrow().as_ref() {
        Some(Err(err)) if err.to_string().contains(text.trim()) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a failure mentioning {text}, got {other:?}"
        ))),
    }
}

#[then("the deployment is pending")]
fn deployment_pending(deploy_context: &DeployContext) -> Result<(), StepError> {
    match deploy_context.outcome.borrow().as_ref() {
        Some(Ok(DeployOutcome::Pending { .. })) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a pending outcome, got {other:?}"
        ))),
    }
}

#[then("firewall rule \"{name}\" is reported as existing")]
fn rule_reported_existing(deploy_context: &DeployContext, name: String) -> Result<(), StepError> {
    let report = verified_report(deploy_context)?;
    if report.rules_existing.iter().any(|rule| rule == name.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {name} among existing rules, got {:?}",
            report.rules_existing
        )))
    }
}

#[then("no instance was created")]
fn no_instance_created(deploy_context: &DeployContext) -> Result<(), StepError> {
    let created = deploy_context
        .compute
        .calls()
        .iter()
        .any(|call| matches!(call, ComputeCall::CreateInstance(_)));
    if created {
        Err(StepError::Assertion(String::from("an instance was created")))
    } else {
        Ok(())
    }
}
