//! BDD scenarios for the deployment workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{DeployContext, deploy_context};

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Fresh deployment creates the instance and waits for completion"
)]
fn scenario_fresh_deploy(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Redeploying onto a running instance runs the payload over SSH"
)]
fn scenario_existing_deploy(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "A failing payload stops the run at BOOTSTRAPPED"
)]
fn scenario_failing_payload(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "A payload that outlives its limit ends as pending"
)]
fn scenario_pending_payload(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Firewall rules that already exist are reused"
)]
fn scenario_existing_rules(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Requiring an existing instance fails when it is absent"
)]
fn scenario_missing_instance(deploy_context: DeployContext) {
    drop(deploy_context);
}
