//! Binary entry point for the Stratus CLI.

use std::io::{self, BufRead, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use stratus::{
    AccessToken, CONFIRMATION_TOKEN, ConfigError, DeployConfig, DeployError, DeployMode,
    DeployOutcome, DeployPath, DeployReport, DeploymentDescriptor, GceClient, InstanceId,
    Orchestrator, OrchestratorSettings, ProcessCommandRunner, RemoteApiError, RemoteConfig,
    RemoteConfigLoadError, RemoteError, RemoteExecutor, ScriptKind, StatusReporter, Teardown,
    TeardownError, TokenError, VerifyError, firewall_notice, render, render_status,
    render_update, verify_access,
};

mod cli;

use cli::{Cli, ModeArg};

/// Exit status when the remote script outlived its execution limit.
const EXIT_PENDING: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    SshConfig(#[from] RemoteConfigLoadError),
    #[error("ssh error: {0}")]
    Remote(#[from] RemoteError),
    #[error("credentials error: {0}")]
    Token(#[from] TokenError),
    #[error("compute API error: {0}")]
    Api(#[from] RemoteApiError),
    #[error("{0}")]
    Deploy(#[from] DeployError),
    #[error("{0}")]
    Teardown(#[from] TeardownError),
    #[error("{0}")]
    Verify(#[from] VerifyError),
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    fn remediation(&self) -> Option<String> {
        match self {
            Self::Api(err) => err.remediation(),
            Self::Deploy(err) => err.remediation(),
            Self::Teardown(err) => err.remediation(),
            _ => None,
        }
    }
}

impl From<ModeArg> for DeployMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Auto => Self::Auto,
            ModeArg::Fresh => Self::Fresh,
            ModeArg::Existing => Self::Existing,
        }
    }
}

/// Loaded configuration and the descriptor built from it.
struct Context {
    config: DeployConfig,
    descriptor: DeploymentDescriptor,
}

impl Context {
    fn load() -> Result<Self, CliError> {
        let config = DeployConfig::load_without_cli_args()?;
        config.validate()?;
        let descriptor = DeploymentDescriptor::from_config(&config)?;
        Ok(Self { config, descriptor })
    }

    fn compute(&self) -> Result<GceClient, CliError> {
        let token = AccessToken::resolve(
            self.config.access_token.as_deref(),
            &ProcessCommandRunner,
            &self.config.gcloud_bin,
        )?;
        Ok(GceClient::new(self.config.api_base_url.as_str(), token)?)
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Deploy(args) => deploy(args.mode.into(), ScriptKind::Bootstrap).await,
        Cli::Update => deploy(DeployMode::Existing, ScriptKind::Update).await,
        Cli::Status => status().await,
        Cli::Destroy(args) => destroy(args.confirm).await,
        Cli::Verify => verify().await,
        Cli::Script(args) => print_script(args.update),
    }
}

async fn deploy(mode: DeployMode, kind: ScriptKind) -> Result<i32, CliError> {
    let context = Context::load()?;
    let executor = RemoteExecutor::with_process_runner(RemoteConfig::load_without_cli_args()?)?;
    let orchestrator = Orchestrator::new(context.compute()?, executor)
        .with_settings(OrchestratorSettings::from(&context.config));

    match orchestrator.run(&context.descriptor, mode, kind).await? {
        DeployOutcome::Verified(report) => {
            write_report(io::stdout(), &report)?;
            Ok(0)
        }
        DeployOutcome::Pending {
            instance,
            stage,
            limit,
        } => {
            writeln!(
                io::stdout(),
                "Deployment to {instance} is still running after {}s (last stage {stage}).\n\
                 Check progress with `stratus status` before re-running.",
                limit.as_secs()
            )?;
            Ok(EXIT_PENDING)
        }
    }
}

async fn status() -> Result<i32, CliError> {
    let context = Context::load()?;
    let id = context.descriptor.instance_id();
    let record = StatusReporter::new(context.compute()?).status(&id).await?;
    let app_port = context.descriptor.application().port;
    write!(io::stdout(), "{}", render_status(&id, record.as_ref(), app_port))?;
    Ok(0)
}

async fn destroy(confirm: Option<String>) -> Result<i32, CliError> {
    let context = Context::load()?;
    let id = context.descriptor.instance_id();
    let confirmation = match confirm {
        Some(value) => value,
        None => prompt_confirmation(io::stdin().lock(), io::stdout(), &id)?,
    };
    if confirmation != CONFIRMATION_TOKEN {
        return Err(TeardownError::NotConfirmed.into());
    }

    let report = Teardown::new(context.compute()?)
        .with_timing(context.config.poll_interval(), context.config.run_timeout())
        .destroy(&id, Some(&confirmation))
        .await?;
    let rules: Vec<String> = context
        .descriptor
        .firewall_rules()
        .into_iter()
        .map(|rule| rule.name)
        .collect();
    let mut stdout = io::stdout();
    writeln!(stdout, "Deleted instance {}.", report.instance)?;
    writeln!(stdout, "{}", firewall_notice(&rules))?;
    Ok(0)
}

async fn verify() -> Result<i32, CliError> {
    let context = Context::load()?;
    let id = context.descriptor.instance_id();
    let report = verify_access(&context.compute()?, &id).await?;
    let presence = if report.instance_exists {
        "exists"
    } else {
        "does not exist yet"
    };
    writeln!(
        io::stdout(),
        "Access confirmed for project {} zone {}; instance {} {presence}.",
        id.project, id.zone, id.name
    )?;
    Ok(0)
}

fn print_script(update: bool) -> Result<i32, CliError> {
    let context = Context::load()?;
    let payload = if update {
        render_update(&context.descriptor)
    } else {
        render(&context.descriptor)
    };
    write!(io::stdout(), "{payload}")?;
    Ok(0)
}

fn prompt_confirmation(
    mut input: impl BufRead,
    mut output: impl Write,
    id: &InstanceId,
) -> Result<String, CliError> {
    write!(
        output,
        "This permanently deletes {id} and its boot disk. Type {CONFIRMATION_TOKEN} to continue: "
    )?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_owned())
}

fn write_report(mut target: impl Write, report: &DeployReport) -> io::Result<()> {
    writeln!(target, "Deployment verified: {}", report.instance)?;
    let path = match report.path {
        DeployPath::Fresh => "created",
        DeployPath::Existing => "updated in place",
    };
    writeln!(target, "Instance:         {path}")?;
    if !report.rules_created.is_empty() {
        writeln!(target, "Firewall created: {}", report.rules_created.join(", "))?;
    }
    if !report.rules_existing.is_empty() {
        writeln!(target, "Firewall present: {}", report.rules_existing.join(", "))?;
    }
    match report.external_address {
        Some(address) => writeln!(target, "External IP:      {address}")?,
        None => writeln!(target, "External IP:      (not assigned yet)")?,
    }
    for url in report.site_urls() {
        writeln!(target, "Site:             {url}")?;
    }
    if report.path == DeployPath::Fresh {
        writeln!(
            target,
            "The startup script keeps running after first boot; follow it with \
             `gcloud compute instances get-serial-port-output {}`.",
            report.instance.name
        )?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
    if let Some(hint) = err.remediation() {
        writeln!(target, "hint: {hint}").ok();
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use stratus::{DeployFailure, DeployStage};

    fn report(path: DeployPath) -> DeployReport {
        DeployReport {
            instance: InstanceId::new("demo-project", "us-central1-a", "web-01"),
            path,
            rules_created: vec![String::from("shop-http")],
            rules_existing: vec![String::from("shop-https")],
            external_address: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10))),
            execution: None,
        }
    }

    #[test]
    fn mode_argument_maps_to_deploy_mode() {
        assert_eq!(DeployMode::from(ModeArg::Auto), DeployMode::Auto);
        assert_eq!(DeployMode::from(ModeArg::Fresh), DeployMode::Fresh);
        assert_eq!(DeployMode::from(ModeArg::Existing), DeployMode::Existing);
    }

    #[test]
    fn prompt_keeps_the_typed_literal() {
        let id = InstanceId::new("demo-project", "us-central1-a", "web-01");
        let mut shown = Vec::new();

        let typed = prompt_confirmation(&b" DELETE\r\n"[..], &mut shown, &id).expect("prompt");

        assert_eq!(typed, " DELETE");
        let prompt = String::from_utf8(shown).expect("utf8");
        assert!(prompt.contains("Type DELETE to continue"));
    }

    #[test]
    fn fresh_report_points_at_serial_output() {
        let mut buf = Vec::new();
        write_report(&mut buf, &report(DeployPath::Fresh)).expect("write");
        let rendered = String::from_utf8(buf).expect("utf8");

        assert!(rendered.contains("Instance:         created"));
        assert!(rendered.contains("Firewall created: shop-http"));
        assert!(rendered.contains("Firewall present: shop-https"));
        assert!(rendered.contains("Site:             http://203.0.113.10"));
        assert!(rendered.contains("get-serial-port-output web-01"));
    }

    #[test]
    fn existing_report_omits_serial_hint() {
        let mut buf = Vec::new();
        write_report(&mut buf, &report(DeployPath::Existing)).expect("write");
        let rendered = String::from_utf8(buf).expect("utf8");

        assert!(rendered.contains("updated in place"));
        assert!(!rendered.contains("serial-port"));
    }

    #[test]
    fn write_error_appends_remediation() {
        let err = CliError::Api(RemoteApiError::from_status(403, "forbidden"));
        let mut buf = Vec::new();

        write_error(&mut buf, &err);

        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.starts_with("compute API error: permission denied: forbidden"));
        assert!(rendered.contains("hint: "));
        assert!(rendered.contains("roles/compute.admin"));
    }

    #[test]
    fn deploy_errors_render_stage_and_cause() {
        let err = CliError::from(DeployError::new(
            DeployStage::Bootstrapped,
            DeployFailure::Execution {
                exit_code: Some(1),
                stderr: String::from("npm ERR!"),
            },
        ));
        let mut buf = Vec::new();

        write_error(&mut buf, &err);

        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.starts_with("deployment failed at BOOTSTRAPPED"));
        assert!(rendered.contains("npm ERR!"));
        assert!(!rendered.contains("hint:"));
    }
}
