//! vmx CLI - Provision Cisco Meraki vMX appliances on AWS.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vmx::config::VmxConfig;
use vmx::pipeline::{
    DecommissionReport, Pipeline, PipelineConfig, PipelineError, ProvisionReport, ProvisionRequest,
};
use vmx::providers::aws::{Credentials, Ec2};
use vmx::providers::Meraki;

/// Exit code when the instance runs but cannot forward traffic.
const EXIT_DEGRADED: u8 = 2;

/// vmx CLI - vMX appliance provisioning.
#[derive(Parser)]
#[command(name = "vmx", version)]
#[command(about = "Provision and decommission Meraki vMX appliances on AWS")]
#[command(group(ArgGroup::new("direction").required(true).args(["up", "down"])))]
struct Cli {
    /// Organization display name (exact, case-sensitive).
    #[arg(short, long)]
    organization: String,

    /// Network name.
    #[arg(short, long)]
    network: String,

    /// Provision a new appliance.
    #[arg(long)]
    up: bool,

    /// Decommission the network and its appliance.
    #[arg(long)]
    down: bool,

    /// Network timezone (IANA name).
    #[arg(long)]
    timezone: Option<String>,

    /// EC2 instance type.
    #[arg(long)]
    instance_type: Option<String>,

    /// Machine image ID.
    #[arg(long)]
    image_id: Option<String>,

    /// Configuration file (TOML).
    #[arg(long, env = "VMX_CONFIG")]
    config: Option<PathBuf>,

    /// Delete the created network if the device claim fails.
    #[arg(long)]
    cleanup_on_failure: bool,

    /// Skip re-reading the device after claiming it.
    #[arg(long)]
    no_verify_claim: bool,

    /// Directory for run state files.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,

    /// Meraki Dashboard API key (or set `MERAKI_DASHBOARD_API_KEY` env var).
    #[arg(long, env = "MERAKI_DASHBOARD_API_KEY", hide_env_values = true)]
    meraki_api_key: String,

    /// AWS access key ID (or set `AWS_ACCESS_KEY_ID` env var).
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    aws_access_key_id: String,

    /// AWS secret access key (or set `AWS_SECRET_ACCESS_KEY` env var).
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: String,

    /// AWS session token (or set `AWS_SESSION_TOKEN` env var).
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    aws_session_token: Option<String>,
}

impl Cli {
    /// Load the config file, then environment overrides, then flags.
    fn load_config(&self) -> Result<VmxConfig> {
        let mut config = VmxConfig::load(self.config.as_deref())?;
        config.apply_env();

        if let Some(tz) = &self.timezone {
            config.pipeline.default_timezone.clone_from(tz);
        }
        if let Some(instance_type) = &self.instance_type {
            config.compute.instance_type.clone_from(instance_type);
        }
        if let Some(image_id) = &self.image_id {
            config.compute.image_id.clone_from(image_id);
        }
        if self.cleanup_on_failure {
            config.pipeline.cleanup_on_failure = true;
        }
        if self.no_verify_claim {
            config.pipeline.verify_claim = false;
        }
        if let Some(dir) = &self.state_dir {
            config.pipeline.state_dir = Some(dir.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "vmx failed");
            eprintln!("\nError: {e:#}");
            if let Some(pipeline_error) = e.downcast_ref::<PipelineError>() {
                print_failure(pipeline_error);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let config = cli.load_config().context("Invalid configuration")?;

    let dashboard = Meraki::from_config(&cli.meraki_api_key, &config.dashboard)
        .context("Failed to create Meraki Dashboard client")?;
    let credentials = Credentials::new(
        &cli.aws_access_key_id,
        &cli.aws_secret_access_key,
        cli.aws_session_token.clone(),
    );
    let compute =
        Ec2::from_config(credentials, &config.compute).context("Failed to create EC2 client")?;

    let pipeline = Pipeline::new(
        Arc::new(dashboard),
        Arc::new(compute),
        PipelineConfig::from_config(&config),
    );

    if cli.down {
        info!(organization = %cli.organization, network = %cli.network, "Scaling down");
        let report = pipeline
            .decommission(&cli.organization, &cli.network)
            .await?;
        print_decommission(&report, cli.json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut request = ProvisionRequest::new(&cli.organization, &cli.network);
    if let Some(tz) = &cli.timezone {
        request = request.with_time_zone(tz);
    }
    info!(organization = %cli.organization, network = %cli.network, "Scaling up");
    let report = pipeline.provision(&request).await?;
    print_provision(&report, cli.json)?;

    Ok(if report.is_degraded() {
        ExitCode::from(EXIT_DEGRADED)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_provision(report: &ProvisionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if report.is_degraded() {
        println!("\n⚠️  vMX launched but cannot forward traffic");
    } else {
        println!("\n✅ vMX provisioned");
    }
    println!("  Run:          {}", report.run_id);
    println!("  Organization: {}", report.organization_id);
    println!("  Network:      {}", report.network_id);
    if let Some(url) = &report.network_url {
        println!("  Dashboard:    {url}");
    }
    println!(
        "  Device:       {} ({})",
        report.device_serial, report.device_model
    );
    println!("  Instance:     {}", report.instance_id);
    if let Some(e) = &report.source_dest_check_error {
        println!("\n  Source/destination check is still enabled: {e}");
        println!(
            "  Disable it manually: aws ec2 modify-instance-attribute --instance-id {} --no-source-dest-check",
            report.instance_id
        );
    }
    Ok(())
}

fn print_decommission(report: &DecommissionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("\n✅ Network {} decommissioned", report.network_name);
    println!("  Network:   {}", report.network_id);
    println!("  Instances: {}", report.terminated_instances.join(", "));
    println!("  Devices:   {}", report.removed_devices.join(", "));
    Ok(())
}

fn print_failure(e: &PipelineError) {
    match e {
        PipelineError::PartialProvisioning { state, cleanup, .. } => {
            eprintln!("\nRemote state left behind:");
            for line in state.describe_remote_state().lines() {
                eprintln!("  {line}");
            }
            eprintln!("  cleanup: {cleanup:?}");
        }
        PipelineError::PartialDecommission { report, .. } => {
            eprintln!("\nAlready removed:");
            eprintln!("  instances: {}", report.terminated_instances.join(", "));
            eprintln!("  devices:   {}", report.removed_devices.join(", "));
            eprintln!("  Re-run with --down to finish.");
        }
        _ => {}
    }
}
