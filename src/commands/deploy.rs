use clap::Args;
use serde::Serialize;

use eb_release::prompt::PromptEngine;
use eb_release::release::{DeployMode, ReleaseOptions, ReleasePipeline, RunResult};
use eb_release::utils::command::SystemRunner;

use super::CmdResult;

#[derive(Args)]
pub struct DeployArgs {
    /// EB environment to release to (prompted when omitted)
    pub environment: Option<String>,

    /// Path to a release config file (defaults to ./ebr.config.json)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Skip tasks, manifest edits and branch publish; just deploy
    #[arg(long)]
    pub deploy_only: bool,

    /// Log stage detail, not just milestones
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print stage timings when the run ends
    #[arg(long)]
    pub performance: bool,
}

#[derive(Serialize)]
pub struct DeployOutput {
    pub command: String,
    pub result: RunResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub tasks_run: usize,
    pub deploy_only: bool,
    pub simulated: bool,
}

pub fn run(args: DeployArgs, mode: DeployMode) -> CmdResult<DeployOutput> {
    let cwd = std::env::current_dir().map_err(|e| {
        eb_release::Error::internal_io(e.to_string(), Some("resolve working directory".to_string()))
    })?;

    let runner = SystemRunner;
    let mut decider = PromptEngine::new();
    let options = ReleaseOptions {
        environment: args.environment,
        config_file: args.file,
        deploy_only: args.deploy_only,
        mode,
        verbose: args.verbose,
        performance: args.performance,
    };

    let mut pipeline = ReleasePipeline::new(&runner, &mut decider, &cwd, options);
    let report = pipeline.run()?;
    let exit_code = report.result.exit_code();

    let command = match mode {
        DeployMode::Deploy => "deploy",
        DeployMode::Simulate => "simulate",
    };
    Ok((
        DeployOutput {
            command: command.to_string(),
            result: report.result,
            environment: report.environment,
            tasks_run: report.tasks_run,
            deploy_only: report.deploy_only,
            simulated: report.simulated,
        },
        exit_code,
    ))
}
