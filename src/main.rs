use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::deploy::{self, DeployArgs};
use eb_release::release::DeployMode;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "release")]
#[command(version = VERSION)]
#[command(about = "Release the working tree to an AWS Elastic Beanstalk environment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full release pipeline and deploy
    Deploy(DeployArgs),
    /// Run the full release pipeline without deploying
    Simulate(DeployArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Deploy(args) => deploy::run(args, DeployMode::Deploy),
        Commands::Simulate(args) => deploy::run(args, DeployMode::Simulate),
    };

    let (json_result, exit_code) = output::map_cmd_result_to_json(result);
    let _ = output::print_json_result(json_result);
    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
