// Entry point and command dispatch.
//
// Two front ends share one pipeline:
// - `interactive` walks the user through a menu and reads the flat spreadsheet.
// - `generate` takes a JSON request body (as posted by the web form), reads
//   the database and writes a zip bundle, printing the JSON response.
mod classify;
mod config;
mod error;
mod interactive;
mod join;
mod loader;
mod naming;
mod output;
mod panel;
mod reshape;
mod service;
mod stata;
mod types;
mod util;

use chrono::Local;
use clap::{Parser, Subcommand};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use config::AppConfig;
use error::StatusClass;
use loader::DatabaseSource;

#[derive(Parser)]
#[command(name = "xzqh-panel")]
#[command(about = "Administrative division panels (province/city/county) for a range of years")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Menu-driven generation from the flat spreadsheet (default)
    Interactive,
    /// Handle one JSON request against the database and print the response
    Generate {
        /// Request body file, or `-` for stdin
        #[arg(long, short = 'r', default_value = "-")]
        request: String,
    },
}

fn read_body(request: &str) -> io::Result<String> {
    if request == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(request)
    }
}

fn sweep(config: &AppConfig) {
    if let Err(e) = output::sweep_stale_artifacts(&config.download_dir, config.retention()) {
        log::warn!(
            "Could not sweep {}: {}",
            config.download_dir.display(),
            e
        );
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(e.status_class().exit_code() as u8);
        }
    };
    sweep(&config);

    match cli.command.unwrap_or(Command::Interactive) {
        Command::Interactive => {
            interactive::run(&config);
            ExitCode::SUCCESS
        }
        Command::Generate { request } => {
            let body = match read_body(&request) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("Cannot read request {}: {}", request, e);
                    return ExitCode::from(StatusClass::ClientInput.exit_code() as u8);
                }
            };
            let source = DatabaseSource::new(&config.database_path, config.table.clone());
            let outcome = service::handle_generate(&body, &config, &source, Local::now());
            match serde_json::to_string_pretty(&outcome.body) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Cannot encode response: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            match outcome.status {
                200 => ExitCode::SUCCESS,
                400 => ExitCode::from(StatusClass::ClientInput.exit_code() as u8),
                _ => ExitCode::from(StatusClass::ProcessingFailure.exit_code() as u8),
            }
        }
    }
}
