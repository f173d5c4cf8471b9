//! Main CLI for copybench
// (c) 2024 Ross Younger

use std::ffi::OsString;
use std::process::ExitCode;

use super::args::{CliArgs, MainMode};
use crate::{
    cli::styles::{RESET, configure_colours, error, result, use_colours},
    client::{LoadGenerator, LoadReport, MAX_UPDATE_FPS, Parameters, Workload, progress_bar},
    config::{Configuration, Manager},
    server::{Server, termination_signal},
    util::{ConsoleTraceType, LogSettings, setup_tracing},
};

use anyhow::{Context as _, Result};
use indicatif::{MultiProgress, ProgressDrawTarget};

/// Main CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `cli(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
///
/// # Note
/// In server mode this function starts a tokio runtime and runs until interrupted.
#[must_use]
pub fn cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    #[allow(clippy::match_bool)] // improved readability
    cli_inner(args)
        .inspect_err(|e| {
            if crate::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                anstream::eprintln!("{ERROR}Error:{RESET} {e:#}", ERROR = error());
            }
        })
        .map_or(ExitCode::FAILURE, |success| match success {
            true => ExitCode::SUCCESS,
            false => ExitCode::FAILURE,
        })
}

/// Inner CLI logic
///
/// # Return
/// true indicates success. false indicates a failure that has already been reported.
fn cli_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    configure_colours();
    let Some(args) = parse_args(args)? else {
        return Ok(true); // help/version shown; exit
    };

    let mut manager = Manager::standard();
    manager.merge_provider(args.config.clone());

    match args.mode() {
        MainMode::ShowConfigFiles => {
            println!("{:?}", Manager::config_files());
            Ok(true)
        }
        MainMode::ShowConfig => {
            println!("{}", show_config_data(&manager));
            let _ = manager.get()?;
            Ok(true)
        }
        MainMode::Server => run_server(&manager, &args.client_params),
        MainMode::Client => run_client(&manager, &args.client_params),
    }
}

fn parse_args<I, T>(args: I) -> Result<Option<CliArgs>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    match CliArgs::custom_parse(args) {
        Ok(args) => Ok(Some(args)),
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            let message = e.render();
            if use_colours() {
                println!("{}", message.ansi());
            } else {
                println!("{message}");
            }
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn show_config_data(manager: &Manager) -> String {
    format!("Configuration:\n{manager}")
}

// MODE HANDLERS ///////////////////////////////////////////////////////////

fn run_server(manager: &Manager, params: &Parameters) -> Result<bool> {
    let config = manager.get()?;
    setup_tracing(
        &LogSettings::new(params, config.time_format),
        ConsoleTraceType::Standard,
    )?;
    serve(&config)
}

#[tokio::main(flavor = "current_thread")]
async fn serve(config: &Configuration) -> Result<bool> {
    let server = Server::bind(config)
        .with_context(|| format!("[Server] failed to listen on {}", config.address))?;
    let _ = server.run(termination_signal()).await;
    Ok(true)
}

fn run_client(manager: &Manager, params: &Parameters) -> Result<bool> {
    let config = manager.get()?;
    let workload = Workload::try_from(params)?;

    let display =
        MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(MAX_UPDATE_FPS));
    if params.quiet {
        display.set_draw_target(ProgressDrawTarget::hidden());
    }
    setup_tracing(
        &LogSettings::new(params, config.time_format),
        ConsoleTraceType::Indicatif(display.clone()),
    )?;

    let load = load_generator(&config, params, workload);
    let bar = progress_bar(
        &display,
        workload.duration_seconds,
        format!("{} x {}", workload.payload_size, workload.connections),
    );
    let report = load.run_with_progress(&bar);
    bar.finish_and_clear();

    anstream::println!("{RESULT}{report}{RESET}", RESULT = result());
    Ok(client_succeeded(&report))
}

fn load_generator(
    config: &Configuration,
    params: &Parameters,
    workload: Workload,
) -> LoadGenerator {
    let mut load = LoadGenerator::new(
        config.address,
        workload.payload_size,
        workload.connections,
        workload.duration_seconds,
    );
    load.sink_buffer = config.sink_buffer;
    load.verify = params.verify;
    load
}

/// A run succeeds if at least one connection completed, or none were asked for
fn client_succeeded(report: &LoadReport) -> bool {
    report.connections == 0 || !report.per_worker.is_empty()
}
