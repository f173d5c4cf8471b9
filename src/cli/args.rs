//! Command line argument definitions
// (c) 2024 Ross Younger

use std::ffi::OsString;

use clap::Parser;

use crate::{client::Parameters, config::ConfigOverrides};

#[derive(Debug, Parser, Clone)]
#[command(
    version,
    about,
    before_help = "e.g.   copybench --server --strategy zero-copy\n       copybench 800000 4 10",
    infer_long_args(true)
)]
#[command(help_template(
    "\
{name} version {version}
{about-with-newline}
{usage-heading} {usage}
{before-help}
{all-args}{after-help}
"
))]
#[command(styles=super::styles::CLAP_STYLES)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct CliArgs {
    // MODE SELECTION ======================================================================
    /// Runs the benchmark server.
    ///
    /// The server accepts connections on the configured address and streams the requested
    /// payload to each client with the configured strategy until the client's duration expires.
    #[arg(
        long,
        action,
        conflicts_with_all(["show_config", "config_files"]),
        help_heading("Modes"),
        display_order(0)
    )]
    pub(crate) server: bool,

    /// Outputs the configuration, then exits.
    ///
    /// Each setting is shown with the source it was taken from.
    #[arg(long, help_heading("Configuration"), display_order(0))]
    pub(crate) show_config: bool,

    /// Outputs the paths to configuration file(s), then exits
    #[arg(long, help_heading("Configuration"), display_order(0))]
    pub(crate) config_files: bool,

    // CONFIGURABLE OPTIONS ================================================================
    #[command(flatten)]
    pub(crate) config: ConfigOverrides,

    // CLIENT-ONLY OPTIONS =================================================================
    #[command(flatten)]
    pub(crate) client_params: Parameters,
}

impl CliArgs {
    /// Sets up and executes our parser
    pub(crate) fn custom_parse<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Self::try_parse_from(args)?;
        // The positionals are only required in client mode; report their absence
        // the same way clap reports its own usage errors.
        if args.mode() == MainMode::Client {
            let p = &args.client_params;
            if p.payload_size.is_none() || p.connections.is_none() || p.duration.is_none() {
                let mut cmd = <Self as clap::CommandFactory>::command();
                return Err(cmd.error(
                    clap::error::ErrorKind::MissingRequiredArgument,
                    "SIZE, CONNECTIONS and DURATION are required unless a mode option is given",
                ));
            }
        }
        Ok(args)
    }

    /// Works out which mode we are running in
    pub(crate) fn mode(&self) -> MainMode {
        if self.config_files {
            MainMode::ShowConfigFiles
        } else if self.show_config {
            MainMode::ShowConfig
        } else if self.server {
            MainMode::Server
        } else {
            MainMode::Client
        }
    }
}

/// The things we can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(crate) enum MainMode {
    /// Run the benchmark server
    Server,
    /// Print the merged configuration
    ShowConfig,
    /// List the configuration files
    ShowConfigFiles,
    /// Run the load generator
    Client,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{CliArgs, MainMode};
    use crate::strategy::Strategy;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::custom_parse(std::iter::once("copybench").chain(args.iter().copied()))
    }

    #[test]
    fn client_mode() {
        let args = parse(&["800000", "4", "3"]).unwrap();
        assert_eq!(args.mode(), MainMode::Client);
        assert_eq!(args.client_params.payload_size, Some(800_000));
        assert_eq!(args.client_params.connections, Some(4));
        assert_eq!(args.client_params.duration, Some(3));
    }

    #[test]
    fn wrong_argument_count() {
        let _ = parse(&["800000", "4"]).unwrap_err();
        let _ = parse(&[]).unwrap_err();
        let _ = parse(&["1", "2", "3", "4"]).unwrap_err();
    }

    #[test]
    fn server_mode() {
        let args = parse(&["--server", "--strategy", "zero-copy", "--backlog", "3"]).unwrap();
        assert_eq!(args.mode(), MainMode::Server);
        assert_eq!(args.config.strategy, Some(Strategy::ZeroCopy));
        assert_eq!(args.config.backlog, Some(3));
    }

    #[test]
    fn help_and_version() {
        use clap::error::ErrorKind;
        assert_eq!(parse(&["--help"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(
            parse(&["--version"]).unwrap_err().kind(),
            ErrorKind::DisplayVersion
        );
    }

    #[test]
    fn other_modes() {
        assert_eq!(
            parse(&["--show-config"]).unwrap().mode(),
            MainMode::ShowConfig
        );
        assert_eq!(
            parse(&["--config-files"]).unwrap().mode(),
            MainMode::ShowConfigFiles
        );
        assert!(parse(&["--server", "--show-config"]).is_err());
    }
}
