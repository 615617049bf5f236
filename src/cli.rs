// vim: cc=81
use clap::{command, value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use clap_complete::{generate, Shell};
use std::{io, path::PathBuf};

pub fn build_cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help("Read configuration from FILE")
        .long_help("Read configuration from FILE instead of \
            <config dir>/bluedeck/config.toml");
    let refresh_arg = Arg::new("refresh-interval")
        .short('r').long("refresh-interval")
        .value_name("SECONDS")
        .value_parser(value_parser!(u64).range(1..))
        .help("Seconds between full reloads of the device list");

    let color_arg = Arg::new("color")
        .short('c').long("color")
        .action(ArgAction::SetTrue)
        .conflicts_with("no-color")
        .help("Uses ANSI escape sequences to print with text formatting and \
            color if used");
    let no_color_arg = Arg::new("no-color")
        .short('C').long("no-color")
        .action(ArgAction::SetTrue)
        .conflicts_with("color")
        .help("Disallow usage of ANSI escape sequences");
    let color_arg_group = ArgGroup::new("color group")
        .args(["color", "no-color"]);

    let debug_arg = Arg::new("debug")
        .short('d').long("debug")
        .action(ArgAction::SetTrue)
        .help("Write debug messages to the log file")
        .long_help("Write debug messages to the log file. RUST_LOG takes \
            precedence if set");
    let log_file_arg = Arg::new("log-file")
        .long("log-file")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help("Append log messages to FILE");

    command!()
        .propagate_version(true)
        .before_help("Interactive Bluetooth manager. Starts a session unless \
            a subcommand is given")
        .args([
            config_arg,
            refresh_arg,
            color_arg,
            no_color_arg,
            debug_arg,
            log_file_arg,
        ])
        .group(color_arg_group)
        .subcommand(
            Command::new("completions")
                .before_help("Print shell completions to stdout")
                .arg(Arg::new("shell")
                    .index(1)
                    .required(true)
                    .value_parser(value_parser!(Shell))
                    .help("Shell to generate completions for")),
        )
}

/// Values the command line may override in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub refresh_interval: Option<u64>,
    /// None if neither --color nor --no-color was given
    pub color: Option<bool>,
    pub debug: bool,
    pub log_file: Option<PathBuf>,
}

impl Overrides {
    pub fn from_matches(matches: &ArgMatches) -> Overrides {
        let color = if matches.get_flag("color") {
            Some(true)
        } else if matches.get_flag("no-color") {
            Some(false)
        } else {
            None
        };
        Overrides {
            config: matches.get_one::<PathBuf>("config").cloned(),
            refresh_interval: matches.get_one::<u64>("refresh-interval").copied(),
            color,
            debug: matches.get_flag("debug"),
            log_file: matches.get_one::<PathBuf>("log-file").cloned(),
        }
    }
}

pub fn print_completions(shell: Shell) {
    let mut cli = build_cli();
    let name = cli.get_name().to_string();
    generate(shell, &mut cli, name, &mut io::stdout());
}
