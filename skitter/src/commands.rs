use crate::CLAP_STYLING;
use clap::{ArgAction, arg, command};
use std::path::PathBuf;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("skitter")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("skitter")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and progress output").required(false))
        .arg(
            arg!(-v --"verbose" "Increase log verbosity (-v debug, -vv trace)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Writes a default skitter configuration file")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Where to write the configuration file (a directory gets skitter.json)")
                        .default_value("skitter.json"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite an existing configuration file")
                        .required(false),
                ),
        )
        .subcommand(
            command!("start")
                .about(
                    "Crawl the application described by a configuration file, exploring every \
                reachable interaction state.",
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(true)
                        .help("Path to the skitter configuration file")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Write collected URLs here instead of the configured output")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-g --"graph" <PATH>)
                        .required(false)
                        .help("Also write the state graph in Graphviz DOT format")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}
