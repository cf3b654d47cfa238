// src/cli.rs

use crate::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use clap::{value_parser, Arg, ArgAction, Command};

/// Build the command-line interface for the application
pub fn build_cli() -> Command {
    Command::new("streamloader")
        .version(crate::VERSION)
        .author("Ibrahim Mohamed")
        .about("Download video streams with a bounded number of parallel transfers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("info")
                .about("Show video details and the available streams")
                .arg(
                    Arg::new("url")
                        .help("The URL of the video")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            Command::new("download")
                .about("Download one stream of each given video")
                .arg(
                    Arg::new("url")
                        .help("The URLs of the videos to download")
                        .required(true)
                        .num_args(1..)
                        .index(1),
                )
                .arg(
                    Arg::new("stream")
                        .long("stream")
                        .short('s')
                        .help("Stream id to download (see `info`); defaults to the best stream")
                        .value_name("STREAM_ID"),
                )
                .arg(
                    Arg::new("output-dir")
                        .long("output-dir")
                        .short('o')
                        .help("Specify custom output directory")
                        .value_name("DIRECTORY"),
                )
                .arg(
                    Arg::new("filename")
                        .long("filename")
                        .short('n')
                        .help("File name to save as (single URL only)")
                        .value_name("NAME"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .short('l')
                        .help("Maximum number of parallel downloads (1-5)")
                        .value_parser(
                            value_parser!(u64).range(MIN_CONCURRENCY as u64..=MAX_CONCURRENCY as u64),
                        )
                        .default_value("3"),
                )
                .arg(
                    Arg::new("quiet")
                        .long("quiet")
                        .short('q')
                        .help("Hide progress bars")
                        .action(ArgAction::SetTrue),
                ),
        )
}
