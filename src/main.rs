use clap::{value_parser, Arg, Command};

use std::path::PathBuf;

mod agent;
mod common;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "httpred counts accepted connections and HTTP responses by status class \
            for the processes on a host, by observing accept, write, and close.",
        )
        .arg(
            Arg::new("CONFIG")
                .help("Agent configuration file")
                .value_parser(value_parser!(PathBuf))
                .action(clap::ArgAction::Set)
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("PID")
                .long("pid")
                .help("Only observe this process, overrides the configured target")
                .value_parser(value_parser!(u32))
                .action(clap::ArgAction::Set),
        )
        .get_matches();

    // required argument, validated by clap
    let Some(path) = matches.get_one::<PathBuf>("CONFIG") else {
        std::process::exit(1);
    };

    let mut config = match agent::Config::load(path) {
        Ok(c) => c,
        Err(error) => {
            eprintln!("error loading config file: {}\n{error}", path.display());
            std::process::exit(1);
        }
    };

    if let Some(pid) = matches.get_one::<u32>("PID") {
        config.set_target_pid(*pid);
    }

    agent::run(config);
}
