use crate::config::{CONFIG_FILE, DEFAULT_CONFIG_TEMPLATE};

#[derive(Debug, PartialEq, Eq)]
pub enum CliAction {
    PrintVersion,
    InitConfig,
    RunServer,
}

pub fn parse_args() -> CliAction {
    parse(std::env::args().skip(1))
}

/// Unknown arguments are ignored; `--version` takes precedence.
fn parse(args: impl IntoIterator<Item = String>) -> CliAction {
    let mut action = CliAction::RunServer;
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => return CliAction::PrintVersion,
            "--init-config" => action = CliAction::InitConfig,
            _ => {}
        }
    }
    action
}

pub fn print_version() {
    println!("nearer {}", env!("CARGO_PKG_VERSION"));
}

/// Writes the commented default config next to the binary's working dir.
/// An existing file is left alone.
pub fn init_config_file() {
    let target = std::path::Path::new(CONFIG_FILE);
    if target.exists() {
        eprintln!("{CONFIG_FILE} already exists; not overwriting");
        return;
    }
    match std::fs::write(target, DEFAULT_CONFIG_TEMPLATE) {
        Ok(()) => println!("Wrote default config to {CONFIG_FILE}"),
        Err(e) => eprintln!("Could not write {CONFIG_FILE}: {e}"),
    }
}
