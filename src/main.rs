use clap::Clap;

use droidspaces::config::{Cli, Command, ContainerConfig};
use droidspaces::error::{exit_code, DsError};
use droidspaces::lifecycle::Droidspaces;
use droidspaces::logger;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logger::init(cli.log.clone()) {
        eprintln!("droidspaces: failed to initialize logging: {}", e);
    }

    let code = run(&cli).unwrap_or_else(|e| {
        eprintln!("droidspaces: {}", e);
        exit_code(&e)
    });
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32, DsError> {
    let runtime = Droidspaces::new();

    match &cli.command {
        Command::Start => {
            let cfg = ContainerConfig::from_cli(cli)?;
            runtime.start(cfg)
        }
        Command::Stop => {
            let name = require_name(cli)?;
            runtime.stop(&name, false)
        }
        Command::Restart => {
            let cfg = ContainerConfig::from_cli(cli)?;
            runtime.restart(cfg)
        }
        Command::Enter { user } => {
            let name = require_name(cli)?;
            runtime.enter(&name, user.as_deref())
        }
        Command::Run { cmd } => {
            let name = require_name(cli)?;
            runtime.run_cmd(&name, cmd)
        }
        Command::Info { name } => {
            let text = runtime.info(name.as_deref())?;
            print!("{}", text);
            Ok(0)
        }
        Command::Show => {
            let text = runtime.show()?;
            print!("{}", text);
            Ok(0)
        }
        Command::Scan => {
            for listing in runtime.scan()? {
                println!("{}\t{}", listing.name, listing.pid.as_raw());
            }
            Ok(0)
        }
        Command::Pid => {
            let name = require_name(cli)?;
            let pid = runtime.pid(&name)?;
            println!("{}", pid.as_raw());
            Ok(0)
        }
        Command::Status => {
            let name = require_name(cli)?;
            let running = runtime.status(&name)?;
            println!("{}", if running { "running" } else { "stopped" });
            Ok(if running { 0 } else { 4 })
        }
        Command::Check => {
            let missing = runtime.check()?;
            if missing.is_empty() {
                println!("ok");
                Ok(0)
            } else {
                for feature in &missing {
                    eprintln!("missing: {}", feature);
                }
                Ok(3)
            }
        }
    }
}

fn require_name(cli: &Cli) -> Result<String, DsError> {
    cli.name
        .clone()
        .ok_or_else(|| DsError::InvalidArgs("--name is required for this command".to_string()))
}
