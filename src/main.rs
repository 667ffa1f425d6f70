use clap::Parser;
use votebot::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        None | Some(Command::Start) => cli::handle_start(config_path).await,
        Some(Command::Config(ConfigCommand::Show)) => cli::handle_config_show(config_path),
        Some(Command::Config(ConfigCommand::Get { key })) => {
            cli::handle_config_get(config_path, &key)
        }
        Some(Command::Config(ConfigCommand::Path)) => {
            cli::handle_config_path(config_path);
            Ok(())
        }
        Some(Command::Reconcile) => cli::handle_reconcile(config_path).await,
        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
