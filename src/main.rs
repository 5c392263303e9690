use clap::Parser;
use sealvault::cli::commands::create::CreateOptions;
use sealvault::cli::{Cli, Commands};
use sealvault::config::Settings;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Init {
            force,
            no_passphrase,
        } => sealvault::cli::commands::init::execute(&cli, force, no_passphrase),
        Commands::Status => sealvault::cli::commands::status::execute(&cli),
        Commands::Rotate { ref scope } => sealvault::cli::commands::rotate::execute(&cli, scope),
        Commands::Create {
            ref name,
            ref secret_type,
            ref description,
            ref expires_in,
            max_reads,
        } => sealvault::cli::commands::create::execute(
            &cli,
            name,
            CreateOptions {
                secret_type,
                description: description.as_deref(),
                expires_in: expires_in.as_deref(),
                max_reads,
            },
        ),
        Commands::Put {
            ref name,
            ref value,
            ref file,
            chunk_size_kb,
        } => sealvault::cli::commands::put::execute(
            &cli,
            name,
            value.as_deref(),
            file.as_deref(),
            chunk_size_kb,
        ),
        Commands::Get { ref name, version } => {
            sealvault::cli::commands::get::execute(&cli, name, version)
        }
        Commands::List => sealvault::cli::commands::list::execute(&cli),
        Commands::Versions { ref name } => sealvault::cli::commands::versions::execute(&cli, name),
        Commands::Expire {
            ref name,
            ref expires_in,
            clear,
        } => sealvault::cli::commands::expire::execute(&cli, name, expires_in.as_deref(), clear),
        Commands::Share {
            ref name,
            ref recipient,
            ref permission,
            ref expires_in,
        } => sealvault::cli::commands::share::execute(
            &cli,
            name,
            recipient,
            permission,
            expires_in.as_deref(),
        ),
        Commands::Shares { ref name } => sealvault::cli::commands::shares::execute(&cli, name),
        Commands::Revoke { ref share_id } => {
            sealvault::cli::commands::revoke::execute(&cli, share_id)
        }
        Commands::Delete { ref name, force } => {
            sealvault::cli::commands::delete::execute(&cli, name, force)
        }
        Commands::Audit { last, ref since } => {
            sealvault::cli::commands::audit_cmd::execute(&cli, last, since.as_deref())
        }
    };

    if let Err(e) = result {
        sealvault::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}

/// Log to stderr so stdout stays clean for secret values.
///
/// `RUST_LOG` wins; otherwise `log_filter` from sealvault.toml is used.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let configured = std::env::current_dir()
            .ok()
            .and_then(|cwd| Settings::load(&cwd).ok())
            .map(|s| s.log_filter)
            .unwrap_or_else(|| "warn".to_string());
        EnvFilter::try_new(configured).unwrap_or_else(|_| EnvFilter::new("warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
