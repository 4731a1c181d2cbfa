//! dbdeploy CLI entry point.

use std::process::ExitCode;

use dbdeploy::cli;

fn main() -> ExitCode {
    let cli = cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                eprintln!("dbdeploy: {e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("dbdeploy=info"),
            2 => EnvFilter::new("dbdeploy=debug"),
            _ => EnvFilter::new("dbdeploy=trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

