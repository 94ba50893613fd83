use chatlog::{
    cli::{Args, Commands},
    config::Settings,
    session::{run_chat, run_list},
};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=warn", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let res = match args.command {
        Some(Commands::List) => run_list(&args.history_dir),
        None => Settings::from_args(&args).and_then(|settings| run_chat(&settings)),
    };
    res.unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
}
