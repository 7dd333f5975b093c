use clap::Parser;
use fx_history::Cli;
use tracing_subscriber::FmtSubscriber;

fn main() {
    let args = Cli::parse();

    // stdout carries the table, so logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(error) = fx_history::run(&args, std::io::stdout().lock()) {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code());
    }
}
