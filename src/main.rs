use clap::Parser;
use nestegg::api::{Cli, Command, init_tracing, run_household_file, run_http_server};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing("info");

    match cli.command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Run(args) => match run_household_file(&args) {
            Ok(output) => print!("{output}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
    }
}
