#![forbid(unsafe_code)]

use clap::Parser;
use substrate_cli::{run, Cli};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).expect("json value serializes"));
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
