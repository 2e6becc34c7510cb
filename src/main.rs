use std::env;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let raw_args: Vec<String> = env::args().collect();
    match raw_args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            let port = raw_args
                .get(2)
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(8080);
            if let Err(e) = lifecycle::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Some("solve") => {
            let args: Vec<String> = raw_args[..1].iter().chain(&raw_args[2..]).cloned().collect();
            let result = tokio::task::spawn_blocking(move || lifecycle::api::run_cli(args)).await;
            match result {
                Ok(Ok(json)) => println!("{json}"),
                Ok(Err(msg)) => {
                    eprintln!("Error: {msg}");
                    std::process::exit(2);
                }
                Err(e) => {
                    eprintln!("Solver task failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("Usage: lifecycle solve [flags] | lifecycle serve [port]");
            std::process::exit(1);
        }
    }
}
