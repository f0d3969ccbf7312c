use clap::Parser;
use gatehouse::cli::{Args, build_config, init_logging, load_secret};
use gatehouse::{init_cleanup, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(secret) = load_secret(args.secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let config = build_config(&args, secret);
    let gateway = config.build_gateway();
    init_cleanup(&gateway).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    if let Err(e) = run_server(gateway, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
