use recovery_keeper_cli::run_cli;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        eprintln!("recovery-keeper: {}", e);
        std::process::exit(e.exit_code());
    }
}
