#[tokio::main]
async fn main() {
    if let Err(err) = goat_bot::app::run().await {
        tracing::error!(error = %err, "server failed");
        eprintln!("goat bot server failed: {err}");
        std::process::exit(1);
    }
}
