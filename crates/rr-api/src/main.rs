#[tokio::main]
async fn main() {
    if let Err(err) = rr_api::run().await {
        tracing::error!(error = %err, "rr-api failed");
        std::process::exit(1);
    }
}
