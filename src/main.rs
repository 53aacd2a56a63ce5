#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mcloud_driver::cli::run().await
}
