#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rsb_app::run().await
}
