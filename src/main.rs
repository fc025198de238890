#[tokio::main]
async fn main() -> anyhow::Result<()> {
    micstream_lib::run().await
}
