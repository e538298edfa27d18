use anyhow::Context;
use peercache::builder::Builder;
use peercache::group::LoaderFn;

/// Loads the file **data/KEY**.
async fn load_file(key: String) -> anyhow::Result<Vec<u8>> {
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(anyhow::anyhow!("Invalid file name: {}", key));
    }

    tokio::fs::read(format!("data/{}", key))
        .await
        .with_context(|| format!("Failed to read data/{}", key))
}

#[tokio::main]
async fn main() {
    // Build a node and enable all features...
    let node = Builder::new().enable_all().build().await;

    // Serve all files within "data" through the cluster...
    let _ = node.new_group("files", LoaderFn(load_file));

    match node.server() {
        Some(server) => server.event_loop().await,
        None => log::error!("The HTTP server is disabled - exiting..."),
    }
}
