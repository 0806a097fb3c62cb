//! Meshforge Coordinator - Entry Point
//!
//! Queues image-to-mesh jobs, drives the single GPU worker, and streams
//! progress back to clients.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    meshforge_coordinator::run().await
}
