use std::sync::Arc;
use std::{env, io};

use log::info;
use tokio::signal;

use device::Coordinator;
use feed::tcp::TcpFeed;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_DEVICE_ID: &str = "device-0";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let device_id = env::var("DEVICE_ID").unwrap_or_else(|_| DEFAULT_DEVICE_ID.to_string());
    let addr = format!(
        "{}:{}",
        env::var("FEED_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("FEED_PORT").map_err(io::Error::other)?,
    );

    let feed = Arc::new(TcpFeed::connect(&addr).await?);
    info!(addr = addr.as_str(), device_id = device_id.as_str(); "connected to task feed gateway");

    let mut coordinator = Coordinator::new(feed, &device_id);
    if !coordinator.resume().await? {
        coordinator.join().await?;
    }

    // An in-flight task finishes (result write included) before the run
    // loop honors the shutdown.
    let shutdown = coordinator.shutdown_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received interrupt, finishing in-flight work");
            shutdown.notify_one();
        }
    });

    coordinator.run().await;
    coordinator.leave().await;
    Ok(())
}
