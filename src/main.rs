// respool demo: pooling channels opened on a single broker connection.
// Run with: RUST_LOG=debug cargo run

use respool::{Pool, PoolConfiguration};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CHANNEL_MAX: u32 = 2047;

#[derive(Error, Debug)]
#[error("connection to {0} has no free channels")]
struct NoFreeChannel(String);

/// Stand-in for a live broker connection
struct Connection {
    addr: String,
    next_channel: AtomicU32,
}

impl Connection {
    fn dial(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            next_channel: AtomicU32::new(1),
        }
    }

    fn channel(&self) -> Result<Channel, NoFreeChannel> {
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        if id > CHANNEL_MAX {
            return Err(NoFreeChannel(self.addr.clone()));
        }
        Ok(Channel(id))
    }
}

#[derive(Debug)]
struct Channel(u32);

impl Channel {
    fn close(self) {
        info!(channel = self.0, "closing channel");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let conn = Arc::new(Connection::dial("localhost:5672"));
    info!(addr = %conn.addr, "connected");

    let pool = {
        let conn = Arc::clone(&conn);
        Pool::new(
            PoolConfiguration::new()
                .with_max_pool_size(5)
                .with_wait_timeout(Duration::from_secs(3))
                .with_preallocation(true),
            move || {
                info!("creating new channel");
                conn.channel()
            },
            Channel::close,
        )
    };

    for _ in 0..5 {
        let Ok(channel) = conn.channel() else { continue };
        if pool.put(channel).is_ok() {
            info!("put channel into the pool");
        }
    }

    use_pool(&pool);
    info!(metrics = ?pool.get_metrics(), "pool state");
    pool.cleanup();
}

fn use_pool(pool: &Pool<Channel, NoFreeChannel>) {
    for _ in 0..3 {
        match pool.get() {
            Ok(channel) => {
                info!(channel = channel.0, "publishing on channel");
                if let Err(channel) = pool.put(channel) {
                    channel.close();
                }
            }
            Err(err) => info!(%err, "no channel"),
        }
    }
}
