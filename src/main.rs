#[macro_use]
extern crate log;

use anyhow::Result;
use mixbot_rs::cache::AudioCache;
use mixbot_rs::effects::EffectLibrary;
use mixbot_rs::event::{self, EventBus};
use mixbot_rs::fetch::FetchPool;
use mixbot_rs::session::Sessions;
use mixbot_rs::youtube::YtDlpFetcher;
use mixbot_rs::{config, net, stdin};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = config::load().await?;

    let cache = Arc::new(AudioCache::open(&config.cache_dir).await?);
    let fetcher = Arc::new(YtDlpFetcher::ensure().await?);
    let pool = FetchPool::new(cache.clone(), fetcher, &config);
    let effects = Arc::new(EffectLibrary::load(&config.sounds_dir).await?);

    let bus = EventBus::new();
    event::debug(&bus);

    let listen_addr = config.listen_addr.clone();
    let sessions = Sessions::new(cache, pool, effects, bus, config);

    stdin::start(sessions.clone());
    net::start(&listen_addr, sessions).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
