//! Bot runtime
//!
//! Owns the store and gateway handles for the life of the process and runs
//! the single consumer that feeds inbound events to the dispatcher, one at
//! a time.

use crate::channels::{ChannelError, DynGateway, InboundEvent, MattermostChannel};
use crate::commands::Dispatcher;
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::polls::PollService;
use crate::store::{
    DynPollRepository, MemoryPollRepository, SqlitePollRepository, StoreError, StoreResult,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bound on events buffered between the listener and the consumer
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Startup and runtime failures
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] ChannelError),
}

/// Open the configured repository and make sure it answers
pub async fn open_store(config: &StorageConfig) -> StoreResult<DynPollRepository> {
    let store: DynPollRepository = match config.backend {
        StorageBackend::Sqlite => Arc::new(SqlitePollRepository::connect(config).await?),
        StorageBackend::Memory => {
            warn!("Using in-memory storage, polls will not survive a restart");
            Arc::new(MemoryPollRepository::new())
        }
    };
    store.health_check().await?;
    Ok(store)
}

/// Delete votes left behind by polls that no longer exist
pub async fn reconcile(store: &DynPollRepository) -> StoreResult<u64> {
    let purged = store.purge_orphaned_votes().await?;
    if purged > 0 {
        warn!(purged, "Removed orphaned votes");
    } else {
        info!("No orphaned votes found");
    }
    Ok(purged)
}

/// Feed events to `dispatcher` until `cancel` fires or the sender side
/// closes. Returns the number of events that were addressed to the bot.
pub async fn run_event_loop(
    dispatcher: &Dispatcher,
    mut events: mpsc::Receiver<InboundEvent>,
    cancel: CancellationToken,
) -> u64 {
    let mut handled = 0u64;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if dispatcher.handle_event(&event).await {
            handled += 1;
        }
    }
    info!(handled, "Event loop stopped");
    handled
}

/// Run the bot until `cancel` fires
pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), BotError> {
    let store = open_store(&config.storage).await?;
    reconcile(&store).await?;

    let result = serve(&config, store.clone(), cancel).await;
    store.close().await;
    info!("Store closed");
    result
}

async fn serve(
    config: &Config,
    store: DynPollRepository,
    cancel: CancellationToken,
) -> Result<(), BotError> {
    let channel = Arc::new(MattermostChannel::connect(config.mattermost.clone()).await?);
    let identity = channel.identity().clone();

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let listener = channel.listen(tx, cancel.clone())?;

    let gateway: DynGateway = channel;
    let service = Arc::new(PollService::new(store, gateway));
    let dispatcher = Dispatcher::new(service, identity);

    info!("Bot started and listening for events");
    run_event_loop(&dispatcher, rx, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = listener.await {
        warn!(error = %e, "Listener task ended abnormally");
    }
    Ok(())
}

/// Resolve when the process receives Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
