use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{
    select,
    stream::{
        FuturesUnordered,
        StreamExt,
    },
};
use log::{info, warn};
use tokio::time::interval;
use tokio_stream::wrappers::IntervalStream;

use crate::computation::{ComputationSubmitted, SettlementDisposition};
use crate::config::LedgerConfig;
use crate::ledger::Ledger;
use crate::settlement::SettlementController;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

type SettlementFuture =
    Pin<Box<dyn Future<Output = (String, SettlementDisposition)> + Send>>;

/// Consume the "computation submitted" event stream and drive each event
/// through the settlement controller. Distinct ids settle concurrently;
/// the loop itself stays single-threaded and advances an explicit
/// last-processed marker instead of trusting in-memory event callbacks.
pub async fn run(
    controller: Arc<SettlementController>,
    ledger: Arc<dyn Ledger>,
    config: &LedgerConfig,
) -> anyhow::Result<()> {
    let mut marker = config.from_block.unwrap_or(0);
    info!("Listening for computation events from block {marker}...");

    let poll_secs = config.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let mut poll_timer = IntervalStream::new(
        interval(Duration::from_secs(poll_secs))
    ).fuse();
    let mut settlement_futures = FuturesUnordered::<SettlementFuture>::new();

    loop {
        select! {
            _ = poll_timer.select_next_some() => {
                match ledger.computation_events(marker).await {
                    Ok(batch) => {
                        marker = dispatch(
                            &controller,
                            &ledger,
                            batch.events,
                            batch.next_block,
                            &mut settlement_futures,
                        ).await;
                    },

                    Err(e) => {
                        warn!("Event poll from block {marker} failed: `{e}`");
                    }
                }
            },

            settled = settlement_futures.select_next_some() => {
                let (id, disposition) = settled;
                info!("Computation `{id}` reached `{disposition:?}`.");
            },
        }
    }
}

// map each event to a full request and hand it to the controller;
// returns the block the next poll should start from
async fn dispatch(
    controller: &Arc<SettlementController>,
    ledger: &Arc<dyn Ledger>,
    events: Vec<ComputationSubmitted>,
    next_block: u64,
    settlement_futures: &mut FuturesUnordered<SettlementFuture>,
) -> u64 {
    for event in events {
        if controller.is_settled(&event.computation_id) {
            // replays are expected under at-least-once delivery
            continue;
        }
        let request = match ledger.get_computation(&event.computation_id).await {
            Ok(request) => request,

            Err(e) => {
                // leave the marker on this event so no request is lost;
                // the next poll delivers it again
                warn!(
                    "Could not read computation `{}`: `{e}`. It stays queued.",
                    event.computation_id
                );
                return event.block_number;
            }
        };
        info!(
            "EVENT received: computation `{}` at block {}.",
            event.computation_id, event.block_number
        );
        let controller = controller.clone();
        settlement_futures.push(Box::pin(async move {
            let id = request.computation_id.clone();
            let disposition = controller.settle(request).await;
            (id, disposition)
        }));
    }
    next_block
}
