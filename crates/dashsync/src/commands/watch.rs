//! `dashsync watch`: follow one topic until Ctrl-C or reconnect exhaustion.

use tokio::sync::mpsc;
use tracing::{info, warn};

use dashsync_core::{ChannelState, CoreError, RecordChange, SyncClient, UpdateHandler};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

enum WatchEvent {
    Change(RecordChange),
    Failed(CoreError),
}

/// Forwards handler callbacks to the printing loop.
struct Forward {
    topic: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl UpdateHandler for Forward {
    fn on_change(&self, change: &RecordChange) {
        let _ = self.tx.send(WatchEvent::Change(change.clone()));
    }

    fn on_error(&self, error: &CoreError) {
        let _ = self.tx.send(WatchEvent::Failed(error.clone()));
    }

    fn on_state(&self, state: &ChannelState) {
        match state {
            ChannelState::Closed(reason) => warn!(topic = %self.topic, %reason, "Live connection closed"),
            other => info!(topic = %self.topic, state = ?other, "Live connection state"),
        }
    }
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let client = SyncClient::new(config::sync_config(global)?, config::credentials(global))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = client.subscribe(
        &args.topic,
        Forward {
            topic: args.topic.clone(),
            tx,
        },
    );
    info!(topic = %args.topic, "Watching topic");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break Ok(());
            }
            event = rx.recv() => match event {
                Some(WatchEvent::Change(change)) => output::print(global.output, &change)?,
                Some(WatchEvent::Failed(err)) => break Err(CliError::from(err)),
                None => break Ok(()),
            },
        }
    };

    if args.snapshot {
        let snapshot = subscription.records().latest();
        output::print(global.output, snapshot.as_slice())?;
    }

    subscription.unsubscribe();
    client.shutdown();
    result
}
