//! Headless sync client: mirrors every document in memory and logs what the
//! authority sends. Usage: `pane-sync-headless [ws://host:port/ws]`.

use std::collections::HashMap;

use log::{error, info};

use pane_sync::{ClientConfig, Delta, DocumentId, EditorHost, Operation, SyncClient, SyncError, Version, ViewUpdate};

/// Keeps document contents and reports everything through the log.
#[derive(Default)]
struct LoggingHost {
    documents: HashMap<DocumentId, (Delta, Version)>,
}

impl EditorHost for LoggingHost {
    fn apply_remote_delta(&mut self, id: DocumentId, delta: &Delta, version: Version) {
        let (content, current) = self.documents.entry(id).or_default();
        *content = content.compose(delta);
        *current = version;
        info!("Document {id} at version {version}: {:?}", content.text());
    }

    fn replace_content(&mut self, id: DocumentId, content: &Delta, version: Version) {
        self.documents.insert(id, (content.clone(), version));
        info!("Document {id} replaced at version {version}: {:?}", content.text());
    }

    fn contents(&self, id: DocumentId) -> Option<Delta> {
        self.documents.get(&id).map(|(content, _)| content.clone())
    }

    fn render(&mut self, update: ViewUpdate) {
        if let Some(columns) = &update.layout {
            for column in columns {
                let rows: Vec<String> = column
                    .rows
                    .iter()
                    .map(|r| format!("{}:{:.0}%", r.id, r.height))
                    .collect();
                info!("Column {} ({:.0}%): [{}]", column.id, column.width, rows.join(", "));
            }
        }
        for (id, dirty) in &update.dirty_changes {
            info!("Document {id} {}", if *dirty { "has unsynced edits" } else { "is synced" });
        }
    }

    fn signal_error(&mut self, error: &SyncError) {
        error!("{error}");
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = ClientConfig::from_env();
    if let Some(url) = std::env::args().nth(1) {
        config.server_url = url;
    }
    info!("Starting headless sync client for {}", config.server_url);

    let (client, handle) = SyncClient::new(config, LoggingHost::default());
    let run = tokio::spawn(client.run());

    if tokio::signal::ctrl_c().await.is_ok() {
        let _ = handle.shutdown().await;
    }
    match run.await {
        Ok(Ok(())) => info!("Stopped"),
        Ok(Err(e)) => error!("Client failed: {e}"),
        Err(e) => error!("Client task panicked: {e}"),
    }
}
