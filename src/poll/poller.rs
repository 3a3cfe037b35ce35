//! Per-layer poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::core::{
    COMMAND_CHANNEL_CAPACITY, LayerId, LayerRenderer, MIN_POLL_INTERVAL, PollError,
    SnapshotSource,
};
use crate::fetch::FetchClient;
use crate::sync::LayerSyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    RefreshNow,
    ClearCache,
    Reinitialize,
    Stop,
}

/// Poll loop driving one layer.
pub struct LayerPoller<R: LayerRenderer, S: SnapshotSource> {
    engine: Arc<LayerSyncEngine<R>>,
    client: FetchClient<S>,
    poll_interval: Duration,
    commands: mpsc::Receiver<Command>,
}

impl<R: LayerRenderer, S: SnapshotSource> LayerPoller<R, S> {
    /// Spawn the poll loop for the layer `client` feeds.
    ///
    /// The first fetch happens immediately. Intervals below one second are
    /// raised to one second.
    pub fn spawn(
        engine: Arc<LayerSyncEngine<R>>,
        client: FetchClient<S>,
        poll_interval: Duration,
    ) -> PollerHandle {
        let layer_id = client.layer_id().clone();
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let poller = Self {
            engine,
            client,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            commands: rx,
        };
        let task = tokio::spawn(poller.run());

        PollerHandle {
            layer_id,
            commands: tx,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        let layer_id = self.client.layer_id().clone();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(layer = %layer_id, interval = ?self.poll_interval, "poller started");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::RefreshNow) => {
                        self.poll_once().await;
                        ticker.reset();
                    }
                    Some(Command::ClearCache) => self.client.clear_cache(),
                    Some(Command::Reinitialize) => self.client.reinitialize(),
                    Some(Command::Stop) | None => break,
                },
                _ = ticker.tick() => self.poll_once().await,
            }
        }

        self.engine.cancel_pending(&layer_id);
        info!(layer = %layer_id, "poller stopped");
    }

    async fn poll_once(&mut self) {
        let snapshot = self.client.fetch_snapshot().await;
        debug!(
            layer = %self.client.layer_id(),
            features = snapshot.len(),
            origin = ?snapshot.origin(),
            "submitting polled snapshot"
        );
        self.engine.submit(self.client.layer_id().clone(), snapshot);
    }
}

/// Handle to a running poller.
///
/// Dropping the handle stops the poller.
pub struct PollerHandle {
    layer_id: LayerId,
    commands: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Layer being polled.
    pub fn layer_id(&self) -> &LayerId {
        &self.layer_id
    }

    /// Fetch now and restart the interval.
    pub async fn refresh_now(&self) -> Result<(), PollError> {
        self.send(Command::RefreshNow).await
    }

    /// Drop the fetch client's cached snapshot.
    pub async fn clear_cache(&self) -> Result<(), PollError> {
        self.send(Command::ClearCache).await
    }

    /// Reset a permanently failed or rate-limited source.
    pub async fn reinitialize(&self) -> Result<(), PollError> {
        self.send(Command::Reinitialize).await
    }

    /// Whether the poll task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop polling and drop the layer's pending update.
    ///
    /// Waits for a fetch in progress to finish.
    pub async fn stop(mut self) -> Result<(), PollError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        // A closed channel means the task is already gone.
        let _ = self.commands.send(Command::Stop).await;
        task.await
            .map_err(|_| PollError::Stopped(self.layer_id.to_string()))
    }

    async fn send(&self, command: Command) -> Result<(), PollError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PollError::Stopped(self.layer_id.to_string()))
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.try_send(Command::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, FetchConfigBuilder, LayerConfig};
    use crate::testing::{RecordingRenderer, ScriptedSource, raw_point};

    struct Fixture {
        engine: Arc<LayerSyncEngine<RecordingRenderer>>,
        renderer: Arc<RecordingRenderer>,
        source: Arc<ScriptedSource>,
        layer: LayerId,
    }

    fn fixture() -> (Fixture, FetchClient<ScriptedSource>) {
        fixture_with(FetchConfig::default())
    }

    fn fixture_with(fetch: FetchConfig) -> (Fixture, FetchClient<ScriptedSource>) {
        let config = LayerConfig::builder("outages")
            .identity_field("id")
            .allows_empty_updates(true)
            .build()
            .unwrap();
        let renderer = Arc::new(RecordingRenderer::new());
        let engine = LayerSyncEngine::new(Arc::clone(&renderer));
        engine.register_layer(config.clone()).unwrap();

        let source = Arc::new(ScriptedSource::new("outages"));
        let client = FetchClient::new(Arc::clone(&source), &config, fetch).unwrap();
        let fixture = Fixture {
            engine,
            renderer,
            source,
            layer: config.layer_id,
        };
        (fixture, client)
    }

    fn features(f: &Fixture) -> usize {
        f.engine.layer_status(&f.layer).unwrap().features
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_is_immediate() {
        let (f, client) = fixture();
        f.source.respond_with(vec![raw_point("1", [0.0, 0.0], "open")]);

        let handle = LayerPoller::spawn(Arc::clone(&f.engine), client, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(f.source.fetch_calls(), 1);
        assert_eq!(features(&f), 1);
        assert!(f.renderer.has_layer(&f.layer));
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval() {
        let (f, client) = fixture();
        f.source.respond_with(vec![raw_point("1", [0.0, 0.0], "open")]);

        let handle = LayerPoller::spawn(Arc::clone(&f.engine), client, Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;

        f.source.respond_with(vec![
            raw_point("1", [0.0, 0.0], "open"),
            raw_point("2", [1.0, 0.0], "open"),
        ]);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(f.source.fetch_calls(), 2);
        assert_eq!(features(&f), 2);
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now() {
        let (f, client) = fixture();
        f.source.respond_with(vec![raw_point("1", [0.0, 0.0], "open")]);

        let handle = LayerPoller::spawn(Arc::clone(&f.engine), client, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(1)).await;

        f.source.respond_with(Vec::new());
        handle.refresh_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(f.source.fetch_calls(), 2);
        assert_eq!(features(&f), 0);
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_keeps_layer_via_cache() {
        let (f, client) = fixture_with(FetchConfigBuilder::new().max_attempts(1).build().unwrap());
        f.source.push_fetch(Ok(vec![raw_point("1", [0.0, 0.0], "open")]));

        let handle = LayerPoller::spawn(Arc::clone(&f.engine), client, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(features(&f), 1);

        // Queue now empty: the source fails and the cache is served.
        handle.refresh_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(features(&f), 1);

        // Without a cache the degraded snapshot still never clears the layer.
        handle.clear_cache().await.unwrap();
        handle.reinitialize().await.unwrap();
        handle.refresh_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(features(&f), 1);
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinitialize_resumes_failed_source() {
        let (f, client) = fixture_with(FetchConfigBuilder::new().max_attempts(1).build().unwrap());

        let handle = LayerPoller::spawn(Arc::clone(&f.engine), client, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.source.fetch_calls(), 1);

        f.source.respond_with(vec![raw_point("1", [0.0, 0.0], "open")]);
        handle.refresh_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.source.fetch_calls(), 1);

        handle.reinitialize().await.unwrap();
        handle.refresh_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.source.fetch_calls(), 2);
        assert_eq!(features(&f), 1);
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_pending_update() {
        let (f, client) = fixture();
        f.source.respond_with(vec![raw_point("1", [0.0, 0.0], "open")]);

        let handle = LayerPoller::spawn(Arc::clone(&f.engine), client, Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.engine.has_pending_update(&f.layer));

        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!f.engine.has_pending_update(&f.layer));
        assert_eq!(f.renderer.create_count(&f.layer), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_task_exit_fail() {
        let (f, client) = fixture();
        let handle = LayerPoller::spawn(Arc::clone(&f.engine), client, Duration::from_secs(60));

        handle.commands.send(Command::Stop).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.is_finished());
        assert_eq!(
            handle.refresh_now().await,
            Err(PollError::Stopped("outages".into()))
        );
    }
}
