//! Main-side bridge to the background worker.
//!
//! Requests are correlated by id. Each outstanding request owns a timer task
//! that rejects it with `BridgeError::Timeout`; a reply that turns up after
//! its timer fired finds no pending entry and is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::{header, Client};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::perf::PerformanceMonitor;
use super::protocol::{
    WorkerCacheStatus, WorkerEnvelope, WorkerEvent, WorkerReply, WorkerRequest, WorkerResponse, WorkerState,
};
use super::runtime::BackgroundWorker;
use crate::asset::AssetUrl;
use crate::config::WorkerConfig;
use crate::error::BridgeError;

/// Buffer size for the message channels in each direction.
/// 32 is plenty for a handful of control messages plus preload batches.
const CHANNEL_BUFFER_SIZE: usize = 32;

/// Capacity of the event broadcast; slow listeners skip older events.
const EVENT_BUFFER_SIZE: usize = 16;

/// Controller slot value while no worker controls.
const NO_CONTROLLER: u64 = 0;

type PendingReply = oneshot::Sender<Result<WorkerResponse, BridgeError>>;

struct Pending {
    reply: PendingReply,
    timer: AbortHandle,
}

/// One connected worker: its inbox plus the task routing its replies.
///
/// Dropping a link closes the worker's inbox, which retires the worker.
struct Link {
    worker_id: u64,
    tx: mpsc::Sender<WorkerEnvelope>,
    dispatcher: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[derive(Default)]
struct Links {
    active: Option<Link>,
    /// Newly installed worker waiting for `activate_update`
    waiting: Option<Link>,
}

pub struct WorkerBridge {
    config: WorkerConfig,
    client: Client,
    links: Mutex<Links>,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
    next_id: AtomicU64,
    discarded: Arc<AtomicU64>,
    next_worker: AtomicU64,
    /// Id of the controlling worker, or `NO_CONTROLLER`
    controller: Arc<AtomicU64>,
    events: broadcast::Sender<WorkerEvent>,
    perf: PerformanceMonitor,
}

impl WorkerBridge {
    pub fn new(config: WorkerConfig, client: Client) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            config,
            client,
            links: Mutex::new(Links::default()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            discarded: Arc::new(AtomicU64::new(0)),
            next_worker: AtomicU64::new(1),
            controller: Arc::new(AtomicU64::new(NO_CONTROLLER)),
            events,
            perf: PerformanceMonitor::new(),
        }
    }

    /// Record measurements into an existing monitor instead of a private one.
    pub fn with_performance(mut self, perf: PerformanceMonitor) -> Self {
        self.perf = perf;
        self
    }

    // ===== Registration =====

    /// Validate the worker script and start a background worker.
    ///
    /// If a worker already controls, the new one installs and waits; an
    /// `UpdateAvailable` event is raised and activation is left to
    /// [`WorkerBridge::activate_update`].
    pub async fn register(&self) -> Result<(), BridgeError> {
        if !self.config.enabled {
            return Err(BridgeError::Disabled);
        }
        let script_url = self
            .config
            .script_url
            .as_deref()
            .ok_or_else(|| BridgeError::Registration("no worker script configured".to_string()))?;

        self.validate_script(script_url).await?;

        let has_controller = self.is_controlling();
        let (req_tx, req_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (state_tx, state_rx) = watch::channel(WorkerState::Installing);

        let worker_id = self.next_worker.fetch_add(1, Ordering::SeqCst);
        let worker = BackgroundWorker::new(self.client.clone(), self.config.store_capacity, has_controller);
        tokio::spawn(worker.run(req_rx, reply_tx, state_tx));
        self.watch_lifecycle(state_rx, worker_id, has_controller);

        let link = self.link(worker_id, req_tx, reply_rx);

        let mut links = self.lock_links();
        if has_controller {
            info!(script = script_url, "Worker update installed, waiting for activation");
            links.waiting = Some(link);
        } else {
            info!(script = script_url, "Worker registered");
            links.active = Some(link);
        }
        Ok(())
    }

    /// Attach an externally hosted worker speaking the same protocol.
    ///
    /// The peer is treated as controlling immediately.
    pub fn connect(&self, tx: mpsc::Sender<WorkerEnvelope>, rx: mpsc::Receiver<WorkerReply>) {
        let worker_id = self.next_worker.fetch_add(1, Ordering::SeqCst);
        let link = self.link(worker_id, tx, rx);
        self.lock_links().active = Some(link);
        self.controller.store(worker_id, Ordering::SeqCst);
        let _ = self.events.send(WorkerEvent::ControllerChanged);
    }

    /// Retire the active worker. Returns false if none was attached.
    ///
    /// A waiting update is left in place for `activate_update`.
    pub fn unregister(&self) -> bool {
        let retired = self.lock_links().active.take();
        let Some(link) = retired else {
            return false;
        };
        if self
            .controller
            .compare_exchange(link.worker_id, NO_CONTROLLER, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.events.send(WorkerEvent::ControllerChanged);
        }
        info!(worker = link.worker_id, "Worker unregistered");
        true
    }

    /// Promote a waiting worker to controller, retiring the previous one.
    pub async fn activate_update(&self) -> Result<(), BridgeError> {
        let (worker_id, tx) = {
            let links = self.lock_links();
            match links.waiting.as_ref() {
                Some(link) => (link.worker_id, link.tx.clone()),
                None => return Err(BridgeError::NotRegistered),
            }
        };

        self.send_request(&tx, WorkerRequest::SkipWaiting).await?;

        let retired = {
            let mut links = self.lock_links();
            let promoted = links.waiting.take();
            std::mem::replace(&mut links.active, promoted)
        };
        // Hand over control before the retired worker reports Redundant
        self.controller.store(worker_id, Ordering::SeqCst);
        drop(retired);
        let _ = self.events.send(WorkerEvent::ControllerChanged);
        info!("Worker update activated");
        Ok(())
    }

    async fn validate_script(&self, script_url: &str) -> Result<(), BridgeError> {
        let response = self.client.get(script_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Registration(format!(
                "worker script {} returned status {}",
                script_url, status
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();
        let allowed = self
            .config
            .allowed_script_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&content_type));
        if !allowed {
            return Err(BridgeError::Registration(format!(
                "worker script {} has content type '{}'",
                script_url, content_type
            )));
        }
        Ok(())
    }

    fn link(&self, worker_id: u64, tx: mpsc::Sender<WorkerEnvelope>, rx: mpsc::Receiver<WorkerReply>) -> Link {
        let dispatcher = tokio::spawn(dispatch_replies(
            rx,
            Arc::clone(&self.pending),
            Arc::clone(&self.discarded),
        ));
        Link {
            worker_id,
            tx,
            dispatcher,
        }
    }

    /// Follow a worker's lifecycle until it drops its state channel.
    ///
    /// A worker that goes redundant while it controls gives up the
    /// controller slot; a worker that was already replaced does not.
    fn watch_lifecycle(&self, mut state_rx: watch::Receiver<WorkerState>, worker_id: u64, had_controller: bool) {
        let events = self.events.clone();
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move {
            loop {
                let state = *state_rx.borrow_and_update();
                debug!(?state, "Worker state changed");
                let _ = events.send(WorkerEvent::StateChanged(state));
                match state {
                    WorkerState::Installed if had_controller => {
                        info!("Worker update available");
                        let _ = events.send(WorkerEvent::UpdateAvailable);
                    }
                    WorkerState::Activated if !had_controller => {
                        controller.store(worker_id, Ordering::SeqCst);
                        let _ = events.send(WorkerEvent::ControllerChanged);
                    }
                    WorkerState::Redundant => {
                        let released = controller
                            .compare_exchange(worker_id, NO_CONTROLLER, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok();
                        if released {
                            info!(worker = worker_id, "Controlling worker went redundant");
                            let _ = events.send(WorkerEvent::ControllerChanged);
                        }
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    // ===== Messaging =====

    /// Fire-and-forget message to the controlling worker.
    pub fn post(&self, request: WorkerRequest) -> Result<(), BridgeError> {
        let tx = self.active_sender()?;
        tx.try_send(WorkerEnvelope { id: None, request }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(envelope) => {
                debug!(message = envelope.request.name(), "Worker inbox full, dropping message");
                BridgeError::Worker("worker inbox full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => BridgeError::ChannelClosed,
        })
    }

    /// Request/response round trip to the controlling worker, bounded by the
    /// configured timeout.
    pub async fn request(&self, request: WorkerRequest) -> Result<WorkerResponse, BridgeError> {
        let tx = self.active_sender()?;
        self.send_request(&tx, request).await
    }

    async fn send_request(
        &self,
        tx: &mpsc::Sender<WorkerEnvelope>,
        request: WorkerRequest,
    ) -> Result<WorkerResponse, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let timeout = self.config.request_timeout();
        let name = request.name();
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            // The timer cannot observe the map before the entry is inserted
            let mut pending = lock(&self.pending);
            let timer = tokio::spawn(expire_request(Arc::clone(&self.pending), id, timeout, name));
            pending.insert(
                id,
                Pending {
                    reply: reply_tx,
                    timer: timer.abort_handle(),
                },
            );
        }

        if tx.send(WorkerEnvelope { id: Some(id), request }).await.is_err() {
            if let Some(entry) = lock(&self.pending).remove(&id) {
                entry.timer.abort();
            }
            return Err(BridgeError::ChannelClosed);
        }

        match reply_rx.await {
            Ok(Ok(WorkerResponse::Error { message })) => Err(BridgeError::Worker(message)),
            Ok(result) => result,
            Err(_) => Err(BridgeError::ChannelClosed),
        }
    }

    fn active_sender(&self) -> Result<mpsc::Sender<WorkerEnvelope>, BridgeError> {
        if !self.config.enabled {
            return Err(BridgeError::Disabled);
        }
        self.lock_links()
            .active
            .as_ref()
            .map(|link| link.tx.clone())
            .ok_or(BridgeError::NotRegistered)
    }

    // ===== Operations =====

    /// Ask the worker to warm these assets in its own store. Does not wait.
    pub fn preload_assets(&self, urls: &[AssetUrl]) -> Result<(), BridgeError> {
        let urls = urls.iter().map(|u| u.to_string()).collect();
        self.post(WorkerRequest::PreloadAssets { urls })
    }

    /// Ask the worker to warm these assets and wait for its tally.
    pub async fn preload_assets_and_wait(&self, urls: &[AssetUrl]) -> Result<(usize, usize), BridgeError> {
        let urls = urls.iter().map(|u| u.to_string()).collect();
        match self.request(WorkerRequest::PreloadAssets { urls }).await? {
            WorkerResponse::Preloaded { cached, failed } => Ok((cached, failed)),
            other => Err(BridgeError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Purge the worker's store, returning how many entries were removed.
    pub async fn clear_cache(&self) -> Result<usize, BridgeError> {
        match self.request(WorkerRequest::ClearCache).await? {
            WorkerResponse::Cleared { removed } => Ok(removed),
            other => Err(BridgeError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    pub async fn cache_status(&self) -> Result<WorkerCacheStatus, BridgeError> {
        match self.request(WorkerRequest::GetCacheStatus).await? {
            WorkerResponse::Status(status) => Ok(status),
            other => Err(BridgeError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    // ===== Status =====

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    pub fn is_available(&self) -> bool {
        self.config.enabled && self.lock_links().active.is_some()
    }

    pub fn is_controlling(&self) -> bool {
        self.controller.load(Ordering::SeqCst) != NO_CONTROLLER
    }

    pub fn has_waiting_update(&self) -> bool {
        self.lock_links().waiting.is_some()
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Replies that arrived after their request had already been abandoned.
    pub fn discarded_replies(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.perf
    }

    fn lock_links(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(pending: &Mutex<HashMap<u64, Pending>>) -> MutexGuard<'_, HashMap<u64, Pending>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reject a request that is still pending once its timeout elapses.
async fn expire_request(
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
    id: u64,
    timeout: Duration,
    name: &'static str,
) {
    tokio::time::sleep(timeout).await;
    let entry = lock(&pending).remove(&id);
    if let Some(entry) = entry {
        warn!(id, message = name, timeout_ms = timeout.as_millis() as u64, "Worker request timed out");
        let _ = entry.reply.send(Err(BridgeError::Timeout(timeout)));
    }
}

/// Route replies to their pending requests until the worker goes away.
async fn dispatch_replies(
    mut rx: mpsc::Receiver<WorkerReply>,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
    discarded: Arc<AtomicU64>,
) {
    while let Some(reply) = rx.recv().await {
        let entry = lock(&pending).remove(&reply.id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.reply.send(Ok(reply.response));
            }
            None => {
                discarded.fetch_add(1, Ordering::SeqCst);
                debug!(id = reply.id, "Discarding late worker reply");
            }
        }
    }
    debug!("Worker reply channel closed");
}
