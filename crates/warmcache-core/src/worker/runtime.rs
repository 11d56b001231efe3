//! The background worker: a separate task with its own HTTP client and
//! persistent store, reachable only through message passing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::protocol::{WorkerCacheStatus, WorkerEnvelope, WorkerReply, WorkerRequest, WorkerResponse, WorkerState};

/// Versioned name of the worker's store.
pub const WORKER_CACHE_NAME: &str = "warmcache-assets-v1";

/// Assets fetched concurrently by the worker during a preload request.
const WORKER_PRELOAD_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub content_type: Option<String>,
    pub body: Arc<[u8]>,
    pub stored_at: DateTime<Utc>,
}

/// Bounded store owned by the worker, evicting oldest entries first.
#[derive(Debug)]
pub struct WorkerStore {
    name: String,
    capacity: usize,
    assets: HashMap<String, StoredAsset>,
    order: VecDeque<String>,
    /// Bumped on every clear; puts from fetches started earlier are dropped
    generation: u64,
}

impl WorkerStore {
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            capacity: capacity.max(1),
            assets: HashMap::new(),
            order: VecDeque::new(),
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn contains(&self, url: &str) -> bool {
        self.assets.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&StoredAsset> {
        self.assets.get(url)
    }

    /// Store an asset fetched during `generation`. Returns false, storing
    /// nothing, if the store was cleared since.
    pub fn put(&mut self, url: &str, asset: StoredAsset, generation: u64) -> bool {
        if generation != self.generation {
            debug!(url, "Dropping asset fetched before the store was cleared");
            return false;
        }
        if self.assets.insert(url.to_string(), asset).is_some() {
            return true;
        }
        self.order.push_back(url.to_string());
        while self.assets.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.assets.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    /// Remove everything, returning how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let removed = self.assets.len();
        self.assets.clear();
        self.order.clear();
        self.generation += 1;
        removed
    }

    pub fn status(&self) -> WorkerCacheStatus {
        WorkerCacheStatus {
            cache_name: self.name.clone(),
            entries: self.assets.len(),
            total_bytes: self.assets.values().map(|a| a.body.len() as u64).sum(),
            capacity: self.capacity,
        }
    }
}

pub struct BackgroundWorker {
    client: Client,
    store: Arc<Mutex<WorkerStore>>,
    /// Another worker already controls; stay installed until told to skip waiting
    wait_for_activation: bool,
}

impl BackgroundWorker {
    pub fn new(client: Client, store_capacity: usize, wait_for_activation: bool) -> Self {
        Self {
            client,
            store: Arc::new(Mutex::new(WorkerStore::new(WORKER_CACHE_NAME, store_capacity))),
            wait_for_activation,
        }
    }

    /// Run the worker until its request channel closes.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<WorkerEnvelope>,
        replies: mpsc::Sender<WorkerReply>,
        state: watch::Sender<WorkerState>,
    ) {
        state.send_replace(WorkerState::Installing);
        debug!(cache = WORKER_CACHE_NAME, "Worker installing");
        state.send_replace(WorkerState::Installed);

        if self.wait_for_activation {
            info!("Worker installed and waiting for activation");
            loop {
                let Some(envelope) = requests.recv().await else {
                    state.send_replace(WorkerState::Redundant);
                    return;
                };
                let activate = envelope.request == WorkerRequest::SkipWaiting;
                let response = if activate {
                    WorkerResponse::Ack
                } else {
                    WorkerResponse::Error {
                        message: format!("{} sent to a waiting worker", envelope.request.name()),
                    }
                };
                Self::reply(&replies, envelope.id, response).await;
                if activate {
                    break;
                }
            }
        }

        state.send_replace(WorkerState::Activating);
        state.send_replace(WorkerState::Activated);
        info!("Worker activated");

        while let Some(envelope) = requests.recv().await {
            let client = self.client.clone();
            let store = Arc::clone(&self.store);
            let replies = replies.clone();
            tokio::spawn(async move {
                let response = Self::handle(&client, &store, envelope.request).await;
                Self::reply(&replies, envelope.id, response).await;
            });
        }

        debug!("Worker channel closed");
        state.send_replace(WorkerState::Redundant);
    }

    async fn reply(replies: &mpsc::Sender<WorkerReply>, id: Option<u64>, response: WorkerResponse) {
        let Some(id) = id else {
            return;
        };
        if replies.send(WorkerReply { id, response }).await.is_err() {
            debug!(id, "Bridge went away before worker reply");
        }
    }

    async fn handle(client: &Client, store: &Arc<Mutex<WorkerStore>>, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::PreloadAssets { urls } => {
                let (cached, failed) = Self::preload(client, store, urls).await;
                WorkerResponse::Preloaded { cached, failed }
            }
            WorkerRequest::ClearCache => {
                let removed = lock(store).clear();
                info!(removed, "Worker cache cleared");
                WorkerResponse::Cleared { removed }
            }
            WorkerRequest::GetCacheStatus => {
                let status = lock(store).status();
                WorkerResponse::Status(status)
            }
            WorkerRequest::SkipWaiting => WorkerResponse::Ack,
        }
    }

    async fn preload(client: &Client, store: &Arc<Mutex<WorkerStore>>, urls: Vec<String>) -> (usize, usize) {
        let (missing, generation): (Vec<String>, u64) = {
            let store = lock(store);
            let missing = urls.into_iter().filter(|u| !store.contains(u)).collect();
            (missing, store.generation())
        };

        let results: Vec<bool> = stream::iter(missing)
            .map(|url| async move {
                match Self::fetch(client, &url).await {
                    Ok(asset) => lock(store).put(&url, asset, generation),
                    Err(e) => {
                        warn!(url = %url, error = %e, "Worker failed to cache asset");
                        false
                    }
                }
            })
            .buffer_unordered(WORKER_PRELOAD_CONCURRENCY)
            .collect()
            .await;

        let cached = results.iter().filter(|ok| **ok).count();
        debug!(cached, failed = results.len() - cached, "Worker preload finished");
        (cached, results.len() - cached)
    }

    async fn fetch(client: &Client, url: &str) -> Result<StoredAsset, reqwest::Error> {
        let response = client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes().await?;
        Ok(StoredAsset {
            content_type,
            body: Arc::from(body.as_ref()),
            stored_at: Utc::now(),
        })
    }
}

fn lock(store: &Mutex<WorkerStore>) -> std::sync::MutexGuard<'_, WorkerStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
