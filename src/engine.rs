use crate::{config::EngineConfig, model::CaptionModel};
use image::RgbImage;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

/// Represents the current state of the caption engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptionEngineState {
    /// The engine is waiting for the next request.
    Idle,
    /// The engine is currently running the model on a request.
    Processing,
}

impl CaptionEngineState {
    /// Returns the state as a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionEngineState::Idle => "idle",
            CaptionEngineState::Processing => "processing",
        }
    }
}

/// Errors returned by [`CaptionEngine::caption`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request queue is full.
    #[error("Caption engine is busy, retry later")]
    Busy,
    /// No reply arrived within the configured inference timeout.
    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),
    /// The model returned an error or panicked.
    #[error("Inference failed: {0}")]
    Inference(String),
    /// The inference thread is gone.
    #[error("Caption engine is not running")]
    Stopped,
}

/// Internal request wrapper used by the engine to track inference requests.
struct CaptionEngineRequest {
    id: u64,
    image: RgbImage,
    reply: oneshot::Sender<Result<CaptionEngineResponse, EngineError>>,
}

/// Response returned by the engine containing both the caption and telemetry data.
#[derive(Clone, Debug)]
pub struct CaptionEngineResponse {
    /// Unique identifier assigned when the request was accepted.
    pub id: u64,
    /// Width and height of the captioned image.
    pub image_size: (u32, u32),
    /// Timestamp when the inference started.
    pub start_time: Instant,
    /// Total time taken by the model.
    pub duration: Duration,
    /// The generated caption.
    pub caption: String,
}

#[derive(Debug)]
struct EngineShared {
    state: Mutex<CaptionEngineState>,
    queued: AtomicUsize,
    completed: AtomicU64,
}

impl EngineShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(CaptionEngineState::Idle),
            queued: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        }
    }

    fn state(&self) -> CaptionEngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CaptionEngineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Inference engine that owns a [`CaptionModel`] on a dedicated thread.
///
/// The model is moved into the thread at construction and never shared, so
/// models that need `&mut self` for generation (e.g. decoders with a KV
/// cache) are serialized without any locking around the model itself.
/// Requests are accepted into a bounded queue and processed in FIFO order;
/// every request carries its own reply channel.
///
/// Faults inside the model, either returned errors or panics, are caught at
/// the engine boundary and reported as [`EngineError::Inference`]; the thread
/// keeps serving subsequent requests.
pub struct CaptionEngine {
    model_id: String,
    config: EngineConfig,
    shared: Arc<EngineShared>,
    req_tx: Option<mpsc::SyncSender<CaptionEngineRequest>>,
    inference_handle: Option<JoinHandle<()>>,
    id_counter: AtomicU64,
}

impl CaptionEngine {
    /// Creates a new caption engine with the given model.
    ///
    /// The engine spawns a background thread that handles inference requests.
    /// The model is moved to this thread.
    ///
    /// # Arguments
    /// * `model` - The model implementation that will produce captions
    /// * `config` - Queue capacity and per-request timeout
    pub fn new<M>(model: M, config: EngineConfig) -> Self
    where
        M: CaptionModel + Send + 'static,
    {
        let model_id = model.name().to_string();
        let (req_tx, req_rx) = mpsc::sync_channel::<CaptionEngineRequest>(config.queue_capacity);
        let shared = Arc::new(EngineShared::new());

        let inference_handle = std::thread::spawn({
            let shared = shared.clone();
            move || run_inference_loop(model, req_rx, &shared)
        });

        log::debug!(
            "Started caption engine for {} (queue capacity {}, timeout {:?})",
            model_id,
            config.queue_capacity,
            config.inference_timeout
        );

        Self {
            model_id,
            config,
            shared,
            req_tx: Some(req_tx),
            inference_handle: Some(inference_handle),
            id_counter: AtomicU64::new(0),
        }
    }

    /// Returns the identifier of the model driven by this engine.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns the scheduling limits of this engine.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the current state of the inference thread.
    pub fn state(&self) -> CaptionEngineState {
        self.shared.state()
    }

    /// Number of accepted requests the inference thread has not picked up yet.
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Number of captions produced successfully since startup.
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Captions an image, waiting at most the configured inference timeout.
    ///
    /// The timeout covers both the time spent queued and the inference
    /// itself. A request that times out while still queued is skipped by
    /// the inference thread; one that is already running completes and its
    /// result is discarded.
    ///
    /// # Errors
    /// * `Busy` - The queue is full, nothing was scheduled
    /// * `Timeout` - No result arrived in time
    /// * `Inference` - The model failed on this image
    /// * `Stopped` - The engine has been stopped
    pub async fn caption(&self, image: RgbImage) -> Result<CaptionEngineResponse, EngineError> {
        let req_tx = self.req_tx.as_ref().ok_or(EngineError::Stopped)?;
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = req_tx.try_send(CaptionEngineRequest {
            id,
            image,
            reply: reply_tx,
        }) {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(match err {
                mpsc::TrySendError::Full(_) => {
                    log::warn!("Request {id} rejected: inference queue is full");
                    EngineError::Busy
                }
                mpsc::TrySendError::Disconnected(_) => {
                    log::error!("Request channel disconnected");
                    EngineError::Stopped
                }
            });
        }

        let timeout = self.config.inference_timeout;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                log::error!("Inference thread dropped request {id}");
                Err(EngineError::Stopped)
            }
            Err(_) => {
                log::warn!("Request {id} timed out after {timeout:?}");
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    /// Stops the caption engine and shuts down the background thread.
    ///
    /// This closes the request channel and waits for the background thread
    /// to finish processing any remaining requests.
    pub fn stop(&mut self) {
        self.req_tx.take();
        if let Some(handle) = self.inference_handle.take() {
            if handle.join().is_err() {
                log::error!("Inference thread terminated abnormally");
            }
        }
    }
}

impl Drop for CaptionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_inference_loop<M: CaptionModel>(
    mut model: M,
    req_rx: mpsc::Receiver<CaptionEngineRequest>,
    shared: &EngineShared,
) {
    while let Ok(req) = req_rx.recv() {
        shared.queued.fetch_sub(1, Ordering::SeqCst);

        if req.reply.is_closed() {
            log::debug!("Request {} was abandoned while queued, skipping", req.id);
            continue;
        }

        log::debug!("Scheduling inference for request {}", req.id);

        shared.set_state(CaptionEngineState::Processing);
        let start_time = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| model.caption(&req.image)));
        let duration = start_time.elapsed();
        shared.set_state(CaptionEngineState::Idle);

        let result = match outcome {
            Ok(Ok(caption)) => {
                log::debug!("Inference for request {} completed in {duration:?}", req.id);
                shared.completed.fetch_add(1, Ordering::SeqCst);
                Ok(CaptionEngineResponse {
                    id: req.id,
                    image_size: req.image.dimensions(),
                    start_time,
                    duration,
                    caption,
                })
            }
            Ok(Err(err)) => {
                log::error!("Inference for request {} failed: {err}", req.id);
                Err(EngineError::Inference(err.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("Model panicked on request {}: {message}", req.id);
                Err(EngineError::Inference(message))
            }
        };

        if req.reply.send(result).is_err() {
            log::warn!("Request {} was abandoned before its caption was ready", req.id);
        }
    }

    log::debug!("Request channel closed, inference thread exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "model panicked".to_string()
    }
}
