use argh::FromArgs;
use kornia_caption::{
    CaptionEngine, EngineConfig, ServerConfig,
    blip::{self, BlipCaptioner, BlipConfig},
    config::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY},
    server,
};
use std::{path::PathBuf, time::Duration};

// defaults for the server binary
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_MB: usize = 16;

#[derive(FromArgs)]
/// Serve image captions over HTTP.
struct CaptionServerArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// captioning backend: "blip" or "paligemma"
    #[argh(option, default = "String::from(\"blip\")")]
    backend: String,

    /// hugging face repo id of the BLIP checkpoint
    #[argh(option, default = "blip::DEFAULT_CHECKPOINT.to_string()")]
    checkpoint: String,

    /// local BLIP weights (model.safetensors)
    #[argh(option)]
    model_file: Option<PathBuf>,

    /// local BLIP tokenizer (tokenizer.json)
    #[argh(option)]
    tokenizer_file: Option<PathBuf>,

    /// maximum number of tokens generated per caption
    #[argh(option, default = "blip::DEFAULT_MAX_TOKENS")]
    max_tokens: usize,

    /// seconds a request may wait for its caption
    #[argh(option, default = "DEFAULT_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// requests allowed to queue behind the running inference
    #[argh(option, default = "DEFAULT_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// maximum upload size in MiB
    #[argh(option, default = "DEFAULT_MAX_UPLOAD_MB")]
    max_upload_mb: usize,

    /// run the model on CPU even if CUDA is available
    #[argh(switch)]
    cpu: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let args: CaptionServerArgs = argh::from_env();

    let engine_config = EngineConfig {
        queue_capacity: args.queue_capacity,
        inference_timeout: Duration::from_secs(args.timeout_secs),
    };
    let server_config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        max_upload_bytes: args.max_upload_mb * 1024 * 1024,
    };

    // the model must be ready before the first request is accepted
    let engine = match load_engine(&args, engine_config).await {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("Failed to load the captioning model: {err}");
            return Err(err);
        }
    };
    log::info!("Loaded model {}", engine.model_id());

    server::serve(server_config, engine).await?;

    Ok(())
}

async fn load_engine(
    args: &CaptionServerArgs,
    config: EngineConfig,
) -> Result<CaptionEngine, Box<dyn std::error::Error>> {
    match args.backend.as_str() {
        "blip" => {
            let blip_config = BlipConfig {
                checkpoint: args.checkpoint.clone(),
                model_file: args.model_file.clone(),
                tokenizer_file: args.tokenizer_file.clone(),
                variant: None,
                max_tokens: args.max_tokens,
                cpu: args.cpu,
            };
            // downloading and mmapping the weights blocks
            let model =
                tokio::task::spawn_blocking(move || BlipCaptioner::load(&blip_config)).await??;
            Ok(CaptionEngine::new(model, config))
        }
        #[cfg(feature = "paligemma")]
        "paligemma" => {
            use kornia_caption::paligemma::{DEFAULT_SAMPLE_LEN, PaligemmaCaptioner};

            let model =
                tokio::task::spawn_blocking(|| PaligemmaCaptioner::new(DEFAULT_SAMPLE_LEN))
                    .await??;
            Ok(CaptionEngine::new(model, config))
        }
        #[cfg(not(feature = "paligemma"))]
        "paligemma" => Err("the paligemma backend requires the `paligemma` feature".into()),
        other => Err(format!("Unsupported backend: {other}").into()),
    }
}
