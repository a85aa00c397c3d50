//! BLIP image captioning backend, running on candle.
//!
//! The checkpoint is fetched from the Hugging Face hub by repo id, or read
//! from local `model.safetensors` / `tokenizer.json` files. Generation is
//! greedy, so the same image always yields the same caption.

use crate::model::CaptionModel;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::{
    generation::LogitsProcessor,
    models::{blip, blip_text},
};
use hf_hub::{Repo, RepoType, api::sync::Api};
use image::{
    RgbImage,
    imageops::{self, FilterType},
};
use std::path::PathBuf;
use tokenizers::Tokenizer;

/// Checkpoint loaded when none is configured.
pub const DEFAULT_CHECKPOINT: &str = "Salesforce/blip-image-captioning-base";
/// Upper bound on generated tokens per caption.
pub const DEFAULT_MAX_TOKENS: usize = 20;

// `[DEC]` opens the decoder prompt, `[SEP]` terminates the caption
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

// unused with greedy sampling, but the processor wants one
const SAMPLING_SEED: u64 = 1337;

const IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const IMAGE_STD: [f32; 3] = [0.26862954, 0.261_302_6, 0.275_777_1];

#[derive(Debug, thiserror::Error)]
pub enum BlipError {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("failed to fetch checkpoint: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

/// BLIP architecture size; the two captioning checkpoints differ in their vision tower.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlipVariant {
    Base,
    Large,
}

impl BlipVariant {
    /// Guesses the architecture from a hub repo id such as
    /// `Salesforce/blip-image-captioning-large`.
    pub fn from_checkpoint(checkpoint: &str) -> Self {
        if checkpoint.to_ascii_lowercase().contains("large") {
            BlipVariant::Large
        } else {
            BlipVariant::Base
        }
    }

    pub fn config(&self) -> blip::Config {
        match self {
            BlipVariant::Base => blip_base_config(),
            BlipVariant::Large => blip::Config::image_captioning_large(),
        }
    }
}

fn blip_base_config() -> blip::Config {
    let text_config = blip_text::Config {
        vocab_size: 30524,
        hidden_size: 768,
        encoder_hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 768,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        max_position_embeddings: 512,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-12,
        is_decoder: true,
    };
    let vision_config = blip::VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: 384,
        patch_size: 16,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-5,
    };

    blip::Config {
        text_config,
        vision_config,
        projection_dim: 512,
        image_text_hidden_size: 256,
    }
}

/// Where to load BLIP from and how to run it.
#[derive(Clone, Debug)]
pub struct BlipConfig {
    /// Hugging Face repo id of the checkpoint.
    pub checkpoint: String,
    /// Local weights, skips the hub download when set.
    pub model_file: Option<PathBuf>,
    /// Local tokenizer, skips the hub download when set.
    pub tokenizer_file: Option<PathBuf>,
    /// Architecture override; guessed from `checkpoint` when unset.
    pub variant: Option<BlipVariant>,
    pub max_tokens: usize,
    /// Run on CPU even if an accelerator is available.
    pub cpu: bool,
}

impl Default for BlipConfig {
    fn default() -> Self {
        Self {
            checkpoint: DEFAULT_CHECKPOINT.to_string(),
            model_file: None,
            tokenizer_file: None,
            variant: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            cpu: false,
        }
    }
}

/// A loaded BLIP model with its tokenizer.
pub struct BlipCaptioner {
    name: String,
    model: blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    logits_processor: LogitsProcessor,
    device: Device,
    image_size: usize,
    max_tokens: usize,
}

impl BlipCaptioner {
    /// Loads the checkpoint; any failure here should keep the service from starting.
    pub fn load(config: &BlipConfig) -> Result<Self, BlipError> {
        let device = if config.cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available(0)?
        };
        let variant = config
            .variant
            .unwrap_or_else(|| BlipVariant::from_checkpoint(&config.checkpoint));
        let (model_file, tokenizer_file) = resolve_checkpoint_files(config)?;

        log::info!(
            "Loading BLIP {:?} from {} on {:?}",
            variant,
            model_file.display(),
            device
        );

        let tokenizer = Tokenizer::from_file(&tokenizer_file)
            .map_err(|err| BlipError::Tokenizer(err.to_string()))?;

        let blip_config = variant.config();
        let image_size = blip_config.vision_config.image_size;

        // SAFETY: the weights file is not modified while it is memory-mapped
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_file], DType::F32, &device)? };
        let model = blip::BlipForConditionalGeneration::new(&blip_config, vb)?;

        Ok(Self {
            name: config.checkpoint.clone(),
            model,
            tokenizer,
            logits_processor: LogitsProcessor::new(SAMPLING_SEED, None, None),
            device,
            image_size,
            max_tokens: config.max_tokens,
        })
    }
}

fn resolve_checkpoint_files(config: &BlipConfig) -> Result<(PathBuf, PathBuf), BlipError> {
    if let (Some(model_file), Some(tokenizer_file)) = (&config.model_file, &config.tokenizer_file)
    {
        return Ok((model_file.clone(), tokenizer_file.clone()));
    }

    let api = Api::new()?;
    let repo = api.repo(Repo::new(config.checkpoint.clone(), RepoType::Model));

    let model_file = match &config.model_file {
        Some(path) => path.clone(),
        None => {
            log::info!("Fetching model.safetensors from {}", config.checkpoint);
            repo.get("model.safetensors")?
        }
    };
    let tokenizer_file = match &config.tokenizer_file {
        Some(path) => path.clone(),
        None => {
            log::info!("Fetching tokenizer.json from {}", config.checkpoint);
            repo.get("tokenizer.json")?
        }
    };

    Ok((model_file, tokenizer_file))
}

/// Resizes to `size`×`size` and applies the CLIP mean/std normalization,
/// returning a `(3, size, size)` f32 tensor on the CPU.
pub fn image_to_tensor(image: &RgbImage, size: usize) -> candle_core::Result<Tensor> {
    let resized = imageops::resize(image, size as u32, size as u32, FilterType::CatmullRom);
    let data = Tensor::from_vec(resized.into_raw(), (size, size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?;
    let mean = Tensor::new(&IMAGE_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, &Device::Cpu)?.reshape((3, 1, 1))?;
    (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)
}

impl CaptionModel for BlipCaptioner {
    type Inputs = Tensor;
    type Tokens = Vec<u32>;
    type Error = BlipError;

    fn name(&self) -> &str {
        &self.name
    }

    fn preprocess(&self, image: &RgbImage) -> Result<Tensor, BlipError> {
        let pixels = image_to_tensor(image, self.image_size)?;
        Ok(pixels.to_device(&self.device)?)
    }

    fn generate(&mut self, pixels: Tensor) -> Result<Vec<u32>, BlipError> {
        let image_embeds = pixels.unsqueeze(0)?.apply(self.model.vision_model())?;

        // the decoder cache still holds the previous caption
        self.model.text_decoder().reset_kv_cache();

        let mut token_ids = vec![BOS_TOKEN_ID];
        for index in 0..self.max_tokens {
            let context_size = if index > 0 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .text_decoder()
                .forward(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let token = self.logits_processor.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            token_ids.push(token);
        }
        log::debug!("Generated {} tokens", token_ids.len() - 1);

        token_ids.remove(0);
        Ok(token_ids)
    }

    fn decode(&self, tokens: &Vec<u32>, skip_special_tokens: bool) -> Result<String, BlipError> {
        self.tokenizer
            .decode(tokens, skip_special_tokens)
            .map_err(|err| BlipError::Tokenizer(err.to_string()))
    }
}
