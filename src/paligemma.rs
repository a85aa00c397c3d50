use crate::model::CaptionModel;
use image::RgbImage;
use kornia_image::{Image, ImageError, ImageSize, allocator::CpuAllocator};
use kornia_vlm::paligemma::{Paligemma, PaligemmaConfig, PaligemmaError};

/// Task prefix PaliGemma was trained with for English captions.
pub const CAPTION_PROMPT: &str = "caption en";
/// Default number of tokens to sample per caption.
pub const DEFAULT_SAMPLE_LEN: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum PaligemmaCaptionError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Paligemma(#[from] PaligemmaError),
}

/// Captioning backend built on kornia-vlm's PaliGemma.
///
/// PaliGemma handles its own preprocessing and token decoding inside
/// `inference`, so the generated output is already text.
pub struct PaligemmaCaptioner {
    model: Paligemma,
    sample_len: usize,
}

impl PaligemmaCaptioner {
    pub fn new(sample_len: usize) -> Result<Self, PaligemmaCaptionError> {
        log::info!("Loading PaliGemma");
        let model = Paligemma::new(PaligemmaConfig::default())?;
        Ok(Self { model, sample_len })
    }
}

impl CaptionModel for PaligemmaCaptioner {
    type Inputs = Image<u8, 3, CpuAllocator>;
    type Tokens = String;
    type Error = PaligemmaCaptionError;

    fn name(&self) -> &str {
        "paligemma"
    }

    fn preprocess(&self, image: &RgbImage) -> Result<Self::Inputs, Self::Error> {
        let size = ImageSize {
            width: image.width() as usize,
            height: image.height() as usize,
        };
        Ok(Image::new(size, image.as_raw().clone(), CpuAllocator)?)
    }

    fn generate(&mut self, inputs: Self::Inputs) -> Result<Self::Tokens, Self::Error> {
        let response = self
            .model
            .inference(&inputs, CAPTION_PROMPT, self.sample_len, false)?;
        Ok(response)
    }

    fn decode(
        &self,
        tokens: &Self::Tokens,
        _skip_special_tokens: bool,
    ) -> Result<String, Self::Error> {
        // the model echoes the task prefix on some checkpoints
        let caption = tokens.trim();
        let caption = caption.strip_prefix(CAPTION_PROMPT).unwrap_or(caption);
        Ok(caption.trim().to_string())
    }
}
