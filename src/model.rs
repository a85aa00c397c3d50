use image::RgbImage;

/// Trait for implementing captioning models that can be driven by the [`CaptionEngine`].
///
/// A caption is produced in three steps, each of which is delegated to the
/// underlying model library: preprocessing the pixel grid into model inputs,
/// generating a token sequence and decoding the tokens back into text.
///
/// [`CaptionEngine`]: crate::CaptionEngine
pub trait CaptionModel {
    /// The numeric representation the model consumes, e.g. a normalized tensor.
    type Inputs;
    /// The raw output of the generation step.
    type Tokens;
    /// The error type that can be returned by any of the steps.
    type Error: std::error::Error + Send + Sync + 'static;

    /// A short identifier of the loaded checkpoint, used for logging and health reports.
    fn name(&self) -> &str;

    /// Transforms an RGB pixel grid into the inputs expected by the model.
    fn preprocess(&self, image: &RgbImage) -> Result<Self::Inputs, Self::Error>;

    /// Runs the generation step on the preprocessed inputs.
    fn generate(&mut self, inputs: Self::Inputs) -> Result<Self::Tokens, Self::Error>;

    /// Converts generated tokens into text, optionally dropping special/control tokens.
    fn decode(
        &self,
        tokens: &Self::Tokens,
        skip_special_tokens: bool,
    ) -> Result<String, Self::Error>;

    /// Runs the full pipeline on an image and returns the caption.
    fn caption(&mut self, image: &RgbImage) -> Result<String, Self::Error> {
        let inputs = self.preprocess(image)?;
        let tokens = self.generate(inputs)?;
        let caption = self.decode(&tokens, true)?;
        Ok(caption.trim().to_string())
    }
}
