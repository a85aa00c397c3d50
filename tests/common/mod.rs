#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use kornia_caption::{CaptionEngine, CaptionModel, EngineConfig, ServerConfig, server};
use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub const BOUNDARY: &str = "kornia-caption-test-boundary";

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub String);

/// Describes an image by its mean color, counting every generation call.
///
/// Black images fail and blue images panic, to exercise the error paths.
pub struct ColorModel {
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl ColorModel {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = Self {
            calls: calls.clone(),
            delay: Duration::ZERO,
        };
        (model, calls)
    }
}

impl CaptionModel for ColorModel {
    type Inputs = [f32; 3];
    type Tokens = Vec<String>;
    type Error = MockError;

    fn name(&self) -> &str {
        "color-model"
    }

    fn preprocess(&self, image: &RgbImage) -> Result<[f32; 3], MockError> {
        let count = (image.width() * image.height()) as f32;
        let mut mean = [0f32; 3];
        for pixel in image.pixels() {
            for (channel, value) in mean.iter_mut().zip(pixel.0) {
                *channel += value as f32 / count;
            }
        }
        Ok(mean)
    }

    fn generate(&mut self, [r, g, b]: [f32; 3]) -> Result<Vec<String>, MockError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let words: &[&str] = if r < 16.0 && g < 16.0 && b < 16.0 {
            return Err(MockError("CUDA out of memory".into()));
        } else if b > 200.0 && r < 50.0 && g < 50.0 {
            panic!("malformed tensor");
        } else if r > 200.0 && g < 50.0 && b < 50.0 {
            &["[CLS]", "a", "red", "square", "[SEP]"]
        } else if g > 200.0 && r < 50.0 && b < 50.0 {
            &["[CLS]", "a", "green", "square", "[SEP]"]
        } else {
            &["[CLS]", "a", "picture", "[SEP]"]
        };
        Ok(words.iter().map(|w| w.to_string()).collect())
    }

    fn decode(&self, tokens: &Vec<String>, skip_special_tokens: bool) -> Result<String, MockError> {
        Ok(tokens
            .iter()
            .filter(|t| !(skip_special_tokens && t.starts_with('[')))
            .cloned()
            .collect::<Vec<_>>()
            .join(" "))
    }
}

pub fn app(model: ColorModel) -> Router {
    app_with(model, EngineConfig::default(), ServerConfig::default())
}

pub fn app_with(model: ColorModel, engine_config: EngineConfig, config: ServerConfig) -> Router {
    let engine = Arc::new(CaptionEngine::new(model, engine_config));
    server::router(engine, &config)
}

pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(RgbImage::from_pixel(width, height, Rgb(color)), ImageFormat::Jpeg)
}

pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(RgbImage::from_pixel(width, height, Rgb(color)), ImageFormat::Png)
}

fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

/// Builds a `POST /caption` multipart request with the given file fields.
pub fn caption_request(fields: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, data) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"{name}\"; filename=\"upload\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/caption")
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
