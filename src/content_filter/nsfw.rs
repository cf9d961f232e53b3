use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use hf_hub::{Repo, RepoType, api::sync::Api};
use image::{ImageBuffer, Rgb};
use serde::Deserialize;

use super::{ImageClassifier, LabelScore};
use crate::capture::Frame;
use crate::model_loader::{ModelFiles, ModelSource};

pub const MODEL_REPO: &str = "Falconsai/nsfw_image_detection";
const IMAGE_SIZE: usize = 224;
// ViTImageProcessor defaults for this model
const PIXEL_MEAN: f32 = 0.5;
const PIXEL_STD: f32 = 0.5;

/// Downloads the model from the Hugging Face hub and builds a [`VitClassifier`].
#[derive(Debug, Clone)]
pub struct HubModelSource {
    repo: String,
}

impl HubModelSource {
    pub fn new(repo: impl Into<String>) -> Self {
        Self { repo: repo.into() }
    }
}

impl Default for HubModelSource {
    fn default() -> Self {
        Self::new(MODEL_REPO)
    }
}

impl ModelSource for HubModelSource {
    fn fetch(&self) -> Result<ModelFiles> {
        let api = Api::new().context("failed to build Hugging Face API client")?;
        let repo = api.repo(Repo::new(self.repo.clone(), RepoType::Model));

        let weights = repo
            .get("model.safetensors")
            .with_context(|| format!("failed to fetch weights from {}", self.repo))?;
        let config = repo
            .get("config.json")
            .with_context(|| format!("failed to fetch config from {}", self.repo))?;

        Ok(ModelFiles { weights, config })
    }

    fn build(&self, files: &ModelFiles) -> Result<Arc<dyn ImageClassifier>> {
        Ok(Arc::new(VitClassifier::load(&files.weights, &files.config)?))
    }
}

#[derive(Debug, Deserialize)]
struct LabelConfig {
    #[serde(default)]
    id2label: BTreeMap<String, String>,
}

/// Orders `id2label` entries by numeric class index.
fn ordered_labels(id2label: &BTreeMap<String, String>) -> Result<Vec<String>> {
    let mut indexed = id2label
        .iter()
        .map(|(id, label)| {
            id.parse::<usize>()
                .map(|idx| (idx, label.clone()))
                .map_err(|_| anyhow!("invalid class index {id:?} in id2label"))
        })
        .collect::<Result<Vec<_>>>()?;
    indexed.sort_by_key(|(idx, _)| *idx);

    for (expected, (idx, _)) in indexed.iter().enumerate() {
        if *idx != expected {
            bail!("id2label is missing class index {expected}");
        }
    }

    Ok(indexed.into_iter().map(|(_, label)| label).collect())
}

/// ViT image classifier running on candle.
///
/// Forward passes are serialized through the model mutex.
pub struct VitClassifier {
    model: Mutex<vit::Model>,
    labels: Vec<String>,
    device: Device,
}

impl VitClassifier {
    pub fn load(weights: &Path, config_path: &Path) -> Result<Self> {
        #[cfg(feature = "metal")]
        let device = Device::new_metal(0).unwrap_or(Device::Cpu);
        #[cfg(not(feature = "metal"))]
        let device = Device::Cpu;

        log::info!("Loading NSFW detection model on {:?}", device);

        let raw_config = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config: vit::Config = serde_json::from_str(&raw_config)?;
        let labels = ordered_labels(&serde_json::from_str::<LabelConfig>(&raw_config)?.id2label)?;
        if labels.is_empty() {
            bail!("model config declares no labels");
        }

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let model = vit::Model::new(&config, labels.len(), vb)?;

        log::info!("NSFW model loaded with labels {:?}", labels);

        Ok(Self {
            model: Mutex::new(model),
            labels,
            device,
        })
    }

    fn preprocess(&self, frame: &Frame) -> Result<Tensor> {
        let data = normalized_chw(frame)?;
        let tensor = Tensor::from_vec(data, (1, 3, IMAGE_SIZE, IMAGE_SIZE), &self.device)?;
        Ok(tensor)
    }
}

/// Resizes to the model input size and lays the pixels out as normalized CHW floats.
fn normalized_chw(frame: &Frame) -> Result<Vec<f32>> {
    let img: ImageBuffer<Rgb<u8>, _> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgb.as_slice())
            .ok_or_else(|| anyhow!("Invalid image dimensions"))?;

    let resized = image::imageops::resize(
        &img,
        IMAGE_SIZE as u32,
        IMAGE_SIZE as u32,
        image::imageops::FilterType::Triangle,
    );

    let plane = IMAGE_SIZE * IMAGE_SIZE;
    let mut data = vec![0f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for channel in 0..3 {
            let value = f32::from(pixel[channel]) / 255.0;
            data[channel * plane + i] = (value - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    Ok(data)
}

impl ImageClassifier for VitClassifier {
    fn predict(&self, frame: &Frame) -> Result<Vec<LabelScore>> {
        let input = self.preprocess(frame)?;
        let logits = {
            let model = self.model.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            model.forward(&input)?
        };

        let probs = candle_nn::ops::softmax(&logits, 1)?;
        let probs: Vec<f32> = probs.flatten_all()?.to_vec1()?;

        Ok(self
            .labels
            .iter()
            .zip(probs)
            .map(|(label, score)| LabelScore::new(label.clone(), score))
            .collect())
    }
}
