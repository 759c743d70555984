// ============================================================
// Layer 6 — Pretrained BERT Loader
// ============================================================
// Reads a HuggingFace BERT directory:
//
//   config.json          → BertConfig (serde)
//   model.safetensors    → weights copied into a LayeredBert
//
// Key mapping (the "bert." prefix is optional):
//
//   embeddings.word_embeddings.weight        → embeddings.word
//   embeddings.position_embeddings.weight    → embeddings.position
//   embeddings.token_type_embeddings.weight  → embeddings.token_type
//   embeddings.LayerNorm.{weight,bias}       → embeddings.layer_norm
//   encoder.layer.N.attention.self.{query,key,value}
//   encoder.layer.N.attention.output.dense   → attention.output
//   encoder.layer.N.attention.output.LayerNorm
//   encoder.layer.N.intermediate.dense
//   encoder.layer.N.output.dense
//   encoder.layer.N.output.LayerNorm
//   pooler.dense
//
// PyTorch stores Linear weights as [out, in]; burn wants
// [in, out], so every dense weight is transposed. Older
// checkpoints call LayerNorm parameters gamma / beta.

use anyhow::{bail, ensure, Context, Result};
use burn::{
    module::Param,
    nn::{Embedding, LayerNorm, Linear},
    prelude::*,
};
use safetensors::{Dtype, SafeTensors};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

use crate::ml::encoder::{BertConfig, LayeredBert};

const CONFIG_FILE:  &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";

// ─── config.json ──────────────────────────────────────────────────────────────
fn default_dropout() -> f64 { 0.1 }
fn default_eps() -> f64 { 1e-12 }
fn default_init_range() -> f64 { 0.02 }
fn default_type_vocab() -> usize { 2 }

#[derive(Debug, Deserialize)]
struct HfBertConfig {
    vocab_size:                   usize,
    hidden_size:                  usize,
    num_hidden_layers:            usize,
    num_attention_heads:          usize,
    intermediate_size:            usize,
    max_position_embeddings:      usize,
    #[serde(default = "default_type_vocab")]
    type_vocab_size:              usize,
    #[serde(default = "default_dropout")]
    hidden_dropout_prob:          f64,
    #[serde(default = "default_dropout")]
    attention_probs_dropout_prob: f64,
    #[serde(default = "default_eps")]
    layer_norm_eps:               f64,
    #[serde(default = "default_init_range")]
    initializer_range:            f64,
    #[serde(default)]
    pad_token_id:                 usize,
}

impl From<HfBertConfig> for BertConfig {
    fn from(c: HfBertConfig) -> Self {
        BertConfig::new(c.vocab_size)
            .with_hidden_size(c.hidden_size)
            .with_num_hidden_layers(c.num_hidden_layers)
            .with_num_attention_heads(c.num_attention_heads)
            .with_intermediate_size(c.intermediate_size)
            .with_max_position_embeddings(c.max_position_embeddings)
            .with_type_vocab_size(c.type_vocab_size)
            .with_hidden_dropout_prob(c.hidden_dropout_prob)
            .with_attention_dropout_prob(c.attention_probs_dropout_prob)
            .with_layer_norm_eps(c.layer_norm_eps)
            .with_initializer_range(c.initializer_range)
            .with_pad_token_id(c.pad_token_id)
    }
}

/// Parse `<dir>/config.json`.
pub fn read_config(dir: &Path) -> Result<BertConfig> {
    let path = dir.join(CONFIG_FILE);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Cannot read BERT config '{}'", path.display()))?;
    let hf: HfBertConfig = serde_json::from_str(&json)
        .with_context(|| format!("Invalid BERT config '{}'", path.display()))?;
    Ok(hf.into())
}

// ─── Weights ──────────────────────────────────────────────────────────────────
/// Decoded safetensors entries: name → (shape, f32 values).
pub struct WeightStore {
    tensors: HashMap<String, (Vec<usize>, Vec<f32>)>,
}

fn decode_values(dtype: Dtype, data: &[u8]) -> Result<Vec<f32>> {
    let values = match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        other => bail!("Unsupported weight dtype {:?}", other),
    };
    Ok(values)
}

impl WeightStore {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let st = SafeTensors::deserialize(bytes)
            .map_err(|e| anyhow::anyhow!("Cannot parse safetensors: {e}"))?;

        let mut tensors = HashMap::new();
        for (name, view) in st.tensors() {
            // position_ids and similar integer buffers are not weights
            if !matches!(view.dtype(), Dtype::F32 | Dtype::F16 | Dtype::BF16) {
                tracing::debug!("Skipping non-float tensor '{}'", name);
                continue;
            }
            let values = decode_values(view.dtype(), view.data())?;
            tensors.insert(name, (view.shape().to_vec(), values));
        }
        Ok(Self { tensors })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Cannot read weights '{}'", path.display()))?;
        Self::from_bytes(&bytes)
            .with_context(|| format!("Cannot decode weights '{}'", path.display()))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Look `name` up with and without the `bert.` prefix, and under the
    /// gamma / beta LayerNorm aliases.
    fn find(&self, name: &str) -> Option<&(Vec<usize>, Vec<f32>)> {
        let mut candidates = vec![name.to_string()];
        if let Some(stem) = name.strip_suffix("LayerNorm.weight") {
            candidates.push(format!("{stem}LayerNorm.gamma"));
        }
        if let Some(stem) = name.strip_suffix("LayerNorm.bias") {
            candidates.push(format!("{stem}LayerNorm.beta"));
        }
        candidates
            .iter()
            .flat_map(|c| [c.clone(), format!("bert.{c}")])
            .find_map(|c| self.tensors.get(&c))
    }

    fn get(&self, name: &str, expected: &[usize]) -> Result<Vec<f32>> {
        let (shape, values) = self
            .find(name)
            .with_context(|| format!("Pretrained weights have no tensor '{name}'"))?;
        ensure!(
            shape.as_slice() == expected,
            "Tensor '{}' has shape {:?}, expected {:?}",
            name, shape, expected
        );
        Ok(values.clone())
    }

    fn vector<B: Backend>(&self, name: &str, n: usize, device: &B::Device) -> Result<Tensor<B, 1>> {
        let values = self.get(name, &[n])?;
        Ok(Tensor::from_data(TensorData::new(values, [n]), device))
    }

    fn matrix<B: Backend>(&self, name: &str, rows: usize, cols: usize, device: &B::Device) -> Result<Tensor<B, 2>> {
        let values = self.get(name, &[rows, cols])?;
        Ok(Tensor::from_data(TensorData::new(values, [rows, cols]), device))
    }

    fn load_linear<B: Backend>(&self, linear: &mut Linear<B>, prefix: &str, device: &B::Device) -> Result<()> {
        let [d_in, d_out] = linear.weight.dims();
        // [out, in] on disk
        let weight = self.matrix::<B>(&format!("{prefix}.weight"), d_out, d_in, device)?;
        linear.weight = Param::from_tensor(weight.transpose());
        let bias = self.vector::<B>(&format!("{prefix}.bias"), d_out, device)?;
        linear.bias = Some(Param::from_tensor(bias));
        Ok(())
    }

    fn load_layer_norm<B: Backend>(&self, norm: &mut LayerNorm<B>, prefix: &str, device: &B::Device) -> Result<()> {
        let [d] = norm.gamma.dims();
        norm.gamma = Param::from_tensor(self.vector::<B>(&format!("{prefix}.weight"), d, device)?);
        norm.beta  = Param::from_tensor(self.vector::<B>(&format!("{prefix}.bias"), d, device)?);
        Ok(())
    }

    fn load_embedding<B: Backend>(&self, embedding: &mut Embedding<B>, name: &str, device: &B::Device) -> Result<()> {
        let [n, d] = embedding.weight.dims();
        embedding.weight = Param::from_tensor(self.matrix::<B>(name, n, d, device)?);
        Ok(())
    }

    /// Overwrite every parameter of `model` with the stored weights.
    pub fn apply<B: Backend>(&self, mut model: LayeredBert<B>, device: &B::Device) -> Result<LayeredBert<B>> {
        let emb = &mut model.embeddings;
        self.load_embedding(&mut emb.word, "embeddings.word_embeddings.weight", device)?;
        self.load_embedding(&mut emb.position, "embeddings.position_embeddings.weight", device)?;
        self.load_embedding(&mut emb.token_type, "embeddings.token_type_embeddings.weight", device)?;
        self.load_layer_norm(&mut emb.layer_norm, "embeddings.LayerNorm", device)?;

        for (i, layer) in model.layers.iter_mut().enumerate() {
            let p = format!("encoder.layer.{i}");
            self.load_linear(&mut layer.attention.query, &format!("{p}.attention.self.query"), device)?;
            self.load_linear(&mut layer.attention.key, &format!("{p}.attention.self.key"), device)?;
            self.load_linear(&mut layer.attention.value, &format!("{p}.attention.self.value"), device)?;
            self.load_linear(&mut layer.attention.output, &format!("{p}.attention.output.dense"), device)?;
            self.load_layer_norm(&mut layer.attention_norm, &format!("{p}.attention.output.LayerNorm"), device)?;
            self.load_linear(&mut layer.intermediate, &format!("{p}.intermediate.dense"), device)?;
            self.load_linear(&mut layer.output, &format!("{p}.output.dense"), device)?;
            self.load_layer_norm(&mut layer.output_norm, &format!("{p}.output.LayerNorm"), device)?;
        }

        self.load_linear(&mut model.pooler, "pooler.dense", device)?;
        Ok(model)
    }
}

/// Build a LayeredBert from a HuggingFace directory.
pub fn load_pretrained<B: Backend>(dir: &Path, device: &B::Device) -> Result<(BertConfig, LayeredBert<B>)> {
    let config  = read_config(dir)?;
    let weights = WeightStore::from_file(&dir.join(WEIGHTS_FILE))?;
    tracing::info!(
        "Loading pretrained BERT from '{}': {} layers, hidden {}, {} tensors",
        dir.display(),
        config.num_hidden_layers,
        config.hidden_size,
        weights.len(),
    );
    let model = weights.apply(config.init::<B>(device), device)?;
    Ok((config, model))
}
