// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Read the training data        (Layer 4 - data)
//   Step 2: Build / load the tokenizer    (Layer 6 - infra)
//   Step 3: Encoder: pretrained or fresh  (Layer 6 / 5)
//   Step 4: Build the label vocabulary    (Layer 3 - domain)
//   Step 5: Featurize, file or split      (Layer 4 - data)
//   Step 6: Heads, freezing, saved heads  (Layer 5 - ml)
//   Step 7: Save configs for inference    (Layer 6 - infra)
//   Step 8: Run training loop             (Layer 5 - ml)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::data::{
    batcher::{ClassificationBatcher, QaBatcher},
    dataset::{ClassificationDataset, QaDataset},
    features::{QaFeaturizer, SpecialIds, TextFeaturizer},
    readers::{reader_for, ReaderKind, SquadReader},
    splitter::split_train_val,
};
use crate::domain::{
    exit::{ExitPolicy, ExitSettings},
    instance::{QaExample, TextInstance},
    traits::QaReader,
    vocabulary::LabelVocabulary,
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics_log::MetricsLogger,
    pretrained::load_pretrained,
    tokenizer_store::{id_space, TokenizerStore},
};
use crate::ml::{
    classifier::MultiLayerClassifierConfig,
    encoder::{BertConfig, LayeredBert},
    qa::MultilossQaConfig,
    trainer::{fit, FitReport, TrainBackend, TrainerOptions},
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a training run was started with. Written to
// train_config.json and read back by evaluate / predict / calibrate,
// so missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub reader:                    ReaderKind,
    pub train_path:                String,
    pub validation_path:           Option<String>,
    pub checkpoint_dir:            String,
    /// HuggingFace BERT directory (config.json + model.safetensors)
    pub pretrained_dir:            Option<String>,

    // exits
    pub layer_indices:             String,
    pub scaling_temperatures:      String,
    pub threshold:                 Option<f64>,
    pub multitask:                 bool,
    pub add_previous_layer_logits: bool,
    pub trainable:                 bool,
    pub num_labels:                Option<usize>,
    /// Exit heads to start from (one bundle or one file per head, comma-separated)
    pub linear_layers:             Option<String>,
    /// Where to write the trained exit heads (same forms as linear_layers)
    pub export_heads:              Option<String>,

    // sequences
    pub max_seq_len:               usize,
    pub max_query_len:             usize,
    pub doc_stride:                usize,
    pub max_answer_len:            usize,

    // optimisation
    pub batch_size:                usize,
    pub epochs:                    usize,
    pub lr:                        f64,
    pub seed:                      u64,
    pub train_fraction:            f64,
    pub dropout:                   f64,
    pub head_init_std:             f64,

    // encoder built from scratch (ignored with pretrained_dir)
    pub hidden_size:               usize,
    pub num_layers:                usize,
    pub num_heads:                 usize,
    pub intermediate_size:         usize,
    pub vocab_size:                usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            reader:                    ReaderKind::Classification,
            train_path:                "data/train.jsonl".to_string(),
            validation_path:           None,
            checkpoint_dir:            "checkpoints".to_string(),
            pretrained_dir:            None,
            layer_indices:             "-1".to_string(),
            scaling_temperatures:      "1".to_string(),
            threshold:                 None,
            multitask:                 false,
            add_previous_layer_logits: true,
            trainable:                 true,
            num_labels:                None,
            linear_layers:             None,
            export_heads:              None,
            max_seq_len:               128,
            max_query_len:             64,
            doc_stride:                128,
            max_answer_len:            30,
            batch_size:                16,
            epochs:                    3,
            lr:                        2e-5,
            seed:                      42,
            train_fraction:            0.9,
            dropout:                   0.1,
            head_init_std:             0.02,
            hidden_size:               256,
            num_layers:                6,
            num_heads:                 8,
            intermediate_size:         1024,
            vocab_size:                30522,
        }
    }
}

impl TrainConfig {
    /// Exit settings against an encoder of `depth` layers.
    ///
    /// Oracle readers switch the exit policy to the gold-label oracle.
    pub fn exit_settings(&self, depth: usize) -> Result<ExitSettings> {
        let mut settings = ExitSettings::from_options(
            &self.layer_indices,
            &self.scaling_temperatures,
            self.threshold,
            self.multitask,
            depth,
        )?;
        if self.reader.is_oracle() {
            settings.policy = ExitPolicy::Oracle;
        }
        Ok(settings)
    }

    /// Encoder architecture when no pretrained directory is given.
    pub fn scratch_bert_config(&self, vocab_size: usize) -> BertConfig {
        BertConfig::new(vocab_size)
            .with_hidden_size(self.hidden_size)
            .with_num_hidden_layers(self.num_layers)
            .with_num_attention_heads(self.num_heads)
            .with_intermediate_size(self.intermediate_size)
            .with_max_position_embeddings(self.max_seq_len)
            .with_hidden_dropout_prob(self.dropout)
            .with_attention_dropout_prob(self.dropout)
    }

    pub fn classifier_config(&self, bert: BertConfig, num_labels: usize, num_exits: usize) -> MultiLayerClassifierConfig {
        MultiLayerClassifierConfig::new(bert, num_labels, num_exits)
            .with_add_previous_layer_logits(self.add_previous_layer_logits)
            .with_dropout(self.dropout)
            .with_head_init_std(self.head_init_std)
    }

    pub fn qa_config(&self, bert: BertConfig, num_exits: usize) -> MultilossQaConfig {
        MultilossQaConfig::new(bert, num_exits)
            .with_add_previous_layer_logits(self.add_previous_layer_logits)
            .with_dropout(self.dropout)
            .with_head_init_std(self.head_init_std)
    }

    fn trainer_options(&self) -> TrainerOptions {
        TrainerOptions { epochs: self.epochs, lr: self.lr, seed: self.seed }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

/// Training data of either task, read from disk.
enum Corpus {
    Text { train: Vec<TextInstance>, validation: Option<Vec<TextInstance>> },
    Qa   { train: Vec<QaExample>,    validation: Option<Vec<QaExample>> },
}

impl Corpus {
    /// Every string the tokenizer may be built from.
    fn texts(&self) -> Vec<String> {
        match self {
            Corpus::Text { train, .. } => train
                .iter()
                .flat_map(|i| std::iter::once(i.text_a.clone()).chain(i.text_b.clone()))
                .collect(),
            Corpus::Qa { train, .. } => train
                .iter()
                .flat_map(|e| [e.question.clone(), e.context.clone()])
                .collect(),
        }
    }
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline on the GPU backend
    pub fn execute(&self) -> Result<FitReport> {
        self.run::<TrainBackend>(burn::backend::wgpu::WgpuDevice::default())
    }

    /// Execute the pipeline on any autodiff backend.
    pub fn run<B: AutodiffBackend>(&self, device: B::Device) -> Result<FitReport> {
        let cfg = &self.config;

        // ── Step 1: Read the training data ────────────────────────────────────
        let corpus = self.read_corpus()?;

        // ── Step 2: Tokenizer ─────────────────────────────────────────────────
        let ckpt       = CheckpointManager::new(&cfg.checkpoint_dir)?;
        let pretrained = cfg.pretrained_dir.as_deref().map(Path::new);
        let tokenizer  = TokenizerStore::new(ckpt.dir())
            .load_or_build(pretrained, &corpus.texts(), cfg.vocab_size)?;

        // ── Step 3: Encoder (its depth resolves the exit layers) ──────────────
        let (bert, encoder) = self.encoder::<B>(pretrained, &tokenizer, &device)?;
        anyhow::ensure!(
            cfg.max_seq_len <= bert.max_position_embeddings,
            "max_seq_len {} exceeds the {} positions of the encoder",
            cfg.max_seq_len,
            bert.max_position_embeddings
        );
        let settings = cfg.exit_settings(bert.num_hidden_layers)?;
        tracing::info!(
            "Exits at layers {:?} of {} (multitask={}, trainable={})",
            settings.layer_indices, bert.num_hidden_layers, settings.multitask, cfg.trainable
        );
        ckpt.save_bert_config(&bert)?;

        let logger = MetricsLogger::new(ckpt.dir())?;
        let pad_id = SpecialIds::from_tokenizer(&tokenizer).pad;
        let opts   = cfg.trainer_options();
        let k      = settings.num_exits();

        match corpus {
            Corpus::Text { train, validation } => {
                // ── Step 4: Label vocabulary ──────────────────────────────────
                let mut all = train.clone();
                all.extend(validation.iter().flatten().cloned());
                let vocab      = LabelVocabulary::from_instances(&all);
                let num_labels = vocab.num_labels(cfg.num_labels)?;
                vocab.save(ckpt.dir())?;
                tracing::info!("{} labels: {:?}", num_labels, vocab.labels());

                // ── Step 5: Featurize and split ───────────────────────────────
                let featurizer = TextFeaturizer::new(&tokenizer, cfg.max_seq_len);
                let items      = featurizer.featurize_all(&train, &vocab)?;
                let (train_items, val_items) = match &validation {
                    Some(v) => (items, featurizer.featurize_all(v, &vocab)?),
                    None    => split_train_val(items, cfg.train_fraction, cfg.seed),
                };
                tracing::info!("Split: {} train, {} validation", train_items.len(), val_items.len());

                // ── Step 6: Model ─────────────────────────────────────────────
                let mut model = cfg.classifier_config(bert, num_labels, k).init_with(encoder, &device);
                if !cfg.trainable {
                    model = model.freeze_encoder();
                }
                if let Some(list) = &cfg.linear_layers {
                    let paths = head_paths(list);
                    if let [bundle] = paths.as_slice() {
                        let heads = ckpt.import_heads(model.exit_heads.clone(), bundle, &device)?;
                        model = model.with_heads(heads);
                    } else {
                        model.exit_heads.heads = ckpt.import_head_files(model.exit_heads.heads.clone(), &paths, &device)?;
                    }
                }

                // ── Step 7: Save config for inference ─────────────────────────
                ckpt.save_config(&TrainConfig { num_labels: Some(num_labels), ..cfg.clone() })?;

                // ── Step 8: Train ─────────────────────────────────────────────
                let train_loader = DataLoaderBuilder::new(ClassificationBatcher::<B>::new(device.clone(), pad_id))
                    .batch_size(cfg.batch_size)
                    .shuffle(cfg.seed)
                    .num_workers(1)
                    .build(ClassificationDataset::new(train_items));
                let val_loader = DataLoaderBuilder::new(ClassificationBatcher::<B::InnerBackend>::new(device.clone(), pad_id))
                    .batch_size(cfg.batch_size)
                    .num_workers(1)
                    .build(ClassificationDataset::new(val_items));

                let (model, report) = fit::<B, _, _, _>(model, train_loader, val_loader, &settings, &opts, &ckpt, &logger)?;
                if let Some(list) = &cfg.export_heads {
                    match head_paths(list).as_slice() {
                        [bundle] => ckpt.export_heads(&model.exit_heads, bundle)?,
                        paths    => ckpt.export_head_files(&model.exit_heads.heads, paths)?,
                    }
                }
                Ok(report)
            }

            Corpus::Qa { train, validation } => {
                // ── Step 5: Featurize and split ───────────────────────────────
                let featurizer = QaFeaturizer::new(&tokenizer, cfg.max_seq_len, cfg.max_query_len, cfg.doc_stride);
                let (train_features, val_features) = match &validation {
                    Some(v) => (featurizer.featurize_all(&train)?, featurizer.featurize_all(v)?),
                    None => {
                        // Split by example so windows of one question stay together
                        let (t, v) = split_train_val(train, cfg.train_fraction, cfg.seed);
                        (featurizer.featurize_all(&t)?, featurizer.featurize_all(&v)?)
                    }
                };
                tracing::info!("Split: {} train windows, {} validation windows", train_features.len(), val_features.len());

                // ── Step 6: Model ─────────────────────────────────────────────
                let mut model = cfg.qa_config(bert, k).init_with(encoder, &device);
                if !cfg.trainable {
                    model = model.freeze_encoder();
                }
                if let Some(list) = &cfg.linear_layers {
                    let paths = head_paths(list);
                    if let [bundle] = paths.as_slice() {
                        let heads = ckpt.import_heads(model.span_heads.clone(), bundle, &device)?;
                        model = model.with_heads(heads);
                    } else {
                        model.span_heads.heads = ckpt.import_head_files(model.span_heads.heads.clone(), &paths, &device)?;
                    }
                }

                // ── Step 7: Save config for inference ─────────────────────────
                ckpt.save_config(cfg)?;

                // ── Step 8: Train ─────────────────────────────────────────────
                let train_loader = DataLoaderBuilder::new(QaBatcher::<B>::new(device.clone(), pad_id))
                    .batch_size(cfg.batch_size)
                    .shuffle(cfg.seed)
                    .num_workers(1)
                    .build(QaDataset::new(train_features));
                let val_loader = DataLoaderBuilder::new(QaBatcher::<B::InnerBackend>::new(device.clone(), pad_id))
                    .batch_size(cfg.batch_size)
                    .num_workers(1)
                    .build(QaDataset::new(val_features));

                let (model, report) = fit::<B, _, _, _>(model, train_loader, val_loader, &settings, &opts, &ckpt, &logger)?;
                if let Some(list) = &cfg.export_heads {
                    match head_paths(list).as_slice() {
                        [bundle] => ckpt.export_heads(&model.span_heads, bundle)?,
                        paths    => ckpt.export_head_files(&model.span_heads.heads, paths)?,
                    }
                }
                Ok(report)
            }
        }
    }

    fn read_corpus(&self) -> Result<Corpus> {
        let cfg   = &self.config;
        let train = PathBuf::from(&cfg.train_path);
        tracing::info!("Reading {:?} data from '{}'", cfg.reader, train.display());

        match reader_for(cfg.reader) {
            Some(reader) => {
                let read = |path: &Path| reader.read(path).map(|v| labelled_only(v, path));
                let validation = cfg
                    .validation_path
                    .as_ref()
                    .map(|p| read(Path::new(p)))
                    .transpose()?;
                Ok(Corpus::Text { train: read(train.as_path())?, validation })
            }
            None => {
                let reader = SquadReader::new();
                let validation = cfg
                    .validation_path
                    .as_ref()
                    .map(|p| reader.read_examples(Path::new(p)))
                    .transpose()?;
                Ok(Corpus::Qa { train: reader.read_examples(&train)?, validation })
            }
        }
    }

    fn encoder<B: AutodiffBackend>(
        &self,
        pretrained: Option<&Path>,
        tokenizer:  &Tokenizer,
        device:     &B::Device,
    ) -> Result<(BertConfig, LayeredBert<B>)> {
        match pretrained {
            Some(dir) => load_pretrained::<B>(dir, device)
                .with_context(|| format!("Cannot initialise from '{}'", dir.display())),
            None => {
                let bert = self.config.scratch_bert_config(id_space(tokenizer));
                tracing::info!(
                    "Building encoder from scratch: {} layers, hidden {}, vocab {}",
                    bert.num_hidden_layers, bert.hidden_size, bert.vocab_size
                );
                let encoder = bert.init::<B>(device);
                Ok((bert, encoder))
            }
        }
    }
}

/// `linear_layers` / `export_heads`: one bundle of every head, or a
/// comma-separated list with one file per exit head.
fn head_paths(list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Drop instances without a gold label; one of them would strip the
/// labels of its whole batch.
fn labelled_only(instances: Vec<TextInstance>, path: &Path) -> Vec<TextInstance> {
    let total = instances.len();
    let kept: Vec<TextInstance> = instances.into_iter().filter(|i| i.label.is_some()).collect();
    if kept.len() < total {
        tracing::warn!("Skipping {} unlabelled instances of '{}'", total - kept.len(), path.display());
    }
    kept
}
