// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Rebuilds a trained model from its checkpoint directory and
// runs early-exit inference over whole datasets.
//
//   train_config.json  → task, exit settings, sequence sizes
//   bert_config.json   → encoder architecture
//   labels.json        → label strings (classification only)
//   tokenizer.json     → the tokenizer used in training
//   model_epoch_N      → weights (best epoch unless told otherwise)
//
// Features are batched in input order (no shuffling) so that
// every output row can be traced back to its instance or, for
// QA, to its window and example.

use anyhow::Result;
use burn::{
    data::dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
    prelude::*,
};
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{ClassificationBatch, ClassificationBatcher, QaBatch, QaBatcher},
    dataset::{ClassificationDataset, QaDataset},
    features::{ClassificationItem, QaFeature, QaFeaturizer, SpecialIds, TextFeaturizer},
};
use crate::domain::{
    exit::{ExitPolicy, ExitSettings},
    instance::{QaExample, TextInstance},
    vocabulary::LabelVocabulary,
};
use crate::infra::{checkpoint::CheckpointManager, tokenizer_store::TokenizerStore};
use crate::ml::{
    calibration::{collect_classification, collect_qa, LabelledRow},
    classifier::{decode, LabelPrediction, MultiLayerClassifier},
    qa::{best_answers, decode_window, AnswerPrediction, MultilossQa},
};

/// The trained model of either task.
pub enum TaskModel<B: Backend> {
    Classifier(MultiLayerClassifier<B>),
    Qa(MultilossQa<B>),
}

/// Early-exit classification of a list of instances.
#[derive(Debug, Clone)]
pub struct ClassificationRun {
    pub predictions:    Vec<LabelPrediction>,
    pub exit_positions: Vec<usize>,
    /// Gold label index of each instance, when it had one
    pub gold:           Vec<Option<usize>>,
}

/// Early-exit answers; exit positions are counted per window.
#[derive(Debug, Clone)]
pub struct QaRun {
    pub answers:        Vec<AnswerPrediction>,
    pub exit_positions: Vec<usize>,
}

pub struct Inferencer<B: Backend> {
    pub config:    TrainConfig,
    pub settings:  ExitSettings,
    pub tokenizer: Tokenizer,
    pub labels:    LabelVocabulary,
    model:         TaskModel<B>,
    /// Encoder layers, bounds any override of the settings
    depth:         usize,
    device:        B::Device,
}

impl<B: Backend> Inferencer<B> {
    pub fn from_checkpoint(
        ckpt:   &CheckpointManager,
        epoch:  Option<usize>,
        device: B::Device,
    ) -> Result<Self> {
        let config    = ckpt.load_config()?;
        let bert      = ckpt.load_bert_config()?;
        let depth     = bert.num_hidden_layers;
        let settings  = config.exit_settings(depth)?;
        let tokenizer = TokenizerStore::new(ckpt.dir()).load()?;
        let k         = settings.num_exits();

        let (model, labels) = if config.reader.is_qa() {
            let model = config.qa_config(bert, k).init::<B>(&device);
            (TaskModel::Qa(ckpt.load_model(model, epoch, &device)?), LabelVocabulary::new())
        } else {
            let labels     = LabelVocabulary::load(ckpt.dir())?;
            let num_labels = labels.num_labels(config.num_labels)?;
            let model      = config.classifier_config(bert, num_labels, k).init::<B>(&device);
            (TaskModel::Classifier(ckpt.load_model(model, epoch, &device)?), labels)
        };

        tracing::info!(
            "Model loaded from '{}' (exits at layers {:?}, threshold {:?})",
            ckpt.dir().display(),
            settings.layer_indices,
            settings.threshold
        );
        Ok(Self { config, settings, tokenizer, labels, model, depth, device })
    }

    /// Override the confidence threshold stored with the checkpoint.
    pub fn with_threshold(mut self, threshold: Option<f64>) -> Result<Self> {
        self.settings.threshold = threshold;
        self.settings.validate(self.depth)?;
        Ok(self)
    }

    /// Run every exit for every instance.
    pub fn without_early_exit(mut self) -> Self {
        self.settings.policy = ExitPolicy::Never;
        self
    }

    pub fn model(&self) -> &TaskModel<B> {
        &self.model
    }

    fn pad_id(&self) -> u32 {
        SpecialIds::from_tokenizer(&self.tokenizer).pad
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    fn classifier(&self) -> Result<&MultiLayerClassifier<B>> {
        match &self.model {
            TaskModel::Classifier(m) => Ok(m),
            TaskModel::Qa(_)         => anyhow::bail!("This checkpoint holds a question answering model"),
        }
    }

    fn qa(&self) -> Result<&MultilossQa<B>> {
        match &self.model {
            TaskModel::Qa(m)         => Ok(m),
            TaskModel::Classifier(_) => anyhow::bail!("This checkpoint holds a classification model"),
        }
    }

    /// Exit settings for a list of instances: instances read by an oracle
    /// reader turn on the oracle policy, any other input uses confidence.
    fn settings_for(&self, instances: &[TextInstance]) -> ExitSettings {
        let mut settings = self.settings.clone();
        if settings.policy != ExitPolicy::Never {
            let oracle = !instances.is_empty() && instances.iter().all(|i| i.oracle);
            settings.policy = if oracle { ExitPolicy::Oracle } else { ExitPolicy::Confidence };
        }
        settings
    }

    fn text_items(&self, instances: &[TextInstance]) -> Result<Vec<ClassificationItem>> {
        TextFeaturizer::new(&self.tokenizer, self.config.max_seq_len).featurize_all(instances, &self.labels)
    }

    fn qa_features(&self, examples: &[QaExample]) -> Result<Vec<QaFeature>> {
        QaFeaturizer::new(
            &self.tokenizer,
            self.config.max_seq_len,
            self.config.max_query_len,
            self.config.doc_stride,
        )
        .featurize_all(examples)
    }

    // ─── Classification ──────────────────────────────────────────────────────
    pub fn classify(&self, instances: &[TextInstance]) -> Result<ClassificationRun> {
        let model    = self.classifier()?;
        let items    = self.text_items(instances)?;
        let settings = self.settings_for(instances);
        let batcher  = ClassificationBatcher::<B>::new(self.device.clone(), self.pad_id());

        let mut run = ClassificationRun {
            predictions:    Vec::with_capacity(items.len()),
            exit_positions: Vec::with_capacity(items.len()),
            gold:           items.iter().map(|i| i.label).collect(),
        };

        for chunk in items.chunks(self.batch_size()) {
            let batch  = batcher.batch(chunk.to_vec());
            let output = model.forward_infer(&batch, &settings);
            run.predictions.extend(decode(&output, &self.labels));
            run.exit_positions.extend(output.exit_positions);
        }
        Ok(run)
    }

    // ─── Question answering ──────────────────────────────────────────────────
    pub fn answer(&self, examples: &[QaExample]) -> Result<QaRun> {
        let model    = self.qa()?;
        let features = self.qa_features(examples)?;
        let batcher  = QaBatcher::<B>::new(self.device.clone(), self.pad_id());

        let mut windows        = Vec::with_capacity(features.len());
        let mut exit_positions = Vec::with_capacity(features.len());

        for chunk in features.chunks(self.batch_size()) {
            let batch  = batcher.batch(chunk.to_vec());
            let output = model.forward_infer(&batch, &self.settings);

            for (row, feature) in chunk.iter().enumerate() {
                windows.push(decode_window(
                    &output.start_probs[row],
                    &output.end_probs[row],
                    feature,
                    output.selected_layer[row],
                    self.config.max_answer_len,
                ));
            }
            exit_positions.extend(output.exit_positions);
        }

        Ok(QaRun { answers: best_answers(examples, &windows), exit_positions })
    }

    // ─── Calibration data ────────────────────────────────────────────────────
    /// Raw logits of every exit with their gold indices.
    pub fn labelled_rows_text(&self, instances: &[TextInstance]) -> Result<Vec<Vec<LabelledRow>>> {
        let model = self.classifier()?;
        let items = self.text_items(instances)?;
        let loader: Arc<dyn DataLoader<ClassificationBatch<B>>> =
            DataLoaderBuilder::new(ClassificationBatcher::<B>::new(self.device.clone(), self.pad_id()))
                .batch_size(self.batch_size())
                .build(ClassificationDataset::new(items));
        Ok(collect_classification(model, &loader, &self.settings))
    }

    pub fn labelled_rows_qa(&self, examples: &[QaExample]) -> Result<Vec<Vec<LabelledRow>>> {
        let model    = self.qa()?;
        let features = self.qa_features(examples)?;
        let loader: Arc<dyn DataLoader<QaBatch<B>>> =
            DataLoaderBuilder::new(QaBatcher::<B>::new(self.device.clone(), self.pad_id()))
                .batch_size(self.batch_size())
                .build(QaDataset::new(features));
        Ok(collect_qa(model, &loader, &self.settings))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::readers::ReaderKind;
    use crate::domain::{exit::argmax, instance::QaAnswer};
    use crate::infra::tokenizer_store::build_word_level;
    use crate::ml::{classifier::MultiLayerClassifierConfig, encoder::tiny_config, qa::MultilossQaConfig};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn write_checkpoint(dir: &std::path::Path, reader: ReaderKind, texts: &[String]) -> CheckpointManager {
        let ckpt   = CheckpointManager::new(dir).unwrap();
        let device = Default::default();
        let config = TrainConfig {
            reader,
            checkpoint_dir: dir.display().to_string(),
            layer_indices:  "0,2".into(),
            threshold:      Some(0.0),
            max_seq_len:    16,
            max_query_len:  4,
            doc_stride:     4,
            batch_size:     2,
            ..TrainConfig::default()
        };
        ckpt.save_config(&config).unwrap();
        ckpt.save_bert_config(&tiny_config()).unwrap();
        TokenizerStore::new(dir).save(&build_word_level(texts, 100).unwrap()).unwrap();

        if reader.is_qa() {
            let model = MultilossQaConfig::new(tiny_config(), 2).init::<TestBackend>(&device);
            ckpt.save_model(&model, 1).unwrap();
        } else {
            LabelVocabulary::from_labels(["neg", "pos"]).save(dir).unwrap();
            let model = MultiLayerClassifierConfig::new(tiny_config(), 2, 2).init::<TestBackend>(&device);
            ckpt.save_model(&model, 1).unwrap();
        }
        ckpt
    }

    #[test]
    fn test_classify_from_checkpoint() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = write_checkpoint(dir.path(), ReaderKind::Classification, &["good bad movie".to_string()]);
        let inf  = Inferencer::<TestBackend>::from_checkpoint(&ckpt, None, Default::default()).unwrap();

        let instances = vec![
            TextInstance::single("good movie", Some("pos".into())),
            TextInstance::single("bad movie", None),
            TextInstance::single("good", Some("neg".into())),
        ];
        let run = inf.classify(&instances).unwrap();
        assert_eq!(run.predictions.len(), 3);
        assert_eq!(run.gold, vec![Some(1), None, Some(0)]);
        // threshold 0 stops everything at the first exit
        assert_eq!(run.exit_positions, vec![0, 0, 0]);
        assert!(run.predictions.iter().all(|p| p.selected_layer == 0));
        assert!(inf.answer(&[]).is_err());
    }

    #[test]
    fn test_without_early_exit_uses_last_layer() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = write_checkpoint(dir.path(), ReaderKind::Classification, &["good bad".to_string()]);
        let inf  = Inferencer::<TestBackend>::from_checkpoint(&ckpt, Some(1), Default::default())
            .unwrap()
            .without_early_exit();
        let run = inf.classify(&[TextInstance::single("good", None)]).unwrap();
        assert_eq!(run.predictions[0].selected_layer, 2);
    }

    #[test]
    fn test_answer_returns_one_prediction_per_example() {
        let context = "the cat sat on the mat all day long".to_string();
        let dir     = tempfile::tempdir().unwrap();
        let ckpt    = write_checkpoint(dir.path(), ReaderKind::Squad, &[context.clone(), "where".to_string()]);
        let inf     = Inferencer::<TestBackend>::from_checkpoint(&ckpt, None, Default::default()).unwrap();

        let examples = vec![QaExample {
            id:       "q1".into(),
            question: "where".into(),
            context,
            answers:  vec![QaAnswer { text: "mat".into(), char_start: 19 }],
        }];
        let run = inf.answer(&examples).unwrap();
        assert_eq!(run.answers.len(), 1);
        assert_eq!(run.answers[0].id, "q1");
        assert!(!run.exit_positions.is_empty());

        let rows = inf.labelled_rows_qa(&examples).unwrap();
        assert_eq!(rows.len(), 2);
        // start and end rows for every window
        assert_eq!(rows[0].len(), 2 * run.exit_positions.len());
    }

    #[test]
    fn test_oracle_instances_follow_gold_labels() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = write_checkpoint(dir.path(), ReaderKind::Classification, &["good bad movie".to_string()]);
        let inf  = Inferencer::<TestBackend>::from_checkpoint(&ckpt, None, Default::default()).unwrap();

        let mut instances = vec![
            TextInstance::single("good movie", Some("pos".into())),
            TextInstance::single("bad movie", Some("neg".into())),
        ];
        for i in &mut instances {
            i.oracle = true;
        }
        let rows = inf.labelled_rows_text(&instances).unwrap();
        let expected: Vec<usize> = (0..instances.len())
            .map(|i| (0..rows.len()).find(|&p| argmax(&rows[p][i].0) == rows[p][i].1).unwrap_or(rows.len() - 1))
            .collect();

        // the stored threshold of 0 is ignored once the oracle decides
        let run = inf.classify(&instances).unwrap();
        assert_eq!(run.exit_positions, expected);
    }

    #[test]
    fn test_no_early_exit_wins_over_oracle_flag() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = write_checkpoint(dir.path(), ReaderKind::ClassificationOracle, &["good bad".to_string()]);
        let inf  = Inferencer::<TestBackend>::from_checkpoint(&ckpt, None, Default::default())
            .unwrap()
            .without_early_exit();
        let mut instance = TextInstance::single("good", Some("pos".into()));
        instance.oracle = true;
        assert_eq!(inf.classify(&[instance]).unwrap().exit_positions, vec![1]);
    }

    #[test]
    fn test_threshold_override_is_validated() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = write_checkpoint(dir.path(), ReaderKind::Classification, &["good".to_string()]);
        let open = || Inferencer::<TestBackend>::from_checkpoint(&ckpt, None, Default::default()).unwrap();
        assert!(open().with_threshold(Some(1.5)).is_err());
        assert!(open().with_threshold(Some(-1.0)).is_err());
        assert_eq!(open().with_threshold(Some(0.7)).unwrap().settings.threshold, Some(0.7));
    }
}
