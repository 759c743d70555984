// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Files on disk that the other layers share:
//
//   checkpoint.rs      — model weights (CompactRecorder), epoch
//                        pointers, configs, exit-head export
//   tokenizer_store.rs — tokenizer.json: pretrained, saved, or
//                        built from the training corpus
//   pretrained.rs      — HuggingFace BERT config + safetensors
//                        into a LayeredBert
//   metrics_log.rs     — per-epoch CSV
//
// Reference: Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer loading, building, and saving
pub mod tokenizer_store;

/// HuggingFace BERT weight import
pub mod pretrained;

/// Training metrics CSV logger
pub mod metrics_log;
