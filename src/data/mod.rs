// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between a dataset file on disk and a padded
// tensor batch:
//
//   JSONL / TSV / SQuAD file
//       │
//       ▼
//   readers           → TextInstance / QaExample
//       │
//       ▼
//   Preprocessor      → whitespace cleanup
//       │
//       ▼
//   features          → token ids, segment ids, label index
//       │                (QA: Chunker windows over the context)
//       ▼
//   FeatureDataset    → Burn's Dataset trait
//       │
//       ▼
//   *Batcher          → dynamic padding into tensors
//       │
//       ▼
//   DataLoader        → feeds the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Dataset readers (classification, NLI, oracle variants, SQuAD)
pub mod readers;

/// Cleans and normalises raw text
pub mod preprocessor;

/// Sliding windows over long contexts
pub mod chunker;

/// Token-level features for both tasks
pub mod features;

/// Implements Burn's Dataset trait over features
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded train/validation split
pub mod splitter;
