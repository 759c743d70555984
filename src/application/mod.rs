// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one command: train, evaluate, predict or calibrate.
//
// Rules for this layer:
//   - No tensor math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination
//
// Every use case has an `execute()` on the GPU backend and a
// generic `run::<B>()` used by the CPU tests.
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// TrainConfig and the training workflow
pub mod train_use_case;

/// Accuracy / EM-F1 and exit statistics on a labelled file
pub mod evaluate_use_case;

/// JSON-lines predictions with the exit layer used
pub mod predict_use_case;

/// Per-exit temperature fitting
pub mod calibrate_use_case;
