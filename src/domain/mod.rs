// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs and traits that define the core concepts
// of the system.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO ML-specific tensor code
//   - File I/O only for the small label vocabulary file
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Text instances and QA examples produced by the readers
pub mod instance;

// Label namespace: label string <-> class index
pub mod vocabulary;

// Exit layers, temperatures, thresholds and exit decisions
pub mod exit;

// Core abstractions (traits) that other layers implement
pub mod traits;
