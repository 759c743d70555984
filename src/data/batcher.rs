// ============================================================
// Layer 4 — Batchers
// ============================================================
// Implements Burn's Batcher trait: Vec<item> → tensors.
//
// Items arrive unpadded; each batch is padded to its own longest
// sequence:
//
//   input_ids       [batch, seq]   pad id after the end
//   token_type_ids  [batch, seq]   0 after the end
//   mask_pad        [batch, seq]   true on padding positions
//
// The gold labels / positions are kept twice: as Int tensors for
// the loss and as plain Vecs for the exit decisions and metrics,
// which run on the CPU side.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::features::{ClassificationItem, QaFeature};

// ─── EncoderInput ─────────────────────────────────────────────────────────────
/// The three encoder inputs shared by every task.
#[derive(Debug, Clone)]
pub struct EncoderInput<B: Backend> {
    pub input_ids:      Tensor<B, 2, Int>,
    pub token_type_ids: Tensor<B, 2, Int>,
    pub mask_pad:       Tensor<B, 2, Bool>,
}

impl<B: Backend> EncoderInput<B> {
    /// Pad `sequences` to a common length and build the tensors.
    pub fn from_sequences(
        ids:    &[&[u32]],
        types:  &[&[u32]],
        pad_id: u32,
        device: &B::Device,
    ) -> Self {
        let batch_size = ids.len();
        let seq_len    = ids.iter().map(|s| s.len()).max().unwrap_or(0).max(1);

        let mut ids_flat   = Vec::with_capacity(batch_size * seq_len);
        let mut types_flat = Vec::with_capacity(batch_size * seq_len);
        let mut pad_flat   = Vec::with_capacity(batch_size * seq_len);

        for (seq, ty) in ids.iter().zip(types) {
            for p in 0..seq_len {
                ids_flat.push(seq.get(p).copied().unwrap_or(pad_id) as i32);
                types_flat.push(ty.get(p).copied().unwrap_or(0) as i32);
                pad_flat.push(i32::from(p >= seq.len()));
            }
        }

        let input_ids = Tensor::<B, 1, Int>::from_ints(ids_flat.as_slice(), device)
            .reshape([batch_size, seq_len]);
        let token_type_ids = Tensor::<B, 1, Int>::from_ints(types_flat.as_slice(), device)
            .reshape([batch_size, seq_len]);
        let mask_pad = Tensor::<B, 1, Int>::from_ints(pad_flat.as_slice(), device)
            .reshape([batch_size, seq_len])
            .equal_elem(1);

        Self { input_ids, token_type_ids, mask_pad }
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims()[1]
    }

    pub fn device(&self) -> B::Device {
        self.input_ids.device()
    }
}

fn index_tensor<B: Backend>(values: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let ints: Vec<i32> = values.iter().map(|&v| v as i32).collect();
    Tensor::<B, 1, Int>::from_ints(ints.as_slice(), device)
}

// ─── Classification ───────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    pub input:  EncoderInput<B>,
    /// [batch] gold label indices, present when every item is labelled
    pub labels: Option<Tensor<B, 1, Int>>,
    pub gold:   Option<Vec<usize>>,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatcher<B: Backend> {
    pub device: B::Device,
    pub pad_id: u32,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device, pad_id: u32) -> Self {
        Self { device, pad_id }
    }
}

impl<B: Backend> Batcher<ClassificationItem, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<ClassificationItem>) -> ClassificationBatch<B> {
        let ids: Vec<&[u32]>   = items.iter().map(|i| i.input_ids.as_slice()).collect();
        let types: Vec<&[u32]> = items.iter().map(|i| i.token_type_ids.as_slice()).collect();
        let input = EncoderInput::from_sequences(&ids, &types, self.pad_id, &self.device);

        let gold: Option<Vec<usize>> = items.iter().map(|i| i.label).collect();
        let labels = gold.as_ref().map(|g| index_tensor::<B>(g, &self.device));

        ClassificationBatch { input, labels, gold }
    }
}

// ─── Question answering ───────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct QaBatch<B: Backend> {
    pub input:           EncoderInput<B>,
    pub start_positions: Tensor<B, 1, Int>,
    pub end_positions:   Tensor<B, 1, Int>,
    pub gold_starts:     Vec<usize>,
    pub gold_ends:       Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct QaBatcher<B: Backend> {
    pub device: B::Device,
    pub pad_id: u32,
}

impl<B: Backend> QaBatcher<B> {
    pub fn new(device: B::Device, pad_id: u32) -> Self {
        Self { device, pad_id }
    }
}

impl<B: Backend> Batcher<QaFeature, QaBatch<B>> for QaBatcher<B> {
    fn batch(&self, items: Vec<QaFeature>) -> QaBatch<B> {
        let ids: Vec<&[u32]>   = items.iter().map(|f| f.input_ids.as_slice()).collect();
        let types: Vec<&[u32]> = items.iter().map(|f| f.token_type_ids.as_slice()).collect();
        let input = EncoderInput::from_sequences(&ids, &types, self.pad_id, &self.device);

        let gold_starts: Vec<usize> = items.iter().map(|f| f.start_position).collect();
        let gold_ends: Vec<usize>   = items.iter().map(|f| f.end_position).collect();

        QaBatch {
            input,
            start_positions: index_tensor::<B>(&gold_starts, &self.device),
            end_positions:   index_tensor::<B>(&gold_ends, &self.device),
            gold_starts,
            gold_ends,
        }
    }
}
