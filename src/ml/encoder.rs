// ============================================================
// Layer 5 — Layered BERT Encoder
// ============================================================
// A BERT encoder that can be run one SEGMENT at a time:
//
//   embeddings ─► layers[0..=l0] ─► exit 0
//                      └─► layers[l0+1..=l1] ─► exit 1
//                                 └─► ...
//
// forward_segment(start, end, previous) continues from the
// hidden state of the previous segment, so running every exit
// in turn costs exactly one pass up to the last exit reached.
//
// Each layer is post-norm, as in the original BERT:
//   x = LN(x + Dropout(SelfAttention(x)))
//   x = LN(x + Dropout(W2 · GELU(W1 · x)))
//
// The pooler (Linear + tanh over the [CLS] position) is shared
// by every exit.
//
// Reference: Devlin et al. (2019) BERT
//            Burn Book §3 (Building Blocks)

use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Initializer,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::gelu,
};

use crate::data::batcher::EncoderInput;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct BertConfig {
    pub vocab_size:              usize,
    #[config(default = 768)]
    pub hidden_size:             usize,
    #[config(default = 12)]
    pub num_hidden_layers:       usize,
    #[config(default = 12)]
    pub num_attention_heads:     usize,
    #[config(default = 3072)]
    pub intermediate_size:       usize,
    #[config(default = 512)]
    pub max_position_embeddings: usize,
    #[config(default = 2)]
    pub type_vocab_size:         usize,
    #[config(default = 0.1)]
    pub hidden_dropout_prob:     f64,
    #[config(default = 0.1)]
    pub attention_dropout_prob:  f64,
    #[config(default = 1e-12)]
    pub layer_norm_eps:          f64,
    #[config(default = 0.02)]
    pub initializer_range:       f64,
    #[config(default = 0)]
    pub pad_token_id:            usize,
}

impl BertConfig {
    fn initializer(&self) -> Initializer {
        Initializer::Normal { mean: 0.0, std: self.initializer_range }
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.hidden_size)
            .with_epsilon(self.layer_norm_eps)
            .init(device)
    }

    fn linear<B: Backend>(&self, d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
        LinearConfig::new(d_in, d_out)
            .with_initializer(self.initializer())
            .init(device)
    }

    fn embedding<B: Backend>(&self, n: usize, device: &B::Device) -> Embedding<B> {
        EmbeddingConfig::new(n, self.hidden_size)
            .with_initializer(self.initializer())
            .init(device)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> LayeredBert<B> {
        let embeddings = BertEmbeddings {
            word:       self.embedding(self.vocab_size, device),
            position:   self.embedding(self.max_position_embeddings, device),
            token_type: self.embedding(self.type_vocab_size, device),
            layer_norm: self.layer_norm(device),
            dropout:    DropoutConfig::new(self.hidden_dropout_prob).init(),
        };
        let layers = (0..self.num_hidden_layers)
            .map(|_| self.build_layer(device))
            .collect();
        let pooler = self.linear(self.hidden_size, self.hidden_size, device);

        LayeredBert {
            embeddings,
            layers,
            pooler,
            hidden_size: self.hidden_size,
        }
    }

    fn build_layer<B: Backend>(&self, device: &B::Device) -> BertLayer<B> {
        let attention = MultiHeadAttentionConfig::new(self.hidden_size, self.num_attention_heads)
            .with_dropout(self.attention_dropout_prob)
            .with_initializer(self.initializer())
            .init(device);
        BertLayer {
            attention,
            attention_norm: self.layer_norm(device),
            intermediate:   self.linear(self.hidden_size, self.intermediate_size, device),
            output:         self.linear(self.intermediate_size, self.hidden_size, device),
            output_norm:    self.layer_norm(device),
            dropout:        DropoutConfig::new(self.hidden_dropout_prob).init(),
        }
    }
}

// ─── Embeddings ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertEmbeddings<B: Backend> {
    pub word:       Embedding<B>,
    pub position:   Embedding<B>,
    pub token_type: Embedding<B>,
    pub layer_norm: LayerNorm<B>,
    pub dropout:    Dropout,
}

impl<B: Backend> BertEmbeddings<B> {
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, token_type_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);

        let x = self.word.forward(input_ids)
            + self.position.forward(positions)
            + self.token_type.forward(token_type_ids);
        self.dropout.forward(self.layer_norm.forward(x))
    }
}

// ─── Encoder layer ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertLayer<B: Backend> {
    pub attention:      MultiHeadAttention<B>,
    pub attention_norm: LayerNorm<B>,
    pub intermediate:   Linear<B>,
    pub output:         Linear<B>,
    pub output_norm:    LayerNorm<B>,
    pub dropout:        Dropout,
}

impl<B: Backend> BertLayer<B> {
    /// x: [batch, seq, hidden], mask_pad: [batch, seq] (true = padding)
    pub fn forward(&self, x: Tensor<B, 3>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn = self
            .attention
            .forward(MhaInput::self_attn(x.clone()).mask_pad(mask_pad))
            .context;
        let x = self.attention_norm.forward(x + self.dropout.forward(attn));

        let ffn = self.output.forward(gelu(self.intermediate.forward(x.clone())));
        self.output_norm.forward(x + self.dropout.forward(ffn))
    }
}

// ─── LayeredBert ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LayeredBert<B: Backend> {
    pub embeddings:  BertEmbeddings<B>,
    pub layers:      Vec<BertLayer<B>>,
    pub pooler:      Linear<B>,
    pub hidden_size: usize,
}

/// Hidden states after a segment, plus the pooled [CLS] vector.
#[derive(Debug, Clone)]
pub struct SegmentOutput<B: Backend> {
    /// [batch, seq, hidden]
    pub hidden: Tensor<B, 3>,
    /// [batch, hidden]
    pub pooled: Tensor<B, 2>,
}

impl<B: Backend> LayeredBert<B> {
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn embed(&self, input: &EncoderInput<B>) -> Tensor<B, 3> {
        self.embeddings
            .forward(input.input_ids.clone(), input.token_type_ids.clone())
    }

    /// Run layers `start..=end`, continuing from `previous` when given
    /// and from the embeddings otherwise.
    pub fn forward_segment(
        &self,
        input:    &EncoderInput<B>,
        start:    usize,
        end:      usize,
        previous: Option<Tensor<B, 3>>,
    ) -> SegmentOutput<B> {
        let mut hidden = match previous {
            Some(h) => h,
            None    => self.embed(input),
        };
        for layer in &self.layers[start..=end] {
            hidden = layer.forward(hidden, input.mask_pad.clone());
        }
        let pooled = self.pool(hidden.clone());
        SegmentOutput { hidden, pooled }
    }

    /// Full pass through every layer.
    pub fn forward(&self, input: &EncoderInput<B>) -> SegmentOutput<B> {
        self.forward_segment(input, 0, self.depth() - 1, None)
    }

    /// tanh(W · h[CLS] + b)
    pub fn pool(&self, hidden: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, _, hidden_size] = hidden.dims();
        let cls = hidden
            .slice([0..batch_size, 0..1, 0..hidden_size])
            .reshape([batch_size, hidden_size]);
        self.pooler.forward(cls).tanh()
    }

    /// Stop gradients into every encoder parameter.
    pub fn freeze(self) -> Self {
        self.no_grad()
    }
}

/// Three-layer, 8-wide encoder for CPU tests.
#[cfg(test)]
pub(crate) fn tiny_config() -> BertConfig {
    BertConfig::new(128)
        .with_hidden_size(8)
        .with_num_hidden_layers(3)
        .with_num_attention_heads(2)
        .with_intermediate_size(16)
        .with_max_position_embeddings(16)
        .with_hidden_dropout_prob(0.0)
        .with_attention_dropout_prob(0.0)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn input(device: &<TestBackend as Backend>::Device) -> EncoderInput<TestBackend> {
        let ids: [&[u32]; 2]   = [&[2, 5, 7, 3], &[2, 9, 3]];
        let types: [&[u32]; 2] = [&[0, 0, 1, 1], &[0, 0, 0]];
        EncoderInput::from_sequences(&ids, &types, 0, device)
    }

    fn to_vec<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_output_shapes() {
        let device = Default::default();
        let model  = tiny_config().init::<TestBackend>(&device);
        let out    = model.forward(&input(&device));
        assert_eq!(out.hidden.dims(), [2, 4, 8]);
        assert_eq!(out.pooled.dims(), [2, 8]);
    }

    #[test]
    fn test_segments_match_full_pass() {
        let device = Default::default();
        let model  = tiny_config().init::<TestBackend>(&device);
        let x      = input(&device);

        let full  = model.forward(&x);
        let first = model.forward_segment(&x, 0, 0, None);
        let rest  = model.forward_segment(&x, 1, 2, Some(first.hidden));

        let a = to_vec(full.pooled);
        let b = to_vec(rest.pooled);
        for (p, q) in a.iter().zip(&b) {
            assert!((p - q).abs() < 1e-5, "{p} vs {q}");
        }
    }

    #[test]
    fn test_pooled_is_bounded_by_tanh() {
        let device = Default::default();
        let model  = tiny_config().init::<TestBackend>(&device);
        let pooled = to_vec(model.forward(&input(&device)).pooled);
        assert!(pooled.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
