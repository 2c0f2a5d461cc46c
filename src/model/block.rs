use burn::module::Module;
use burn::nn::attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig};
use burn::nn::{Dropout, DropoutConfig, Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Pre-norm transformer encoder block over `(batch, tokens, embed)` sequences.
#[derive(Module, Debug)]
pub struct AttentionBlock<B: Backend> {
    norm_attn: LayerNorm<B>,
    attention: MultiHeadAttention<B>,
    norm_mlp: LayerNorm<B>,
    fc_in: Linear<B>,
    activation: Gelu,
    fc_out: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> AttentionBlock<B> {
    pub fn new(
        embed_dim: usize,
        hidden_dim: usize,
        num_heads: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            norm_attn: LayerNormConfig::new(embed_dim).init(device),
            attention: MultiHeadAttentionConfig::new(embed_dim, num_heads)
                .with_dropout(dropout)
                .init(device),
            norm_mlp: LayerNormConfig::new(embed_dim).init(device),
            fc_in: LinearConfig::new(embed_dim, hidden_dim).init(device),
            activation: Gelu::new(),
            fc_out: LinearConfig::new(hidden_dim, embed_dim).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let normed = self.norm_attn.forward(x.clone());
        let attended = self.attention.forward(MhaInput::self_attn(normed)).context;
        let x = x + attended;

        let hidden = self.fc_in.forward(self.norm_mlp.forward(x.clone()));
        let hidden = self.dropout.forward(self.activation.forward(hidden));
        let mlp = self.dropout.forward(self.fc_out.forward(hidden));
        x + mlp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    #[test]
    fn block_preserves_sequence_shape() {
        type Backend = NdArray<f32>;
        let device = Default::default();
        let block = AttentionBlock::<Backend>::new(16, 32, 4, 0.0, &device);
        let x = Tensor::<Backend, 3>::random([2, 5, 16], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [2, 5, 16]);
    }
}
