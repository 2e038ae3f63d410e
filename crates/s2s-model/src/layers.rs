//! Neural network layers for the sequence model.
//!
//! All layers work on a single unbatched sequence: vectors are `(dim,)` and
//! sequences are `(time, dim)`.

use candle_core::{bail, DType, Device, Module, Result, Tensor, D};

/// Affine projection `y = x·Wᵗ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    inner: candle_nn::Linear,
    out_features: usize,
}

impl Linear {
    /// Create a layer from a `(out, in)` weight and an `(out,)` bias.
    pub fn new(weight: Tensor, bias: Tensor) -> Result<Self> {
        let (out_features, _) = weight.dims2()?;
        if bias.dims1()? != out_features {
            bail!(
                "linear bias has {} entries, weight has {out_features} rows",
                bias.dims1()?
            );
        }
        Ok(Self {
            inner: candle_nn::Linear::new(weight, Some(bias)),
            out_features,
        })
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Project a vector `(in,)` or a sequence `(time, in)`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match x.rank() {
            1 => self.inner.forward(&x.unsqueeze(0)?)?.squeeze(0),
            2 => self.inner.forward(x),
            r => bail!("linear expects rank 1 or 2 input, got rank {r}"),
        }
    }
}

/// Row lookup table.
#[derive(Debug, Clone)]
pub struct Embedding {
    weight: Tensor,
    rows: usize,
}

impl Embedding {
    pub fn new(weight: Tensor) -> Result<Self> {
        let (rows, _) = weight.dims2()?;
        Ok(Self { weight, rows })
    }

    /// Gather rows for `ids`, giving `(ids.len(), dim)`.
    pub fn forward(&self, ids: &[usize]) -> Result<Tensor> {
        if let Some(&bad) = ids.iter().find(|&&i| i >= self.rows) {
            bail!("embedding index {bad} out of range for {} rows", self.rows);
        }
        let ids: Vec<u32> = ids.iter().map(|&i| i as u32).collect();
        let n = ids.len();
        let ids = Tensor::from_vec(ids, n, self.weight.device())?;
        self.weight.index_select(&ids, 0)
    }
}

/// Elementwise logistic function.
pub fn sigmoid(x: &Tensor) -> Result<Tensor> {
    candle_nn::ops::sigmoid(x)
}

/// Elementwise hyperbolic tangent.
pub fn tanh(x: &Tensor) -> Result<Tensor> {
    x.tanh()
}

/// Layer normalization over the last axis.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub const DEFAULT_EPS: f64 = 1e-5;

    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    /// Identity-initialized norm (for testing).
    pub fn new_ones(dim: usize, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            weight: Tensor::ones((dim,), dtype, device)?,
            bias: Tensor::zeros((dim,), dtype, device)?,
            eps: Self::DEFAULT_EPS,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normalized = centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// Gated recurrent cell.
///
/// Projections are laid out as `[reset | update | candidate]` along the first
/// axis of the `(3·hidden, in)` and `(3·hidden, hidden)` weights.
#[derive(Debug, Clone)]
pub struct GruCell {
    ih: Linear,
    hh: Linear,
    hidden: usize,
}

impl GruCell {
    pub fn new(weight_ih: Tensor, weight_hh: Tensor, bias_ih: Tensor, bias_hh: Tensor) -> Result<Self> {
        let (rows, hidden) = weight_hh.dims2()?;
        if rows != 3 * hidden {
            bail!("gru hidden weight must be (3h, h), got ({rows}, {hidden})");
        }
        if weight_ih.dims2()?.0 != rows {
            bail!("gru input weight has {} rows, expected {rows}", weight_ih.dims2()?.0);
        }
        Ok(Self {
            ih: Linear::new(weight_ih, bias_ih)?,
            hh: Linear::new(weight_hh, bias_hh)?,
            hidden,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden
    }

    /// Project a whole input sequence `(time, in)` to `(time, 3·hidden)`.
    pub fn project_input(&self, xs: &Tensor) -> Result<Tensor> {
        self.ih.forward(xs)
    }

    /// One step from a vector `x`; `h` defaults to zeros.
    pub fn forward(&self, x: &Tensor, h: Option<&Tensor>) -> Result<Tensor> {
        let gi = self.ih.forward(x)?;
        self.step(&gi, h)
    }

    /// One step from a precomputed input projection `(3·hidden,)`.
    pub fn step(&self, gi: &Tensor, h: Option<&Tensor>) -> Result<Tensor> {
        let zeros;
        let h = match h {
            Some(h) => h,
            None => {
                zeros = Tensor::zeros((self.hidden,), gi.dtype(), gi.device())?;
                &zeros
            }
        };
        let gh = self.hh.forward(h)?;
        let n = self.hidden;

        let rz = sigmoid(&(gi.narrow(0, 0, 2 * n)? + gh.narrow(0, 0, 2 * n)?)?)?;
        let r = rz.narrow(0, 0, n)?;
        let z = rz.narrow(0, n, n)?;

        let candidate = tanh(&(gi.narrow(0, 2 * n, n)? + (r * gh.narrow(0, 2 * n, n)?)?)?)?;

        // h' = (1 - z) * n + z * h
        let keep = z.affine(-1.0, 1.0)?;
        (keep * candidate)? + (z * h)?
    }
}

/// A recurrent layer running a [`GruCell`] over a sequence.
#[derive(Debug, Clone)]
pub struct Gru {
    cell: GruCell,
    reverse: bool,
}

impl Gru {
    pub fn new(cell: GruCell, reverse: bool) -> Self {
        Self { cell, reverse }
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn hidden_size(&self) -> usize {
        self.cell.hidden_size()
    }

    /// Run over `(time, in)`.
    ///
    /// Returns per-position states `(time, hidden)` in input order and the
    /// final state, which for a reverse layer is the state at position 0.
    pub fn forward(&self, xs: &Tensor, h0: Option<&Tensor>) -> Result<(Tensor, Tensor)> {
        let (time, _) = xs.dims2()?;
        if time == 0 {
            bail!("gru input sequence is empty");
        }
        let gi = self.cell.project_input(xs)?;

        let order: Vec<usize> = if self.reverse {
            (0..time).rev().collect()
        } else {
            (0..time).collect()
        };

        let mut states: Vec<Tensor> = Vec::with_capacity(time);
        let mut h = h0.cloned();
        for t in order {
            let next = self.cell.step(&gi.get(t)?, h.as_ref())?;
            states.push(next.clone());
            h = Some(next);
        }
        if self.reverse {
            states.reverse();
        }

        let outputs = Tensor::stack(&states, 0)?;
        match h {
            Some(last) => Ok((outputs, last)),
            None => bail!("gru produced no state"),
        }
    }
}

/// Multi-head scaled dot-product attention over one sequence.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl MultiHeadAttention {
    /// Build from a packed `(3·dim, dim)` input projection.
    ///
    /// `scale` divides the raw scores.
    pub fn new(
        in_proj_weight: Tensor,
        in_proj_bias: Tensor,
        out_proj_weight: Tensor,
        out_proj_bias: Tensor,
        num_heads: usize,
        scale: f64,
    ) -> Result<Self> {
        let (_, dim) = in_proj_weight.dims2()?;
        if num_heads == 0 || dim % num_heads != 0 {
            bail!("model dim {dim} is not divisible by {num_heads} heads");
        }
        let w = in_proj_weight.chunk(3, 0)?;
        let b = in_proj_bias.chunk(3, 0)?;
        if w.len() != 3 || b.len() != 3 {
            bail!("attention input projection must split into three parts");
        }
        Ok(Self {
            q_proj: Linear::new(w[0].clone(), b[0].clone())?,
            k_proj: Linear::new(w[1].clone(), b[1].clone())?,
            v_proj: Linear::new(w[2].clone(), b[2].clone())?,
            out_proj: Linear::new(out_proj_weight, out_proj_bias)?,
            num_heads,
            head_dim: dim / num_heads,
            scale,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Attend from `query` `(tq, dim)` over `key`/`value` `(tk, dim)`.
    pub fn forward(&self, query: &Tensor, key: &Tensor, value: &Tensor) -> Result<Tensor> {
        let (tq, dim) = query.dims2()?;

        let q = self.split_heads(&self.q_proj.forward(query)?)?;
        let k = self.split_heads(&self.k_proj.forward(key)?)?;
        let v = self.split_heads(&self.v_proj.forward(value)?)?;

        // [H, tq, hd] x [H, hd, tk] -> [H, tq, tk]
        let scores = (q.matmul(&k.t()?.contiguous()?)? / self.scale)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let heads = weights.matmul(&v)?;

        let merged = heads.transpose(0, 1)?.contiguous()?.reshape((tq, dim))?;
        self.out_proj.forward(&merged)
    }

    /// `(t, dim)` -> `(heads, t, head_dim)`.
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (t, _) = x.dims2()?;
        x.reshape((t, self.num_heads, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()
    }
}
