use ndarray::{Axis, linalg, prelude::*};

use crate::topology::Activation;

impl Activation {
    fn apply(self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Linear => z.clone(),
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => z.mapv(f32::tanh),
            Activation::Softmax => {
                let mut out = z.clone();
                for mut row in out.outer_iter_mut() {
                    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row /= sum;
                }
                out
            }
        }
    }

    /// Turns `d = dL/da` into `dL/dz` in place, given the cached
    /// pre-activation `z` and activation `a`.
    fn backprop(self, d: &mut Array2<f32>, z: &Array2<f32>, a: &Array2<f32>) {
        match self {
            Activation::Linear => {}
            Activation::Relu => {
                d.zip_mut_with(z, |d, &z| {
                    if z <= 0.0 {
                        *d = 0.0;
                    }
                });
            }
            Activation::Sigmoid => {
                d.zip_mut_with(a, |d, &a| *d *= a * (1.0 - a));
            }
            Activation::Tanh => {
                d.zip_mut_with(a, |d, &a| *d *= 1.0 - a * a);
            }
            Activation::Softmax => {
                // Row-wise Jacobian product: dz_i = a_i * (d_i - sum_j d_j a_j).
                for (mut d_row, a_row) in d.outer_iter_mut().zip(a.outer_iter()) {
                    let dot: f32 = d_row.iter().zip(a_row.iter()).map(|(d, a)| d * a).sum();
                    for (d, &a) in d_row.iter_mut().zip(a_row.iter()) {
                        *d = a * (*d - dot);
                    }
                }
            }
        }
    }
}

/// A dense layer viewing its kernel and bias inside the model's flat
/// parameter buffer.
///
/// Forward metadata (`x`, `z`, `a`) is cached per micro-batch and overwritten
/// on the next pass; nothing outlives the task that owns the model.
pub struct Dense {
    dim: (usize, usize),
    offset: usize,
    size: usize,
    activation: Option<Activation>,

    x: Array2<f32>,
    z: Array2<f32>,
    a: Array2<f32>,
}

impl Dense {
    pub fn new(dim: (usize, usize), offset: usize, activation: Option<Activation>) -> Self {
        let zeros = Array2::zeros((0, 0));

        Self {
            dim,
            offset,
            size: (dim.0 + 1) * dim.1,
            activation,
            x: zeros.clone(),
            z: zeros.clone(),
            a: zeros,
        }
    }

    /// The amount of parameters this layer has (kernel plus bias).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Start of this layer's slice in the flat parameter buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Array2<f32> {
        let (w, b) = self.view_params(params);

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        self.x = x.to_owned();

        let out = match self.activation {
            Some(act) => act.apply(&z),
            None => z.clone(),
        };

        self.z = z;
        self.a = out.clone();
        out
    }

    /// Consumes `d = dL/da` for this layer's output and writes this layer's
    /// parameter gradient into `grad`, returning `dL/da` for the layer below.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Array2<f32> {
        if let Some(act) = self.activation {
            act.backprop(&mut d, &self.z, &self.a);
        }

        let (mut dw, mut db) = self.view_grad(grad);
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params);
        let mut d_prev = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut d_prev);
        d_prev
    }

    /// Views this layer's slice of the raw gradient buffer as its delta
    /// kernel and delta bias.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> (ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>) {
        let slice = &mut grad[self.offset..self.offset + self.size];
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = slice.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).unwrap();
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).unwrap();
        (dw, db)
    }

    /// Views this layer's slice of the flat parameter buffer as its kernel
    /// and bias.
    pub fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        let slice = &params[self.offset..self.offset + self.size];
        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &slice[..w_size]).unwrap();
        let biases = ArrayView1::from_shape(self.dim.1, &slice[w_size..]).unwrap();
        (weights, biases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn forward_computes_xw_plus_b() {
        // 2 -> 1 layer: w = [1, 2], b = [0.5]
        let params = [1.0, 2.0, 0.5];
        let mut layer = Dense::new((2, 1), 0, None);

        let x = array![[1.0, 1.0], [2.0, 0.0]];
        let out = layer.forward(&params, x.view());

        assert_eq!(out, array![[3.5], [2.5]]);
    }

    #[test]
    fn backward_produces_known_gradients() {
        // Identity-ish layer: w = [1], b = [0], loss gradient d = [[1], [1]].
        let params = [1.0, 0.0];
        let mut layer = Dense::new((1, 1), 0, None);
        let mut grad = [0.0, 0.0];

        let x = array![[2.0], [3.0]];
        layer.forward(&params, x.view());
        let d_prev = layer.backward(&params, &mut grad, array![[1.0], [1.0]]);

        assert_eq!(grad, [5.0, 2.0]); // dw = sum(x * d), db = sum(d)
        assert_eq!(d_prev, array![[1.0], [1.0]]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let z = array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]];
        let a = Activation::Softmax.apply(&z);

        for row in a.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!((a[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn relu_backprop_zeroes_negative_preactivations() {
        let z = array![[-1.0, 2.0]];
        let a = Activation::Relu.apply(&z);
        let mut d = array![[1.0, 1.0]];

        Activation::Relu.backprop(&mut d, &z, &a);
        assert_eq!(d, array![[0.0, 1.0]]);
    }
}
