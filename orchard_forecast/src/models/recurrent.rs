//! Stacked LSTM network with a dense head, trained by back-propagation
//! through time and the Adam optimiser.
//!
//! Gate blocks follow the Keras layout `[input, forget, cell, output]`, the
//! forget-gate bias starts at one and weights use Glorot-uniform
//! initialisation. Dropout is applied to the output of every recurrent layer
//! during training only.

use crate::error::{ForecastError, Result};
use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Distribution, Uniform};
use serde::{Deserialize, Serialize};

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn glorot(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_simple_fn((rows, cols), || dist.sample(rng))
}

/// `target += a ⊗ b`
fn add_outer(target: &mut Array2<f64>, a: &Array1<f64>, b: &Array1<f64>) {
    for (i, &ai) in a.iter().enumerate() {
        if ai != 0.0 {
            target.row_mut(i).scaled_add(ai, b);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LstmLayer {
    hidden: usize,
    /// `input × 4h`
    w: Array2<f64>,
    /// `h × 4h`
    u: Array2<f64>,
    b: Array1<f64>,
}

/// Activations of one layer over one sequence
struct LayerTrace {
    inputs: Vec<Array1<f64>>,
    /// Activated gates `[i, f, g, o]` per step
    gates: Vec<Array1<f64>>,
    cells: Vec<Array1<f64>>,
    hiddens: Vec<Array1<f64>>,
}

impl LstmLayer {
    fn new(input: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let mut b = Array1::zeros(4 * hidden);
        b.slice_mut(s![hidden..2 * hidden]).fill(1.0);
        Self {
            hidden,
            w: glorot(input, 4 * hidden, rng),
            u: glorot(hidden, 4 * hidden, rng),
            b,
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            hidden: self.hidden,
            w: Array2::zeros(self.w.raw_dim()),
            u: Array2::zeros(self.u.raw_dim()),
            b: Array1::zeros(self.b.raw_dim()),
        }
    }

    fn forward(&self, inputs: Vec<Array1<f64>>) -> LayerTrace {
        let h = self.hidden;
        let mut h_prev = Array1::<f64>::zeros(h);
        let mut c_prev = Array1::<f64>::zeros(h);
        let mut trace = LayerTrace {
            gates: Vec::with_capacity(inputs.len()),
            cells: Vec::with_capacity(inputs.len()),
            hiddens: Vec::with_capacity(inputs.len()),
            inputs,
        };

        for x in &trace.inputs {
            let mut z = x.dot(&self.w) + h_prev.dot(&self.u) + &self.b;
            z.slice_mut(s![0..2 * h]).mapv_inplace(sigmoid);
            z.slice_mut(s![2 * h..3 * h]).mapv_inplace(f64::tanh);
            z.slice_mut(s![3 * h..]).mapv_inplace(sigmoid);

            let i = z.slice(s![0..h]);
            let f = z.slice(s![h..2 * h]);
            let g = z.slice(s![2 * h..3 * h]);
            let o = z.slice(s![3 * h..]);
            let c = &f * &c_prev + &i * &g;
            let h_t = &o * &c.mapv(f64::tanh);

            trace.gates.push(z.clone());
            trace.cells.push(c.clone());
            trace.hiddens.push(h_t.clone());
            c_prev = c;
            h_prev = h_t;
        }
        trace
    }

    /// Accumulate parameter gradients into `grads` and return the gradient
    /// with respect to every input step.
    fn backward(&self, trace: &LayerTrace, d_out: &[Array1<f64>], grads: &mut LstmLayer) -> Vec<Array1<f64>> {
        let h = self.hidden;
        let steps = trace.inputs.len();
        let zeros = Array1::<f64>::zeros(h);
        let mut dh_next = Array1::<f64>::zeros(h);
        let mut dc_next = Array1::<f64>::zeros(h);
        let mut d_inputs = vec![Array1::<f64>::zeros(self.w.nrows()); steps];

        for t in (0..steps).rev() {
            let gates = &trace.gates[t];
            let i = gates.slice(s![0..h]).to_owned();
            let f = gates.slice(s![h..2 * h]).to_owned();
            let g = gates.slice(s![2 * h..3 * h]).to_owned();
            let o = gates.slice(s![3 * h..]).to_owned();
            let c_prev = if t > 0 { &trace.cells[t - 1] } else { &zeros };
            let h_prev = if t > 0 { &trace.hiddens[t - 1] } else { &zeros };
            let tanh_c = trace.cells[t].mapv(f64::tanh);

            let dh = &d_out[t] + &dh_next;
            let d_o = &dh * &tanh_c;
            let dc = &dc_next + &(&dh * &o * &tanh_c.mapv(|v| 1.0 - v * v));

            let mut dz = Array1::<f64>::zeros(4 * h);
            dz.slice_mut(s![0..h])
                .assign(&(&dc * &g * &i * &i.mapv(|v| 1.0 - v)));
            dz.slice_mut(s![h..2 * h])
                .assign(&(&dc * c_prev * &f * &f.mapv(|v| 1.0 - v)));
            dz.slice_mut(s![2 * h..3 * h])
                .assign(&(&dc * &i * &g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![3 * h..])
                .assign(&(&d_o * &o * &o.mapv(|v| 1.0 - v)));

            add_outer(&mut grads.w, &trace.inputs[t], &dz);
            add_outer(&mut grads.u, h_prev, &dz);
            grads.b += &dz;

            d_inputs[t] = self.w.dot(&dz);
            dh_next = self.u.dot(&dz);
            dc_next = &dc * &f;
        }
        d_inputs
    }
}

/// Recurrent network: LSTM stack followed by a linear output layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RecurrentNetwork {
    layers: Vec<LstmLayer>,
    head_w: Array2<f64>,
    head_b: Array1<f64>,
    dropout: f64,
}

/// Adam optimiser state, sized lazily to the flattened parameter vector
#[derive(Debug, Clone)]
pub(crate) struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: i32,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Adam {
    pub(crate) fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    fn update<'a>(
        &mut self,
        params: impl Iterator<Item = &'a mut f64>,
        grads: impl Iterator<Item = &'a f64>,
    ) {
        self.step += 1;
        let alpha = self.learning_rate * (1.0 - self.beta2.powi(self.step)).sqrt()
            / (1.0 - self.beta1.powi(self.step));
        for (k, (p, g)) in params.zip(grads).enumerate() {
            if k == self.m.len() {
                self.m.push(0.0);
                self.v.push(0.0);
            }
            self.m[k] = self.beta1 * self.m[k] + (1.0 - self.beta1) * g;
            self.v[k] = self.beta2 * self.v[k] + (1.0 - self.beta2) * g * g;
            *p -= alpha * self.m[k] / (self.v[k].sqrt() + self.epsilon);
        }
    }
}

impl RecurrentNetwork {
    pub(crate) fn new(
        n_features: usize,
        units: &[usize],
        n_outputs: usize,
        dropout: f64,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if units.is_empty() || units.contains(&0) {
            return Err(ForecastError::InvalidParameter(format!(
                "recurrent layer widths must be non-empty and positive, got {:?}",
                units
            )));
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(ForecastError::InvalidParameter(format!(
                "dropout rate must lie in [0, 1), got {}",
                dropout
            )));
        }

        let mut layers = Vec::with_capacity(units.len());
        let mut input = n_features;
        for &width in units {
            layers.push(LstmLayer::new(input, width, rng));
            input = width;
        }
        Ok(Self {
            layers,
            head_w: glorot(input, n_outputs, rng),
            head_b: Array1::zeros(n_outputs),
            dropout,
        })
    }

    fn zeros_like(&self) -> Self {
        Self {
            layers: self.layers.iter().map(LstmLayer::zeros_like).collect(),
            head_w: Array2::zeros(self.head_w.raw_dim()),
            head_b: Array1::zeros(self.head_b.raw_dim()),
            dropout: self.dropout,
        }
    }

    fn values(&self) -> impl Iterator<Item = &f64> + '_ {
        self.layers
            .iter()
            .flat_map(|l| l.w.iter().chain(l.u.iter()).chain(l.b.iter()))
            .chain(self.head_w.iter())
            .chain(self.head_b.iter())
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        self.layers
            .iter_mut()
            .flat_map(|l| {
                let LstmLayer { w, u, b, .. } = l;
                w.iter_mut().chain(u.iter_mut()).chain(b.iter_mut())
            })
            .chain(self.head_w.iter_mut())
            .chain(self.head_b.iter_mut())
    }

    fn scale_gradients(&mut self, factor: f64) {
        for v in self.values_mut() {
            *v *= factor;
        }
    }

    /// Next-step prediction for one `steps × features` window
    pub(crate) fn predict(&self, window: &Array2<f64>) -> Array1<f64> {
        let mut seq: Vec<Array1<f64>> = window.rows().into_iter().map(|r| r.to_owned()).collect();
        for layer in &self.layers {
            seq = layer.forward(seq).hiddens;
        }
        let last = seq.last().cloned().unwrap_or_else(|| Array1::zeros(self.head_w.nrows()));
        last.dot(&self.head_w) + &self.head_b
    }

    fn dropout_mask(&self, len: usize, rng: &mut StdRng) -> Result<Option<Array1<f64>>> {
        if self.dropout <= 0.0 {
            return Ok(None);
        }
        let keep = 1.0 - self.dropout;
        let coin = Bernoulli::new(keep).map_err(|e| ForecastError::MathError(e.to_string()))?;
        Ok(Some(Array1::from_shape_simple_fn(len, || {
            if coin.sample(rng) {
                1.0 / keep
            } else {
                0.0
            }
        })))
    }

    /// Forward and backward pass for one sample; returns its squared error sum
    fn accumulate(
        &self,
        window: &Array2<f64>,
        target: &Array1<f64>,
        grads: &mut RecurrentNetwork,
        rng: &mut StdRng,
    ) -> Result<f64> {
        let n_layers = self.layers.len();
        let mut traces = Vec::with_capacity(n_layers);
        // dropout masks per layer; intermediate layers mask every step
        let mut masks: Vec<Vec<Option<Array1<f64>>>> = Vec::with_capacity(n_layers);
        let mut seq: Vec<Array1<f64>> = window.rows().into_iter().map(|r| r.to_owned()).collect();

        for (idx, layer) in self.layers.iter().enumerate() {
            let trace = layer.forward(seq);
            let last_layer = idx + 1 == n_layers;
            let mut layer_masks = Vec::with_capacity(trace.hiddens.len());
            let mut out = Vec::with_capacity(trace.hiddens.len());
            for (t, h) in trace.hiddens.iter().enumerate() {
                let needed = !last_layer || t + 1 == trace.hiddens.len();
                let mask = if needed { self.dropout_mask(layer.hidden, rng)? } else { None };
                out.push(match &mask {
                    Some(m) => h * m,
                    None => h.clone(),
                });
                layer_masks.push(mask);
            }
            traces.push(trace);
            masks.push(layer_masks);
            seq = out;
        }

        let features = seq.last().cloned().unwrap_or_else(|| Array1::zeros(self.head_w.nrows()));
        let output = features.dot(&self.head_w) + &self.head_b;
        let error = &output - target;
        let sse = error.iter().map(|e| e * e).sum::<f64>();

        // d(mean squared error)/d(output), batch averaging happens later
        let d_output = error.mapv(|e| 2.0 * e / target.len() as f64);
        add_outer(&mut grads.head_w, &features, &d_output);
        grads.head_b += &d_output;

        let steps = window.nrows();
        let mut d_seq = vec![Array1::<f64>::zeros(features.len()); steps];
        if let Some(last) = d_seq.last_mut() {
            *last = self.head_w.dot(&d_output);
        }

        for idx in (0..n_layers).rev() {
            for (d, mask) in d_seq.iter_mut().zip(masks[idx].iter()) {
                if let Some(m) = mask {
                    *d *= m;
                }
            }
            d_seq = self.layers[idx].backward(&traces[idx], &d_seq, &mut grads.layers[idx]);
        }

        Ok(sse)
    }

    /// Mini-batch training without shuffling; returns the mean loss per epoch
    pub(crate) fn train(
        &mut self,
        windows: &[Array2<f64>],
        targets: &[Array1<f64>],
        epochs: usize,
        batch_size: usize,
        optimizer: &mut Adam,
        rng: &mut StdRng,
    ) -> Result<Vec<f64>> {
        if windows.is_empty() || windows.len() != targets.len() {
            return Err(ForecastError::ValidationError(format!(
                "{} training windows for {} targets",
                windows.len(),
                targets.len()
            )));
        }
        let batch_size = batch_size.max(1);
        let n_outputs = self.head_b.len() as f64;
        let mut history = Vec::with_capacity(epochs);

        for _ in 0..epochs {
            let mut epoch_loss = 0.0;
            for (batch_x, batch_y) in windows.chunks(batch_size).zip(targets.chunks(batch_size)) {
                let mut grads = self.zeros_like();
                for (x, y) in batch_x.iter().zip(batch_y) {
                    epoch_loss += self.accumulate(x, y, &mut grads, rng)? / n_outputs;
                }
                grads.scale_gradients(1.0 / batch_x.len() as f64);
                optimizer.update(self.values_mut(), grads.values());
            }
            let loss = epoch_loss / windows.len() as f64;
            if !loss.is_finite() {
                return Err(ForecastError::MathError("training loss diverged".to_string()));
            }
            history.push(loss);
        }
        Ok(history)
    }
}

/// Fixed-size window of the most recent rows, overwritten oldest-first
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RollingWindow {
    rows: Vec<Vec<f64>>,
    oldest: usize,
}

impl RollingWindow {
    pub(crate) fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows, oldest: 0 }
    }

    /// Replace the oldest row with `row`
    pub(crate) fn push(&mut self, row: Vec<f64>) {
        if self.rows.is_empty() {
            return;
        }
        self.rows[self.oldest] = row;
        self.oldest = (self.oldest + 1) % self.rows.len();
    }

    /// Rows in chronological order as a `steps × features` matrix
    pub(crate) fn to_array(&self) -> Result<Array2<f64>> {
        let steps = self.rows.len();
        let width = self.rows.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<f64> = (0..steps)
            .flat_map(|k| self.rows[(self.oldest + k) % steps].iter().copied())
            .collect();
        Array2::from_shape_vec((steps, width), flat)
            .map_err(|e| ForecastError::ValidationError(format!("ragged window: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_rolling_window_order() {
        let mut window = RollingWindow::new(vec![vec![1.0], vec![2.0], vec![3.0]]);
        window.push(vec![4.0]);
        window.push(vec![5.0]);
        assert_eq!(window.to_array().unwrap(), array![[3.0], [4.0], [5.0]]);
    }

    #[test]
    fn test_forget_bias_and_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = RecurrentNetwork::new(3, &[4, 2], 3, 0.0, &mut rng).unwrap();
        assert_eq!(net.layers[0].b.slice(s![4..8]).to_vec(), vec![1.0; 4]);
        assert_eq!(net.layers[1].w.dim(), (4, 8));

        let out = net.predict(&Array2::zeros((5, 3)));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(3);
        let net = RecurrentNetwork::new(2, &[3], 1, 0.0, &mut rng).unwrap();
        let x = array![[0.1, 0.5], [0.3, -0.2], [0.7, 0.4]];
        let y = array![0.25];

        let mut grads = net.zeros_like();
        net.accumulate(&x, &y, &mut grads, &mut rng).unwrap();

        let loss = |n: &RecurrentNetwork| {
            let e = n.predict(&x)[0] - y[0];
            e * e
        };
        let eps = 1e-6;
        let mut plus = net.clone();
        plus.layers[0].w[[1, 2]] += eps;
        let mut minus = net.clone();
        minus.layers[0].w[[1, 2]] -= eps;
        let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
        assert_relative_eq!(grads.layers[0].w[[1, 2]], numeric, epsilon = 1e-6);
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut net = RecurrentNetwork::new(1, &[8], 1, 0.0, &mut rng).unwrap();
        let series: Vec<f64> = (0..80).map(|t| 0.5 + 0.4 * (t as f64 * 0.3).sin()).collect();
        let windows: Vec<Array2<f64>> = (0..70)
            .map(|i| Array2::from_shape_vec((10, 1), series[i..i + 10].to_vec()).unwrap())
            .collect();
        let targets: Vec<Array1<f64>> = (0..70).map(|i| array![series[i + 10]]).collect();

        let mut adam = Adam::new(0.01);
        let history = net
            .train(&windows, &targets, 15, 8, &mut adam, &mut rng)
            .unwrap();
        assert!(history.last().unwrap() < history.first().unwrap());
    }
}
