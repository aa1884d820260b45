use burn::tensor::{backend::Backend, Bool, Data, Int, Shape, Tensor};

/// Mean of `x` over the entries with non-zero weight. Only those entries are
/// gathered before the product, so `-inf`/`NaN` values elsewhere never leak
/// into the result. An all-zero weight vector yields `0`.
pub fn weighted_average<B: Backend>(x: Tensor<B, 2>, weights: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n_rows, n_cols] = x.dims();
    let n = n_rows * n_cols;
    let device = x.device();

    let kept: Vec<usize> = float_values(&weights)
        .iter()
        .enumerate()
        .filter(|(_, weight)| **weight != 0.0)
        .map(|(i, _)| i)
        .collect();
    if kept.is_empty() {
        return Tensor::zeros([1]).to_device(&device);
    }

    let kept = index_tensor(&kept, &device);
    let x = x.reshape([n]).select(0, kept.clone());
    let weights = weights.reshape([n]).select(0, kept);
    let sum_weights = weights.clone().sum().clamp_min(1.0);

    (x * weights).sum() / sum_weights
}

/// Row-wise `log(sum(exp(x)))` with the row maximum factored out. Entries set
/// to `-inf` contribute nothing; every row needs at least one finite entry.
pub fn log_sum_exp<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [_, n_cols] = x.dims();
    let max = x.clone().max_dim(1).detach();
    let shifted = x - max.clone().repeat(1, n_cols);

    shifted.exp().sum_dim(1).log() + max
}

/// Row-wise log-softmax over the last dimension, see [`log_sum_exp`].
pub fn log_softmax<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [_, n_cols] = x.dims();
    let lse = log_sum_exp(x.clone());

    x - lse.repeat(1, n_cols)
}

pub fn float_tensor<B: Backend, const D: usize>(
    values: Vec<f32>,
    dims: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let data = Data::new(values, Shape::new(dims));
    Tensor::from_data(data.convert()).to_device(device)
}

pub fn int_tensor<B: Backend, const D: usize>(
    values: Vec<i64>,
    dims: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    let data = Data::new(values, Shape::new(dims));
    Tensor::from_data(data.convert()).to_device(device)
}

pub fn bool_tensor<B: Backend, const D: usize>(
    values: Vec<bool>,
    dims: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Bool> {
    let data = Data::new(values, Shape::new(dims));
    Tensor::from_data(data).to_device(device)
}

pub fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    int_tensor(
        indices.iter().map(|&idx| idx as i64).collect(),
        [indices.len()],
        device,
    )
}

/// Copies an integer tensor to the host, row-major.
pub fn int_values<B: Backend, const D: usize>(tensor: &Tensor<B, D, Int>) -> Vec<i64> {
    tensor.to_data().convert::<i64>().value
}

pub fn float_values<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Vec<f32> {
    tensor.to_data().convert::<f32>().value
}

pub fn bool_values<B: Backend, const D: usize>(tensor: &Tensor<B, D, Bool>) -> Vec<bool> {
    tensor.to_data().value
}
