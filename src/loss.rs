use burn::{prelude::Backend, tensor::Tensor};

/// The training loss: scaled compliance plus a weighted quadratic volume
/// penalty.
///
/// ```text
/// loss = sum(w / rho^penal) / obj0  +  alpha * (sum(rho * v) / V* - 1)^2
/// ```
///
/// `w` must hold `rho_hat^(2*penal) * psi` built from the detached densities
/// `rho_hat` of the current epoch, so finite element results enter the graph
/// as constants. Evaluated at `rho = rho_hat` the first term is the scaled
/// compliance, and its gradient `-penal * rho^(penal-1) * psi / obj0` is the
/// self-adjoint compliance sensitivity.
///
/// # Arguments
/// * `density` - Differentiable densities, one per element
/// * `scaled_energy` - The constant tensor `w`
/// * `volumes` - Element volumes
/// * `target_volume` - `V*`, the volume budget
/// * `penal` - Penalization exponent
/// * `reference_objective` - `obj0`, the initial-compliance scale
/// * `alpha` - Volume-penalty weight
///
/// # Returns
/// A single-element tensor holding the loss
pub fn optimization_loss<B: Backend>(
    density: Tensor<B, 1>,
    scaled_energy: Tensor<B, 1>,
    volumes: Tensor<B, 1>,
    target_volume: f64,
    penal: f64,
    reference_objective: f64,
    alpha: f64,
) -> Tensor<B, 1> {
    let compliance = scaled_energy
        .div(density.clone().powf_scalar(penal))
        .sum()
        .div_scalar(reference_objective);

    let volume_error = density
        .mul(volumes)
        .sum()
        .div_scalar(target_volume)
        .sub_scalar(1.0);
    let volume_penalty = (volume_error.clone() * volume_error).mul_scalar(alpha);

    compliance + volume_penalty
}
