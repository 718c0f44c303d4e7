use std::iter::zip;

use burn::{
    grad_clipping::GradientClippingConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use indicatif::ProgressBar;

use crate::{
    datatypes::{EpochRecord, OptimizationConfig},
    error::TaeniteError,
    loss::optimization_loss,
    mesher::Mesh,
    network::{DensityNet, INPUT_DIM},
    post_processor::DensitySeriesWriter,
    solver::FeModel,
};

/// Mutable state of the optimization loop, carried across epochs.
#[derive(Debug)]
pub struct TrainingState {
    pub epoch: usize,
    pub alpha: f64,
    pub grey_fraction: f64,
    pub records: Vec<EpochRecord>,
}

impl TrainingState {
    /// Stop once past the minimum epoch count with an essentially solid/void
    /// design.
    pub fn should_stop(&self, config: &OptimizationConfig) -> bool {
        self.epoch >= config.min_epochs && self.grey_fraction <= config.grey_threshold
    }
}

/// What a finished run hands back to the caller.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub records: Vec<EpochRecord>,
    pub epochs_completed: usize,
    pub early_stopped: bool,
    pub final_grey_fraction: f64,
}

/// Next annealed volume-penalty weight.
pub fn next_alpha(alpha: f64, increment: f64, alpha_max: f64) -> f64 {
    f64::min(alpha_max, alpha + increment)
}

/// Share of elements that are neither solid nor void (strictly between
/// 0.05 and 0.95).
pub fn grey_fraction(densities: &[f64]) -> f64 {
    if densities.is_empty() {
        return 0.0;
    }

    let grey = densities
        .iter()
        .filter(|rho| **rho > 0.05 && **rho < 0.95)
        .count();

    grey as f64 / densities.len() as f64
}

/// Runs the optimization loop.
///
/// Every epoch performs exactly one finite element solve and one gradient
/// update: the network predicts densities, a detached snapshot goes to the
/// solver, the strain energies come back as constants in the loss, and the
/// optimizer steps the network weights. The penalty weight `alpha` anneals
/// by a fixed increment per epoch up to `alpha_max`.
///
/// # Arguments
/// * `config` - The validated run configuration
/// * `mesh` - The mesh the model was built from
/// * `fe_model` - The finite element model
/// * `series` - Receives one density frame per epoch, including epoch 0
/// * `device` - The backend device
///
/// # Returns
/// The per-epoch records and closing statistics
pub fn run<B: AutodiffBackend>(
    config: &OptimizationConfig,
    mesh: &Mesh,
    fe_model: &FeModel,
    series: &mut DensitySeriesWriter,
    device: &B::Device,
) -> Result<TrainingOutcome, TaeniteError> {
    let num_elements = mesh.elements.len();

    // Reference solve at uniform density fixes the compliance scale
    let initial_density = vec![0.5; num_elements];
    let reference = fe_model.solve(&initial_density, config.penal)?;
    let psi_total: f64 = reference.energy_densities.iter().sum();
    let reference_objective = config.volume_ratio.powf(config.penal) * psi_total;

    let target_volume = config.volume_ratio * fe_model.total_volume();

    let mut state = TrainingState {
        epoch: 0,
        alpha: f64::min(config.alpha_increment, config.alpha_max()),
        grey_fraction: 1.0,
        records: Vec::with_capacity(config.max_epochs),
    };

    state.records.push(EpochRecord {
        epoch: 0,
        objective: reference_objective,
        average_density: 0.5,
    });
    series.write_frame(0, &initial_density)?;

    let mut model: DensityNet<B> = DensityNet::new(config.layers, config.neurons, device);
    let mut optimizer = AdamConfig::new()
        .with_grad_clipping(Some(GradientClippingConfig::Norm(
            config.clip_threshold as f32,
        )))
        .init();

    let coordinates = Tensor::<B, 1>::from_floats(mesh.normalized_centroids().as_slice(), device)
        .reshape([num_elements, INPUT_DIM]);
    let volume_values: Vec<f32> = fe_model
        .element_volumes()
        .iter()
        .map(|v| *v as f32)
        .collect();
    let volumes = Tensor::<B, 1>::from_floats(volume_values.as_slice(), device);

    println!(
        "info: optimizing for up to {} epochs...",
        config.max_epochs - 1
    );
    let bar = ProgressBar::new((config.max_epochs - 1) as u64);
    let mut early_stopped = false;

    for epoch in 1..config.max_epochs {
        state.epoch = epoch;
        bar.inc(1);

        // Predict densities and hand a detached snapshot to the solver
        let density = model.forward(coordinates.clone());
        let density_values: Vec<f64> = density
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .expect("density data should convert to f32")
            .into_iter()
            .map(|rho| rho as f64)
            .collect();

        let solution = fe_model.solve(&density_values, config.penal)?;

        let objective: f64 = zip(&density_values, &solution.energy_densities)
            .map(|(rho, psi)| rho.powf(2.0 * config.penal) * psi)
            .sum();

        let scaled_energy_values: Vec<f32> = zip(&density_values, &solution.energy_densities)
            .map(|(rho, psi)| (rho.powf(2.0 * config.penal) * psi) as f32)
            .collect();
        let scaled_energy = Tensor::<B, 1>::from_floats(scaled_energy_values.as_slice(), device);

        let loss = optimization_loss(
            density,
            scaled_energy,
            volumes.clone(),
            target_volume,
            config.penal,
            reference_objective,
            state.alpha,
        );
        let loss_value: f64 = loss.clone().into_scalar().elem();

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(config.learning_rate, model, grads);

        state.alpha = next_alpha(state.alpha, config.alpha_increment, config.alpha_max());
        state.grey_fraction = grey_fraction(&density_values);

        let average_density: f64 = density_values.iter().sum::<f64>() / num_elements as f64;
        state.records.push(EpochRecord {
            epoch,
            objective,
            average_density,
        });
        series.write_frame(epoch, &density_values)?;

        if epoch % config.log_interval == 0 {
            bar.println(format!(
                "{epoch:3} objective: {objective:.2}; vf: {average_density:.3}; loss: {loss_value:.5}; grey: {grey:.5}",
                grey = state.grey_fraction,
            ));
        }

        if state.should_stop(config) {
            early_stopped = true;
            bar.println(format!(
                "info: stopping at epoch {epoch}; grey fraction {:.5} is below threshold",
                state.grey_fraction
            ));
            break;
        }
    }
    bar.finish();

    let epochs_completed = state.records.last().map(|r| r.epoch).unwrap_or(0);

    Ok(TrainingOutcome {
        records: state.records,
        epochs_completed,
        early_stopped,
        final_grey_fraction: state.grey_fraction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{MaterialModel, ProblemPreset};
    use std::path::PathBuf;

    fn short_config() -> OptimizationConfig {
        OptimizationConfig {
            problem: ProblemPreset::FixedBeam,
            nelx: 4,
            nely: 2,
            volume_ratio: 0.3,
            penal: 3.0,
            learning_rate: 0.01,
            layers: 2,
            neurons: 4,
            clip_threshold: 0.1,
            min_epochs: 20,
            max_epochs: 500,
            alpha_increment: 0.05,
            grey_threshold: 0.01,
            log_interval: 1,
            material: MaterialModel::default(),
            output_root: PathBuf::from("output"),
        }
    }

    #[test]
    fn alpha_is_monotone_and_capped() {
        let increment = 0.05;
        let alpha_max = 30.0;

        let mut alpha = f64::min(increment, alpha_max);
        for _ in 0..1000 {
            let next = next_alpha(alpha, increment, alpha_max);
            assert!(next >= alpha);
            assert!(next <= alpha_max);
            alpha = next;
        }
        assert!((alpha - alpha_max).abs() < 1e-9);
    }

    #[test]
    fn oversized_increment_clamps_to_the_cap() {
        let increment = 50.0;
        let alpha_max = 30.0;

        let mut alpha = f64::min(increment, alpha_max);
        assert_eq!(alpha, alpha_max);

        alpha = next_alpha(alpha, increment, alpha_max);
        assert_eq!(alpha, alpha_max);
    }

    #[test]
    fn grey_fraction_uses_strict_bounds() {
        let densities = vec![0.05, 0.5, 0.95, 1.0, 0.0];
        assert!((grey_fraction(&densities) - 0.2).abs() < 1e-12);

        assert_eq!(grey_fraction(&[]), 0.0);
        assert_eq!(grey_fraction(&[0.051, 0.949]), 1.0);
    }

    #[test]
    fn stop_gate_respects_minimum_epochs() {
        let config = short_config();

        let mut state = TrainingState {
            epoch: 5,
            alpha: 0.05,
            grey_fraction: 0.0,
            records: Vec::new(),
        };
        assert!(!state.should_stop(&config));

        state.epoch = 20;
        assert!(state.should_stop(&config));

        state.grey_fraction = 0.5;
        assert!(!state.should_stop(&config));
    }
}
