use burn::{
    module::Module,
    nn::{Initializer, Linear, LinearConfig, Tanh},
    prelude::Backend,
    tensor::{activation::softmax, Tensor},
};

/// Coordinate dimension of the density field.
pub const INPUT_DIM: usize = 2;

/// Maps element centroids to material densities.
///
/// A stack of Tanh hidden layers feeds a two-logit output whose softmax
/// gives the material/void split per element; the density is the material
/// column, so every prediction lies in (0, 1) by construction.
#[derive(Module, Debug)]
pub struct DensityNet<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Tanh,
}

impl<B: Backend> DensityNet<B> {
    /// Builds the network with Xavier-normal initialized weights.
    ///
    /// # Arguments
    /// * `layers` - Number of hidden layers
    /// * `neurons` - Units per hidden layer
    /// * `device` - The backend device to allocate parameters on
    pub fn new(layers: usize, neurons: usize, device: &B::Device) -> Self {
        let initializer = Initializer::XavierNormal { gain: 1.0 };

        let mut hidden: Vec<Linear<B>> = Vec::with_capacity(layers);
        let mut inputs = INPUT_DIM;
        for _ in 0..layers {
            hidden.push(
                LinearConfig::new(inputs, neurons)
                    .with_initializer(initializer.clone())
                    .init(device),
            );
            inputs = neurons;
        }

        let output = LinearConfig::new(inputs, 2)
            .with_initializer(initializer)
            .init(device);

        Self {
            hidden,
            output,
            activation: Tanh::new(),
        }
    }

    /// Predicts one density per input coordinate pair.
    pub fn forward(&self, coordinates: Tensor<B, 2>) -> Tensor<B, 1> {
        let count = coordinates.dims()[0];

        let mut x = coordinates;
        for layer in &self.hidden {
            x = self.activation.forward(layer.forward(x));
        }
        let logits = self.output.forward(x);

        softmax(logits, 1).slice([0..count, 0..1]).squeeze(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn forward_values(model: &DensityNet<TestBackend>, coords: &[f32]) -> Vec<f32> {
        let device = Default::default();
        let count = coords.len() / INPUT_DIM;
        let input =
            Tensor::<TestBackend, 1>::from_floats(coords, &device).reshape([count, INPUT_DIM]);

        model.forward(input).into_data().to_vec().unwrap()
    }

    #[test]
    fn densities_stay_in_unit_interval() {
        let device = Default::default();
        let model: DensityNet<TestBackend> = DensityNet::new(3, 8, &device);

        // includes coordinates far outside the normalized domain
        let coords: Vec<f32> = vec![-1.0, -1.0, 0.0, 0.0, 1.0, 1.0, 25.0, -40.0];
        let densities = forward_values(&model, &coords);

        assert_eq!(densities.len(), 4);
        for rho in densities {
            assert!(rho.is_finite());
            assert!((0.0..=1.0).contains(&rho));
        }
    }

    #[test]
    fn forward_is_deterministic_for_fixed_weights() {
        let device = Default::default();
        let model: DensityNet<TestBackend> = DensityNet::new(5, 20, &device);

        let coords: Vec<f32> = vec![-0.5, 0.25, 0.75, -0.1, 0.0, 0.9];
        let first = forward_values(&model, &coords);
        let second = forward_values(&model, &coords);

        assert_eq!(first, second);
    }

    #[test]
    fn single_hidden_layer_network_builds() {
        let device = Default::default();
        let model: DensityNet<TestBackend> = DensityNet::new(1, 4, &device);

        let densities = forward_values(&model, &[0.0, 0.0]);
        assert_eq!(densities.len(), 1);
    }
}
