use std::path::PathBuf;

use crate::error::TaeniteError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub vertex: Vertex,
    pub ux: Option<f64>,
    pub uy: Option<f64>,
    pub fx: f64,
    pub fy: f64,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub nodes: [usize; 3],
}

/// An edge of the mesh boundary, referenced by its two endpoint nodes.
#[derive(Debug, Clone)]
pub struct BoundaryFacet {
    pub nodes: [usize; 2],
}

/// Axis-aligned box used to select nodes and facets. Bounds are inclusive;
/// node coordinates are exact integers, so equality selection is safe.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryRegion {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for BoundaryRegion {
    fn default() -> Self {
        BoundaryRegion {
            x_min: f64::MIN,
            x_max: f64::MAX,
            y_min: f64::MIN,
            y_max: f64::MAX,
        }
    }
}

impl BoundaryRegion {
    pub fn contains(&self, vertex: &Vertex) -> bool {
        vertex.x >= self.x_min
            && vertex.x <= self.x_max
            && vertex.y >= self.y_min
            && vertex.y <= self.y_max
    }
}

/// Prescribes displacements on every node inside a region. `None` leaves the
/// axis free; later rules overwrite earlier ones.
#[derive(Debug, Clone)]
pub struct SupportRule {
    pub name: String,
    pub region: BoundaryRegion,
    pub ux: Option<f64>,
    pub uy: Option<f64>,
}

/// Applies a traction to every boundary facet whose endpoints both lie in a
/// region. The facet load is lumped half-and-half onto its endpoint nodes.
#[derive(Debug, Clone)]
pub struct TractionRule {
    pub name: String,
    pub region: BoundaryRegion,
    pub tx: f64,
    pub ty: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MaterialModel {
    pub mu: f64,
    pub lambda: f64,
}

impl Default for MaterialModel {
    fn default() -> Self {
        MaterialModel {
            mu: 0.3,
            lambda: 0.6,
        }
    }
}

/// Built-in load cases. Regions are in mesh coordinates (unit element size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProblemPreset {
    /// Beam supported near both lower corners, loaded at mid-span
    FixedBeam,
    /// Beam clamped along the left edge, loaded at the right edge mid-height
    Cantilever,
}

impl ProblemPreset {
    pub fn name(&self) -> &'static str {
        match self {
            ProblemPreset::FixedBeam => "fixed_beam",
            ProblemPreset::Cantilever => "cantilever",
        }
    }

    pub fn support_rules(&self, nelx: usize) -> Vec<SupportRule> {
        match self {
            ProblemPreset::FixedBeam => vec![
                SupportRule {
                    name: "left_support".to_string(),
                    region: BoundaryRegion {
                        x_max: 2.0,
                        y_min: 0.0,
                        y_max: 0.0,
                        ..Default::default()
                    },
                    ux: Some(0.0),
                    uy: Some(0.0),
                },
                SupportRule {
                    name: "right_support".to_string(),
                    region: BoundaryRegion {
                        x_min: nelx as f64 - 2.0,
                        y_min: 0.0,
                        y_max: 0.0,
                        ..Default::default()
                    },
                    ux: Some(0.0),
                    uy: Some(0.0),
                },
            ],
            ProblemPreset::Cantilever => vec![SupportRule {
                name: "wall_support".to_string(),
                region: BoundaryRegion {
                    x_min: 0.0,
                    x_max: 0.0,
                    ..Default::default()
                },
                ux: Some(0.0),
                uy: Some(0.0),
            }],
        }
    }

    pub fn traction_rules(&self, nelx: usize, nely: usize) -> Vec<TractionRule> {
        match self {
            ProblemPreset::FixedBeam => {
                let mid = nelx as f64 / 2.0;
                vec![TractionRule {
                    name: "midspan_load".to_string(),
                    region: BoundaryRegion {
                        x_min: mid - 1.0,
                        x_max: mid + 1.0,
                        y_min: 0.0,
                        y_max: 0.0,
                        ..Default::default()
                    },
                    tx: 0.0,
                    ty: -1.0,
                }]
            }
            ProblemPreset::Cantilever => {
                let mid = nely as f64 / 2.0;
                vec![TractionRule {
                    name: "tip_load".to_string(),
                    region: BoundaryRegion {
                        x_min: nelx as f64,
                        x_max: nelx as f64,
                        y_min: mid - 1.0,
                        y_max: mid + 1.0,
                        ..Default::default()
                    },
                    tx: 0.0,
                    ty: -1.0,
                }]
            }
        }
    }
}

/// Everything a run needs, validated before any stage starts.
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub problem: ProblemPreset,
    pub nelx: usize,
    pub nely: usize,
    pub volume_ratio: f64,
    pub penal: f64,
    pub learning_rate: f64,
    pub layers: usize,
    pub neurons: usize,
    pub clip_threshold: f64,
    pub min_epochs: usize,
    pub max_epochs: usize,
    pub alpha_increment: f64,
    pub grey_threshold: f64,
    pub log_interval: usize,
    pub material: MaterialModel,
    pub output_root: PathBuf,
}

impl OptimizationConfig {
    /// Ceiling of the volume-penalty weight. Scales with the volume target so
    /// the penalty term ends up comparable across targets.
    pub fn alpha_max(&self) -> f64 {
        100.0 * self.volume_ratio
    }

    pub fn validate(&self) -> Result<(), TaeniteError> {
        if self.nelx < 2 || self.nely < 1 {
            return Err(TaeniteError::Input(format!(
                "Mesh must be at least 2x1 elements, got {}x{}",
                self.nelx, self.nely
            )));
        }
        if !self.volume_ratio.is_finite() || self.volume_ratio <= 0.0 || self.volume_ratio >= 1.0 {
            return Err(TaeniteError::Input(format!(
                "Volume ratio must lie strictly between 0 and 1, got {}",
                self.volume_ratio
            )));
        }
        if !self.penal.is_finite() || self.penal <= 0.0 {
            return Err(TaeniteError::Input(format!(
                "Penalization exponent must be positive, got {}",
                self.penal
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TaeniteError::Input(format!(
                "Learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.layers == 0 || self.neurons == 0 {
            return Err(TaeniteError::Input(format!(
                "Network needs at least one hidden layer and one neuron, got {} layers of {}",
                self.layers, self.neurons
            )));
        }
        if !self.clip_threshold.is_finite() || self.clip_threshold <= 0.0 {
            return Err(TaeniteError::Input(format!(
                "Gradient clipping threshold must be positive, got {}",
                self.clip_threshold
            )));
        }
        if self.max_epochs == 0 {
            return Err(TaeniteError::Input(
                "Maximum epoch count must be at least 1".to_string(),
            ));
        }
        if !self.alpha_increment.is_finite() || self.alpha_increment <= 0.0 {
            return Err(TaeniteError::Input(format!(
                "Penalty increment must be positive, got {}",
                self.alpha_increment
            )));
        }
        if !self.grey_threshold.is_finite() || self.grey_threshold < 0.0 || self.grey_threshold > 1.0
        {
            return Err(TaeniteError::Input(format!(
                "Grey-element threshold must lie in [0, 1], got {}",
                self.grey_threshold
            )));
        }
        if self.log_interval == 0 {
            return Err(TaeniteError::Input(
                "Log interval must be at least 1".to_string(),
            ));
        }
        if !self.material.mu.is_finite() || self.material.mu <= 0.0 {
            return Err(TaeniteError::Input(format!(
                "Shear modulus must be positive, got {}",
                self.material.mu
            )));
        }
        if !self.material.lambda.is_finite() || self.material.lambda < 0.0 {
            return Err(TaeniteError::Input(format!(
                "First Lame constant must be non-negative, got {}",
                self.material.lambda
            )));
        }

        Ok(())
    }
}

/// One row of the training history.
#[derive(Debug, Clone)]
pub struct EpochRecord {
    pub epoch: usize,
    pub objective: f64,
    pub average_density: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> OptimizationConfig {
        OptimizationConfig {
            problem: ProblemPreset::FixedBeam,
            nelx: 180,
            nely: 60,
            volume_ratio: 0.3,
            penal: 3.0,
            learning_rate: 0.01,
            layers: 5,
            neurons: 20,
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
    fn default_config_is_valid() {
        assert!(base_config().validate().is_ok());
        assert_eq!(base_config().alpha_max(), 30.0);
    }

    #[test]
    fn bad_configs_are_rejected() {
        let mut config = base_config();
        config.nelx = 1;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.volume_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.volume_ratio = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.layers = 0;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.max_epochs = 0;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.log_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn region_bounds_are_inclusive() {
        let region = BoundaryRegion {
            x_max: 2.0,
            y_min: 0.0,
            y_max: 0.0,
            ..Default::default()
        };

        assert!(region.contains(&Vertex { x: 2.0, y: 0.0 }));
        assert!(region.contains(&Vertex { x: 0.0, y: 0.0 }));
        assert!(!region.contains(&Vertex { x: 2.5, y: 0.0 }));
        assert!(!region.contains(&Vertex { x: 1.0, y: 1.0 }));
    }

    #[test]
    fn fixed_beam_regions_follow_mesh_width() {
        let supports = ProblemPreset::FixedBeam.support_rules(180);
        assert_eq!(supports.len(), 2);
        assert!(supports[1].region.contains(&Vertex { x: 178.0, y: 0.0 }));
        assert!(!supports[1].region.contains(&Vertex { x: 177.0, y: 0.0 }));

        let tractions = ProblemPreset::FixedBeam.traction_rules(180, 60);
        assert_eq!(tractions.len(), 1);
        assert!(tractions[0].region.contains(&Vertex { x: 89.0, y: 0.0 }));
        assert!(tractions[0].region.contains(&Vertex { x: 91.0, y: 0.0 }));
        assert!(!tractions[0].region.contains(&Vertex { x: 92.0, y: 0.0 }));
    }
}
