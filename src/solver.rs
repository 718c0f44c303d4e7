use crate::{
    datatypes::{Element, MaterialModel, Node},
    error::TaeniteError,
    mesher::Mesh,
};
use indicatif::ProgressBar;
use nalgebra::{matrix, DVector, SMatrix, SVector};
use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix, factorization::CscCholesky};

pub const DOF: usize = 2;

/// Calculates the area of the element
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
///
/// # Returns
/// The signed area of the element; positive for counter-clockwise winding
pub fn compute_element_area(element: &Element, nodes: &[Node]) -> f64 {
    let v0 = &nodes[element.nodes[0]].vertex;
    let v1 = &nodes[element.nodes[1]].vertex;
    let v2 = &nodes[element.nodes[2]].vertex;

    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Calculates the strain-displacement matrix of the element
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
/// * `element_area` - The area of the element
///
/// # Returns
/// A 3x6 strain-displacement matrix
pub fn compute_strain_displacement_matrix(
    element: &Element,
    nodes: &[Node],
    element_area: f64,
) -> SMatrix<f64, 3, 6> {
    let v0 = &nodes[element.nodes[0]].vertex;
    let v1 = &nodes[element.nodes[1]].vertex;
    let v2 = &nodes[element.nodes[2]].vertex;

    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut strain_displacement_mat: SMatrix<f64, 3, 6> = matrix![
        beta_1, 0., beta_2, 0., beta_3, 0.;
        0., gamma_1, 0., gamma_2, 0., gamma_3;
        gamma_1, beta_1, gamma_2, beta_2, gamma_3, beta_3;
    ];

    strain_displacement_mat /= 2.0 * element_area;

    strain_displacement_mat
}

/// Calculates the stress-strain matrix from the Lame constants
///
/// # Arguments
/// * `material` - The material model
///
/// # Returns
/// A 3x3 stress-strain matrix acting on `[exx, eyy, gxy]`
pub fn compute_stress_strain_matrix(material: &MaterialModel) -> SMatrix<f64, 3, 3> {
    let mu = material.mu;
    let lambda = material.lambda;

    matrix![
        lambda + 2.0 * mu, lambda, 0.0;
        lambda, lambda + 2.0 * mu, 0.0;
        0.0, 0.0, mu;
    ]
}

/// Computes the stiffness matrix for a given element at unit density
///
/// # Arguments
/// * `element` - The element to target
/// * `nodes` - A reference to the vector of nodes
/// * `material` - The material model
///
/// # Returns
/// A 6x6 stiffness matrix for the element
fn compute_element_stiffness_matrix(
    element: &Element,
    nodes: &[Node],
    material: &MaterialModel,
) -> SMatrix<f64, 6, 6> {
    let element_area = compute_element_area(element, nodes);
    let stress_strain_mat = compute_stress_strain_matrix(material);
    let strain_displacement_mat = compute_strain_displacement_matrix(element, nodes, element_area);

    (strain_displacement_mat.transpose() * stress_strain_mat)
        * strain_displacement_mat
        * element_area
}

/// The result of one linear solve: the full displacement vector and the
/// per-element strain energy density of the unpenalized material.
#[derive(Debug)]
pub struct FeSolution {
    pub displacements: DVector<f64>,
    pub energy_densities: Vec<f64>,
}

/// A finite element model with its topology fixed at construction. Element
/// stiffness blocks, the free/prescribed partition, and the load vector are
/// computed once; every call to [`FeModel::solve`] reassembles only the
/// density-scaled global matrix.
pub struct FeModel {
    element_stiffness: Vec<SMatrix<f64, 6, 6>>,
    element_dofs: Vec<[usize; 6]>,
    strain_displacement: Vec<SMatrix<f64, 3, 6>>,
    stress_strain: SMatrix<f64, 3, 3>,
    areas: Vec<f64>,
    free_index: Vec<Option<usize>>,
    num_free: usize,
    prescribed: Vec<f64>,
    loads: DVector<f64>,
}

impl FeModel {
    /// Builds the model from a meshed and constrained domain.
    ///
    /// # Arguments
    /// * `mesh` - The mesh, with boundary conditions applied to its nodes
    /// * `material` - The material model
    ///
    /// # Returns
    /// The model, or an error for an empty or fully-constrained mesh
    pub fn new(mesh: &Mesh, material: &MaterialModel) -> Result<FeModel, TaeniteError> {
        if mesh.elements.is_empty() {
            return Err(TaeniteError::Solver(
                "Cannot build a model without elements".to_string(),
            ));
        }

        let num_dofs = DOF * mesh.nodes.len();

        // Partition DOFs into free and prescribed
        let mut free_index: Vec<Option<usize>> = vec![None; num_dofs];
        let mut prescribed: Vec<f64> = vec![0.0; num_dofs];
        let mut num_free: usize = 0;

        for (i, node) in mesh.nodes.iter().enumerate() {
            for (axis, value) in [node.ux, node.uy].into_iter().enumerate() {
                let dof = DOF * i + axis;
                match value {
                    Some(u) => prescribed[dof] = u,
                    None => {
                        free_index[dof] = Some(num_free);
                        num_free += 1;
                    }
                }
            }
        }

        if num_free == 0 {
            return Err(TaeniteError::Solver(
                "Every degree of freedom is prescribed; nothing to solve".to_string(),
            ));
        }

        let mut loads: DVector<f64> = DVector::zeros(num_dofs);
        for (i, node) in mesh.nodes.iter().enumerate() {
            loads[DOF * i] = node.fx;
            loads[DOF * i + 1] = node.fy;
        }

        // Build per-element stiffness blocks at unit density
        println!("info: building element stiffness matrices...");
        let stress_strain = compute_stress_strain_matrix(material);

        let mut element_stiffness: Vec<SMatrix<f64, 6, 6>> =
            Vec::with_capacity(mesh.elements.len());
        let mut element_dofs: Vec<[usize; 6]> = Vec::with_capacity(mesh.elements.len());
        let mut strain_displacement: Vec<SMatrix<f64, 3, 6>> =
            Vec::with_capacity(mesh.elements.len());
        let mut areas: Vec<f64> = Vec::with_capacity(mesh.elements.len());

        let bar = ProgressBar::new(mesh.elements.len() as u64);
        for element in &mesh.elements {
            bar.inc(1);

            let area = compute_element_area(element, &mesh.nodes);
            if area <= 0.0 {
                return Err(TaeniteError::Solver(format!(
                    "Element {:?} has non-positive area {}",
                    element.nodes, area
                )));
            }

            element_stiffness.push(compute_element_stiffness_matrix(
                element,
                &mesh.nodes,
                material,
            ));
            strain_displacement.push(compute_strain_displacement_matrix(
                element,
                &mesh.nodes,
                area,
            ));
            areas.push(area);

            let [n0, n1, n2] = element.nodes;
            element_dofs.push([
                DOF * n0,
                DOF * n0 + 1,
                DOF * n1,
                DOF * n1 + 1,
                DOF * n2,
                DOF * n2 + 1,
            ]);
        }
        bar.finish_with_message(format!(
            "info: successfully built {} stiffness matrices\n",
            mesh.elements.len()
        ));

        Ok(FeModel {
            element_stiffness,
            element_dofs,
            strain_displacement,
            stress_strain,
            areas,
            free_index,
            num_free,
            prescribed,
            loads,
        })
    }

    /// Solves the linear elastic system for one density field.
    ///
    /// Element stiffness is scaled by `density^penal`. The reduced system
    /// over the free DOFs is assembled sparse and factored with a direct
    /// Cholesky decomposition; iterative solvers stall on the near-singular
    /// systems that low-density regions produce.
    ///
    /// # Arguments
    /// * `densities` - One density per element, in element order
    /// * `penal` - The penalization exponent
    ///
    /// # Returns
    /// The full displacement vector and per-element strain energy densities
    pub fn solve(&self, densities: &[f64], penal: f64) -> Result<FeSolution, TaeniteError> {
        if densities.len() != self.element_stiffness.len() {
            return Err(TaeniteError::Solver(format!(
                "Expected {} densities, got {}",
                self.element_stiffness.len(),
                densities.len()
            )));
        }

        // Reduced right-hand side: external loads on the free DOFs, corrected
        // for prescribed non-zero displacements
        let mut rhs: Vec<f64> = vec![0.0; self.num_free];
        for (dof, slot) in self.free_index.iter().enumerate() {
            if let Some(slot) = slot {
                rhs[*slot] = self.loads[dof];
            }
        }

        let mut stiffness_coo: CooMatrix<f64> = CooMatrix::new(self.num_free, self.num_free);

        for (e, (stiffness, dofs)) in
            std::iter::zip(&self.element_stiffness, &self.element_dofs).enumerate()
        {
            let scale = densities[e].powf(penal);

            for (local_row, &dof_row) in dofs.iter().enumerate() {
                let free_row = match self.free_index[dof_row] {
                    Some(row) => row,
                    None => continue,
                };

                for (local_col, &dof_col) in dofs.iter().enumerate() {
                    let value = scale * stiffness[(local_row, local_col)];

                    match self.free_index[dof_col] {
                        Some(free_col) => stiffness_coo.push(free_row, free_col, value),
                        None => {
                            let u_prescribed = self.prescribed[dof_col];
                            if u_prescribed != 0.0 {
                                rhs[free_row] -= value * u_prescribed;
                            }
                        }
                    }
                }
            }
        }

        let stiffness_csc = CscMatrix::from(&stiffness_coo);
        let rhs = DVector::from_vec(rhs);

        let factorization = match CscCholesky::factor(&stiffness_csc) {
            Ok(f) => f,
            Err(err) => {
                return Err(TaeniteError::Solver(format!(
                    "Failed to factor the global stiffness matrix: {err:?}"
                )));
            }
        };
        let free_displacements = factorization.solve(&rhs);

        // Scatter into the full displacement vector
        let mut displacements: DVector<f64> = DVector::zeros(self.free_index.len());
        for (dof, slot) in self.free_index.iter().enumerate() {
            displacements[dof] = match slot {
                Some(slot) => free_displacements[(*slot, 0)],
                None => self.prescribed[dof],
            };
        }

        // Per-element strain energy density of the unpenalized material
        let mut energy_densities: Vec<f64> = Vec::with_capacity(self.element_dofs.len());
        for (dofs, b_matrix) in std::iter::zip(&self.element_dofs, &self.strain_displacement) {
            let mut element_displacements: SVector<f64, 6> = SVector::zeros();
            for (local, &dof) in dofs.iter().enumerate() {
                element_displacements[local] = displacements[dof];
            }

            let strain = b_matrix * element_displacements;
            energy_densities.push(0.5 * strain.dot(&(self.stress_strain * strain)));
        }

        Ok(FeSolution {
            displacements,
            energy_densities,
        })
    }

    /// Element volumes (areas at unit thickness), in element order.
    pub fn element_volumes(&self) -> &[f64] {
        &self.areas
    }

    pub fn total_volume(&self) -> f64 {
        self.areas.iter().sum()
    }

    pub fn num_free_dofs(&self) -> usize {
        self.num_free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Vertex;
    use crate::mesher::Mesh;

    fn unit_triangle() -> (Vec<Node>, Element) {
        let make_node = |x: f64, y: f64| Node {
            vertex: Vertex { x, y },
            ux: None,
            uy: None,
            fx: 0.0,
            fy: 0.0,
        };

        (
            vec![
                make_node(0.0, 0.0),
                make_node(1.0, 0.0),
                make_node(0.0, 1.0),
            ],
            Element { nodes: [0, 1, 2] },
        )
    }

    #[test]
    fn unit_triangle_area() {
        let (nodes, element) = unit_triangle();
        assert!((compute_element_area(&element, &nodes) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn unit_triangle_strain_displacement_entries() {
        let (nodes, element) = unit_triangle();
        let b = compute_strain_displacement_matrix(&element, &nodes, 0.5);

        assert!((b[(0, 0)] - -1.0).abs() < 1e-12);
        assert!((b[(0, 2)] - 1.0).abs() < 1e-12);
        assert!((b[(0, 4)] - 0.0).abs() < 1e-12);
        assert!((b[(1, 1)] - -1.0).abs() < 1e-12);
        assert!((b[(1, 5)] - 1.0).abs() < 1e-12);
        assert!((b[(2, 0)] - -1.0).abs() < 1e-12);
        assert!((b[(2, 1)] - -1.0).abs() < 1e-12);
        assert!((b[(2, 3)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stress_strain_matrix_from_lame_constants() {
        let material = MaterialModel {
            mu: 0.3,
            lambda: 0.6,
        };
        let d = compute_stress_strain_matrix(&material);

        assert!((d[(0, 0)] - 1.2).abs() < 1e-12);
        assert!((d[(0, 1)] - 0.6).abs() < 1e-12);
        assert!((d[(1, 1)] - 1.2).abs() < 1e-12);
        assert!((d[(2, 2)] - 0.3).abs() < 1e-12);
        assert!((d[(0, 2)]).abs() < 1e-12);
    }

    /// Pins the two bottom corners of a 2x2 mesh and hangs a unit load from
    /// the top edge's middle node.
    fn corner_pinned_mesh() -> Mesh {
        let mut mesh = Mesh::rectangle(2, 2).unwrap();

        for node in mesh.nodes.iter_mut() {
            let v = node.vertex;
            if v.y == 0.0 && (v.x == 0.0 || v.x == 2.0) {
                node.ux = Some(0.0);
                node.uy = Some(0.0);
            }
            if v.y == 2.0 && v.x == 1.0 {
                node.fy = -1.0;
            }
        }

        mesh
    }

    #[test]
    fn load_work_matches_internal_energy() {
        let mesh = corner_pinned_mesh();
        let model = FeModel::new(&mesh, &MaterialModel::default()).unwrap();

        let densities = vec![0.3, 0.6, 0.9, 1.0, 0.5, 0.4, 0.8, 0.7];
        let penal = 3.0;
        let solution = model.solve(&densities, penal).unwrap();

        let external_work: f64 = std::iter::zip(model.loads.iter(), solution.displacements.iter())
            .map(|(f, u)| f * u)
            .sum();
        let internal_energy: f64 =
            std::iter::zip(&densities, std::iter::zip(&model.areas, &solution.energy_densities))
                .map(|(rho, (area, psi))| rho.powf(penal) * 2.0 * area * psi)
                .sum();

        assert!(external_work > 0.0);
        assert!((external_work - internal_energy).abs() < 1e-10 * external_work.abs());
        assert!(solution.energy_densities.iter().all(|psi| *psi >= 0.0));

        // the loaded node sags
        let loaded_node = mesh
            .nodes
            .iter()
            .position(|n| n.vertex.x == 1.0 && n.vertex.y == 2.0)
            .unwrap();
        assert!(solution.displacements[DOF * loaded_node + 1] < 0.0);
    }

    #[test]
    fn solve_is_deterministic() {
        let mesh = corner_pinned_mesh();
        let model = FeModel::new(&mesh, &MaterialModel::default()).unwrap();

        // 9 nodes, two fully pinned
        assert_eq!(model.num_free_dofs(), 14);
        assert!((model.total_volume() - 4.0).abs() < 1e-12);

        let densities = vec![0.5; 8];

        let first = model.solve(&densities, 3.0).unwrap();
        let second = model.solve(&densities, 3.0).unwrap();

        assert_eq!(first.displacements, second.displacements);
        assert_eq!(first.energy_densities, second.energy_densities);
    }

    #[test]
    fn prescribed_linear_field_is_reproduced_exactly() {
        // u = (0.1 x, 0) on the whole boundary must propagate through the
        // interior unchanged and give a uniform strain state
        let mut mesh = Mesh::rectangle(2, 2).unwrap();
        for node in mesh.nodes.iter_mut() {
            let v = node.vertex;
            if v.x == 0.0 || v.x == 2.0 || v.y == 0.0 || v.y == 2.0 {
                node.ux = Some(0.1 * v.x);
                node.uy = Some(0.0);
            }
        }

        let model = FeModel::new(&mesh, &MaterialModel::default()).unwrap();
        let solution = model.solve(&vec![1.0; 8], 3.0).unwrap();

        for (i, node) in mesh.nodes.iter().enumerate() {
            assert!((solution.displacements[DOF * i] - 0.1 * node.vertex.x).abs() < 1e-10);
            assert!(solution.displacements[DOF * i + 1].abs() < 1e-10);
        }

        // exx = 0.1: psi = (lambda/2 + mu) * exx^2 = 0.006
        for psi in &solution.energy_densities {
            assert!((psi - 0.006).abs() < 1e-12);
        }
    }

    #[test]
    fn void_density_field_fails_to_factor() {
        let mesh = corner_pinned_mesh();
        let model = FeModel::new(&mesh, &MaterialModel::default()).unwrap();

        assert!(model.solve(&vec![0.0; 8], 3.0).is_err());
    }

    #[test]
    fn density_count_mismatch_is_rejected() {
        let mesh = corner_pinned_mesh();
        let model = FeModel::new(&mesh, &MaterialModel::default()).unwrap();

        assert!(model.solve(&vec![0.5; 3], 3.0).is_err());
    }

    #[test]
    fn fully_prescribed_mesh_is_rejected() {
        let mut mesh = Mesh::rectangle(2, 1).unwrap();
        for node in mesh.nodes.iter_mut() {
            node.ux = Some(0.0);
            node.uy = Some(0.0);
        }

        assert!(FeModel::new(&mesh, &MaterialModel::default()).is_err());
    }
}
