use crate::{
    datatypes::{
        BoundaryFacet, BoundaryRegion, Element, Node, OptimizationConfig, SupportRule,
        TractionRule, Vertex,
    },
    error::TaeniteError,
};

/// A structured triangulation of a `nelx` x `nely` rectangle with unit-size
/// cells. Each cell is split into two triangles along a diagonal that
/// alternates with cell parity, so the pattern has no directional bias.
#[derive(Debug)]
pub struct Mesh {
    pub nelx: usize,
    pub nely: usize,
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
    pub boundary_facets: Vec<BoundaryFacet>,
}

impl Mesh {
    /// Builds the rectangle mesh.
    ///
    /// Nodes sit on the integer grid `[0, nelx] x [0, nely]`, indexed
    /// row-major from the lower-left corner. Every triangle is wound
    /// counter-clockwise and has area exactly 0.5.
    ///
    /// # Arguments
    /// * `nelx` - Number of cells along x
    /// * `nely` - Number of cells along y
    ///
    /// # Returns
    /// The mesh, or a mesher error for an empty rectangle
    pub fn rectangle(nelx: usize, nely: usize) -> Result<Mesh, TaeniteError> {
        if nelx == 0 || nely == 0 {
            return Err(TaeniteError::Mesher(format!(
                "Rectangle mesh must have at least one cell per axis, got {}x{}",
                nelx, nely
            )));
        }

        let mut nodes: Vec<Node> = Vec::with_capacity((nelx + 1) * (nely + 1));
        for iy in 0..=nely {
            for ix in 0..=nelx {
                nodes.push(Node {
                    vertex: Vertex {
                        x: ix as f64,
                        y: iy as f64,
                    },
                    ux: None,
                    uy: None,
                    fx: 0.0,
                    fy: 0.0,
                });
            }
        }

        let mut elements: Vec<Element> = Vec::with_capacity(2 * nelx * nely);
        for iy in 0..nely {
            for ix in 0..nelx {
                let a = node_index(nelx, ix, iy);
                let b = node_index(nelx, ix + 1, iy);
                let c = node_index(nelx, ix + 1, iy + 1);
                let d = node_index(nelx, ix, iy + 1);

                if (ix + iy) % 2 == 0 {
                    elements.push(Element { nodes: [a, b, c] });
                    elements.push(Element { nodes: [a, c, d] });
                } else {
                    elements.push(Element { nodes: [a, b, d] });
                    elements.push(Element { nodes: [b, c, d] });
                }
            }
        }

        let mut boundary_facets: Vec<BoundaryFacet> = Vec::with_capacity(2 * (nelx + nely));
        for ix in 0..nelx {
            boundary_facets.push(BoundaryFacet {
                nodes: [node_index(nelx, ix, 0), node_index(nelx, ix + 1, 0)],
            });
            boundary_facets.push(BoundaryFacet {
                nodes: [node_index(nelx, ix, nely), node_index(nelx, ix + 1, nely)],
            });
        }
        for iy in 0..nely {
            boundary_facets.push(BoundaryFacet {
                nodes: [node_index(nelx, 0, iy), node_index(nelx, 0, iy + 1)],
            });
            boundary_facets.push(BoundaryFacet {
                nodes: [node_index(nelx, nelx, iy), node_index(nelx, nelx, iy + 1)],
            });
        }

        Ok(Mesh {
            nelx,
            nely,
            nodes,
            elements,
            boundary_facets,
        })
    }

    /// Element centroids, in element order.
    pub fn centroids(&self) -> Vec<Vertex> {
        self.elements
            .iter()
            .map(|element| {
                let v0 = &self.nodes[element.nodes[0]].vertex;
                let v1 = &self.nodes[element.nodes[1]].vertex;
                let v2 = &self.nodes[element.nodes[2]].vertex;
                Vertex {
                    x: (v0.x + v1.x + v2.x) / 3.0,
                    y: (v0.y + v1.y + v2.y) / 3.0,
                }
            })
            .collect()
    }

    /// Element centroids mapped affinely onto `[-1, 1]^2`, flattened into
    /// x,y pairs. Raw grid coordinates run into the hundreds and would
    /// saturate a Tanh network, so predictors consume this form.
    pub fn normalized_centroids(&self) -> Vec<f32> {
        let width = self.nelx as f64;
        let height = self.nely as f64;

        let mut coordinates: Vec<f32> = Vec::with_capacity(2 * self.elements.len());
        for centroid in self.centroids() {
            coordinates.push((2.0 * centroid.x / width - 1.0) as f32);
            coordinates.push((2.0 * centroid.y / height - 1.0) as f32);
        }

        coordinates
    }
}

fn node_index(nelx: usize, ix: usize, iy: usize) -> usize {
    iy * (nelx + 1) + ix
}

fn validate_region(name: &str, region: &BoundaryRegion) -> Result<(), TaeniteError> {
    if region.x_min > region.x_max {
        return Err(TaeniteError::Input(format!(
            "Boundary '{name}' has x_min greater than x_max"
        )));
    }
    if region.y_min > region.y_max {
        return Err(TaeniteError::Input(format!(
            "Boundary '{name}' has y_min greater than y_max"
        )));
    }

    Ok(())
}

/// Applies support rules to the nodes.
///
/// A matching rule replaces both displacement axes of the node, so later
/// rules overwrite earlier ones.
///
/// # Arguments
/// * `nodes` - A mutable reference to the vector of nodes
/// * `rules` - The support rules to apply
pub fn apply_supports(nodes: &mut [Node], rules: &[SupportRule]) -> Result<(), TaeniteError> {
    for rule in rules {
        validate_region(&rule.name, &rule.region)?;

        let mut matched: usize = 0;
        for node in nodes.iter_mut() {
            if rule.region.contains(&node.vertex) {
                node.ux = rule.ux;
                node.uy = rule.uy;
                matched += 1;
            }
        }

        if matched == 0 {
            println!("warning [mesh]: support rule '{}' matched no nodes", rule.name);
        }
    }

    Ok(())
}

/// Applies traction rules to the boundary facets, accumulating consistent
/// nodal loads.
///
/// A facet is selected when both of its endpoints lie in the rule's region;
/// each endpoint then receives half the facet's total traction. Facets under
/// several matching rules accumulate every contribution.
///
/// # Arguments
/// * `nodes` - A mutable reference to the vector of nodes
/// * `facets` - The boundary facets of the mesh
/// * `rules` - The traction rules to apply
pub fn apply_tractions(
    nodes: &mut [Node],
    facets: &[BoundaryFacet],
    rules: &[TractionRule],
) -> Result<(), TaeniteError> {
    for rule in rules {
        validate_region(&rule.name, &rule.region)?;

        let mut matched: usize = 0;
        for facet in facets {
            let v0 = nodes[facet.nodes[0]].vertex;
            let v1 = nodes[facet.nodes[1]].vertex;

            if !rule.region.contains(&v0) || !rule.region.contains(&v1) {
                continue;
            }

            let length = f64::sqrt(f64::powi(v1.x - v0.x, 2) + f64::powi(v1.y - v0.y, 2));
            for node_idx in facet.nodes {
                let node = &mut nodes[node_idx];
                node.fx += rule.tx * length / 2.0;
                node.fy += rule.ty * length / 2.0;
            }
            matched += 1;
        }

        if matched == 0 {
            println!(
                "warning [mesh]: traction rule '{}' matched no boundary facets",
                rule.name
            );
        }
    }

    Ok(())
}

/// Runs the mesher: builds the rectangle mesh for the configured problem and
/// applies its boundary conditions.
///
/// # Arguments
/// * `config` - The validated run configuration
///
/// # Returns
/// The mesh, with prescribed displacements and nodal loads in place
pub fn run(config: &OptimizationConfig) -> Result<Mesh, TaeniteError> {
    let mut mesh = Mesh::rectangle(config.nelx, config.nely)?;

    let supports = config.problem.support_rules(config.nelx);
    let tractions = config.problem.traction_rules(config.nelx, config.nely);

    apply_supports(&mut mesh.nodes, &supports)?;
    apply_tractions(&mut mesh.nodes, &mesh.boundary_facets, &tractions)?;

    println!(
        "info: meshed {}x{} rectangle into {} nodes and {} elements ({} supports, {} tractions)",
        config.nelx,
        config.nely,
        mesh.nodes.len(),
        mesh.elements.len(),
        supports.len(),
        tractions.len()
    );

    Ok(mesh)
}
