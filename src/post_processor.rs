use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde_derive::Serialize;
use vtkio::model::*;

use crate::{
    datatypes::{EpochRecord, OptimizationConfig},
    error::TaeniteError,
    mesher::Mesh,
    solver::DOF,
    trainer::TrainingOutcome,
};

/// Creates the timestamped directory that receives every artifact of one run.
///
/// The layout is `<output_root>/<problem>/<YYYY-MM-DD_HH-MM-SS>/`. When two
/// runs land on the same second, a numeric suffix keeps them apart.
///
/// # Arguments
/// * `output_root` - Root of all run output
/// * `problem_name` - Subdirectory for the load case
///
/// # Returns
/// The created run directory
pub fn create_run_directory(
    output_root: &Path,
    problem_name: &str,
) -> Result<PathBuf, TaeniteError> {
    let parent = output_root.join(problem_name);
    if let Err(err) = std::fs::create_dir_all(&parent) {
        return Err(TaeniteError::PostProcessor(format!(
            "Failed to create output directory {}: {err}",
            parent.display()
        )));
    }

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut run_directory = parent.join(&timestamp);
    let mut suffix: usize = 0;

    loop {
        match std::fs::create_dir(&run_directory) {
            Ok(()) => break,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                suffix += 1;
                run_directory = parent.join(format!("{timestamp}-{suffix}"));
            }
            Err(err) => {
                return Err(TaeniteError::PostProcessor(format!(
                    "Failed to create run directory {}: {err}",
                    run_directory.display()
                )));
            }
        }
    }

    println!("info: writing run artifacts to {}", run_directory.display());

    Ok(run_directory)
}

/// Writes the per-epoch density fields as a series of legacy VTK files plus
/// a ParaView collection index, so a run opens as an animation.
pub struct DensitySeriesWriter {
    directory: PathBuf,
    points: Vec<f64>,
    cell_vertices: Vec<u32>,
    num_cells: u32,
    frames: Vec<(usize, String)>,
}

impl DensitySeriesWriter {
    pub fn new(directory: &Path, mesh: &Mesh) -> DensitySeriesWriter {
        let mut points: Vec<f64> = Vec::with_capacity(3 * mesh.nodes.len());
        for node in &mesh.nodes {
            points.push(node.vertex.x);
            points.push(node.vertex.y);
            points.push(0.0);
        }

        let mut cell_vertices: Vec<u32> = Vec::with_capacity(4 * mesh.elements.len());
        for element in &mesh.elements {
            cell_vertices.push(3);
            for &node in &element.nodes {
                cell_vertices.push(node as u32);
            }
        }

        DensitySeriesWriter {
            directory: directory.to_path_buf(),
            points,
            cell_vertices,
            num_cells: mesh.elements.len() as u32,
            frames: Vec::new(),
        }
    }

    /// Writes one density field as `density_NNNN.vtk`.
    ///
    /// # Arguments
    /// * `epoch` - The epoch the field belongs to; also its timestep in the
    ///   collection index
    /// * `densities` - One density per element, in element order
    pub fn write_frame(&mut self, epoch: usize, densities: &[f64]) -> Result<(), TaeniteError> {
        let filename = format!("density_{epoch:04}.vtk");

        let vtk = Vtk {
            version: Version { major: 4, minor: 2 },
            byte_order: ByteOrder::BigEndian,
            title: format!("density field at epoch {epoch}"),
            file_path: None,
            data: DataSet::inline(UnstructuredGridPiece {
                points: IOBuffer::F64(self.points.clone()),
                cells: Cells {
                    cell_verts: VertexNumbers::Legacy {
                        num_cells: self.num_cells,
                        vertices: self.cell_vertices.clone(),
                    },
                    types: vec![CellType::Triangle; self.num_cells as usize],
                },
                data: Attributes {
                    cell: vec![Attribute::scalars("density", 1).with_data(densities.to_vec())],
                    ..Default::default()
                },
            }),
        };

        if let Err(err) = vtk.export_ascii(self.directory.join(&filename)) {
            return Err(TaeniteError::PostProcessor(format!(
                "Failed to write density frame {filename}: {err:?}"
            )));
        }

        self.frames.push((epoch, filename));

        Ok(())
    }

    /// Writes `density.pvd`, the collection index over every frame written
    /// so far.
    pub fn finalize(&self) -> Result<PathBuf, TaeniteError> {
        let xml_error =
            |err| TaeniteError::PostProcessor(format!("Failed to build collection index: {err:?}"));

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
            .map_err(xml_error)?;

        let mut root = BytesStart::new("VTKFile");
        root.push_attribute(("type", "Collection"));
        root.push_attribute(("version", "0.1"));
        root.push_attribute(("byte_order", "LittleEndian"));
        writer.write_event(Event::Start(root)).map_err(xml_error)?;
        writer
            .write_event(Event::Start(BytesStart::new("Collection")))
            .map_err(xml_error)?;

        for (epoch, filename) in &self.frames {
            let timestep = epoch.to_string();
            let mut dataset = BytesStart::new("DataSet");
            dataset.push_attribute(("timestep", timestep.as_str()));
            dataset.push_attribute(("part", "0"));
            dataset.push_attribute(("file", filename.as_str()));
            writer.write_event(Event::Empty(dataset)).map_err(xml_error)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("Collection")))
            .map_err(xml_error)?;
        writer
            .write_event(Event::End(BytesEnd::new("VTKFile")))
            .map_err(xml_error)?;

        let path = self.directory.join("density.pvd");
        if let Err(err) = std::fs::write(&path, writer.into_inner()) {
            return Err(TaeniteError::PostProcessor(format!(
                "Failed to write collection index: {err}"
            )));
        }

        println!(
            "info: wrote {} density frames and collection index to {}",
            self.frames.len(),
            self.directory.display()
        );

        Ok(path)
    }
}

/// Writes the training history to a CSV file
///
/// # Arguments
/// * `records` - The per-epoch training records
/// * `directory` - The run directory
///
/// # Returns
/// The path of the written file
pub fn csv_output(records: &[EpochRecord], directory: &Path) -> Result<PathBuf, TaeniteError> {
    let path = directory.join("training_data.csv");

    let mut file = match std::fs::File::create(&path) {
        Ok(f) => f,
        Err(err) => {
            return Err(TaeniteError::PostProcessor(format!(
                "Failed to create training_data.csv: {err}"
            )));
        }
    };

    file.write("epoch,objective,average_density\n".as_bytes())
        .unwrap();
    for record in records {
        file.write(
            format!(
                "{epoch},{objective},{average_density}\n",
                epoch = record.epoch,
                objective = record.objective,
                average_density = record.average_density,
            )
            .as_bytes(),
        )
        .unwrap();
    }

    println!("info: wrote training history to {}", path.display());

    Ok(path)
}

#[derive(Debug, Serialize)]
pub struct RunMetadata {
    pub problem: String,
    pub dimension: usize,
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
    pub alpha_max: f64,
    pub grey_threshold: f64,
    pub mu: f64,
    pub lambda: f64,
    pub epochs_completed: usize,
    pub early_stopped: bool,
    pub elapsed: String,
}

/// Writes the run configuration and outcome to `metadata.json`
///
/// # Arguments
/// * `config` - The run configuration
/// * `outcome` - The training outcome
/// * `elapsed` - Wall time of the run, already formatted
/// * `directory` - The run directory
///
/// # Returns
/// The path of the written file
pub fn write_metadata(
    config: &OptimizationConfig,
    outcome: &TrainingOutcome,
    elapsed: &str,
    directory: &Path,
) -> Result<PathBuf, TaeniteError> {
    let metadata = RunMetadata {
        problem: config.problem.name().to_string(),
        dimension: DOF,
        nelx: config.nelx,
        nely: config.nely,
        volume_ratio: config.volume_ratio,
        penal: config.penal,
        learning_rate: config.learning_rate,
        layers: config.layers,
        neurons: config.neurons,
        clip_threshold: config.clip_threshold,
        min_epochs: config.min_epochs,
        max_epochs: config.max_epochs,
        alpha_increment: config.alpha_increment,
        alpha_max: config.alpha_max(),
        grey_threshold: config.grey_threshold,
        mu: config.material.mu,
        lambda: config.material.lambda,
        epochs_completed: outcome.epochs_completed,
        early_stopped: outcome.early_stopped,
        elapsed: elapsed.to_string(),
    };

    let path = directory.join("metadata.json");
    let file = match std::fs::File::create(&path) {
        Ok(f) => f,
        Err(err) => {
            return Err(TaeniteError::PostProcessor(format!(
                "Failed to create metadata.json: {err}"
            )));
        }
    };

    if let Err(err) = serde_json::to_writer_pretty(file, &metadata) {
        return Err(TaeniteError::PostProcessor(format!(
            "Failed to write metadata.json: {err}"
        )));
    }

    println!("info: wrote run metadata to {}", path.display());

    Ok(path)
}

/// Formats a duration in whole seconds as `HH:MM:SS`. Hours do not wrap.
pub fn format_elapsed(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
