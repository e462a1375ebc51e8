//! The transformation collaborator: STL mesh in, PNG preview out.
//!
//! [`Renderer`] is the seam the worker depends on. Implementations are
//! synchronous and are never called concurrently with themselves; the worker
//! runs them one at a time on a blocking thread.

pub mod geom;
pub mod raster;
pub mod stl;

use std::path::Path;

use image::ImageFormat;
use thiserror::Error;
use tracing::debug;

pub use raster::Camera;
pub use stl::Mesh;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot read mesh: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed STL: {0}")]
    Parse(String),

    #[error("mesh has no triangles")]
    EmptyMesh,

    #[error("cannot encode image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("{0}")]
    Other(String),
}

/// Turns the artifact at `input` into an output file at `output`.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, input: &Path, output: &Path) -> Result<(), RenderError>;
}

/// Default renderer: shaded perspective view of an STL mesh, saved as PNG.
#[derive(Debug, Clone)]
pub struct StlRenderer {
    pub width: u32,
    pub height: u32,
    pub camera: Camera,
}

impl StlRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            camera: Camera::default(),
        }
    }
}

impl Default for StlRenderer {
    fn default() -> Self {
        Self::new(1024, 1024)
    }
}

impl Renderer for StlRenderer {
    fn render(&self, input: &Path, output: &Path) -> Result<(), RenderError> {
        let bytes = std::fs::read(input)?;
        let mut mesh = stl::parse(&bytes)?;
        if mesh.is_empty() {
            return Err(RenderError::EmptyMesh);
        }
        mesh.fit_unit_cube();

        let image = raster::rasterize(&mesh, &self.camera, self.width, self.height);

        // Write beside the target and rename, so the output directory never
        // serves a half-written PNG.
        let tmp = output.with_extension("png.tmp");
        image.save_with_format(&tmp, ImageFormat::Png)?;
        std::fs::rename(&tmp, output)?;

        debug!(
            input = %input.display(),
            output = %output.display(),
            triangles = mesh.len(),
            "mesh rendered"
        );
        Ok(())
    }
}
