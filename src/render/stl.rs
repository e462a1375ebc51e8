//! STL mesh decoding (binary and ASCII).

use super::RenderError;
use super::geom::Vec3;

const HEADER_LEN: usize = 80;
const TRIANGLE_LEN: usize = 50;

/// A triangle soup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub triangles: Vec<[Vec3; 3]>,
}

impl Mesh {
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Axis-aligned bounds as (min, max). `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut points = self.triangles.iter().flatten();
        let first = *points.next()?;
        Some(points.fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p))))
    }

    /// Center the mesh on the origin and scale it so its largest extent
    /// spans [-1, 1].
    pub fn fit_unit_cube(&mut self) {
        let Some((lo, hi)) = self.bounds() else {
            return;
        };
        let size = hi - lo;
        let extent = size.x.max(size.y).max(size.z);
        let scale = if extent > 0.0 { 2.0 / extent } else { 1.0 };
        let center = (lo + hi) * 0.5;
        for tri in &mut self.triangles {
            for v in tri.iter_mut() {
                *v = (*v - center) * scale;
            }
        }
    }
}

/// Decode an STL file, detecting binary vs ASCII.
pub fn parse(bytes: &[u8]) -> Result<Mesh, RenderError> {
    if looks_binary(bytes) {
        parse_binary(bytes)
    } else if starts_with_solid(bytes) {
        parse_ascii(bytes)
    } else {
        Err(RenderError::Parse(
            "neither a binary nor an ASCII STL file".to_string(),
        ))
    }
}

// An ASCII header may start with "solid" in binary files too, so the size
// check decides first.
fn looks_binary(bytes: &[u8]) -> bool {
    match declared_count(bytes) {
        Some(count) => bytes.len() >= HEADER_LEN + 4 + count * TRIANGLE_LEN && {
            bytes.len() == HEADER_LEN + 4 + count * TRIANGLE_LEN || !starts_with_solid(bytes)
        },
        None => false,
    }
}

fn declared_count(bytes: &[u8]) -> Option<usize> {
    let raw = bytes.get(HEADER_LEN..HEADER_LEN + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
}

fn starts_with_solid(bytes: &[u8]) -> bool {
    let trimmed = bytes.trim_ascii_start();
    trimmed.len() >= 5 && trimmed[..5].eq_ignore_ascii_case(b"solid")
}

fn parse_binary(bytes: &[u8]) -> Result<Mesh, RenderError> {
    let count = declared_count(bytes)
        .ok_or_else(|| RenderError::Parse("truncated binary header".to_string()))?;
    let body = &bytes[HEADER_LEN + 4..];
    if body.len() < count * TRIANGLE_LEN {
        return Err(RenderError::Parse(format!(
            "binary STL declares {count} triangles but holds {} bytes",
            body.len()
        )));
    }

    let triangles = body
        .chunks_exact(TRIANGLE_LEN)
        .take(count)
        .map(|record| {
            // Skip the 12-byte facet normal; shading recomputes it.
            let v = |i: usize| {
                let off = 12 + i * 12;
                Vec3::new(
                    read_f32(&record[off..]),
                    read_f32(&record[off + 4..]),
                    read_f32(&record[off + 8..]),
                )
            };
            [v(0), v(1), v(2)]
        })
        .collect();
    Ok(Mesh { triangles })
}

fn read_f32(b: &[u8]) -> f64 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64
}

fn parse_ascii(bytes: &[u8]) -> Result<Mesh, RenderError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RenderError::Parse(format!("ASCII STL is not valid UTF-8: {e}")))?;

    let mut vertices = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("vertex") {
            continue;
        }
        let mut coord = || -> Result<f64, RenderError> {
            tokens
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .ok_or_else(|| RenderError::Parse(format!("bad vertex on line {}", lineno + 1)))
        };
        vertices.push(Vec3::new(coord()?, coord()?, coord()?));
    }

    if vertices.len() % 3 != 0 {
        return Err(RenderError::Parse(format!(
            "{} vertices do not form whole triangles",
            vertices.len()
        )));
    }

    let triangles = vertices
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();
    Ok(Mesh { triangles })
}
