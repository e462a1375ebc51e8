//! Z-buffered triangle rasterizer with Phong-style flat shading.

use image::{Rgba, RgbaImage};

use super::geom::Vec3;
use super::stl::Mesh;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const OBJECT_GRAY: f64 = 0.75;
const AMBIENT: f64 = 0.2;
const SPECULAR_POWER: i32 = 100;
const NEAR: f64 = 1.0;
const FAR: f64 = 10.0;

/// Perspective camera looking at a target.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov_deg: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(3.0, 3.0, 3.0),
            target: Vec3::new(0.0, 0.0, 0.0),
            up: Vec3::new(0.0, 0.0, 1.0),
            fov_deg: 30.0,
        }
    }
}

/// Camera-space basis plus projection constants for one image size.
struct View {
    eye: Vec3,
    right: Vec3,
    up: Vec3,
    forward: Vec3,
    tan_half_fov: f64,
    aspect: f64,
    width: f64,
    height: f64,
}

/// A vertex after projection: pixel coordinates plus inverse depth.
#[derive(Clone, Copy)]
struct Projected {
    x: f64,
    y: f64,
    inv_z: f64,
}

impl View {
    fn new(camera: &Camera, width: u32, height: u32) -> Self {
        let forward = (camera.target - camera.eye).normalize();
        let right = forward.cross(camera.up).normalize();
        let up = right.cross(forward);
        Self {
            eye: camera.eye,
            right,
            up,
            forward,
            tan_half_fov: (camera.fov_deg.to_radians() / 2.0).tan(),
            aspect: width as f64 / height as f64,
            width: width as f64,
            height: height as f64,
        }
    }

    fn project(&self, p: Vec3) -> Option<Projected> {
        let d = p - self.eye;
        let z = d.dot(self.forward);
        if !(NEAR..=FAR).contains(&z) {
            return None;
        }
        let ndc_x = d.dot(self.right) / (z * self.tan_half_fov * self.aspect);
        let ndc_y = d.dot(self.up) / (z * self.tan_half_fov);
        Some(Projected {
            x: (ndc_x + 1.0) * 0.5 * self.width,
            y: (1.0 - ndc_y) * 0.5 * self.height,
            inv_z: 1.0 / z,
        })
    }
}

/// Rasterize `mesh` into a new `width`×`height` image.
pub fn rasterize(mesh: &Mesh, camera: &Camera, width: u32, height: u32) -> RgbaImage {
    let view = View::new(camera, width, height);
    let light = Vec3::new(1.0, 1.0, 1.0).normalize();

    let mut image = RgbaImage::from_pixel(width, height, BACKGROUND);
    // Stores 1/z; larger is closer. Zero means nothing drawn yet.
    let mut depth = vec![0.0f64; width as usize * height as usize];

    for tri in &mesh.triangles {
        let (Some(a), Some(b), Some(c)) = (
            view.project(tri[0]),
            view.project(tri[1]),
            view.project(tri[2]),
        ) else {
            continue;
        };

        let area = edge(a, b, c.x, c.y);
        if area.abs() < f64::EPSILON {
            continue;
        }

        let color = shade(tri, camera.eye, light);

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
        let max_x = a.x.max(b.x).max(c.x).ceil().min(view.width - 1.0).max(0.0) as u32;
        let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
        let max_y = a.y.max(b.y).max(c.y).ceil().min(view.height - 1.0).max(0.0) as u32;

        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let (sx, sy) = (px as f64 + 0.5, py as f64 + 0.5);
                // Dividing by the signed area accepts either winding.
                let w0 = edge(b, c, sx, sy) / area;
                let w1 = edge(c, a, sx, sy) / area;
                let w2 = edge(a, b, sx, sy) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let inv_z = w0 * a.inv_z + w1 * b.inv_z + w2 * c.inv_z;
                let idx = py as usize * width as usize + px as usize;
                if inv_z > depth[idx] {
                    depth[idx] = inv_z;
                    image.put_pixel(px, py, color);
                }
            }
        }
    }

    image
}

fn edge(a: Projected, b: Projected, x: f64, y: f64) -> f64 {
    (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x)
}

fn shade(tri: &[Vec3; 3], eye: Vec3, light: Vec3) -> Rgba<u8> {
    let normal = (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize();
    let centroid = (tri[0] + tri[1] + tri[2]) * (1.0 / 3.0);
    let to_eye = (eye - centroid).normalize();
    // Face the normal toward the viewer; STL winding is unreliable.
    let normal = if normal.dot(to_eye) < 0.0 { normal * -1.0 } else { normal };

    let diffuse = normal.dot(light).max(0.0);
    let reflected = normal * (2.0 * normal.dot(light)) - light;
    let specular = if diffuse > 0.0 {
        reflected.dot(to_eye).max(0.0).powi(SPECULAR_POWER)
    } else {
        0.0
    };

    let level = (OBJECT_GRAY * (AMBIENT + diffuse) + specular).clamp(0.0, 1.0);
    let v = (level * 255.0).round() as u8;
    Rgba([v, v, v, 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_face() -> Mesh {
        // Two triangles spanning the z = 0 plane inside the unit cube.
        let p = |x, y| Vec3::new(x, y, 0.0);
        Mesh {
            triangles: vec![
                [p(-1.0, -1.0), p(1.0, -1.0), p(1.0, 1.0)],
                [p(-1.0, -1.0), p(1.0, 1.0), p(-1.0, 1.0)],
            ],
        }
    }

    #[test]
    fn center_pixel_is_covered_and_shaded() {
        let image = rasterize(&cube_face(), &Camera::default(), 64, 64);
        let center = image.get_pixel(32, 32);
        assert_ne!(*center, BACKGROUND);
        assert_eq!(center[0], center[1]);
        assert_eq!(center[3], 255);
    }

    #[test]
    fn corners_stay_background() {
        let image = rasterize(&cube_face(), &Camera::default(), 64, 64);
        assert_eq!(*image.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*image.get_pixel(63, 63), BACKGROUND);
    }

    #[test]
    fn empty_mesh_renders_blank() {
        let image = rasterize(&Mesh::default(), &Camera::default(), 8, 8);
        assert!(image.pixels().all(|p| *p == BACKGROUND));
    }
}
