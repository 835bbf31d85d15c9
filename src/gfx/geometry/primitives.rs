//! # Primitive Shape Generation
//!
//! Parametric builders for cube, plane, sphere and cylinder geometry.
//!
//! Every generator emits a non-indexed triangle list: each triangle carries
//! its own three vertices with position, uv and normal. Out-of-range
//! parameters are clamped, never rejected.

use std::f32::consts::PI;

use cgmath::{InnerSpace, Vector3};

use super::Geometry;
use crate::gfx::math::{try_normalize, Frame};

/// Smallest radius a sphere or cylinder is built with.
pub const MIN_RADIUS: f32 = 1e-6;

/// Segment count used by [`cylinder`].
pub const DEFAULT_CYLINDER_SEGMENTS: u32 = 20;

/// Offset applied to the polar angle when reprojecting pole vertices.
const POLE_EPSILON: f32 = 1e-4;

// Per-face texture coordinates shared by the cube and the plane
const T1: [f32; 2] = [0.0, 1.0];
const T2: [f32; 2] = [0.0, 0.0];
const T3: [f32; 2] = [1.0, 1.0];
const T4: [f32; 2] = [1.0, 0.0];

/// Texture coordinate scheme for [`sphere_with_mapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UvMapping {
    /// `u` and `v` recovered from the vertex direction
    #[default]
    Spherical,
    /// `u = x / w`, `v = 1 - y / (h - 1)` straight from the grid
    Linear,
}

/// Generate an axis-aligned box centered at the origin
///
/// Emits 6 faces of 2 counter-clockwise triangles each, in the order
/// right, left, top, bottom, front, back.
///
/// # Arguments
/// * `width`, `height`, `depth` - Box extents along x, y and z
/// * `inside` - Face the triangles and normals inwards, for geometry that is
///   viewed from the interior such as a skybox
pub fn cube(width: f32, height: f32, depth: f32, inside: bool) -> Geometry {
    let hw = width.abs() * 0.5;
    let hh = height.abs() * 0.5;
    let hd = depth.abs() * 0.5;

    let v1 = [-hw, hh, hd];
    let v2 = [-hw, -hh, hd];
    let v3 = [hw, hh, hd];
    let v4 = [hw, -hh, hd];
    let v5 = [-hw, hh, -hd];
    let v6 = [-hw, -hh, -hd];
    let v7 = [hw, hh, -hd];
    let v8 = [hw, -hh, -hd];

    let faces: [[[f32; 3]; 6]; 6] = if inside {
        [
            [v7, v8, v3, v3, v8, v4],
            [v1, v2, v5, v5, v2, v6],
            [v7, v3, v5, v5, v3, v1],
            [v4, v8, v2, v2, v8, v6],
            [v3, v4, v1, v1, v4, v2],
            [v5, v6, v7, v7, v6, v8],
        ]
    } else {
        [
            [v3, v4, v7, v7, v4, v8],
            [v5, v6, v1, v1, v6, v2],
            [v5, v1, v7, v7, v1, v3],
            [v2, v6, v4, v4, v6, v8],
            [v1, v2, v3, v3, v2, v4],
            [v7, v8, v5, v5, v8, v6],
        ]
    };

    let sign = if inside { -1.0 } else { 1.0 };
    let face_normals = [
        [sign, 0.0, 0.0],
        [-sign, 0.0, 0.0],
        [0.0, sign, 0.0],
        [0.0, -sign, 0.0],
        [0.0, 0.0, sign],
        [0.0, 0.0, -sign],
    ];

    let mut positions = Vec::with_capacity(36 * 3);
    let mut uvs = Vec::with_capacity(36 * 2);
    let mut normals = Vec::with_capacity(36 * 3);
    for (face, normal) in faces.iter().zip(face_normals) {
        for (corner, uv) in face.iter().zip([T1, T2, T3, T3, T2, T4]) {
            positions.extend_from_slice(corner);
            uvs.extend_from_slice(&uv);
            normals.extend_from_slice(&normal);
        }
    }

    Geometry::pos_uv_normal(positions, uvs, normals)
}

/// Generate a quad on the XZ plane facing +Y
///
/// # Arguments
/// * `width` - Extent along x
/// * `height` - Extent along z
pub fn plane(width: f32, height: f32) -> Geometry {
    let hw = width.abs() * 0.5;
    let hh = height.abs() * 0.5;

    let v1 = [-hw, 0.0, hh];
    let v2 = [-hw, 0.0, -hh];
    let v3 = [hw, 0.0, hh];
    let v4 = [hw, 0.0, -hh];

    let corners = [v1, v3, v2, v3, v4, v2];
    let corner_uvs = [T1, T3, T2, T3, T4, T2];

    let mut positions = Vec::with_capacity(18);
    let mut uvs = Vec::with_capacity(12);
    for (corner, uv) in corners.iter().zip(corner_uvs) {
        positions.extend_from_slice(corner);
        uvs.extend_from_slice(&uv);
    }
    let normals = super::repeat(&[0.0, 1.0, 0.0], 6);

    Geometry::pos_uv_normal(positions, uvs, normals)
}

/// Generate a UV sphere with the default [`UvMapping`]
///
/// See [`sphere_with_mapping`].
pub fn sphere(hres: u32, vres: u32, radius: f32) -> Geometry {
    sphere_with_mapping(hres, vres, radius, UvMapping::default())
}

/// Generate a UV sphere centered at the origin
///
/// The grid has `2 * hres + 1` columns and `2 * vres + 1` rings. The band
/// touching each pole is emitted as a fan of single triangles, every other
/// band as quads of two triangles, giving `(2 * hres + 1) * (4 * vres - 2)`
/// triangles in total.
///
/// # Arguments
/// * `hres` - Horizontal resolution, clamped to at least 1
/// * `vres` - Vertical resolution, clamped to at least 1
/// * `radius` - Sphere radius, clamped to [`MIN_RADIUS`]
/// * `mapping` - Texture coordinate scheme
pub fn sphere_with_mapping(hres: u32, vres: u32, radius: f32, mapping: UvMapping) -> Geometry {
    let hres = hres.max(1);
    let vres = vres.max(1);
    let radius = radius.max(MIN_RADIUS);

    let w = (2 * hres + 1) as usize;
    let h = (2 * vres + 1) as usize;

    // rings[y][x] = (position, uv)
    let mut rings: Vec<Vec<([f32; 3], [f32; 2])>> = Vec::with_capacity(h);
    for y in 0..h {
        let mut ring = Vec::with_capacity(w + 1);
        for x in 0..=w {
            let u = x as f32 / w as f32;
            let v = 1.0 - y as f32 / (h - 1) as f32;
            let theta = 2.0 * PI * u;
            let phi = PI * v;

            let position = [
                radius * theta.cos() * phi.sin(),
                radius * phi.cos(),
                -radius * theta.sin() * phi.sin(),
            ];
            let uv = match mapping {
                UvMapping::Linear => [u, v],
                UvMapping::Spherical => spherical_uv(theta, phi),
            };
            // the last column meets the first at the 0/360 degree meridian
            let uv = if x == w { [1.0, uv[1]] } else { uv };

            ring.push((position, uv));
        }
        rings.push(ring);
    }

    let triangle_count = w * (4 * vres as usize - 2);
    let mut positions = Vec::with_capacity(triangle_count * 9);
    let mut uvs = Vec::with_capacity(triangle_count * 6);
    let mut push = |corner: ([f32; 3], [f32; 2])| {
        positions.extend_from_slice(&corner.0);
        uvs.extend_from_slice(&corner.1);
    };

    for y in 1..h {
        for x in 1..=w {
            let p1 = rings[y][x - 1];
            let p2 = rings[y - 1][x - 1];
            let p3 = rings[y][x];
            let p4 = rings[y - 1][x];

            if y == h - 1 {
                // p1 and p3 sit on the top pole
                push(p3);
                push(p2);
                push(p4);
            } else if y == 1 {
                // p2 and p4 sit on the bottom pole
                push(p1);
                push(p2);
                push(p3);
            } else {
                push(p1);
                push(p2);
                push(p3);
                push(p3);
                push(p2);
                push(p4);
            }
        }
    }

    let normals = positions
        .chunks_exact(3)
        .flat_map(|p| {
            let n = Vector3::new(p[0], p[1], p[2]) / radius;
            let n = n.normalize();
            [n.x, n.y, n.z]
        })
        .collect();

    Geometry::pos_uv_normal(positions, uvs, normals)
}

/// Texture coordinate of the unit direction at (`theta`, `phi`).
///
/// The polar angle is pulled away from the poles so that pole vertices
/// keep the `u` of their column.
fn spherical_uv(theta: f32, phi: f32) -> [f32; 2] {
    let phi_offset = phi.clamp(POLE_EPSILON, PI - POLE_EPSILON);
    let dx = theta.cos() * phi_offset.sin();
    let dz = -theta.sin() * phi_offset.sin();

    let mut u = (-dz).atan2(dx) / (2.0 * PI);
    if u < 0.0 {
        u += 1.0;
    }
    let v = 0.5 - phi.cos().clamp(-1.0, 1.0).asin() / PI;

    [u, v]
}

/// Generate a cylinder between two points with [`DEFAULT_CYLINDER_SEGMENTS`]
///
/// See [`cylinder_with_segments`].
pub fn cylinder(p1: [f32; 3], p2: [f32; 3], radius: f32) -> Geometry {
    cylinder_with_segments(p1, p2, radius, DEFAULT_CYLINDER_SEGMENTS)
}

/// Generate a capped cylinder whose axis runs from `p1` to `p2`
///
/// Emits a triangle fan for each cap, facing outwards along the axis, and a
/// ring of quads for the tube whose normals point radially away from the
/// axis.
///
/// # Arguments
/// * `p1`, `p2` - Cap centers. Coincident points fall back to a +Y axis.
/// * `radius` - Tube radius, clamped to [`MIN_RADIUS`]
/// * `segments` - Subdivisions around the axis, clamped to at least 3
pub fn cylinder_with_segments(p1: [f32; 3], p2: [f32; 3], radius: f32, segments: u32) -> Geometry {
    let res = segments.max(3) as usize;
    let radius = radius.max(MIN_RADIUS);
    let p1 = Vector3::from(p1);
    let p2 = Vector3::from(p2);

    let frame = Frame::from_axis(p2 - p1);
    let n = frame.normal;
    let angle = |i: usize| 2.0 * PI * (i % res) as f32 / res as f32;
    let ring1: Vec<Vector3<f32>> = (0..res)
        .map(|i| frame.circle_point(p1, angle(i), radius))
        .collect();
    let ring2: Vec<Vector3<f32>> = (0..res)
        .map(|i| frame.circle_point(p2, angle(i), radius))
        .collect();

    let triangle_count = res * 4;
    let mut positions = Vec::with_capacity(triangle_count * 9);
    let mut uvs = Vec::with_capacity(triangle_count * 6);
    let mut normals = Vec::with_capacity(triangle_count * 9);
    let mut push = |p: Vector3<f32>, uv: [f32; 2], normal: Vector3<f32>| {
        positions.extend_from_slice(&[p.x, p.y, p.z]);
        uvs.extend_from_slice(&uv);
        normals.extend_from_slice(&[normal.x, normal.y, normal.z]);
    };

    for i in 1..=res {
        let prev = i - 1;
        let curr = i % res;
        let u_prev = prev as f32 / res as f32;
        let u_curr = i as f32 / res as f32;

        // cap at p1 faces -axis
        push(p1, [0.0, 0.0], -n);
        push(ring1[prev], [u_prev, 1.0], -n);
        push(ring1[curr], [u_curr, 1.0], -n);

        // cap at p2 faces +axis
        push(p2, [0.0, 0.0], n);
        push(ring2[curr], [u_curr, 1.0], n);
        push(ring2[prev], [u_prev, 1.0], n);

        // tube
        let radial_curr = try_normalize(ring2[curr] - p2).unwrap_or(frame.tangent);
        let radial_prev = try_normalize(ring2[prev] - p2).unwrap_or(frame.tangent);
        push(ring2[curr], [u_curr, 1.0], radial_curr);
        push(ring1[curr], [u_curr, 0.0], radial_curr);
        push(ring2[prev], [u_prev, 1.0], radial_prev);

        push(ring2[prev], [u_prev, 1.0], radial_prev);
        push(ring1[curr], [u_curr, 0.0], radial_curr);
        push(ring1[prev], [u_prev, 0.0], radial_prev);
    }

    Geometry::pos_uv_normal(positions, uvs, normals)
}

/// Generate the inward-facing cube used as skybox geometry.
pub fn skybox_cube(side: f32) -> Geometry {
    cube(side, side, side, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangles(geometry: &Geometry) -> Vec<[Vector3<f32>; 3]> {
        geometry
            .positions()
            .chunks_exact(3)
            .map(|t| [t[0].into(), t[1].into(), t[2].into()])
            .collect()
    }

    fn winding_normal(t: &[Vector3<f32>; 3]) -> Vector3<f32> {
        (t[1] - t[0]).cross(t[2] - t[0])
    }

    #[test]
    fn test_cube_surface_and_winding() {
        let (w, h, d) = (2.0, 3.0, 4.0);
        for inside in [false, true] {
            let cube = cube(w, h, d, inside);
            assert_eq!(cube.vertex_count(), 36);
            assert_eq!(cube.triangle_count(), 12);

            for p in cube.positions() {
                let on_x = (p[0].abs() - w / 2.0).abs() < 1e-6;
                let on_y = (p[1].abs() - h / 2.0).abs() < 1e-6;
                let on_z = (p[2].abs() - d / 2.0).abs() < 1e-6;
                assert!(on_x || on_y || on_z);
                assert!(p[0].abs() <= w / 2.0 + 1e-6);
                assert!(p[1].abs() <= h / 2.0 + 1e-6);
                assert!(p[2].abs() <= d / 2.0 + 1e-6);
            }

            let normals = cube.normals();
            for (i, tri) in triangles(&cube).iter().enumerate() {
                let assigned = Vector3::from(normals[i * 3]);
                assert!(winding_normal(tri).dot(assigned) > 0.0, "triangle {i} inside={inside}");
            }
        }
    }

    #[test]
    fn test_cube_inside_negates_normals() {
        let outside = cube(1.0, 1.0, 1.0, false).normals();
        let inside = cube(1.0, 1.0, 1.0, true).normals();
        for (o, i) in outside.iter().zip(&inside) {
            assert_eq!([-o[0], -o[1], -o[2]], *i);
        }
    }

    #[test]
    fn test_plane_faces_up() {
        let plane = plane(2.0, 4.0);
        assert_eq!(plane.vertex_count(), 6);
        for tri in triangles(&plane) {
            assert!(winding_normal(&tri).y > 0.0);
        }
        assert!(plane.normals().iter().all(|n| *n == [0.0, 1.0, 0.0]));
        assert!(plane.positions().iter().all(|p| p[1] == 0.0));
    }

    #[test]
    fn test_sphere_radius_invariant() {
        let radius = 2.5;
        let sphere = sphere(8, 6, radius);
        for p in sphere.positions() {
            let len = Vector3::from(p).magnitude();
            assert!((len - radius).abs() <= radius * 1e-4);
        }
        for n in sphere.normals() {
            assert!((Vector3::from(n).magnitude() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_sphere_triangle_count() {
        // hres = vres = 1: 3 columns, 3 rings, two pole bands of 3 triangles
        assert_eq!(sphere(1, 1, 1.0).triangle_count(), 6);
        // 5 columns, 5 rings: two pole bands of 5 plus two bands of 10
        assert_eq!(sphere(2, 2, 1.0).triangle_count(), 30);
        assert_eq!(sphere(4, 3, 1.0).triangle_count(), 9 * 10);
        // resolution clamps to 1
        assert_eq!(sphere(0, 0, 1.0).triangle_count(), 6);
    }

    #[test]
    fn test_sphere_triangles_face_outwards() {
        let sphere = sphere(6, 4, 1.0);
        for tri in triangles(&sphere) {
            let centroid = (tri[0] + tri[1] + tri[2]) / 3.0;
            let n = winding_normal(&tri);
            if n.magnitude2() > 1e-10 {
                assert!(n.dot(centroid) > 0.0);
            }
        }
    }

    #[test]
    fn test_sphere_seam_uv() {
        for mapping in [UvMapping::Spherical, UvMapping::Linear] {
            let sphere = sphere_with_mapping(3, 3, 1.0, mapping);
            for uv in sphere.uvs() {
                assert!((0.0..=1.0).contains(&uv[0]), "{mapping:?} u={}", uv[0]);
                assert!((-1e-6..=1.0 + 1e-6).contains(&uv[1]), "{mapping:?} v={}", uv[1]);
            }
            // the first triangle of the last column reaches u = 1
            let last_column = sphere
                .uvs()
                .into_iter()
                .filter(|uv| uv[0] > 0.99)
                .count();
            assert!(last_column > 0);
        }
    }

    #[test]
    fn test_spherical_uv_follows_columns() {
        let linear = sphere_with_mapping(4, 2, 1.0, UvMapping::Linear).uvs();
        let spherical = sphere_with_mapping(4, 2, 1.0, UvMapping::Spherical).uvs();
        for (l, s) in linear.iter().zip(&spherical) {
            assert!((l[0] - s[0]).abs() < 1e-3, "linear {l:?} spherical {s:?}");
        }
    }

    #[test]
    fn test_cylinder_containment() {
        let p1 = [1.0, -2.0, 0.5];
        let p2 = [3.0, 1.0, -1.0];
        let radius = 0.75;
        let cyl = cylinder(p1, p2, radius);
        assert_eq!(cyl.triangle_count(), DEFAULT_CYLINDER_SEGMENTS as usize * 4);

        let a = Vector3::from(p1);
        let axis = (Vector3::from(p2) - a).normalize();
        let mut centers = 0;
        for p in cyl.positions() {
            if p == p1 || p == p2 {
                centers += 1;
                continue;
            }
            let v = Vector3::from(p) - a;
            let distance = (v - axis * v.dot(axis)).magnitude();
            assert!((distance - radius).abs() < 1e-4, "distance {distance}");
        }
        assert_eq!(centers, DEFAULT_CYLINDER_SEGMENTS as usize * 2);
    }

    #[test]
    fn test_cylinder_parallel_to_up() {
        for (p1, p2) in [([0.0, 0.0, 0.0], [0.0, 2.0, 0.0]), ([0.0, 2.0, 0.0], [0.0, 0.0, 0.0])] {
            let cyl = cylinder_with_segments(p1, p2, 1.0, 8);
            assert!(cyl
                .positions()
                .iter()
                .flatten()
                .chain(cyl.normals().iter().flatten())
                .all(|c| c.is_finite()));
        }
    }

    #[test]
    fn test_cylinder_normals() {
        let cyl = cylinder_with_segments([0.0, 0.0, 0.0], [0.0, 0.0, 3.0], 1.0, 6);
        let positions = cyl.positions();
        let normals = cyl.normals();
        for (t, tri) in triangles(&cyl).iter().enumerate() {
            let n = winding_normal(tri);
            let assigned = Vector3::from(normals[t * 3]);
            assert!(n.dot(assigned) > 0.0, "triangle {t}");
        }
        // tube normals are radial
        for (p, n) in positions.iter().zip(&normals) {
            if n[2].abs() < 1e-6 {
                let radial = Vector3::new(p[0], p[1], 0.0).normalize();
                assert!((radial - Vector3::from(*n)).magnitude() < 1e-5);
            }
        }
    }
}
