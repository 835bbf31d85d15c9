//! # Wavefront OBJ loader
//!
//! Reads the `v`, `vn`, `vt` and `f` directives of an OBJ file into a
//! non-indexed position/uv/normal [`Geometry`]. Every other directive is
//! ignored, materials included.
//!
//! ## Pipeline
//!
//! 1. Faces are read as `position[/uv][/normal]` references. A missing uv or
//!    normal index falls back to the position index. A face vertex without
//!    a position index is dropped from its face.
//! 2. Faces with more than three vertices are fan-triangulated around their
//!    first vertex.
//! 3. Normals come from the file when it has any. Otherwise each triangle
//!    gets its clockwise face normal, or with `smooth` the
//!    normalized sum of the face normals of every triangle sharing the
//!    vertex's normal slot.
//! 4. Without texture coordinates in the file, every triangle is mapped to
//!    `(0,0) (1,0) (1,1)`.
//! 5. Positions are translated so their mean sits at the origin and divided
//!    by half the largest bounding-box extent.
//! 6. Normals are negated on request.
//!
//! ## Usage
//!
//! ```rust
//! use std::io::Cursor;
//! use pbr_kit::gfx::mesh::obj::{self, ObjLoadOptions};
//!
//! let source = "v 0 0 0\nv 2 0 0\nv 0 0 -2\nf 1 2 3\n";
//! let geometry = obj::parse(Cursor::new(source), ObjLoadOptions::default()).unwrap();
//! assert_eq!(geometry.vertex_count(), 3);
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use cgmath::{Vector3, Zero};

use super::Mesh;
use crate::error::LoadError;
use crate::gfx::backend::PrimitiveTopology;
use crate::gfx::geometry::Geometry;
use crate::gfx::math::{triangle_normal, try_normalize, Aabb};

const DUMMY_UVS: [[f32; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];

/// Face normal `(p1 - p2) × (p3 - p2)`, the clockwise normal of the corner
/// order. Counter-clockwise files load with `invert_normals` set.
fn face_normal(p1: Vector3<f32>, p2: Vector3<f32>, p3: Vector3<f32>) -> Option<Vector3<f32>> {
    triangle_normal(p1, p3, p2)
}

/// Extents at or below this are not rescaled.
const MIN_HALF_EXTENT: f32 = 1e-8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjLoadOptions {
    /// Negate every normal (meshes authored with inward winding)
    pub invert_normals: bool,
    /// Average face normals over shared normal slots when the file has none
    pub smooth: bool,
}

/// One face vertex, as 1-based indices with relative indices resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FaceVertex {
    position: i64,
    uv: i64,
    normal: i64,
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    line: usize,
    vertices: [FaceVertex; 3],
}

#[derive(Debug, Default)]
struct RawObj {
    positions: Vec<Vector3<f32>>,
    normals: Vec<Vector3<f32>>,
    uvs: Vec<[f32; 2]>,
    triangles: Vec<Triangle>,
}

/// Loads an OBJ file into a triangle-list [`Mesh`].
pub fn load(path: impl AsRef<Path>, invert_normals: bool, smooth: bool) -> Result<Mesh, LoadError> {
    let geometry = load_geometry(
        path,
        ObjLoadOptions {
            invert_normals,
            smooth,
        },
    )?;
    Ok(Mesh::new(geometry, PrimitiveTopology::Triangles))
}

/// Loads an OBJ file into a [`Geometry`].
pub fn load_geometry(
    path: impl AsRef<Path>,
    options: ObjLoadOptions,
) -> Result<Geometry, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let geometry = parse(BufReader::new(file), options)?;
    log::info!(
        "loaded {}: {} triangles",
        path.display(),
        geometry.triangle_count()
    );
    Ok(geometry)
}

/// Parses OBJ source from any buffered reader.
pub fn parse<R: BufRead>(reader: R, options: ObjLoadOptions) -> Result<Geometry, LoadError> {
    let raw = extract(reader)?;
    log::debug!(
        "obj source: {} positions, {} normals, {} uvs, {} triangles",
        raw.positions.len(),
        raw.normals.len(),
        raw.uvs.len(),
        raw.triangles.len()
    );

    let (mut positions, uvs, mut normals) = generate(&raw, options.smooth)?;
    center_and_scale(&mut positions);
    if options.invert_normals {
        for n in &mut normals {
            *n = -*n;
        }
    }

    Ok(Geometry::pos_uv_normal(
        positions.iter().flat_map(|p| [p.x, p.y, p.z]).collect(),
        uvs.iter().flatten().copied().collect(),
        normals.iter().flat_map(|n| [n.x, n.y, n.z]).collect(),
    ))
}

fn extract<R: BufRead>(reader: R) -> Result<RawObj, LoadError> {
    let mut raw = RawObj::default();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let number = number + 1;
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let [x, y, z] = components::<3>(tokens);
                raw.positions.push(Vector3::new(x, y, z));
            }
            Some("vn") => {
                let [x, y, z] = components::<3>(tokens);
                raw.normals.push(Vector3::new(x, y, z));
            }
            Some("vt") => raw.uvs.push(components::<2>(tokens)),
            Some("f") => {
                let mut face = Vec::new();
                for token in tokens {
                    match face_vertex(token, &raw) {
                        Some(vertex) => face.push(vertex),
                        None => log::warn!(
                            "line {number}: dropping face vertex `{token}` without a position"
                        ),
                    }
                }
                if face.len() < 3 {
                    log::warn!("line {number}: skipping face with {} vertices", face.len());
                    continue;
                }
                for i in 2..face.len() {
                    raw.triangles.push(Triangle {
                        line: number,
                        vertices: [face[0], face[i - 1], face[i]],
                    });
                }
            }
            _ => {}
        }
    }

    Ok(raw)
}

/// First `N` numeric tokens, padded with zeros.
fn components<'a, const N: usize>(tokens: impl Iterator<Item = &'a str>) -> [f32; N] {
    let mut out = [0.0; N];
    for (slot, value) in out.iter_mut().zip(tokens.filter_map(|t| t.parse::<f32>().ok())) {
        *slot = value;
    }
    out
}

fn face_vertex(token: &str, raw: &RawObj) -> Option<FaceVertex> {
    let mut indices = token.split('/').map(|part| part.parse::<i64>().ok());
    let position = resolve(indices.next().flatten()?, raw.positions.len());
    let uv = indices
        .next()
        .flatten()
        .map_or(position, |i| resolve(i, raw.uvs.len()));
    let normal = indices
        .next()
        .flatten()
        .map_or(position, |i| resolve(i, raw.normals.len()));
    Some(FaceVertex {
        position,
        uv,
        normal,
    })
}

/// Turns a relative (negative) index into an absolute 1-based one.
fn resolve(index: i64, len: usize) -> i64 {
    if index < 0 {
        len as i64 + index + 1
    } else {
        index
    }
}

fn lookup<T: Copy>(
    items: &[T],
    index: i64,
    line: usize,
    attribute: &'static str,
) -> Result<T, LoadError> {
    if index >= 1 && (index as usize) <= items.len() {
        Ok(items[index as usize - 1])
    } else {
        Err(LoadError::IndexOutOfRange {
            line,
            attribute,
            index,
            available: items.len(),
        })
    }
}

type Attributes = (Vec<Vector3<f32>>, Vec<[f32; 2]>, Vec<Vector3<f32>>);

fn generate(raw: &RawObj, smooth: bool) -> Result<Attributes, LoadError> {
    let count = raw.triangles.len() * 3;
    let mut positions = Vec::with_capacity(count);
    let mut uvs = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count);

    let mut corners = Vec::with_capacity(raw.triangles.len());
    for triangle in &raw.triangles {
        let mut corner = [Vector3::zero(); 3];
        for (slot, vertex) in corner.iter_mut().zip(&triangle.vertices) {
            *slot = lookup(&raw.positions, vertex.position, triangle.line, "position")?;
        }
        corners.push(corner);
    }

    let mut degenerate = 0;
    let face_normals: Vec<Option<Vector3<f32>>> = corners
        .iter()
        .map(|[a, b, c]| {
            let normal = face_normal(*a, *b, *c);
            if normal.is_none() {
                degenerate += 1;
            }
            normal
        })
        .collect();
    if degenerate > 0 && raw.normals.is_empty() {
        log::warn!("{degenerate} degenerate triangles get a +Y normal");
    }

    let smooth = smooth && raw.normals.is_empty();
    let mut neighborhood: HashMap<i64, Vec<usize>> = HashMap::new();
    if smooth {
        for (index, triangle) in raw.triangles.iter().enumerate() {
            for vertex in &triangle.vertices {
                neighborhood.entry(vertex.normal).or_default().push(index);
            }
        }
    }
    let smooth_normal = |slot: i64, fallback: Vector3<f32>| {
        let sum = neighborhood
            .get(&slot)
            .into_iter()
            .flatten()
            .filter_map(|face| face_normals[*face])
            .fold(Vector3::zero(), |acc, n| acc + n);
        try_normalize(sum).unwrap_or(fallback)
    };

    for (index, triangle) in raw.triangles.iter().enumerate() {
        positions.extend_from_slice(&corners[index]);
        let flat = face_normals[index].unwrap_or(Vector3::unit_y());

        for (corner, vertex) in triangle.vertices.iter().enumerate() {
            let normal = if !raw.normals.is_empty() {
                lookup(&raw.normals, vertex.normal, triangle.line, "normal")?
            } else if smooth {
                smooth_normal(vertex.normal, flat)
            } else {
                flat
            };
            normals.push(normal);

            let uv = if raw.uvs.is_empty() {
                DUMMY_UVS[corner]
            } else {
                lookup(&raw.uvs, vertex.uv, triangle.line, "uv")?
            };
            uvs.push(uv);
        }
    }

    Ok((positions, uvs, normals))
}

/// Moves the mean of `positions` to the origin and scales by the inverse of
/// the largest bounding-box half extent.
fn center_and_scale(positions: &mut [Vector3<f32>]) {
    let Some(bounds) = Aabb::from_points(positions.iter().copied()) else {
        log::warn!("obj source has no faces");
        return;
    };
    let mean = positions.iter().fold(Vector3::zero(), |acc, p| acc + *p) / positions.len() as f32;
    let half = bounds.max_half_extent();
    let scale = if half > MIN_HALF_EXTENT { 1.0 / half } else { 1.0 };

    for p in positions.iter_mut() {
        *p = (*p - mean) * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace;
    use std::io::Cursor;

    const CUBE: &str = "\
# unit cube spanning [0, 2]
v 0 0 0
v 2 0 0
v 2 2 0
v 0 2 0
v 0 0 2
v 2 0 2
v 2 2 2
v 0 2 2
vn 0 0 -1
vn 0 0 1
vn -1 0 0
vn 1 0 0
vn 0 -1 0
vn 0 1 0
f 1//1 4//1 3//1
f 1//1 3//1 2//1
f 5//2 6//2 7//2
f 5//2 7//2 8//2
f 1//3 5//3 8//3
f 1//3 8//3 4//3
f 2//4 3//4 7//4
f 2//4 7//4 6//4
f 1//5 2//5 6//5
f 1//5 6//5 5//5
f 4//6 8//6 7//6
f 4//6 7//6 3//6
";

    fn parse_str(source: &str, invert_normals: bool, smooth: bool) -> Result<Geometry, LoadError> {
        parse(
            Cursor::new(source),
            ObjLoadOptions {
                invert_normals,
                smooth,
            },
        )
    }

    fn vec3(v: [f32; 3]) -> Vector3<f32> {
        Vector3::new(v[0], v[1], v[2])
    }

    fn assert_close(a: [f32; 3], b: Vector3<f32>) {
        assert!((vec3(a) - b).magnitude() < 1e-5, "{a:?} != {b:?}");
    }

    #[test]
    fn test_cube_round_trip() {
        let geometry = parse_str(CUBE, false, false).unwrap();
        let positions = geometry.positions();
        assert_eq!(positions.len(), 36);

        for n in geometry.normals() {
            assert!((vec3(n).magnitude() - 1.0).abs() < 1e-6);
        }

        let bounds = Aabb::from_points(positions.iter().map(|p| vec3(*p))).unwrap();
        assert!(bounds.center().magnitude() < 1e-5);
        assert!((bounds.max_half_extent() - 1.0).abs() < 1e-6);
        assert_close(positions[0], Vector3::new(-1.0, -1.0, -1.0));
        assert_close(geometry.normals()[0], Vector3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_invert_normals() {
        let plain = parse_str(CUBE, false, false).unwrap();
        let inverted = parse_str(CUBE, true, false).unwrap();
        for (a, b) in plain.normals().iter().zip(inverted.normals()) {
            assert_close(*a, -vec3(b));
        }
        assert_eq!(plain.positions(), inverted.positions());
    }

    const FOLDED: &str = "\
v 0 0 0
v 1 0 0
v 0 0 -1
v -1 1 -0.5
f 1 2 3
f 1 3 4
";

    #[test]
    fn test_smooth_normals_average_shared_slots() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 0.0, -1.0);
        let d = Vector3::new(-1.0, 1.0, -0.5);
        let n1 = face_normal(a, b, c).unwrap();
        let n2 = face_normal(a, c, d).unwrap();
        assert!((n1 + Vector3::unit_y()).magnitude() < 1e-6);
        let shared = (n1 + n2).normalize();

        let smooth = parse_str(FOLDED, false, true).unwrap();
        let normals = smooth.normals();
        // vertex 1 appears at 0 and 3, vertex 3 at 2 and 4
        assert_close(normals[0], shared);
        assert_close(normals[3], shared);
        assert_close(normals[2], shared);
        assert_close(normals[4], shared);
        // vertex 2 only touches the first triangle
        assert_close(normals[1], n1);
        assert!((vec3(normals[0]) - n1).magnitude() > 1e-3);
        assert!((vec3(normals[0]) - n2).magnitude() > 1e-3);

        let flat = parse_str(FOLDED, false, false).unwrap();
        assert_close(flat.normals()[0], n1);
        assert_close(flat.normals()[3], n2);
    }

    #[test]
    fn test_flat_normals_are_clockwise() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 0 -1\nf 1 2 3\n";
        let geometry = parse_str(source, false, false).unwrap();
        for n in geometry.normals() {
            assert_close(n, -Vector3::unit_y());
        }

        let inverted = parse_str(source, true, false).unwrap();
        for n in inverted.normals() {
            assert_close(n, Vector3::unit_y());
        }
    }

    #[test]
    fn test_fan_triangulation_and_dummy_uvs() {
        let source = "v 0 0 0\nv 1 0 0\nv 1 0 -1\nv 0 0 -1\nv 0.5 0 -1.5\nf 1 2 3 4 5\n";
        let geometry = parse_str(source, false, false).unwrap();
        assert_eq!(geometry.triangle_count(), 3);

        let uvs = geometry.uvs();
        for triangle in uvs.chunks(3) {
            assert_eq!(triangle, &DUMMY_UVS);
        }
        // every triangle starts at the first face vertex
        let positions = geometry.positions();
        assert_eq!(positions[0], positions[3]);
        assert_eq!(positions[3], positions[6]);
    }

    #[test]
    fn test_indexed_uvs_and_relative_indices() {
        let source = "\
v 0 0 0
v 1 0 0
v 1 1 0
vt 0.25 0.5
vt 0.75 0.5
vt 0.75 1.0 0.0
f -3/1 -2/2 -1/-1
";
        let geometry = parse_str(source, false, false).unwrap();
        assert_eq!(geometry.uvs(), vec![[0.25, 0.5], [0.75, 0.5], [0.75, 1.0]]);
    }

    #[test]
    fn test_vertex_without_position_is_dropped() {
        let source = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 /1 2 3\nf 1 2\n";
        let geometry = parse_str(source, false, false).unwrap();
        assert_eq!(geometry.triangle_count(), 1);
    }

    #[test]
    fn test_out_of_range_index_reports_line() {
        let source = "v 0 0 0\nv 1 0 0\nv 1 1 0\n\nf 1 2 9\n";
        let err = parse_str(source, false, false).unwrap_err();
        assert!(matches!(
            err,
            LoadError::IndexOutOfRange {
                line: 5,
                attribute: "position",
                index: 9,
                available: 3
            }
        ));

        let normals = "v 0 0 0\nv 1 0 0\nv 1 1 0\nvn 0 0 1\nf 1//1 2//1 3//2\n";
        assert!(matches!(
            parse_str(normals, false, false),
            Err(LoadError::IndexOutOfRange {
                attribute: "normal",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_source() {
        let geometry = parse_str("# nothing here\no empty\n", false, false).unwrap();
        assert_eq!(geometry.vertex_count(), 0);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("pbr_kit_obj_{}.obj", std::process::id()));
        std::fs::write(&path, CUBE).unwrap();
        let mesh = load(&path, false, false);
        std::fs::remove_file(&path).ok();

        let mesh = mesh.unwrap();
        assert_eq!(mesh.geometry().vertex_count(), 36);
        assert_eq!(mesh.topology(), PrimitiveTopology::Triangles);
        assert!(!mesh.is_built());

        let missing = load(std::env::temp_dir().join("pbr_kit_missing.obj"), false, false);
        assert!(matches!(missing, Err(LoadError::Io { .. })));
    }
}
