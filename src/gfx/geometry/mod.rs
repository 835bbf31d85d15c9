//! # Geometry
//!
//! Vertex data as produced by the procedural generators and the OBJ loader,
//! before it is uploaded to the GPU.
//!
//! A [`Geometry`] is a vertex [layout](VertexAttribute) plus the scalar data
//! for each attribute. Data is either stored one stream per attribute
//! ([`Alignment::MultiBatch`]) or as a single interleaved stream
//! ([`Alignment::Interleaved`]).
//!
//! ## Usage
//!
//! ```rust
//! use pbr_kit::gfx::geometry::{self, Geometry, VertexAttribute};
//!
//! let layout = vec![VertexAttribute::position(), VertexAttribute::uv()];
//! let positions = geometry::repeat(&[0.0, 0.0, 0.0], 3);
//! let uvs = geometry::combine(&[&[0.0, 0.0], &[1.0, 0.0], &[1.0, 1.0]]);
//!
//! let geometry = Geometry::multi_batch(layout, vec![positions, uvs]).unwrap();
//! assert_eq!(geometry.vertex_count(), 3);
//! ```

pub mod primitives;

use std::borrow::Cow;

use crate::error::GeometryError;

pub use primitives::*;

/// How the scalar data of an attribute is interpreted when uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalarType {
    #[default]
    Float32,
    Sint32,
    Uint32,
}

/// Update frequency hint for the GPU buffer backing an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    #[default]
    Static,
    Dynamic,
}

/// One vertex attribute stream (position, uv, normal, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttribute {
    /// Semantic name, used for lookups
    pub name: Cow<'static, str>,
    /// Shader location the attribute is bound to
    pub location: u32,
    /// Number of scalars per vertex, 1 to 4
    pub components: u32,
    pub scalar: ScalarType,
    pub usage: BufferUsage,
}

impl VertexAttribute {
    pub fn new(name: impl Into<Cow<'static, str>>, location: u32, components: u32) -> Self {
        Self {
            name: name.into(),
            location,
            components,
            scalar: ScalarType::Float32,
            usage: BufferUsage::Static,
        }
    }

    pub fn with_scalar(mut self, scalar: ScalarType) -> Self {
        self.scalar = scalar;
        self
    }

    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    /// `vec3` position at location 0
    pub fn position() -> Self {
        Self::new("position", 0, 3)
    }

    /// `vec2` texture coordinate at location 1
    pub fn uv() -> Self {
        Self::new("uv", 1, 2)
    }

    /// `vec3` normal at location 2
    pub fn normal() -> Self {
        Self::new("normal", 2, 3)
    }

    /// Size of one vertex of this attribute in bytes
    pub fn byte_size(&self) -> u64 {
        self.components as u64 * 4
    }
}

/// Storage arrangement of the attribute data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    /// One data stream per attribute
    #[default]
    MultiBatch,
    /// All attributes packed into one stream, vertex by vertex
    Interleaved,
    /// All attributes packed into one stream, attribute by attribute.
    /// Reserved; no backend builds it.
    SingleBatch,
}

/// Vertex layout plus attribute data
///
/// Invariants, checked on construction:
/// - every attribute has 1 to 4 components
/// - every stream length is a multiple of its attribute's component count
/// - all attributes describe the same number of vertices
///
/// A geometry is immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    layout: Vec<VertexAttribute>,
    data: Vec<Vec<f32>>,
    alignment: Alignment,
    vertex_count: usize,
}

impl Geometry {
    /// Builds a geometry holding one stream per attribute.
    pub fn multi_batch(
        layout: Vec<VertexAttribute>,
        data: Vec<Vec<f32>>,
    ) -> Result<Self, GeometryError> {
        validate_components(&layout)?;
        if layout.len() != data.len() {
            return Err(GeometryError::StreamCount {
                layout: layout.len(),
                streams: data.len(),
            });
        }

        let mut vertex_count = None;
        for (attribute, stream) in layout.iter().zip(&data) {
            let count = attribute.components as usize;
            if stream.len() % count != 0 {
                return Err(GeometryError::StreamLength {
                    name: attribute.name.to_string(),
                    len: stream.len(),
                    count: attribute.components,
                });
            }
            let vertices = stream.len() / count;
            match vertex_count {
                None => vertex_count = Some(vertices),
                Some(expected) if expected != vertices => {
                    return Err(GeometryError::VertexCount {
                        name: attribute.name.to_string(),
                        expected,
                        actual: vertices,
                    })
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            layout,
            data,
            alignment: Alignment::MultiBatch,
            vertex_count: vertex_count.unwrap_or(0),
        })
    }

    /// Builds a geometry from one interleaved stream.
    pub fn interleaved(
        layout: Vec<VertexAttribute>,
        data: Vec<f32>,
    ) -> Result<Self, GeometryError> {
        validate_components(&layout)?;
        let stride: u32 = layout.iter().map(|a| a.components).sum();
        if stride == 0 {
            return Err(GeometryError::StreamCount {
                layout: 0,
                streams: 1,
            });
        }
        if data.len() % stride as usize != 0 {
            return Err(GeometryError::StreamLength {
                name: "interleaved".to_string(),
                len: data.len(),
                count: stride,
            });
        }

        let vertex_count = data.len() / stride as usize;
        Ok(Self {
            layout,
            data: vec![data],
            alignment: Alignment::Interleaved,
            vertex_count,
        })
    }

    /// Position/uv/normal layout used by every generator and the OBJ loader.
    ///
    /// The caller guarantees matching vertex counts.
    pub(crate) fn pos_uv_normal(positions: Vec<f32>, uvs: Vec<f32>, normals: Vec<f32>) -> Self {
        debug_assert_eq!(positions.len() / 3, uvs.len() / 2);
        debug_assert_eq!(positions.len(), normals.len());

        let vertex_count = positions.len() / 3;
        Self {
            layout: vec![
                VertexAttribute::position(),
                VertexAttribute::uv(),
                VertexAttribute::normal(),
            ],
            data: vec![positions, uvs, normals],
            alignment: Alignment::MultiBatch,
            vertex_count,
        }
    }

    pub fn layout(&self) -> &[VertexAttribute] {
        &self.layout
    }

    pub fn data(&self) -> &[Vec<f32>] {
        &self.data
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Number of triangles when drawn as a triangle list.
    pub fn triangle_count(&self) -> usize {
        self.vertex_count / 3
    }

    /// Scalars per vertex summed over all attributes.
    pub fn stride(&self) -> u32 {
        self.layout.iter().map(|a| a.components).sum()
    }

    pub fn attribute(&self, name: &str) -> Option<&VertexAttribute> {
        self.layout.iter().find(|a| a.name == name)
    }

    /// Values of the named attribute, regardless of alignment.
    pub fn attribute_values(&self, name: &str) -> Option<Vec<f32>> {
        let index = self.layout.iter().position(|a| a.name == name)?;
        match self.alignment {
            Alignment::MultiBatch => Some(self.data[index].clone()),
            Alignment::Interleaved | Alignment::SingleBatch => {
                let stride = self.stride() as usize;
                let offset: usize = self.layout[..index]
                    .iter()
                    .map(|a| a.components as usize)
                    .sum();
                let count = self.layout[index].components as usize;
                let stream = self.data.first()?;
                Some(
                    stream
                        .chunks_exact(stride)
                        .flat_map(|vertex| vertex[offset..offset + count].iter().copied())
                        .collect(),
                )
            }
        }
    }

    /// Vec3 view of the `position` attribute.
    pub fn positions(&self) -> Vec<[f32; 3]> {
        self.vec3_values("position")
    }

    /// Vec3 view of the `normal` attribute.
    pub fn normals(&self) -> Vec<[f32; 3]> {
        self.vec3_values("normal")
    }

    /// Vec2 view of the `uv` attribute.
    pub fn uvs(&self) -> Vec<[f32; 2]> {
        self.attribute_values("uv")
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|c| [c[0], c[1]])
            .collect()
    }

    fn vec3_values(&self, name: &str) -> Vec<[f32; 3]> {
        self.attribute_values(name)
            .unwrap_or_default()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }

    /// Repacks a multi-batch geometry into a single interleaved stream.
    pub fn to_interleaved(&self) -> Result<Geometry, GeometryError> {
        match self.alignment {
            Alignment::Interleaved => Ok(self.clone()),
            Alignment::SingleBatch => Err(GeometryError::SingleBatch),
            Alignment::MultiBatch => {
                let mut data = Vec::with_capacity(self.vertex_count * self.stride() as usize);
                for v in 0..self.vertex_count {
                    for (attribute, stream) in self.layout.iter().zip(&self.data) {
                        let n = attribute.components as usize;
                        data.extend_from_slice(&stream[v * n..(v + 1) * n]);
                    }
                }
                Geometry::interleaved(self.layout.clone(), data)
            }
        }
    }
}

fn validate_components(layout: &[VertexAttribute]) -> Result<(), GeometryError> {
    match layout.iter().find(|a| !(1..=4).contains(&a.components)) {
        Some(bad) => Err(GeometryError::ComponentCount {
            name: bad.name.to_string(),
            count: bad.components,
        }),
        None => Ok(()),
    }
}

/// Concatenates `slices` into one vector.
pub fn combine(slices: &[&[f32]]) -> Vec<f32> {
    slices.iter().flat_map(|s| s.iter().copied()).collect()
}

/// Repeats `slice` `count` times.
pub fn repeat(slice: &[f32], count: usize) -> Vec<f32> {
    slice.repeat(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Vec<VertexAttribute> {
        vec![VertexAttribute::position(), VertexAttribute::uv()]
    }

    #[test]
    fn test_multi_batch_validation() {
        let ok = Geometry::multi_batch(layout(), vec![vec![0.0; 9], vec![0.0; 6]]).unwrap();
        assert_eq!(ok.vertex_count(), 3);
        assert_eq!(ok.alignment(), Alignment::MultiBatch);

        let ragged = Geometry::multi_batch(layout(), vec![vec![0.0; 8], vec![0.0; 6]]);
        assert!(matches!(ragged, Err(GeometryError::StreamLength { .. })));

        let mismatch = Geometry::multi_batch(layout(), vec![vec![0.0; 9], vec![0.0; 4]]);
        assert!(matches!(
            mismatch,
            Err(GeometryError::VertexCount {
                expected: 3,
                actual: 2,
                ..
            })
        ));

        let missing = Geometry::multi_batch(layout(), vec![vec![0.0; 9]]);
        assert!(matches!(missing, Err(GeometryError::StreamCount { .. })));
    }

    #[test]
    fn test_component_range() {
        let bad = vec![VertexAttribute::new("weights", 4, 5)];
        let result = Geometry::multi_batch(bad, vec![vec![0.0; 5]]);
        assert!(matches!(result, Err(GeometryError::ComponentCount { count: 5, .. })));
    }

    #[test]
    fn test_interleave_round_trip_values() {
        let positions = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let uvs = vec![0.1, 0.2, 0.3, 0.4];
        let geometry =
            Geometry::multi_batch(layout(), vec![positions.clone(), uvs.clone()]).unwrap();

        let packed = geometry.to_interleaved().unwrap();
        assert_eq!(packed.alignment(), Alignment::Interleaved);
        assert_eq!(packed.data()[0], vec![1.0, 2.0, 3.0, 0.1, 0.2, 4.0, 5.0, 6.0, 0.3, 0.4]);
        assert_eq!(packed.vertex_count(), 2);
        assert_eq!(packed.attribute_values("uv").unwrap(), uvs);
        assert_eq!(packed.attribute_values("position").unwrap(), positions);
    }

    #[test]
    fn test_combine_and_repeat() {
        assert_eq!(combine(&[&[1.0], &[2.0, 3.0]]), vec![1.0, 2.0, 3.0]);
        assert_eq!(repeat(&[1.0, 2.0], 3), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert!(repeat(&[1.0], 0).is_empty());
    }
}
