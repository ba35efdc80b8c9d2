// Mesh data and GPU meshes
//
// Vertex layout (one interleaved binding, 32 bytes):
//   location 0: position vec3  (offset 0)
//   location 1: color    vec3  (offset 12)
//   location 2: uv       vec2  (offset 24)

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::mem::{offset_of, size_of};

use crate::allocator::ResourceAllocator;
use crate::error::{EngineError, EngineResult};
use crate::gpu::Gpu;
use crate::recorder::DrawItem;
use crate::teardown::TeardownList;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, color, uv }
    }

    fn bits(&self) -> [u32; 8] {
        [
            self.position[0].to_bits(),
            self.position[1].to_bits(),
            self.position[2].to_bits(),
            self.color[0].to_bits(),
            self.color[1].to_bits(),
            self.color[2].to_bits(),
            self.uv[0].to_bits(),
            self.uv[1].to_bits(),
        ]
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

// Bitwise, so Eq agrees with Hash (-0.0 != 0.0, NaN == NaN)
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// CPU-side mesh: unique vertices, u32 indices and a model transform.
#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub transform: Mat4,
}

impl MeshData {
    /// Build from one vertex per index entry, merging identical vertices.
    pub fn from_vertex_stream(name: impl Into<String>, stream: impl IntoIterator<Item = Vertex>) -> Self {
        let mut unique: HashMap<Vertex, u32> = HashMap::new();
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for vertex in stream {
            let index = *unique.entry(vertex).or_insert_with(|| {
                vertices.push(vertex);
                (vertices.len() - 1) as u32
            });
            indices.push(index);
        }

        Self {
            name: name.into(),
            vertices,
            indices,
            transform: Mat4::IDENTITY,
        }
    }

    /// Two triangles covering [-0.5, 0.5] in XY, white, full UV range.
    pub fn quad() -> Self {
        const WHITE: [f32; 3] = [1.0, 1.0, 1.0];
        let corners = [
            Vertex::new([-0.5, -0.5, 0.0], WHITE, [0.0, 0.0]),
            Vertex::new([0.5, -0.5, 0.0], WHITE, [1.0, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], WHITE, [1.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], WHITE, [0.0, 1.0]),
        ];
        let order = [0, 1, 2, 2, 3, 0];

        Self::from_vertex_stream("quad", order.iter().map(|&i| corners[i]))
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(EngineError::InvalidUpload(format!("mesh '{}' is empty", self.name)));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
            return Err(EngineError::InvalidUpload(format!(
                "mesh '{}' index {} out of range ({} vertices)",
                self.name,
                bad,
                self.vertices.len()
            )));
        }
        Ok(())
    }
}

/// Mesh resident in host-visible device memory.
#[derive(Clone, Copy, Debug)]
pub struct Mesh {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub transform: Mat4,
}

impl Mesh {
    /// Upload vertex and index data. Both buffers are owned by `owned`.
    pub fn upload<G: Gpu>(
        gpu: &G,
        allocator: &mut ResourceAllocator,
        owned: &mut TeardownList,
        data: &MeshData,
    ) -> EngineResult<Self> {
        data.validate()?;

        let vertex_buffer = allocator.upload_buffer(
            gpu,
            bytemuck::cast_slice(&data.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &format!("{} vertices", data.name),
        )?;
        let vertex_buffer = owned.adopt_buffer(vertex_buffer);

        let index_buffer = allocator.upload_buffer(
            gpu,
            bytemuck::cast_slice(&data.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            &format!("{} indices", data.name),
        )?;
        let index_buffer = owned.adopt_buffer(index_buffer);

        log::info!(
            "Mesh '{}' uploaded: {} vertices, {} indices",
            data.name,
            data.vertices.len(),
            data.indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
            transform: data.transform,
        })
    }

    pub fn draw_item(&self) -> DrawItem {
        DrawItem {
            vertex_buffer: self.vertex_buffer,
            index_buffer: self.index_buffer,
            index_count: self.index_count,
            transform: self.transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::NullGpu;

    #[test]
    fn identical_vertices_share_one_index() {
        let a = Vertex::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0]);
        let b = Vertex::new([1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]);

        let mesh = MeshData::from_vertex_stream("dup", [a, b, a]);

        assert_eq!(mesh.vertices, vec![a, b]);
        assert_eq!(mesh.indices, vec![0, 1, 0]);
    }

    #[test]
    fn vertices_differing_only_in_uv_stay_distinct() {
        let a = Vertex::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [0.0, 0.0]);
        let b = Vertex::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [0.0, 1.0]);

        let mesh = MeshData::from_vertex_stream("uv", [a, b]);

        assert_eq!(mesh.vertices.len(), 2);
        assert_eq!(mesh.indices, vec![0, 1]);
    }

    #[test]
    fn quad_has_four_unique_vertices_and_six_indices() {
        let quad = MeshData::quad();

        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.indices, vec![0, 1, 2, 2, 3, 0]);
        quad.validate().unwrap();
    }

    #[test]
    fn vertex_layout_matches_shader_locations() {
        assert_eq!(size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut quad = MeshData::quad();
        quad.indices.push(4);

        assert!(matches!(quad.validate(), Err(EngineError::InvalidUpload(_))));
    }

    #[test]
    fn upload_creates_two_owned_buffers() {
        let gpu = NullGpu::new();
        let mut allocator = ResourceAllocator::new();
        let mut owned = TeardownList::new("mesh");

        let mesh = Mesh::upload(&gpu, &mut allocator, &mut owned, &MeshData::quad()).unwrap();

        assert_eq!(mesh.index_count, 6);
        assert_eq!(owned.len(), 2);
        let indices = gpu.buffer_contents(mesh.index_buffer).unwrap();
        assert_eq!(indices, bytemuck::cast_slice::<u32, u8>(&[0, 1, 2, 2, 3, 0]).to_vec());

        owned.release(&gpu, &mut allocator).unwrap();
        assert_eq!(allocator.live_allocations(), 0);
    }
}
