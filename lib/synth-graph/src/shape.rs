use crate::manifest::ElementType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleStrip,
}

/// Geometry used as the starting point for rendering a Scinth. ScinthDefs
/// evaluate the vertex manifest against a Shape to fill their vertex and
/// index buffers.
///
/// Additional shape support requires adding parsing in Archetypes.
pub trait Shape: Send + Sync + std::fmt::Debug {
    fn element_type(&self) -> ElementType;
    fn number_of_vertices(&self) -> u32;
    fn number_of_indices(&self) -> u32;
    fn topology(&self) -> Topology;

    /// Copy the canonical vertex position for `index` into `store`,
    /// returning the number of floats written.
    fn store_vertex_at_index(&self, index: u32, store: &mut [f32]) -> usize;

    /// Copy the texture coordinates for `index` into `store`, returning the
    /// number of floats written.
    fn store_texture_vertex_at_index(&self, index: u32, store: &mut [f32]) -> usize;

    fn indices(&self) -> &[u16];
}

/// A subdividable quad spanning [-1, 1] on both axes, drawn as one triangle
/// strip with degenerate joins between rows.
#[derive(Debug)]
pub struct Quad {
    width_edges: u32,
    height_edges: u32,
    indices: Vec<u16>,
}

impl Quad {
    pub fn new(width_edges: u32, height_edges: u32) -> Quad {
        let width_edges = width_edges.max(1);
        let height_edges = height_edges.max(1);
        let columns = width_edges + 1;
        let mut indices = Vec::new();
        for row in 0..height_edges {
            if row > 0 {
                // Degenerate join: repeat the last index of the previous row
                // and the first of this one.
                indices.push((row * columns + (columns - 1)) as u16);
                indices.push(((row + 1) * columns) as u16);
            }
            for column in 0..columns {
                indices.push(((row + 1) * columns + column) as u16);
                indices.push((row * columns + column) as u16);
            }
        }
        Quad {
            width_edges,
            height_edges,
            indices,
        }
    }
}

impl Shape for Quad {
    fn element_type(&self) -> ElementType {
        ElementType::Vec2
    }

    fn number_of_vertices(&self) -> u32 {
        (self.width_edges + 1) * (self.height_edges + 1)
    }

    fn number_of_indices(&self) -> u32 {
        self.indices.len() as u32
    }

    fn topology(&self) -> Topology {
        Topology::TriangleStrip
    }

    fn store_vertex_at_index(&self, index: u32, store: &mut [f32]) -> usize {
        let columns = self.width_edges + 1;
        let x = index % columns;
        let y = index / columns;
        store[0] = -1.0 + (2.0 * x as f32 / self.width_edges as f32);
        store[1] = -1.0 + (2.0 * y as f32 / self.height_edges as f32);
        2
    }

    fn store_texture_vertex_at_index(&self, index: u32, store: &mut [f32]) -> usize {
        let columns = self.width_edges + 1;
        let x = index % columns;
        let y = index / columns;
        store[0] = x as f32 / self.width_edges as f32;
        store[1] = y as f32 / self.height_edges as f32;
        2
    }

    fn indices(&self) -> &[u16] {
        &self.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_quad() {
        let quad = Quad::new(1, 1);
        assert_eq!(4, quad.number_of_vertices());
        assert_eq!(4, quad.number_of_indices());
        assert_eq!(Topology::TriangleStrip, quad.topology());
        assert_eq!(ElementType::Vec2, quad.element_type());

        let mut store = [0.0f32; 2];
        quad.store_vertex_at_index(0, &mut store);
        assert_eq!([-1.0, -1.0], store);
        quad.store_vertex_at_index(3, &mut store);
        assert_eq!([1.0, 1.0], store);
        quad.store_texture_vertex_at_index(0, &mut store);
        assert_eq!([0.0, 0.0], store);
        quad.store_texture_vertex_at_index(3, &mut store);
        assert_eq!([1.0, 1.0], store);
    }

    #[test]
    fn subdivided_quad_counts() {
        let quad = Quad::new(4, 3);
        assert_eq!(5 * 4, quad.number_of_vertices());
        // Each row emits 2 * columns indices, plus 2 degenerates per join.
        assert_eq!(3 * 10 + 2 * 2, quad.number_of_indices());
        for &index in quad.indices() {
            assert!((index as u32) < quad.number_of_vertices());
        }
    }

    #[test]
    fn vertices_cover_extents() {
        let quad = Quad::new(2, 2);
        let mut store = [0.0f32; 2];
        for i in 0..quad.number_of_vertices() {
            quad.store_vertex_at_index(i, &mut store);
            assert!(store[0] >= -1.0 && store[0] <= 1.0);
            assert!(store[1] >= -1.0 && store[1] <= 1.0);
            quad.store_texture_vertex_at_index(i, &mut store);
            assert!(store[0] >= 0.0 && store[0] <= 1.0);
            assert!(store[1] >= 0.0 && store[1] <= 1.0);
        }
    }
}
