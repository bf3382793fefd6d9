use thiserror::Error;

use crate::intrinsic::Intrinsic;

/// The data types a manifest element can take, sized and aligned the way the
/// GPU expects them (an element of n bytes sits on an n-byte boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl ElementType {
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            ElementType::Float => 4,
            ElementType::Vec2 => 8,
            ElementType::Vec3 => 12,
            ElementType::Vec4 => 16,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ElementType::Float => "float",
            ElementType::Vec2 => "vec2",
            ElementType::Vec3 => "vec3",
            ElementType::Vec4 => "vec4",
        }
    }

    pub fn dimension(&self) -> u32 {
        match self {
            ElementType::Float => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 => 4,
        }
    }

    pub fn for_dimension(dimension: u32) -> Option<ElementType> {
        match dimension {
            1 => Some(ElementType::Float),
            2 => Some(ElementType::Vec2),
            3 => Some(ElementType::Vec3),
            4 => Some(ElementType::Vec4),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("duplicate manifest element {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone)]
struct BuilderElement {
    name: String,
    ty: ElementType,
    intrinsic: Option<Intrinsic>,
}

/// Collects named elements in any order; `pack` produces the immutable,
/// densely laid out [`Manifest`].
///
/// Packing is greedy: elements are placed generally in descending size
/// order, with smaller elements pulled forward into alignment padding when
/// the offsets allow it.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    elements: Vec<BuilderElement>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(
        &mut self,
        name: &str,
        ty: ElementType,
        intrinsic: Option<Intrinsic>,
    ) -> Result<(), ManifestError> {
        if self.elements.iter().any(|element| element.name == name) {
            return Err(ManifestError::Duplicate(name.to_string()));
        }
        self.elements.push(BuilderElement {
            name: name.to_string(),
            ty,
            intrinsic,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn pack(self) -> Manifest {
        let mut floats = Vec::new();
        let mut vec2s = Vec::new();
        let mut vec3s = Vec::new();
        let mut vec4s = Vec::new();
        for element in self.elements {
            match element.ty {
                ElementType::Float => floats.push(element),
                ElementType::Vec2 => vec2s.push(element),
                ElementType::Vec3 => vec3s.push(element),
                ElementType::Vec4 => vec4s.push(element),
            }
        }

        let mut manifest = Manifest {
            elements: Vec::new(),
            size: 0,
        };

        for element in vec4s {
            manifest.place(element);
        }

        if !vec3s.is_empty() {
            // Pull trailing smaller elements forward into the alignment gap
            // before the vec3 run starts.
            let mut padding = 12 - (manifest.size % 12);
            if padding < 12 {
                if padding >= 8 && manifest.size % 8 == 0 {
                    if let Some(element) = vec2s.pop() {
                        manifest.place(element);
                        padding -= 8;
                    }
                }
                manifest.fill_with_floats(&mut padding, &mut floats);
                manifest.size += padding;
            }
            for element in vec3s {
                manifest.place(element);
            }
        }

        if !vec2s.is_empty() {
            let mut padding = 8 - (manifest.size % 8);
            if padding < 8 {
                manifest.fill_with_floats(&mut padding, &mut floats);
                manifest.size += padding;
            }
            for element in vec2s {
                manifest.place(element);
            }
        }

        for element in floats {
            manifest.place(element);
        }

        manifest
    }
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    ty: ElementType,
    intrinsic: Option<Intrinsic>,
    offset: u32,
}

/// A packed buffer layout. Element indices follow emission order, not the
/// order of the `add` calls that produced the builder.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    elements: Vec<Element>,
    size: u32,
}

impl Manifest {
    fn place(&mut self, element: BuilderElement) {
        let size = element.ty.size_in_bytes();
        self.elements.push(Element {
            name: element.name,
            ty: element.ty,
            intrinsic: element.intrinsic,
            offset: self.size,
        });
        self.size += size;
    }

    fn fill_with_floats(&mut self, padding: &mut u32, floats: &mut Vec<BuilderElement>) {
        while *padding >= 4 && self.size % 4 == 0 && !floats.is_empty() {
            let element = floats.pop().unwrap();
            self.place(element);
            *padding -= 4;
        }
    }

    pub fn number_of_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn size_in_bytes(&self) -> u32 {
        self.size
    }

    pub fn name_for_element(&self, index: usize) -> &str {
        &self.elements[index].name
    }

    pub fn type_for_element(&self, index: usize) -> ElementType {
        self.elements[index].ty
    }

    pub fn type_name_for_element(&self, index: usize) -> &'static str {
        self.elements[index].ty.type_name()
    }

    pub fn intrinsic_for_element(&self, index: usize) -> Option<Intrinsic> {
        self.elements[index].intrinsic
    }

    pub fn offset_for_element(&self, index: usize) -> u32 {
        self.elements[index].offset
    }

    /// Distance in bytes from this element's offset to the next element's
    /// offset, or to the end of the buffer for the last element. Alignment
    /// padding is charged to the preceding element.
    pub fn stride_for_element(&self, index: usize) -> u32 {
        if index == self.elements.len() - 1 {
            self.size - self.elements[index].offset
        } else {
            self.elements[index + 1].offset - self.elements[index].offset
        }
    }

    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|element| element.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manifest() {
        let unpacked = ManifestBuilder::new();
        assert!(unpacked.is_empty());
        let packed = unpacked.pack();
        assert_eq!(0, packed.number_of_elements());
        assert_eq!(0, packed.size_in_bytes());
    }

    #[test]
    fn homogeneous_types() {
        let mut builder = ManifestBuilder::new();
        builder.add("a", ElementType::Float, None).unwrap();
        builder.add("b", ElementType::Float, None).unwrap();
        assert_eq!(
            Err(ManifestError::Duplicate("b".to_string())),
            builder.add("b", ElementType::Vec2, None)
        );
        builder.add("c", ElementType::Float, None).unwrap();
        let packed = builder.pack();

        assert_eq!(3, packed.number_of_elements());
        assert_eq!(12, packed.size_in_bytes());
        for i in 0..packed.number_of_elements() {
            assert_eq!("float", packed.type_name_for_element(i));
            assert_eq!(4, packed.stride_for_element(i));
            assert_eq!(i as u32 * 4, packed.offset_for_element(i));
            assert_eq!(ElementType::Float, packed.type_for_element(i));
            assert_eq!(None, packed.intrinsic_for_element(i));
        }
        let names: Vec<&str> = (0..3).map(|i| packed.name_for_element(i)).collect();
        assert_eq!(vec!["a", "b", "c"], names);
    }

    #[test]
    fn heterogeneous_types() {
        let mut builder = ManifestBuilder::new();
        builder
            .add("theFloat", ElementType::Float, Some(Intrinsic::Time))
            .unwrap();
        builder.add("theVec3", ElementType::Vec3, None).unwrap();
        builder.add("theVec4", ElementType::Vec4, None).unwrap();
        builder
            .add("theVec2", ElementType::Vec2, Some(Intrinsic::NormPos))
            .unwrap();
        let packed = builder.pack();

        assert_eq!(4, packed.number_of_elements());
        assert_eq!(40, packed.size_in_bytes());

        // vec4 first.
        assert_eq!("theVec4", packed.name_for_element(0));
        assert_eq!(0, packed.offset_for_element(0));
        assert_eq!(16, packed.stride_for_element(0));

        // The vec3 is not aligned at 16, but the vec2 fits in the gap.
        assert_eq!("theVec2", packed.name_for_element(1));
        assert_eq!(16, packed.offset_for_element(1));
        assert_eq!(8, packed.stride_for_element(1));
        assert_eq!(Some(Intrinsic::NormPos), packed.intrinsic_for_element(1));

        assert_eq!("theVec3", packed.name_for_element(2));
        assert_eq!(24, packed.offset_for_element(2));
        assert_eq!(12, packed.stride_for_element(2));

        assert_eq!("theFloat", packed.name_for_element(3));
        assert_eq!(36, packed.offset_for_element(3));
        assert_eq!(4, packed.stride_for_element(3));
        assert_eq!(Some(Intrinsic::Time), packed.intrinsic_for_element(3));
    }

    #[test]
    fn fills_padding_before_vec2_run() {
        let mut builder = ManifestBuilder::new();
        builder.add("a", ElementType::Float, None).unwrap();
        builder.add("b", ElementType::Vec4, None).unwrap();
        builder.add("c", ElementType::Vec2, None).unwrap();
        builder.add("d", ElementType::Float, None).unwrap();
        let packed = builder.pack();

        let names: Vec<&str> = (0..4).map(|i| packed.name_for_element(i)).collect();
        assert_eq!(vec!["b", "c", "a", "d"], names);
        let offsets: Vec<u32> = (0..4).map(|i| packed.offset_for_element(i)).collect();
        assert_eq!(vec![0, 16, 24, 28], offsets);
        assert_eq!(32, packed.size_in_bytes());
    }

    #[test]
    fn packing_invariants_hold() {
        let mut builder = ManifestBuilder::new();
        builder.add("f0", ElementType::Float, None).unwrap();
        builder.add("v3a", ElementType::Vec3, None).unwrap();
        builder.add("v2a", ElementType::Vec2, None).unwrap();
        builder.add("v4a", ElementType::Vec4, None).unwrap();
        builder.add("f1", ElementType::Float, None).unwrap();
        builder.add("v3b", ElementType::Vec3, None).unwrap();
        let packed = builder.pack();

        let mut stride_sum = 0;
        for i in 0..packed.number_of_elements() {
            let stride = packed.stride_for_element(i);
            assert_eq!(0, packed.offset_for_element(i) % stride);
            stride_sum += stride;
        }
        assert_eq!(packed.size_in_bytes(), stride_sum);
    }

    #[test]
    fn deterministic_for_same_insertion_sequence() {
        let build = || {
            let mut builder = ManifestBuilder::new();
            builder.add("x", ElementType::Vec2, None).unwrap();
            builder.add("y", ElementType::Float, None).unwrap();
            builder.add("z", ElementType::Vec4, None).unwrap();
            builder.pack()
        };
        let first = build();
        let second = build();
        assert_eq!(first.number_of_elements(), second.number_of_elements());
        for i in 0..first.number_of_elements() {
            assert_eq!(first.name_for_element(i), second.name_for_element(i));
            assert_eq!(first.offset_for_element(i), second.offset_for_element(i));
            assert_eq!(first.stride_for_element(i), second.stride_for_element(i));
        }
    }
}
