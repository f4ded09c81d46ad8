//! Typed per-vertex (or per-keyframe) data arrays.

/// Shape of one accessor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    /// Number of components per element.
    pub fn multiplicity(self) -> usize {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 => 4,
            ElementType::Mat2 => 4,
            ElementType::Mat3 => 9,
            ElementType::Mat4 => 16,
        }
    }

    pub fn is_matrix(self) -> bool {
        matches!(self, ElementType::Mat2 | ElementType::Mat3 | ElementType::Mat4)
    }
}

/// Component storage, one variant per glTF component type.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessorData {
    F32(Vec<f32>),
    U32(Vec<u32>),
    U16(Vec<u16>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    I8(Vec<i8>),
}

impl AccessorData {
    /// Total number of components (not elements).
    pub fn len(&self) -> usize {
        match self {
            AccessorData::F32(v) => v.len(),
            AccessorData::U32(v) => v.len(),
            AccessorData::U16(v) => v.len(),
            AccessorData::U8(v) => v.len(),
            AccessorData::I16(v) => v.len(),
            AccessorData::I8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn component_size(&self) -> usize {
        match self {
            AccessorData::F32(_) | AccessorData::U32(_) => 4,
            AccessorData::U16(_) | AccessorData::I16(_) => 2,
            AccessorData::U8(_) | AccessorData::I8(_) => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, AccessorData::F32(_))
    }

    /// Values as `f32`, applying the normalized-integer mapping when asked to.
    pub fn to_f32(&self, normalized: bool) -> Vec<f32> {
        match self {
            AccessorData::F32(v) => v.clone(),
            AccessorData::U32(v) if normalized => {
                v.iter().map(|&x| (x as f64 / u32::MAX as f64) as f32).collect()
            }
            AccessorData::U32(v) => v.iter().map(|&x| x as f32).collect(),
            AccessorData::U16(v) if normalized => v.iter().map(|&x| x as f32 / 65535.0).collect(),
            AccessorData::U16(v) => v.iter().map(|&x| x as f32).collect(),
            AccessorData::U8(v) if normalized => v.iter().map(|&x| x as f32 / 255.0).collect(),
            AccessorData::U8(v) => v.iter().map(|&x| x as f32).collect(),
            AccessorData::I16(v) if normalized => {
                v.iter().map(|&x| (x as f32 / 32767.0).max(-1.0)).collect()
            }
            AccessorData::I16(v) => v.iter().map(|&x| x as f32).collect(),
            AccessorData::I8(v) if normalized => {
                v.iter().map(|&x| (x as f32 / 127.0).max(-1.0)).collect()
            }
            AccessorData::I8(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    /// Values as indices. Only unsigned integer storage qualifies.
    pub fn to_u32(&self) -> Option<Vec<u32>> {
        match self {
            AccessorData::U32(v) => Some(v.clone()),
            AccessorData::U16(v) => Some(v.iter().map(|&x| x as u32).collect()),
            AccessorData::U8(v) => Some(v.iter().map(|&x| x as u32).collect()),
            _ => None,
        }
    }

    /// Appends the little-endian bytes of component `i`.
    pub fn write_component(&self, i: usize, out: &mut Vec<u8>) {
        match self {
            AccessorData::F32(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            AccessorData::U32(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            AccessorData::U16(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            AccessorData::U8(v) => out.push(v[i]),
            AccessorData::I16(v) => out.extend_from_slice(&v[i].to_le_bytes()),
            AccessorData::I8(v) => out.extend_from_slice(&v[i].to_le_bytes()),
        }
    }

    /// Raw component value as `f64`, without normalization.
    pub fn raw(&self, i: usize) -> f64 {
        match self {
            AccessorData::F32(v) => v[i] as f64,
            AccessorData::U32(v) => v[i] as f64,
            AccessorData::U16(v) => v[i] as f64,
            AccessorData::U8(v) => v[i] as f64,
            AccessorData::I16(v) => v[i] as f64,
            AccessorData::I8(v) => v[i] as f64,
        }
    }

    /// Components of the listed elements, in order, keeping the storage type.
    pub fn gather(&self, multiplicity: usize, elements: &[u32]) -> AccessorData {
        fn pick<T: Copy>(v: &[T], n: usize, elements: &[u32]) -> Vec<T> {
            elements
                .iter()
                .flat_map(|&e| {
                    let start = e as usize * n;
                    v[start..start + n].iter().copied()
                })
                .collect()
        }
        match self {
            AccessorData::F32(v) => AccessorData::F32(pick(v, multiplicity, elements)),
            AccessorData::U32(v) => AccessorData::U32(pick(v, multiplicity, elements)),
            AccessorData::U16(v) => AccessorData::U16(pick(v, multiplicity, elements)),
            AccessorData::U8(v) => AccessorData::U8(pick(v, multiplicity, elements)),
            AccessorData::I16(v) => AccessorData::I16(pick(v, multiplicity, elements)),
            AccessorData::I8(v) => AccessorData::I8(pick(v, multiplicity, elements)),
        }
    }

    /// Bit-exact identity, used by dedup. `-0.0` and `0.0` stay distinct.
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AccessorData::F32(a), AccessorData::F32(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            _ => self == other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub name: Option<String>,
    pub element_type: ElementType,
    pub normalized: bool,
    pub data: AccessorData,
}

impl Accessor {
    pub fn new(element_type: ElementType, data: AccessorData) -> Self {
        Self {
            name: None,
            element_type,
            normalized: false,
            data,
        }
    }

    pub fn from_f32(element_type: ElementType, values: Vec<f32>) -> Self {
        Self::new(element_type, AccessorData::F32(values))
    }

    /// Index accessor using the narrowest unsigned type that fits.
    pub fn from_indices(indices: Vec<u32>) -> Self {
        let max = indices.iter().copied().max().unwrap_or(0);
        let data = if max < u16::MAX as u32 {
            AccessorData::U16(indices.into_iter().map(|i| i as u16).collect())
        } else {
            AccessorData::U32(indices)
        };
        Self::new(ElementType::Scalar, data)
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.data.len() / self.element_type.multiplicity()
    }

    /// Size in bytes of one tightly packed element.
    pub fn element_size(&self) -> usize {
        self.data.component_size() * self.element_type.multiplicity()
    }

    /// New accessor holding only the listed elements.
    pub fn gather(&self, elements: &[u32]) -> Accessor {
        Accessor {
            name: self.name.clone(),
            element_type: self.element_type,
            normalized: self.normalized,
            data: self.data.gather(self.element_type.multiplicity(), elements),
        }
    }

    pub fn read_f32(&self) -> Vec<f32> {
        self.data.to_f32(self.normalized)
    }

    pub fn read_indices(&self) -> Option<Vec<u32>> {
        self.data.to_u32()
    }

    /// Per-component raw minimum and maximum, or `None` when empty.
    pub fn bounds(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let n = self.element_type.multiplicity();
        if self.data.len() < n {
            return None;
        }
        let mut min = vec![f64::INFINITY; n];
        let mut max = vec![f64::NEG_INFINITY; n];
        for i in 0..self.data.len() {
            let value = self.data.raw(i);
            let c = i % n;
            min[c] = min[c].min(value);
            max[c] = max[c].max(value);
        }
        Some((min, max))
    }

    pub fn same_content(&self, other: &Self) -> bool {
        self.element_type == other.element_type
            && self.normalized == other.normalized
            && self.data.bitwise_eq(&other.data)
    }
}
