//! E2KM weight container codec.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! "E2KM" | version: u8 | count: u8 | record * count
//! record = name\0 | rank: u8 | dims: u32 * rank | tag: u8 | data
//! ```
//!
//! Element tags are 0 = i64, 1 = f32, 2 = f64. Parsing performs no numeric
//! work; tensors are materialized later by [`crate::WeightStore`].

use std::collections::HashSet;

use candle_core::{Device, Tensor};
use kana_core::{KanaError, KanaResult};
use tracing::warn;

/// Leading magic bytes.
pub const MAGIC: &[u8; 4] = b"E2KM";

/// Only supported format version.
pub const VERSION: u8 = 1;

/// Element type of a stored tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    I64,
    F32,
    F64,
}

impl ElementType {
    /// Decode a dtype tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::I64),
            1 => Some(Self::F32),
            2 => Some(Self::F64),
            _ => None,
        }
    }

    /// Tag written to the container.
    pub fn tag(self) -> u8 {
        match self {
            Self::I64 => 0,
            Self::F32 => 1,
            Self::F64 => 2,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::I64 | Self::F64 => 8,
            Self::F32 => 4,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
        }
    }
}

/// One named tensor as stored in the container.
#[derive(Clone, PartialEq)]
pub struct RawTensor {
    name: String,
    shape: Vec<usize>,
    dtype: ElementType,
    data: Vec<u8>,
}

impl std::fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawTensor")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

impl RawTensor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Number of elements.
    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decode the little-endian payload into a tensor on `device`.
    pub fn to_tensor(&self, device: &Device) -> KanaResult<Tensor> {
        let shape = self.shape.clone();
        let tensor = match self.dtype {
            ElementType::I64 => {
                let values: Vec<i64> = self
                    .data
                    .chunks_exact(8)
                    .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect();
                Tensor::from_vec(values, shape, device)?
            }
            ElementType::F32 => {
                let values: Vec<f32> = self
                    .data
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                Tensor::from_vec(values, shape, device)?
            }
            ElementType::F64 => {
                let values: Vec<f64> = self
                    .data
                    .chunks_exact(8)
                    .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect();
                Tensor::from_vec(values, shape, device)?
            }
        };
        Ok(tensor)
    }
}

/// Parsed container: tensors in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    tensors: Vec<RawTensor>,
}

impl Container {
    /// Parse a container from bytes.
    pub fn parse(bytes: &[u8]) -> KanaResult<Self> {
        let mut reader = Reader::new(bytes);

        let magic = reader.take(MAGIC.len(), "magic")?;
        if magic != MAGIC {
            return Err(KanaError::invalid_container(format!(
                "bad magic {magic:02x?}"
            )));
        }

        let version = reader.u8("version")?;
        if version != VERSION {
            return Err(KanaError::UnsupportedVersion(version));
        }

        let count = reader.u8("tensor count")?;
        if count == 0 {
            return Err(KanaError::invalid_container("container holds no tensors"));
        }

        let mut tensors = Vec::with_capacity(count as usize);
        let mut seen = HashSet::new();
        for _ in 0..count {
            let tensor = reader.record()?;
            if !seen.insert(tensor.name.clone()) {
                return Err(KanaError::invalid_container(format!(
                    "duplicate tensor {:?}",
                    tensor.name
                )));
            }
            tensors.push(tensor);
        }

        if reader.remaining() > 0 {
            warn!(
                trailing = reader.remaining(),
                "ignoring trailing bytes after last tensor"
            );
        }

        Ok(Self { tensors })
    }

    /// Serialize to the container layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload: usize = self
            .tensors
            .iter()
            .map(|t| t.name.len() + 2 + 4 * t.shape.len() + 1 + t.data.len())
            .sum();
        let mut out = Vec::with_capacity(MAGIC.len() + 2 + payload);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        // Count and dims are range-checked by the builder and the parser.
        out.push(self.tensors.len() as u8);
        for t in &self.tensors {
            out.extend_from_slice(t.name.as_bytes());
            out.push(0);
            out.push(t.shape.len() as u8);
            for &d in &t.shape {
                out.extend_from_slice(&(d as u32).to_le_bytes());
            }
            out.push(t.dtype.tag());
            out.extend_from_slice(&t.data);
        }
        out
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&RawTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Tensors in file order.
    pub fn tensors(&self) -> &[RawTensor] {
        &self.tensors
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// Incremental builder for containers.
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    tensors: Vec<RawTensor>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an f32 tensor.
    pub fn add_f32(&mut self, name: impl Into<String>, shape: &[usize], values: &[f32]) -> &mut Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name.into(), shape, ElementType::F32, data)
    }

    /// Append an f64 tensor.
    pub fn add_f64(&mut self, name: impl Into<String>, shape: &[usize], values: &[f64]) -> &mut Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name.into(), shape, ElementType::F64, data)
    }

    /// Append an i64 tensor.
    pub fn add_i64(&mut self, name: impl Into<String>, shape: &[usize], values: &[i64]) -> &mut Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(name.into(), shape, ElementType::I64, data)
    }

    fn push(&mut self, name: String, shape: &[usize], dtype: ElementType, data: Vec<u8>) -> &mut Self {
        self.tensors.push(RawTensor {
            name,
            shape: shape.to_vec(),
            dtype,
            data,
        });
        self
    }

    /// Validate and produce the container.
    pub fn build(&self) -> KanaResult<Container> {
        if self.tensors.is_empty() {
            return Err(KanaError::invalid_container("container holds no tensors"));
        }
        if self.tensors.len() > u8::MAX as usize {
            return Err(KanaError::invalid_container(format!(
                "{} tensors exceed the format limit of {}",
                self.tensors.len(),
                u8::MAX
            )));
        }

        let mut seen = HashSet::new();
        for t in &self.tensors {
            if t.name.is_empty() || t.name.contains('\0') {
                return Err(KanaError::invalid_container(format!(
                    "invalid tensor name {:?}",
                    t.name
                )));
            }
            if !seen.insert(t.name.as_str()) {
                return Err(KanaError::invalid_container(format!(
                    "duplicate tensor {:?}",
                    t.name
                )));
            }
            if t.shape.len() > u8::MAX as usize || t.shape.iter().any(|&d| d > u32::MAX as usize) {
                return Err(KanaError::invalid_container(format!(
                    "shape {:?} of {:?} is not representable",
                    t.shape, t.name
                )));
            }
            if t.elem_count() * t.dtype.size() != t.data.len() {
                return Err(KanaError::ShapeMismatch {
                    name: t.name.clone(),
                    expected: t.shape.clone(),
                    actual: vec![t.data.len() / t.dtype.size()],
                });
            }
        }

        Ok(Container {
            tensors: self.tensors.clone(),
        })
    }

    /// Validate and serialize in one step.
    pub fn to_bytes(&self) -> KanaResult<Vec<u8>> {
        Ok(self.build()?.to_bytes())
    }
}

/// Bounds-checked cursor over the input buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> KanaResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(KanaError::truncated(what));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> KanaResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> KanaResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self, what: &str) -> KanaResult<String> {
        let rest = &self.buf[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| KanaError::truncated(what))?;
        let name = std::str::from_utf8(&rest[..len])
            .map_err(|e| KanaError::invalid_container(format!("{what} is not UTF-8: {e}")))?
            .to_string();
        self.pos += len + 1;
        Ok(name)
    }

    fn record(&mut self) -> KanaResult<RawTensor> {
        let name = self.cstr("tensor name")?;

        let rank = self.u8("tensor rank")?;
        let mut shape = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            shape.push(self.u32("tensor dims")? as usize);
        }

        let tag = self.u8("dtype tag")?;
        let dtype = ElementType::from_tag(tag).ok_or_else(|| KanaError::UnsupportedDtype {
            name: name.clone(),
            tag,
        })?;

        let byte_len = shape
            .iter()
            .try_fold(dtype.size(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                KanaError::invalid_container(format!("element count of {name:?} overflows"))
            })?;
        let data = self.take(byte_len, "tensor data")?.to_vec();

        Ok(RawTensor {
            name,
            shape,
            dtype,
            data,
        })
    }
}
