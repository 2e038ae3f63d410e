//! Named tensor store built from either weight file format.

use std::collections::BTreeMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use kana_core::{KanaError, KanaResult};
use tracing::{debug, info, instrument};

use crate::container::{Container, MAGIC};

/// On-disk representation the store was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    /// E2KM tagged-tensor container.
    Container,
    /// safetensors with a metadata side table.
    Safetensors,
}

impl std::fmt::Display for WeightFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightFormat::Container => write!(f, "e2km"),
            WeightFormat::Safetensors => write!(f, "safetensors"),
        }
    }
}

/// Side-table entries written by the export tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightMetadata {
    /// NUL-joined input table.
    pub in_table: Option<String>,
    /// NUL-joined output table.
    pub out_table: Option<String>,
    pub sos_idx: Option<usize>,
    pub eos_idx: Option<usize>,
}

impl WeightMetadata {
    fn from_map(map: &std::collections::HashMap<String, String>) -> KanaResult<Self> {
        let index = |key: &str| -> KanaResult<Option<usize>> {
            map.get(key)
                .map(|v| {
                    v.trim().parse::<usize>().map_err(|e| {
                        KanaError::invalid_container(format!("metadata {key}={v:?}: {e}"))
                    })
                })
                .transpose()
        };
        Ok(Self {
            in_table: map.get("in_table").cloned(),
            out_table: map.get("out_table").cloned(),
            sos_idx: index("sos_idx")?,
            eos_idx: index("eos_idx")?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Summary of one stored tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<usize>,
    /// Element type as stored on disk.
    pub stored_dtype: DType,
}

#[derive(Debug)]
struct Entry {
    tensor: Tensor,
    stored_dtype: DType,
}

/// All tensors of one weight file, keyed by name.
#[derive(Debug)]
pub struct WeightStore {
    entries: BTreeMap<String, Entry>,
    metadata: WeightMetadata,
    format: WeightFormat,
    device: Device,
}

impl WeightStore {
    /// Read and parse a weight file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> KanaResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| KanaError::ModelLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_bytes(&bytes)?;
        info!(
            format = %store.format,
            tensors = store.len(),
            bytes = bytes.len(),
            "Loaded weights from {}",
            path.display()
        );
        Ok(store)
    }

    /// Parse weights, detecting the format from the leading bytes.
    pub fn from_bytes(bytes: &[u8]) -> KanaResult<Self> {
        if bytes.starts_with(MAGIC) {
            Self::from_container(&Container::parse(bytes)?)
        } else {
            Self::from_safetensors(bytes)
        }
    }

    /// Materialize every tensor of a parsed container.
    pub fn from_container(container: &Container) -> KanaResult<Self> {
        let device = Device::Cpu;
        let mut entries = BTreeMap::new();
        for raw in container.tensors() {
            let tensor = raw.to_tensor(&device)?;
            let stored_dtype = tensor.dtype();
            entries.insert(
                raw.name().to_string(),
                Entry {
                    tensor,
                    stored_dtype,
                },
            );
        }
        Ok(Self {
            entries,
            metadata: WeightMetadata::default(),
            format: WeightFormat::Container,
            device,
        })
    }

    /// Parse a safetensors buffer; half-precision tensors are upcast to f32.
    pub fn from_safetensors(bytes: &[u8]) -> KanaResult<Self> {
        let device = Device::Cpu;
        let (_, header) = safetensors::SafeTensors::read_metadata(bytes)
            .map_err(|e| KanaError::invalid_container(format!("not a weight file: {e}")))?;
        let metadata = match header.metadata() {
            Some(map) => WeightMetadata::from_map(map)?,
            None => WeightMetadata::default(),
        };

        let tensors = candle_core::safetensors::load_buffer(bytes, &device)
            .map_err(|e| KanaError::invalid_container(format!("safetensors: {e}")))?;

        let mut entries = BTreeMap::new();
        for (name, tensor) in tensors {
            let stored_dtype = tensor.dtype();
            let tensor = match stored_dtype {
                DType::F16 | DType::BF16 => {
                    debug!(tensor = %name, from = ?stored_dtype, "upcasting to f32");
                    tensor.to_dtype(DType::F32)?
                }
                _ => tensor,
            };
            entries.insert(
                name,
                Entry {
                    tensor,
                    stored_dtype,
                },
            );
        }
        if entries.is_empty() {
            return Err(KanaError::invalid_container("weight file holds no tensors"));
        }

        Ok(Self {
            entries,
            metadata,
            format: WeightFormat::Safetensors,
            device,
        })
    }

    /// Fetch a tensor, checking its shape and converting to `dtype`.
    pub fn get(&self, name: &str, expected: &[usize], dtype: DType) -> KanaResult<Tensor> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| KanaError::MissingTensor(name.to_string()))?;
        if entry.tensor.dims() != expected {
            return Err(KanaError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                actual: entry.tensor.dims().to_vec(),
            });
        }
        Ok(entry.tensor.to_dtype(dtype)?)
    }

    /// Shape of a tensor, if present.
    pub fn shape_of(&self, name: &str) -> Option<&[usize]> {
        self.entries.get(name).map(|e| e.tensor.dims())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Per-tensor summaries in name order.
    pub fn describe(&self) -> Vec<TensorInfo> {
        self.entries
            .iter()
            .map(|(name, e)| TensorInfo {
                name: name.clone(),
                shape: e.tensor.dims().to_vec(),
                stored_dtype: e.stored_dtype,
            })
            .collect()
    }

    /// Total number of stored elements.
    pub fn parameter_count(&self) -> usize {
        self.entries.values().map(|e| e.tensor.elem_count()).sum()
    }

    pub fn metadata(&self) -> &WeightMetadata {
        &self.metadata
    }

    pub fn format(&self) -> WeightFormat {
        self.format
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
