//! Weight-set loading with strict parameter binding.
//!
//! A weight set is read into a [`StateDict`] (safetensors or a `torch.save`
//! checkpoint), its keys are normalized, and the classifier is built through a
//! [`VarBuilder`] backed by a claim tracker. Every parameter the architecture
//! asks for must exist with the right shape, and every stored parameter must be
//! asked for. Anything else is a [`WeightLoadError::Incompatible`].

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use candle_core::pickle::{Object, Stack, TensorInfo};
use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::var_builder::SimpleBackend;
use candle_nn::init::Init;
use candle_nn::VarBuilder;
use safetensors::SafeTensors;
use tracing::{debug, warn};

use crate::error::WeightLoadError;

/// Prefix added by `DataParallel` / `DistributedDataParallel` exports.
pub const WRAPPER_PREFIX: &str = "module.";

/// BatchNorm step counters; stored in checkpoints but never bound.
const TOLERATED_SUFFIX: &str = "num_batches_tracked";

/// Unexpected keys listed in an error message before truncating.
const MAX_LISTED_KEYS: usize = 8;

/// Checkpoint entry holding the parameters when the file is a training
/// checkpoint rather than a bare state dict.
const STATE_DICT_KEY: &str = "state_dict";

/// First pickle of a legacy `torch.save` file: protocol 2, then the magic
/// number `0x1950a86a20f9469cfc6c` as a 10-byte LONG1, then STOP.
const LEGACY_MAGIC: [u8; 15] = [
    0x80, 0x02, 0x8a, 0x0a, 0x6c, 0xfc, 0x9c, 0x46, 0xf9, 0x20, 0x6a, 0xa8, 0x50, 0x19, b'.',
];

/// Serialization protocol version written after [`LEGACY_MAGIC`].
const LEGACY_PROTOCOL: i32 = 1001;

/// Strips exactly one leading [`WRAPPER_PREFIX`] from a parameter key.
#[must_use]
pub fn normalize_key(key: &str) -> &str {
    key.strip_prefix(WRAPPER_PREFIX).unwrap_or(key)
}

/// Container format of a weight set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    /// `safetensors` (u64 header length followed by a JSON header).
    SafeTensors,
    /// `torch.save` zip archive (PyTorch 1.6 and later).
    Pickle,
    /// Legacy `torch.save` stream: pickles followed by raw storages.
    LegacyPickle,
}

impl WeightFormat {
    /// Detects the format from the file extension and leading bytes.
    #[must_use]
    pub fn detect(path: &Path, head: &[u8]) -> Self {
        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"));
        if by_extension || head.get(8) == Some(&b'{') {
            Self::SafeTensors
        } else if head.starts_with(&LEGACY_MAGIC) {
            Self::LegacyPickle
        } else {
            Self::Pickle
        }
    }
}

/// Parameters read from one weight set, keyed by normalized name.
#[derive(Debug)]
pub struct StateDict {
    path: PathBuf,
    tensors: HashMap<String, Tensor>,
}

impl StateDict {
    /// Builds a state dict from raw `(key, tensor)` pairs, normalizing keys.
    ///
    /// # Errors
    ///
    /// Returns [`WeightLoadError::Incompatible`] if two keys collide once the
    /// wrapper prefix is stripped.
    pub fn from_pairs(
        path: impl Into<PathBuf>,
        pairs: impl IntoIterator<Item = (String, Tensor)>,
    ) -> Result<Self, WeightLoadError> {
        let path = path.into();
        let mut tensors = HashMap::new();
        let mut stripped = 0usize;
        for (key, tensor) in pairs {
            let normalized = normalize_key(&key);
            if normalized.len() != key.len() {
                stripped += 1;
            }
            if tensors.insert(normalized.to_string(), tensor).is_some() {
                return Err(WeightLoadError::Incompatible {
                    path,
                    reason: format!("duplicate parameter '{normalized}' after key normalization"),
                });
            }
        }
        if stripped > 0 {
            debug!(path = %path.display(), stripped, "Stripped wrapper prefix from parameter keys");
        }
        Ok(Self { path, tensors })
    }

    /// Reads a weight set from disk onto the CPU.
    ///
    /// # Errors
    ///
    /// Returns [`WeightLoadError::Missing`] if nothing exists at `path`,
    /// [`WeightLoadError::Unreadable`] if the file cannot be read or parsed.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, WeightLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WeightLoadError::Missing {
                path: path.to_path_buf(),
            });
        }
        let unreadable = |e: &anyhow::Error| WeightLoadError::Unreadable {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        };
        if path.is_dir() {
            return Err(WeightLoadError::Unreadable {
                path: path.to_path_buf(),
                reason: "is a directory".to_string(),
            });
        }

        let head = read_head(path).map_err(|e| unreadable(&e))?;
        let format = WeightFormat::detect(path, &head);
        debug!(path = %path.display(), ?format, "Reading weight set");

        let pairs = match format {
            WeightFormat::SafeTensors => read_safetensors(path),
            WeightFormat::Pickle => read_checkpoint(path),
            WeightFormat::LegacyPickle => read_legacy_checkpoint(path),
        }
        .map_err(|e| unreadable(&e))?;

        if pairs.is_empty() {
            return Err(WeightLoadError::Unreadable {
                path: path.to_path_buf(),
                reason: "no tensors found".to_string(),
            });
        }
        Self::from_pairs(path, pairs)
    }

    /// Path the parameters were read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Returns true if no parameters are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Returns true if a parameter with this normalized key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    /// Builds a model, requiring an exact match between the parameters the
    /// builder requests and the parameters stored.
    ///
    /// # Errors
    ///
    /// Returns [`WeightLoadError::Incompatible`] on a missing parameter, a
    /// shape mismatch, or stored parameters the builder never requested.
    pub fn build_strict<T, F>(self, device: &Device, build: F) -> Result<T, WeightLoadError>
    where
        F: FnOnce(VarBuilder<'static>) -> candle_core::Result<T>,
    {
        let Self { path, tensors } = self;
        let claims = Arc::new(ClaimTracker::new(tensors));
        let backend = StrictBackend {
            claims: Arc::clone(&claims),
        };
        let vb = VarBuilder::from_backend(Box::new(backend), DType::F32, device.clone());

        let model = build(vb).map_err(|e| WeightLoadError::Incompatible {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let unexpected = claims.unclaimed();
        if !unexpected.is_empty() {
            return Err(WeightLoadError::Incompatible {
                path,
                reason: format!("unexpected parameters: {}", list_keys(&unexpected)),
            });
        }
        Ok(model)
    }
}

/// Stored tensors plus the set of keys the builder has requested.
struct ClaimTracker {
    tensors: HashMap<String, Tensor>,
    claimed: Mutex<HashSet<String>>,
}

impl ClaimTracker {
    fn new(tensors: HashMap<String, Tensor>) -> Self {
        Self {
            tensors,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, name: &str) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    fn unclaimed(&self) -> Vec<String> {
        let claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = self
            .tensors
            .keys()
            .filter(|k| !claimed.contains(*k) && !k.ends_with(TOLERATED_SUFFIX))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// `VarBuilder` backend that never initializes and records every lookup.
struct StrictBackend {
    claims: Arc<ClaimTracker>,
}

impl SimpleBackend for StrictBackend {
    fn get(
        &self,
        s: Shape,
        name: &str,
        _h: Init,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        let Some(tensor) = self.claims.tensors.get(name) else {
            candle_core::bail!("missing parameter '{name}'")
        };
        if tensor.shape() != &s {
            candle_core::bail!(
                "shape mismatch for '{name}': expected {s:?}, found {:?}",
                tensor.shape()
            )
        }
        self.claims.claim(name);
        tensor.to_dtype(dtype)?.to_device(dev)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        self.claims.tensors.contains_key(name)
    }
}

fn list_keys(keys: &[String]) -> String {
    let mut listed = keys
        .iter()
        .take(MAX_LISTED_KEYS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if keys.len() > MAX_LISTED_KEYS {
        listed.push_str(&format!(" (and {} more)", keys.len() - MAX_LISTED_KEYS));
    }
    listed
}

fn read_head(path: &Path) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open weight file: {}", path.display()))?;
    let mut head = Vec::with_capacity(16);
    file.by_ref()
        .take(16)
        .read_to_end(&mut head)
        .with_context(|| format!("Failed to read weight file: {}", path.display()))?;
    Ok(head)
}

/// Loads every tensor of a safetensors file onto the CPU.
fn read_safetensors(path: &Path) -> Result<Vec<(String, Tensor)>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read weight file: {}", path.display()))?;

    let tensors = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

    let mut pairs = Vec::with_capacity(tensors.len());
    for name in tensors.names() {
        let view = tensors
            .tensor(name)
            .with_context(|| format!("Failed to get tensor '{name}'"))?;

        let dtype = safetensors_dtype_to_candle(view.dtype())?;
        let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), &Device::Cpu)
            .with_context(|| format!("Failed to create tensor '{name}'"))?;

        pairs.push((name.clone(), tensor));
    }
    Ok(pairs)
}

/// Loads a `torch.save` checkpoint, preferring its `state_dict` entry.
fn read_checkpoint(path: &Path) -> Result<Vec<(String, Tensor)>> {
    match candle_core::pickle::read_all_with_key(path, Some(STATE_DICT_KEY)) {
        Ok(pairs) if !pairs.is_empty() => return Ok(pairs),
        Ok(_) => debug!(path = %path.display(), "Checkpoint has an empty state_dict entry"),
        Err(e) => debug!(path = %path.display(), "No state_dict entry in checkpoint: {e}"),
    }
    let pairs = candle_core::pickle::read_all_with_key(path, None)
        .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;
    if pairs.is_empty() {
        warn!(path = %path.display(), "Checkpoint contains no tensors");
    }
    Ok(pairs)
}

/// Loads a legacy (pre-zip) `torch.save` checkpoint.
///
/// After the magic number come four pickles: the protocol version, system
/// info, the checkpoint object and the sorted storage keys. Then every
/// storage follows in key order as an `i64` element count and raw
/// little-endian data.
fn read_legacy_checkpoint(path: &Path) -> Result<Vec<(String, Tensor)>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read weight file: {}", path.display()))?;
    let mut reader = Cursor::new(data.as_slice());
    reader.set_position(LEGACY_MAGIC.len() as u64);

    let protocol = read_pickle(&mut reader).context("Failed to read protocol version")?;
    if protocol != Object::Int(LEGACY_PROTOCOL) {
        anyhow::bail!("Unsupported legacy checkpoint protocol: {protocol:?}");
    }
    let sys_info = read_pickle(&mut reader).context("Failed to read system info")?;
    if dict_get(&sys_info, "little_endian") == Some(&Object::Bool(false)) {
        anyhow::bail!("Big-endian checkpoints are not supported");
    }
    let object = read_pickle(&mut reader).context("Failed to read checkpoint object")?;
    let keys = storage_keys(read_pickle(&mut reader).context("Failed to read storage keys")?)?;

    let mut storage_types = HashMap::new();
    collect_storage_types(&object, &mut storage_types);

    let mut storages: HashMap<String, &[u8]> = HashMap::with_capacity(keys.len());
    for key in keys {
        let class_name = storage_types
            .get(&key)
            .with_context(|| format!("Storage '{key}' is never referenced"))?;
        let element_size = storage_element_size(class_name)
            .with_context(|| format!("Unsupported storage type: {class_name}"))?;

        let mut count = [0u8; 8];
        reader
            .read_exact(&mut count)
            .with_context(|| format!("Truncated checkpoint at storage '{key}'"))?;
        let count = usize::try_from(i64::from_le_bytes(count))
            .with_context(|| format!("Invalid size for storage '{key}'"))?;

        let start = usize::try_from(reader.position())?;
        let end = count
            .checked_mul(element_size)
            .and_then(|len| start.checked_add(len))
            .with_context(|| format!("Invalid size for storage '{key}'"))?;
        let bytes = data
            .get(start..end)
            .with_context(|| format!("Truncated checkpoint at storage '{key}'"))?;
        reader.set_position(end as u64);
        storages.insert(key, bytes);
    }

    let Object::Dict(entries) = select_state_dict(object) else {
        anyhow::bail!("Checkpoint does not hold a state dict");
    };
    let mut pairs = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        match value.into_tensor_info(name, Path::new("")) {
            Ok(Some(info)) => pairs.push((info.name.clone(), legacy_tensor(&info, &storages)?)),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), "Skipping checkpoint entry: {e}"),
        }
    }
    Ok(pairs)
}

fn read_pickle(reader: &mut Cursor<&[u8]>) -> Result<Object> {
    let mut stack = Stack::empty();
    stack.read_loop(reader)?;
    Ok(stack.finalize()?)
}

fn dict_get<'a>(object: &'a Object, key: &str) -> Option<&'a Object> {
    let Object::Dict(entries) = object else {
        return None;
    };
    entries
        .iter()
        .find(|(k, _)| matches!(k, Object::Unicode(k) if k == key))
        .map(|(_, v)| v)
}

/// Takes the `state_dict` entry of a training checkpoint, or the object itself.
fn select_state_dict(object: Object) -> Object {
    let Object::Dict(mut entries) = object else {
        return object;
    };
    match entries
        .iter()
        .position(|(k, _)| matches!(k, Object::Unicode(k) if k == STATE_DICT_KEY))
    {
        Some(index) => entries.swap_remove(index).1,
        None => Object::Dict(entries),
    }
}

fn storage_keys(list: Object) -> Result<Vec<String>> {
    let Object::List(items) = list else {
        anyhow::bail!("Storage keys are not a list: {list:?}");
    };
    items
        .into_iter()
        .map(|item| match item {
            Object::Unicode(key) => Ok(key),
            other => Err(anyhow::anyhow!("Storage key is not a string: {other:?}")),
        })
        .collect()
}

/// Records `key -> storage class` for every persistent storage id in `object`.
fn collect_storage_types(object: &Object, out: &mut HashMap<String, String>) {
    match object {
        Object::PersistentLoad(id) => {
            if let Object::Tuple(fields) = id.as_ref() {
                if let [Object::Unicode(kind), Object::Class { class_name, .. }, Object::Unicode(key), ..] =
                    fields.as_slice()
                {
                    if kind == "storage" {
                        out.insert(key.clone(), class_name.clone());
                    }
                }
            }
        }
        Object::Tuple(items) | Object::List(items) => {
            for item in items {
                collect_storage_types(item, out);
            }
        }
        Object::Dict(entries) => {
            for (key, value) in entries {
                collect_storage_types(key, out);
                collect_storage_types(value, out);
            }
        }
        Object::Reduce { callable, args } | Object::Build { callable, args } => {
            collect_storage_types(callable, out);
            collect_storage_types(args, out);
        }
        _ => {}
    }
}

fn storage_element_size(class_name: &str) -> Option<usize> {
    let size = match class_name {
        "DoubleStorage" | "LongStorage" => 8,
        "FloatStorage" | "IntStorage" => 4,
        "HalfStorage" | "BFloat16Storage" | "ShortStorage" => 2,
        "ByteStorage" | "CharStorage" | "BoolStorage" => 1,
        _ => return None,
    };
    Some(size)
}

/// Cuts one tensor out of its storage.
fn legacy_tensor(info: &TensorInfo, storages: &HashMap<String, &[u8]>) -> Result<Tensor> {
    let key = info.path.rsplit('/').next().unwrap_or(&info.path);
    let bytes = storages
        .get(key)
        .with_context(|| format!("Tensor '{}' refers to missing storage '{key}'", info.name))?;
    if !info.layout.is_contiguous() {
        anyhow::bail!("Tensor '{}' is not contiguous", info.name);
    }

    let element_size = info.dtype.size_in_bytes();
    let start = info.layout.start_offset() * element_size;
    let end = start + info.layout.shape().elem_count() * element_size;
    let data = bytes
        .get(start..end)
        .with_context(|| format!("Tensor '{}' exceeds its storage", info.name))?;

    Tensor::from_raw_buffer(data, info.dtype, info.layout.shape().dims(), &Device::Cpu)
        .with_context(|| format!("Failed to create tensor '{}'", info.name))
}

/// Converts safetensors dtype to candle dtype.
fn safetensors_dtype_to_candle(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Ok(DType::F32),
        S::F64 => Ok(DType::F64),
        S::F16 => Ok(DType::F16),
        S::BF16 => Ok(DType::BF16),
        S::I64 => Ok(DType::I64),
        S::U8 => Ok(DType::U8),
        S::U32 => Ok(DType::U32),
        other => anyhow::bail!("Unsupported dtype: {other:?}"),
    }
}
