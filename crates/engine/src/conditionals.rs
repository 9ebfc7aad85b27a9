//! Voice conditionals record and its on-disk format
//!
//! A [`VoiceConditionals`] is the expensive artifact of the speech-encoder
//! stage: four dense tensors that fully characterize a target speaker.
//! Records persist as a single little-endian blob with magic `COND` and a
//! version tag; readers reject anything whose header disagrees.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use voxclone_core::{CacheError, Error, Result};

const MAGIC: u32 = 0x434F_4E44; // "COND"
const VERSION: u32 = 1;

/// Upper bound on array rank; anything above this is a corrupt header.
const MAX_DIMS: u32 = 8;

/// A dense array with its shape carried alongside the data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorData<T> {
    pub shape: Vec<i64>,
    pub data: Vec<T>,
}

impl<T> TensorData<T> {
    pub fn new(shape: Vec<i64>, data: Vec<T>) -> Self {
        Self { shape, data }
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty() || self.data.is_empty()
    }

    /// Size of the given axis, or 0 when the rank is too small.
    pub fn dim(&self, axis: usize) -> i64 {
        self.shape.get(axis).copied().unwrap_or(0)
    }
}

/// Fixed-width little-endian element encoding.
trait LeElement: Sized + Copy {
    const SIZE: usize;
    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()>;
    fn read_le(buf: &[u8]) -> Self;
}

impl LeElement for f32 {
    const SIZE: usize = 4;
    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }
    fn read_le(buf: &[u8]) -> Self {
        f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

impl LeElement for i64 {
    const SIZE: usize = 8;
    fn write_le<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }
    fn read_le(buf: &[u8]) -> Self {
        i64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }
}

fn write_array<W: Write, T: LeElement>(w: &mut W, array: &TensorData<T>) -> io::Result<()> {
    w.write_all(&(array.shape.len() as u32).to_le_bytes())?;
    for &dim in &array.shape {
        w.write_all(&dim.to_le_bytes())?;
    }
    let byte_count = (array.data.len() * T::SIZE) as u64;
    w.write_all(&byte_count.to_le_bytes())?;
    for &v in &array.data {
        v.write_le(w)?;
    }
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_array<R: Read, T: LeElement>(r: &mut R) -> Result<TensorData<T>> {
    let num_dims = read_u32(r)?;
    if num_dims > MAX_DIMS {
        return Err(CacheError::Format.into());
    }
    let mut shape = Vec::with_capacity(num_dims as usize);
    for _ in 0..num_dims {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        shape.push(i64::from_le_bytes(buf));
    }

    let byte_count = read_u64(r)? as usize;
    if byte_count % T::SIZE != 0 {
        return Err(CacheError::Format.into());
    }
    let mut bytes = vec![0u8; byte_count];
    r.read_exact(&mut bytes)?;
    let data = bytes.chunks_exact(T::SIZE).map(T::read_le).collect();
    Ok(TensorData { shape, data })
}

/// Speaker conditioning tensors produced by the speech encoder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceConditionals {
    /// Conditioning embedding `[1, seq, hidden]`, prepended to the text
    /// embedding at prefill.
    pub cond_emb: TensorData<f32>,
    /// Prompt tokens `[1, seq]`, prepended to the decoder input.
    pub prompt_token: TensorData<i64>,
    /// Speaker embedding `[1, dim]`.
    pub speaker_embeddings: TensorData<f32>,
    /// Speaker features `[1, seq, dim]`.
    pub speaker_features: TensorData<f32>,
}

impl VoiceConditionals {
    /// A record is usable only when every tensor and its shape are present.
    pub fn is_valid(&self) -> bool {
        !self.cond_emb.is_empty()
            && !self.prompt_token.is_empty()
            && !self.speaker_embeddings.is_empty()
            && !self.speaker_features.is_empty()
    }

    /// Serialize into the versioned binary blob.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&MAGIC.to_le_bytes())?;
        w.write_all(&VERSION.to_le_bytes())?;
        write_array(w, &self.cond_emb)?;
        write_array(w, &self.prompt_token)?;
        write_array(w, &self.speaker_embeddings)?;
        write_array(w, &self.speaker_features)?;
        Ok(())
    }

    /// Deserialize from a blob.
    ///
    /// A wrong magic or version yields [`CacheError::Format`]; a truncated
    /// stream surfaces as an I/O error. The format carries no checksum.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        if read_u32(r)? != MAGIC {
            return Err(CacheError::Format.into());
        }
        if read_u32(r)? != VERSION {
            return Err(CacheError::Format.into());
        }
        Ok(Self {
            cond_emb: read_array(r)?,
            prompt_token: read_array(r)?,
            speaker_embeddings: read_array(r)?,
            speaker_features: read_array(r)?,
        })
    }

    /// Write the blob to `path` via a temporary file in the same directory,
    /// then atomically rename into place so a crash never leaves a partial
    /// record behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        self.write_to(&mut tmp)?;
        tmp.persist(path)
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Load a blob from `path`. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let mut file = fs::File::open(path)?;
        Ok(Some(Self::read_from(&mut file)?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn synthetic() -> VoiceConditionals {
        VoiceConditionals {
            cond_emb: TensorData::new(vec![1, 4, 16], (0..64).map(|i| i as f32 * 0.5).collect()),
            prompt_token: TensorData::new(vec![1, 6], vec![10, 20, 30, 40, 50, 60]),
            speaker_embeddings: TensorData::new(vec![1, 8], (0..8).map(|i| -(i as f32)).collect()),
            speaker_features: TensorData::new(
                vec![1, 2, 8],
                (0..16).map(|i| i as f32 * 0.25).collect(),
            ),
        }
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let conds = synthetic();
        let mut blob = Vec::new();
        conds.write_to(&mut blob).unwrap();

        let decoded = VoiceConditionals::read_from(&mut blob.as_slice()).unwrap();
        assert_eq!(decoded, conds);
    }

    #[test]
    fn test_wrong_magic_is_format_error() {
        let conds = synthetic();
        let mut blob = Vec::new();
        conds.write_to(&mut blob).unwrap();
        blob[0] ^= 0xFF;

        let err = VoiceConditionals::read_from(&mut blob.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Cache(CacheError::Format)));
    }

    #[test]
    fn test_wrong_version_is_format_error() {
        let conds = synthetic();
        let mut blob = Vec::new();
        conds.write_to(&mut blob).unwrap();
        blob[4] = 2;

        let err = VoiceConditionals::read_from(&mut blob.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Cache(CacheError::Format)));
    }

    #[test]
    fn test_truncated_blob_is_io_error() {
        let conds = synthetic();
        let mut blob = Vec::new();
        conds.write_to(&mut blob).unwrap();
        blob.truncate(blob.len() / 2);

        let err = VoiceConditionals::read_from(&mut blob.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_validity_requires_all_four_tensors() {
        assert!(synthetic().is_valid());
        let mut missing = synthetic();
        missing.speaker_features = TensorData::default();
        assert!(!missing.is_valid());
        assert!(!VoiceConditionals::default().is_valid());
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.cond");
        let conds = synthetic();
        conds.save(&path).unwrap();

        let loaded = VoiceConditionals::load(&path).unwrap().unwrap();
        assert_eq!(loaded, conds);

        assert!(VoiceConditionals::load(&dir.path().join("absent.cond"))
            .unwrap()
            .is_none());
    }
}
