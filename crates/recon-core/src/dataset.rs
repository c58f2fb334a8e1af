//! Named numeric arrays read from NumPy `.npy` files, `.npz` archives and,
//! with the `hdf5` feature, HDF5 files.
//!
//! An `.npz` archive is a zip of `.npy` members; a dataset path such as
//! `/image_0/data` resolves to the member `image_0/data.npy`. A plain `.npy`
//! file holds a single array and accepts any dataset name. In an HDF5 file the
//! same path names the dataset directly.
//!
//! Every element is widened to `f64` on load so that norms and dot products
//! over small unsigned storage types cannot overflow.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

pub const NPY_MAGIC_PREFIX: [u8; 6] = [0x93, b'N', b'U', b'M', b'P', b'Y'];
pub const ZIP_MAGIC_PREFIX: [u8; 4] = [b'P', b'K', 0x03, 0x04];
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

const MAX_HEADER_BYTES: usize = 65_536;

#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl NumericArray {
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self, DatasetError> {
        let expected = element_count(&shape)?;
        if expected != values.len() {
            return Err(DatasetError::ShapeMismatch {
                shape,
                values: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major flattened view.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn scaled(&self, factor: f64) -> Self {
        Self {
            shape: self.shape.clone(),
            values: self.values.iter().map(|value| value * factor).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("'{path}' is neither a .npy file, a .npz archive nor an HDF5 file")]
    UnknownFormat { path: PathBuf },
    #[error("'{path}' is an HDF5 file but HDF5 support was not compiled in")]
    Hdf5Unsupported { path: PathBuf },
    #[cfg(feature = "hdf5")]
    #[error("failed to read dataset '{dataset}' from HDF5 file '{path}': {source}")]
    Hdf5 {
        path: PathBuf,
        dataset: String,
        source: hdf5::Error,
    },
    #[error("failed to read archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    #[error("dataset '{dataset}' was not found in '{path}'")]
    MissingDataset { path: PathBuf, dataset: String },
    #[error("invalid .npy header: {0}")]
    InvalidHeader(&'static str),
    #[error("unsupported dtype '{0}'")]
    UnsupportedDType(String),
    #[error("array payload is {actual} bytes but the header describes {expected}")]
    PayloadLength { expected: usize, actual: usize },
    #[error("shape {shape:?} does not hold {values} values")]
    ShapeMismatch { shape: Vec<usize>, values: usize },
    #[error("element count of shape {0:?} overflows")]
    ElementCountOverflow(Vec<usize>),
}

/// Loads `dataset` from a `.npy`, `.npz` or HDF5 file, chosen by magic bytes.
pub fn load_dataset(path: impl AsRef<Path>, dataset: &str) -> Result<NumericArray, DatasetError> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|source| DatasetError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut prefix = [0u8; 8];
    let prefix_len = read_prefix(&mut file, &mut prefix).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    file.rewind().map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if prefix_len >= NPY_MAGIC_PREFIX.len() && prefix[..6] == NPY_MAGIC_PREFIX {
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)
            .map_err(|source| DatasetError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        return decode_npy(&payload);
    }

    if prefix_len >= ZIP_MAGIC_PREFIX.len() && prefix[..4] == ZIP_MAGIC_PREFIX {
        return load_archive_member(path, BufReader::new(file), dataset);
    }

    if prefix_len == HDF5_SIGNATURE.len() && prefix == HDF5_SIGNATURE {
        drop(file);
        return load_hdf5_dataset(path, dataset);
    }

    Err(DatasetError::UnknownFormat {
        path: path.to_path_buf(),
    })
}

fn read_prefix(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn load_archive_member<R: Read + Seek>(
    path: &Path,
    reader: R,
    dataset: &str,
) -> Result<NumericArray, DatasetError> {
    let archive_error = |source| DatasetError::Archive {
        path: path.to_path_buf(),
        source,
    };
    let mut archive = zip::ZipArchive::new(reader).map_err(archive_error)?;

    let member = archive_member_name(dataset);
    let candidates = [member.clone(), member.trim_end_matches(".npy").to_string()];
    let Some(name) = candidates
        .iter()
        .find(|candidate| archive.index_for_name(candidate).is_some())
    else {
        return Err(DatasetError::MissingDataset {
            path: path.to_path_buf(),
            dataset: dataset.to_string(),
        });
    };

    let mut entry = archive.by_name(name).map_err(archive_error)?;
    let mut payload = Vec::new();
    entry
        .read_to_end(&mut payload)
        .map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    decode_npy(&payload)
}

#[cfg(feature = "hdf5")]
fn load_hdf5_dataset(path: &Path, dataset: &str) -> Result<NumericArray, DatasetError> {
    let name = dataset.trim();
    let hdf5_error = |source| DatasetError::Hdf5 {
        path: path.to_path_buf(),
        dataset: name.to_string(),
        source,
    };
    let missing = || DatasetError::MissingDataset {
        path: path.to_path_buf(),
        dataset: dataset.to_string(),
    };
    let file = hdf5::File::open(path).map_err(hdf5_error)?;

    // H5Lexists fails on a missing intermediate group, so walk each link.
    let mut link = String::new();
    for part in name.split('/').filter(|part| !part.is_empty()) {
        link.push('/');
        link.push_str(part);
        if !file.link_exists(&link) {
            return Err(missing());
        }
    }
    if link.is_empty() {
        return Err(missing());
    }
    let stored = file.dataset(&link).map_err(hdf5_error)?;
    let values = stored.read_raw::<f64>().map_err(hdf5_error)?;
    NumericArray::new(stored.shape(), values)
}

#[cfg(not(feature = "hdf5"))]
fn load_hdf5_dataset(path: &Path, _dataset: &str) -> Result<NumericArray, DatasetError> {
    Err(DatasetError::Hdf5Unsupported {
        path: path.to_path_buf(),
    })
}

/// Maps a dataset path to its archive member name.
pub fn archive_member_name(dataset: &str) -> String {
    let trimmed = dataset.trim().trim_start_matches('/');
    if trimmed.ends_with(".npy") {
        trimmed.to_string()
    } else {
        format!("{trimmed}.npy")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Bool,
    Int,
    UInt,
    Float,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DType {
    kind: ElementKind,
    size: usize,
    order: ByteOrder,
}

impl DType {
    fn parse(descr: &str) -> Result<Self, DatasetError> {
        let unsupported = || DatasetError::UnsupportedDType(descr.to_string());
        let mut chars = descr.chars();
        let order = match chars.next().ok_or_else(unsupported)? {
            '<' | '|' | '=' => ByteOrder::Little,
            '>' => ByteOrder::Big,
            _ => return Err(unsupported()),
        };
        let kind = match chars.next().ok_or_else(unsupported)? {
            'b' => ElementKind::Bool,
            'i' => ElementKind::Int,
            'u' => ElementKind::UInt,
            'f' => ElementKind::Float,
            'c' => ElementKind::Complex,
            _ => return Err(unsupported()),
        };
        let size = chars
            .as_str()
            .parse::<usize>()
            .map_err(|_| unsupported())?;

        let supported = match kind {
            ElementKind::Bool => size == 1,
            ElementKind::Int | ElementKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ElementKind::Float => matches!(size, 4 | 8),
            ElementKind::Complex => matches!(size, 8 | 16),
        };
        if !supported {
            return Err(unsupported());
        }
        Ok(Self { kind, size, order })
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        match self.kind {
            ElementKind::Bool => f64::from(u8::from(bytes[0] != 0)),
            ElementKind::UInt => match self.size {
                1 => f64::from(bytes[0]),
                2 => f64::from(u16::from_le_bytes(self.fixed(bytes))),
                4 => f64::from(u32::from_le_bytes(self.fixed(bytes))),
                _ => u64::from_le_bytes(self.fixed(bytes)) as f64,
            },
            ElementKind::Int => match self.size {
                1 => f64::from(bytes[0] as i8),
                2 => f64::from(i16::from_le_bytes(self.fixed(bytes))),
                4 => f64::from(i32::from_le_bytes(self.fixed(bytes))),
                _ => i64::from_le_bytes(self.fixed(bytes)) as f64,
            },
            ElementKind::Float => match self.size {
                4 => f64::from(f32::from_le_bytes(self.fixed(bytes))),
                _ => f64::from_le_bytes(self.fixed(bytes)),
            },
            // Real part only, like a float cast of complex data.
            ElementKind::Complex => {
                let half = DType {
                    kind: ElementKind::Float,
                    size: self.size / 2,
                    order: self.order,
                };
                half.decode(&bytes[..self.size / 2])
            }
        }
    }

    /// Copies one element into little-endian order.
    fn fixed<const N: usize>(self, bytes: &[u8]) -> [u8; N] {
        let mut buffer = [0u8; N];
        buffer.copy_from_slice(&bytes[..N]);
        if self.order == ByteOrder::Big {
            buffer.reverse();
        }
        buffer
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Decodes a complete `.npy` payload into a row-major `f64` array.
pub fn decode_npy(payload: &[u8]) -> Result<NumericArray, DatasetError> {
    if payload.len() < 10 || payload[..6] != NPY_MAGIC_PREFIX {
        return Err(DatasetError::InvalidHeader("missing NUMPY magic prefix"));
    }

    let (header_offset, header_len) = match payload[6] {
        1 => (10, usize::from(u16::from_le_bytes([payload[8], payload[9]]))),
        2 | 3 => {
            if payload.len() < 12 {
                return Err(DatasetError::InvalidHeader(
                    "payload truncated before v2/v3 header length field",
                ));
            }
            let raw = u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]);
            let len = usize::try_from(raw)
                .map_err(|_| DatasetError::InvalidHeader("header length exceeds usize"))?;
            (12, len)
        }
        _ => return Err(DatasetError::InvalidHeader("unsupported format version")),
    };

    if header_len == 0 || header_len > MAX_HEADER_BYTES {
        return Err(DatasetError::InvalidHeader(
            "header length is outside the accepted range",
        ));
    }
    let header_end = header_offset + header_len;
    if payload.len() < header_end {
        return Err(DatasetError::InvalidHeader(
            "payload truncated before declared header bytes",
        ));
    }

    let header = parse_header(&payload[header_offset..header_end])?;
    let dtype = DType::parse(&header.descr)?;
    let count = element_count(&header.shape)?;
    let body = &payload[header_end..];
    let expected = count
        .checked_mul(dtype.size)
        .ok_or_else(|| DatasetError::ElementCountOverflow(header.shape.clone()))?;
    if body.len() != expected {
        return Err(DatasetError::PayloadLength {
            expected,
            actual: body.len(),
        });
    }

    let stored = body
        .chunks_exact(dtype.size)
        .map(|chunk| dtype.decode(chunk))
        .collect::<Vec<_>>();
    let values = if header.fortran_order && header.shape.len() > 1 {
        column_major_to_row_major(&header.shape, &stored)
    } else {
        stored
    };

    NumericArray::new(header.shape, values)
}

fn parse_header(header_bytes: &[u8]) -> Result<NpyHeader, DatasetError> {
    let dictionary = std::str::from_utf8(header_bytes)
        .map_err(|_| DatasetError::InvalidHeader("header is not ASCII"))?
        .trim();
    if !(dictionary.starts_with('{') && dictionary.ends_with('}')) {
        return Err(DatasetError::InvalidHeader(
            "header dictionary must be wrapped in braces",
        ));
    }

    let descr = parse_quoted_value(value_after_key(dictionary, "descr")?)?.to_string();

    let fortran_tail = value_after_key(dictionary, "fortran_order")?;
    let fortran_order = if fortran_tail.starts_with("True") {
        true
    } else if fortran_tail.starts_with("False") {
        false
    } else {
        return Err(DatasetError::InvalidHeader(
            "fortran_order must be True or False",
        ));
    };

    let shape_tail = value_after_key(dictionary, "shape")?
        .strip_prefix('(')
        .ok_or(DatasetError::InvalidHeader("shape must be a tuple"))?;
    let shape_end = shape_tail
        .find(')')
        .ok_or(DatasetError::InvalidHeader("shape tuple is not closed"))?;
    let shape = shape_tail[..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| DatasetError::InvalidHeader("shape entries must be integers"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
    })
}

fn value_after_key<'a>(dictionary: &'a str, key: &str) -> Result<&'a str, DatasetError> {
    let single = format!("'{key}'");
    let double = format!("\"{key}\"");
    let start = dictionary
        .find(&single)
        .or_else(|| dictionary.find(&double))
        .ok_or(DatasetError::InvalidHeader("required header field is missing"))?;
    dictionary[start + single.len()..]
        .trim_start()
        .strip_prefix(':')
        .map(str::trim_start)
        .ok_or(DatasetError::InvalidHeader("header field is missing ':'"))
}

fn parse_quoted_value(value: &str) -> Result<&str, DatasetError> {
    let quote = value
        .chars()
        .next()
        .filter(|quote| *quote == '\'' || *quote == '"')
        .ok_or(DatasetError::InvalidHeader("descr must be a quoted string"))?;
    let tail = &value[1..];
    let end = tail
        .find(quote)
        .ok_or(DatasetError::InvalidHeader("descr is missing its closing quote"))?;
    Ok(&tail[..end])
}

fn element_count(shape: &[usize]) -> Result<usize, DatasetError> {
    shape
        .iter()
        .try_fold(1usize, |count, dim| count.checked_mul(*dim))
        .ok_or_else(|| DatasetError::ElementCountOverflow(shape.to_vec()))
}

fn column_major_to_row_major(shape: &[usize], stored: &[f64]) -> Vec<f64> {
    let mut values = vec![0.0; stored.len()];
    let mut index = vec![0usize; shape.len()];
    for value in values.iter_mut() {
        // Column-major offset of the current row-major multi-index.
        let mut offset = 0;
        let mut stride = 1;
        for (axis, position) in index.iter().enumerate() {
            offset += position * stride;
            stride *= shape[axis];
        }
        *value = stored[offset];

        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    values
}

/// Encodes `values` as a version 1.0 `.npy` payload with the given `descr`.
///
/// Used to produce reference fixtures; only little-endian `<f4`, `<f8`,
/// `<u2` and `<i4` are written.
pub fn encode_npy(descr: &str, shape: &[usize], values: &[f64]) -> Result<Vec<u8>, DatasetError> {
    let dtype = DType::parse(descr)?;
    if dtype.order != ByteOrder::Little
        || !matches!(
            (dtype.kind, dtype.size),
            (ElementKind::Float, 4)
                | (ElementKind::Float, 8)
                | (ElementKind::UInt, 2)
                | (ElementKind::Int, 4)
        )
    {
        return Err(DatasetError::UnsupportedDType(descr.to_string()));
    }
    if element_count(shape)? != values.len() {
        return Err(DatasetError::ShapeMismatch {
            shape: shape.to_vec(),
            values: values.len(),
        });
    }

    let shape_literal = match shape {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape_literal}, }}"
    );
    // Pad so the payload starts on a 64-byte boundary, ending with '\n'.
    let unpadded = NPY_MAGIC_PREFIX.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut payload = Vec::with_capacity(10 + header.len() + values.len() * dtype.size);
    payload.extend_from_slice(&NPY_MAGIC_PREFIX);
    payload.extend_from_slice(&[1, 0]);
    let header_len = u16::try_from(header.len())
        .map_err(|_| DatasetError::InvalidHeader("header does not fit a v1.0 file"))?;
    payload.extend_from_slice(&header_len.to_le_bytes());
    payload.extend_from_slice(header.as_bytes());
    for value in values {
        match (dtype.kind, dtype.size) {
            (ElementKind::Float, 4) => payload.extend_from_slice(&(*value as f32).to_le_bytes()),
            (ElementKind::Float, _) => payload.extend_from_slice(&value.to_le_bytes()),
            (ElementKind::UInt, _) => payload.extend_from_slice(&(*value as u16).to_le_bytes()),
            _ => payload.extend_from_slice(&(*value as i32).to_le_bytes()),
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::{
        DatasetError, HDF5_SIGNATURE, NumericArray, archive_member_name, decode_npy, encode_npy,
        load_dataset,
    };
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn npy_with_header(header: &str, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x93, b'N', b'U', b'M', b'P', b'Y', 1, 0];
        let header = format!("{header}\n");
        payload.extend_from_slice(&(header.len() as u16).to_le_bytes());
        payload.extend_from_slice(header.as_bytes());
        payload.extend_from_slice(body);
        payload
    }

    #[test]
    fn decodes_unsigned_short_without_overflow() {
        let body = [u16::MAX, 40_000, 1]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<_>>();
        let payload = npy_with_header(
            "{'descr': '<u2', 'fortran_order': False, 'shape': (3,), }",
            &body,
        );

        let array = decode_npy(&payload).expect("payload should decode");
        assert_eq!(array.shape(), &[3]);
        assert_eq!(array.values(), &[65_535.0, 40_000.0, 1.0]);
        let sum_of_squares = array.values().iter().map(|value| value * value).sum::<f64>();
        assert!(sum_of_squares > f64::from(u16::MAX));
    }

    #[test]
    fn decodes_big_endian_and_complex_real_part() {
        let body = [1.5f32, -2.0]
            .iter()
            .flat_map(|value| value.to_be_bytes())
            .collect::<Vec<_>>();
        let array = decode_npy(&npy_with_header(
            "{'descr': '>f4', 'fortran_order': False, 'shape': (2,), }",
            &body,
        ))
        .expect("big-endian payload should decode");
        assert_eq!(array.values(), &[1.5, -2.0]);

        let body = [3.0f32, 9.0, -1.0, 4.0]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<_>>();
        let array = decode_npy(&npy_with_header(
            "{'descr': '<c8', 'fortran_order': False, 'shape': (2,), }",
            &body,
        ))
        .expect("complex payload should decode");
        assert_eq!(array.values(), &[3.0, -1.0]);
    }

    #[test]
    fn fortran_order_is_flattened_row_major() {
        // [[1, 2, 3], [4, 5, 6]] stored column by column.
        let body = [1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<_>>();
        let array = decode_npy(&npy_with_header(
            "{'descr': '<f8', 'fortran_order': True, 'shape': (2, 3), }",
            &body,
        ))
        .expect("fortran payload should decode");

        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn truncated_body_is_rejected() {
        let error = decode_npy(&npy_with_header(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4,), }",
            &[0u8; 8],
        ))
        .unwrap_err();
        assert!(matches!(
            error,
            DatasetError::PayloadLength {
                expected: 16,
                actual: 8
            }
        ));
    }

    #[test]
    fn unsupported_dtype_is_rejected() {
        let error = decode_npy(&npy_with_header(
            "{'descr': '|O', 'fortran_order': False, 'shape': (1,), }",
            &[0u8; 8],
        ))
        .unwrap_err();
        assert!(matches!(error, DatasetError::UnsupportedDType(descr) if descr == "|O"));
    }

    #[test]
    fn encoded_header_is_aligned() {
        let payload = encode_npy("<f4", &[2, 2], &[1.0, 2.0, 3.0, 4.0]).expect("encode");
        let header_len = usize::from(u16::from_le_bytes([payload[8], payload[9]]));
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(payload[10 + header_len - 1], b'\n');

        let array = decode_npy(&payload).expect("decode");
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.values(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn member_names_strip_leading_slash() {
        assert_eq!(archive_member_name("/image_0/data"), "image_0/data.npy");
        assert_eq!(archive_member_name("image.npy"), "image.npy");
    }

    #[test]
    fn loads_named_member_from_archive() {
        let temp = TempDir::new().expect("tempdir should be created");
        let archive_path = temp.path().join("result.npz");
        let file = fs::File::create(&archive_path).expect("archive should be created");
        let mut writer = zip::ZipWriter::new(file);
        for (name, values) in [("image_0/data.npy", [1.0, 2.0]), ("other.npy", [7.0, 8.0])] {
            writer
                .start_file(name, SimpleFileOptions::default())
                .expect("member should start");
            writer
                .write_all(&encode_npy("<f8", &[2], &values).expect("encode"))
                .expect("member should be written");
        }
        writer.finish().expect("archive should finish");

        let array = load_dataset(&archive_path, "/image_0/data").expect("dataset should load");
        assert_eq!(array, NumericArray::from_vec(vec![1.0, 2.0]));

        let error = load_dataset(&archive_path, "/image_1/data").unwrap_err();
        assert!(matches!(error, DatasetError::MissingDataset { .. }));
    }

    #[test]
    fn loads_plain_npy_and_rejects_unknown_files() {
        let temp = TempDir::new().expect("tempdir should be created");
        let npy_path = temp.path().join("reference.npy");
        fs::write(&npy_path, encode_npy("<u2", &[3], &[1.0, 2.0, 3.0]).expect("encode"))
            .expect("npy should be written");
        let array = load_dataset(&npy_path, "ignored").expect("npy should load");
        assert_eq!(array.values(), &[1.0, 2.0, 3.0]);

        let text_path = temp.path().join("notes.txt");
        fs::write(&text_path, "plain text").expect("text should be written");
        assert!(matches!(
            load_dataset(&text_path, "data"),
            Err(DatasetError::UnknownFormat { .. })
        ));

        assert!(matches!(
            load_dataset(temp.path().join("absent.npz"), "data"),
            Err(DatasetError::Open { .. })
        ));
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn hdf5_signature_without_support_is_reported() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("result.h5");
        let mut content = HDF5_SIGNATURE.to_vec();
        content.extend_from_slice(&[0u8; 64]);
        fs::write(&path, content).expect("signature file should be written");

        let error = load_dataset(&path, "/image_0/data").unwrap_err();
        assert!(matches!(error, DatasetError::Hdf5Unsupported { .. }));
        assert!(error.to_string().contains("HDF5 support was not compiled in"));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn loads_nested_hdf5_dataset_as_f64() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("result.h5");
        {
            let file = hdf5::File::create(&path).expect("hdf5 file should be created");
            let group = file.create_group("image_0").expect("group should be created");
            let stored = group
                .new_dataset::<u16>()
                .shape((2, 3))
                .create("data")
                .expect("dataset should be created");
            let values: [u16; 6] = [1, 2, 3, 4, 5, u16::MAX];
            stored
                .write_raw(&values[..])
                .expect("dataset should be written");
        }
        assert_eq!(
            fs::read(&path).expect("hdf5 file should be readable")[..8],
            HDF5_SIGNATURE
        );

        let array = load_dataset(&path, "/image_0/data").expect("dataset should load");
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 65_535.0]);

        let error = load_dataset(&path, "/image_1/data").unwrap_err();
        assert!(matches!(error, DatasetError::MissingDataset { .. }));
    }
}
