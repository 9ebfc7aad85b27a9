//! Tensor construction and extraction helpers
//!
//! The generation loop moves KV-cache values between steps as opaque
//! [`DynValue`] handles; everything else crosses the runtime boundary as
//! owned `(shape, data)` tensors built here. Extraction transparently
//! upcasts fp16 outputs so callers only ever see f32.

use half::f16;
use ort::session::SessionInputValue;
use ort::value::{DynValue, Tensor};

use voxclone_core::{Error, Result, RuntimeError};

fn tensor_err(e: impl std::fmt::Display) -> Error {
    RuntimeError::Tensor(e.to_string()).into()
}

/// Owned f32 input tensor.
pub fn f32_input(shape: Vec<i64>, data: Vec<f32>) -> Result<SessionInputValue<'static>> {
    let tensor = Tensor::from_array((shape, data)).map_err(tensor_err)?;
    Ok(SessionInputValue::from(tensor))
}

/// Owned i64 input tensor.
pub fn i64_input(shape: Vec<i64>, data: Vec<i64>) -> Result<SessionInputValue<'static>> {
    let tensor = Tensor::from_array((shape, data)).map_err(tensor_err)?;
    Ok(SessionInputValue::from(tensor))
}

/// Owned i32 input tensor.
pub fn i32_input(shape: Vec<i64>, data: Vec<i32>) -> Result<SessionInputValue<'static>> {
    let tensor = Tensor::from_array((shape, data)).map_err(tensor_err)?;
    Ok(SessionInputValue::from(tensor))
}

/// Owned f32 input tensor from a 2-D array. Used at construction seams
/// outside the decode loop, where the array types document the layout.
pub fn f32_matrix(array: ndarray::Array2<f32>) -> Result<SessionInputValue<'static>> {
    let tensor = Tensor::from_array(array).map_err(tensor_err)?;
    Ok(SessionInputValue::from(tensor))
}

/// Owned fp16 input tensor.
pub fn f16_input(shape: Vec<i64>, data: Vec<f16>) -> Result<SessionInputValue<'static>> {
    let tensor = Tensor::from_array((shape, data)).map_err(tensor_err)?;
    Ok(SessionInputValue::from(tensor))
}

/// Empty f32 tensor for shapes with a zero-sized dimension, e.g. the
/// initial KV cache `[1, 16, 0, 64]`.
pub fn f32_empty(shape: Vec<i64>) -> Result<SessionInputValue<'static>> {
    f32_input(shape, Vec::new())
}

/// Empty fp16 tensor for shapes with a zero-sized dimension.
pub fn f16_empty(shape: Vec<i64>) -> Result<SessionInputValue<'static>> {
    f16_input(shape, Vec::new())
}

/// Wrap an already-owned runtime value (a KV-cache handle moved from the
/// previous step's outputs) as an input.
pub fn reuse(value: DynValue) -> SessionInputValue<'static> {
    SessionInputValue::from(value)
}

pub fn to_f16(data: &[f32]) -> Vec<f16> {
    data.iter().copied().map(f16::from_f32).collect()
}

pub fn to_f32(data: &[f16]) -> Vec<f32> {
    data.iter().copied().map(f16::to_f32).collect()
}

/// Number of elements implied by a shape; zero when any dimension is zero.
pub fn element_count(shape: &[i64]) -> usize {
    if shape.is_empty() {
        return 0;
    }
    let mut count: usize = 1;
    for &dim in shape {
        if dim <= 0 {
            return 0;
        }
        count *= dim as usize;
    }
    count
}

/// Extract a full f32 tensor, upcasting from fp16 when necessary.
pub fn extract_f32(value: &DynValue) -> Result<(Vec<i64>, Vec<f32>)> {
    if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        return Ok((shape.to_vec(), data.to_vec()));
    }
    let (shape, data) = value.try_extract_tensor::<f16>().map_err(tensor_err)?;
    Ok((shape.to_vec(), to_f32(data)))
}

/// Extract a full i64 tensor.
pub fn extract_i64(value: &DynValue) -> Result<(Vec<i64>, Vec<i64>)> {
    let (shape, data) = value.try_extract_tensor::<i64>().map_err(tensor_err)?;
    Ok((shape.to_vec(), data.to_vec()))
}

/// Extract only the last sequence position of a `[1, L, V]` tensor.
///
/// Returns `(V, row)`. Avoids materializing the full logits buffer; the
/// fp16 branch converts only the final row.
pub fn extract_last_row_f32(value: &DynValue) -> Result<(usize, Vec<f32>)> {
    if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        let (vocab, offset) = last_row_bounds(&shape.to_vec(), data.len())?;
        return Ok((vocab, data[offset..offset + vocab].to_vec()));
    }
    let (shape, data) = value.try_extract_tensor::<f16>().map_err(tensor_err)?;
    let (vocab, offset) = last_row_bounds(&shape.to_vec(), data.len())?;
    Ok((vocab, to_f32(&data[offset..offset + vocab])))
}

fn last_row_bounds(shape: &[i64], len: usize) -> Result<(usize, usize)> {
    let vocab = *shape.last().unwrap_or(&0);
    if vocab <= 0 {
        return Err(tensor_err("logits tensor has empty last axis"));
    }
    let vocab = vocab as usize;
    if len < vocab {
        return Err(tensor_err("logits tensor shorter than one row"));
    }
    Ok((vocab, len - vocab))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp16_round_trip() {
        let data = vec![0.0f32, 1.0, -2.5, 0.125];
        let converted = to_f32(&to_f16(&data));
        for (a, b) in data.iter().zip(converted.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_element_count_zero_dim() {
        assert_eq!(element_count(&[1, 16, 0, 64]), 0);
        assert_eq!(element_count(&[1, 2, 3]), 6);
        assert_eq!(element_count(&[]), 0);
    }

    #[test]
    fn test_last_row_bounds() {
        let (vocab, offset) = last_row_bounds(&[1, 3, 5], 15).unwrap();
        assert_eq!(vocab, 5);
        assert_eq!(offset, 10);

        let (vocab, offset) = last_row_bounds(&[1, 1, 8], 8).unwrap();
        assert_eq!(vocab, 8);
        assert_eq!(offset, 0);

        assert!(last_row_bounds(&[1, 0], 0).is_err());
    }

    #[test]
    fn test_empty_kv_placeholder_builds() {
        assert!(f32_empty(vec![1, 16, 0, 64]).is_ok());
        assert!(f16_empty(vec![1, 16, 0, 64]).is_ok());
    }
}
