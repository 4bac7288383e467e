//! Binary transfer views
//!
//! [`BufferView`] is the zero-copy or single-copy transfer abstraction for
//! byte buffers. A view is either OWNED (the bytes live as long as the view)
//! or BORROWED (the bytes are pinned only for the duration of the call that
//! produced the view). A borrowed view carries the liveness flag of its
//! [`CallScope`]; once the scope closes, every read fails with `ViewExpired`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bridge::error::BridgeError;

/// Element width tag used to reinterpret raw bytes as typed scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementWidth {
    /// Raw bytes, one byte per element
    U8,
    /// 4-byte signed integers
    I32,
    /// 4-byte floats
    F32,
    /// 8-byte floats
    F64,
}

impl ElementWidth {
    /// Bytes per element
    pub fn size(&self) -> usize {
        match self {
            ElementWidth::U8 => 1,
            ElementWidth::I32 | ElementWidth::F32 => 4,
            ElementWidth::F64 => 8,
        }
    }
}

/// Liveness scope for borrowed views
///
/// The dispatcher opens one scope per call; borrowed views created while
/// converting that call's arguments share the scope's flag. Closing the
/// scope (or dropping it) invalidates every borrowed view at once.
#[derive(Debug)]
pub struct CallScope {
    alive: Arc<AtomicBool>,
}

impl CallScope {
    /// Open a new scope
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag shared with borrowed views
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    /// Invalidate every borrowed view tied to this scope
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Default for CallScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        self.close();
    }
}

/// Backing storage of a view
#[derive(Debug, Clone)]
enum BufferData {
    /// The view owns (shares ownership of) the allocation
    Owned(Arc<[u8]>),
    /// The allocation is pinned only while `alive` is set
    Borrowed {
        bytes: Arc<[u8]>,
        alive: Arc<AtomicBool>,
    },
}

/// A contiguous byte region plus length and element-width tag
#[derive(Debug, Clone)]
pub struct BufferView {
    data: BufferData,
    width: ElementWidth,
}

impl BufferView {
    /// Build an owned view over copied bytes
    pub fn owned(
        bytes: impl AsRef<[u8]>,
        width: ElementWidth,
    ) -> Self {
        Self {
            data: BufferData::Owned(Arc::from(bytes.as_ref())),
            width,
        }
    }

    /// Build a borrowed view valid while `scope` stays open
    pub fn borrowed(
        bytes: Arc<[u8]>,
        scope: &CallScope,
        width: ElementWidth,
    ) -> Self {
        Self {
            data: BufferData::Borrowed {
                bytes,
                alive: scope.flag(),
            },
            width,
        }
    }

    /// Element width tag
    pub fn width(&self) -> ElementWidth {
        self.width
    }

    /// Whether this view is borrowed from a call scope
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, BufferData::Borrowed { .. })
    }

    /// Raw bytes, failing with `ViewExpired` once the owning scope closed
    pub fn bytes(&self) -> Result<&[u8], BridgeError> {
        match &self.data {
            BufferData::Owned(b) => Ok(b),
            BufferData::Borrowed { bytes, alive } => {
                if alive.load(Ordering::SeqCst) {
                    Ok(bytes)
                } else {
                    Err(BridgeError::ViewExpired)
                }
            }
        }
    }

    /// Byte length, 0 if expired
    pub fn len(&self) -> usize {
        self.bytes().map(<[u8]>::len).unwrap_or(0)
    }

    /// Whether the view holds no bytes (or expired)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy into an owned view, detaching from any call scope
    pub fn to_owned_view(&self) -> Result<BufferView, BridgeError> {
        Ok(BufferView::owned(self.bytes()?, self.width))
    }

    /// Decode as f32 elements
    pub fn as_f32s(&self) -> Result<Vec<f32>, BridgeError> {
        let bytes = self.bytes()?;
        if bytes.len() % 4 != 0 {
            return Err(BridgeError::UnsupportedType(format!(
                "buffer length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Decode as f64 elements
    pub fn as_f64s(&self) -> Result<Vec<f64>, BridgeError> {
        let bytes = self.bytes()?;
        if bytes.len() % 8 != 0 {
            return Err(BridgeError::UnsupportedType(format!(
                "buffer length {} is not a multiple of 8",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    /// Decode as i32 elements
    pub fn as_i32s(&self) -> Result<Vec<i32>, BridgeError> {
        let bytes = self.bytes()?;
        if bytes.len() % 4 != 0 {
            return Err(BridgeError::UnsupportedType(format!(
                "buffer length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Encode f32 elements into an owned view
    pub fn from_f32s(values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        BufferView::owned(bytes, ElementWidth::F32)
    }

    /// Encode f64 elements into an owned view
    pub fn from_f64s(values: &[f64]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        BufferView::owned(bytes, ElementWidth::F64)
    }
}

/// Two views are equal when both are readable and hold the same bytes with
/// the same width tag. Expired views compare unequal to everything.
impl PartialEq for BufferView {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        if self.width != other.width {
            return false;
        }
        match (self.bytes(), other.bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for BufferView {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.bytes() {
            Ok(b) => write!(f, "buffer[{}; {:?}]", b.len(), self.width),
            Err(_) => write!(f, "buffer[expired]"),
        }
    }
}
