// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer ownership across the C boundary.
//!
//! # Native -> managed
//!
//! Callback buffers (keys, payloads, attachments, encoding strings) belong to
//! the engine, which frees them as soon as the trampoline returns. The
//! trampoline only ever sees them through [`NativeSlice`] / [`NativeStr`],
//! whose lifetime is bound to the invocation, and copies them into owned
//! values ([`Payload`], `String`) before returning. There is no suspension
//! point inside a trampoline, so nothing can observe the memory afterwards.
//!
//! Strings *returned* by the engine are wrapped in [`NativeString`], which
//! hands them back through `free_string` exactly once.
//!
//! # Managed -> native
//!
//! Outbound buffers are borrowed for the duration of a synchronous native call
//! ([`OutboundBytes`], `CString`). The engine copies them before returning and
//! never retains the pointer.

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::os::raw::c_char;
use std::ptr::{self, NonNull};

use crate::engine::NativeApi;
use crate::error::{Error, Result};

/// Owned payload bytes.
///
/// Every payload delivered by the bridge is a full copy; it never aliases
/// engine memory.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Interpret as UTF-8, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    /// Interpret as UTF-8.
    pub fn as_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.0)
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 16;
        write!(f, "Payload({} bytes", self.0.len())?;
        if !self.0.is_empty() {
            write!(f, ": ")?;
            for byte in self.0.iter().take(PREVIEW) {
                write!(f, "{:02x}", byte)?;
            }
            if self.0.len() > PREVIEW {
                write!(f, "..")?;
            }
        }
        write!(f, ")")
    }
}

// =============================================================================
// Native -> managed views
// =============================================================================

/// Borrowed view of an engine-owned byte buffer, valid during one callback.
pub(crate) struct NativeSlice<'cb> {
    bytes: &'cb [u8],
}

impl<'cb> NativeSlice<'cb> {
    /// NULL with length 0 is an empty buffer. NULL with a non-zero length is
    /// malformed and yields `None`.
    ///
    /// # Safety
    /// `ptr` must be NULL or point to `len` readable bytes that stay valid for `'cb`.
    pub(crate) unsafe fn from_raw(ptr: *const u8, len: usize) -> Option<Self> {
        let bytes = match (ptr.is_null(), len) {
            (_, 0) => &[][..],
            (true, _) => return None,
            (false, len) => std::slice::from_raw_parts(ptr, len),
        };
        Some(Self { bytes })
    }

    /// `None` when the engine passed NULL (field absent).
    ///
    /// # Safety
    /// Same contract as [`NativeSlice::from_raw`].
    pub(crate) unsafe fn optional(ptr: *const u8, len: usize) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Self::from_raw(ptr, len)
        }
    }

    /// Copy out into an owned payload.
    pub(crate) fn to_payload(&self) -> Payload {
        Payload(self.bytes.to_vec())
    }
}

/// Borrowed view of an engine-owned C string, valid during one callback.
pub(crate) struct NativeStr<'cb> {
    s: &'cb CStr,
}

impl<'cb> NativeStr<'cb> {
    /// # Safety
    /// `ptr` must be NULL or a NUL-terminated string valid for `'cb`.
    pub(crate) unsafe fn from_raw(ptr: *const c_char) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self {
                s: CStr::from_ptr(ptr),
            })
        }
    }

    /// Owned UTF-8 copy.
    pub(crate) fn to_owned_string(&self) -> std::result::Result<String, std::str::Utf8Error> {
        self.s.to_str().map(str::to_owned)
    }
}

/// Engine-allocated string returned by a native call.
///
/// Released with `free_string` exactly once, on drop.
pub(crate) struct NativeString<'a> {
    ptr: NonNull<c_char>,
    api: &'a dyn NativeApi,
}

impl<'a> NativeString<'a> {
    /// # Safety
    /// `ptr` must be NULL or a string allocated by `api` that nobody else frees.
    pub(crate) unsafe fn from_raw(ptr: *mut c_char, api: &'a dyn NativeApi) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, api })
    }

    pub(crate) fn to_string_lossy(&self) -> String {
        // SAFETY: ptr is a valid NUL-terminated string until drop.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for NativeString<'_> {
    fn drop(&mut self) {
        // SAFETY: allocated by the engine, freed only here.
        unsafe { self.api.free_string(self.ptr.as_ptr()) };
    }
}

// =============================================================================
// Managed -> native
// =============================================================================

/// Byte buffer lent to a synchronous native call.
#[derive(Clone, Copy)]
pub(crate) struct OutboundBytes<'a> {
    bytes: &'a [u8],
    _lent: PhantomData<&'a [u8]>,
}

impl<'a> OutboundBytes<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            _lent: PhantomData,
        }
    }

    /// NULL for an empty buffer, so the engine never dereferences a dangling pointer.
    pub(crate) fn as_ptr(&self) -> *const u8 {
        if self.bytes.is_empty() {
            ptr::null()
        } else {
            self.bytes.as_ptr()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Optional buffer: NULL/0 when absent.
    pub(crate) fn optional(bytes: Option<&'a [u8]>) -> (*const u8, usize) {
        match bytes {
            Some(bytes) => {
                let out = OutboundBytes::new(bytes);
                (out.as_ptr(), out.len())
            }
            None => (ptr::null(), 0),
        }
    }
}

/// NUL-terminated copy of an arbitrary string argument.
pub(crate) fn c_string(value: &str, what: &str) -> Result<CString> {
    CString::new(value).map_err(|_| Error::InvalidArgument(format!("{} contains NUL byte", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_native_slice_is_empty() {
        let slice = unsafe { NativeSlice::from_raw(ptr::null(), 0) }.unwrap();
        assert!(slice.to_payload().is_empty());
        assert!(unsafe { NativeSlice::optional(ptr::null(), 0) }.is_none());
    }

    #[test]
    fn null_with_length_is_malformed() {
        assert!(unsafe { NativeSlice::from_raw(ptr::null(), 5) }.is_none());
        assert!(unsafe { NativeSlice::optional(ptr::null(), 5) }.is_none());
    }

    #[test]
    fn native_slice_copies_out() {
        let mut native = vec![1u8, 2, 3, 4];
        let payload = {
            let slice = unsafe { NativeSlice::from_raw(native.as_ptr(), native.len()) }.unwrap();
            slice.to_payload()
        };
        // Mutating the source after the copy must not affect the payload.
        native[0] = 0xff;
        assert_eq!(payload.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn native_str_rejects_invalid_utf8() {
        let raw = CString::new(vec![0x66, 0xff, 0x6f]).unwrap();
        let view = unsafe { NativeStr::from_raw(raw.as_ptr()) }.unwrap();
        assert!(view.to_owned_string().is_err());
        assert!(unsafe { NativeStr::from_raw(ptr::null()) }.is_none());
    }

    #[test]
    fn outbound_empty_is_null() {
        let empty = OutboundBytes::new(&[]);
        assert!(empty.as_ptr().is_null());
        assert_eq!(empty.len(), 0);

        let (ptr, len) = OutboundBytes::optional(None);
        assert!(ptr.is_null());
        assert_eq!(len, 0);

        let data = [9u8; 3];
        let (ptr, len) = OutboundBytes::optional(Some(&data));
        assert_eq!(ptr, data.as_ptr());
        assert_eq!(len, 3);
    }

    #[test]
    fn payload_debug_preview() {
        let payload = Payload::from(vec![0xab; 20]);
        let dbg = format!("{:?}", payload);
        assert!(dbg.starts_with("Payload(20 bytes: abab"));
        assert!(dbg.ends_with("..)"));
    }

    #[test]
    fn c_string_rejects_nul() {
        assert!(matches!(
            c_string("a\0b", "config"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
