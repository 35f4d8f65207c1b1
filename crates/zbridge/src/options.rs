// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publication/query options and their wire values.
//!
//! Option structs are lowered into the `#[repr(C)]` layouts of `zbridge-sys`
//! through `Lowered*` values that own every buffer the raw struct points into,
//! so the pointers stay valid for as long as the lowered value is alive.

use std::ffi::CString;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::ptr;
use std::time::Duration;

use zbridge_sys as sys;

use crate::buffer::{c_string, OutboundBytes};
use crate::config::DEFAULT_QUERY_TIMEOUT;
use crate::error::Result;

/// Message priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    RealTime,
    InteractiveHigh,
    InteractiveLow,
    DataHigh,
    #[default]
    Data,
    DataLow,
    Background,
}

impl Priority {
    pub(crate) fn to_raw(self) -> sys::ZPriority {
        match self {
            Priority::RealTime => sys::ZPriority::RealTime,
            Priority::InteractiveHigh => sys::ZPriority::InteractiveHigh,
            Priority::InteractiveLow => sys::ZPriority::InteractiveLow,
            Priority::DataHigh => sys::ZPriority::DataHigh,
            Priority::Data => sys::ZPriority::Data,
            Priority::DataLow => sys::ZPriority::DataLow,
            Priority::Background => sys::ZPriority::Background,
        }
    }

    /// Decode the raw value reported by a callback.
    pub fn from_raw(value: c_int) -> Option<Self> {
        Some(match value {
            1 => Priority::RealTime,
            2 => Priority::InteractiveHigh,
            3 => Priority::InteractiveLow,
            4 => Priority::DataHigh,
            5 => Priority::Data,
            6 => Priority::DataLow,
            7 => Priority::Background,
            _ => return None,
        })
    }
}

/// What the engine does when the outgoing queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CongestionControl {
    /// Wait for room (the native call may block).
    Block,
    #[default]
    Drop,
    DropFirst,
}

impl CongestionControl {
    pub(crate) fn to_raw(self) -> sys::ZCongestionControl {
        match self {
            CongestionControl::Block => sys::ZCongestionControl::Block,
            CongestionControl::Drop => sys::ZCongestionControl::Drop,
            CongestionControl::DropFirst => sys::ZCongestionControl::DropFirst,
        }
    }

    pub fn from_raw(value: c_int) -> Option<Self> {
        Some(match value {
            0 => CongestionControl::Block,
            1 => CongestionControl::Drop,
            2 => CongestionControl::DropFirst,
            _ => return None,
        })
    }
}

/// Put or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Put,
    Delete,
}

impl SampleKind {
    pub fn from_raw(value: c_int) -> Option<Self> {
        match value {
            sys::Z_SAMPLE_KIND_PUT => Some(SampleKind::Put),
            sys::Z_SAMPLE_KIND_DELETE => Some(SampleKind::Delete),
            _ => None,
        }
    }

    pub fn to_raw(self) -> c_int {
        match self {
            SampleKind::Put => sys::Z_SAMPLE_KIND_PUT,
            SampleKind::Delete => sys::Z_SAMPLE_KIND_DELETE,
        }
    }
}

/// Payload encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    Empty,
    #[default]
    Bytes,
    String,
    TextPlain,
    TextJson,
    TextHtml,
    TextXml,
    TextCss,
    TextCsv,
    TextJavascript,
    ImagePng,
    ImageJpeg,
    ImageGif,
    ImageBmp,
    ImageWebp,
    ApplicationOctetStream,
    ApplicationJson,
    ApplicationXml,
    ApplicationCbor,
    ApplicationYaml,
    ApplicationProtobuf,
    ApplicationCdr,
    /// Any other MIME string, sent through the schema field.
    Custom(String),
}

const ENCODING_TABLE: &[(Encoding, &str, sys::ZEncodingId)] = &[
    (Encoding::Empty, "empty", sys::ZEncodingId::Empty),
    (Encoding::Bytes, "zenoh/bytes", sys::ZEncodingId::Bytes),
    (Encoding::String, "zenoh/string", sys::ZEncodingId::String),
    (Encoding::TextPlain, "text/plain", sys::ZEncodingId::TextPlain),
    (Encoding::TextJson, "text/json", sys::ZEncodingId::TextJson),
    (Encoding::TextHtml, "text/html", sys::ZEncodingId::TextHtml),
    (Encoding::TextXml, "text/xml", sys::ZEncodingId::TextXml),
    (Encoding::TextCss, "text/css", sys::ZEncodingId::TextCss),
    (Encoding::TextCsv, "text/csv", sys::ZEncodingId::TextCsv),
    (Encoding::TextJavascript, "text/javascript", sys::ZEncodingId::TextJavascript),
    (Encoding::ImagePng, "image/png", sys::ZEncodingId::ImagePng),
    (Encoding::ImageJpeg, "image/jpeg", sys::ZEncodingId::ImageJpeg),
    (Encoding::ImageGif, "image/gif", sys::ZEncodingId::ImageGif),
    (Encoding::ImageBmp, "image/bmp", sys::ZEncodingId::ImageBmp),
    (Encoding::ImageWebp, "image/webp", sys::ZEncodingId::ImageWebp),
    (
        Encoding::ApplicationOctetStream,
        "application/octet-stream",
        sys::ZEncodingId::ApplicationOctetStream,
    ),
    (Encoding::ApplicationJson, "application/json", sys::ZEncodingId::ApplicationJson),
    (Encoding::ApplicationXml, "application/xml", sys::ZEncodingId::ApplicationXml),
    (Encoding::ApplicationCbor, "application/cbor", sys::ZEncodingId::ApplicationCbor),
    (Encoding::ApplicationYaml, "application/yaml", sys::ZEncodingId::ApplicationYaml),
    (
        Encoding::ApplicationProtobuf,
        "application/protobuf",
        sys::ZEncodingId::ApplicationProtobuf,
    ),
    (Encoding::ApplicationCdr, "application/cdr", sys::ZEncodingId::ApplicationCdr),
];

impl Encoding {
    /// MIME string of this encoding.
    pub fn as_mime(&self) -> &str {
        if let Encoding::Custom(mime) = self {
            return mime;
        }
        ENCODING_TABLE
            .iter()
            .find(|(enc, _, _)| enc == self)
            .map(|(_, mime, _)| *mime)
            .unwrap_or("zenoh/bytes")
    }

    /// Parse an engine encoding string (`mime` or `mime;schema`).
    pub fn from_mime(value: &str) -> Self {
        let base = value.split(';').next().unwrap_or(value).trim();
        ENCODING_TABLE
            .iter()
            .find(|(_, mime, _)| *mime == base)
            .map(|(enc, _, _)| enc.clone())
            .unwrap_or_else(|| Encoding::Custom(value.to_string()))
    }

    pub(crate) fn to_raw(&self) -> sys::ZEncodingId {
        if matches!(self, Encoding::Custom(_)) {
            return sys::ZEncodingId::Custom;
        }
        ENCODING_TABLE
            .iter()
            .find(|(enc, _, _)| enc == self)
            .map(|(_, _, id)| *id)
            .unwrap_or(sys::ZEncodingId::Bytes)
    }

    /// Inverse of [`Encoding::to_raw`]; a custom id without schema decays to bytes.
    pub(crate) fn from_raw(id: sys::ZEncodingId, schema: Option<&str>) -> Self {
        if id == sys::ZEncodingId::Custom {
            return schema.map_or(Encoding::Bytes, |mime| Encoding::Custom(mime.to_string()));
        }
        ENCODING_TABLE
            .iter()
            .find(|(_, _, raw)| *raw == id)
            .map(|(enc, _, _)| enc.clone())
            .unwrap_or_default()
    }

    /// Schema string carried next to the id (custom MIME only).
    pub(crate) fn schema(&self) -> Result<Option<CString>> {
        match self {
            Encoding::Custom(mime) => c_string(mime, "custom encoding").map(Some),
            _ => Ok(None),
        }
    }
}

fn schema_ptr(schema: &Option<CString>) -> *const std::os::raw::c_char {
    schema.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

// =============================================================================
// Publisher options
// =============================================================================

/// Options fixed at publisher declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherOptions {
    pub priority: Priority,
    pub congestion_control: CongestionControl,
    pub encoding: Encoding,
    /// Disable batching for lower latency.
    pub express: bool,
}

impl PublisherOptions {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn congestion_control(mut self, cc: CongestionControl) -> Self {
        self.congestion_control = cc;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn express(mut self, express: bool) -> Self {
        self.express = express;
        self
    }

    pub(crate) fn lower(&self) -> Result<LoweredPublisherOptions<'_>> {
        let schema = self.encoding.schema()?;
        let raw = sys::ZPublisherOptions {
            priority: self.priority.to_raw(),
            congestion_control: self.congestion_control.to_raw(),
            encoding: self.encoding.to_raw(),
            encoding_schema: schema_ptr(&schema),
            is_express: self.express,
        };
        Ok(LoweredPublisherOptions {
            raw,
            _schema: schema,
            _owner: PhantomData,
        })
    }
}

pub(crate) struct LoweredPublisherOptions<'a> {
    raw: sys::ZPublisherOptions,
    _schema: Option<CString>,
    _owner: PhantomData<&'a PublisherOptions>,
}

impl LoweredPublisherOptions<'_> {
    pub(crate) fn as_ptr(&self) -> *const sys::ZPublisherOptions {
        &self.raw
    }
}

// =============================================================================
// Put options
// =============================================================================

/// Per-put options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub priority: Priority,
    pub congestion_control: CongestionControl,
    pub encoding: Encoding,
    pub attachment: Option<Vec<u8>>,
    pub express: bool,
}

impl PutOptions {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn congestion_control(mut self, cc: CongestionControl) -> Self {
        self.congestion_control = cc;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn attachment(mut self, attachment: impl Into<Vec<u8>>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }

    pub fn express(mut self, express: bool) -> Self {
        self.express = express;
        self
    }

    pub(crate) fn lower(&self) -> Result<LoweredPutOptions<'_>> {
        let schema = self.encoding.schema()?;
        let (attachment, attachment_len) = OutboundBytes::optional(self.attachment.as_deref());
        let raw = sys::ZPutOptions {
            priority: self.priority.to_raw(),
            congestion_control: self.congestion_control.to_raw(),
            encoding: self.encoding.to_raw(),
            encoding_schema: schema_ptr(&schema),
            attachment,
            attachment_len,
            is_express: self.express,
        };
        Ok(LoweredPutOptions {
            raw,
            _schema: schema,
            _owner: PhantomData,
        })
    }
}

pub(crate) struct LoweredPutOptions<'a> {
    raw: sys::ZPutOptions,
    _schema: Option<CString>,
    _owner: PhantomData<&'a PutOptions>,
}

impl LoweredPutOptions<'_> {
    pub(crate) fn as_ptr(&self) -> *const sys::ZPutOptions {
        &self.raw
    }
}

// =============================================================================
// Get options
// =============================================================================

/// Query options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOptions {
    /// How long replies are awaited (default 10 s).
    pub timeout: Duration,
    pub priority: Priority,
    pub congestion_control: CongestionControl,
    /// Optional query payload.
    pub payload: Option<Vec<u8>>,
    /// Encoding of the query payload.
    pub encoding: Encoding,
    pub attachment: Option<Vec<u8>>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
            priority: Priority::default(),
            congestion_control: CongestionControl::default(),
            payload: None,
            encoding: Encoding::default(),
            attachment: None,
        }
    }
}

impl GetOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn attachment(mut self, attachment: impl Into<Vec<u8>>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub(crate) fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    pub(crate) fn lower(&self) -> LoweredGetOptions<'_> {
        let (payload, payload_len) = OutboundBytes::optional(self.payload.as_deref());
        let (attachment, attachment_len) = OutboundBytes::optional(self.attachment.as_deref());
        LoweredGetOptions {
            raw: sys::ZGetOptions {
                timeout_ms: self.timeout_ms(),
                priority: self.priority.to_raw(),
                congestion_control: self.congestion_control.to_raw(),
                payload,
                payload_len,
                encoding: self.encoding.to_raw(),
                attachment,
                attachment_len,
            },
            _owner: PhantomData,
        }
    }
}

pub(crate) struct LoweredGetOptions<'a> {
    raw: sys::ZGetOptions,
    _owner: PhantomData<&'a GetOptions>,
}

impl LoweredGetOptions<'_> {
    pub(crate) fn as_ptr(&self) -> *const sys::ZGetOptions {
        &self.raw
    }
}

/// Options for a queryable reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    pub encoding: Encoding,
    pub attachment: Option<Vec<u8>>,
}

impl ReplyOptions {
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn attachment(mut self, attachment: impl Into<Vec<u8>>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips_through_raw_values() {
        for raw in 1..=7 {
            let prio = Priority::from_raw(raw).unwrap();
            assert_eq!(prio.to_raw() as c_int, raw);
        }
        assert_eq!(Priority::from_raw(0), None);
        assert_eq!(Priority::from_raw(8), None);
        assert_eq!(Priority::default(), Priority::Data);
    }

    #[test]
    fn congestion_control_defaults_to_drop() {
        assert_eq!(CongestionControl::default(), CongestionControl::Drop);
        assert_eq!(CongestionControl::from_raw(0), Some(CongestionControl::Block));
        assert_eq!(CongestionControl::from_raw(9), None);
    }

    #[test]
    fn encoding_mime_table() {
        assert_eq!(Encoding::ApplicationJson.as_mime(), "application/json");
        assert_eq!(Encoding::from_mime("text/plain"), Encoding::TextPlain);
        assert_eq!(
            Encoding::from_mime("application/json;utf8"),
            Encoding::ApplicationJson
        );
        assert_eq!(
            Encoding::from_mime("x-custom/thing"),
            Encoding::Custom("x-custom/thing".to_string())
        );
        assert_eq!(Encoding::TextCsv.to_raw(), sys::ZEncodingId::TextCsv);
        assert_eq!(
            Encoding::Custom("a/b".into()).to_raw(),
            sys::ZEncodingId::Custom
        );
    }

    #[test]
    fn encoding_from_raw_id() {
        assert_eq!(
            Encoding::from_raw(sys::ZEncodingId::ImagePng, None),
            Encoding::ImagePng
        );
        assert_eq!(
            Encoding::from_raw(sys::ZEncodingId::Custom, Some("x/y")),
            Encoding::Custom("x/y".into())
        );
        assert_eq!(Encoding::from_raw(sys::ZEncodingId::Custom, None), Encoding::Bytes);
        // `Json` has no table entry of its own.
        assert_eq!(Encoding::from_raw(sys::ZEncodingId::Json, None), Encoding::Bytes);
    }

    #[test]
    fn lowered_put_options_point_into_owner() {
        let options = PutOptions::default()
            .attachment(b"meta".to_vec())
            .encoding(Encoding::Custom("x/y".into()));
        let lowered = options.lower().unwrap();
        let raw = unsafe { &*lowered.as_ptr() };
        assert_eq!(raw.attachment_len, 4);
        assert_eq!(raw.attachment, options.attachment.as_ref().unwrap().as_ptr());
        assert!(!raw.encoding_schema.is_null());
        assert_eq!(raw.encoding, sys::ZEncodingId::Custom);
    }

    #[test]
    fn lowered_get_options_defaults() {
        let options = GetOptions::default();
        let lowered = options.lower();
        let raw = unsafe { &*lowered.as_ptr() };
        assert_eq!(raw.timeout_ms, 10_000);
        assert!(raw.payload.is_null());
        assert_eq!(raw.payload_len, 0);
    }
}
