// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key expression and selector validation.
//!
//! Validation happens before any native call so malformed addresses surface as
//! [`Error::InvalidKeyExpression`] without touching the engine.
//!
//! Accepted grammar (canonical form only):
//!
//! ```text
//! key      := chunk ( '/' chunk )*
//! chunk    := '*' | '**' | verbatim
//! verbatim := ( char | '$*' )+        char != '/', '#', '?', '$', '*', NUL
//! ```
//!
//! `**/**` is rejected (non canonical).

use std::ffi::CString;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A validated key expression.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyExpr(String);

impl KeyExpr {
    /// Validate and wrap a key expression.
    pub fn new(expr: impl Into<String>) -> Result<Self> {
        let expr = expr.into();
        validate(&expr)?;
        Ok(Self(expr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the expression contains wildcards.
    pub fn is_wild(&self) -> bool {
        self.0.contains('*')
    }

    /// NUL-terminated copy for the duration of a native call.
    pub(crate) fn to_cstring(&self) -> Result<CString> {
        CString::new(self.0.as_bytes())
            .map_err(|_| Error::InvalidKeyExpression(format!("'{}' contains NUL", self.0)))
    }
}

fn validate(expr: &str) -> Result<()> {
    let invalid = |why: &str| Err(Error::InvalidKeyExpression(format!("'{}': {}", expr, why)));

    if expr.is_empty() {
        return invalid("empty key expression");
    }
    if expr.contains('\0') {
        return invalid("contains NUL byte");
    }
    if expr.starts_with('/') || expr.ends_with('/') {
        return invalid("leading or trailing '/'");
    }
    if expr.contains(['#', '?']) {
        return invalid("'#' and '?' are reserved");
    }

    let mut previous_double = false;
    for chunk in expr.split('/') {
        if chunk.is_empty() {
            return invalid("empty chunk");
        }
        let is_double = chunk == "**";
        if is_double && previous_double {
            return invalid("'**/**' is not canonical");
        }
        previous_double = is_double;

        if chunk == "*" || is_double {
            continue;
        }
        validate_verbatim(chunk).or_else(|why| invalid(why))?;
    }
    Ok(())
}

fn validate_verbatim(chunk: &str) -> std::result::Result<(), &'static str> {
    let bytes = chunk.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' => {
                if bytes.get(i + 1) != Some(&b'*') {
                    return Err("'$' must be followed by '*'");
                }
                if bytes.get(i + 2) == Some(&b'$') && bytes.get(i + 3) == Some(&b'*') {
                    return Err("'$*$*' is not canonical");
                }
                i += 2;
            }
            b'*' => return Err("'*' must form a whole chunk or follow '$'"),
            _ => i += 1,
        }
    }
    Ok(())
}

impl fmt::Debug for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyExpr({})", self.0)
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for KeyExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

/// Key expression plus optional query parameters (`key?params`).
#[derive(Clone, PartialEq, Eq)]
pub struct Selector {
    key_expr: KeyExpr,
    parameters: String,
}

impl Selector {
    /// Parse `key` or `key?parameters`.
    pub fn parse(selector: &str) -> Result<Self> {
        let (key, parameters) = match selector.split_once('?') {
            Some((key, params)) => (key, params),
            None => (selector, ""),
        };
        if parameters.contains('\0') {
            return Err(Error::InvalidKeyExpression(format!(
                "'{}': parameters contain NUL byte",
                selector
            )));
        }
        Ok(Self {
            key_expr: KeyExpr::new(key)?,
            parameters: parameters.to_string(),
        })
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    pub(crate) fn to_cstring(&self) -> Result<CString> {
        CString::new(self.to_string())
            .map_err(|_| Error::InvalidKeyExpression("selector contains NUL".to_string()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameters.is_empty() {
            write!(f, "{}", self.key_expr)
        } else {
            write!(f, "{}?{}", self.key_expr, self.parameters)
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self)
    }
}

impl From<KeyExpr> for Selector {
    fn from(key_expr: KeyExpr) -> Self {
        Self {
            key_expr,
            parameters: String::new(),
        }
    }
}
