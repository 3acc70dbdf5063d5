//! Value marshaling between host values and the native calling convention.
//!
//! 64-bit platform identifiers stay decimal text on the host side and only become
//! `u64` here, so no identifier ever travels through a floating-point value.
//! Strings become owned `CString`s that a [`MarshalContext`] keeps alive for the
//! duration of one native call.

use std::ffi::{CStr, CString, c_char};

use crate::catalog::ParamKind;
use crate::error::MarshalError;

/// Parse a decimal identifier into its native 64-bit form.
///
/// Accepts ASCII digits only (leading zeros allowed). Signs, whitespace and
/// values above `u64::MAX` are rejected.
pub fn to_native64(text: &str) -> Result<u64, MarshalError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MarshalError::InvalidIdentifier(text.to_string()));
    }
    text.parse::<u64>()
        .map_err(|_| MarshalError::InvalidIdentifier(text.to_string()))
}

/// Canonical decimal text for a native 64-bit identifier.
pub fn from_native64(value: u64) -> String {
    value.to_string()
}

/// Encode text as a NUL-terminated UTF-8 buffer.
pub fn to_native_string(text: &str) -> Result<CString, MarshalError> {
    CString::new(text).map_err(|e| {
        MarshalError::EncodingError(format!("interior NUL at byte {}", e.nul_position()))
    })
}

/// Copy a native-owned, NUL-terminated string into a host `String`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated buffer that stays valid for the
/// duration of this call.
pub unsafe fn from_native_string(ptr: *const c_char) -> Result<String, MarshalError> {
    if ptr.is_null() {
        return Err(MarshalError::NullPointer);
    }
    let cstr = unsafe { CStr::from_ptr(ptr) };
    cstr.to_str()
        .map(str::to_owned)
        .map_err(|e| MarshalError::EncodingError(e.to_string()))
}

/// A closed set of symbolic values with fixed native integer codes.
pub trait NativeEnum: Copy + 'static {
    /// Name used in error messages.
    const KIND: &'static str;

    /// Every variant with its symbolic name.
    fn variants() -> &'static [(&'static str, Self)];

    /// The native integer code.
    fn code(self) -> i32;
}

/// Look a variant up by name, case-insensitively.
pub fn parse_enum<E: NativeEnum>(symbol: &str) -> Result<E, MarshalError> {
    E::variants()
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(symbol))
        .map(|(_, variant)| *variant)
        .ok_or_else(|| MarshalError::UnknownVariant {
            kind: E::KIND,
            value: symbol.to_string(),
        })
}

/// Map a symbolic name to its native code, rejecting anything outside the set.
pub fn to_native_enum<E: NativeEnum>(symbol: &str) -> Result<i32, MarshalError> {
    parse_enum::<E>(symbol).map(E::code)
}

/// A closed set of string-valued dialog names.
pub trait DialogName: Copy + 'static {
    const KIND: &'static str;

    fn all() -> &'static [Self];

    /// Exact name the native library expects.
    fn name(self) -> &'static str;
}

/// A dialog given either as a known constant or as raw text.
///
/// Raw text is only accepted when it names a known dialog; it is never passed
/// through unchecked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogArg<D> {
    Known(D),
    Raw(String),
}

impl<D: DialogName> DialogArg<D> {
    pub fn resolve(&self) -> Result<&'static str, MarshalError> {
        match self {
            DialogArg::Known(dialog) => Ok(dialog.name()),
            DialogArg::Raw(text) => D::all()
                .iter()
                .map(|d| d.name())
                .find(|name| name.eq_ignore_ascii_case(text))
                .ok_or_else(|| MarshalError::UnknownVariant {
                    kind: D::KIND,
                    value: text.clone(),
                }),
        }
    }
}

impl<D> From<&str> for DialogArg<D> {
    fn from(text: &str) -> Self {
        DialogArg::Raw(text.to_string())
    }
}

impl<D> From<String> for DialogArg<D> {
    fn from(text: String) -> Self {
        DialogArg::Raw(text)
    }
}

/// Host-side argument to a native call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Bool(bool),
    I32(i32),
    U32(u32),
    U64(u64),
    /// 64-bit identifier as decimal text.
    Id(String),
    Str(String),
}

impl Arg {
    pub fn id(text: impl Into<String>) -> Self {
        Arg::Id(text.into())
    }

    pub fn str(text: impl Into<String>) -> Self {
        Arg::Str(text.into())
    }

    pub fn enumeration<E: NativeEnum>(value: E) -> Self {
        Arg::I32(value.code())
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Arg::Bool(_) => "bool",
            Arg::I32(_) => "i32",
            Arg::U32(_) => "u32",
            Arg::U64(_) => "u64",
            Arg::Id(_) => "id",
            Arg::Str(_) => "string",
        }
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::I32(v)
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::U32(v)
    }
}

impl From<u64> for Arg {
    fn from(v: u64) -> Self {
        Arg::U64(v)
    }
}

/// A lowered argument in native layout.
///
/// `Str` points into a `CString` owned by the [`MarshalContext`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawArg {
    Bool(bool),
    I32(i32),
    U32(u32),
    U64(u64),
    Str(*const c_char),
}

/// Owns the native buffers created while lowering one call's arguments.
#[derive(Default)]
pub struct MarshalContext {
    strings: Vec<CString>,
}

impl MarshalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower a full argument list against a declared parameter list.
    pub fn lower_all(
        &mut self,
        args: &[Arg],
        params: &[ParamKind],
    ) -> Result<Vec<RawArg>, MarshalError> {
        if args.len() != params.len() {
            return Err(MarshalError::ArityMismatch {
                expected: params.len(),
                got: args.len(),
            });
        }
        args.iter()
            .zip(params)
            .enumerate()
            .map(|(index, (arg, param))| self.lower(index, arg, *param))
            .collect()
    }

    fn lower(&mut self, index: usize, arg: &Arg, param: ParamKind) -> Result<RawArg, MarshalError> {
        match (arg, param) {
            (Arg::Bool(b), ParamKind::Bool) => Ok(RawArg::Bool(*b)),
            (Arg::I32(v), ParamKind::I32) => Ok(RawArg::I32(*v)),
            (Arg::U32(v), ParamKind::U32) => Ok(RawArg::U32(*v)),
            (Arg::U64(v), ParamKind::U64) => Ok(RawArg::U64(*v)),
            (Arg::Id(text), ParamKind::U64) => Ok(RawArg::U64(to_native64(text)?)),
            (Arg::Str(text), ParamKind::Str) => {
                let cstring = to_native_string(text)?;
                let ptr = cstring.as_ptr();
                // The heap buffer does not move when the CString is pushed.
                self.strings.push(cstring);
                Ok(RawArg::Str(ptr))
            }
            _ => Err(MarshalError::TypeMismatch {
                index,
                expected: param.name(),
                got: arg.kind_name(),
            }),
        }
    }

    pub fn allocated(&self) -> usize {
        self.strings.len()
    }
}
