//! Objective-C style type encodings for method signatures.
//!
//! An encoding lists the return type, the receiver (`@`), the selector (`:`)
//! and then each argument, e.g. `v@:@` for a void method taking one object.
//! Frame offsets (`v24@0:8@16`) and type qualifiers (`r`, `n`, `o`, ...) are
//! accepted and ignored.

use crate::error::{InterceptError, Result};
use crate::types::Value;
use std::fmt;

/// Layout of a single parameter or return value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeLayout {
    Void,
    Char,
    Short,
    Int,
    Long,
    LongLong,
    UChar,
    UShort,
    UInt,
    ULong,
    ULongLong,
    Float,
    Double,
    Bool,
    Object,
    Class,
    Selector,
    CString,
    Pointer(Box<TypeLayout>),
    Struct(String),
    Union(String),
    Array(String),
    Bitfield(u32),
    Unknown,
}

impl TypeLayout {
    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            TypeLayout::Char
                | TypeLayout::Short
                | TypeLayout::Int
                | TypeLayout::Long
                | TypeLayout::LongLong
        )
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            TypeLayout::UChar
                | TypeLayout::UShort
                | TypeLayout::UInt
                | TypeLayout::ULong
                | TypeLayout::ULongLong
        )
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer() || *self == TypeLayout::Bool
    }

    /// Whether values of this layout can be carried by [`Value`].
    pub fn is_marshalable(&self) -> bool {
        match self {
            TypeLayout::Struct(_)
            | TypeLayout::Union(_)
            | TypeLayout::Array(_)
            | TypeLayout::Bitfield(_)
            | TypeLayout::Unknown => false,
            _ => true,
        }
    }

    /// Whether `value` may be passed where this layout is declared.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeLayout::Void, _) => false,
            (TypeLayout::Bool, Value::Bool(_)) => true,
            (layout, Value::Int(_)) if layout.is_integer() => true,
            (layout, Value::UInt(_)) if layout.is_integer() => true,
            (layout, Value::Bool(_)) if layout.is_integer() => true,
            (TypeLayout::Float | TypeLayout::Double, Value::Float(_)) => true,
            (TypeLayout::Object, Value::Object(_) | Value::Weak(_) | Value::Nil) => true,
            (TypeLayout::Object, Value::Str(_)) => true,
            (TypeLayout::Class, Value::Class(_) | Value::Nil) => true,
            (TypeLayout::Selector, Value::Selector(_) | Value::Nil) => true,
            (TypeLayout::CString, Value::Str(_) | Value::Nil) => true,
            (TypeLayout::Pointer(_), Value::Ref(_) | Value::Nil) => true,
            _ => false,
        }
    }

    fn code(&self) -> String {
        match self {
            TypeLayout::Void => "v".into(),
            TypeLayout::Char => "c".into(),
            TypeLayout::Short => "s".into(),
            TypeLayout::Int => "i".into(),
            TypeLayout::Long => "l".into(),
            TypeLayout::LongLong => "q".into(),
            TypeLayout::UChar => "C".into(),
            TypeLayout::UShort => "S".into(),
            TypeLayout::UInt => "I".into(),
            TypeLayout::ULong => "L".into(),
            TypeLayout::ULongLong => "Q".into(),
            TypeLayout::Float => "f".into(),
            TypeLayout::Double => "d".into(),
            TypeLayout::Bool => "B".into(),
            TypeLayout::Object => "@".into(),
            TypeLayout::Class => "#".into(),
            TypeLayout::Selector => ":".into(),
            TypeLayout::CString => "*".into(),
            TypeLayout::Pointer(inner) => format!("^{}", inner.code()),
            TypeLayout::Struct(body) => format!("{{{}}}", body),
            TypeLayout::Union(body) => format!("({})", body),
            TypeLayout::Array(body) => format!("[{}]", body),
            TypeLayout::Bitfield(width) => format!("b{}", width),
            TypeLayout::Unknown => "?".into(),
        }
    }
}

/// Parameter and return layout of a method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    return_type: TypeLayout,
    arguments: Vec<TypeLayout>,
}

impl Signature {
    pub fn new(return_type: TypeLayout, arguments: Vec<TypeLayout>) -> Self {
        Self {
            return_type,
            arguments,
        }
    }

    /// `v@:`
    pub fn void() -> Self {
        Self::new(TypeLayout::Void, Vec::new())
    }

    /// Parse an encoding string such as `v@:@` or `q24@0:8`.
    pub fn parse(encoding: &str) -> Result<Self> {
        let mut parser = Parser {
            bytes: encoding.as_bytes(),
            pos: 0,
            source: encoding,
        };

        let mut layouts = Vec::new();
        while !parser.at_end() {
            layouts.push(parser.next_layout()?);
            parser.skip_offset();
        }

        if layouts.len() < 3 {
            return Err(InterceptError::InvalidEncoding(format!(
                "{:?} must contain a return type, receiver and selector",
                encoding
            )));
        }
        if layouts[1] != TypeLayout::Object || layouts[2] != TypeLayout::Selector {
            return Err(InterceptError::InvalidEncoding(format!(
                "{:?} must declare `@:` after the return type",
                encoding
            )));
        }

        let mut layouts = layouts.into_iter();
        let return_type = layouts.next().unwrap_or(TypeLayout::Void);
        let arguments = layouts.skip(2).collect();
        Ok(Self::new(return_type, arguments))
    }

    pub fn return_type(&self) -> &TypeLayout {
        &self.return_type
    }

    pub fn arguments(&self) -> &[TypeLayout] {
        &self.arguments
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// The first layout that cannot be carried by a [`Value`], if any.
    pub fn unsupported_layout(&self) -> Option<&TypeLayout> {
        std::iter::once(&self.return_type)
            .chain(self.arguments.iter())
            .find(|layout| !layout.is_marshalable())
    }

    /// Encoding string in canonical form (no offsets).
    pub fn encoding(&self) -> String {
        let mut out = self.return_type.code();
        out.push_str("@:");
        for arg in &self.arguments {
            out.push_str(&arg.code());
        }
        out
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoding())
    }
}

/// Whether a method returns nothing.
pub fn is_void_return(signature: &Signature) -> bool {
    signature.return_type == TypeLayout::Void
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_offset(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> InterceptError {
        InterceptError::InvalidEncoding(format!(
            "{:?} at offset {}: {}",
            self.source, self.pos, message
        ))
    }

    fn next_layout(&mut self) -> Result<TypeLayout> {
        // Type qualifiers: const, in, inout, out, bycopy, byref, oneway.
        while matches!(
            self.peek(),
            Some(b'r' | b'n' | b'N' | b'o' | b'O' | b'R' | b'V')
        ) {
            self.pos += 1;
        }

        let byte = self.peek().ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;

        let layout = match byte {
            b'v' => TypeLayout::Void,
            b'c' => TypeLayout::Char,
            b's' => TypeLayout::Short,
            b'i' => TypeLayout::Int,
            b'l' => TypeLayout::Long,
            b'q' => TypeLayout::LongLong,
            b'C' => TypeLayout::UChar,
            b'S' => TypeLayout::UShort,
            b'I' => TypeLayout::UInt,
            b'L' => TypeLayout::ULong,
            b'Q' => TypeLayout::ULongLong,
            b'f' => TypeLayout::Float,
            b'd' => TypeLayout::Double,
            b'B' => TypeLayout::Bool,
            b'@' => {
                // Block (`@?`) and class-annotated object (`@"NSString"`).
                if self.peek() == Some(b'?') {
                    self.pos += 1;
                    TypeLayout::Unknown
                } else {
                    if self.peek() == Some(b'"') {
                        self.pos += 1;
                        self.take_until(b'"', b'"')?;
                    }
                    TypeLayout::Object
                }
            }
            b'#' => TypeLayout::Class,
            b':' => TypeLayout::Selector,
            b'*' => TypeLayout::CString,
            b'?' => TypeLayout::Unknown,
            b'^' => {
                if self.peek() == Some(b'?') {
                    self.pos += 1;
                    TypeLayout::Pointer(Box::new(TypeLayout::Unknown))
                } else {
                    TypeLayout::Pointer(Box::new(self.next_layout()?))
                }
            }
            b'{' => TypeLayout::Struct(self.take_until(b'{', b'}')?),
            b'(' => TypeLayout::Union(self.take_until(b'(', b')')?),
            b'[' => TypeLayout::Array(self.take_until(b'[', b']')?),
            b'b' => {
                let start = self.pos;
                self.skip_offset();
                let width = self.source[start..self.pos]
                    .parse()
                    .map_err(|_| self.error("bitfield without width"))?;
                TypeLayout::Bitfield(width)
            }
            other => return Err(self.error(&format!("unknown type code {:?}", other as char))),
        };
        Ok(layout)
    }

    /// Consume a bracketed body, returning it without the delimiters. The
    /// opening delimiter has already been consumed.
    fn take_until(&mut self, open: u8, close: u8) -> Result<String> {
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(byte) = self.peek() {
            self.pos += 1;
            if byte == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(self.source[start..self.pos - 1].to_string());
                }
            } else if byte == open && open != close {
                depth += 1;
            }
        }
        Err(self.error("unterminated aggregate"))
    }
}
