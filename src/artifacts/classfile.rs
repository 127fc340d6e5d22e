//! Minimal class-file reader.
//!
//! Reads only what type introspection needs: access flags, the type
//! hierarchy, member descriptors and a handful of attributes. Generic
//! signatures are ignored, so rendered types are erased.

use crate::model::{Modifier, Modifiers};
use thiserror::Error;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_PRIVATE: u16 = 0x0002;
const ACC_PROTECTED: u16 = 0x0004;
const ACC_STATIC: u16 = 0x0008;
const ACC_FINAL: u16 = 0x0010;
const ACC_SYNCHRONIZED: u16 = 0x0020;
const ACC_VOLATILE: u16 = 0x0040;
const ACC_BRIDGE: u16 = 0x0040;
const ACC_TRANSIENT: u16 = 0x0080;
const ACC_VARARGS: u16 = 0x0080;
const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
const ACC_ABSTRACT: u16 = 0x0400;
const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_ANNOTATION: u16 = 0x2000;
pub const ACC_ENUM: u16 = 0x4000;

#[derive(Debug, Error)]
pub enum ClassParseError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("invalid UTF-8 string in constant pool: {0}")]
    Utf8Decode(#[from] std::string::FromUtf8Error),
    #[error("malformed descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("unknown annotation element tag '{0}'")]
    InvalidElementTag(char),
}

/// Which member flags mean what differs between fields and methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagContext {
    Class,
    Field,
    Method,
}

pub fn modifiers_from_flags(flags: u16) -> Modifiers {
    decode_flags(flags, FlagContext::Class)
}

fn decode_flags(flags: u16, context: FlagContext) -> Modifiers {
    let mut out = Modifiers::new();
    let table: &[(u16, Modifier)] = &[
        (ACC_PUBLIC, Modifier::Public),
        (ACC_PRIVATE, Modifier::Private),
        (ACC_PROTECTED, Modifier::Protected),
        (ACC_STATIC, Modifier::Static),
        (ACC_FINAL, Modifier::Final),
        (ACC_ABSTRACT, Modifier::Abstract),
    ];
    for (bit, modifier) in table {
        if flags & bit != 0 {
            out.insert(*modifier);
        }
    }
    match context {
        FlagContext::Class => {
            // ACC_SUPER shares the synchronized bit on classes
        }
        FlagContext::Field => {
            if flags & ACC_VOLATILE != 0 {
                out.insert(Modifier::Volatile);
            }
            if flags & ACC_TRANSIENT != 0 {
                out.insert(Modifier::Transient);
            }
        }
        FlagContext::Method => {
            if flags & ACC_SYNCHRONIZED != 0 {
                out.insert(Modifier::Synchronized);
            }
            if flags & ACC_NATIVE != 0 {
                out.insert(Modifier::Native);
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassField {
    pub name: String,
    pub ty: String,
    pub modifiers: Modifiers,
    pub annotations: Vec<String>,
    pub has_constant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMethod {
    pub name: String,
    pub return_type: String,
    /// `(name, type)`; names fall back to `argN` without a MethodParameters attribute.
    pub params: Vec<(String, String)>,
    pub modifiers: Modifiers,
    pub exceptions: Vec<String>,
    pub annotations: Vec<String>,
    pub has_code: bool,
}

impl ClassMethod {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassEntry {
    /// Binary name with dots, e.g. `com.acme.Outer$Inner`.
    pub inner: String,
    pub outer: Option<String>,
    pub simple_name: Option<String>,
    pub flags: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClass {
    /// Binary name with dots, e.g. `com.acme.Outer$Inner`.
    pub binary_name: String,
    pub access_flags: u16,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<ClassField>,
    pub methods: Vec<ClassMethod>,
    pub annotations: Vec<String>,
    pub inner_classes: Vec<InnerClassEntry>,
}

impl ParsedClass {
    /// Flags as declared in source; nested types keep theirs in InnerClasses.
    pub fn declared_flags(&self) -> u16 {
        self.inner_classes
            .iter()
            .find(|entry| entry.inner == self.binary_name)
            .map(|entry| entry.flags)
            .unwrap_or(self.access_flags)
    }

    /// Direct member types, as `(binary name, simple name)`.
    pub fn member_types(&self) -> Vec<(String, String)> {
        self.inner_classes
            .iter()
            .filter(|entry| entry.outer.as_deref() == Some(self.binary_name.as_str()))
            .filter_map(|entry| {
                let simple = entry.simple_name.clone()?;
                Some((entry.inner.clone(), simple))
            })
            .collect()
    }
}

pub fn parse_class(bytes: &[u8]) -> Result<ParsedClass, ClassParseError> {
    let mut reader = ClassReader::new(bytes);
    reader.expect_magic()?;
    let _minor_version = reader.read_u2()?;
    let _major_version = reader.read_u2()?;
    let pool = ConstantPool::parse(&mut reader)?;

    let access_flags = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let super_index = reader.read_u2()?;
    let binary_name = binary_name(&pool.class_name(this_class)?);
    let super_class = if super_index == 0 {
        None
    } else {
        Some(binary_name_to_java(&pool.class_name(super_index)?))
    };

    let interfaces_count = reader.read_u2()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        let index = reader.read_u2()?;
        interfaces.push(binary_name_to_java(&pool.class_name(index)?));
    }

    let mut fields = Vec::new();
    let fields_count = reader.read_u2()?;
    for _ in 0..fields_count {
        let flags = reader.read_u2()?;
        let name = pool.utf8(reader.read_u2()?)?.to_string();
        let descriptor = pool.utf8(reader.read_u2()?)?.to_string();
        let attrs = read_member_attributes(&mut reader, &pool)?;
        if flags & ACC_SYNTHETIC != 0 {
            continue;
        }
        fields.push(ClassField {
            name,
            ty: parse_field_descriptor(&descriptor)?,
            modifiers: decode_flags(flags, FlagContext::Field),
            annotations: attrs.annotations,
            has_constant: attrs.has_constant,
        });
    }

    let mut methods = Vec::new();
    let methods_count = reader.read_u2()?;
    for _ in 0..methods_count {
        let flags = reader.read_u2()?;
        let name = pool.utf8(reader.read_u2()?)?.to_string();
        let descriptor = pool.utf8(reader.read_u2()?)?.to_string();
        let attrs = read_member_attributes(&mut reader, &pool)?;
        if flags & (ACC_SYNTHETIC | ACC_BRIDGE) != 0 || name == "<clinit>" {
            continue;
        }
        let (mut param_types, return_type) = parse_method_descriptor(&descriptor)?;
        if flags & ACC_VARARGS != 0 {
            if let Some(last) = param_types.last_mut() {
                if let Some(element) = last.strip_suffix("[]") {
                    *last = format!("{element}...");
                }
            }
        }
        let params = param_types
            .into_iter()
            .enumerate()
            .map(|(idx, ty)| {
                let name = attrs
                    .param_names
                    .get(idx)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| format!("arg{idx}"));
                (name, ty)
            })
            .collect();
        methods.push(ClassMethod {
            name,
            return_type,
            params,
            modifiers: decode_flags(flags, FlagContext::Method),
            exceptions: attrs.exceptions,
            annotations: attrs.annotations,
            has_code: attrs.has_code,
        });
    }

    let mut annotations = Vec::new();
    let mut inner_classes = Vec::new();
    let attributes_count = reader.read_u2()?;
    for _ in 0..attributes_count {
        let name = pool.utf8(reader.read_u2()?)?;
        let length = reader.read_u4()? as usize;
        let body = reader.read_slice(length)?;
        let mut attr = ClassReader::new(body);
        match name {
            "RuntimeVisibleAnnotations" => annotations = read_annotations(&mut attr, &pool)?,
            "InnerClasses" => inner_classes = read_inner_classes(&mut attr, &pool)?,
            _ => {}
        }
    }

    Ok(ParsedClass {
        binary_name,
        access_flags,
        super_class,
        interfaces,
        fields,
        methods,
        annotations,
        inner_classes,
    })
}

#[derive(Default)]
struct MemberAttributes {
    annotations: Vec<String>,
    exceptions: Vec<String>,
    param_names: Vec<Option<String>>,
    has_code: bool,
    has_constant: bool,
}

fn read_member_attributes(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<MemberAttributes, ClassParseError> {
    let mut out = MemberAttributes::default();
    let count = reader.read_u2()?;
    for _ in 0..count {
        let name = pool.utf8(reader.read_u2()?)?;
        let length = reader.read_u4()? as usize;
        let body = reader.read_slice(length)?;
        let mut attr = ClassReader::new(body);
        match name {
            "Code" => out.has_code = true,
            "ConstantValue" => out.has_constant = true,
            "Exceptions" => {
                let n = attr.read_u2()?;
                for _ in 0..n {
                    let index = attr.read_u2()?;
                    out.exceptions
                        .push(binary_name_to_java(&pool.class_name(index)?));
                }
            }
            "MethodParameters" => {
                let n = attr.read_u1()?;
                for _ in 0..n {
                    let name_index = attr.read_u2()?;
                    let _flags = attr.read_u2()?;
                    let name = if name_index == 0 {
                        None
                    } else {
                        Some(pool.utf8(name_index)?.to_string())
                    };
                    out.param_names.push(name);
                }
            }
            "RuntimeVisibleAnnotations" => out.annotations = read_annotations(&mut attr, pool)?,
            _ => {}
        }
    }
    Ok(out)
}

/// Annotation type names, reduced to their simple names.
fn read_annotations(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<String>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let descriptor = pool.utf8(reader.read_u2()?)?;
        let ty = parse_field_descriptor(descriptor)?;
        out.push(simple_type_name(&ty).to_string());
        skip_annotation_pairs(reader)?;
    }
    Ok(out)
}

fn skip_annotation_pairs(reader: &mut ClassReader<'_>) -> Result<(), ClassParseError> {
    let pairs = reader.read_u2()?;
    for _ in 0..pairs {
        reader.read_u2()?; // element_name_index
        skip_element_value(reader)?;
    }
    Ok(())
}

fn skip_element_value(reader: &mut ClassReader<'_>) -> Result<(), ClassParseError> {
    let tag = reader.read_u1()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            reader.skip(2)?;
        }
        b'e' => reader.skip(4)?,
        b'@' => {
            reader.read_u2()?; // type_index
            skip_annotation_pairs(reader)?;
        }
        b'[' => {
            let values = reader.read_u2()?;
            for _ in 0..values {
                skip_element_value(reader)?;
            }
        }
        other => return Err(ClassParseError::InvalidElementTag(other as char)),
    }
    Ok(())
}

fn read_inner_classes(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<InnerClassEntry>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let inner_index = reader.read_u2()?;
        let outer_index = reader.read_u2()?;
        let name_index = reader.read_u2()?;
        let flags = reader.read_u2()?;
        let inner = binary_name(&pool.class_name(inner_index)?);
        let outer = if outer_index == 0 {
            None
        } else {
            Some(binary_name(&pool.class_name(outer_index)?))
        };
        let simple_name = if name_index == 0 {
            None
        } else {
            Some(pool.utf8(name_index)?.to_string())
        };
        out.push(InnerClassEntry {
            inner,
            outer,
            simple_name,
            flags,
        });
    }
    Ok(out)
}

fn binary_name(internal: &str) -> String {
    internal.replace('/', ".")
}

/// Source-style rendering of an internal or binary class name.
pub fn binary_name_to_java(internal: &str) -> String {
    internal.replace(['/', '$'], ".")
}

fn simple_type_name(ty: &str) -> &str {
    ty.rsplit('.').next().unwrap_or(ty)
}

fn parse_field_descriptor(descriptor: &str) -> Result<String, ClassParseError> {
    let mut parser = DescriptorParser::new(descriptor);
    let ty = parser.parse_type()?;
    if parser.remaining() != 0 {
        return Err(ClassParseError::InvalidDescriptor(descriptor.to_string()));
    }
    Ok(ty)
}

fn parse_method_descriptor(descriptor: &str) -> Result<(Vec<String>, String), ClassParseError> {
    let mut parser = DescriptorParser::new(descriptor);
    parser.expect('(')?;
    let mut parameters = Vec::new();
    while !parser.peek_char(')')? {
        parameters.push(parser.parse_type()?);
    }
    parser.expect(')')?;
    let return_type = if parser.peek_char('V')? {
        parser.advance(1);
        "void".to_string()
    } else {
        parser.parse_type()?
    };
    if parser.remaining() != 0 {
        return Err(ClassParseError::InvalidDescriptor(descriptor.to_string()));
    }
    Ok((parameters, return_type))
}

enum Constant {
    Utf8(String),
    Class { name_index: u16 },
    Other,
    Unusable,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut ClassReader<'_>) -> Result<Self, ClassParseError> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);

        let mut index = 1;
        while index < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?;
                    Constant::Utf8(String::from_utf8(bytes.to_vec())?)
                }
                7 => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                5 | 6 => {
                    reader.skip(8)?;
                    entries.push(Constant::Other);
                    index += 1;
                    Constant::Unusable
                }
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                8 | 16 | 19 | 20 => {
                    reader.skip(2)?;
                    Constant::Other
                }
                15 => {
                    reader.skip(3)?;
                    Constant::Other
                }
                other => return Err(ClassParseError::UnsupportedConstant { tag: other }),
            };
            entries.push(entry);
            index += 1;
        }

        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&Constant, ClassParseError> {
        self.entries
            .get(index as usize)
            .ok_or(ClassParseError::InvalidConstantIndex { index })
    }

    fn utf8(&self, index: u16) -> Result<&str, ClassParseError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value.as_str()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    fn class_name(&self, index: u16) -> Result<String, ClassParseError> {
        match self.get(index)? {
            Constant::Class { name_index } => Ok(self.utf8(*name_index)?.to_string()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }
}

struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn expect_magic(&mut self) -> Result<(), ClassParseError> {
        if self.read_u4()? != 0xCAFE_BABE {
            return Err(ClassParseError::InvalidMagic);
        }
        Ok(())
    }

    fn read_u1(&mut self) -> Result<u8, ClassParseError> {
        let slice = self.read_slice(1)?;
        Ok(slice[0])
    }

    fn read_u2(&mut self) -> Result<u16, ClassParseError> {
        let slice = self.read_slice(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassParseError> {
        let slice = self.read_slice(4)?;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], ClassParseError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassParseError::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), ClassParseError> {
        self.read_slice(len).map(|_| ())
    }
}

struct DescriptorParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> DescriptorParser<'a> {
    fn new(descriptor: &'a str) -> Self {
        Self {
            bytes: descriptor.as_bytes(),
            pos: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn expect(&mut self, ch: char) -> Result<(), ClassParseError> {
        if !self.peek_char(ch)? {
            return Err(ClassParseError::InvalidDescriptor(format!(
                "expected '{ch}' in descriptor"
            )));
        }
        self.pos += 1;
        Ok(())
    }

    fn advance(&mut self, count: usize) {
        self.pos += count;
    }

    fn peek_char(&self, ch: char) -> Result<bool, ClassParseError> {
        match self.bytes.get(self.pos) {
            Some(byte) => Ok(*byte == ch as u8),
            None => Err(ClassParseError::InvalidDescriptor(
                "truncated descriptor".to_string(),
            )),
        }
    }

    fn parse_type(&mut self) -> Result<String, ClassParseError> {
        let Some(&start) = self.bytes.get(self.pos) else {
            return Err(ClassParseError::InvalidDescriptor(
                "truncated descriptor".to_string(),
            ));
        };
        let primitive = match start {
            b'B' => "byte",
            b'C' => "char",
            b'D' => "double",
            b'F' => "float",
            b'I' => "int",
            b'J' => "long",
            b'S' => "short",
            b'Z' => "boolean",
            b'L' => return self.parse_reference_type(),
            b'[' => {
                self.pos += 1;
                let element = self.parse_type()?;
                return Ok(format!("{element}[]"));
            }
            other => {
                return Err(ClassParseError::InvalidDescriptor(format!(
                    "unexpected descriptor tag '{}'",
                    other as char
                )));
            }
        };
        self.pos += 1;
        Ok(primitive.to_string())
    }

    fn parse_reference_type(&mut self) -> Result<String, ClassParseError> {
        self.expect('L')?;
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b';' {
            self.pos += 1;
        }
        if self.pos >= self.bytes.len() {
            return Err(ClassParseError::InvalidDescriptor(
                "unterminated reference descriptor".into(),
            ));
        }
        let name = String::from_utf8(self.bytes[start..self.pos].to_vec())?;
        self.pos += 1; // consume ';'
        Ok(binary_name_to_java(&name))
    }
}

/// Hand-assembled class files for tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    pub struct MethodSpec<'a> {
        pub flags: u16,
        pub name: &'a str,
        pub descriptor: &'a str,
        pub code: bool,
        pub exceptions: &'a [&'a str],
        pub param_names: &'a [&'a str],
        pub annotations: &'a [&'a str],
    }

    impl<'a> MethodSpec<'a> {
        pub fn new(flags: u16, name: &'a str, descriptor: &'a str) -> Self {
            Self {
                flags,
                name,
                descriptor,
                code: true,
                exceptions: &[],
                param_names: &[],
                annotations: &[],
            }
        }
    }

    pub struct ClassBuilder {
        pool: Vec<Vec<u8>>,
        utf8_slots: HashMap<String, u16>,
        class_slots: HashMap<String, u16>,
        flags: u16,
        this_class: u16,
        super_class: u16,
        interfaces: Vec<u16>,
        fields: Vec<Vec<u8>>,
        methods: Vec<Vec<u8>>,
        attributes: Vec<Vec<u8>>,
        inner: Vec<[u16; 4]>,
    }

    impl ClassBuilder {
        /// `name` and `super_name` are internal names (`com/acme/Widget`).
        pub fn new(flags: u16, name: &str, super_name: Option<&str>) -> Self {
            let mut builder = Self {
                pool: Vec::new(),
                utf8_slots: HashMap::new(),
                class_slots: HashMap::new(),
                flags,
                this_class: 0,
                super_class: 0,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                attributes: Vec::new(),
                inner: Vec::new(),
            };
            builder.this_class = builder.class(name);
            if let Some(super_name) = super_name {
                builder.super_class = builder.class(super_name);
            }
            builder
        }

        fn push(&mut self, entry: Vec<u8>) -> u16 {
            self.pool.push(entry);
            self.pool.len() as u16
        }

        pub fn utf8(&mut self, value: &str) -> u16 {
            if let Some(slot) = self.utf8_slots.get(value) {
                return *slot;
            }
            let mut entry = vec![1u8];
            entry.extend_from_slice(&(value.len() as u16).to_be_bytes());
            entry.extend_from_slice(value.as_bytes());
            let slot = self.push(entry);
            self.utf8_slots.insert(value.to_string(), slot);
            slot
        }

        pub fn class(&mut self, internal: &str) -> u16 {
            if let Some(slot) = self.class_slots.get(internal) {
                return *slot;
            }
            let name = self.utf8(internal);
            let mut entry = vec![7u8];
            entry.extend_from_slice(&name.to_be_bytes());
            let slot = self.push(entry);
            self.class_slots.insert(internal.to_string(), slot);
            slot
        }

        pub fn interface(mut self, internal: &str) -> Self {
            let slot = self.class(internal);
            self.interfaces.push(slot);
            self
        }

        pub fn annotation(mut self, descriptor: &str) -> Self {
            let body = self.annotations_body(&[descriptor]);
            let attr = self.attribute("RuntimeVisibleAnnotations", body);
            self.attributes.push(attr);
            self
        }

        pub fn field(mut self, flags: u16, name: &str, descriptor: &str, constant: bool) -> Self {
            let mut out = Vec::new();
            out.extend_from_slice(&flags.to_be_bytes());
            out.extend_from_slice(&self.utf8(name).to_be_bytes());
            out.extend_from_slice(&self.utf8(descriptor).to_be_bytes());
            if constant {
                out.extend_from_slice(&1u16.to_be_bytes());
                // points at the name slot; only presence is read
                let value = self.utf8(name).to_be_bytes().to_vec();
                out.extend(self.attribute("ConstantValue", value));
            } else {
                out.extend_from_slice(&0u16.to_be_bytes());
            }
            self.fields.push(out);
            self
        }

        pub fn method(mut self, spec: MethodSpec<'_>) -> Self {
            let mut attrs = Vec::new();
            if spec.code {
                attrs.push(self.attribute("Code", vec![0; 12]));
            }
            if !spec.exceptions.is_empty() {
                let mut body = (spec.exceptions.len() as u16).to_be_bytes().to_vec();
                for name in spec.exceptions {
                    body.extend_from_slice(&self.class(name).to_be_bytes());
                }
                attrs.push(self.attribute("Exceptions", body));
            }
            if !spec.param_names.is_empty() {
                let mut body = vec![spec.param_names.len() as u8];
                for name in spec.param_names {
                    body.extend_from_slice(&self.utf8(name).to_be_bytes());
                    body.extend_from_slice(&0u16.to_be_bytes());
                }
                attrs.push(self.attribute("MethodParameters", body));
            }
            if !spec.annotations.is_empty() {
                let body = self.annotations_body(spec.annotations);
                attrs.push(self.attribute("RuntimeVisibleAnnotations", body));
            }
            let mut out = Vec::new();
            out.extend_from_slice(&spec.flags.to_be_bytes());
            out.extend_from_slice(&self.utf8(spec.name).to_be_bytes());
            out.extend_from_slice(&self.utf8(spec.descriptor).to_be_bytes());
            out.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
            for attr in attrs {
                out.extend(attr);
            }
            self.methods.push(out);
            self
        }

        pub fn inner_class(mut self, inner: &str, outer: &str, simple: &str, flags: u16) -> Self {
            let entry = [self.class(inner), self.class(outer), self.utf8(simple), flags];
            self.inner.push(entry);
            self
        }

        fn annotations_body(&mut self, descriptors: &[&str]) -> Vec<u8> {
            let mut body = (descriptors.len() as u16).to_be_bytes().to_vec();
            for descriptor in descriptors {
                body.extend_from_slice(&self.utf8(descriptor).to_be_bytes());
                // one element: value = "x"
                body.extend_from_slice(&1u16.to_be_bytes());
                body.extend_from_slice(&self.utf8("value").to_be_bytes());
                body.push(b's');
                body.extend_from_slice(&self.utf8("x").to_be_bytes());
            }
            body
        }

        fn attribute(&mut self, name: &str, body: Vec<u8>) -> Vec<u8> {
            let mut out = self.utf8(name).to_be_bytes().to_vec();
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend(body);
            out
        }

        pub fn build(mut self) -> Vec<u8> {
            if !self.inner.is_empty() {
                let mut body = (self.inner.len() as u16).to_be_bytes().to_vec();
                for entry in &self.inner {
                    for value in entry {
                        body.extend_from_slice(&value.to_be_bytes());
                    }
                }
                let attr = self.attribute("InnerClasses", body);
                self.attributes.push(attr);
            }
            let mut out = 0xCAFE_BABEu32.to_be_bytes().to_vec();
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&61u16.to_be_bytes());
            out.extend_from_slice(&(self.pool.len() as u16 + 1).to_be_bytes());
            for entry in &self.pool {
                out.extend_from_slice(entry);
            }
            out.extend_from_slice(&self.flags.to_be_bytes());
            out.extend_from_slice(&self.this_class.to_be_bytes());
            out.extend_from_slice(&self.super_class.to_be_bytes());
            out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
            for slot in &self.interfaces {
                out.extend_from_slice(&slot.to_be_bytes());
            }
            out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
            for field in &self.fields {
                out.extend_from_slice(field);
            }
            out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
            for method in &self.methods {
                out.extend_from_slice(method);
            }
            out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
            for attr in &self.attributes {
                out.extend_from_slice(attr);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ClassBuilder, MethodSpec};
    use super::*;

    fn widget_bytes() -> Vec<u8> {
        ClassBuilder::new(ACC_PUBLIC | 0x0020, "com/acme/Widget", Some("com/acme/Base"))
            .interface("java/lang/Runnable")
            .annotation("Ljava/lang/Deprecated;")
            .field(ACC_PRIVATE | ACC_FINAL, "count", "I", false)
            .field(ACC_PUBLIC | ACC_STATIC | ACC_FINAL, "NAME", "Ljava/lang/String;", true)
            .field(ACC_PRIVATE | ACC_STATIC | ACC_SYNTHETIC, "$assertions", "Z", false)
            .method(MethodSpec {
                param_names: &["count"],
                ..MethodSpec::new(ACC_PUBLIC, "<init>", "(I)V")
            })
            .method(MethodSpec {
                exceptions: &["java/io/IOException"],
                annotations: &["Ljava/lang/Override;"],
                ..MethodSpec::new(ACC_PUBLIC, "run", "()V")
            })
            .method(MethodSpec::new(
                ACC_PUBLIC | ACC_VARARGS,
                "join",
                "([Ljava/lang/String;)[Ljava/util/Map$Entry;",
            ))
            .method(MethodSpec::new(ACC_STATIC, "<clinit>", "()V"))
            .method(MethodSpec::new(
                ACC_PUBLIC | ACC_BRIDGE | ACC_SYNTHETIC,
                "compareTo",
                "(Ljava/lang/Object;)I",
            ))
            .inner_class("com/acme/Widget$Part", "com/acme/Widget", "Part", ACC_PUBLIC | ACC_STATIC)
            .build()
    }

    #[test]
    fn parses_hierarchy_members_and_attributes() {
        let parsed = parse_class(&widget_bytes()).unwrap();
        assert_eq!(parsed.binary_name, "com.acme.Widget");
        assert_eq!(parsed.super_class.as_deref(), Some("com.acme.Base"));
        assert_eq!(parsed.interfaces, vec!["java.lang.Runnable"]);
        assert_eq!(parsed.annotations, vec!["Deprecated"]);

        let names: Vec<&str> = parsed.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["count", "NAME"]);
        assert_eq!(parsed.fields[1].ty, "java.lang.String");
        assert!(parsed.fields[1].has_constant);
        assert!(!parsed.fields[0].has_constant);

        let names: Vec<&str> = parsed.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["<init>", "run", "join"]);
        assert!(parsed.methods[0].is_constructor());
        assert_eq!(parsed.methods[0].params, vec![("count".to_string(), "int".to_string())]);
        assert_eq!(parsed.methods[1].exceptions, vec!["java.io.IOException"]);
        assert_eq!(parsed.methods[1].annotations, vec!["Override"]);
        assert_eq!(parsed.methods[2].return_type, "java.util.Map.Entry[]");
        assert_eq!(
            parsed.methods[2].params,
            vec![("arg0".to_string(), "java.lang.String...".to_string())]
        );

        assert_eq!(
            parsed.member_types(),
            vec![("com.acme.Widget$Part".to_string(), "Part".to_string())]
        );
    }

    #[test]
    fn class_flags_ignore_super_bit() {
        let parsed = parse_class(&widget_bytes()).unwrap();
        let mods = modifiers_from_flags(parsed.declared_flags());
        assert_eq!(mods.into_iter().collect::<Vec<_>>(), vec![Modifier::Public]);
    }

    #[test]
    fn nested_class_uses_inner_class_flags() {
        let bytes = ClassBuilder::new(ACC_PUBLIC | 0x0020, "com/acme/Widget$Part", Some("java/lang/Object"))
            .inner_class(
                "com/acme/Widget$Part",
                "com/acme/Widget",
                "Part",
                ACC_PRIVATE | ACC_STATIC,
            )
            .build();
        let parsed = parse_class(&bytes).unwrap();
        let mods = modifiers_from_flags(parsed.declared_flags());
        assert!(mods.contains(&Modifier::Private));
        assert!(mods.contains(&Modifier::Static));
        assert!(!mods.contains(&Modifier::Public));
        assert!(parsed.member_types().is_empty());
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(
            parse_class(&[0, 0, 0, 0]),
            Err(ClassParseError::InvalidMagic)
        ));
        let bytes = widget_bytes();
        assert!(matches!(
            parse_class(&bytes[..bytes.len() / 2]),
            Err(ClassParseError::UnexpectedEof)
        ));
    }

    #[test]
    fn method_descriptor_renders_java_types() {
        let (params, ret) = parse_method_descriptor("(J[[DLjava/util/List;)Z").unwrap();
        assert_eq!(params, vec!["long", "double[][]", "java.util.List"]);
        assert_eq!(ret, "boolean");
        assert!(parse_method_descriptor("(I").is_err());
    }
}
