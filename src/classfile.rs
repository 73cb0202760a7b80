//! Class-file decoder.
//!
//! Decodes one class binary into a [`ClassFile`] declaration record, then
//! [`ClassFile::references`] enumerates every symbol the binary names together
//! with the declaration that names it. Bytecode is walked but never verified.
//! Attributes this reader does not know are skipped.

use crate::error::DecodeError;
use crate::signature;
use crate::symbol;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;

const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    /// Public or protected: the only declarations that form an API surface.
    pub fn is_visible(self) -> bool {
        self.0 & (ACC_PUBLIC | ACC_PROTECTED) != 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassFile {
    pub access: AccessFlags,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub annotations: Vec<String>,
    pub deprecated: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub inner_classes: Vec<InnerClass>,
    pub enclosing_method: Option<EnclosingMethod>,
}

#[derive(Debug, Clone, Default)]
pub struct FieldDecl {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub annotations: Vec<String>,
    pub deprecated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MethodDecl {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub exceptions: Vec<String>,
    pub annotations: Vec<String>,
    pub deprecated: bool,
    pub code: Vec<CodeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub name: String,
    pub outer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclosingMethod {
    pub owner: String,
    pub name: Option<String>,
    pub descriptor: Option<String>,
}

/// A symbol named inside a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeRef {
    Field {
        owner: String,
        name: String,
        descriptor: String,
    },
    Method {
        owner: String,
        name: String,
        descriptor: String,
    },
    /// `new`, `checkcast`, `instanceof`, `anewarray`, `multianewarray`, `ldc` of a class.
    Type(String),
    CatchType(String),
    LocalVariable {
        name: String,
        descriptor: String,
        signature: Option<String>,
    },
}

/// The declaration a reference occurs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Site {
    Class(String),
    Method {
        owner: String,
        name: String,
        descriptor: String,
    },
    Field { owner: String, name: String },
}

impl Site {
    pub fn key(&self) -> String {
        match self {
            Self::Class(name) => symbol::class_key(name),
            Self::Method {
                owner,
                name,
                descriptor,
            } => symbol::method_key(owner, name, descriptor),
            Self::Field { owner, name } => symbol::field_key(owner, name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Class(String),
    Method {
        owner: String,
        name: String,
        descriptor: String,
    },
    Field {
        owner: String,
        name: String,
        descriptor: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Superclass,
    Interface,
    Annotation,
    Exception,
    Signature,
    Descriptor,
    Instruction,
    CatchType,
    LocalVariable,
    OuterClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub site: Site,
    pub target: Target,
    pub kind: RefKind,
}

pub fn decode(bytes: &[u8]) -> Result<ClassFile, DecodeError> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != MAGIC {
        return Err(DecodeError::InvalidMagic(magic));
    }
    let _minor_version = reader.read_u2()?;
    let _major_version = reader.read_u2()?;
    let pool = ConstantPool::parse(&mut reader)?;

    let mut class = ClassFile {
        access: AccessFlags(reader.read_u2()?),
        ..ClassFile::default()
    };
    class.name = pool.class_name(reader.read_u2()?)?.to_string();
    let super_index = reader.read_u2()?;
    if super_index != 0 {
        class.super_name = Some(pool.class_name(super_index)?.to_string());
    }
    let interfaces_count = reader.read_u2()?;
    for _ in 0..interfaces_count {
        class.interfaces.push(pool.class_name(reader.read_u2()?)?.to_string());
    }

    let fields_count = reader.read_u2()?;
    for _ in 0..fields_count {
        class.fields.push(decode_field(&mut reader, &pool)?);
    }
    let methods_count = reader.read_u2()?;
    let mut pending = Vec::with_capacity(methods_count as usize);
    for _ in 0..methods_count {
        let (method, bootstraps) = decode_method(&mut reader, &pool)?;
        class.methods.push(method);
        pending.push(bootstraps);
    }
    let mut bootstrap_methods = Vec::new();

    let attributes_count = reader.read_u2()?;
    for _ in 0..attributes_count {
        let (name, body) = read_attribute(&mut reader, &pool)?;
        let mut sub = ByteReader::new(body);
        match name {
            "Signature" => class.signature = Some(pool.utf8(sub.read_u2()?)?.to_string()),
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                class.annotations.extend(read_annotations(&mut sub, &pool)?);
            }
            "Deprecated" => class.deprecated = true,
            "InnerClasses" => {
                let count = sub.read_u2()?;
                for _ in 0..count {
                    let inner_index = sub.read_u2()?;
                    let outer_index = sub.read_u2()?;
                    sub.skip(4)?; // inner_name_index, inner_class_access_flags
                    class.inner_classes.push(InnerClass {
                        name: pool.class_name(inner_index)?.to_string(),
                        outer: optional(outer_index, |i| pool.class_name(i))?,
                    });
                }
            }
            "EnclosingMethod" => {
                let owner = pool.class_name(sub.read_u2()?)?.to_string();
                let nat_index = sub.read_u2()?;
                let (name, descriptor) = if nat_index == 0 {
                    (None, None)
                } else {
                    let (n, d) = pool.name_and_type(nat_index)?;
                    (Some(n.to_string()), Some(d.to_string()))
                };
                class.enclosing_method = Some(EnclosingMethod {
                    owner,
                    name,
                    descriptor,
                });
            }
            "BootstrapMethods" => bootstrap_methods = read_bootstrap_methods(&mut sub, &pool)?,
            _ => {}
        }
    }

    // invokedynamic and dynamic constants name their targets through the
    // class-level BootstrapMethods table, which follows the methods.
    for (method, bootstraps) in class.methods.iter_mut().zip(pending) {
        for index in bootstraps {
            let refs: &Vec<CodeRef> = bootstrap_methods
                .get(index as usize)
                .ok_or(DecodeError::InvalidConstantIndex { index })?;
            method.code.extend(refs.iter().cloned());
        }
    }

    Ok(class)
}

/// Method handles named by each bootstrap entry: the bootstrap method itself
/// and any handle or class among its static arguments.
fn read_bootstrap_methods(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Vec<CodeRef>>, DecodeError> {
    let count = reader.read_u2()?;
    let mut table = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut refs = vec![pool.method_handle(reader.read_u2()?)?];
        let arguments = reader.read_u2()?;
        for _ in 0..arguments {
            let index = reader.read_u2()?;
            match pool.get(index)? {
                Constant::MethodHandle { .. } => refs.push(pool.method_handle(index)?),
                Constant::Class { name_index } => refs.push(CodeRef::Type(pool.utf8(*name_index)?.to_string())),
                _ => {}
            }
        }
        table.push(refs);
    }
    Ok(table)
}

fn optional<'p>(
    index: u16,
    resolve: impl FnOnce(u16) -> Result<&'p str, DecodeError>,
) -> Result<Option<String>, DecodeError> {
    if index == 0 {
        return Ok(None);
    }
    resolve(index).map(|s| Some(s.to_string()))
}

fn decode_field(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<FieldDecl, DecodeError> {
    let mut field = FieldDecl {
        access: AccessFlags(reader.read_u2()?),
        name: pool.utf8(reader.read_u2()?)?.to_string(),
        descriptor: pool.utf8(reader.read_u2()?)?.to_string(),
        ..FieldDecl::default()
    };
    let attributes_count = reader.read_u2()?;
    for _ in 0..attributes_count {
        let (name, body) = read_attribute(reader, pool)?;
        let mut sub = ByteReader::new(body);
        match name {
            "Signature" => field.signature = Some(pool.utf8(sub.read_u2()?)?.to_string()),
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                field.annotations.extend(read_annotations(&mut sub, pool)?);
            }
            "Deprecated" => field.deprecated = true,
            _ => {}
        }
    }
    Ok(field)
}

/// Also returns the bootstrap indexes the method body uses, resolved once the
/// class attributes have been read.
fn decode_method(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<(MethodDecl, Vec<u16>), DecodeError> {
    let mut method = MethodDecl {
        access: AccessFlags(reader.read_u2()?),
        name: pool.utf8(reader.read_u2()?)?.to_string(),
        descriptor: pool.utf8(reader.read_u2()?)?.to_string(),
        ..MethodDecl::default()
    };
    let mut bootstraps = Vec::new();
    let attributes_count = reader.read_u2()?;
    for _ in 0..attributes_count {
        let (name, body) = read_attribute(reader, pool)?;
        let mut sub = ByteReader::new(body);
        match name {
            "Code" => {
                let body = decode_code(&mut sub, pool)?;
                method.code = body.refs;
                bootstraps = body.bootstraps;
            }
            "Exceptions" => {
                let count = sub.read_u2()?;
                for _ in 0..count {
                    method
                        .exceptions
                        .push(pool.class_name(sub.read_u2()?)?.to_string());
                }
            }
            "Signature" => method.signature = Some(pool.utf8(sub.read_u2()?)?.to_string()),
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                method.annotations.extend(read_annotations(&mut sub, pool)?);
            }
            "Deprecated" => method.deprecated = true,
            _ => {}
        }
    }
    Ok((method, bootstraps))
}

/// The name borrows from the pool, the body from the class bytes.
fn read_attribute<'a, 'p>(
    reader: &mut ByteReader<'a>,
    pool: &'p ConstantPool,
) -> Result<(&'p str, &'a [u8]), DecodeError> {
    let name = pool.utf8(reader.read_u2()?)?;
    let length = reader.read_u4()? as usize;
    Ok((name, reader.read_slice(length)?))
}

/// Returns the type descriptor of each annotation; element values are skipped.
fn read_annotations(
    reader: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<String>, DecodeError> {
    let count = reader.read_u2()?;
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        types.push(read_annotation(reader, pool)?);
    }
    Ok(types)
}

fn read_annotation(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<String, DecodeError> {
    let type_name = pool.utf8(reader.read_u2()?)?.to_string();
    let pairs = reader.read_u2()?;
    for _ in 0..pairs {
        reader.read_u2()?; // element_name_index
        skip_element_value(reader, pool)?;
    }
    Ok(type_name)
}

fn skip_element_value(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<(), DecodeError> {
    let tag = reader.read_u1()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            reader.read_u2()?;
        }
        b'e' => {
            reader.read_u2()?;
            reader.read_u2()?;
        }
        b'@' => {
            read_annotation(reader, pool)?;
        }
        b'[' => {
            let count = reader.read_u2()?;
            for _ in 0..count {
                skip_element_value(reader, pool)?;
            }
        }
        other => return Err(DecodeError::InvalidElementValue(other as char)),
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MethodBody {
    refs: Vec<CodeRef>,
    /// Indexes into the BootstrapMethods table.
    bootstraps: Vec<u16>,
}

fn decode_code(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<MethodBody, DecodeError> {
    let _max_stack = reader.read_u2()?;
    let _max_locals = reader.read_u2()?;
    let code_length = reader.read_u4()? as usize;
    let code = reader.read_slice(code_length)?;
    let mut body = walk_bytecode(code, pool)?;
    let refs = &mut body.refs;

    let exception_table_length = reader.read_u2()?;
    for _ in 0..exception_table_length {
        reader.skip(6)?; // start_pc, end_pc, handler_pc
        let catch_type = reader.read_u2()?;
        if catch_type != 0 {
            refs.push(CodeRef::CatchType(pool.class_name(catch_type)?.to_string()));
        }
    }

    let attributes_count = reader.read_u2()?;
    for _ in 0..attributes_count {
        let (name, body) = read_attribute(reader, pool)?;
        let mut sub = ByteReader::new(body);
        match name {
            "LocalVariableTable" => {
                let count = sub.read_u2()?;
                for _ in 0..count {
                    sub.skip(4)?; // start_pc, length
                    let name = pool.utf8(sub.read_u2()?)?.to_string();
                    let descriptor = pool.utf8(sub.read_u2()?)?.to_string();
                    sub.read_u2()?; // index
                    refs.push(CodeRef::LocalVariable {
                        name,
                        descriptor,
                        signature: None,
                    });
                }
            }
            "LocalVariableTypeTable" => {
                let count = sub.read_u2()?;
                for _ in 0..count {
                    sub.skip(4)?;
                    let name = pool.utf8(sub.read_u2()?)?.to_string();
                    let signature = pool.utf8(sub.read_u2()?)?.to_string();
                    sub.read_u2()?;
                    refs.push(CodeRef::LocalVariable {
                        name,
                        descriptor: String::new(),
                        signature: Some(signature),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(body)
}

fn walk_bytecode(code: &[u8], pool: &ConstantPool) -> Result<MethodBody, DecodeError> {
    let mut body = MethodBody::default();
    let refs = &mut body.refs;
    let mut reader = ByteReader::new(code);

    while reader.pos < code.len() {
        let pc = reader.pos;
        let opcode = reader.read_u1()?;
        match opcode {
            0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe
            | 0xbf | 0xc2 | 0xc3 | 0xca | 0xfe | 0xff => {}
            0x10 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => reader.skip(1)?,
            0x11 | 0x84 | 0x99..=0xa8 | 0xc6 | 0xc7 => reader.skip(2)?,
            0x12 => {
                let index = reader.read_u1()? as u16;
                push_ldc(refs, &mut body.bootstraps, pool, index)?;
            }
            0x13 | 0x14 => {
                let index = reader.read_u2()?;
                push_ldc(refs, &mut body.bootstraps, pool, index)?;
            }
            0xb2..=0xb5 => {
                let (owner, name, descriptor) = pool.member_ref(reader.read_u2()?)?;
                refs.push(CodeRef::Field {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                });
            }
            0xb6..=0xb9 => {
                let (owner, name, descriptor) = pool.member_ref(reader.read_u2()?)?;
                if opcode == 0xb9 {
                    reader.skip(2)?; // count, 0
                }
                refs.push(CodeRef::Method {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                });
            }
            0xba => {
                let index = reader.read_u2()?;
                reader.skip(2)?; // 0, 0
                match pool.get(index)? {
                    Constant::Dynamic { bootstrap_index } => body.bootstraps.push(*bootstrap_index),
                    _ => return Err(DecodeError::InvalidConstantIndex { index }),
                }
            }
            0xbb | 0xbd | 0xc0 | 0xc1 => {
                refs.push(CodeRef::Type(pool.class_name(reader.read_u2()?)?.to_string()));
            }
            0xc5 => {
                refs.push(CodeRef::Type(pool.class_name(reader.read_u2()?)?.to_string()));
                reader.skip(1)?;
            }
            0xc8 | 0xc9 => reader.skip(4)?,
            0xc4 => {
                let widened = reader.read_u1()?;
                reader.skip(if widened == 0x84 { 4 } else { 2 })?;
            }
            0xaa => {
                skip_switch_padding(&mut reader, pc)?;
                reader.skip(4)?; // default
                let low = reader.read_u4()? as i32;
                let high = reader.read_u4()? as i32;
                if high < low {
                    return Err(DecodeError::InvalidOpcode { opcode, offset: pc });
                }
                let entries = (i64::from(high) - i64::from(low) + 1) as usize;
                reader.skip(entries * 4)?;
            }
            0xab => {
                skip_switch_padding(&mut reader, pc)?;
                reader.skip(4)?; // default
                let pairs = reader.read_u4()? as usize;
                reader.skip(pairs * 8)?;
            }
            other => {
                return Err(DecodeError::InvalidOpcode {
                    opcode: other,
                    offset: pc,
                });
            }
        }
    }
    Ok(body)
}

fn skip_switch_padding(reader: &mut ByteReader<'_>, pc: usize) -> Result<(), DecodeError> {
    let padding = (4 - (pc + 1) % 4) % 4;
    reader.skip(padding)
}

fn push_ldc(
    refs: &mut Vec<CodeRef>,
    bootstraps: &mut Vec<u16>,
    pool: &ConstantPool,
    index: u16,
) -> Result<(), DecodeError> {
    match pool.get(index)? {
        Constant::Class { name_index } => refs.push(CodeRef::Type(pool.utf8(*name_index)?.to_string())),
        Constant::MethodHandle { .. } => refs.push(pool.method_handle(index)?),
        Constant::Dynamic { bootstrap_index } => bootstraps.push(*bootstrap_index),
        _ => {}
    }
    Ok(())
}

impl ClassFile {
    pub fn is_visible(&self) -> bool {
        self.access.is_visible()
    }

    /// Every symbol this class names, in declaration order.
    pub fn references(&self) -> Result<Vec<Reference>, DecodeError> {
        let mut out = Vec::new();
        let this = Site::Class(self.name.clone());

        if let Some(super_name) = &self.super_name {
            push_class(&mut out, &this, super_name, RefKind::Superclass);
        }
        for interface in &self.interfaces {
            push_class(&mut out, &this, interface, RefKind::Interface);
        }
        for annotation in &self.annotations {
            push_descriptor(&mut out, &this, annotation, RefKind::Annotation)?;
        }
        if let Some(sig) = &self.signature {
            push_signature(&mut out, &this, sig)?;
        }
        if let Some(enclosing) = &self.enclosing_method {
            push_class(&mut out, &this, &enclosing.owner, RefKind::OuterClass);
        }
        for inner in &self.inner_classes {
            if inner.name == self.name
                && let Some(outer) = &inner.outer
            {
                push_class(&mut out, &this, outer, RefKind::OuterClass);
            }
        }

        for field in &self.fields {
            let site = Site::Field {
                owner: self.name.clone(),
                name: field.name.clone(),
            };
            push_descriptor(&mut out, &site, &field.descriptor, RefKind::Descriptor)?;
            if let Some(sig) = &field.signature {
                push_signature(&mut out, &site, sig)?;
            }
            for annotation in &field.annotations {
                push_descriptor(&mut out, &site, annotation, RefKind::Annotation)?;
            }
        }

        for method in &self.methods {
            let site = Site::Method {
                owner: self.name.clone(),
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            };
            push_descriptor(&mut out, &site, &method.descriptor, RefKind::Descriptor)?;
            if let Some(sig) = &method.signature {
                push_signature(&mut out, &site, sig)?;
            }
            for exception in &method.exceptions {
                push_class(&mut out, &site, exception, RefKind::Exception);
            }
            for annotation in &method.annotations {
                push_descriptor(&mut out, &site, annotation, RefKind::Annotation)?;
            }
            for code_ref in &method.code {
                match code_ref {
                    CodeRef::Field {
                        owner,
                        name,
                        descriptor,
                    } => out.push(Reference {
                        site: site.clone(),
                        target: Target::Field {
                            owner: symbol::class_key(owner),
                            name: name.clone(),
                            descriptor: descriptor.clone(),
                        },
                        kind: RefKind::Instruction,
                    }),
                    CodeRef::Method {
                        owner,
                        name,
                        descriptor,
                    } => out.push(Reference {
                        site: site.clone(),
                        target: Target::Method {
                            owner: symbol::class_key(owner),
                            name: name.clone(),
                            descriptor: descriptor.clone(),
                        },
                        kind: RefKind::Instruction,
                    }),
                    CodeRef::Type(name) => push_class(&mut out, &site, name, RefKind::Instruction),
                    CodeRef::CatchType(name) => push_class(&mut out, &site, name, RefKind::CatchType),
                    CodeRef::LocalVariable {
                        descriptor,
                        signature,
                        ..
                    } => {
                        if !descriptor.is_empty() {
                            push_descriptor(&mut out, &site, descriptor, RefKind::LocalVariable)?;
                        }
                        if let Some(sig) = signature {
                            for found in signature::parse(sig)? {
                                push_class(&mut out, &site, found.name(), RefKind::LocalVariable);
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn push_class(out: &mut Vec<Reference>, site: &Site, name: &str, kind: RefKind) {
    out.push(Reference {
        site: site.clone(),
        target: Target::Class(symbol::class_key(name)),
        kind,
    });
}

fn push_descriptor(
    out: &mut Vec<Reference>,
    site: &Site,
    descriptor: &str,
    kind: RefKind,
) -> Result<(), DecodeError> {
    for name in signature::descriptor_classes(descriptor)? {
        push_class(out, site, &name, kind);
    }
    Ok(())
}

fn push_signature(out: &mut Vec<Reference>, site: &Site, sig: &str) -> Result<(), DecodeError> {
    for found in signature::parse(sig)? {
        push_class(out, site, found.name(), RefKind::Signature);
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class { name_index: u16 },
    MemberRef { class_index: u16, nat_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { kind: u8, reference_index: u16 },
    /// `CONSTANT_Dynamic` and `CONSTANT_InvokeDynamic`.
    Dynamic { bootstrap_index: u16 },
    Other,
    Unusable,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable); // index 0 unused

        let mut index = 1;
        while index < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let length = reader.read_u2()? as usize;
                    Constant::Utf8(decode_modified_utf8(reader.read_slice(length)?))
                }
                3 | 4 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                5 | 6 => {
                    reader.skip(8)?;
                    entries.push(Constant::Other);
                    index += 1;
                    Constant::Unusable
                }
                7 => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                8 | 16 | 19 | 20 => {
                    reader.read_u2()?;
                    Constant::Other
                }
                9..=11 => Constant::MemberRef {
                    class_index: reader.read_u2()?,
                    nat_index: reader.read_u2()?,
                },
                12 => Constant::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                15 => Constant::MethodHandle {
                    kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                17 | 18 => {
                    let bootstrap_index = reader.read_u2()?;
                    reader.read_u2()?; // name_and_type_index
                    Constant::Dynamic { bootstrap_index }
                }
                other => return Err(DecodeError::UnsupportedConstant { tag: other }),
            };
            entries.push(entry);
            index += 1;
        }
        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&Constant, DecodeError> {
        self.entries
            .get(index as usize)
            .ok_or(DecodeError::InvalidConstantIndex { index })
    }

    fn utf8(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value.as_str()),
            _ => Err(DecodeError::InvalidConstantIndex { index }),
        }
    }

    fn class_name(&self, index: u16) -> Result<&str, DecodeError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(DecodeError::InvalidConstantIndex { index }),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&str, &str), DecodeError> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(DecodeError::InvalidConstantIndex { index }),
        }
    }

    fn member_ref(&self, index: u16) -> Result<(&str, &str, &str), DecodeError> {
        match self.get(index)? {
            Constant::MemberRef {
                class_index,
                nat_index,
            } => {
                let (name, descriptor) = self.name_and_type(*nat_index)?;
                Ok((self.class_name(*class_index)?, name, descriptor))
            }
            _ => Err(DecodeError::InvalidConstantIndex { index }),
        }
    }

    /// Reference kinds 1-4 address fields, 5-9 methods.
    fn method_handle(&self, index: u16) -> Result<CodeRef, DecodeError> {
        let Constant::MethodHandle {
            kind,
            reference_index,
        } = self.get(index)?
        else {
            return Err(DecodeError::InvalidConstantIndex { index });
        };
        let (owner, name, descriptor) = self.member_ref(*reference_index)?;
        let (owner, name, descriptor) = (owner.to_string(), name.to_string(), descriptor.to_string());
        match kind {
            1..=4 => Ok(CodeRef::Field {
                owner,
                name,
                descriptor,
            }),
            5..=9 => Ok(CodeRef::Method {
                owner,
                name,
                descriptor,
            }),
            _ => Err(DecodeError::InvalidConstantIndex { index }),
        }
    }
}

/// Class files use modified UTF-8; names that are not plain UTF-8 are decoded lossily.
fn decode_modified_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_u1(&mut self) -> Result<u8, DecodeError> {
        let value = *self.data.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    fn read_u2(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.read_slice(len).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use crate::classgen::{ClassBuilder, Insn};
    use super::*;

    #[test]
    fn decodes_declarations_and_annotations() {
        let bytes = ClassBuilder::new("hudson/model/Api")
            .annotated("Ljava/lang/Deprecated;")
            .field(ACC_PUBLIC, "count", "I", &["Ljava/lang/Deprecated;"])
            .field(ACC_PRIVATE, "secret", "Ljava/lang/String;", &[])
            .method(ACC_PUBLIC | ACC_STATIC, "m", "()V", &["Ljava/lang/Deprecated;"], vec![])
            .build();

        let class = decode(&bytes).unwrap();
        assert_eq!(class.name, "hudson/model/Api");
        assert_eq!(class.super_name.as_deref(), Some("java/lang/Object"));
        assert!(class.is_visible());
        assert_eq!(class.annotations, vec!["Ljava/lang/Deprecated;"]);
        assert_eq!(class.fields.len(), 2);
        assert!(class.fields[0].access.is_visible());
        assert!(!class.fields[1].access.is_visible());
        assert_eq!(class.methods[0].name, "m");
        assert_eq!(class.methods[0].annotations, vec!["Ljava/lang/Deprecated;"]);
    }

    #[test]
    fn references_cover_hierarchy_and_bytecode() {
        let bytes = ClassBuilder::new("org/acme/Consumer")
            .extends("hudson/model/Base")
            .implements("hudson/model/Iface")
            .method(
                ACC_PUBLIC,
                "run",
                "()V",
                &[],
                vec![
                    Insn::Invoke("hudson/model/Api", "m", "()V"),
                    Insn::GetField("hudson/model/Api", "count", "I"),
                    Insn::New("hudson/model/Thing"),
                ],
            )
            .throws("hudson/AbortException")
            .build();

        let refs = decode(&bytes).unwrap().references().unwrap();
        let run = Site::Method {
            owner: "org/acme/Consumer".to_string(),
            name: "run".to_string(),
            descriptor: "()V".to_string(),
        };

        assert!(refs.contains(&Reference {
            site: Site::Class("org/acme/Consumer".to_string()),
            target: Target::Class("hudson/model/Base".to_string()),
            kind: RefKind::Superclass,
        }));
        assert!(refs.contains(&Reference {
            site: Site::Class("org/acme/Consumer".to_string()),
            target: Target::Class("hudson/model/Iface".to_string()),
            kind: RefKind::Interface,
        }));
        assert!(refs.contains(&Reference {
            site: run.clone(),
            target: Target::Method {
                owner: "hudson/model/Api".to_string(),
                name: "m".to_string(),
                descriptor: "()V".to_string(),
            },
            kind: RefKind::Instruction,
        }));
        assert!(refs.contains(&Reference {
            site: run.clone(),
            target: Target::Field {
                owner: "hudson/model/Api".to_string(),
                name: "count".to_string(),
                descriptor: "I".to_string(),
            },
            kind: RefKind::Instruction,
        }));
        assert!(refs.contains(&Reference {
            site: run.clone(),
            target: Target::Class("hudson/model/Thing".to_string()),
            kind: RefKind::Instruction,
        }));
        assert!(refs.contains(&Reference {
            site: run,
            target: Target::Class("hudson/AbortException".to_string()),
            kind: RefKind::Exception,
        }));
    }

    #[test]
    fn generic_signature_types_become_references() {
        let bytes = ClassBuilder::new("org/acme/Holder")
            .signature("<T:Lhudson/model/Job;>Ljava/lang/Object;")
            .build();
        let refs = decode(&bytes).unwrap().references().unwrap();
        let targets: Vec<_> = refs
            .iter()
            .filter(|r| r.kind == RefKind::Signature)
            .map(|r| r.target.clone())
            .collect();
        assert!(targets.contains(&Target::Class("hudson/model/Job".to_string())));
        assert!(targets.contains(&Target::Class("T".to_string())));
    }

    #[test]
    fn malformed_input_is_reported() {
        assert_eq!(decode(b"not a class").unwrap_err(), DecodeError::InvalidMagic(0x6e6f7420));
        let bytes = ClassBuilder::new("a/B").build();
        assert_eq!(
            decode(&bytes[..bytes.len() - 3]).unwrap_err(),
            DecodeError::UnexpectedEof
        );
    }

    fn method_site(owner: &str, name: &str, descriptor: &str) -> Site {
        Site::Method {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    fn class_ref(site: &Site, target: &str, kind: RefKind) -> Reference {
        Reference {
            site: site.clone(),
            target: Target::Class(target.to_string()),
            kind,
        }
    }

    #[test]
    fn body_attributes_become_references() {
        let bytes = ClassBuilder::new("org/acme/Worker")
            .field(ACC_PRIVATE, "jobs", "Ljava/util/List;", &[])
            .field_signature("Ljava/util/List<Lhudson/model/Job;>;")
            .method(ACC_PUBLIC, "work", "()V", &[], vec![Insn::LdcClass("hudson/model/Node")])
            .method_signature("<T:Lhudson/model/Run;>()V")
            .catches("hudson/AbortException")
            .local("item", "Lhudson/model/Item;", None)
            .local("runs", "Ljava/util/List;", Some("Ljava/util/List<Lhudson/model/Run;>;"))
            .build();

        let class = decode(&bytes).unwrap();
        let work = &class.methods[0];
        assert_eq!(work.signature.as_deref(), Some("<T:Lhudson/model/Run;>()V"));
        assert!(work.code.contains(&CodeRef::CatchType("hudson/AbortException".to_string())));
        assert!(work.code.contains(&CodeRef::LocalVariable {
            name: "runs".to_string(),
            descriptor: String::new(),
            signature: Some("Ljava/util/List<Lhudson/model/Run;>;".to_string()),
        }));

        let refs = class.references().unwrap();
        let site = method_site("org/acme/Worker", "work", "()V");
        assert!(refs.contains(&class_ref(&site, "hudson/model/Node", RefKind::Instruction)));
        assert!(refs.contains(&class_ref(&site, "hudson/AbortException", RefKind::CatchType)));
        assert!(refs.contains(&class_ref(&site, "hudson/model/Item", RefKind::LocalVariable)));
        assert!(refs.contains(&class_ref(&site, "hudson/model/Run", RefKind::LocalVariable)));
        assert!(refs.contains(&class_ref(&site, "hudson/model/Run", RefKind::Signature)));

        let jobs = Site::Field {
            owner: "org/acme/Worker".to_string(),
            name: "jobs".to_string(),
        };
        assert!(refs.contains(&class_ref(&jobs, "hudson/model/Job", RefKind::Signature)));
        assert!(refs.contains(&class_ref(&jobs, "java/util/List", RefKind::Descriptor)));
    }

    #[test]
    fn deprecated_attribute_is_read_at_every_level() {
        let bytes = ClassBuilder::new("hudson/model/Old")
            .deprecated()
            .field(ACC_PUBLIC, "f", "I", &[])
            .deprecated_field()
            .field(ACC_PUBLIC, "g", "I", &[])
            .method(ACC_PUBLIC, "m", "()V", &[], vec![])
            .deprecated_method()
            .build();

        let class = decode(&bytes).unwrap();
        assert!(class.deprecated);
        assert!(class.annotations.is_empty());
        assert!(class.fields[0].deprecated);
        assert!(!class.fields[1].deprecated);
        assert!(class.methods[0].deprecated);
    }

    #[test]
    fn nesting_attributes_name_the_outer_class() {
        let member = ClassBuilder::new("org/acme/Outer$Inner")
            .inner_of("org/acme/Outer", "Inner")
            .build();
        let class = decode(&member).unwrap();
        assert_eq!(
            class.inner_classes,
            vec![InnerClass {
                name: "org/acme/Outer$Inner".to_string(),
                outer: Some("org/acme/Outer".to_string()),
            }]
        );
        let this = Site::Class("org/acme/Outer$Inner".to_string());
        let refs = class.references().unwrap();
        assert!(refs.contains(&class_ref(&this, "org/acme/Outer", RefKind::OuterClass)));

        let local = ClassBuilder::new("org/acme/Outer$1")
            .enclosed_by("org/acme/Outer", Some(("run", "()V")))
            .build();
        let class = decode(&local).unwrap();
        assert_eq!(
            class.enclosing_method,
            Some(EnclosingMethod {
                owner: "org/acme/Outer".to_string(),
                name: Some("run".to_string()),
                descriptor: Some("()V".to_string()),
            })
        );
        let this = Site::Class("org/acme/Outer$1".to_string());
        assert!(class
            .references()
            .unwrap()
            .contains(&class_ref(&this, "org/acme/Outer", RefKind::OuterClass)));

        let anonymous_in_initializer = ClassBuilder::new("org/acme/Outer$2")
            .enclosed_by("org/acme/Outer", None)
            .build();
        let enclosing = decode(&anonymous_in_initializer).unwrap().enclosing_method.unwrap();
        assert_eq!(enclosing.name, None);
        assert_eq!(enclosing.descriptor, None);
    }

    #[test]
    fn method_references_resolve_through_bootstrap_methods() {
        let bytes = ClassBuilder::new("org/acme/Lambdas")
            .method(
                ACC_PUBLIC,
                "schedule",
                "()V",
                &[],
                vec![
                    Insn::MethodRef("hudson/model/Api", "m", "()V"),
                    Insn::LdcHandle(2, "hudson/model/Api", "COUNT", "I"),
                ],
            )
            .build();

        let refs = decode(&bytes).unwrap().references().unwrap();
        let site = method_site("org/acme/Lambdas", "schedule", "()V");
        assert!(refs.contains(&Reference {
            site: site.clone(),
            target: Target::Method {
                owner: "hudson/model/Api".to_string(),
                name: "m".to_string(),
                descriptor: "()V".to_string(),
            },
            kind: RefKind::Instruction,
        }));
        assert!(refs.contains(&Reference {
            site: site.clone(),
            target: Target::Method {
                owner: "java/lang/invoke/LambdaMetafactory".to_string(),
                name: "metafactory".to_string(),
                descriptor: crate::classgen::LAMBDA_METAFACTORY.2.to_string(),
            },
            kind: RefKind::Instruction,
        }));
        assert!(refs.contains(&Reference {
            site,
            target: Target::Field {
                owner: "hudson/model/Api".to_string(),
                name: "COUNT".to_string(),
                descriptor: "I".to_string(),
            },
            kind: RefKind::Instruction,
        }));
    }

    #[test]
    fn dangling_bootstrap_index_is_malformed() {
        // invokedynamic #2 where #2 names bootstrap entry 5 of an absent table
        let pool = ConstantPool {
            entries: vec![Constant::Unusable, Constant::Other, Constant::Dynamic { bootstrap_index: 5 }],
        };
        let body = walk_bytecode(&[0xba, 0, 2, 0, 0, 0xb1], &pool).unwrap();
        assert_eq!(body.bootstraps, vec![5]);
        assert!(body.refs.is_empty());

        let not_dynamic = walk_bytecode(&[0xba, 0, 1, 0, 0], &pool).unwrap_err();
        assert_eq!(not_dynamic, DecodeError::InvalidConstantIndex { index: 1 });
    }

    #[test]
    fn switch_padding_is_relative_to_code_start() {
        let pool = ConstantPool {
            entries: vec![Constant::Unusable],
        };
        // nop, tableswitch at pc 1 => 2 padding bytes, default, low=0, high=1, two offsets, return
        let mut code = vec![0x00, 0xaa, 0, 0];
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.push(0xb1);
        let body = walk_bytecode(&code, &pool).unwrap();
        assert!(body.refs.is_empty());
        assert!(body.bootstraps.is_empty());
    }
}
