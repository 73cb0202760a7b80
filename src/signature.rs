//! Generic signature grammar (JVMS §4.7.9.1).
//!
//! One entry point handles class signatures, method signatures, field/local
//! signatures and plain descriptors, since the latter are a subset of the
//! grammar. The walk reports every class type it names, including inner class
//! types, formal type parameters and type variables.

use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureType {
    /// Top-level class type, internal name.
    Class(String),
    /// Inner class type, composed as `Outer$Inner`.
    InnerClass(String),
    /// Name declared in a `<T:…>` list.
    FormalTypeParameter(String),
    /// `T name;` use site.
    TypeVariable(String),
}

impl SignatureType {
    pub fn name(&self) -> &str {
        match self {
            Self::Class(n)
            | Self::InnerClass(n)
            | Self::FormalTypeParameter(n)
            | Self::TypeVariable(n) => n,
        }
    }
}

pub fn parse(signature: &str) -> Result<Vec<SignatureType>, DecodeError> {
    let mut parser = SignatureParser::new(signature);
    parser.parse_any()?;
    Ok(parser.found)
}

/// Class names mentioned by a field or method descriptor (no generics).
pub fn descriptor_classes(descriptor: &str) -> Result<Vec<String>, DecodeError> {
    Ok(parse(descriptor)?
        .into_iter()
        .filter_map(|t| match t {
            SignatureType::Class(n) | SignatureType::InnerClass(n) => Some(n),
            _ => None,
        })
        .collect())
}

struct SignatureParser<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    found: Vec<SignatureType>,
}

impl<'a> SignatureParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            found: Vec::new(),
        }
    }

    fn error(&self) -> DecodeError {
        DecodeError::InvalidSignature(self.source.to_string())
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, b: u8) -> Result<(), DecodeError> {
        if self.peek() != Some(b) {
            return Err(self.error());
        }
        self.pos += 1;
        Ok(())
    }

    fn parse_any(&mut self) -> Result<(), DecodeError> {
        if self.peek() == Some(b'<') {
            self.parse_formal_type_parameters()?;
        }
        if self.peek() == Some(b'(') {
            return self.parse_method_tail();
        }
        while self.pos < self.bytes.len() {
            self.parse_java_type()?;
        }
        Ok(())
    }

    fn parse_formal_type_parameters(&mut self) -> Result<(), DecodeError> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            let name = self.identifier(b':')?;
            self.found.push(SignatureType::FormalTypeParameter(name));
            // class bound may be empty, interface bounds never are
            self.expect(b':')?;
            if !matches!(self.peek(), Some(b':') | Some(b'>')) && !self.at_identifier_end() {
                self.parse_reference_type()?;
            }
            while self.peek() == Some(b':') {
                self.pos += 1;
                self.parse_reference_type()?;
            }
        }
        self.expect(b'>')
    }

    // After an empty class bound the next formal parameter begins immediately.
    fn at_identifier_end(&self) -> bool {
        !matches!(self.peek(), Some(b'L') | Some(b'T') | Some(b'['))
    }

    fn parse_method_tail(&mut self) -> Result<(), DecodeError> {
        self.expect(b'(')?;
        while self.peek() != Some(b')') {
            self.parse_java_type()?;
        }
        self.expect(b')')?;
        if self.peek() == Some(b'V') {
            self.pos += 1;
        } else {
            self.parse_java_type()?;
        }
        while self.peek() == Some(b'^') {
            self.pos += 1;
            self.parse_reference_type()?;
        }
        if self.pos != self.bytes.len() {
            return Err(self.error());
        }
        Ok(())
    }

    fn parse_java_type(&mut self) -> Result<(), DecodeError> {
        match self.peek() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
                self.pos += 1;
                Ok(())
            }
            _ => self.parse_reference_type(),
        }
    }

    fn parse_reference_type(&mut self) -> Result<(), DecodeError> {
        match self.peek() {
            Some(b'L') => self.parse_class_type(),
            Some(b'T') => {
                self.pos += 1;
                let name = self.identifier(b';')?;
                self.expect(b';')?;
                self.found.push(SignatureType::TypeVariable(name));
                Ok(())
            }
            Some(b'[') => {
                self.pos += 1;
                self.parse_java_type()
            }
            _ => Err(self.error()),
        }
    }

    fn parse_class_type(&mut self) -> Result<(), DecodeError> {
        self.expect(b'L')?;
        let start = self.pos;
        while !matches!(self.peek(), Some(b'<') | Some(b'.') | Some(b';') | None) {
            self.pos += 1;
        }
        let mut name = self.source[start..self.pos].to_string();
        if name.is_empty() {
            return Err(self.error());
        }
        self.found.push(SignatureType::Class(name.clone()));
        if self.peek() == Some(b'<') {
            self.parse_type_arguments()?;
        }
        while self.peek() == Some(b'.') {
            self.pos += 1;
            let start = self.pos;
            while !matches!(self.peek(), Some(b'<') | Some(b'.') | Some(b';') | None) {
                self.pos += 1;
            }
            name.push('$');
            name.push_str(&self.source[start..self.pos]);
            self.found.push(SignatureType::InnerClass(name.clone()));
            if self.peek() == Some(b'<') {
                self.parse_type_arguments()?;
            }
        }
        self.expect(b';')
    }

    fn parse_type_arguments(&mut self) -> Result<(), DecodeError> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            match self.peek() {
                Some(b'*') => self.pos += 1,
                Some(b'+' | b'-') => {
                    self.pos += 1;
                    self.parse_reference_type()?;
                }
                None => return Err(self.error()),
                _ => self.parse_reference_type()?,
            }
        }
        self.expect(b'>')
    }

    fn identifier(&mut self, terminator: u8) -> Result<String, DecodeError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == terminator {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start || self.peek().is_none() {
            return Err(self.error());
        }
        Ok(self.source[start..self.pos].to_string())
    }
}
