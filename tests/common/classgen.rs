//! Minimal class-file writer used to build test fixtures.
//!
//! Shared by the crate's unit tests and the integration tests.
#![allow(dead_code)]

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;

#[derive(Default)]
struct Pool {
    bytes: Vec<u8>,
    count: u16,
    utf8: Vec<(String, u16)>,
}

impl Pool {
    fn push(&mut self, entry: &[u8]) -> u16 {
        self.count += 1;
        self.bytes.extend_from_slice(entry);
        self.count
    }

    fn utf8(&mut self, s: &str) -> u16 {
        if let Some((_, i)) = self.utf8.iter().find(|(v, _)| v == s) {
            return *i;
        }
        let mut entry = vec![1];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        let i = self.push(&entry);
        self.utf8.push((s.to_string(), i));
        i
    }

    fn class(&mut self, name: &str) -> u16 {
        let n = self.utf8(name);
        let mut entry = vec![7];
        entry.extend_from_slice(&n.to_be_bytes());
        self.push(&entry)
    }

    fn member(&mut self, tag: u8, owner: &str, name: &str, desc: &str) -> u16 {
        let c = self.class(owner);
        let n = self.utf8(name);
        let d = self.utf8(desc);
        let mut nat = vec![12];
        nat.extend_from_slice(&n.to_be_bytes());
        nat.extend_from_slice(&d.to_be_bytes());
        let nat_index = self.push(&nat);
        let mut entry = vec![tag];
        entry.extend_from_slice(&c.to_be_bytes());
        entry.extend_from_slice(&nat_index.to_be_bytes());
        self.push(&entry)
    }

    fn name_and_type(&mut self, name: &str, desc: &str) -> u16 {
        let n = self.utf8(name);
        let d = self.utf8(desc);
        let mut nat = vec![12];
        nat.extend_from_slice(&n.to_be_bytes());
        nat.extend_from_slice(&d.to_be_bytes());
        self.push(&nat)
    }

    /// `kind` 1-4 for fields, 5-9 for methods.
    fn method_handle(&mut self, kind: u8, owner: &str, name: &str, desc: &str) -> u16 {
        let tag = if kind <= 4 { 9 } else { 10 };
        let reference = self.member(tag, owner, name, desc);
        let mut entry = vec![15, kind];
        entry.extend_from_slice(&reference.to_be_bytes());
        self.push(&entry)
    }
}

pub const LAMBDA_METAFACTORY: (&str, &str, &str) = (
    "java/lang/invoke/LambdaMetafactory",
    "metafactory",
    "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;\
     Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)\
     Ljava/lang/invoke/CallSite;",
);

pub enum Insn {
    Invoke(&'static str, &'static str, &'static str),
    GetField(&'static str, &'static str, &'static str),
    New(&'static str),
    /// `ldc_w` of a class constant.
    LdcClass(&'static str),
    /// `ldc_w` of a method handle: kind, owner, name, descriptor.
    LdcHandle(u8, &'static str, &'static str, &'static str),
    /// `invokedynamic` bootstrapped by the lambda metafactory with a static
    /// method handle to the given method, as `Owner::method` compiles to.
    MethodRef(&'static str, &'static str, &'static str),
}

pub struct MethodSpec {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub annotations: Vec<String>,
    pub exceptions: Vec<String>,
    pub code: Vec<Insn>,
    pub signature: Option<String>,
    pub deprecated: bool,
    pub catches: Vec<String>,
    /// Name, descriptor and optional generic signature.
    pub locals: Vec<(String, String, Option<String>)>,
}

pub struct FieldSpec {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub annotations: Vec<String>,
    pub signature: Option<String>,
    pub deprecated: bool,
}

pub struct ClassBuilder {
    pub access: u16,
    pub name: String,
    pub super_name: String,
    pub interfaces: Vec<String>,
    pub annotations: Vec<String>,
    pub signature: Option<String>,
    pub fields: Vec<FieldSpec>,
    pub methods: Vec<MethodSpec>,
    pub deprecated: bool,
    /// Inner class, outer class, simple name.
    pub inner_classes: Vec<(String, Option<String>, Option<String>)>,
    /// Enclosing class and, for local classes, the enclosing method.
    pub enclosing: Option<(String, Option<(String, String)>)>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            access: ACC_PUBLIC,
            name: name.to_string(),
            super_name: "java/lang/Object".to_string(),
            interfaces: Vec::new(),
            annotations: Vec::new(),
            signature: None,
            fields: Vec::new(),
            methods: Vec::new(),
            deprecated: false,
            inner_classes: Vec::new(),
            enclosing: None,
        }
    }

    /// Adds the class-level `Deprecated` attribute.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn inner_of(mut self, outer: &str, simple_name: &str) -> Self {
        let name = self.name.clone();
        self.inner_classes
            .push((name, Some(outer.to_string()), Some(simple_name.to_string())));
        self
    }

    pub fn enclosed_by(mut self, owner: &str, method: Option<(&str, &str)>) -> Self {
        self.enclosing = Some((
            owner.to_string(),
            method.map(|(n, d)| (n.to_string(), d.to_string())),
        ));
        self
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = super_name.to_string();
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn annotated(mut self, descriptor: &str) -> Self {
        self.annotations.push(descriptor.to_string());
        self
    }

    pub fn signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str, annotations: &[&str]) -> Self {
        self.fields.push(FieldSpec {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            annotations: annotations.iter().map(|s| s.to_string()).collect(),
            signature: None,
            deprecated: false,
        });
        self
    }

    pub fn field_signature(mut self, signature: &str) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.signature = Some(signature.to_string());
        }
        self
    }

    pub fn deprecated_field(mut self) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.deprecated = true;
        }
        self
    }

    pub fn method(
        mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        annotations: &[&str],
        code: Vec<Insn>,
    ) -> Self {
        self.methods.push(MethodSpec {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            annotations: annotations.iter().map(|s| s.to_string()).collect(),
            exceptions: Vec::new(),
            code,
            signature: None,
            deprecated: false,
            catches: Vec::new(),
            locals: Vec::new(),
        });
        self
    }

    pub fn method_signature(mut self, signature: &str) -> Self {
        if let Some(last) = self.methods.last_mut() {
            last.signature = Some(signature.to_string());
        }
        self
    }

    pub fn deprecated_method(mut self) -> Self {
        if let Some(last) = self.methods.last_mut() {
            last.deprecated = true;
        }
        self
    }

    /// Adds an exception handler for `catch_type` to the last method.
    pub fn catches(mut self, catch_type: &str) -> Self {
        if let Some(last) = self.methods.last_mut() {
            last.catches.push(catch_type.to_string());
        }
        self
    }

    pub fn local(mut self, name: &str, descriptor: &str, signature: Option<&str>) -> Self {
        if let Some(last) = self.methods.last_mut() {
            last.locals.push((
                name.to_string(),
                descriptor.to_string(),
                signature.map(str::to_string),
            ));
        }
        self
    }

    pub fn throws(mut self, exception: &str) -> Self {
        if let Some(last) = self.methods.last_mut() {
            last.exceptions.push(exception.to_string());
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = Pool::default();
        let this = pool.class(&self.name);
        let sup = pool.class(&self.super_name);
        let interfaces: Vec<u16> = self.interfaces.iter().map(|i| pool.class(i)).collect();

        let mut body = Vec::new();
        body.extend_from_slice(&self.access.to_be_bytes());
        body.extend_from_slice(&this.to_be_bytes());
        body.extend_from_slice(&sup.to_be_bytes());
        body.extend_from_slice(&(interfaces.len() as u16).to_be_bytes());
        for i in &interfaces {
            body.extend_from_slice(&i.to_be_bytes());
        }

        body.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for f in &self.fields {
            body.extend_from_slice(&f.access.to_be_bytes());
            body.extend_from_slice(&pool.utf8(&f.name).to_be_bytes());
            body.extend_from_slice(&pool.utf8(&f.descriptor).to_be_bytes());
            let mut attrs: Vec<Vec<u8>> = annotation_attr(&mut pool, &f.annotations)
                .into_iter()
                .collect();
            if let Some(sig) = &f.signature {
                let s = pool.utf8(sig);
                attrs.push(attribute(&mut pool, "Signature", &s.to_be_bytes()));
            }
            if f.deprecated {
                attrs.push(attribute(&mut pool, "Deprecated", &[]));
            }
            body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
            for a in attrs {
                body.extend_from_slice(&a);
            }
        }

        let mut bootstraps: Vec<Vec<u8>> = Vec::new();
        body.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for m in &self.methods {
            body.extend_from_slice(&m.access.to_be_bytes());
            body.extend_from_slice(&pool.utf8(&m.name).to_be_bytes());
            body.extend_from_slice(&pool.utf8(&m.descriptor).to_be_bytes());
            let mut attrs: Vec<Vec<u8>> = Vec::new();
            if let Some(a) = annotation_attr(&mut pool, &m.annotations) {
                attrs.push(a);
            }
            if !m.exceptions.is_empty() {
                let mut payload = (m.exceptions.len() as u16).to_be_bytes().to_vec();
                for e in &m.exceptions {
                    payload.extend_from_slice(&pool.class(e).to_be_bytes());
                }
                attrs.push(attribute(&mut pool, "Exceptions", &payload));
            }
            if let Some(sig) = &m.signature {
                let s = pool.utf8(sig);
                attrs.push(attribute(&mut pool, "Signature", &s.to_be_bytes()));
            }
            if m.deprecated {
                attrs.push(attribute(&mut pool, "Deprecated", &[]));
            }
            if !m.code.is_empty() || !m.catches.is_empty() || !m.locals.is_empty() {
                let mut code = Vec::new();
                for insn in &m.code {
                    match insn {
                        Insn::Invoke(o, n, d) => {
                            code.push(0xb8);
                            code.extend_from_slice(&pool.member(10, o, n, d).to_be_bytes());
                        }
                        Insn::GetField(o, n, d) => {
                            code.push(0xb2);
                            code.extend_from_slice(&pool.member(9, o, n, d).to_be_bytes());
                        }
                        Insn::New(c) => {
                            code.push(0xbb);
                            code.extend_from_slice(&pool.class(c).to_be_bytes());
                        }
                        Insn::LdcClass(c) => {
                            code.push(0x13);
                            code.extend_from_slice(&pool.class(c).to_be_bytes());
                        }
                        Insn::LdcHandle(kind, o, n, d) => {
                            code.push(0x13);
                            code.extend_from_slice(&pool.method_handle(*kind, o, n, d).to_be_bytes());
                        }
                        Insn::MethodRef(o, n, d) => {
                            let (bo, bn, bd) = LAMBDA_METAFACTORY;
                            let mut entry = pool.method_handle(6, bo, bn, bd).to_be_bytes().to_vec();
                            entry.extend_from_slice(&1u16.to_be_bytes());
                            entry.extend_from_slice(&pool.method_handle(6, o, n, d).to_be_bytes());
                            let bootstrap_index = bootstraps.len() as u16;
                            bootstraps.push(entry);

                            let nat = pool.name_and_type("run", "()Ljava/lang/Runnable;");
                            let mut indy = vec![18];
                            indy.extend_from_slice(&bootstrap_index.to_be_bytes());
                            indy.extend_from_slice(&nat.to_be_bytes());
                            let index = pool.push(&indy);
                            code.push(0xba);
                            code.extend_from_slice(&index.to_be_bytes());
                            code.extend_from_slice(&[0, 0]);
                        }
                    }
                }
                code.push(0xb1); // return
                let mut payload = Vec::new();
                payload.extend_from_slice(&4u16.to_be_bytes());
                payload.extend_from_slice(&4u16.to_be_bytes());
                payload.extend_from_slice(&(code.len() as u32).to_be_bytes());
                payload.extend_from_slice(&code);
                payload.extend_from_slice(&(m.catches.len() as u16).to_be_bytes());
                for catch_type in &m.catches {
                    payload.extend_from_slice(&0u16.to_be_bytes()); // start_pc
                    payload.extend_from_slice(&(code.len() as u16).to_be_bytes()); // end_pc
                    payload.extend_from_slice(&0u16.to_be_bytes()); // handler_pc
                    payload.extend_from_slice(&pool.class(catch_type).to_be_bytes());
                }

                let mut code_attrs: Vec<Vec<u8>> = Vec::new();
                if !m.locals.is_empty() {
                    code_attrs.push(local_table(&mut pool, "LocalVariableTable", &m.locals, |(_, d, _)| {
                        Some(d.as_str())
                    }));
                    let typed: Vec<_> = m.locals.iter().filter(|(_, _, sig)| sig.is_some()).cloned().collect();
                    if !typed.is_empty() {
                        code_attrs.push(local_table(&mut pool, "LocalVariableTypeTable", &typed, |(_, _, s)| {
                            s.as_deref()
                        }));
                    }
                }
                // unknown to the decoder, must be skipped
                code_attrs.push(attribute(&mut pool, "LineNumberTable", &[0, 1, 0, 0, 0, 1]));
                payload.extend_from_slice(&(code_attrs.len() as u16).to_be_bytes());
                for a in code_attrs {
                    payload.extend_from_slice(&a);
                }
                attrs.push(attribute(&mut pool, "Code", &payload));
            }
            body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
            for a in attrs {
                body.extend_from_slice(&a);
            }
        }

        let mut attrs: Vec<Vec<u8>> = Vec::new();
        if let Some(a) = annotation_attr(&mut pool, &self.annotations) {
            attrs.push(a);
        }
        if let Some(sig) = &self.signature {
            let s = pool.utf8(sig);
            attrs.push(attribute(&mut pool, "Signature", &s.to_be_bytes()));
        }
        if self.deprecated {
            attrs.push(attribute(&mut pool, "Deprecated", &[]));
        }
        if !self.inner_classes.is_empty() {
            let mut payload = (self.inner_classes.len() as u16).to_be_bytes().to_vec();
            for (inner, outer, simple) in &self.inner_classes {
                payload.extend_from_slice(&pool.class(inner).to_be_bytes());
                let outer = outer.as_deref().map_or(0, |o| pool.class(o));
                payload.extend_from_slice(&outer.to_be_bytes());
                let simple = simple.as_deref().map_or(0, |s| pool.utf8(s));
                payload.extend_from_slice(&simple.to_be_bytes());
                payload.extend_from_slice(&ACC_PUBLIC.to_be_bytes());
            }
            attrs.push(attribute(&mut pool, "InnerClasses", &payload));
        }
        if let Some((owner, method)) = &self.enclosing {
            let mut payload = pool.class(owner).to_be_bytes().to_vec();
            let nat = method.as_ref().map_or(0, |(n, d)| pool.name_and_type(n, d));
            payload.extend_from_slice(&nat.to_be_bytes());
            attrs.push(attribute(&mut pool, "EnclosingMethod", &payload));
        }
        if !bootstraps.is_empty() {
            let mut payload = (bootstraps.len() as u16).to_be_bytes().to_vec();
            for entry in &bootstraps {
                payload.extend_from_slice(entry);
            }
            attrs.push(attribute(&mut pool, "BootstrapMethods", &payload));
        }
        // unknown attributes must be tolerated
        attrs.push(attribute(&mut pool, "SourceDebugExtension", b"SMAP\n*E\n"));
        body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        for a in attrs {
            body.extend_from_slice(&a);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&(pool.count + 1).to_be_bytes());
        out.extend_from_slice(&pool.bytes);
        out.extend_from_slice(&body);
        out
    }
}

fn attribute(pool: &mut Pool, name: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = pool.utf8(name).to_be_bytes().to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn local_table(
    pool: &mut Pool,
    name: &str,
    locals: &[(String, String, Option<String>)],
    type_of: impl Fn(&(String, String, Option<String>)) -> Option<&str>,
) -> Vec<u8> {
    let mut payload = (locals.len() as u16).to_be_bytes().to_vec();
    for (slot, local) in locals.iter().enumerate() {
        payload.extend_from_slice(&0u16.to_be_bytes()); // start_pc
        payload.extend_from_slice(&1u16.to_be_bytes()); // length
        payload.extend_from_slice(&pool.utf8(&local.0).to_be_bytes());
        let ty = type_of(local).unwrap_or_default();
        payload.extend_from_slice(&pool.utf8(ty).to_be_bytes());
        payload.extend_from_slice(&(slot as u16).to_be_bytes());
    }
    attribute(pool, name, &payload)
}

fn annotation_attr(pool: &mut Pool, annotations: &[String]) -> Option<Vec<u8>> {
    if annotations.is_empty() {
        return None;
    }
    let mut payload = (annotations.len() as u16).to_be_bytes().to_vec();
    for a in annotations {
        payload.extend_from_slice(&pool.utf8(a).to_be_bytes());
        // one element pair: since = "2.0"
        payload.extend_from_slice(&1u16.to_be_bytes());
        payload.extend_from_slice(&pool.utf8("since").to_be_bytes());
        payload.push(b's');
        payload.extend_from_slice(&pool.utf8("2.0").to_be_bytes());
    }
    Some(attribute(pool, "RuntimeVisibleAnnotations", &payload))
}
