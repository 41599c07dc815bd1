//! Sink-aware text emitter.
//!
//! Brackets operations into named C functions. Each [`Sink`] holds its own
//! text stream and at most one open function; opening a second function on
//! the same sink or finishing with one still open is an error. The emitter
//! also records every function it defines and every local call it renders,
//! so dangling calls are caught before any text leaves the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::error::EmitError;
use crate::op::Operation;

/// An output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sink {
    /// Primary source with `main`.
    Main,
    /// Auxiliary API source for the split layout.
    Api,
    /// Weight and bias literal definitions.
    Weights,
    /// Golden-data literal definitions.
    SampleData,
}

impl Sink {
    pub const ALL: [Sink; 4] = [Sink::Main, Sink::Api, Sink::Weights, Sink::SampleData];

    pub fn name(self) -> &'static str {
        match self {
            Sink::Main => "main",
            Sink::Api => "api",
            Sink::Weights => "weights",
            Sink::SampleData => "sample-data",
        }
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Return type, name and parameter list of an emitted function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub return_type: String,
    pub name: String,
    pub arguments: String,
}

impl FunctionSignature {
    pub fn new(
        return_type: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            return_type: return_type.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// `void name(void)`
    pub fn void(name: impl Into<String>) -> Self {
        Self::new("void", name, "void")
    }

    /// `int name(void)`
    pub fn int(name: impl Into<String>) -> Self {
        Self::new("int", name, "void")
    }
}

/// How an emitted function ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Return {
    Void,
    Value(String),
}

impl Return {
    /// `return CNN_OK;`
    pub fn ok() -> Self {
        Return::Value("CNN_OK".into())
    }

    pub fn value(expr: impl Into<String>) -> Self {
        Return::Value(expr.into())
    }
}

/// A function that has been closed, in definition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinedFunction {
    pub sink: Sink,
    pub name: String,
}

#[derive(Debug, Default)]
struct Stream {
    text: String,
    open: Option<FunctionSignature>,
}

/// Collects rendered text for every sink of one synthesis run.
#[derive(Debug, Default)]
pub struct TextEmitter {
    streams: BTreeMap<Sink, Stream>,
    defined: Vec<DefinedFunction>,
    called: BTreeSet<String>,
}

impl TextEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a function on `sink`. Subsequent operations pushed to the sink
    /// render inside its body.
    pub fn open(&mut self, sink: Sink, signature: FunctionSignature) -> Result<(), EmitError> {
        let stream = self.streams.entry(sink).or_default();
        if let Some(open) = &stream.open {
            return Err(EmitError::UnitAlreadyOpen {
                sink: sink.to_string(),
                open: open.name.clone(),
                requested: signature.name,
            });
        }
        if self.defined.iter().any(|f| f.name == signature.name) {
            return Err(EmitError::DuplicateFunction {
                name: signature.name,
            });
        }
        stream.text.push_str(&format!(
            "{} {}({})\n{{\n",
            signature.return_type, signature.name, signature.arguments
        ));
        stream.open = Some(signature);
        Ok(())
    }

    /// Close the open function on `sink`.
    pub fn close(&mut self, sink: Sink, ret: Return) -> Result<(), EmitError> {
        let stream = self.streams.entry(sink).or_default();
        let signature = stream.open.take().ok_or_else(|| EmitError::NoOpenUnit {
            sink: sink.to_string(),
        })?;
        if let Return::Value(value) = ret {
            stream.text.push_str(&format!("\n  return {value};\n"));
        }
        stream.text.push_str("}\n\n");
        self.defined.push(DefinedFunction {
            sink,
            name: signature.name,
        });
        Ok(())
    }

    /// Emit a complete function in one step.
    pub fn function(
        &mut self,
        sink: Sink,
        signature: FunctionSignature,
        body: impl IntoIterator<Item = Operation>,
        ret: Return,
    ) -> Result<(), EmitError> {
        self.open(sink, signature)?;
        self.extend(sink, body);
        self.close(sink, ret)
    }

    /// Render `op` on `sink`, inside the open function if there is one.
    pub fn push(&mut self, sink: Sink, op: Operation) {
        let mut refs = Vec::new();
        op.local_references(&mut refs);
        self.called.extend(refs);

        let stream = self.streams.entry(sink).or_default();
        let depth = usize::from(stream.open.is_some());
        op.render(depth, &mut stream.text);
    }

    pub fn extend(&mut self, sink: Sink, ops: impl IntoIterator<Item = Operation>) {
        for op in ops {
            self.push(sink, op);
        }
    }

    /// Append preformatted text (e.g. a `#define` literal block) verbatim.
    pub fn raw(&mut self, sink: Sink, text: &str) {
        self.streams.entry(sink).or_default().text.push_str(text);
    }

    pub fn is_open(&self, sink: Sink) -> bool {
        self.streams
            .get(&sink)
            .is_some_and(|stream| stream.open.is_some())
    }

    /// Functions closed so far, in definition order.
    pub fn defined(&self) -> &[DefinedFunction] {
        &self.defined
    }

    /// Check the bracket and call-resolution rules and hand out the text of
    /// every sink that received output.
    pub fn finish(self) -> Result<EmittedText, EmitError> {
        for (sink, stream) in &self.streams {
            if let Some(open) = &stream.open {
                return Err(EmitError::UnclosedUnit {
                    sink: sink.to_string(),
                    name: open.name.clone(),
                });
            }
        }
        for name in &self.called {
            if !self.defined.iter().any(|f| &f.name == name) {
                return Err(EmitError::UndefinedFunction { name: name.clone() });
            }
        }

        let streams = self
            .streams
            .into_iter()
            .filter(|(_, stream)| !stream.text.is_empty())
            .map(|(sink, stream)| (sink, stream.text))
            .collect();
        Ok(EmittedText {
            streams,
            functions: self.defined,
        })
    }
}

/// Text produced by a finished emitter.
#[derive(Debug, Clone)]
pub struct EmittedText {
    pub streams: BTreeMap<Sink, String>,
    pub functions: Vec<DefinedFunction>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Callee;

    #[test]
    fn function_brackets() {
        let mut e = TextEmitter::new();
        e.function(
            Sink::Main,
            FunctionSignature::int("cnn_stop"),
            [Operation::statement("x = 1;")],
            Return::ok(),
        )
        .unwrap();
        let out = e.finish().unwrap();
        assert_eq!(
            out.streams[&Sink::Main],
            "int cnn_stop(void)\n{\n  x = 1;\n\n  return CNN_OK;\n}\n\n"
        );
    }

    #[test]
    fn void_function_has_no_return() {
        let mut e = TextEmitter::new();
        e.function(
            Sink::Api,
            FunctionSignature::void("fail"),
            [Operation::statement("while (1);")],
            Return::Void,
        )
        .unwrap();
        let out = e.finish().unwrap();
        assert_eq!(out.streams[&Sink::Api], "void fail(void)\n{\n  while (1);\n}\n\n");
        assert!(!out.streams.contains_key(&Sink::Main));
    }

    #[test]
    fn one_open_unit_per_sink() {
        let mut e = TextEmitter::new();
        e.open(Sink::Main, FunctionSignature::int("main")).unwrap();
        let err = e
            .open(Sink::Main, FunctionSignature::int("cnn_enable"))
            .unwrap_err();
        assert!(matches!(err, EmitError::UnitAlreadyOpen { .. }));

        // A different sink may hold its own open function.
        e.open(Sink::Api, FunctionSignature::int("cnn_enable")).unwrap();
        assert!(e.is_open(Sink::Main));
        assert!(e.is_open(Sink::Api));
    }

    #[test]
    fn close_without_open_fails() {
        let mut e = TextEmitter::new();
        let err = e.close(Sink::Main, Return::Void).unwrap_err();
        assert!(matches!(err, EmitError::NoOpenUnit { .. }));
    }

    #[test]
    fn unclosed_unit_fails_finish() {
        let mut e = TextEmitter::new();
        e.open(Sink::Main, FunctionSignature::int("main")).unwrap();
        let err = e.finish().unwrap_err();
        assert!(matches!(err, EmitError::UnclosedUnit { .. }));
    }

    #[test]
    fn undefined_local_call_fails_finish() {
        let mut e = TextEmitter::new();
        e.function(
            Sink::Main,
            FunctionSignature::int("main"),
            [Operation::call(Callee::local("cnn_continue"), &[])],
            Return::value("0"),
        )
        .unwrap();
        let err = e.finish().unwrap_err();
        assert_eq!(
            err,
            EmitError::UndefinedFunction {
                name: "cnn_continue".into()
            }
        );
    }

    #[test]
    fn local_call_resolves_across_sinks() {
        let mut e = TextEmitter::new();
        e.function(
            Sink::Api,
            FunctionSignature::int("cnn_disable"),
            Vec::<Operation>::new(),
            Return::ok(),
        )
        .unwrap();
        e.function(
            Sink::Main,
            FunctionSignature::int("main"),
            [Operation::call_local("cnn_disable")],
            Return::value("0"),
        )
        .unwrap();
        let out = e.finish().unwrap();
        assert_eq!(out.functions.len(), 2);
        assert_eq!(out.functions[0].sink, Sink::Api);
    }

    #[test]
    fn duplicate_definition_fails() {
        let mut e = TextEmitter::new();
        e.function(
            Sink::Main,
            FunctionSignature::void("fail"),
            Vec::<Operation>::new(),
            Return::Void,
        )
            .unwrap();
        let err = e
            .open(Sink::Api, FunctionSignature::void("fail"))
            .unwrap_err();
        assert!(matches!(err, EmitError::DuplicateFunction { .. }));
    }

    #[test]
    fn file_scope_operations_are_not_indented() {
        let mut e = TextEmitter::new();
        e.push(Sink::Main, Operation::declare("volatile uint32_t cnn_time;"));
        let out = e.finish().unwrap();
        assert_eq!(out.streams[&Sink::Main], "volatile uint32_t cnn_time;\n");
    }
}
