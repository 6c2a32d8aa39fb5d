//! Per-line content transforms.
//!
//! A transform is either a named [`Preset`] or a snippet in a small
//! JavaScript-flavored expression language. Snippets run in a fresh
//! interpreter per line, see only the line they are given plus a fixed set
//! of pure built-ins, and any failure leaves the line untouched.

mod eval;
mod lexer;
mod parser;
mod presets;
mod value;

pub use presets::Preset;
pub use value::{Value, OBJECT_PLACEHOLDER};

use eval::Interpreter;
use parser::{FunctionBody, FunctionDef};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use value::Closure;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("SyntaxError: {message} (at offset {offset})")]
    Syntax { offset: usize, message: String },
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),
    #[error("TypeError: {0}")]
    Type(String),
    #[error("RangeError: {0}")]
    Range(String),
    #[error("{0}")]
    Thrown(String),
    #[error("step budget of {0} exceeded")]
    Budget(u64),
}

impl ScriptError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        ScriptError::Syntax {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformLimits {
    /// Evaluation steps allowed per line; `None` is unlimited.
    pub max_steps: Option<u64>,
}

#[derive(Clone)]
enum Transform {
    Preset(Preset),
    Script(Value),
}

/// Result of compiling a transform source. Holds a callable, a diagnostic,
/// or neither when the source was blank.
#[derive(Clone)]
pub struct CompiledTransform {
    source: String,
    transform: Option<Transform>,
    error: Option<String>,
    limits: TransformLimits,
}

impl std::fmt::Debug for CompiledTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTransform")
            .field("source", &self.source)
            .field("active", &self.is_active())
            .field("error", &self.error)
            .finish()
    }
}

impl Default for CompiledTransform {
    fn default() -> Self {
        Self {
            source: String::new(),
            transform: None,
            error: None,
            limits: TransformLimits::default(),
        }
    }
}

pub fn compile_content_transform(source: &str) -> CompiledTransform {
    compile_content_transform_with(source, TransformLimits::default())
}

pub fn compile_content_transform_with(source: &str, limits: TransformLimits) -> CompiledTransform {
    let mut compiled = CompiledTransform {
        source: source.to_string(),
        limits,
        ..CompiledTransform::default()
    };
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return compiled;
    }

    if let Some(preset) = Preset::lookup(source) {
        compiled.transform = Some(Transform::Preset(preset));
        return compiled;
    }

    if let Ok(expr) = parser::parse_expression(trimmed) {
        if let Ok(callable) = Interpreter::new(limits.max_steps).eval_root(&expr) {
            if callable.is_callable() {
                compiled.transform = Some(Transform::Script(callable));
                return compiled;
            }
        }
    }

    match parser::parse_body(trimmed) {
        Ok(stmts) => {
            let closure = Closure {
                def: Arc::new(FunctionDef {
                    params: vec!["line".to_string()],
                    body: FunctionBody::Block(stmts),
                }),
                captured: Vec::new(),
            };
            compiled.transform = Some(Transform::Script(Value::Function(Arc::new(closure))));
        }
        Err(err) => {
            tracing::debug!(source = %trimmed, error = %err, "transform failed to compile");
            compiled.error = Some(err.to_string());
        }
    }
    compiled
}

impl CompiledTransform {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.transform.is_some()
    }

    pub fn limits(&self) -> TransformLimits {
        self.limits
    }

    /// Rewrites one line. Falls back to the original text whenever there is
    /// no callable, the callable fails, or it yields `null`/`undefined`.
    pub fn apply(&self, line: &str) -> String {
        let Some(transform) = &self.transform else {
            return line.to_string();
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match transform {
            Transform::Preset(preset) => Ok(preset.apply(line).map(Value::Str)),
            Transform::Script(callable) => Interpreter::new(self.limits.max_steps)
                .call(callable, vec![Value::Str(line.to_string())])
                .map(Some),
        }));

        match outcome {
            Ok(Ok(Some(Value::Str(text)))) => text,
            Ok(Ok(Some(value))) if !value.is_nullish() => value.to_js_string(),
            Ok(Ok(_)) => line.to_string(),
            Ok(Err(err)) => {
                tracing::trace!(error = %err, "transform failed, keeping line");
                line.to_string()
            }
            Err(_) => {
                tracing::debug!("transform panicked, keeping line");
                line.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(source: &str, line: &str) -> String {
        compile_content_transform(source).apply(line)
    }

    #[test]
    fn test_empty_source_passes_through() {
        for source in ["", "   ", "\n\t"] {
            let compiled = compile_content_transform(source);
            assert!(!compiled.is_active());
            assert!(compiled.error().is_none());
            assert_eq!(compiled.apply("input"), "input");
        }
    }

    #[test]
    fn test_expression_form() {
        assert_eq!(apply("line => line.trim().toUpperCase()", "  test  "), "TEST");
        assert_eq!(apply("(l) => `[${l.length}] ${l}`", "abc"), "[3] abc");
    }

    #[test]
    fn test_body_form() {
        assert_eq!(apply("return line.slice(0, 3)", "abcdef"), "abc");
        assert_eq!(
            apply(
                "const parts = line.split('|');\nif (parts.length < 2) return;\nreturn parts[1].trim()",
                "a | b"
            ),
            "b"
        );
        assert_eq!(apply("const parts = line.split('|'); if (parts.length < 2) return;", "x"), "x");
    }

    #[test]
    fn test_result_coercion() {
        assert_eq!(apply("line => ({ a: 1 })", "input"), OBJECT_PLACEHOLDER);
        assert_eq!(apply("line => line.length", "four"), "4");
        assert_eq!(apply("line => [1, 2, 3]", "x"), "1,2,3");
        assert_eq!(apply("line => null", "keep"), "keep");
        assert_eq!(apply("line => undefined", "keep"), "keep");
        assert_eq!(apply("line => ''", "gone"), "");
        assert_eq!(apply("return false", "x"), "false");
    }

    #[test]
    fn test_runtime_errors_keep_line() {
        assert_eq!(apply("line => { throw new Error('boom') }", "input"), "input");
        assert_eq!(apply("line => missing.value", "input"), "input");
        assert_eq!(apply("line => line.nope()", "input"), "input");
        assert_eq!(apply("return JSON.parse(line).msg", "not json"), "not json");
    }

    #[test]
    fn test_long_chains_are_rejected_not_fatal() {
        let calls = compile_content_transform(&format!("line => line{}", ".trim()".repeat(5000)));
        assert!(!calls.is_active());
        assert!(calls.error().is_some_and(|e| e.contains("nesting too deep")));
        assert_eq!(calls.apply(" x "), " x ");

        let sums = compile_content_transform(&format!("line => 1{}", "+1".repeat(5000)));
        assert!(sums.error().is_some());
        assert_eq!(sums.apply("kept"), "kept");
    }

    #[test]
    fn test_deep_call_chain_keeps_line() {
        let mut source = String::from("const f0 = x => x + '!'\n");
        for i in 1..300 {
            source.push_str(&format!("const f{i} = x => f{}(x)\n", i - 1));
        }
        source.push_str("return f299(line)");
        let compiled = compile_content_transform(&source);
        assert!(compiled.is_active());
        assert_eq!(compiled.apply("input"), "input");

        let shallow = compile_content_transform(
            "const a = x => x + '!'\nconst b = x => a(x)\nreturn b(line)",
        );
        assert_eq!(shallow.apply("input"), "input!");
    }

    #[test]
    fn test_malformed_snippet_reports_error() {
        let compiled = compile_content_transform("line => (");
        assert!(!compiled.is_active());
        let error = compiled.error().unwrap();
        assert!(error.starts_with("SyntaxError"), "{error}");
        assert_eq!(compiled.apply("input"), "input");
    }

    #[test]
    fn test_non_callable_expression_falls_back_to_body() {
        // `line.trim()` is not a function value, so it compiles as a body
        // statement whose result is discarded.
        let compiled = compile_content_transform("line.trim()");
        assert!(compiled.is_active());
        assert_eq!(compiled.apply(" x "), " x ");
    }

    #[test]
    fn test_presets() {
        assert_eq!(apply("trim", "  x  "), "x");
        assert_eq!(apply("strip-ansi", "\x1b[1mbold\x1b[0m"), "bold");
        assert_eq!(apply("json:message", r#"{"msg":"hello"}"#), "hello");
        assert_eq!(apply("json:message", "plain"), "plain");
    }

    #[test]
    fn test_builtins() {
        assert_eq!(
            apply("line => line.replace(/(\\d+)ms/g, (m, n) => `${n / 1000}s`)", "took 1500ms and 20ms"),
            "took 1.5s and 0.02s"
        );
        assert_eq!(apply("l => l.replace(/o/g, '0')", "foo"), "f00");
        assert_eq!(apply("l => l.replaceAll('a', '$&$&')", "aba"), "aabaa");
        assert_eq!(apply("l => JSON.stringify({ n: Number(l) })", "7"), r#"{"n":7}"#);
        assert_eq!(apply("l => Math.max(1, parseInt(l, 16), 3)", "ff"), "255");
        assert_eq!(apply("l => (parseFloat(l) * 2).toFixed(2)", "1.25xyz"), "2.50");
        assert_eq!(apply("l => l.split(',').map(s => s.trim()).filter(s => s).join('|')", "a, ,b"), "a|b");
        assert_eq!(apply("l => l.padStart(5, '*')", "ab"), "***ab");
        assert_eq!(apply("l => /^err/i.test(l) ? 'E' : 'ok'", "ERR x"), "E");
        assert_eq!(apply("l => l.match(/(\\w+)=(\\w+)/)?.[2] ?? 'none'", "k=v"), "v");
        assert_eq!(apply("l => l.match(/(\\w+)=(\\w+)/)?.[2] ?? 'none'", "kv"), "none");
        assert_eq!(apply("l => typeof l", "x"), "string");
        assert_eq!(apply("l => 1 + '2'", "x"), "12");
    }

    #[test]
    fn test_closures_and_assignment() {
        let source = "let count = 0\nconst bump = n => n + 1\ncount = bump(count)\nreturn `${count}:${line}`";
        assert_eq!(apply(source, "x"), "1:x");
        assert_eq!(apply("const k = 1; k = 2; return 'never'", "x"), "x");
    }

    #[test]
    fn test_no_state_between_lines() {
        let compiled = compile_content_transform("let n = 0; n = n + 1; return n");
        assert_eq!(compiled.apply("a"), "1");
        assert_eq!(compiled.apply("b"), "1");
    }

    #[test]
    fn test_step_budget() {
        let limits = TransformLimits { max_steps: Some(5) };
        let compiled =
            compile_content_transform_with("line => line.split('').map(c => c + c).join('')", limits);
        assert!(compiled.is_active());
        assert_eq!(compiled.apply("abcdefgh"), "abcdefgh");

        let unlimited = compile_content_transform("line => line.split('').map(c => c + c).join('')");
        assert_eq!(unlimited.apply("ab"), "aabb");
    }

    #[test]
    fn test_unsupported_constructs_are_rejected() {
        for source in ["while (true) {}", "function f() {}", "for (;;) {}"] {
            let compiled = compile_content_transform(source);
            assert!(compiled.error().is_some(), "{source}");
        }
    }
}
