use super::parser::{
    BinaryOp, Expr, FunctionBody, LogicalOp, Property, Stmt, TemplatePiece, UnaryOp,
};
use super::value::{format_number, parse_number, Binding, Closure, Namespace, Native, RegexValue, Value};
use super::ScriptError;
use crate::constants::MAX_EVAL_DEPTH;
use std::sync::Arc;

/// Longest string `repeat` and `padStart`/`padEnd` will build, in bytes.
const MAX_BUILT_STRING: usize = 16 * 1024 * 1024;

enum Flow {
    Normal,
    Return(Value),
}

/// Evaluates parsed scripts. Holds nothing but the step budget and the
/// current nesting depth, so a fresh interpreter per invocation shares no
/// state with any other.
pub struct Interpreter {
    steps: u64,
    max_steps: Option<u64>,
    depth: usize,
}

impl Interpreter {
    pub fn new(max_steps: Option<u64>) -> Self {
        Self {
            steps: 0,
            max_steps,
            depth: 0,
        }
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        match self.max_steps {
            Some(max) if self.steps > max => Err(ScriptError::Budget(max)),
            _ => Ok(()),
        }
    }

    /// Evaluates a standalone expression with no bindings in scope.
    pub fn eval_root(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        let mut scope = Vec::new();
        self.eval(expr, &mut scope)
    }

    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.tick()?;
        match callee {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Native(native) => call_native(*native, &args),
            other => Err(ScriptError::Type(format!(
                "{} is not a function",
                other.type_of()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value, ScriptError> {
        let mut scope = closure.captured.clone();
        let mut args = args.into_iter();
        for param in &closure.def.params {
            scope.push(Binding {
                name: param.clone(),
                value: args.next().unwrap_or(Value::Undefined),
                mutable: true,
            });
        }
        match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &mut scope),
            FunctionBody::Block(stmts) => match self.exec_block(stmts, &mut scope)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Undefined),
            },
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &mut Vec<Binding>) -> Result<Flow, ScriptError> {
        let mark = scope.len();
        let mut flow = Flow::Normal;
        for stmt in stmts {
            flow = self.exec(stmt, scope)?;
            if matches!(flow, Flow::Return(_)) {
                break;
            }
        }
        scope.truncate(mark);
        Ok(flow)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &mut Vec<Binding>) -> Result<Flow, ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Declare { mutable, bindings } => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    scope.push(Binding {
                        name: name.clone(),
                        value,
                        mutable: *mutable,
                    });
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(ScriptError::Thrown(describe_thrown(&value)))
            }
            Stmt::If(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec_block(std::slice::from_ref(then.as_ref()), scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec_block(std::slice::from_ref(otherwise.as_ref()), scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(stmts) => self.exec_block(stmts, scope),
        }
    }

    fn eval(&mut self, expr: &Expr, scope: &mut Vec<Binding>) -> Result<Value, ScriptError> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(ScriptError::Range("maximum call stack size exceeded".to_string()));
        }
        self.depth += 1;
        let result = self.eval_inner(expr, scope);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr, scope: &mut Vec<Binding>) -> Result<Value, ScriptError> {
        self.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Template(pieces) => {
                let mut out = String::new();
                for piece in pieces {
                    match piece {
                        TemplatePiece::Text(text) => out.push_str(text),
                        TemplatePiece::Expr(expr) => {
                            out.push_str(&self.eval(expr, scope)?.to_js_string())
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Ident(name) => lookup(name, scope),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Object(fields) => {
                let mut values: Vec<(String, Value)> = Vec::with_capacity(fields.len());
                for (key, expr) in fields {
                    let value = self.eval(expr, scope)?;
                    values.retain(|(k, _)| k != key);
                    values.push((key.clone(), value));
                }
                Ok(Value::Object(values))
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && object.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.property_key(property, scope)?;
                get_property(&object, &key)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional, scope),
            Expr::New { class, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                construct(class, values)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::Str(value.type_of().to_string()),
                })
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Arrow(def) => Ok(Value::Function(Arc::new(Closure {
                def: Arc::clone(def),
                captured: scope.clone(),
            }))),
            Expr::Assign(name, value) => {
                let value = self.eval(value, scope)?;
                let binding = scope
                    .iter_mut()
                    .rev()
                    .find(|b| &b.name == name)
                    .ok_or_else(|| ScriptError::Reference(name.clone()))?;
                if !binding.mutable {
                    return Err(ScriptError::Type(format!(
                        "assignment to constant variable '{name}'"
                    )));
                }
                binding.value = value.clone();
                Ok(value)
            }
        }
    }

    fn property_key(&mut self, property: &Property, scope: &mut Vec<Binding>) -> Result<String, ScriptError> {
        match property {
            Property::Named(name) => Ok(name.clone()),
            Property::Computed(expr) => Ok(self.eval(expr, scope)?.to_js_string()),
        }
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        optional: bool,
        scope: &mut Vec<Binding>,
    ) -> Result<Value, ScriptError> {
        // Method calls keep their receiver so built-ins can dispatch on it.
        if let Expr::Member {
            object,
            property,
            optional: optional_member,
        } = callee
        {
            let receiver = self.eval(object, scope)?;
            if *optional_member && receiver.is_nullish() {
                return Ok(Value::Undefined);
            }
            let name = self.property_key(property, scope)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg, scope)?);
            }
            if let Some(field) = receiver.get_field(&name) {
                if optional && field.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let field = field.clone();
                return self.call(&field, values);
            }
            return self.call_method(&receiver, &name, values);
        }

        let function = self.eval(callee, scope)?;
        if optional && function.is_nullish() {
            return Ok(Value::Undefined);
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        self.call(&function, values)
    }

    fn call_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.tick()?;
        match receiver {
            Value::Str(s) => self.string_method(s, name, args),
            Value::Array(items) => self.array_method(items, name, args),
            Value::Number(n) => number_method(*n, name, &args),
            Value::Regex(re) => match name {
                "test" => Ok(Value::Bool(re.regex.is_match(&arg_string(&args, 0)))),
                "toString" => Ok(Value::Str(receiver.to_js_string())),
                _ => Err(not_a_function("RegExp", name)),
            },
            Value::Namespace(Namespace::Json) => json_method(name, &args),
            Value::Namespace(Namespace::Math) => math_method(name, &args),
            Value::Undefined | Value::Null => Err(ScriptError::Type(format!(
                "cannot read properties of {} (reading '{name}')",
                receiver.to_js_string()
            ))),
            Value::Bool(_) | Value::Object(_) | Value::Function(_) | Value::Native(_)
                if name == "toString" =>
            {
                Ok(Value::Str(receiver.to_js_string()))
            }
            _ => Err(not_a_function(receiver.type_of(), name)),
        }
    }

    fn string_method(&mut self, s: &str, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        let chars: Vec<char> = s.chars().collect();
        let len = chars.len() as f64;
        let value = match name {
            "trim" => Value::Str(s.trim().to_string()),
            "trimStart" => Value::Str(s.trim_start().to_string()),
            "trimEnd" => Value::Str(s.trim_end().to_string()),
            "toUpperCase" => Value::Str(s.to_uppercase()),
            "toLowerCase" => Value::Str(s.to_lowercase()),
            "toString" => Value::Str(s.to_string()),
            "slice" => {
                let start = relative_index(args.first(), len, 0.0);
                let end = relative_index(args.get(1), len, len);
                Value::Str(char_range(&chars, start, end))
            }
            "substring" => {
                let clamp = |v: Option<&Value>, default: f64| match v {
                    None | Some(Value::Undefined) => default,
                    Some(v) => integer(v).clamp(0.0, len),
                };
                let a = clamp(args.first(), 0.0);
                let b = clamp(args.get(1), len);
                Value::Str(char_range(&chars, a.min(b) as usize, a.max(b) as usize))
            }
            "charAt" => {
                let i = args.first().map(integer).unwrap_or(0.0);
                if i < 0.0 || i >= len {
                    Value::Str(String::new())
                } else {
                    Value::Str(chars[i as usize].to_string())
                }
            }
            "at" => {
                let i = args.first().map(integer).unwrap_or(0.0);
                let i = if i < 0.0 { len + i } else { i };
                if i < 0.0 || i >= len {
                    Value::Undefined
                } else {
                    Value::Str(chars[i as usize].to_string())
                }
            }
            "includes" => Value::Bool(s.contains(arg_string(&args, 0).as_str())),
            "startsWith" => Value::Bool(s.starts_with(arg_string(&args, 0).as_str())),
            "endsWith" => Value::Bool(s.ends_with(arg_string(&args, 0).as_str())),
            "indexOf" => {
                let needle = arg_string(&args, 0);
                Value::Number(match s.find(&needle) {
                    Some(byte) => s[..byte].chars().count() as f64,
                    None => -1.0,
                })
            }
            "repeat" => {
                let n = args.first().map(integer).unwrap_or(0.0);
                if n < 0.0 || n.is_infinite() {
                    return Err(ScriptError::Range(format!("invalid count value: {}", format_number(n))));
                }
                if s.len() as f64 * n > MAX_BUILT_STRING as f64 {
                    return Err(ScriptError::Range("invalid string length".to_string()));
                }
                Value::Str(s.repeat(n as usize))
            }
            "padStart" | "padEnd" => {
                let target = args.first().map(integer).unwrap_or(0.0);
                let fill = match args.get(1) {
                    None | Some(Value::Undefined) => " ".to_string(),
                    Some(v) => v.to_js_string(),
                };
                if target > MAX_BUILT_STRING as f64 {
                    return Err(ScriptError::Range("invalid string length".to_string()));
                }
                if target <= len || fill.is_empty() {
                    Value::Str(s.to_string())
                } else {
                    let pad: String = fill.chars().cycle().take((target - len) as usize).collect();
                    if name == "padStart" {
                        Value::Str(pad + s)
                    } else {
                        Value::Str(format!("{s}{pad}"))
                    }
                }
            }
            "split" => {
                let limit = match args.get(1) {
                    None | Some(Value::Undefined) => usize::MAX,
                    Some(v) => integer(v).max(0.0) as usize,
                };
                let parts: Vec<Value> = match args.first() {
                    None | Some(Value::Undefined) => vec![Value::Str(s.to_string())],
                    Some(Value::Regex(re)) => re
                        .regex
                        .split(s)
                        .map(|p| Value::Str(p.to_string()))
                        .collect(),
                    Some(sep) => {
                        let sep = sep.to_js_string();
                        if sep.is_empty() {
                            chars.iter().map(|c| Value::Str(c.to_string())).collect()
                        } else {
                            s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect()
                        }
                    }
                };
                Value::Array(parts.into_iter().take(limit).collect())
            }
            "replace" | "replaceAll" => {
                let all = name == "replaceAll";
                let pattern = args.first().cloned().unwrap_or(Value::Undefined);
                let replacement = args.get(1).cloned().unwrap_or(Value::Undefined);
                Value::Str(self.replace(s, &pattern, &replacement, all)?)
            }
            "match" => {
                let re = match args.first() {
                    Some(Value::Regex(re)) => Arc::clone(re),
                    other => {
                        let source = other.map(Value::to_js_string).unwrap_or_default();
                        let regex = regex::Regex::new(&source)
                            .map_err(|e| ScriptError::Thrown(format!("SyntaxError: {e}")))?;
                        Arc::new(RegexValue {
                            regex,
                            source,
                            flags: String::new(),
                        })
                    }
                };
                if re.global() {
                    let found: Vec<Value> = re
                        .regex
                        .find_iter(s)
                        .map(|m| Value::Str(m.as_str().to_string()))
                        .collect();
                    if found.is_empty() {
                        Value::Null
                    } else {
                        Value::Array(found)
                    }
                } else {
                    match re.regex.captures(s) {
                        Some(caps) => Value::Array(
                            caps.iter()
                                .map(|m| {
                                    m.map(|m| Value::Str(m.as_str().to_string()))
                                        .unwrap_or(Value::Undefined)
                                })
                                .collect(),
                        ),
                        None => Value::Null,
                    }
                }
            }
            _ => return Err(not_a_function("string", name)),
        };
        Ok(value)
    }

    fn replace(
        &mut self,
        s: &str,
        pattern: &Value,
        replacement: &Value,
        all: bool,
    ) -> Result<String, ScriptError> {
        let (regex, all) = match pattern {
            Value::Regex(re) => (re.regex.clone(), all || re.global()),
            other => (
                regex::Regex::new(&regex::escape(&other.to_js_string()))
                    .map_err(|e| ScriptError::Thrown(format!("SyntaxError: {e}")))?,
                all,
            ),
        };

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in regex.captures_iter(s) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&s[last..whole.start()]);
            if replacement.is_callable() {
                let mut args: Vec<Value> = caps
                    .iter()
                    .map(|m| {
                        m.map(|m| Value::Str(m.as_str().to_string()))
                            .unwrap_or(Value::Undefined)
                    })
                    .collect();
                args.push(Value::Number(s[..whole.start()].chars().count() as f64));
                args.push(Value::Str(s.to_string()));
                out.push_str(&self.call(replacement, args)?.to_js_string());
            } else {
                let template = replacement.to_js_string();
                expand_replacement(&template, &caps, &mut out);
            }
            last = whole.end();
            if !all {
                break;
            }
        }
        out.push_str(&s[last..]);
        Ok(out)
    }

    fn array_method(&mut self, items: &[Value], name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        let len = items.len() as f64;
        let value = match name {
            "join" => {
                let sep = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(v) => v.to_js_string(),
                };
                Value::Str(
                    items
                        .iter()
                        .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                        .collect::<Vec<_>>()
                        .join(&sep),
                )
            }
            "map" | "filter" | "find" | "some" | "every" => {
                let callback = args.first().cloned().unwrap_or(Value::Undefined);
                let mut mapped = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let result = self.call(
                        &callback,
                        vec![item.clone(), Value::Number(i as f64)],
                    )?;
                    match name {
                        "map" => mapped.push(result),
                        "filter" if result.truthy() => mapped.push(item.clone()),
                        "find" if result.truthy() => return Ok(item.clone()),
                        "some" if result.truthy() => return Ok(Value::Bool(true)),
                        "every" if !result.truthy() => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                match name {
                    "find" => Value::Undefined,
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    _ => Value::Array(mapped),
                }
            }
            "slice" => {
                let start = relative_index(args.first(), len, 0.0);
                let end = relative_index(args.get(1), len, len);
                Value::Array(items.get(start..end.max(start)).unwrap_or(&[]).to_vec())
            }
            "includes" => {
                let needle = args.first().cloned().unwrap_or(Value::Undefined);
                Value::Bool(items.iter().any(|v| v.strict_equals(&needle)))
            }
            "indexOf" => {
                let needle = args.first().cloned().unwrap_or(Value::Undefined);
                Value::Number(
                    items
                        .iter()
                        .position(|v| v.strict_equals(&needle))
                        .map(|i| i as f64)
                        .unwrap_or(-1.0),
                )
            }
            "at" => {
                let i = args.first().map(integer).unwrap_or(0.0);
                let i = if i < 0.0 { len + i } else { i };
                if i < 0.0 || i >= len {
                    Value::Undefined
                } else {
                    items[i as usize].clone()
                }
            }
            "toString" => Value::Str(Value::Array(items.to_vec()).to_js_string()),
            _ => return Err(not_a_function("array", name)),
        };
        Ok(value)
    }
}

fn lookup(name: &str, scope: &[Binding]) -> Result<Value, ScriptError> {
    if let Some(binding) = scope.iter().rev().find(|b| b.name == name) {
        return Ok(binding.value.clone());
    }
    let global = match name {
        "JSON" => Value::Namespace(Namespace::Json),
        "Math" => Value::Namespace(Namespace::Math),
        "String" => Value::Native(Native::String),
        "Number" => Value::Native(Native::Number),
        "Boolean" => Value::Native(Native::Boolean),
        "parseInt" => Value::Native(Native::ParseInt),
        "parseFloat" => Value::Native(Native::ParseFloat),
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        _ => return Err(ScriptError::Reference(name.to_string())),
    };
    Ok(global)
}

fn get_property(object: &Value, key: &str) -> Result<Value, ScriptError> {
    let value = match object {
        Value::Undefined | Value::Null => {
            return Err(ScriptError::Type(format!(
                "cannot read properties of {} (reading '{key}')",
                object.to_js_string()
            )))
        }
        Value::Str(s) => match key {
            "length" => Value::Number(s.chars().count() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Undefined),
        },
        Value::Array(items) => match key {
            "length" => Value::Number(items.len() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Undefined),
        },
        Value::Object(_) => object.get_field(key).cloned().unwrap_or(Value::Undefined),
        Value::Regex(re) => match key {
            "source" => Value::Str(re.source.clone()),
            "flags" => Value::Str(re.flags.clone()),
            "global" => Value::Bool(re.global()),
            _ => Value::Undefined,
        },
        Value::Namespace(Namespace::Math) => match key {
            "PI" => Value::Number(std::f64::consts::PI),
            "E" => Value::Number(std::f64::consts::E),
            _ => Value::Undefined,
        },
        Value::Function(closure) if key == "length" => {
            Value::Number(closure.def.params.len() as f64)
        }
        _ => Value::Undefined,
    };
    Ok(value)
}

fn construct(class: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    if !class.ends_with("Error") {
        return Err(ScriptError::Type(format!("{class} is not a constructor")));
    }
    let message = match args.into_iter().next() {
        None | Some(Value::Undefined) => String::new(),
        Some(v) => v.to_js_string(),
    };
    Ok(Value::Object(vec![
        ("name".to_string(), Value::Str(class.to_string())),
        ("message".to_string(), Value::Str(message)),
    ]))
}

/// Message for a `throw`n value; error objects render as `Name: message`.
fn describe_thrown(value: &Value) -> String {
    match (value.get_field("name"), value.get_field("message")) {
        (Some(Value::Str(name)), Some(Value::Str(message))) if message.is_empty() => name.clone(),
        (Some(Value::Str(name)), Some(Value::Str(message))) => format!("{name}: {message}"),
        _ => format!("Uncaught {}", value.to_js_string()),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| !matches!(v, Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_));
            if stringy(left) || stringy(right) {
                Value::Str(left.to_js_string() + &right.to_js_string())
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
        BinaryOp::LooseEq => Value::Bool(left.loose_equals(right)),
        BinaryOp::LooseNe => Value::Bool(!left.loose_equals(right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn call_native(native: Native, args: &[Value]) -> Result<Value, ScriptError> {
    let first = args.first().cloned().unwrap_or(Value::Undefined);
    Ok(match native {
        Native::String => Value::Str(if args.is_empty() {
            String::new()
        } else {
            first.to_js_string()
        }),
        Native::Number => Value::Number(if args.is_empty() { 0.0 } else { first.to_number() }),
        Native::Boolean => Value::Bool(first.truthy()),
        Native::ParseFloat => Value::Number(parse_float_prefix(&first.to_js_string())),
        Native::ParseInt => {
            let radix = match args.get(1) {
                None | Some(Value::Undefined) => 10,
                Some(v) => v.to_number() as u32,
            };
            Value::Number(parse_int_prefix(&first.to_js_string(), radix))
        }
    })
}

fn parse_int_prefix(s: &str, radix: u32) -> f64 {
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let s = s.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let digits: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64);
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;
    for (i, c) in s.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            c if c.is_ascii_digit() => seen_digit = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return f64::NAN;
    }
    parse_number(&s[..end])
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match name {
        "toFixed" => {
            let digits = args.first().map(integer).unwrap_or(0.0);
            if !(0.0..=100.0).contains(&digits) {
                return Err(ScriptError::Range("toFixed() digits out of range".to_string()));
            }
            Ok(Value::Str(format!("{:.*}", digits as usize, n)))
        }
        "toString" => Ok(Value::Str(format_number(n))),
        _ => Err(not_a_function("number", name)),
    }
}

fn json_method(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match name {
        "parse" => {
            let text = arg_string(args, 0);
            serde_json::from_str::<serde_json::Value>(&text)
                .map(Value::from_json)
                .map_err(|e| ScriptError::Thrown(format!("SyntaxError: {e}")))
        }
        "stringify" => {
            let Some(json) = args.first().and_then(Value::to_json) else {
                return Ok(Value::Undefined);
            };
            let pretty = args.get(2).map(|v| v.to_number() > 0.0).unwrap_or(false);
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map(Value::Str)
                .map_err(|e| ScriptError::Type(e.to_string()))
        }
        _ => Err(not_a_function("JSON", name)),
    }
}

fn math_method(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    let nums: Vec<f64> = args.iter().map(Value::to_number).collect();
    let x = nums.first().copied().unwrap_or(f64::NAN);
    let value = match name {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        // rounds half up, unlike f64::round which rounds half away from zero
        "round" => (x + 0.5).floor(),
        "abs" => x.abs(),
        "trunc" => x.trunc(),
        "sqrt" => x.sqrt(),
        "min" => nums.iter().copied().fold(f64::INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            }
        }),
        "max" => nums.iter().copied().fold(f64::NEG_INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.max(b)
            }
        }),
        _ => return Err(not_a_function("Math", name)),
    };
    Ok(Value::Number(value))
}

fn not_a_function(owner: &str, name: &str) -> ScriptError {
    ScriptError::Type(format!("{owner}.{name} is not a function"))
}

fn arg_string(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_js_string).unwrap_or_else(|| "undefined".to_string())
}

fn integer(v: &Value) -> f64 {
    let n = v.to_number();
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

/// Resolves a possibly negative index against `len`, clamped to `0..=len`.
fn relative_index(v: Option<&Value>, len: f64, default: f64) -> usize {
    let n = match v {
        None | Some(Value::Undefined) => default,
        Some(v) => integer(v),
    };
    let n = if n < 0.0 { (len + n).max(0.0) } else { n.min(len) };
    n as usize
}

fn char_range(chars: &[char], start: usize, end: usize) -> String {
    if start >= end {
        return String::new();
    }
    chars[start..end.min(chars.len())].iter().collect()
}

/// Expands `$&`, `$n` and `$$` in a replacement template.
fn expand_replacement(template: &str, caps: &regex::Captures<'_>, out: &mut String) {
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('&') => {
                chars.next();
                out.push_str(caps.get(0).map(|m| m.as_str()).unwrap_or(""));
            }
            Some(d) if d.is_ascii_digit() => {
                chars.next();
                let mut index = d.to_digit(10).unwrap_or(0) as usize;
                if let Some(d2) = chars.peek().and_then(|c| c.to_digit(10)) {
                    let two = index * 10 + d2 as usize;
                    if two < caps.len() {
                        chars.next();
                        index = two;
                    }
                }
                if index > 0 && index < caps.len() {
                    out.push_str(caps.get(index).map(|m| m.as_str()).unwrap_or(""));
                } else {
                    out.push('$');
                    out.push(d);
                }
            }
            _ => out.push('$'),
        }
    }
}
