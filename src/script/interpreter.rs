//! Line-oriented directive interpreter.
//!
//! One statement per line; blank lines and lines starting with `#` or `//`
//! are skipped.
//!
//! | Statement                   | Effect                                        |
//! |-----------------------------|-----------------------------------------------|
//! | `print <expr> [<expr>…]`    | append one line, arguments joined by a space  |
//! | `let <name> = <expr>`       | bind a variable                               |
//! | `return [<expr>]`           | finish with a value (bare: no value)          |
//! | `call <method> [<expr>]`    | remote call, result discarded                 |
//! | `sleep <millis>`            | cancellable pause                             |
//! | `session.set <key> <expr>`  | store a session value                         |
//! | `session.delete <key>`      | remove a session value                        |
//! | `session.clear`             | remove every session value                    |
//! | `fail <message>`            | fail the execution                            |
//!
//! Expressions are JSON literals, `$name` variables,
//! `call <method> [<expr>]`, or `session.get <key>`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use super::{ScriptContext, ScriptEngine, ScriptFuture};
use crate::{AppError, Result};

/// Engine running scripts through [`Interpreter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveEngine;

impl DirectiveEngine {
    /// Create the engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for DirectiveEngine {
    fn run<'a>(&'a self, script: &'a str, ctx: ScriptContext) -> ScriptFuture<'a> {
        Box::pin(async move { Interpreter::new(ctx).run(script).await })
    }
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(String),
    Call {
        method: String,
        params: Option<Box<Expr>>,
    },
    SessionGet(String),
}

type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Control flow after a statement.
enum Flow {
    Continue,
    Return(Option<Value>),
}

/// Interpreter state for one script run.
pub struct Interpreter {
    ctx: ScriptContext,
    vars: HashMap<String, Value>,
}

impl Interpreter {
    /// Create an interpreter over `ctx` with no variables bound.
    #[must_use]
    pub fn new(ctx: ScriptContext) -> Self {
        Self {
            ctx,
            vars: HashMap::new(),
        }
    }

    /// Run `script` to completion.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Script("line N: …")` for statement failures,
    /// `AppError::Cancelled` once the token fires, and remote errors as
    /// reported by the service.
    pub async fn run(mut self, script: &str) -> Result<Option<Value>> {
        for (index, raw) in script.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            if self.ctx.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            trace!(line = index + 1, statement = line, "interpreter: statement");
            match self.statement(line).await.map_err(|err| err.at_line(index + 1))? {
                Flow::Continue => {}
                Flow::Return(value) => return Ok(value),
            }
        }

        Ok(None)
    }

    async fn statement(&mut self, line: &str) -> Result<Flow> {
        let (keyword, rest) = split_word(line);

        match keyword {
            "print" => {
                let text = match parse_print_args(rest) {
                    Ok(args) => {
                        let mut parts = Vec::with_capacity(args.len());
                        for arg in &args {
                            parts.push(render(&self.eval(arg).await?));
                        }
                        parts.join(" ")
                    }
                    Err(_) => rest.to_owned(),
                };
                self.ctx.print(text);
            }
            "let" => {
                let (name, expr) = rest.split_once('=').ok_or_else(|| {
                    AppError::Script("expected `let <name> = <expr>`".into())
                })?;
                let name = name.trim();
                if !is_identifier(name) {
                    return Err(AppError::Script(format!("invalid variable name `{name}`")));
                }
                let value = self.eval(&parse_expr(expr.trim())?).await?;
                self.vars.insert(name.to_owned(), value);
            }
            "return" => {
                if rest.is_empty() {
                    return Ok(Flow::Return(None));
                }
                let value = self.eval(&parse_expr(rest)?).await?;
                return Ok(Flow::Return(Some(value)));
            }
            "call" => {
                self.eval(&parse_call(rest)?).await?;
            }
            "sleep" => {
                let millis: u64 = rest
                    .parse()
                    .map_err(|_| AppError::Script(format!("invalid sleep duration `{rest}`")))?;
                tokio::select! {
                    biased;
                    () = self.ctx.cancel.cancelled() => return Err(AppError::Cancelled),
                    () = tokio::time::sleep(Duration::from_millis(millis)) => {}
                }
            }
            "session.set" => {
                let (key, expr) = split_word(rest);
                if key.is_empty() || expr.is_empty() {
                    return Err(AppError::Script("expected `session.set <key> <expr>`".into()));
                }
                let value = self.eval(&parse_expr(expr)?).await?;
                self.ctx.session.set(key, value);
            }
            "session.delete" => {
                if rest.is_empty() {
                    return Err(AppError::Script("expected `session.delete <key>`".into()));
                }
                self.ctx.session.delete(rest);
            }
            "session.clear" => self.ctx.session.clear(),
            "fail" => {
                let message = if rest.is_empty() { "script failed" } else { rest };
                return Err(AppError::Script(message.to_owned()));
            }
            other => {
                return Err(AppError::Script(format!("unknown statement `{other}`")));
            }
        }

        Ok(Flow::Continue)
    }

    fn eval<'a>(&'a self, expr: &'a Expr) -> EvalFuture<'a> {
        Box::pin(async move {
            match expr {
                Expr::Literal(value) => Ok(value.clone()),
                Expr::Var(name) => self
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| AppError::Script(format!("undefined variable `${name}`"))),
                Expr::SessionGet(key) => Ok(self.ctx.session.get(key).unwrap_or(Value::Null)),
                Expr::Call { method, params } => {
                    let params = match params {
                        Some(expr) => Some(self.eval(expr).await?),
                        None => None,
                    };
                    self.ctx.remote.call(method, params).await
                }
            }
        })
    }
}

/// Split off the first whitespace-delimited word.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_expr(text: &str) -> Result<Expr> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Script("missing expression".into()));
    }

    if let Some(name) = text.strip_prefix('$') {
        if !is_identifier(name) {
            return Err(AppError::Script(format!("invalid variable `{text}`")));
        }
        return Ok(Expr::Var(name.to_owned()));
    }

    let (keyword, rest) = split_word(text);
    match keyword {
        "call" => parse_call(rest),
        "session.get" if !rest.is_empty() => Ok(Expr::SessionGet(rest.to_owned())),
        _ => serde_json::from_str(text)
            .map(Expr::Literal)
            .map_err(|err| AppError::Script(format!("invalid expression `{text}`: {err}"))),
    }
}

/// A single expression, else whitespace-separated `$name` and JSON literal
/// arguments.
fn parse_print_args(text: &str) -> Result<Vec<Expr>> {
    if let Ok(expr) = parse_expr(text) {
        return Ok(vec![expr]);
    }

    let mut args = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if rest.starts_with('$') {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let (arg, tail) = rest.split_at(end);
            args.push(parse_expr(arg)?);
            rest = tail.trim_start();
            continue;
        }

        let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => {
                args.push(Expr::Literal(value));
                rest = rest[values.byte_offset()..].trim_start();
            }
            Some(Err(err)) => {
                return Err(AppError::Script(format!("invalid argument `{rest}`: {err}")));
            }
            None => break,
        }
    }

    if args.is_empty() {
        return Err(AppError::Script("missing expression".into()));
    }
    Ok(args)
}

fn parse_call(text: &str) -> Result<Expr> {
    let (method, rest) = split_word(text);
    if method.is_empty() {
        return Err(AppError::Script("expected `call <method> [<params>]`".into()));
    }
    let params = if rest.is_empty() {
        None
    } else {
        Some(Box::new(parse_expr(rest)?))
    };
    Ok(Expr::Call {
        method: method.to_owned(),
        params,
    })
}

/// Strings print raw; everything else as 2-space pretty JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
