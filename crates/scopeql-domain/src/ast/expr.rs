//! Derived-value expressions used by updates.
//!
//! The wire shape is a math.js node tree wrapped as
//! `{"__f_expr": true, "ast": <node>}`. Only field references, numeric
//! constants, the four arithmetic operators and a small set of functions
//! are accepted.

use std::collections::BTreeSet;

use serde_json::{Number, Value};

use crate::error::{DomainError, DomainResult};
use crate::model::Row;

const F_EXPR_MARKER: &str = "__f_expr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprFunction {
    Abs,
    Round,
    Floor,
    Ceil,
    Min,
    Max,
}

impl ExprFunction {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

/// Arithmetic over the current row's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedExpr {
    Field(String),
    Constant(Number),
    Binary {
        op: BinaryOp,
        left: Box<DerivedExpr>,
        right: Box<DerivedExpr>,
    },
    Call {
        function: ExprFunction,
        args: Vec<DerivedExpr>,
    },
}

impl DerivedExpr {
    /// Whether a data value is a wrapped derived expression.
    pub fn is_wrapped(value: &Value) -> bool {
        value
            .get(F_EXPR_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
            && value.get("ast").is_some()
    }

    /// Parses a wrapped expression for the data key `field`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming `field` if the tree is
    /// malformed or uses an unsupported node, operator or function.
    pub fn parse_wrapped(field: &str, value: &Value) -> DomainResult<Self> {
        let ast = value
            .get("ast")
            .ok_or_else(|| invalid(field, "missing 'ast'"))?;
        Self::parse_node(ast).map_err(|reason| invalid(field, &reason))
    }

    fn parse_node(node: &Value) -> Result<Self, String> {
        let kind = node
            .get("mathjs")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing node type in {node}"))?;

        match kind {
            "SymbolNode" => {
                let name = node
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .ok_or("field name is required")?;
                if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(format!("invalid field name: {name}"));
                }
                Ok(Self::Field(name.to_string()))
            }
            "ConstantNode" => match node.get("value") {
                Some(Value::Number(n)) => Ok(Self::Constant(n.clone())),
                Some(other) => Err(format!("constant must be numeric, got {other}")),
                None => Err("constant node is missing 'value'".to_string()),
            },
            "OperatorNode" => {
                let op_name = node.get("op").and_then(Value::as_str).unwrap_or_default();
                let op = BinaryOp::parse(op_name)
                    .ok_or_else(|| format!("unsupported operator: {op_name}"))?;
                let args = node.get("args").and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
                let [left, right] = args else {
                    return Err(format!(
                        "expected 2 arguments for operator {op_name}, got {}",
                        args.len()
                    ));
                };
                Ok(Self::Binary {
                    op,
                    left: Box::new(Self::parse_node(left)?),
                    right: Box::new(Self::parse_node(right)?),
                })
            }
            "FunctionNode" => {
                let fn_node = node.get("fn").ok_or("function node missing 'fn'")?;
                if fn_node.get("mathjs").and_then(Value::as_str) != Some("SymbolNode") {
                    return Err(format!("unsupported function node structure: {fn_node}"));
                }
                let name = fn_node
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("function name not found")?;
                let function = ExprFunction::parse(name)
                    .ok_or_else(|| format!("unsupported function: {name}"))?;
                let args = node.get("args").and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
                if args.is_empty() {
                    return Err(format!("function {name} requires at least one argument"));
                }
                let args = args
                    .iter()
                    .map(Self::parse_node)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Call { function, args })
            }
            "ParenthesisNode" => {
                let content = node.get("content").ok_or("parenthesis node missing 'content'")?;
                Self::parse_node(content)
            }
            other => Err(format!("unsupported node type: {other}")),
        }
    }

    /// Every field name the expression reads.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Field(name) => {
                out.insert(name.clone());
            }
            Self::Constant(_) => {}
            Self::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_fields(out);
                }
            }
        }
    }

    /// Evaluates the expression against a stored row.
    ///
    /// Integer inputs stay integers except under division. A null column
    /// makes the whole result null.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for non-numeric columns, integer
    /// overflow and division by zero.
    pub fn evaluate(&self, row: &Row) -> DomainResult<Value> {
        Ok(match self.eval(row)? {
            Some(Num::Int(i)) => Value::from(i),
            Some(Num::Float(f)) => Number::from_f64(f).map_or(Value::Null, Value::Number),
            None => Value::Null,
        })
    }

    fn eval(&self, row: &Row) -> DomainResult<Option<Num>> {
        match self {
            Self::Field(name) => match row.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Number(n)) => Ok(Some(Num::from_number(n))),
                Some(other) => Err(DomainError::validation(format!(
                    "Field '{name}' is not numeric: {other}"
                ))),
            },
            Self::Constant(n) => Ok(Some(Num::from_number(n))),
            Self::Binary { op, left, right } => {
                let (Some(l), Some(r)) = (left.eval(row)?, right.eval(row)?) else {
                    return Ok(None);
                };
                l.apply(*op, r).map(Some)
            }
            Self::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match arg.eval(row)? {
                        Some(v) => values.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Num::call(*function, &values))
            }
        }
    }
}

fn invalid(field: &str, reason: &str) -> DomainError {
    DomainError::validation(format!("Invalid F expression for field {field}: {reason}"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_number(n: &Number) -> Self {
        match n.as_i64() {
            Some(i) => Num::Int(i),
            None => Num::Float(n.as_f64().unwrap_or(f64::NAN)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn apply(self, op: BinaryOp, rhs: Num) -> DomainResult<Num> {
        let overflow = || DomainError::validation("Integer overflow in F expression");
        match (self, rhs, op) {
            (_, _, BinaryOp::Div) => {
                let divisor = rhs.as_f64();
                if divisor == 0.0 {
                    return Err(DomainError::validation("Division by zero in F expression"));
                }
                Ok(Num::Float(self.as_f64() / divisor))
            }
            (Num::Int(a), Num::Int(b), BinaryOp::Add) => a.checked_add(b).map(Num::Int).ok_or_else(overflow),
            (Num::Int(a), Num::Int(b), BinaryOp::Sub) => a.checked_sub(b).map(Num::Int).ok_or_else(overflow),
            (Num::Int(a), Num::Int(b), BinaryOp::Mul) => a.checked_mul(b).map(Num::Int).ok_or_else(overflow),
            (a, b, BinaryOp::Add) => Ok(Num::Float(a.as_f64() + b.as_f64())),
            (a, b, BinaryOp::Sub) => Ok(Num::Float(a.as_f64() - b.as_f64())),
            (a, b, BinaryOp::Mul) => Ok(Num::Float(a.as_f64() * b.as_f64())),
        }
    }

    fn call(function: ExprFunction, args: &[Num]) -> Option<Num> {
        let first = *args.first()?;
        let result = match function {
            ExprFunction::Abs => match first {
                Num::Int(i) => Num::Int(i.saturating_abs()),
                Num::Float(f) => Num::Float(f.abs()),
            },
            ExprFunction::Round => round_with(first, f64::round),
            ExprFunction::Floor => round_with(first, f64::floor),
            ExprFunction::Ceil => round_with(first, f64::ceil),
            ExprFunction::Min => args
                .iter()
                .copied()
                .fold(first, |acc, n| if n.as_f64() < acc.as_f64() { n } else { acc }),
            ExprFunction::Max => args
                .iter()
                .copied()
                .fold(first, |acc, n| if n.as_f64() > acc.as_f64() { n } else { acc }),
        };
        Some(result)
    }
}

fn round_with(n: Num, f: fn(f64) -> f64) -> Num {
    match n {
        Num::Int(i) => Num::Int(i),
        Num::Float(x) => Num::Float(f(x)),
    }
}
