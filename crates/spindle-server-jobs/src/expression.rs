// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Default-value expressions for job parameters.
//!
//! The grammar lives in `expression.pest`: numbers, single-quoted text,
//! `true`/`false`, function calls, parentheses, unary minus and the four
//! arithmetic operators with the usual precedence.
//!
//! Functions: `now()`, `now_millis()`, `env('NAME')`, `uuid()`.
//!
//! Integer arithmetic stays integer and mixed arithmetic promotes to float.
//! `+` concatenates when either side is text, and a date plus or minus an
//! integer shifts the date by that many milliseconds.

use chrono::{Duration, Utc};
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;
use std::fmt;
use std::str::FromStr;

use crate::value::RawValue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
	#[error("syntax error at position {position}: {message}")]
	Syntax { position: usize, message: String },

	#[error("invalid number literal '{0}'")]
	InvalidNumber(String),

	#[error("unknown function {0}()")]
	UnknownFunction(String),

	#[error("{function}() expects {expected} argument(s), got {actual}")]
	Arity {
		function: String,
		expected: usize,
		actual: usize,
	},

	#[error("invalid argument to {function}(): {message}")]
	InvalidArgument { function: String, message: String },

	#[error("environment variable {0} is not set")]
	MissingEnv(String),

	#[error("cannot apply '{op}' to {left} and {right}")]
	TypeMismatch {
		op: char,
		left: &'static str,
		right: &'static str,
	},

	#[error("division by zero")]
	DivisionByZero,

	#[error("arithmetic overflow")]
	Overflow,
}

impl From<pest::error::Error<Rule>> for ExpressionError {
	fn from(e: pest::error::Error<Rule>) -> Self {
		let position = match e.location {
			InputLocation::Pos(pos) => pos,
			InputLocation::Span((start, _)) => start,
		};
		ExpressionError::Syntax {
			position,
			message: e.variant.message().into_owned(),
		}
	}
}

#[derive(pest_derive::Parser)]
#[grammar = "expression.pest"]
struct ExpressionParser;

#[derive(Debug, Clone, PartialEq)]
enum Expr {
	Literal(RawValue),
	Call { name: String, args: Vec<Expr> },
	Neg(Box<Expr>),
	Binary {
		op: char,
		left: Box<Expr>,
		right: Box<Expr>,
	},
}

fn malformed(pair: &Pair<'_, Rule>) -> ExpressionError {
	ExpressionError::Syntax {
		position: pair.as_span().start(),
		message: format!("malformed {:?}", pair.as_rule()),
	}
}

fn build_ast(pair: Pair<'_, Rule>) -> Result<Expr, ExpressionError> {
	match pair.as_rule() {
		Rule::expr | Rule::term => {
			let at = malformed(&pair);
			let mut pairs = pair.into_inner();
			let mut left = build_ast(pairs.next().ok_or(at)?)?;
			while let Some(op) = pairs.next() {
				let op_char = op.as_str().chars().next().ok_or_else(|| malformed(&op))?;
				let right = build_ast(pairs.next().ok_or_else(|| malformed(&op))?)?;
				left = Expr::Binary {
					op: op_char,
					left: Box::new(left),
					right: Box::new(right),
				};
			}
			Ok(left)
		}
		Rule::unary => {
			let at = malformed(&pair);
			let mut negations = 0;
			let mut operand = None;
			for inner in pair.into_inner() {
				match inner.as_rule() {
					Rule::neg => negations += 1,
					_ => operand = Some(build_ast(inner)?),
				}
			}
			let mut expr = operand.ok_or(at)?;
			for _ in 0..negations {
				expr = Expr::Neg(Box::new(expr));
			}
			Ok(expr)
		}
		Rule::number => parse_number(pair.as_str()).map(Expr::Literal),
		Rule::text => {
			let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
			Ok(Expr::Literal(RawValue::Text(text.to_string())))
		}
		Rule::boolean => Ok(Expr::Literal(RawValue::Bool(pair.as_str() == "true"))),
		Rule::call => {
			let at = malformed(&pair);
			let mut pairs = pair.into_inner();
			let name = pairs.next().ok_or(at)?.as_str().to_string();
			let args = pairs.map(build_ast).collect::<Result<Vec<_>, _>>()?;
			Ok(Expr::Call { name, args })
		}
		_ => Err(malformed(&pair)),
	}
}

fn parse_number(literal: &str) -> Result<RawValue, ExpressionError> {
	if literal.contains('.') {
		literal
			.parse()
			.map(RawValue::Float)
			.map_err(|_| ExpressionError::InvalidNumber(literal.to_string()))
	} else {
		literal
			.parse()
			.map(RawValue::Integer)
			.map_err(|_| ExpressionError::InvalidNumber(literal.to_string()))
	}
}

/// A parsed default-value expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
	source: String,
	root: Expr,
}

impl Expression {
	pub fn parse(source: &str) -> Result<Self, ExpressionError> {
		let expression = ExpressionParser::parse(Rule::expression, source)?
			.next()
			.ok_or_else(|| ExpressionError::Syntax {
				position: 0,
				message: "empty expression".to_string(),
			})?;
		let at = malformed(&expression);
		let expr = expression
			.into_inner()
			.find(|p| p.as_rule() == Rule::expr)
			.ok_or(at)?;

		Ok(Self {
			source: source.to_string(),
			root: build_ast(expr)?,
		})
	}

	pub fn source(&self) -> &str {
		&self.source
	}

	pub fn evaluate(&self) -> Result<RawValue, ExpressionError> {
		eval(&self.root)
	}
}

impl FromStr for Expression {
	type Err = ExpressionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Expression::parse(s)
	}
}

impl fmt::Display for Expression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.source)
	}
}

fn eval(expr: &Expr) -> Result<RawValue, ExpressionError> {
	match expr {
		Expr::Literal(v) => Ok(v.clone()),
		Expr::Neg(inner) => match eval(inner)? {
			RawValue::Integer(i) => i.checked_neg().map(RawValue::Integer).ok_or(ExpressionError::Overflow),
			RawValue::Float(f) => Ok(RawValue::Float(-f)),
			other => Err(ExpressionError::TypeMismatch {
				op: '-',
				left: "nothing",
				right: other.kind(),
			}),
		},
		Expr::Binary { op, left, right } => binary(*op, eval(left)?, eval(right)?),
		Expr::Call { name, args } => call(name, args),
	}
}

fn binary(op: char, left: RawValue, right: RawValue) -> Result<RawValue, ExpressionError> {
	use RawValue::{Date, Float, Integer, Text};

	let mismatch = |l: &RawValue, r: &RawValue| ExpressionError::TypeMismatch {
		op,
		left: l.kind(),
		right: r.kind(),
	};

	match (op, &left, &right) {
		('+', Text(_), _) | ('+', _, Text(_)) => Ok(Text(format!("{left}{right}"))),
		('+', Date(d), Integer(ms)) | ('+', Integer(ms), Date(d)) => d
			.checked_add_signed(Duration::milliseconds(*ms))
			.map(Date)
			.ok_or(ExpressionError::Overflow),
		('-', Date(d), Integer(ms)) => d
			.checked_sub_signed(Duration::milliseconds(*ms))
			.map(Date)
			.ok_or(ExpressionError::Overflow),
		(_, Integer(a), Integer(b)) => {
			let result = match op {
				'+' => a.checked_add(*b),
				'-' => a.checked_sub(*b),
				'*' => a.checked_mul(*b),
				_ => {
					if *b == 0 {
						return Err(ExpressionError::DivisionByZero);
					}
					a.checked_div(*b)
				}
			};
			result.map(Integer).ok_or(ExpressionError::Overflow)
		}
		(_, Integer(_) | Float(_), Integer(_) | Float(_)) => {
			let (a, b) = (as_float(&left), as_float(&right));
			Ok(Float(match op {
				'+' => a + b,
				'-' => a - b,
				'*' => a * b,
				_ => a / b,
			}))
		}
		_ => Err(mismatch(&left, &right)),
	}
}

fn as_float(value: &RawValue) -> f64 {
	match value {
		RawValue::Integer(i) => *i as f64,
		RawValue::Float(f) => *f,
		_ => f64::NAN,
	}
}

fn call(name: &str, args: &[Expr]) -> Result<RawValue, ExpressionError> {
	let arity = |expected: usize| {
		if args.len() == expected {
			Ok(())
		} else {
			Err(ExpressionError::Arity {
				function: name.to_string(),
				expected,
				actual: args.len(),
			})
		}
	};

	match name {
		"now" => {
			arity(0)?;
			Ok(RawValue::Date(Utc::now()))
		}
		"now_millis" => {
			arity(0)?;
			Ok(RawValue::Integer(Utc::now().timestamp_millis()))
		}
		"uuid" => {
			arity(0)?;
			Ok(RawValue::Text(uuid::Uuid::new_v4().to_string()))
		}
		"env" => {
			arity(1)?;
			match eval(&args[0])? {
				RawValue::Text(var) => std::env::var(&var)
					.map(RawValue::Text)
					.map_err(|_| ExpressionError::MissingEnv(var)),
				other => Err(ExpressionError::InvalidArgument {
					function: name.to_string(),
					message: format!("expected text, got {}", other.kind()),
				}),
			}
		}
		_ => Err(ExpressionError::UnknownFunction(name.to_string())),
	}
}
