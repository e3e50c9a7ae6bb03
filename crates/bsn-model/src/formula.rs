//! Algebraic QoS formula
//!
//! A formula is an arithmetic expression over named terms, e.g.
//!
//! ```text
//! (CTX_G3_T1_1*R_G3_T1_1*F_G3_T1_1 + CTX_G4_T1*R_G4_T1*F_G4_T1) / max(CTX_G3_T1_1 + CTX_G4_T1, 1)
//! ```
//!
//! Parsing extracts the ordered set of distinct terms and classifies each into
//! a [`TermDescriptor`]. Evaluation is a pure function of the assignment.
//!
//! Grammar:
//!
//! ```text
//! expr    := product (('+' | '-') product)*
//! product := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary ('^' unary)?
//! primary := number | ident | ident '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use std::collections::{BTreeMap, HashMap};

use bsn_common::{FormulaError, TermDescriptor, TermKind};

/// Deepest accepted nesting of parentheses, calls, signs and exponents
pub const MAX_NESTING: usize = 128;

/// Source of term values for evaluation
pub trait Assignment {
    /// Value bound to `term`, if any
    fn value(&self, term: &str) -> Option<f64>;
}

impl Assignment for BTreeMap<String, f64> {
    fn value(&self, term: &str) -> Option<f64> {
        self.get(term).copied()
    }
}

impl Assignment for HashMap<String, f64> {
    fn value(&self, term: &str) -> Option<f64> {
        self.get(term).copied()
    }
}

/// Parsed, immutable QoS formula
#[derive(Debug, Clone)]
pub struct Formula {
    text: String,
    terms: Vec<TermDescriptor>,
    index: HashMap<String, usize>,
    expr: Expr,
}

impl Formula {
    /// Parse formula text
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        if text.trim().is_empty() {
            return Err(FormulaError::Empty);
        }

        let tokens = tokenize(text)?;
        let mut parser = Parser::new(tokens, text.len());
        let expr = parser.parse_expr()?;
        parser.expect_end()?;

        let terms = parser
            .terms
            .iter()
            .map(|name| TermDescriptor::classify(name))
            .collect();

        Ok(Self {
            text: text.to_string(),
            terms,
            index: parser.index,
            expr,
        })
    }

    /// Source text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct term names in order of first appearance
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|d| d.name.as_str())
    }

    /// Typed descriptors, same order as [`Formula::terms`]
    pub fn descriptors(&self) -> &[TermDescriptor] {
        &self.terms
    }

    /// Descriptor lookup by term name
    pub fn descriptor(&self, term: &str) -> Option<&TermDescriptor> {
        self.index.get(term).map(|&i| &self.terms[i])
    }

    /// Whether `term` appears in the formula
    pub fn contains(&self, term: &str) -> bool {
        self.index.contains_key(term)
    }

    /// Descriptors of a given kind
    pub fn terms_of_kind(&self, kind: TermKind) -> impl Iterator<Item = &TermDescriptor> {
        self.terms.iter().filter(move |d| d.kind == kind)
    }

    /// Evaluate against an assignment
    pub fn evaluate<A: Assignment + ?Sized>(&self, assignment: &A) -> Result<f64, FormulaError> {
        let values = self
            .terms
            .iter()
            .map(|d| {
                assignment
                    .value(&d.name)
                    .ok_or_else(|| FormulaError::MissingTerm(d.name.clone()))
            })
            .collect::<Result<Vec<f64>, FormulaError>>()?;

        Ok(self.expr.eval(&values))
    }
}

impl std::str::FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Min,
    Max,
    Abs,
    Sqrt,
    Exp,
    Log,
    Pow,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Function::Min,
            "max" => Function::Max,
            "abs" => Function::Abs,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "log" => Function::Log,
            "pow" => Function::Pow,
            _ => return None,
        })
    }

    fn check_arity(&self, name: &str, actual: usize) -> Result<(), FormulaError> {
        let (ok, expected) = match self {
            Function::Min | Function::Max => (actual >= 1, "at least 1"),
            Function::Pow => (actual == 2, "2"),
            _ => (actual == 1, "1"),
        };
        if ok {
            Ok(())
        } else {
            Err(FormulaError::Arity {
                name: name.to_string(),
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Term(usize),
    Neg(Box<Expr>),
    /// Left-associative run of same-precedence operators, kept flat
    Chain {
        head: Box<Expr>,
        tail: Vec<(BinaryOp, Expr)>,
    },
    Pow {
        base: Box<Expr>,
        exponent: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    fn eval(&self, values: &[f64]) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Term(i) => values[*i],
            Expr::Neg(inner) => -inner.eval(values),
            Expr::Chain { head, tail } => tail
                .iter()
                .fold(head.eval(values), |acc, (op, rhs)| op.apply(acc, rhs.eval(values))),
            Expr::Pow { base, exponent } => base.eval(values).powf(exponent.eval(values)),
            Expr::Call { func, args } => {
                let it = args.iter().map(|a| a.eval(values));
                match func {
                    Function::Min => it.fold(f64::INFINITY, f64::min),
                    Function::Max => it.fold(f64::NEG_INFINITY, f64::max),
                    Function::Abs => args[0].eval(values).abs(),
                    Function::Sqrt => args[0].eval(values).sqrt(),
                    Function::Exp => args[0].eval(values).exp(),
                    Function::Log => args[0].eval(values).ln(),
                    Function::Pow => {
                        let base = args[0].eval(values);
                        base.powf(args[1].eval(values))
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Symbol(char),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, ch)) = chars.peek().copied() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            let mut end = offset;
            let mut seen_exp = false;
            while let Some((i, c)) = chars.peek().copied() {
                let exp_sign = seen_exp
                    && (c == '+' || c == '-')
                    && matches!(input[..i].chars().last(), Some('e' | 'E'));
                if c.is_ascii_digit() || c == '.' || exp_sign {
                    end = i + c.len_utf8();
                    chars.next();
                } else if (c == 'e' || c == 'E') && !seen_exp {
                    seen_exp = true;
                    end = i + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let literal = &input[offset..end];
            let value = literal.parse::<f64>().map_err(|_| FormulaError::Parse {
                offset,
                message: format!("invalid number '{literal}'"),
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset,
            });
            continue;
        }

        if is_ident_start(ch) {
            let mut end = offset;
            while let Some((i, c)) = chars.peek().copied() {
                if is_ident_char(c) {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident(input[offset..end].to_string()),
                offset,
            });
            continue;
        }

        if matches!(ch, '+' | '-' | '*' | '/' | '^' | '(' | ')' | ',') {
            tokens.push(Token {
                kind: TokenKind::Symbol(ch),
                offset,
            });
            chars.next();
            continue;
        }

        return Err(FormulaError::Parse {
            offset,
            message: format!("unexpected character '{ch}'"),
        });
    }

    Ok(tokens)
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end_offset: usize,
    depth: usize,
    terms: Vec<String>,
    index: HashMap<String, usize>,
}

impl Parser {
    fn new(tokens: Vec<Token>, end_offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end_offset,
            depth: 0,
            terms: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.end_offset)
    }

    fn error(&self, message: impl Into<String>) -> FormulaError {
        FormulaError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn eat(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&TokenKind::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, symbol: char) -> Result<(), FormulaError> {
        if self.eat(symbol) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{symbol}'")))
        }
    }

    fn expect_end(&self) -> Result<(), FormulaError> {
        if self.pos < self.tokens.len() {
            Err(self.error("unexpected trailing input"))
        } else {
            Ok(())
        }
    }

    /// Run `f` one nesting level deeper
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, FormulaError>,
    ) -> Result<T, FormulaError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn intern(&mut self, name: String) -> usize {
        if let Some(&i) = self.index.get(&name) {
            return i;
        }
        let i = self.terms.len();
        self.index.insert(name.clone(), i);
        self.terms.push(name);
        i
    }

    fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        let head = self.parse_product()?;
        let mut tail = Vec::new();
        loop {
            let op = if self.eat('+') {
                BinaryOp::Add
            } else if self.eat('-') {
                BinaryOp::Sub
            } else {
                return Ok(chain(head, tail));
            };
            tail.push((op, self.parse_product()?));
        }
    }

    fn parse_product(&mut self) -> Result<Expr, FormulaError> {
        let head = self.parse_unary()?;
        let mut tail = Vec::new();
        loop {
            let op = if self.eat('*') {
                BinaryOp::Mul
            } else if self.eat('/') {
                BinaryOp::Div
            } else {
                return Ok(chain(head, tail));
            };
            tail.push((op, self.parse_unary()?));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        if self.eat('-') {
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat('+') {
            return self.nested(Self::parse_unary);
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_primary()?;
        if self.eat('^') {
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(Expr::Pow {
                base: Box::new(base),
                exponent: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of formula"));
        };

        match token {
            TokenKind::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            TokenKind::Ident(name) => {
                self.pos += 1;
                if self.eat('(') {
                    self.nested(|p| p.parse_call(name))
                } else {
                    Ok(Expr::Term(self.intern(name)))
                }
            }
            TokenKind::Symbol('(') => {
                self.pos += 1;
                self.nested(|p| {
                    let inner = p.parse_expr()?;
                    p.expect(')')?;
                    Ok(inner)
                })
            }
            TokenKind::Symbol(c) => Err(self.error(format!("unexpected '{c}'"))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, FormulaError> {
        let func = Function::lookup(&name).ok_or_else(|| FormulaError::UnknownFunction(name.clone()))?;

        let mut args = vec![self.parse_expr()?];
        while self.eat(',') {
            args.push(self.parse_expr()?);
        }
        self.expect(')')?;

        func.check_arity(&name, args.len())?;
        Ok(Expr::Call { func, args })
    }
}

fn chain(head: Expr, tail: Vec<(BinaryOp, Expr)>) -> Expr {
    if tail.is_empty() {
        head
    } else {
        Expr::Chain {
            head: Box::new(head),
            tail,
        }
    }
}
