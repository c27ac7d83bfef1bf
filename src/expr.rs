//! Where-clause expressions.
//!
//! Relationship templates and store queries share one small grammar:
//! `OR`/`AND`/`NOT`, comparisons, `IN (...)`, `BETWEEN ... AND ...`,
//! `IS [NOT] NULL`, arithmetic, parentheses, numeric and quoted literals.
//! Bare identifiers are target columns; `#name#` placeholders are source
//! columns. Column names are resolved against the tables at parse time.

use std::cmp::Ordering;

use crate::{errors::RowGraphError, row::Row, schema::Table, value::ColumnValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(ColumnValue),
    Source(usize),
    Target(usize),
    Neg(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Splits `[WHERE] condition [ORDER BY ...]` into its condition and the
/// trailing ordering clause, if any.
pub fn split_where(text: &str) -> (&str, Option<&str>) {
    let mut body = text.trim();
    if body.len() >= 5 && body[..5].eq_ignore_ascii_case("where") {
        let rest = &body[5..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            body = rest.trim_start();
        }
    }
    match find_keyword_outside_quotes(body, "order by") {
        Some(pos) => (body[..pos].trim_end(), Some(body[pos..].trim())),
        None => (body, None),
    }
}

fn find_keyword_outside_quotes(text: &str, keyword: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut in_quote = false;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\'' {
            in_quote = !in_quote;
            continue;
        }
        if !in_quote
            && bytes[i..].starts_with(keyword.as_bytes())
            && (i == 0 || bytes[i - 1].is_ascii_whitespace())
        {
            return Some(i);
        }
    }
    None
}

impl Expr {
    /// Parses a where clause. An empty condition matches everything.
    pub fn parse(
        text: &str,
        source: Option<&Table>,
        target: &Table,
    ) -> Result<Expr, RowGraphError> {
        let (condition, _) = split_where(text);
        if condition.is_empty() {
            return Ok(Expr::always());
        }
        let tokens = tokenize(condition)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            source,
            target,
        };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(RowGraphError::template(format!(
                "unexpected {:?} in {condition}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(expr)
    }

    pub fn always() -> Expr {
        Expr::Compare(
            CompareOp::Eq,
            Box::new(Expr::Literal(ColumnValue::Integer(1))),
            Box::new(Expr::Literal(ColumnValue::Integer(1))),
        )
    }

    pub fn is_always(&self) -> bool {
        *self == Expr::always()
    }

    /// Drops `1=1` conjuncts.
    pub fn simplified(&self) -> &Expr {
        match self {
            Expr::And(left, right) if left.is_always() => right.simplified(),
            Expr::And(left, right) if right.is_always() => left.simplified(),
            other => other,
        }
    }

    /// For a bare `target = #source#` equality, the (source, target) column
    /// indices.
    pub fn single_equality(&self) -> Option<(usize, usize)> {
        match self.simplified() {
            Expr::Compare(CompareOp::Eq, left, right) => match (left.as_ref(), right.as_ref()) {
                (Expr::Source(s), Expr::Target(t)) | (Expr::Target(t), Expr::Source(s)) => {
                    Some((*s, *t))
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn matches(&self, source: Option<&Row>, target: &Row) -> Result<bool, RowGraphError> {
        Ok(self.eval(source, target)?.truthy())
    }

    fn eval(&self, source: Option<&Row>, target: &Row) -> Result<Val, RowGraphError> {
        match self {
            Expr::Literal(v) => Ok(Val::Value(v.clone())),
            Expr::Source(i) => {
                let row = source.ok_or_else(|| {
                    RowGraphError::binding("source column referenced without a source row")
                })?;
                Ok(Val::Value(row.value(*i).cloned().unwrap_or(ColumnValue::Null)))
            }
            Expr::Target(i) => Ok(Val::Value(
                target.value(*i).cloned().unwrap_or(ColumnValue::Null),
            )),
            Expr::Neg(inner) => {
                let v = inner.eval(source, target)?.into_value();
                Ok(Val::Value(match v {
                    ColumnValue::Integer(x) => ColumnValue::Integer(-x),
                    ColumnValue::Float(x) => ColumnValue::Float(-x),
                    _ => ColumnValue::Null,
                }))
            }
            Expr::Arith(op, left, right) => {
                let l = left.eval(source, target)?.into_value();
                let r = right.eval(source, target)?.into_value();
                Ok(Val::Value(arith(*op, &l, &r)))
            }
            Expr::Compare(op, left, right) => {
                let l = left.eval(source, target)?.into_value();
                let r = right.eval(source, target)?.into_value();
                Ok(Val::Bool(compare(*op, &l, &r)))
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let v = expr.eval(source, target)?.into_value();
                if v.is_null() {
                    return Ok(Val::Bool(false));
                }
                let mut found = false;
                for item in list {
                    let candidate = item.eval(source, target)?.into_value();
                    if compare(CompareOp::Eq, &v, &candidate) {
                        found = true;
                        break;
                    }
                }
                Ok(Val::Bool(found != *negated))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = expr.eval(source, target)?.into_value();
                let lo = low.eval(source, target)?.into_value();
                let hi = high.eval(source, target)?.into_value();
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return Ok(Val::Bool(false));
                }
                let inside = compare(CompareOp::Ge, &v, &lo) && compare(CompareOp::Le, &v, &hi);
                Ok(Val::Bool(inside != *negated))
            }
            Expr::IsNull { expr, negated } => {
                let v = expr.eval(source, target)?.into_value();
                Ok(Val::Bool(v.is_null() != *negated))
            }
            Expr::And(left, right) => Ok(Val::Bool(
                left.eval(source, target)?.truthy() && right.eval(source, target)?.truthy(),
            )),
            Expr::Or(left, right) => Ok(Val::Bool(
                left.eval(source, target)?.truthy() || right.eval(source, target)?.truthy(),
            )),
            Expr::Not(inner) => Ok(Val::Bool(!inner.eval(source, target)?.truthy())),
        }
    }
}

enum Val {
    Bool(bool),
    Value(ColumnValue),
}

impl Val {
    fn truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Value(ColumnValue::Integer(v)) => *v != 0,
            Val::Value(_) => false,
        }
    }

    fn into_value(self) -> ColumnValue {
        match self {
            Val::Bool(b) => ColumnValue::Integer(i64::from(b)),
            Val::Value(v) => v,
        }
    }
}

fn compare(op: CompareOp, left: &ColumnValue, right: &ColumnValue) -> bool {
    let Some(ordering) = left.compare(right) else {
        return false;
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

fn arith(op: ArithOp, left: &ColumnValue, right: &ColumnValue) -> ColumnValue {
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return match op {
            ArithOp::Add => a.checked_add(b).map_or(ColumnValue::Null, ColumnValue::Integer),
            ArithOp::Sub => a.checked_sub(b).map_or(ColumnValue::Null, ColumnValue::Integer),
            ArithOp::Mul => a.checked_mul(b).map_or(ColumnValue::Null, ColumnValue::Integer),
            ArithOp::Div => a.checked_div(b).map_or(ColumnValue::Null, ColumnValue::Integer),
        };
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => match op {
            ArithOp::Add => ColumnValue::Float(a + b),
            ArithOp::Sub => ColumnValue::Float(a - b),
            ArithOp::Mul => ColumnValue::Float(a * b),
            ArithOp::Div if b == 0.0 => ColumnValue::Null,
            ArithOp::Div => ColumnValue::Float(a / b),
        },
        _ => ColumnValue::Null,
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(String),
    Str(String),
    Placeholder(String),
    Ident(String),
    Symbol(&'static str),
}

fn tokenize(text: &str) -> Result<Vec<Token>, RowGraphError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(RowGraphError::template(format!(
                            "unmatched quote in {text}"
                        )));
                    }
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        value.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(value));
            continue;
        }
        if c == '#' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == '#')
                .map(|p| start + p)
                .ok_or_else(|| RowGraphError::template(format!("unmatched # in {text}")))?;
            let name: String = chars[start..end].iter().collect();
            if name.trim().is_empty() {
                return Err(RowGraphError::template(format!("empty placeholder in {text}")));
            }
            tokens.push(Token::Placeholder(name.trim().to_string()));
            i = end + 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || ((chars[i] == 'e' || chars[i] == 'E')
                        && chars
                            .get(i + 1)
                            .is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+'))
                    || ((chars[i] == '-' || chars[i] == '+')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let symbol = match two.as_str() {
            "<=" => Some("<="),
            ">=" => Some(">="),
            "!=" | "<>" => Some("!="),
            _ => None,
        };
        if let Some(symbol) = symbol {
            tokens.push(Token::Symbol(symbol));
            i += 2;
            continue;
        }
        let symbol = match c {
            '=' => "=",
            '<' => "<",
            '>' => ">",
            '+' => "+",
            '-' => "-",
            '*' => "*",
            '/' => "/",
            '(' => "(",
            ')' => ")",
            ',' => ",",
            other => {
                return Err(RowGraphError::template(format!(
                    "unexpected character {other} in {text}"
                )));
            }
        };
        tokens.push(Token::Symbol(symbol));
        i += 1;
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: Option<&'a Table>,
    target: &'a Table,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), RowGraphError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(RowGraphError::template(format!(
                "expected {symbol}, found {:?}",
                self.peek()
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, RowGraphError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, RowGraphError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, RowGraphError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, RowGraphError> {
        let left = self.parse_additive()?;
        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(RowGraphError::template("expected NULL after IS"));
            }
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }
        let negated = if self.peek_keyword("not")
            && matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(w))
                if w.eq_ignore_ascii_case("in") || w.eq_ignore_ascii_case("between"))
        {
            self.pos += 1;
            true
        } else {
            false
        };
        if self.eat_keyword("in") {
            self.expect_symbol("(")?;
            let mut list = vec![self.parse_additive()?];
            while self.eat_symbol(",") {
                list.push(self.parse_additive()?);
            }
            self.expect_symbol(")")?;
            return Ok(Expr::In {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        if self.eat_keyword("between") {
            let low = self.parse_additive()?;
            if !self.eat_keyword("and") {
                return Err(RowGraphError::template("expected AND in BETWEEN clause"));
            }
            let high = self.parse_additive()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }
        let op = match self.peek() {
            Some(Token::Symbol("=")) => Some(CompareOp::Eq),
            Some(Token::Symbol("!=")) => Some(CompareOp::Ne),
            Some(Token::Symbol("<")) => Some(CompareOp::Lt),
            Some(Token::Symbol("<=")) => Some(CompareOp::Le),
            Some(Token::Symbol(">")) => Some(CompareOp::Gt),
            Some(Token::Symbol(">=")) => Some(CompareOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let right = self.parse_additive()?;
                Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, RowGraphError> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat_symbol("+") {
                ArithOp::Add
            } else if self.eat_symbol("-") {
                ArithOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_term()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_term(&mut self) -> Result<Expr, RowGraphError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                ArithOp::Mul
            } else if self.eat_symbol("/") {
                ArithOp::Div
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, RowGraphError> {
        if self.eat_symbol("-") {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, RowGraphError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| RowGraphError::template("unexpected end of clause"))?;
        self.pos += 1;
        match token {
            Token::Number(text) => parse_number(&text),
            Token::Str(text) => Ok(Expr::Literal(ColumnValue::Text(text))),
            Token::Placeholder(name) => {
                let source = self.source.ok_or_else(|| {
                    RowGraphError::template(format!(
                        "placeholder #{name}# used without a source table"
                    ))
                })?;
                source
                    .column_index(&name)
                    .map(Expr::Source)
                    .ok_or_else(|| {
                        RowGraphError::template(format!(
                            "#{name}# is not a column of {}",
                            source.table_type()
                        ))
                    })
            }
            Token::Ident(name) if name.eq_ignore_ascii_case("null") => {
                Ok(Expr::Literal(ColumnValue::Null))
            }
            Token::Ident(name) => {
                let bare = name.rsplit('.').next().unwrap_or(&name);
                self.target
                    .column_index(bare)
                    .map(Expr::Target)
                    .ok_or_else(|| {
                        RowGraphError::template(format!(
                            "{name} is not a column of {}",
                            self.target.table_type()
                        ))
                    })
            }
            Token::Symbol("(") => {
                let inner = self.parse_or()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Token::Symbol(other) => Err(RowGraphError::template(format!(
                "unexpected {other} in clause"
            ))),
        }
    }
}

fn parse_number(text: &str) -> Result<Expr, RowGraphError> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Expr::Literal(ColumnValue::Integer(v)));
    }
    text.parse::<f64>()
        .map(|v| Expr::Literal(ColumnValue::Float(v)))
        .map_err(|_| RowGraphError::template(format!("bad number {text}")))
}
