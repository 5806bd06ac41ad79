//! cql2-text reader and writer

use serde_json::{json, Value};

use super::geometry::{self, Geometry};
use super::{Cql2Error, Expr, ARITHMETIC_OPS, COMPARISON_OPS};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    String(String),
    Ident(String),
    QuotedIdent(String),
    Compare(&'static str),
    Arith(&'static str),
    LParen,
    RParen,
    Comma,
}

fn parse_error(position: usize, message: impl Into<String>) -> Cql2Error {
    Cql2Error::Parse {
        position,
        message: message.into(),
    }
}

/// Whether a following `-` is subtraction rather than a sign
fn follows_operand(tokens: &[(Token, usize)]) -> bool {
    match tokens.last() {
        Some((Token::Number(_) | Token::String(_) | Token::QuotedIdent(_) | Token::RParen, _)) => {
            true
        }
        Some((Token::Ident(word), _)) => !is_keyword(word),
        _ => false,
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, Cql2Error> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((Token::LParen, pos));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, pos));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, pos));
                i += 1;
            }
            '=' => {
                tokens.push((Token::Compare("="), pos));
                i += 1;
            }
            '<' | '>' => {
                let next = chars.get(i + 1).map(|(_, n)| *n);
                let op = match (c, next) {
                    ('<', Some('=')) => "<=",
                    ('<', Some('>')) => "<>",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                tokens.push((Token::Compare(op), pos));
                i += op.len();
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(parse_error(pos, "unterminated quoted text")),
                        Some((_, ch)) if *ch == quote => {
                            // A doubled quote is an escaped quote character
                            if chars.get(i + 1).map(|(_, n)| *n) == Some(quote) {
                                value.push(quote);
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some((_, ch)) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                let token = if quote == '\'' {
                    Token::String(value)
                } else {
                    Token::QuotedIdent(value)
                };
                tokens.push((token, pos));
            }
            c if c.is_ascii_digit()
                || (c == '-'
                    && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())
                    && !follows_operand(&tokens)) =>
            {
                let start = i;
                i += 1;
                while let Some((_, n)) = chars.get(i) {
                    let exponent_sign = matches!(n, '+' | '-')
                        && matches!(chars.get(i - 1), Some((_, 'e' | 'E')));
                    if n.is_ascii_digit() || matches!(n, '.' | 'e' | 'E') || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
                tokens.push((Token::Number(text), pos));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while let Some((_, n)) = chars.get(i) {
                    if n.is_alphanumeric() || matches!(n, '_' | '.' | ':') {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
                tokens.push((Token::Ident(text), pos));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    _ => "^",
                };
                tokens.push((Token::Arith(op), pos));
                i += 1;
            }
            other => return Err(parse_error(pos, format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(token, _)| token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, position)| *position)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        self.pos += 1;
        token
    }

    fn is_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword_at(0, keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), Cql2Error> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(parse_error(self.position(), format!("expected {}", keyword)))
        }
    }

    fn expect(&mut self, expected: Token, label: &str) -> Result<(), Cql2Error> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(parse_error(self.position(), format!("expected '{}'", label)))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, Cql2Error> {
        let mut args = vec![self.parse_and()?];
        while self.eat_keyword("OR") {
            args.push(self.parse_and()?);
        }
        Ok(fold("or", args))
    }

    fn parse_and(&mut self) -> Result<Expr, Cql2Error> {
        let mut args = vec![self.parse_not()?];
        while self.eat_keyword("AND") {
            args.push(self.parse_not()?);
        }
        Ok(fold("and", args))
    }

    fn parse_not(&mut self) -> Result<Expr, Cql2Error> {
        if self.eat_keyword("NOT") {
            let inner = self.parse_not()?;
            Ok(Expr::operation("not", vec![inner]))
        } else {
            self.parse_predicate()
        }
    }

    fn parse_predicate(&mut self) -> Result<Expr, Cql2Error> {
        let left = self.parse_additive()?;

        if let Some(Token::Compare(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_additive()?;
            return Ok(Expr::operation(op, vec![left, right]));
        }

        let negated = self.is_keyword_at(0, "NOT")
            && ["LIKE", "BETWEEN", "IN"]
                .iter()
                .any(|keyword| self.is_keyword_at(1, keyword));
        if negated {
            self.pos += 1;
        }

        let predicate = if self.eat_keyword("LIKE") {
            let pattern = self.parse_operand()?;
            Expr::operation("like", vec![left, pattern])
        } else if self.eat_keyword("BETWEEN") {
            let low = self.parse_additive()?;
            self.expect_keyword("AND")?;
            let high = self.parse_additive()?;
            Expr::operation("between", vec![left, low, high])
        } else if self.eat_keyword("IN") {
            self.expect(Token::LParen, "(")?;
            let items = self.parse_list()?;
            Expr::operation("in", vec![left, Expr::Array(items)])
        } else if self.eat_keyword("IS") {
            let not_null = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            let is_null = Expr::operation("isNull", vec![left]);
            if not_null {
                Expr::operation("not", vec![is_null])
            } else {
                is_null
            }
        } else {
            return Ok(left);
        };

        if negated {
            Ok(Expr::operation("not", vec![predicate]))
        } else {
            Ok(predicate)
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, Cql2Error> {
        let mut left = self.parse_term()?;
        while let Some(Token::Arith(op @ ("+" | "-"))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_term()?;
            left = Expr::operation(op, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, Cql2Error> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Arith(op @ ("*" | "/" | "%"))) => *op,
                Some(Token::Ident(word)) if word.eq_ignore_ascii_case("DIV") => "div",
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_power()?;
            left = Expr::operation(op, vec![left, right]);
        }
    }

    fn parse_power(&mut self) -> Result<Expr, Cql2Error> {
        let base = self.parse_operand()?;
        if self.peek() == Some(&Token::Arith("^")) {
            self.pos += 1;
            let exponent = self.parse_power()?;
            return Ok(Expr::operation("^", vec![base, exponent]));
        }
        Ok(base)
    }

    /// Comma separated operands up to and including the closing parenthesis
    fn parse_list(&mut self) -> Result<Vec<Expr>, Cql2Error> {
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(items),
                _ => return Err(parse_error(self.position(), "expected ',' or ')'")),
            }
        }
    }

    fn parse_operand(&mut self) -> Result<Expr, Cql2Error> {
        let position = self.position();
        match self.advance() {
            Some(Token::LParen) => {
                let first = self.parse_or()?;
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    let mut items = vec![first];
                    items.extend(self.parse_list()?);
                    return Ok(Expr::Array(items));
                }
                self.expect(Token::RParen, ")")?;
                Ok(first)
            }
            Some(Token::Number(text)) => text
                .parse::<serde_json::Number>()
                .map(Expr::Number)
                .map_err(|_| parse_error(position, format!("invalid number '{}'", text))),
            Some(Token::String(value)) => Ok(Expr::String(value)),
            Some(Token::QuotedIdent(name)) => Ok(Expr::Property(name)),
            Some(Token::Ident(word)) => self.parse_identifier(word, position),
            Some(_) => Err(parse_error(position, "expected an operand")),
            None => Err(parse_error(position, "unexpected end of input")),
        }
    }

    fn parse_identifier(&mut self, word: String, position: usize) -> Result<Expr, Cql2Error> {
        let upper = word.to_ascii_uppercase();
        match upper.as_str() {
            "TRUE" => return Ok(Expr::Bool(true)),
            "FALSE" => return Ok(Expr::Bool(false)),
            "NULL" => return Ok(Expr::Null),
            _ => {}
        }

        let dimension = ["Z", "M", "ZM"]
            .iter()
            .any(|tag| self.is_keyword_at(0, tag));
        if geometry::from_wkt_keyword(&upper).is_some()
            && (dimension || self.peek() == Some(&Token::LParen))
        {
            let geojson = self.parse_geometry(&upper, position)?;
            return Geometry::from_geojson(geojson)
                .map(Expr::Geometry)
                .map_err(|e| parse_error(position, e.to_string()));
        }

        if self.peek() != Some(&Token::LParen) {
            if is_keyword(&word) {
                return Err(parse_error(position, format!("unexpected keyword '{}'", word)));
            }
            return Ok(Expr::Property(word));
        }
        self.pos += 1;

        if upper == "TIMESTAMP" || upper == "DATE" {
            let literal = match self.advance() {
                Some(Token::String(value)) => value,
                _ => {
                    return Err(parse_error(
                        position,
                        format!("{} expects a quoted string", upper),
                    ))
                }
            };
            self.expect(Token::RParen, ")")?;
            return Ok(if upper == "TIMESTAMP" {
                Expr::Timestamp(literal)
            } else {
                Expr::Date(literal)
            });
        }

        let args = self.parse_list()?;
        match upper.as_str() {
            "BBOX" => Expr::bbox(args)
                .ok_or_else(|| parse_error(position, "BBOX expects 4 or 6 numbers")),
            "INTERVAL" => Expr::interval(args)
                .ok_or_else(|| parse_error(position, "INTERVAL expects 2 bounds")),
            _ => Ok(Expr::operation(&word, args)),
        }
    }

    /// WKT geometry text as GeoJSON; the keyword has been consumed
    fn parse_geometry(&mut self, keyword: &str, position: usize) -> Result<Value, Cql2Error> {
        let (kind, depth) = geometry::from_wkt_keyword(keyword)
            .ok_or_else(|| parse_error(position, format!("unknown geometry type '{}'", keyword)))?;
        for tag in ["Z", "M", "ZM"] {
            if self.eat_keyword(tag) {
                break;
            }
        }

        if kind == "GeometryCollection" {
            self.expect(Token::LParen, "(")?;
            let mut members = Vec::new();
            loop {
                let member_position = self.position();
                let member = match self.advance() {
                    Some(Token::Ident(word)) => word.to_ascii_uppercase(),
                    _ => return Err(parse_error(member_position, "expected a geometry")),
                };
                members.push(self.parse_geometry(&member, member_position)?);
                match self.advance() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(parse_error(self.position(), "expected ',' or ')'")),
                }
            }
            return Ok(json!({"type": kind, "geometries": members}));
        }

        let coordinates = match (kind, depth) {
            (_, 0) => {
                self.expect(Token::LParen, "(")?;
                let point = self.parse_position()?;
                self.expect(Token::RParen, ")")?;
                point
            }
            ("MultiPoint", _) => self.parse_multi_point()?,
            _ => self.parse_coordinates(depth)?,
        };
        Ok(json!({"type": kind, "coordinates": coordinates}))
    }

    /// Whitespace separated ordinates
    fn parse_position(&mut self) -> Result<Value, Cql2Error> {
        let position = self.position();
        let mut ordinates = Vec::new();
        loop {
            // `-` after a number is tokenized as subtraction
            let negative = self.peek() == Some(&Token::Arith("-"))
                && matches!(self.peek_at(1), Some(Token::Number(_)));
            if negative {
                self.pos += 1;
            }
            let Some(Token::Number(text)) = self.peek().cloned() else {
                break;
            };
            self.pos += 1;
            let text = if negative { format!("-{}", text) } else { text };
            let number = text
                .parse::<serde_json::Number>()
                .map_err(|_| parse_error(position, format!("invalid number '{}'", text)))?;
            ordinates.push(Value::Number(number));
        }
        if !(2..=4).contains(&ordinates.len()) {
            return Err(parse_error(position, "expected a coordinate"));
        }
        Ok(Value::Array(ordinates))
    }

    fn parse_coordinates(&mut self, depth: usize) -> Result<Value, Cql2Error> {
        if depth == 0 {
            return self.parse_position();
        }
        self.expect(Token::LParen, "(")?;
        let mut items = Vec::new();
        loop {
            items.push(self.parse_coordinates(depth - 1)?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(Value::Array(items)),
                _ => return Err(parse_error(self.position(), "expected ',' or ')'")),
            }
        }
    }

    /// Points may be written bare or each in parentheses
    fn parse_multi_point(&mut self) -> Result<Value, Cql2Error> {
        self.expect(Token::LParen, "(")?;
        let mut points = Vec::new();
        loop {
            if self.peek() == Some(&Token::LParen) {
                self.pos += 1;
                points.push(self.parse_position()?);
                self.expect(Token::RParen, ")")?;
            } else {
                points.push(self.parse_position()?);
            }
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(Value::Array(points)),
                _ => return Err(parse_error(self.position(), "expected ',' or ')'")),
            }
        }
    }
}

fn fold(op: &str, mut args: Vec<Expr>) -> Expr {
    if args.len() == 1 {
        args.remove(0)
    } else {
        Expr::operation(op, args)
    }
}

const KEYWORDS: &[&str] = &[
    "AND", "OR", "NOT", "LIKE", "BETWEEN", "IN", "IS", "NULL", "TRUE", "FALSE", "DIV",
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|keyword| keyword.eq_ignore_ascii_case(word))
}

/// Parse cql2-text
pub(super) fn parse(input: &str) -> Result<Expr, Cql2Error> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(parse_error(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parse_error(parser.position(), "unexpected trailing input"));
    }
    Ok(expr)
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') && !is_keyword(name)
}

fn quote(value: &str, mark: char) -> String {
    let doubled: String = [mark, mark].iter().collect();
    format!("{mark}{}{mark}", value.replace(mark, &doubled))
}

/// Render an expression as cql2-text; every operation is parenthesised
pub(super) fn write(expr: &Expr) -> String {
    match expr {
        Expr::Null => "NULL".to_string(),
        Expr::Bool(b) => b.to_string(),
        Expr::Number(n) => n.to_string(),
        Expr::String(s) => quote(s, '\''),
        Expr::Timestamp(t) => format!("TIMESTAMP({})", quote(t, '\'')),
        Expr::Date(d) => format!("DATE({})", quote(d, '\'')),
        Expr::Property(p) if is_plain_identifier(p) => p.clone(),
        Expr::Property(p) => quote(p, '"'),
        Expr::Geometry(g) => g.wkt().to_string(),
        Expr::BBox(items) => format!("BBOX({})", join(items, ", ")),
        Expr::Interval(bounds) => format!("INTERVAL({})", join(bounds, ", ")),
        Expr::Array(items) => format!("({})", join(items, ", ")),
        Expr::Operation { op, args } => match (op.as_str(), args.as_slice()) {
            ("and", args) if args.len() >= 2 => format!("({})", join(args, " AND ")),
            ("or", args) if args.len() >= 2 => format!("({})", join(args, " OR ")),
            ("not", [inner]) => format!("(NOT {})", write(inner)),
            ("isNull", [inner]) => format!("({} IS NULL)", write(inner)),
            ("like", [value, pattern]) => format!("({} LIKE {})", write(value), write(pattern)),
            ("between", [value, low, high]) => format!(
                "({} BETWEEN {} AND {})",
                write(value),
                write(low),
                write(high)
            ),
            ("in", [value, list @ Expr::Array(_)]) => {
                format!("({} IN {})", write(value), write(list))
            }
            (op, [left, right])
                if COMPARISON_OPS.contains(&op) || ARITHMETIC_OPS.contains(&op) =>
            {
                format!("({} {} {})", write(left), op, write(right))
            }
            (name, args) => format!("{}({})", name, join(args, ", ")),
        },
    }
}

fn join(items: &[Expr], separator: &str) -> String {
    items.iter().map(write).collect::<Vec<_>>().join(separator)
}
