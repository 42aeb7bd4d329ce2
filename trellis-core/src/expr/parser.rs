//! Expression Parser
//!
//! A tokenizer plus a Pratt parser. Reference functions (`ch`, `count`,
//! `bbox`) must be called with literal arguments so that every dependency is
//! known before evaluation; their calls become reference nodes with a slot.
//!
//! Grammar, loosely:
//!
//! ```text
//! expr    := prefix (binop expr)*
//! prefix  := number | string | true | false | $F | $T | @ptnum | @P.x
//!          | (- | !) prefix | "(" expr ")" | ident "(" args ")"
//! ```
//!
//! Text parameters are templates: plain text with backtick-delimited
//! expressions.

use super::ast::{
    Attribute, Axis, BinaryOp, Expr, Expression, Function, NodeQuery, NodeTarget, Reference,
    Segment, UnaryOp, Variable, PREFIX_BINDING_POWER,
};
use crate::cook::Bounds;
use crate::error::ParseError;
use crate::value::Value;

/// Parse a plain expression.
pub fn parse(source: &str) -> Result<Expression, ParseError> {
    let mut state = ParseState::default();
    let root = parse_segment(source, 0, &mut state)?;
    Ok(state.finish(source, root))
}

/// Parse a text template such as ``geo_`$F`_v`ch("version")` ``.
pub fn parse_template(source: &str) -> Result<Expression, ParseError> {
    let mut state = ParseState::default();
    let mut segments = Vec::new();
    let mut offset = 0;

    for (index, part) in source.split('`').enumerate() {
        if index % 2 == 0 {
            if !part.is_empty() {
                segments.push(Segment::Text(part.to_owned()));
            }
        } else {
            segments.push(Segment::Expr(parse_segment(part, offset, &mut state)?));
        }
        offset += part.len() + 1;
    }

    if source.matches('`').count() % 2 != 0 {
        let unterminated = source.rfind('`').unwrap_or(0);
        return Err(ParseError::new("unterminated backtick", unterminated));
    }

    Ok(state.finish(source, Expr::Template(segments)))
}

fn parse_segment(text: &str, base: usize, state: &mut ParseState) -> Result<Expr, ParseError> {
    let tokens = tokenize(text, base)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        state,
    };
    let expr = parser.expression(0)?;
    match parser.peek() {
        (Token::End, _) => Ok(expr),
        (token, offset) => Err(ParseError::new(
            format!("unexpected {}", token.describe()),
            offset,
        )),
    }
}

#[derive(Default)]
struct ParseState {
    references: Vec<Reference>,
    uses_time: bool,
    per_element: bool,
}

impl ParseState {
    fn reference(&mut self, reference: Reference) -> usize {
        self.references.push(reference);
        self.references.len() - 1
    }

    fn finish(self, source: &str, root: Expr) -> Expression {
        Expression {
            source: source.to_owned(),
            root,
            references: self.references,
            uses_time: self.uses_time,
            per_element: self.per_element,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dollar(String),
    At(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string {s:?}"),
            Token::Ident(s) => format!("identifier {s}"),
            Token::Dollar(s) => format!("variable ${s}"),
            Token::At(s) => format!("attribute @{s}"),
            Token::Op(op) => format!("operator {op}"),
            Token::LParen => "(".to_owned(),
            Token::RParen => ")".to_owned(),
            Token::Comma => ",".to_owned(),
            Token::End => "end of expression".to_owned(),
        }
    }
}

const OPERATORS: [&str; 17] = [
    "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "^", "<", ">", "!", "(", ")",
];

fn tokenize(text: &str, base: usize) -> Result<Vec<(Token, usize)>, ParseError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal = &text[start..i];
            let number = literal
                .parse::<f64>()
                .map_err(|_| ParseError::new(format!("invalid number {literal}"), base + start))?;
            tokens.push((Token::Number(number), base + start));
            continue;
        }

        if c == '"' || c == '\'' {
            i += 1;
            let content_start = i;
            while i < bytes.len() && bytes[i] as char != c {
                i += 1;
            }
            if i == bytes.len() {
                return Err(ParseError::new("unterminated string", base + start));
            }
            tokens.push((Token::Str(text[content_start..i].to_owned()), base + start));
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push((Token::Ident(text[start..i].to_owned()), base + start));
            continue;
        }

        if c == '$' || c == '@' {
            i += 1;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
            {
                i += 1;
            }
            let name = text[start + 1..i].to_owned();
            if name.is_empty() {
                return Err(ParseError::new(format!("expected a name after {c}"), base + start));
            }
            let token = if c == '$' {
                Token::Dollar(name)
            } else {
                Token::At(name)
            };
            tokens.push((token, base + start));
            continue;
        }

        if c == ',' {
            tokens.push((Token::Comma, base + start));
            i += 1;
            continue;
        }

        let rest = &text[i..];
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
            return Err(ParseError::new(format!("unexpected character {c:?}"), base + start));
        };
        let token = match *op {
            "(" => Token::LParen,
            ")" => Token::RParen,
            other => Token::Op(other),
        };
        tokens.push((token, base + start));
        i += op.len();
    }

    tokens.push((Token::End, base + text.len()));
    Ok(tokens)
}

fn binary_op(op: &str) -> Option<BinaryOp> {
    Some(match op {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        "^" => BinaryOp::Pow,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "&&" => BinaryOp::And,
        "||" => BinaryOp::Or,
        _ => return None,
    })
}

/// Depth limit for the syntax tree. Parsing, evaluating and dropping an
/// expression all recurse once per level.
const MAX_NESTING: usize = 256;

struct Parser<'s> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
    state: &'s mut ParseState,
}

impl Parser<'_> {
    fn peek(&self) -> (Token, usize) {
        self.tokens
            .get(self.pos)
            .cloned()
            .unwrap_or((Token::End, 0))
    }

    fn advance(&mut self) -> (Token, usize) {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let (token, offset) = self.advance();
        if token == expected {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected {}, found {}", expected.describe(), token.describe()),
                offset,
            ))
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let (_, offset) = self.peek();
        if self.depth == MAX_NESTING {
            return Err(ParseError::new("expression nested too deeply", offset));
        }
        self.depth += 1;
        let result = self.binary(min_bp);
        self.depth -= 1;
        result
    }

    fn binary(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.prefix()?;
        let mut links = 0;

        loop {
            let (op, offset) = match self.peek() {
                (Token::Op(op), offset) => match binary_op(op) {
                    Some(op) => (op, offset),
                    None => break,
                },
                _ => break,
            };
            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }
            // Each left-associative link deepens the tree by one.
            links += 1;
            if self.depth + links > MAX_NESTING {
                return Err(ParseError::new("expression nested too deeply", offset));
            }
            self.advance();
            let rhs = self.expression(r_bp)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let (token, offset) = self.advance();
        match token {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Op("-") => self.unary(UnaryOp::Neg),
            Token::Op("!") => self.unary(UnaryOp::Not),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Dollar(name) => {
                let variable = match name.as_str() {
                    "F" => Variable::Frame,
                    "T" => Variable::Time,
                    _ => return Err(ParseError::new(format!("unknown variable ${name}"), offset)),
                };
                self.state.uses_time = true;
                Ok(Expr::Variable(variable))
            }
            Token::At(name) => {
                let attribute = match name.as_str() {
                    "ptnum" => Attribute::Index,
                    "P.x" => Attribute::Position(Axis::X),
                    "P.y" => Attribute::Position(Axis::Y),
                    "P.z" => Attribute::Position(Axis::Z),
                    _ => return Err(ParseError::new(format!("unknown attribute @{name}"), offset)),
                };
                self.state.per_element = true;
                Ok(Expr::Attribute(attribute))
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                _ => self.call(name, offset),
            },
            other => Err(ParseError::new(
                format!("unexpected {}", other.describe()),
                offset,
            )),
        }
    }

    fn unary(&mut self, op: UnaryOp) -> Result<Expr, ParseError> {
        let operand = self.expression(PREFIX_BINDING_POWER)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn arguments(&mut self) -> Result<Vec<(Expr, usize)>, ParseError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if matches!(self.peek(), (Token::RParen, _)) {
            self.advance();
            return Ok(args);
        }
        loop {
            let offset = self.peek().1;
            args.push((self.expression(0)?, offset));
            match self.advance() {
                (Token::Comma, _) => continue,
                (Token::RParen, _) => return Ok(args),
                (token, offset) => {
                    return Err(ParseError::new(
                        format!("expected , or ), found {}", token.describe()),
                        offset,
                    ))
                }
            }
        }
    }

    fn call(&mut self, name: String, offset: usize) -> Result<Expr, ParseError> {
        let args = self.arguments()?;

        match name.as_str() {
            "ch" => {
                let [(arg, at)] = fixed_args::<1>(&name, args, offset)?;
                let path = literal_text(arg, at)?;
                let slot = self.state.reference(Reference::Param(path.clone()));
                Ok(Expr::ParamRef { slot, path })
            }
            "count" => {
                let [(arg, at)] = fixed_args::<1>(&name, args, offset)?;
                Ok(self.node_ref(node_target(arg, at)?, NodeQuery::Count))
            }
            "bbox" => {
                let [(target, target_at), (component, component_at)] =
                    fixed_args::<2>(&name, args, offset)?;
                let target = node_target(target, target_at)?;
                let component = literal_text(component, component_at)?;
                if UNIT_BOUNDS.component(&component).is_none() {
                    return Err(ParseError::new(
                        format!("unknown bounds component {component:?}"),
                        component_at,
                    ));
                }
                Ok(self.node_ref(target, NodeQuery::Bounds(component)))
            }
            _ => {
                let function = Function::from_name(&name)
                    .ok_or_else(|| ParseError::new(format!("unknown function {name}"), offset))?;
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    return Err(ParseError::new(
                        format!("{name} does not take {} arguments", args.len()),
                        offset,
                    ));
                }
                Ok(Expr::Call {
                    function,
                    args: args.into_iter().map(|(arg, _)| arg).collect(),
                })
            }
        }
    }

    fn node_ref(&mut self, target: NodeTarget, query: NodeQuery) -> Expr {
        let slot = self.state.reference(Reference::Node(target.clone()));
        Expr::NodeRef { slot, target, query }
    }
}

/// Used only to validate bounds component names at parse time.
const UNIT_BOUNDS: Bounds = Bounds {
    min: [0.0; 3],
    max: [1.0; 3],
};

fn fixed_args<const N: usize>(
    name: &str,
    args: Vec<(Expr, usize)>,
    offset: usize,
) -> Result<[(Expr, usize); N], ParseError> {
    let found = args.len();
    args.try_into().map_err(|_| {
        ParseError::new(format!("{name} expects {N} arguments, got {found}"), offset)
    })
}

fn literal_text(expr: Expr, offset: usize) -> Result<String, ParseError> {
    match expr {
        Expr::Literal(Value::Text(text)) => Ok(text),
        _ => Err(ParseError::new("expected a string literal", offset)),
    }
}

fn node_target(expr: Expr, offset: usize) -> Result<NodeTarget, ParseError> {
    match expr {
        Expr::Literal(Value::Text(path)) => Ok(NodeTarget::Path(path)),
        Expr::Literal(Value::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
            Ok(NodeTarget::Input(n as usize))
        }
        _ => Err(ParseError::new(
            "expected an input index or a node path literal",
            offset,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(n: f64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Number(n)))
    }

    #[test]
    fn precedence_and_associativity() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr.root,
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: number(1.0),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: number(2.0),
                    rhs: number(3.0),
                }),
            }
        );

        let expr = parse("2 ^ 3 ^ 2").unwrap();
        assert_eq!(
            expr.root,
            Expr::Binary {
                op: BinaryOp::Pow,
                lhs: number(2.0),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Pow,
                    lhs: number(3.0),
                    rhs: number(2.0),
                }),
            }
        );
    }

    #[test]
    fn negation_binds_looser_than_power() {
        let expr = parse("-2^2").unwrap();
        assert!(matches!(
            expr.root,
            Expr::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn collects_references_in_slot_order() {
        let expr = parse(r#"ch("../a/tx") + count(0) * bbox("/geo", "size_y")"#).unwrap();
        assert_eq!(
            expr.references(),
            &[
                Reference::Param("../a/tx".into()),
                Reference::Node(NodeTarget::Input(0)),
                Reference::Node(NodeTarget::Path("/geo".into())),
            ]
        );
        assert!(!expr.uses_time());
        assert!(!expr.is_per_element());
    }

    #[test]
    fn flags_time_and_element_usage() {
        let expr = parse("$F + @P.y * @ptnum").unwrap();
        assert!(expr.uses_time());
        assert!(expr.is_per_element());
        assert!(expr.references().is_empty());
    }

    #[test]
    fn reference_functions_need_literals() {
        let err = parse("ch(1 + 2)").unwrap_err();
        assert_eq!(err.message, "expected a string literal");
        assert_eq!(err.offset, 3);

        assert!(parse("count(-1)").is_err());
        assert!(parse("count(\"a\", 2)").is_err());
        assert!(parse("bbox(0, \"volume\")").is_err());
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(parse("nope(1)").unwrap_err().message, "unknown function nope");
        assert!(parse("$X").is_err());
        assert!(parse("@Cd").is_err());
        assert!(parse("min(1)").is_err());
    }

    #[test]
    fn reports_trailing_tokens_and_bad_characters() {
        let err = parse("1 2").unwrap_err();
        assert_eq!(err.offset, 2);
        assert!(parse("1 # 2").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("\"open").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse(&parens).unwrap_err();
        assert_eq!(err.message, "expression nested too deeply");
        assert_eq!(err.offset, MAX_NESTING);

        for op in ["-", "!"] {
            let err = parse(&format!("{}1", op.repeat(10_000))).unwrap_err();
            assert_eq!(err.message, "expression nested too deeply");
        }
        let power = format!("2{}", "^2".repeat(10_000));
        assert!(parse(&power).is_err());
        let sum = format!("1{}", "+1".repeat(10_000));
        assert_eq!(parse(&sum).unwrap_err().message, "expression nested too deeply");

        let shallow = format!("{}1{}", "(".repeat(32), ")".repeat(32));
        assert_eq!(parse(&shallow).unwrap().root, Expr::Literal(Value::Number(1.0)));
    }

    #[test]
    fn numbers_with_exponents() {
        let expr = parse("1.5e2").unwrap();
        assert_eq!(expr.root, Expr::Literal(Value::Number(150.0)));
        assert_eq!(parse(".5").unwrap().root, Expr::Literal(Value::Number(0.5)));
    }

    #[test]
    fn templates_split_on_backticks() {
        let expr = parse_template("geo_`$F`_v`ch(\"version\")`").unwrap();
        let Expr::Template(segments) = &expr.root else {
            panic!("expected a template");
        };
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], Segment::Text("geo_".into()));
        assert!(expr.uses_time());
        assert_eq!(expr.references(), &[Reference::Param("version".into())]);
    }

    #[test]
    fn template_errors_point_into_the_source() {
        let err = parse_template("a`1 +`").unwrap_err();
        assert_eq!(err.offset, 5);
        assert!(parse_template("a`$F").is_err());
    }
}
