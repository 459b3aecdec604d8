// Recursive-descent parser for the policy grammar:
//
//   expr      := principal | op '(' args ')'
//   op        := AND | OR | OutOf            (case-insensitive)
//   args      := expr (',' expr)*            for AND / OR
//              | number (',' expr)+          for OutOf
//   principal := quoted '<MspId>.<role>'     (single or double quotes)

use super::{EndorsementPolicyError, MspPrincipal, PolicyExpr};

/// Deepest operator nesting accepted.
pub(super) const MAX_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Operator {
    And,
    Or,
    OutOf(u64),
}

impl Operator {
    fn parse(op: &str) -> Result<Self, EndorsementPolicyError> {
        match op.to_ascii_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            "outof" => Ok(Self::OutOf(0)),
            _ => Err(EndorsementPolicyError::UnknownOperator(op.to_string())),
        }
    }

    // signatures required out of `count` sub-policies
    fn threshold(self, count: usize) -> Result<usize, EndorsementPolicyError> {
        match self {
            Self::And => Ok(count),
            Self::Or => Ok(1),
            Self::OutOf(n) => match usize::try_from(n) {
                Ok(required) if required > 0 && required <= count => Ok(required),
                _ => Err(EndorsementPolicyError::InvalidThreshold { n, count }),
            },
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Number(u64),
    Quoted(&'a str),
    Open,
    Close,
    Comma,
}

impl Token<'_> {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => (*s).to_string(),
            Token::Number(n) => n.to_string(),
            Token::Quoted(s) => format!("'{s}'"),
            Token::Open => "(".to_string(),
            Token::Close => ")".to_string(),
            Token::Comma => ",".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token<'_>)>, EndorsementPolicyError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'(' => {
                tokens.push((i, Token::Open));
                i += 1;
            }
            b')' => {
                tokens.push((i, Token::Close));
                i += 1;
            }
            b',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            b'\'' | b'"' => {
                let start = i;
                let body_start = i + 1;
                let len = input[body_start..]
                    .find(char::from(c))
                    .ok_or(EndorsementPolicyError::UnterminatedQuote(start))?;
                tokens.push((start, Token::Quoted(&input[body_start..body_start + len])));
                i = body_start + len + 1;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let raw = &input[start..i];
                let n = raw
                    .parse::<u64>()
                    .map_err(|_| EndorsementPolicyError::UnexpectedToken {
                        offset: start,
                        found: raw.to_string(),
                        expected: "a threshold",
                    })?;
                tokens.push((start, Token::Number(n)));
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(&input[start..i])));
            }
            _ => {
                let found = input[i..].chars().next().map(String::from).unwrap_or_default();
                return Err(EndorsementPolicyError::UnexpectedToken {
                    offset: i,
                    found,
                    expected: "an operator, principal or punctuation",
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(usize, Token<'a>)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&(usize, Token<'a>)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> Result<(usize, Token<'a>), EndorsementPolicyError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(EndorsementPolicyError::UnexpectedEnd { expected })?;
        self.pos += 1;

        Ok(token)
    }

    fn expect(&mut self, want: &Token<'a>, expected: &'static str) -> Result<(), EndorsementPolicyError> {
        let (offset, token) = self.next(expected)?;
        if &token == want {
            Ok(())
        } else {
            Err(EndorsementPolicyError::UnexpectedToken {
                offset,
                found: token.describe(),
                expected,
            })
        }
    }

    fn expr(&mut self, depth: usize) -> Result<PolicyExpr, EndorsementPolicyError> {
        if depth > MAX_DEPTH {
            return Err(EndorsementPolicyError::TooDeep { max: MAX_DEPTH });
        }
        let (offset, token) = self.next("an operator or principal")?;

        match token {
            Token::Quoted(raw) => Ok(PolicyExpr::SignedBy(MspPrincipal::parse(raw)?)),
            Token::Ident(op) => {
                let op = Operator::parse(op)?;
                self.expect(&Token::Open, "'('")?;

                let operator = match op {
                    Operator::OutOf(_) => {
                        let (offset, token) = self.next("a threshold")?;
                        let Token::Number(n) = token else {
                            return Err(EndorsementPolicyError::UnexpectedToken {
                                offset,
                                found: token.describe(),
                                expected: "a threshold",
                            });
                        };
                        self.expect(&Token::Comma, "','")?;
                        Operator::OutOf(n)
                    }
                    other => other,
                };

                let rules = self.args(depth + 1)?;
                let n = operator.threshold(rules.len())?;

                Ok(PolicyExpr::OutOf { n, rules })
            }
            other => Err(EndorsementPolicyError::UnexpectedToken {
                offset,
                found: other.describe(),
                expected: "an operator or principal",
            }),
        }
    }

    // one or more comma separated expressions followed by ')'
    fn args(&mut self, depth: usize) -> Result<Vec<PolicyExpr>, EndorsementPolicyError> {
        let mut rules = vec![self.expr(depth)?];

        loop {
            let (offset, token) = self.next("',' or ')'")?;
            match token {
                Token::Comma => rules.push(self.expr(depth)?),
                Token::Close => return Ok(rules),
                other => {
                    return Err(EndorsementPolicyError::UnexpectedToken {
                        offset,
                        found: other.describe(),
                        expected: "',' or ')'",
                    });
                }
            }
        }
    }
}

pub(super) fn parse(input: &str) -> Result<PolicyExpr, EndorsementPolicyError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(EndorsementPolicyError::Empty);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr(0)?;

    if let Some((offset, token)) = parser.peek() {
        return Err(EndorsementPolicyError::UnexpectedToken {
            offset: *offset,
            found: token.describe(),
            expected: "end of expression",
        });
    }

    Ok(expr)
}
