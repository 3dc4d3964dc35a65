/*
 * query.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Lettera, a terminal email client.
 *
 * Lettera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Lettera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Lettera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Search query language. Terms joined implicitly by AND; operators AND, OR,
//! XOR, NOT with precedence NOT > AND > XOR > OR; `+term` must-have, `-term`
//! must-not-have, `"phrase"` exact phrase, `prefix*` wildcard, `field:term`
//! scoping. Parentheses group.

/// Indexed fields a term can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Body,
    Subject,
    From,
    To,
    Folder,
}

impl Field {
    pub fn bit(&self) -> u8 {
        match self {
            Field::Body => 1 << 0,
            Field::Subject => 1 << 1,
            Field::From => 1 << 2,
            Field::To => 1 << 3,
            Field::Folder => 1 << 4,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "body" => Some(Field::Body),
            "subject" => Some(Field::Subject),
            "from" => Some(Field::From),
            "to" => Some(Field::To),
            "folder" => Some(Field::Folder),
            _ => None,
        }
    }
}

/// Parsed query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// One term: word, wildcard prefix, or phrase (multiple tokens).
    Term {
        field: Option<Field>,
        tokens: Vec<String>,
        prefix: bool,
        phrase: bool,
    },
    Not(Box<QueryNode>),
    And(Vec<QueryNode>),
    Xor(Box<QueryNode>, Box<QueryNode>),
    Or(Vec<QueryNode>),
}

#[derive(Debug)]
pub struct QueryParseError {
    pub message: String,
}

impl std::fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for QueryParseError {}

fn err(msg: &str) -> QueryParseError {
    QueryParseError {
        message: msg.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    And,
    Or,
    Xor,
    Not,
    Minus,
    Plus,
    Open,
    Close,
    /// (field, text, wildcard) for a bare word.
    Word(Option<Field>, String, bool),
    /// (field, text) for a quoted phrase.
    Phrase(Option<Field>, String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryParseError> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                out.push(Token::Open);
            }
            ')' => {
                chars.next();
                out.push(Token::Close);
            }
            '+' => {
                chars.next();
                out.push(Token::Plus);
            }
            '-' => {
                chars.next();
                out.push(Token::Minus);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(err("unterminated phrase"));
                }
                out.push(Token::Phrase(None, text));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                // field: prefix attaches to the following word or phrase
                if let Some(colon) = word.find(':') {
                    let (name, rest) = word.split_at(colon);
                    if let Some(field) = Field::from_name(name) {
                        let rest = &rest[1..];
                        if rest.is_empty() {
                            // field:"phrase"
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                let mut text = String::new();
                                let mut closed = false;
                                for c in chars.by_ref() {
                                    if c == '"' {
                                        closed = true;
                                        break;
                                    }
                                    text.push(c);
                                }
                                if !closed {
                                    return Err(err("unterminated phrase"));
                                }
                                out.push(Token::Phrase(Some(field), text));
                                continue;
                            }
                            return Err(err("field scope without term"));
                        }
                        let (text, wildcard) = strip_wildcard(rest);
                        out.push(Token::Word(Some(field), text, wildcard));
                        continue;
                    }
                }
                match word.as_str() {
                    "AND" => out.push(Token::And),
                    "OR" => out.push(Token::Or),
                    "XOR" => out.push(Token::Xor),
                    "NOT" => out.push(Token::Not),
                    _ => {
                        let (text, wildcard) = strip_wildcard(&word);
                        out.push(Token::Word(None, text, wildcard));
                    }
                }
            }
        }
    }
    Ok(out)
}

fn strip_wildcard(word: &str) -> (String, bool) {
    match word.strip_suffix('*') {
        Some(stem) => (stem.to_string(), true),
        None => (word.to_string(), false),
    }
}

/// Lowercase alphanumeric token stream of a text; shared with the indexer so
/// queries and documents agree on token boundaries.
pub fn tokenize_text(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                current.push(lc);
            }
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // or := xor (OR xor)*
    fn parse_or(&mut self) -> Result<QueryNode, QueryParseError> {
        let first = self.parse_xor()?;
        let mut parts = vec![first];
        while self.peek() == Some(&Token::Or) {
            self.next();
            parts.push(self.parse_xor()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().unwrap()
        } else {
            QueryNode::Or(parts)
        })
    }

    // xor := and (XOR and)*, left associative
    fn parse_xor(&mut self) -> Result<QueryNode, QueryParseError> {
        let mut node = self.parse_and()?;
        while self.peek() == Some(&Token::Xor) {
            self.next();
            let rhs = self.parse_and()?;
            node = QueryNode::Xor(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    // and := unary ((AND)? unary)*; adjacency is implicit AND
    fn parse_and(&mut self) -> Result<QueryNode, QueryParseError> {
        let first = self.parse_unary()?;
        let mut parts = vec![first];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.next();
                    parts.push(self.parse_unary()?);
                }
                Some(Token::Or) | Some(Token::Xor) | Some(Token::Close) | None => break,
                Some(_) => parts.push(self.parse_unary()?),
            }
        }
        Ok(if parts.len() == 1 {
            parts.pop().unwrap()
        } else {
            QueryNode::And(parts)
        })
    }

    // unary := NOT unary | - unary | + unary | primary
    fn parse_unary(&mut self) -> Result<QueryNode, QueryParseError> {
        match self.peek() {
            Some(Token::Not) | Some(Token::Minus) => {
                self.next();
                Ok(QueryNode::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.next();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<QueryNode, QueryParseError> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(err("missing closing parenthesis")),
                }
            }
            Some(Token::Word(field, text, wildcard)) => {
                let tokens = tokenize_text(&text);
                if tokens.is_empty() {
                    return Err(err("empty term"));
                }
                Ok(QueryNode::Term {
                    field,
                    phrase: tokens.len() > 1,
                    tokens,
                    prefix: wildcard,
                })
            }
            Some(Token::Phrase(field, text)) => {
                let tokens = tokenize_text(&text);
                if tokens.is_empty() {
                    return Err(err("empty phrase"));
                }
                Ok(QueryNode::Term {
                    field,
                    tokens,
                    prefix: false,
                    phrase: true,
                })
            }
            other => Err(err(&format!("unexpected token: {:?}", other))),
        }
    }
}

/// Parse a query string into a tree.
pub fn parse_query(input: &str) -> Result<QueryNode, QueryParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(err("empty query"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(err("trailing tokens in query"));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(text: &str) -> QueryNode {
        QueryNode::Term {
            field: None,
            tokens: vec![text.to_string()],
            prefix: false,
            phrase: false,
        }
    }

    #[test]
    fn implicit_and() {
        let q = parse_query("alpha beta").unwrap();
        assert_eq!(q, QueryNode::And(vec![term("alpha"), term("beta")]));
    }

    #[test]
    fn precedence_not_and_xor_or() {
        // a OR b XOR c AND NOT d  =>  Or(a, Xor(b, And(c, Not d)))
        let q = parse_query("a OR b XOR c AND NOT d").unwrap();
        match q {
            QueryNode::Or(parts) => {
                assert_eq!(parts[0], term("a"));
                match &parts[1] {
                    QueryNode::Xor(l, r) => {
                        assert_eq!(**l, term("b"));
                        match &**r {
                            QueryNode::And(and_parts) => {
                                assert_eq!(and_parts[0], term("c"));
                                assert_eq!(and_parts[1], QueryNode::Not(Box::new(term("d"))));
                            }
                            other => panic!("expected And, got {:?}", other),
                        }
                    }
                    other => panic!("expected Xor, got {:?}", other),
                }
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn plus_and_minus() {
        let q = parse_query("+keep -drop").unwrap();
        assert_eq!(
            q,
            QueryNode::And(vec![term("keep"), QueryNode::Not(Box::new(term("drop")))])
        );
    }

    #[test]
    fn field_scoped_term() {
        let q = parse_query("subject:invoice").unwrap();
        assert_eq!(
            q,
            QueryNode::Term {
                field: Some(Field::Subject),
                tokens: vec!["invoice".to_string()],
                prefix: false,
                phrase: false,
            }
        );
    }

    #[test]
    fn field_scoped_phrase() {
        let q = parse_query("subject:\"quarterly invoice\"").unwrap();
        assert_eq!(
            q,
            QueryNode::Term {
                field: Some(Field::Subject),
                tokens: vec!["quarterly".to_string(), "invoice".to_string()],
                prefix: false,
                phrase: true,
            }
        );
    }

    #[test]
    fn wildcard_prefix() {
        let q = parse_query("inv*").unwrap();
        assert_eq!(
            q,
            QueryNode::Term {
                field: None,
                tokens: vec!["inv".to_string()],
                prefix: true,
                phrase: false,
            }
        );
    }

    #[test]
    fn parens_override_precedence() {
        let q = parse_query("(a OR b) c").unwrap();
        assert_eq!(
            q,
            QueryNode::And(vec![QueryNode::Or(vec![term("a"), term("b")]), term("c")])
        );
    }

    #[test]
    fn errors() {
        assert!(parse_query("").is_err());
        assert!(parse_query("\"unterminated").is_err());
        assert!(parse_query("(a OR b").is_err());
        assert!(parse_query("a AND").is_err());
    }

    #[test]
    fn tokenizer_lowercases_and_splits() {
        assert_eq!(
            tokenize_text("Hello, World-Wide Web2"),
            vec!["hello", "world", "wide", "web2"]
        );
    }
}
