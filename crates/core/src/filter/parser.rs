//! Recursive-descent parser for the filter grammar:
//!
//! ```text
//! expr := or
//! or   := and ('||' and)*
//! and  := atom ('&&' atom)*
//! atom := '(' or ')' | column op value
//! op   := '==' | '!=' | '<' | '<=' | '>' | '>=' | 'in' | '!in'
//! value := '?' digits | column
//! column := ident ('.' ident)*
//! ```
//!
//! Identifiers are case-sensitive; `in`, `true` and `false` are reserved.

use crate::error::FilterError;
use crate::filter::{CmpOp, ColumnRef, RowFilter};

pub fn parse(input: &str) -> Result<RowFilter, FilterError> {
    let mut parser = Parser {
        input,
        bytes: input.as_bytes(),
        pos: 0,
    };
    let filter = parser.or()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.err("trailing input after filter"));
    }
    Ok(filter)
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn err(&self, message: impl Into<String>) -> FilterError {
        FilterError::Parse {
            filter: self.input.to_owned(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.bytes[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<RowFilter, FilterError> {
        let mut children = vec![self.and()?];
        loop {
            self.skip_ws();
            if !self.eat("||") {
                break;
            }
            children.push(self.and()?);
        }
        Ok(if children.len() == 1 {
            children.pop().expect("one child")
        } else {
            RowFilter::Or(children)
        })
    }

    fn and(&mut self) -> Result<RowFilter, FilterError> {
        let mut children = vec![self.atom()?];
        loop {
            self.skip_ws();
            // Reject a single '&' early for a clearer message.
            if !self.bytes[self.pos..].starts_with(b"&&") {
                if self.peek() == Some(b'&') {
                    return Err(self.err("expected `&&`"));
                }
                break;
            }
            self.pos += 2;
            children.push(self.atom()?);
        }
        Ok(if children.len() == 1 {
            children.pop().expect("one child")
        } else {
            RowFilter::And(children)
        })
    }

    fn atom(&mut self) -> Result<RowFilter, FilterError> {
        self.skip_ws();
        if self.eat("(") {
            let inner = self.or()?;
            self.skip_ws();
            if !self.eat(")") {
                return Err(self.err("expected `)`"));
            }
            return Ok(inner);
        }
        let column = self.column_ref()?;
        let op = self.cmp_op()?;
        self.skip_ws();
        if self.eat("?") {
            let arg = self.arg_number()?;
            Ok(RowFilter::ColumnToArg { column, op, arg })
        } else if matches!(op, CmpOp::In | CmpOp::NotIn) {
            // `in` compares against an array argument, never a column.
            Err(self.err("`in` requires a `?N` argument"))
        } else {
            let other = self.column_ref()?;
            Ok(RowFilter::ColumnToColumn { column, op, other })
        }
    }

    fn column_ref(&mut self) -> Result<ColumnRef, FilterError> {
        self.skip_ws();
        let mut path = vec![self.ident()?];
        while self.peek() == Some(b'.') {
            self.pos += 1;
            path.push(self.ident()?);
        }
        Ok(ColumnRef { path })
    }

    fn ident(&mut self) -> Result<Box<str>, FilterError> {
        let start = self.pos;
        if !self
            .peek()
            .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_')
        {
            return Err(self.err("expected a column identifier"));
        }
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        let ident = &self.input[start..self.pos];
        if matches!(ident, "in" | "true" | "false") {
            self.pos = start;
            return Err(self.err(format!("`{ident}` is reserved")));
        }
        Ok(ident.into())
    }

    fn cmp_op(&mut self) -> Result<CmpOp, FilterError> {
        self.skip_ws();
        // Longest match first.
        for (token, op) in [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
            ("!in", CmpOp::NotIn),
        ] {
            if self.eat(token) {
                return Ok(op);
            }
        }
        // `in` must be followed by a non-identifier byte.
        if self.bytes[self.pos..].starts_with(b"in")
            && !self
                .bytes
                .get(self.pos + 2)
                .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 2;
            return Ok(CmpOp::In);
        }
        Err(self.err("expected a comparison operator"))
    }

    fn arg_number(&mut self) -> Result<usize, FilterError> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.err("expected an argument number after `?`"));
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| self.err("argument number out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_precedence_and_grouping() {
        let f = parse("a == ?0 && b < ?1 || c >= ?2").unwrap();
        assert_eq!(f.to_string(), "a == ?0 && b < ?1 || c >= ?2");

        let g = parse("a == ?0 && (b < ?1 || c >= ?2)").unwrap();
        assert_eq!(g.to_string(), "a == ?0 && (b < ?1 || c >= ?2)");
        assert_ne!(f, g);
    }

    #[test]
    fn parses_in_and_not_in() {
        let f = parse("tag in ?0 && tag !in ?1").unwrap();
        assert_eq!(f.to_string(), "tag in ?0 && tag !in ?1");
    }

    #[test]
    fn parses_column_to_column_and_dotted_paths() {
        let f = parse("owner.id == who && a <= b").unwrap();
        assert_eq!(f.to_string(), "owner.id == who && a <= b");
    }

    #[test]
    fn rejects_in_against_column() {
        let err = parse("a in b").unwrap_err();
        assert!(matches!(err, FilterError::Parse { .. }));
    }

    #[test]
    fn rejects_trailing_garbage_with_position() {
        match parse("a == ?0 ;") {
            Err(FilterError::Parse { position, .. }) => assert_eq!(position, 8),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn identifier_starting_with_in_is_a_column() {
        let f = parse("index == ?0").unwrap();
        assert_eq!(f.to_string(), "index == ?0");
    }
}
