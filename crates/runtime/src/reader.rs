//! Reader and Writer
//!
//! The reader turns source text into the initial value graph: lists in
//! `()` or `[]`, dotted pairs, quote/quasiquote/unquote sugar, string
//! literals with `\\ \n \t \"` escapes, integer and float literals,
//! `#t` `#f` `#n`, float-vector literals `#v(…)`, and `;` line comments.
//! Malformed input raises invalid-syntax.
//!
//! The writer renders a value back to source text. Readable values
//! round-trip: strings are re-escaped, floats always carry a decimal
//! point, nil prints as `#n`, and improper lists use dotted tails.
//! Closures and externs print as opaque, non-readable forms.

use tarn_core::{Error, NIL, Result, Value, ValueType, car, cdr};

use crate::runtime::Runtime;

struct Reader<'a, 'src> {
    rt: &'a mut Runtime,
    src: &'src [u8],
    pos: usize,
}

fn is_delimiter(c: u8) -> bool {
    c.is_ascii_whitespace() || matches!(c, b'(' | b')' | b'[' | b']' | b';' | b'"')
}

impl<'a, 'src> Reader<'a, 'src> {
    fn new(rt: &'a mut Runtime, src: &'src str) -> Self {
        Reader { rt, src: src.as_bytes(), pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    /// Skip whitespace and `;` line comments.
    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else if c == b';' {
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Whether position `i` ends a token (end of input or a delimiter).
    fn is_break(&self, i: usize) -> bool {
        self.src.get(i).is_none_or(|&c| is_delimiter(c))
    }

    fn parse_value(&mut self, quasimode: bool) -> Result<Value> {
        self.skip_ws();
        let c = self
            .peek()
            .ok_or_else(|| Error::InvalidSyntax("unexpected end of input".into()))?;
        match c {
            b'(' => {
                self.pos += 1;
                self.parse_list(b')', quasimode)
            }
            b'[' => {
                self.pos += 1;
                self.parse_list(b']', quasimode)
            }
            b')' | b']' => Err(Error::InvalidSyntax("unexpected closing delimiter".into())),
            b'\'' => {
                self.pos += 1;
                let x = self.parse_value(quasimode)?;
                self.sugar(self.rt.syms.quote, x)
            }
            b'`' => {
                self.pos += 1;
                let x = self.parse_value(true)?;
                self.sugar(self.rt.syms.quasiquote, x)
            }
            b',' if quasimode => {
                self.pos += 1;
                let splicing = self.peek() == Some(b'@');
                if splicing {
                    self.pos += 1;
                }
                let head =
                    if splicing { self.rt.syms.unquote_splicing } else { self.rt.syms.unquote };
                let x = self.parse_value(quasimode)?;
                self.sugar(head, x)
            }
            b'"' => self.parse_string(),
            b'#' => self.parse_hash(),
            b'-' if self.src.get(self.pos + 1).is_some_and(u8::is_ascii_digit) => {
                self.parse_number()
            }
            b'0'..=b'9' => self.parse_number(),
            _ => self.parse_symbol(),
        }
    }

    /// Wrap `x` as `(head x)`.
    fn sugar(&mut self, head: Value, x: Value) -> Result<Value> {
        let tail = self.rt.cons(x, NIL)?;
        self.rt.cons(head, tail)
    }

    fn parse_list(&mut self, close: u8, quasimode: bool) -> Result<Value> {
        let mut items = Vec::new();
        let mut tail = NIL;
        loop {
            self.skip_ws();
            let c = self.peek().ok_or_else(|| Error::InvalidSyntax("unclosed list".into()))?;
            if c == close {
                self.pos += 1;
                break;
            }
            if c == b')' || c == b']' {
                return Err(Error::InvalidSyntax("mismatched closing delimiter".into()));
            }
            if c == b'.' && self.is_break(self.pos + 1) {
                if items.is_empty() {
                    return Err(Error::InvalidSyntax("dotted tail without a head".into()));
                }
                self.pos += 1;
                tail = self.parse_value(quasimode)?;
                self.skip_ws();
                if self.peek() != Some(close) {
                    return Err(Error::InvalidSyntax("malformed dotted list".into()));
                }
                self.pos += 1;
                break;
            }
            items.push(self.parse_value(quasimode)?);
        }
        let mut out = tail;
        for &item in items.iter().rev() {
            out = self.rt.cons(item, out)?;
        }
        Ok(out)
    }

    fn parse_string(&mut self) -> Result<Value> {
        self.pos += 1;
        let mut s = String::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| Error::InvalidSyntax("unterminated string literal".into()))?;
            self.pos += 1;
            match c {
                b'"' => break,
                b'\\' => {
                    let esc = self.peek().ok_or_else(|| {
                        Error::InvalidSyntax("unterminated string literal".into())
                    })?;
                    self.pos += 1;
                    match esc {
                        b'\\' => s.push('\\'),
                        b'n' => s.push('\n'),
                        b't' => s.push('\t'),
                        b'"' => s.push('"'),
                        other => {
                            return Err(Error::InvalidSyntax(format!(
                                "unknown string escape '\\{}'",
                                other as char
                            )));
                        }
                    }
                }
                _ => {
                    // Multi-byte UTF-8 sequences pass through untouched.
                    let start = self.pos - 1;
                    let mut end = self.pos;
                    while end < self.src.len() && self.src[end] & 0xc0 == 0x80 {
                        end += 1;
                    }
                    let chunk = std::str::from_utf8(&self.src[start..end])
                        .map_err(|_| Error::InvalidSyntax("invalid UTF-8 in string".into()))?;
                    s.push_str(chunk);
                    self.pos = end;
                }
            }
        }
        self.rt.make_string(&s)
    }

    /// Scan one numeric token and classify it: a `.` makes it a float.
    fn scan_number_token(&mut self) -> Result<(&'src str, bool)> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == b'.' {
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let token = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| Error::InvalidSyntax("invalid numeric literal".into()))?;
        Ok((token, is_float))
    }

    fn parse_number(&mut self) -> Result<Value> {
        let (token, is_float) = self.scan_number_token()?;
        if is_float {
            let v: f32 = token
                .parse()
                .map_err(|_| Error::InvalidSyntax(format!("malformed float literal '{token}'")))?;
            return Ok(Value::from_float(v));
        }
        let v: i64 = token
            .parse()
            .map_err(|_| Error::InvalidSyntax(format!("malformed integer literal '{token}'")))?;
        // Integers carry 60 payload bits; anything wider is a literal error.
        if (v << 4) >> 4 != v {
            return Err(Error::InvalidSyntax(format!("integer literal '{token}' out of range")));
        }
        Ok(Value::from_int(v))
    }

    fn parse_hash(&mut self) -> Result<Value> {
        self.pos += 1;
        let c = self
            .peek()
            .ok_or_else(|| Error::InvalidSyntax("dangling '#' at end of input".into()))?;
        self.pos += 1;
        match c {
            b't' => Ok(tarn_core::TRUE),
            b'f' => Ok(tarn_core::FALSE),
            b'n' => Ok(NIL),
            b'v' => {
                if self.peek() != Some(b'(') {
                    return Err(Error::InvalidSyntax("expected '(' after '#v'".into()));
                }
                self.pos += 1;
                let mut vals = Vec::new();
                loop {
                    self.skip_ws();
                    match self.peek() {
                        None => {
                            return Err(Error::InvalidSyntax("unclosed float-vector literal".into()));
                        }
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => {
                            let (token, _) = self.scan_number_token()?;
                            let v: f32 = token.parse().map_err(|_| {
                                Error::InvalidSyntax(format!(
                                    "malformed float '{token}' in #v literal"
                                ))
                            })?;
                            vals.push(v);
                        }
                    }
                }
                self.rt.make_fvec(&vals)
            }
            other => Err(Error::InvalidSyntax(format!("unknown '#' syntax '#{}'", other as char))),
        }
    }

    fn parse_symbol(&mut self) -> Result<Value> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| Error::InvalidSyntax("invalid UTF-8 in symbol".into()))?;
        Ok(self.rt.symbol(name))
    }
}

impl Runtime {
    /// Parse the first form in `src`. Empty input reads as nil.
    pub fn read(&mut self, src: &str) -> Result<Value> {
        let mut r = Reader::new(self, src);
        r.skip_ws();
        if r.at_end() {
            return Ok(NIL);
        }
        r.parse_value(false)
    }

    /// Parse every top-level form in `src` into a list.
    pub fn read_all(&mut self, src: &str) -> Result<Value> {
        let mut forms = Vec::new();
        {
            let mut r = Reader::new(self, src);
            loop {
                r.skip_ws();
                if r.at_end() {
                    break;
                }
                forms.push(r.parse_value(false)?);
            }
        }
        self.make_list(&forms)
    }

    /// Render a value as source text.
    pub fn write_value(&self, v: Value) -> String {
        let mut out = String::new();
        self.write_into(&mut out, v);
        out
    }

    fn write_into(&self, out: &mut String, v: Value) {
        use std::fmt::Write;
        match v.value_type() {
            ValueType::Nil => out.push_str("#n"),
            ValueType::Bool => out.push_str(if v == tarn_core::TRUE { "#t" } else { "#f" }),
            ValueType::Int => {
                let _ = write!(out, "{}", v.as_int_unchecked());
            }
            ValueType::Float => write_float(out, v.as_float_unchecked()),
            ValueType::Symbol => {
                out.push_str(self.symbol_name(v).unwrap_or("#<symbol>"));
            }
            ValueType::Str => {
                out.push('"');
                if let Ok(s) = self.string_contents(v) {
                    for c in s.chars() {
                        match c {
                            '\\' => out.push_str("\\\\"),
                            '\n' => out.push_str("\\n"),
                            '\t' => out.push_str("\\t"),
                            '"' => out.push_str("\\\""),
                            _ => out.push(c),
                        }
                    }
                }
                out.push('"');
            }
            ValueType::FVec => {
                out.push_str("#v(");
                if let Ok(data) = self.fvec_contents(v) {
                    for (i, &f) in data.iter().enumerate() {
                        if i > 0 {
                            out.push(' ');
                        }
                        write_float(out, f);
                    }
                }
                out.push(')');
            }
            ValueType::Pair => {
                out.push('(');
                let mut cur = v;
                let mut sep = false;
                while cur.value_type() == ValueType::Pair {
                    if sep {
                        out.push(' ');
                    }
                    sep = true;
                    if let Ok(head) = car(cur) {
                        self.write_into(out, head);
                    }
                    cur = cdr(cur).unwrap_or(NIL);
                }
                if !cur.is_nil() {
                    out.push_str(" . ");
                    self.write_into(out, cur);
                }
                out.push(')');
            }
            ValueType::Closure => {
                let _ = write!(out, "#closure<{:x}>", v.bits());
            }
            ValueType::Extern => {
                let _ = write!(out, "#extern<{:x}>", v.bits());
            }
        }
    }
}

/// Floats always print with a decimal point so they read back as floats.
fn write_float(out: &mut String, f: f32) {
    use std::fmt::Write;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e9 {
        let _ = write!(out, "{f:.1}");
    } else {
        let _ = write!(out, "{f}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeOptions;

    fn rt() -> Runtime {
        Runtime::new(RuntimeOptions { heap_size: 256 * 1024, load_stdlib: false }).unwrap()
    }

    #[test]
    fn reads_atoms() {
        let mut rt = rt();
        assert_eq!(rt.read("42").unwrap(), Value::from_int(42));
        assert_eq!(rt.read("-7").unwrap(), Value::from_int(-7));
        assert_eq!(rt.read("2.5").unwrap(), Value::from_float(2.5));
        assert_eq!(rt.read("#t").unwrap(), tarn_core::TRUE);
        assert_eq!(rt.read("#f").unwrap(), tarn_core::FALSE);
        assert_eq!(rt.read("#n").unwrap(), NIL);
        let s = rt.read("\"a\\nb\"").unwrap();
        assert_eq!(rt.string_contents(s).unwrap(), "a\nb");
    }

    #[test]
    fn reads_lists_and_brackets() {
        let mut rt = rt();
        let v = rt.read("(1 [2 3] 4)").unwrap();
        assert_eq!(rt.write_value(v), "(1 (2 3) 4)");
    }

    #[test]
    fn reads_dotted_pairs() {
        let mut rt = rt();
        let v = rt.read("(1 . 2)").unwrap();
        assert_eq!(car(v).unwrap(), Value::from_int(1));
        assert_eq!(cdr(v).unwrap(), Value::from_int(2));
        assert_eq!(rt.write_value(v), "(1 . 2)");
    }

    #[test]
    fn quote_sugar_expands() {
        let mut rt = rt();
        let v = rt.read("'x").unwrap();
        assert_eq!(rt.write_value(v), "(quote x)");
        let v = rt.read("`(a ,b ,@c)").unwrap();
        assert_eq!(
            rt.write_value(v),
            "(quasiquote (a (unquote b) (unquote-splicing c)))"
        );
    }

    #[test]
    fn minus_is_a_symbol_unless_numeric() {
        let mut rt = rt();
        let v = rt.read("-").unwrap();
        assert_eq!(v.value_type(), ValueType::Symbol);
        assert_eq!(rt.read("-3").unwrap(), Value::from_int(-3));
    }

    #[test]
    fn fvec_literals() {
        let mut rt = rt();
        let v = rt.read("#v(1 2.5 -3)").unwrap();
        assert_eq!(rt.fvec_contents(v).unwrap(), &[1.0, 2.5, -3.0]);
        assert_eq!(rt.write_value(v), "#v(1.0 2.5 -3.0)");
    }

    #[test]
    fn comments_are_skipped() {
        let mut rt = rt();
        let forms = rt.read_all("; heading\n1 ; trailing\n2\n").unwrap();
        assert_eq!(rt.write_value(forms), "(1 2)");
    }

    #[test]
    fn malformed_input_is_invalid_syntax() {
        let mut rt = rt();
        for src in ["(1 2", "\"abc", "#q", "(1 . 2 3)", "1152921504606846976"] {
            match rt.read(src) {
                Err(Error::InvalidSyntax(_)) => {}
                other => panic!("{src:?} should be invalid syntax, got {other:?}"),
            }
        }
    }

    #[test]
    fn floats_round_trip_through_write() {
        let mut rt = rt();
        let v = rt.read("3.0").unwrap();
        let text = rt.write_value(v);
        assert_eq!(text, "3.0");
        assert_eq!(rt.read(&text).unwrap(), v);
    }
}
