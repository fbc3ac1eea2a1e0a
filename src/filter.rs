// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Boolean expression parser for `if="…"` attributes.

A hand-rolled recursive-descent parser over a single regex-driven
tokenizer, evaluating directly as it descends rather than building an AST
first. Operator precedence is `!` > `and` > `or`. Error positions are
1-based character offsets, matching what a specfile author sees when
counting characters in their own attribute value.
*/

use {
    crate::error::{BoltError, Result},
    once_cell::sync::Lazy,
    regex::Regex,
    std::collections::HashSet,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TokenKind {
    Open,
    Close,
    Word,
    Not,
    And,
    Or,
}

#[derive(Clone, Debug)]
struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
}

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<open>\()|(?P<close>\))|(?P<word>[a-z][-0-9a-z_]*)|(?P<not>!)|(?P<whitespace>\s+)|(?P<unknown>.+?)",
    )
    .expect("static regex is valid")
});

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();

    for m in TOKEN_RE.captures_iter(expr) {
        let (kind_name, text, start) = if let Some(g) = m.name("open") {
            ("open", g.as_str(), g.start())
        } else if let Some(g) = m.name("close") {
            ("close", g.as_str(), g.start())
        } else if let Some(g) = m.name("word") {
            ("word", g.as_str(), g.start())
        } else if let Some(g) = m.name("not") {
            ("not", g.as_str(), g.start())
        } else if let Some(g) = m.name("whitespace") {
            ("whitespace", g.as_str(), g.start())
        } else {
            let g = m.name("unknown").expect("one alternative always matches");
            ("unknown", g.as_str(), g.start())
        };

        if kind_name == "whitespace" {
            continue;
        }

        let position = start + 1;

        let kind = match kind_name {
            "open" => TokenKind::Open,
            "close" => TokenKind::Close,
            "not" => TokenKind::Not,
            "word" => match text {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                _ => TokenKind::Word,
            },
            "unknown" => {
                return Err(BoltError::FilterSyntaxError(format!(
                    "invalid token \"{}\" at position {}",
                    text, position
                )))
            }
            _ => unreachable!(),
        };

        tokens.push(Token {
            kind,
            text: text.to_string(),
            position,
        });
    }

    Ok(tokens)
}

/// Evaluates `if="…"` expressions against a set of true build terms.
///
/// `true`/`false` are pre-seeded literal words, exactly as a caller-supplied
/// term named `true` or `false` would be if it were allowed to collide.
pub struct FilterParser {
    symbols: HashSet<String>,
}

impl FilterParser {
    pub fn new(true_terms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut symbols: HashSet<String> = true_terms.into_iter().map(|t| t.into()).collect();
        symbols.insert("true".to_string());
        symbols.remove("false");
        Self { symbols }
    }

    /// Parse and evaluate `expr`. An empty expression is `true`.
    pub fn parse(&self, expr: &str) -> Result<bool> {
        let mut tokens = tokenize(expr)?;
        let result = self.parse_expr(&mut tokens, 0, false)?;
        Ok(result.unwrap_or(true))
    }

    fn parse_expr(
        &self,
        tokens: &mut Vec<Token>,
        level: u32,
        top_short_cut: bool,
    ) -> Result<Option<bool>> {
        if level > 64 {
            return Err(BoltError::FilterSyntaxError(
                "expression generates too many levels of recursion".to_string(),
            ));
        }

        let mut result: Option<bool> = None;
        let short_cut = top_short_cut;

        while let Some(token) = tokens.first().cloned() {
            match token.kind {
                TokenKind::Not => {
                    tokens.remove(0);

                    if result.is_some() {
                        return Err(BoltError::FilterSyntaxError(format!(
                            "syntax error at position {}",
                            token.position
                        )));
                    }

                    let expr_val = self.parse_expr(tokens, level + 1, true)?;
                    let expr_val = expr_val.ok_or_else(|| {
                        BoltError::FilterSyntaxError(format!(
                            "operator '!' requires an operand at position {}",
                            token.position
                        ))
                    })?;

                    result = Some(!expr_val);
                    if short_cut {
                        break;
                    }
                }
                TokenKind::And => {
                    tokens.remove(0);

                    let left = result.ok_or_else(|| {
                        BoltError::FilterSyntaxError(format!(
                            "operator \"and\" at position {} is missing its left hand operand",
                            token.position
                        ))
                    })?;

                    let right = self.parse_expr(tokens, level + 1, true)?;
                    let right = right.ok_or_else(|| {
                        BoltError::FilterSyntaxError(format!(
                            "operator \"and\" at position {} is missing its right hand operand",
                            token.position
                        ))
                    })?;

                    result = Some(left && right);
                }
                TokenKind::Or => {
                    tokens.remove(0);

                    let left = result.ok_or_else(|| {
                        BoltError::FilterSyntaxError(format!(
                            "operator \"or\" at position {} is missing its left hand operand",
                            token.position
                        ))
                    })?;

                    let right = self.parse_expr(tokens, level + 1, false)?;
                    let right = right.ok_or_else(|| {
                        BoltError::FilterSyntaxError(format!(
                            "operator \"or\" at position {} is missing its right hand operand",
                            token.position
                        ))
                    })?;

                    result = Some(left || right);
                }
                TokenKind::Word => {
                    tokens.remove(0);

                    if result.is_some() {
                        return Err(BoltError::FilterSyntaxError(format!(
                            "syntax error at position {}",
                            token.position
                        )));
                    }

                    result = Some(self.symbols.contains(&token.text));
                    if short_cut {
                        break;
                    }
                }
                TokenKind::Open => {
                    tokens.remove(0);

                    if result.is_some() {
                        return Err(BoltError::FilterSyntaxError(format!(
                            "syntax error at position {}",
                            token.position
                        )));
                    }

                    let inner = self.parse_expr(tokens, level + 1, false)?;

                    match tokens.first() {
                        Some(t) if t.kind == TokenKind::Close => {
                            tokens.remove(0);
                        }
                        _ => {
                            return Err(BoltError::FilterSyntaxError(format!(
                                "missing closing parenthesis for parenthesis at position {}",
                                token.position
                            )))
                        }
                    }

                    result = inner;
                    if short_cut {
                        break;
                    }
                }
                TokenKind::Close => {
                    if level == 0 {
                        return Err(BoltError::FilterSyntaxError(format!(
                            "missing opening parenthesis for parenthesis at position {}",
                            token.position
                        )));
                    }
                    break;
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FilterParser {
        FilterParser::new(["aarch64", "musl", "cross-tools"])
    }

    #[test]
    fn true_symbol() -> Result<()> {
        assert!(parser().parse("aarch64")?);
        Ok(())
    }

    #[test]
    fn false_symbol() -> Result<()> {
        assert!(!parser().parse("s390x")?);
        Ok(())
    }

    #[test]
    fn negation() -> Result<()> {
        assert!(!parser().parse("!aarch64")?);
        assert!(parser().parse("!s390x")?);
        assert!(parser().parse("!!aarch64")?);
        Ok(())
    }

    #[test]
    fn and_or_precedence() -> Result<()> {
        assert!(!parser().parse("aarch64 and !aarch64")?);
        assert!(parser().parse("aarch64 or musl and s390x")?);
        assert!(parser().parse("s390x and aarch64 or musl")?);
        Ok(())
    }

    #[test]
    fn parens_override_precedence() -> Result<()> {
        assert!(!parser().parse("(aarch64 or musl) and s390x")?);
        assert!(!parser().parse("s390x and (aarch64 or musl)")?);
        Ok(())
    }

    #[test]
    fn literals() -> Result<()> {
        assert!(parser().parse("true")?);
        assert!(!parser().parse("false")?);
        assert!(parser().parse("cross-tools")?);
        Ok(())
    }

    #[test]
    fn empty_expr_is_true() -> Result<()> {
        assert!(parser().parse("")?);
        Ok(())
    }

    #[test]
    fn misplaced_not() {
        let err = parser().parse("s390x !aarch64").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(m) if m.contains("position 7")));
    }

    #[test]
    fn misplaced_symbol() {
        let err = parser().parse("s390x aarch64").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(m) if m.contains("position 7")));
    }

    #[test]
    fn not_without_operand() {
        let err = parser().parse("s390x and !").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(m) if m.contains("position 11")));
    }

    #[test]
    fn and_missing_left_operand() {
        let err = parser().parse("and").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(m) if m.contains("position 1")));
    }

    #[test]
    fn or_missing_right_operand() {
        let err = parser().parse("s390x or").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(m) if m.contains("position 7")));
    }

    #[test]
    fn missing_closing_paren() {
        let err = parser().parse("(()()").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(m) if m.contains("position 1")));
    }

    #[test]
    fn missing_opening_paren() {
        let err = parser().parse(")").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(m) if m.contains("position 1")));
    }

    #[test]
    fn unknown_token() {
        let err = parser().parse("aarch64 & musl").unwrap_err();
        assert!(matches!(err, BoltError::FilterSyntaxError(_)));
    }
}
