//! The lexer. Greedily consumes the longest next token, tracking source
//! position with explicit line counting rather than spans.

use log::trace;

use crate::common::token::{keyword, Token, TokenKind};
use crate::error::LexError;

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    /// Lexes `source` into a vector of tokens terminated by `TokenKind::End`.
    pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        lexer.run()?;
        Ok(lexer.tokens)
    }

    fn run(&mut self) -> Result<(), LexError> {
        loop {
            self.skip_trivia();
            if self.at_end() {
                break;
            }
            let token = self.next_token()?;
            trace!("lexed {:?} at line {}", token.kind, token.line);
            self.tokens.push(token);
        }
        self.tokens.push(Token::new(TokenKind::End, "", self.line));
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while !self.at_end() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let line = self.line;
        let start = self.pos;
        let c = self.advance().unwrap();

        let kind = match c {
            '.' => {
                if c == '.' && self.peek() == Some('.') && self.peek_next() == Some('.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '?' => TokenKind::Question,
            '+' => if self.matches('=') { TokenKind::PlusEq } else { TokenKind::Plus },
            '-' => if self.matches('=') { TokenKind::MinusEq } else { TokenKind::Minus },
            '*' => if self.matches('=') { TokenKind::StarEq } else { TokenKind::Star },
            '/' => if self.matches('=') { TokenKind::SlashEq } else { TokenKind::Slash },
            '%' => if self.matches('=') { TokenKind::PercentEq } else { TokenKind::Percent },
            '^' => if self.matches('=') { TokenKind::CaretEq } else { TokenKind::Caret },
            '~' => TokenKind::Tilde,
            '&' => {
                if self.matches('&') {
                    TokenKind::AmpAmp
                } else if self.matches('=') {
                    TokenKind::AmpEq
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.matches('|') {
                    TokenKind::PipePipe
                } else if self.matches('=') {
                    TokenKind::PipeEq
                } else {
                    TokenKind::Pipe
                }
            }
            '<' => {
                if self.matches('<') {
                    if self.matches('=') { TokenKind::ShlEq } else { TokenKind::Shl }
                } else if self.matches('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.matches('>') {
                    if self.matches('=') { TokenKind::ShrEq } else { TokenKind::Shr }
                } else if self.matches('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '=' => if self.matches('=') { TokenKind::EqEq } else { TokenKind::Eq },
            '!' => if self.matches('=') { TokenKind::NotEq } else { TokenKind::Bang },
            '"' => return self.string(line),
            '0'..='9' => return self.number(start, line),
            c if is_ident_start(c) => return self.identifier(start, line),
            other => {
                return Err(LexError::new(line, format!("illegal character '{}'", other)));
            }
        };

        let lexeme: String = self.chars[start..self.pos].iter().collect();
        Ok(Token::new(kind, lexeme, line))
    }

    fn string(&mut self, line: usize) -> Result<Token, LexError> {
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexError::new(line, "unterminated string"));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = self.advance().ok_or_else(|| {
                        LexError::new(line, "unterminated string escape")
                    })?;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '"' => '"',
                        '\\' => '\\',
                        other => {
                            return Err(LexError::new(
                                line,
                                format!("unknown escape sequence '\\{}'", other),
                            ))
                        }
                    });
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(TokenKind::Str(value.clone()), value, line))
    }

    fn number(&mut self, start: usize, line: usize) -> Result<Token, LexError> {
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' && !seen_dot && self.peek_next().map_or(false, |n| n.is_ascii_digit()) {
                seen_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        let lexeme: String = self.chars[start..self.pos].iter().collect();
        let kind = if seen_dot {
            let value: f64 = lexeme
                .parse()
                .map_err(|_| LexError::new(line, format!("malformed float '{}'", lexeme)))?;
            TokenKind::Float(value)
        } else {
            let value: i64 = lexeme
                .parse()
                .map_err(|_| LexError::new(line, format!("malformed integer '{}'", lexeme)))?;
            TokenKind::Integer(value)
        };
        Ok(Token::new(kind, lexeme, line))
    }

    fn identifier(&mut self, start: usize, line: usize) -> Result<Token, LexError> {
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        let lexeme: String = self.chars[start..self.pos].iter().collect();
        let kind = match &lexeme[..] {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            other => keyword(other).unwrap_or_else(|| TokenKind::Identifier(lexeme.clone())),
        };
        Ok(Token::new(kind, lexeme, line))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lexes_arithmetic() {
        let tokens = Lexer::lex("1 + 2 * 3").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Integer(1),
                TokenKind::Plus,
                TokenKind::Integer(2),
                TokenKind::Star,
                TokenKind::Integer(3),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        let tokens = Lexer::lex("let x = nil; if(x) return;").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Let,
                TokenKind::Identifier("x".into()),
                TokenKind::Eq,
                TokenKind::Nil,
                TokenKind::Semicolon,
                TokenKind::If,
                TokenKind::LParen,
                TokenKind::Identifier("x".into()),
                TokenKind::RParen,
                TokenKind::Return,
                TokenKind::Semicolon,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn tracks_line_numbers() {
        let tokens = Lexer::lex("1\n2\n3").unwrap();
        let lines: Vec<_> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 3]);
    }

    #[test]
    fn skips_line_comments() {
        let tokens = Lexer::lex("1 // this is a comment\n+ 2").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Integer(1), TokenKind::Plus, TokenKind::Integer(2), TokenKind::End]
        );
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = Lexer::lex("\"unterminated").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn errors_on_illegal_character() {
        let err = Lexer::lex("1 $ 2").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn string_escapes() {
        let tokens = Lexer::lex(r#""a\nb""#).unwrap();
        match &tokens[0].kind {
            TokenKind::Str(s) => assert_eq!(s, "a\nb"),
            other => panic!("expected string, got {:?}", other),
        }
    }
}
