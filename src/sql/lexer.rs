// Lexer for key statements

use super::token::Token;
use anyhow::{bail, Result};

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let Some(ch) = self.current_char() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '-' if self.peek() == Some('-') => {
                self.skip_comment();
                return self.next_token();
            }
            '=' => {
                self.advance();
                Token::Equal
            }
            '(' => {
                self.advance();
                Token::LeftParen
            }
            ')' => {
                self.advance();
                Token::RightParen
            }
            ';' => {
                self.advance();
                Token::Semicolon
            }
            '\'' => Token::String(self.read_quoted('\'')?),
            '"' => Token::Identifier(self.read_quoted('"')?),
            'x' | 'X' if self.peek() == Some('\'') => {
                self.advance();
                let digits = self.read_quoted('\'')?;
                if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                    bail!("Blob literal may only contain hex digits");
                }
                Token::Blob(digits)
            }
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            c if c.is_ascii_digit() => self.read_number(),
            c => bail!("Unexpected character '{}'", c),
        };

        Ok(token)
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current_char(), Some(ch) if ch.is_whitespace()) {
            self.advance();
        }
    }

    /// Skip single-line comments starting with --
    fn skip_comment(&mut self) {
        while let Some(ch) = self.current_char() {
            self.advance();
            if ch == '\n' {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut identifier = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                identifier.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Token::keyword_from_str(&identifier).unwrap_or(Token::Identifier(identifier))
    }

    fn read_number(&mut self) -> Token {
        let mut number = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Token::Number(number)
    }

    /// Read a literal delimited by `quote`; a doubled quote stands for
    /// itself.
    fn read_quoted(&mut self, quote: char) -> Result<String> {
        self.advance(); // Skip opening quote
        let mut text = String::new();

        while let Some(ch) = self.current_char() {
            if ch == quote {
                if self.peek() == Some(quote) {
                    text.push(quote);
                    self.advance();
                    self.advance();
                } else {
                    self.advance(); // Skip closing quote
                    return Ok(text);
                }
            } else {
                text.push(ch);
                self.advance();
            }
        }

        bail!("Unterminated quoted literal")
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }
}
