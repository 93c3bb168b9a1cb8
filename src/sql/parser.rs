// Parser for key statements

use super::ast::*;
use super::lexer::Lexer;
use super::token::Token;
use crate::codec::{CipherSuite, KeySecret};
use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(sql: &str) -> Result<Self> {
        let tokens = Lexer::new(sql).tokenize()?;
        Ok(Parser {
            tokens,
            position: 0,
        })
    }

    /// Parse a single statement, with an optional trailing semicolon.
    pub fn parse(&mut self) -> Result<Statement> {
        let statement = match self.current_token() {
            Token::Set => self.parse_set_key()?,
            Token::Rekey => {
                self.advance();
                Statement::Rekey(self.parse_rekey_value()?)
            }
            Token::Clear => {
                self.advance();
                self.expect_token(Token::Key)?;
                Statement::ClearKey
            }
            Token::Pragma => self.parse_pragma()?,
            other => bail!("Expected key statement, found {}", other.describe()),
        };

        if self.match_token(&Token::Semicolon) {
            self.advance();
        }
        if !self.match_token(&Token::Eof) {
            bail!(
                "Unexpected {} after statement",
                self.current_token().describe()
            );
        }
        Ok(statement)
    }

    /// SET KEY <key>
    fn parse_set_key(&mut self) -> Result<Statement> {
        self.expect_token(Token::Set)?;
        self.expect_token(Token::Key)?;
        Ok(Statement::SetKey(self.parse_key()?))
    }

    /// PRAGMA name [= value | (value)]
    fn parse_pragma(&mut self) -> Result<Statement> {
        self.expect_token(Token::Pragma)?;

        match self.current_token() {
            Token::Key => {
                self.advance();
                let has_paren = self.parse_assignment_start()?;
                let key = self.parse_key()?;
                self.parse_assignment_end(has_paren)?;
                Ok(Statement::SetKey(key))
            }
            Token::Rekey => {
                self.advance();
                let has_paren = self.parse_assignment_start()?;
                let key = self.parse_rekey_value()?;
                self.parse_assignment_end(has_paren)?;
                Ok(Statement::Rekey(key))
            }
            Token::Identifier(name) => {
                self.advance();
                match name.to_ascii_lowercase().as_str() {
                    "cipher_integrity_check" => return Ok(Statement::IntegrityCheck),
                    "cipher_status" => return Ok(Statement::CipherStatus),
                    _ => {}
                }
                let param = ParameterName::from_pragma(&name)
                    .with_context(|| format!("Unknown pragma: {}", name))?;
                if self.match_token(&Token::Semicolon) || self.match_token(&Token::Eof) {
                    return Ok(Statement::ShowParameter(param));
                }
                let has_paren = self.parse_assignment_start()?;
                let value = self.parse_parameter_value(param)?;
                self.parse_assignment_end(has_paren)?;
                Ok(Statement::SetParameter(value))
            }
            other => bail!("Expected pragma name, found {}", other.describe()),
        }
    }

    fn parse_assignment_start(&mut self) -> Result<bool> {
        match self.current_token() {
            Token::Equal => {
                self.advance();
                Ok(false)
            }
            Token::LeftParen => {
                self.advance();
                Ok(true)
            }
            other => bail!("Expected '=' or '(', found {}", other.describe()),
        }
    }

    fn parse_assignment_end(&mut self, has_paren: bool) -> Result<()> {
        if has_paren {
            self.expect_token(Token::RightParen)?;
        }
        Ok(())
    }

    fn parse_parameter_value(&mut self, param: ParameterName) -> Result<CipherParameter> {
        let value = match param {
            ParameterName::KdfIterations => {
                CipherParameter::KdfIterations(self.expect_number()?.parse()?)
            }
            ParameterName::PageSize => CipherParameter::PageSize(self.expect_number()?.parse()?),
            ParameterName::ReserveBytes => {
                CipherParameter::ReserveBytes(self.expect_number()?.parse()?)
            }
            ParameterName::Cipher => {
                let name = match self.current_token() {
                    Token::String(s) | Token::Identifier(s) => s,
                    other => bail!("Expected cipher name, found {}", other.describe()),
                };
                self.advance();
                CipherParameter::Cipher(name.parse::<CipherSuite>()?)
            }
        };
        Ok(value)
    }

    /// A key literal: `'passphrase'`, `x'<hex>'` or `"x'<hex>'"`.
    fn parse_key(&mut self) -> Result<KeySecret> {
        let secret = match self.current_token() {
            Token::String(text) | Token::Identifier(text) => {
                let text = Zeroizing::new(text);
                KeySecret::parse(&text)?
            }
            Token::Blob(digits) => {
                let bytes = Zeroizing::new(hex::decode(&digits).context("Malformed hex key")?);
                KeySecret::raw(&bytes)?
            }
            other => bail!("Expected key literal, found {}", other.describe()),
        };
        self.advance();
        Ok(secret)
    }

    /// Like [`parse_key`](Self::parse_key), but `''` means "no key".
    fn parse_rekey_value(&mut self) -> Result<Option<KeySecret>> {
        if let Token::String(text) = self.current_token() {
            if text.is_empty() {
                self.advance();
                return Ok(None);
            }
        }
        Ok(Some(self.parse_key()?))
    }

    // Helper methods

    fn current_token(&self) -> Token {
        self.tokens
            .get(self.position)
            .cloned()
            .unwrap_or(Token::Eof)
    }

    fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    fn match_token(&self, token: &Token) -> bool {
        self.current_token() == *token
    }

    fn expect_token(&mut self, token: Token) -> Result<()> {
        if self.current_token() == token {
            self.advance();
            Ok(())
        } else {
            bail!(
                "Expected {}, found {}",
                token.describe(),
                self.current_token().describe()
            )
        }
    }

    fn expect_number(&mut self) -> Result<String> {
        match self.current_token() {
            Token::Number(n) => {
                self.advance();
                Ok(n)
            }
            other => bail!("Expected number, found {}", other.describe()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Result<Statement> {
        Parser::new(sql)?.parse()
    }

    #[test]
    fn test_parse_set_key() -> Result<()> {
        match parse("SET KEY 'alpha';")? {
            Statement::SetKey(KeySecret::Passphrase(p)) => assert_eq!(&p[..], b"alpha"),
            other => panic!("unexpected statement {:?}", other),
        }
        match parse("PRAGMA key = 'alpha'")? {
            Statement::SetKey(secret) => assert!(!secret.is_raw()),
            other => panic!("unexpected statement {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_parse_raw_keys() -> Result<()> {
        let hex = "2d".repeat(32);
        for sql in [
            format!("SET KEY x'{}'", hex),
            format!("PRAGMA key = \"x'{}'\"", hex),
            format!("PRAGMA key = 'x''{}'''", hex),
        ] {
            match parse(&sql)? {
                Statement::SetKey(secret) => assert!(secret.is_raw(), "{}", sql),
                other => panic!("unexpected statement {:?}", other),
            }
        }
        assert!(parse("SET KEY x'2d2d'").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_rekey() -> Result<()> {
        assert!(matches!(parse("REKEY 'beta'")?, Statement::Rekey(Some(_))));
        assert!(matches!(parse("REKEY ''")?, Statement::Rekey(None)));
        assert!(matches!(
            parse("PRAGMA rekey = 'beta'")?,
            Statement::Rekey(Some(_))
        ));
        assert!(matches!(parse("PRAGMA rekey('')")?, Statement::Rekey(None)));
        Ok(())
    }

    #[test]
    fn test_parse_other_statements() -> Result<()> {
        assert!(matches!(parse("CLEAR KEY")?, Statement::ClearKey));
        assert!(matches!(
            parse("PRAGMA cipher_integrity_check;")?,
            Statement::IntegrityCheck
        ));
        assert!(matches!(
            parse("pragma CIPHER_STATUS")?,
            Statement::CipherStatus
        ));
        Ok(())
    }

    #[test]
    fn test_parse_parameters() -> Result<()> {
        assert!(matches!(
            parse("PRAGMA kdf_iter = 64000")?,
            Statement::SetParameter(CipherParameter::KdfIterations(64000))
        ));
        assert!(matches!(
            parse("PRAGMA cipher_page_size(8192)")?,
            Statement::SetParameter(CipherParameter::PageSize(8192))
        ));
        assert!(matches!(
            parse("PRAGMA cipher_reserve_size = 80")?,
            Statement::SetParameter(CipherParameter::ReserveBytes(80))
        ));
        assert!(matches!(
            parse("PRAGMA cipher = 'aes-256-ctr-hmac-sha512'")?,
            Statement::SetParameter(CipherParameter::Cipher(
                CipherSuite::Aes256CtrHmacSha512
            ))
        ));
        assert!(matches!(
            parse("PRAGMA kdf_iter")?,
            Statement::ShowParameter(ParameterName::KdfIterations)
        ));
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("SELECT 1").is_err());
        assert!(parse("SET KEY").is_err());
        assert!(parse("SET KEY ''").is_err());
        assert!(parse("CLEAR").is_err());
        assert!(parse("PRAGMA journal_mode = wal").is_err());
        assert!(parse("PRAGMA cipher = 'rot13'").is_err());
        assert!(parse("REKEY 'a' 'b'").is_err());
    }

    #[test]
    fn test_errors_do_not_echo_keys() {
        let err = parse("SET KEY 'hunter2' 'again'").unwrap_err();
        assert!(!format!("{:#}", err).contains("hunter2"));
    }
}
