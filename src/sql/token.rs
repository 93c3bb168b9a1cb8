// Tokens of the key statement language

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Identifier(String),
    Number(String),
    String(String),
    /// `x'..'` literal, hex digits only.
    Blob(String),

    // Keywords
    Set,
    Key,
    Rekey,
    Clear,
    Pragma,

    // Delimiters
    Equal,
    LeftParen,
    RightParen,
    Semicolon,

    Eof,
}

impl Token {
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::Set | Token::Key | Token::Rekey | Token::Clear | Token::Pragma
        )
    }

    /// Convert a string to a keyword token if it matches
    pub fn keyword_from_str(s: &str) -> Option<Token> {
        match s.to_uppercase().as_str() {
            "SET" => Some(Token::Set),
            "KEY" => Some(Token::Key),
            "REKEY" => Some(Token::Rekey),
            "CLEAR" => Some(Token::Clear),
            "PRAGMA" => Some(Token::Pragma),
            _ => None,
        }
    }

    /// Token description for error messages. Literal contents are left
    /// out since they may be key material.
    pub fn describe(&self) -> String {
        match self {
            Token::Identifier(name) => format!("identifier '{}'", name),
            Token::Number(n) => format!("number {}", n),
            Token::String(_) => "string literal".to_string(),
            Token::Blob(_) => "blob literal".to_string(),
            Token::Set => "SET".to_string(),
            Token::Key => "KEY".to_string(),
            Token::Rekey => "REKEY".to_string(),
            Token::Clear => "CLEAR".to_string(),
            Token::Pragma => "PRAGMA".to_string(),
            Token::Equal => "'='".to_string(),
            Token::LeftParen => "'('".to_string(),
            Token::RightParen => "')'".to_string(),
            Token::Semicolon => "';'".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}
