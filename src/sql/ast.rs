// Key statement AST

use crate::codec::{CipherSuite, KeySecret};

#[derive(Debug, Clone)]
pub enum Statement {
    /// `SET KEY ...`, `PRAGMA key = ...`
    SetKey(KeySecret),
    /// `REKEY ...`, `PRAGMA rekey = ...`. `None` decrypts the database.
    Rekey(Option<KeySecret>),
    ClearKey,
    /// `PRAGMA cipher_integrity_check`
    IntegrityCheck,
    /// `PRAGMA cipher_status`
    CipherStatus,
    SetParameter(CipherParameter),
    ShowParameter(ParameterName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterName {
    KdfIterations,
    PageSize,
    ReserveBytes,
    Cipher,
}

impl ParameterName {
    pub fn from_pragma(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "kdf_iter" => Some(ParameterName::KdfIterations),
            "cipher_page_size" => Some(ParameterName::PageSize),
            "cipher_reserve_size" => Some(ParameterName::ReserveBytes),
            "cipher" => Some(ParameterName::Cipher),
            _ => None,
        }
    }

    pub fn pragma(self) -> &'static str {
        match self {
            ParameterName::KdfIterations => "kdf_iter",
            ParameterName::PageSize => "cipher_page_size",
            ParameterName::ReserveBytes => "cipher_reserve_size",
            ParameterName::Cipher => "cipher",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherParameter {
    KdfIterations(u32),
    PageSize(usize),
    ReserveBytes(usize),
    Cipher(CipherSuite),
}
