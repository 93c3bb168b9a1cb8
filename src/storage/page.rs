use std::fmt;

/// One-based page number. Page 1 carries the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub const FIRST: PageId = PageId(1);

    pub fn is_first(self) -> bool {
        self.0 == 1
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
