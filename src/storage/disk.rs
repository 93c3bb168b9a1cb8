pub mod page_manager;
pub mod shadow;

pub use page_manager::PageManager;
