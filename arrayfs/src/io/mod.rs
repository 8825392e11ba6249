mod page;
mod store;

pub use page::{PageIndex, PageStorage};
pub(crate) use store::PageStore;
