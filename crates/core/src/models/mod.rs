pub mod item;
pub mod package;
pub mod request;

pub use item::*;
pub use package::*;
pub use request::*;
