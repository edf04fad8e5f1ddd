mod element;
mod parser;
mod traits;
mod writer;

pub use element::*;
pub use matter_tlv_derive::{FromTLV, ToTLV};
pub use parser::*;
pub use traits::*;
pub use writer::*;
