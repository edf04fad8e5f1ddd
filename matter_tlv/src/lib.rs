//! Matter TLV codec.
//!
//! The `tlv` module holds the streaming [`TLVReader`](tlv::TLVReader) and
//! [`TLVWriter`](tlv::TLVWriter), the [`Element`](tlv::Element) tree, and
//! the [`ToTLV`](tlv::ToTLV) / [`FromTLV`](tlv::FromTLV) traits that bind
//! Rust types to TLV. The traits can be derived:
//!
//! ```
//! use matter_tlv::tlv::{self, FromTLV, ToTLV};
//!
//! #[derive(ToTLV, FromTLV, Debug, PartialEq)]
//! #[tlvargs(start = 1)]
//! struct OnOff {
//!     on: bool,
//!     level: u8,
//!     #[tlv(optional)]
//!     label: Option<String>,
//! }
//!
//! let v = OnOff { on: true, level: 42, label: None };
//! let bytes = tlv::encode(&v).unwrap();
//! assert_eq!(bytes, [0x15, 0x29, 0x01, 0x24, 0x02, 0x2a, 0x18]);
//! assert_eq!(tlv::decode::<OnOff>(&bytes).unwrap(), v);
//! ```

// Lets the derive output name `::matter_tlv` from inside this crate too
extern crate self as matter_tlv;

pub mod error;
pub mod tlv;
pub mod tlv_common;
pub mod utils;

pub use error::Error;
pub use tlv::{decode, decode_from, encode, encode_into};
