//! DNG container support: a little-endian DNG 1.4 writer, a minimal IFD
//! reader for input sequences, and OpcodeList2 gain-map handling.

mod opcodes;
mod reader;
pub mod tags;
mod writer;

pub use opcodes::{encode_opcode_list, parse_opcode_list, GainMap, OPCODE_GAIN_MAP};
pub use reader::{Ifd, IfdEntry};
pub use tags::{DngOrientation, Illuminant};
pub use writer::{DngError, DngImage};
